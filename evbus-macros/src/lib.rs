//! evbus 过程宏
//!
//! - `#[event]`：为结构体或枚举实现 `::evbus::event::Event`，并补齐所需派生。
//!
use proc_macro::TokenStream;

mod event;

/// 事件宏
/// - 适用于结构体与枚举，事件类型默认为类型名，处理器返回值默认为 `()`
/// - 合并/追加派生：`Debug`, `Clone`, `serde::Serialize`
/// - 支持参数：`#[event(event_type = "...", output = Type)]`
///
/// ```ignore
/// #[event(output = String)]
/// struct MainEvent;
///
/// #[event(event_type = "task.process")]
/// struct ProcessTaskEvent {
///     task_id: u32,
/// }
/// ```
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
