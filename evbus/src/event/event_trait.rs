use serde::Serialize;

/// 事件载荷需要满足的通用能力边界
///
/// 通常通过 `#[evbus_macros::event]` 自动实现：
/// ```ignore
/// #[event(output = String)]
/// struct ProcessTask {
///     task_id: u32,
/// }
/// ```
pub trait Event: Serialize + Send + Sync + 'static {
    /// 事件类型标签，用于在订阅表中路由处理器
    const EVENT_TYPE: &'static str;

    /// 处理器的返回值类型；无返回值的事件使用 `()`
    type Output: Clone + Send + Sync + 'static;
}
