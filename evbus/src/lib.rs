//! 进程内事件总线（evbus）
//!
//! 提供类型化的派发/订阅机制：
//! - 跨事件类型的 FIFO 顺序，同一事件类型内按注册顺序调用处理器；
//! - 每个事件一个完成句柄（`EventHandle`），可等待聚合结果或逐个处理器的结果；
//! - 处理器内部可继续派发（排队）或等待子事件（越过队列立即执行）；
//! - `wait_until_idle` 空闲同步与带时限的 `stop`。
//!
//! 典型用法：
//! 1. 使用 `#[evbus_macros::event]` 定义事件类型；
//! 2. 创建 `EventBus` 并通过 `on`/`on_sync` 注册处理器；
//! 3. `dispatch` 事件并 `await` 句柄取得结果；
//! 4. `wait_until_idle` 等待派生事件全部处理完毕，`stop` 关闭总线。
//!
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;

pub use bus::{BusStatus, EventBus, EventHandle, StopOutcome};
pub use config::EventBusConfig;
pub use error::{BusError, BusResult};
pub use event::{Event, EventSnapshot, EventStatus, HandlerResult};
pub use handler::{EventHandler, HandlerId};

// 允许在本 crate 内部通过 ::evbus 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::evbus 路径。
extern crate self as evbus;
