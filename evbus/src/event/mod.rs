//! 事件（Event）与事件信封
//!
//! 定义事件载荷需要实现的最小接口（`Event`），事件生命周期状态（`EventStatus`），
//! 以及对外只读的信封视图（`EventSnapshot`）与按处理器划分的结果（`HandlerResult`）。

mod event_trait;
pub(crate) mod record;
mod snapshot;
mod status;

pub use event_trait::Event;
pub use snapshot::{EventSnapshot, HandlerResult, HandlerResultSnapshot};
pub use status::EventStatus;
