//! 处理器执行上下文（task-local）
//!
//! 调度器在调用处理器时写入 `{bus_id, event_id}`，用于：
//! - 为处理器内部派发的子事件记录 `parent_id`；
//! - 识别同一总线上的内联等待、自等待死锁与重入调用。
//!
//! 上下文只在调度器任务上可见；处理器自行 `tokio::spawn` 的任务不会继承。
//!
use std::future::Future;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: HandlerContext;
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct HandlerContext {
    pub bus_id: u64,
    pub event_id: Uuid,
}

/// 当前任务正在执行的处理器上下文（任意总线）
pub(crate) fn current() -> Option<HandlerContext> {
    CURRENT.try_with(|ctx| *ctx).ok()
}

/// 当前任务是否正在执行指定总线的处理器
pub(crate) fn inside_handler_of(bus_id: u64) -> bool {
    current().is_some_and(|ctx| ctx.bus_id == bus_id)
}

pub(crate) async fn scope<F: Future>(ctx: HandlerContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}
