//! 事件总线（EventBus）
//!
//! 对外门面，组合订阅表、派发队列与调度器：
//! - `on`/`on_sync`/`subscribe`/`on_any`：注册处理器，`off` 取消；
//! - `dispatch`：入队并立即返回句柄，从不阻塞调用方；
//! - `dispatch_and_await`：在处理器内部使用时，子事件越过队列立即执行；
//! - `wait_until_idle`：等待队列与运行集全部排空（包括处理器继续派发的事件）；
//! - `stop`：拒绝新的派发，按需清空队列，超时则强制停止。
//!
//! 总线实例之间互不共享状态，需要时以 `Clone` 显式传递给协作方。
//!
mod context;
mod handle;
mod scheduler;

pub use handle::EventHandle;

use crate::config::EventBusConfig;
use crate::error::BusResult;
use crate::event::record::EventRecord;
use crate::event::{Event, EventSnapshot};
use crate::handler::{EventHandler, HandlerId};
use scheduler::BusCore;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 总线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusStatus {
    Running,
    /// 已拒绝新的派发，正在排空
    Stopping,
    Stopped,
}

/// `stop` 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// 在时限内排空
    Graceful,
    /// 超时，剩余事件以 `ForceStopped` 结束
    Forced,
    /// 总线此前已经停止
    AlreadyStopped,
}

#[derive(Clone)]
pub struct EventBus {
    core: Arc<BusCore>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name())
            .field("status", &self.status())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            core: Arc::new(BusCore::new(config)),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.core.config
    }

    // ---- 订阅 ----

    /// 注册异步处理器，追加到该事件类型处理器列表的末尾
    ///
    /// 同一闭包重复注册会被调用多次。
    pub fn on<E, F, Fut>(&self, handler: F) -> HandlerId
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<E::Output>> + Send + 'static,
    {
        let name = std::any::type_name::<F>().to_string();
        self.core.registry.register::<E, F, Fut>(name, handler)
    }

    /// 注册同步处理器；它会阻塞调度器直到返回
    pub fn on_sync<E, F>(&self, handler: F) -> HandlerId
    where
        E: Event,
        F: Fn(&E) -> anyhow::Result<E::Output> + Send + Sync + 'static,
    {
        let name = std::any::type_name::<F>().to_string();
        self.core.registry.register_sync::<E, F>(name, handler)
    }

    /// 注册实现了 `EventHandler` 的处理器
    pub fn subscribe<E: Event>(&self, handler: Arc<dyn EventHandler<E>>) -> HandlerId {
        self.core.registry.register_handler(handler)
    }

    /// 注册通配处理器，按注册顺序与类型处理器交错调用；其返回值不参与结果聚合
    pub fn on_any<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(EventSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = std::any::type_name::<F>().to_string();
        self.core.registry.register_any::<F, Fut>(name, handler)
    }

    /// 取消注册；已开始执行的事件不受影响
    pub fn off(&self, id: HandlerId) -> bool {
        self.core.registry.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.core.registry.len()
    }

    // ---- 派发 ----

    /// 将事件追加到队列尾部并立即返回句柄
    ///
    /// 在处理器内部调用时，子事件记录当前事件为 `parent_id`，仍按 FIFO 排队；
    /// 总线处于 `Stopping`/`Stopped` 时返回 `DispatchRejected`。
    pub fn dispatch<E: Event>(&self, event: E) -> BusResult<EventHandle<E>> {
        let payload = serde_json::to_value(&event)?;
        let event = Arc::new(event);
        let parent_id = context::current().map(|ctx| ctx.event_id);

        let record = Arc::new(EventRecord::new(
            E::EVENT_TYPE,
            parent_id,
            event.clone(),
            payload,
        ));
        self.core.enqueue(&record)?;

        Ok(EventHandle::new(self.core.clone(), record, event))
    }

    /// 派发并等待结果
    ///
    /// 在同一总线的处理器内部调用时，子事件越过队列立即执行，父处理器在其结束后继续；
    /// 在处理器外部调用时等价于 `dispatch(event)?.event_result().await`。
    pub async fn dispatch_and_await<E: Event>(&self, event: E) -> BusResult<Option<E::Output>> {
        self.dispatch(event)?.event_result().await
    }

    // ---- 生命周期 ----

    /// 等待队列为空且没有事件在运行
    ///
    /// 超过 `timeout` 返回 `Timeout`；在本总线的处理器内部调用返回 `Reentrant`。
    pub async fn wait_until_idle(&self, timeout: Option<Duration>) -> BusResult<()> {
        self.core.wait_until_idle(timeout).await
    }

    /// 停止总线
    ///
    /// - 立即拒绝新的派发；
    /// - `clear = true`：丢弃尚未开始的事件，它们以 `Cancelled` 结束；
    /// - 等待运行中的事件（以及未清空的队列）结束，超过 `timeout` 则强制停止；
    /// - 对已停止的总线重复调用不做任何事。
    pub async fn stop(&self, clear: bool, timeout: Option<Duration>) -> StopOutcome {
        self.core.stop(clear, timeout).await
    }

    // ---- 观测 ----

    pub fn status(&self) -> BusStatus {
        self.core.status()
    }

    pub fn queue_len(&self) -> usize {
        self.core.queue_len()
    }

    pub fn is_idle(&self) -> bool {
        self.core.is_idle()
    }

    /// 最近派发的事件（按派发顺序），数量受 `max_history` 限制
    pub fn history(&self) -> Vec<EventSnapshot> {
        self.core
            .history()
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<EventSnapshot> {
        self.core
            .history()
            .iter()
            .find(|record| record.id() == id)
            .map(|record| record.snapshot())
    }
}
