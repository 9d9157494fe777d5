//! 调度器（Scheduler）
//!
//! 每个总线对应一个长驻 tokio 任务，作为唯一的逻辑排序者：
//! - 从 FIFO 队列头部取出事件，按注册顺序串行调用处理器；
//! - 单个处理器的错误、panic 与超时都被捕获并记入该事件的结果，不影响其他处理器；
//! - 队列为空时挂起，等待 `dispatch`/`stop` 唤醒。
//!
//! 队列、运行集与总线状态由同一把互斥锁保护，且从不跨 `.await` 持有。
//! 唯一的顺序例外是内联等待：处理器等待一个仍在排队的同总线事件时，
//! 该事件被移出队列并在调用方任务上立即处理（见 `run_inline`）。
//!
use super::context::{self, HandlerContext};
use super::{BusStatus, StopOutcome};
use crate::config::EventBusConfig;
use crate::error::{BusError, BusResult};
use crate::event::EventStatus;
use crate::event::record::{AnyValue, EventRecord, HandlerOutcome};
use crate::handler::{HandlerEntry, HandlerRegistry};
use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

struct SharedState {
    status: BusStatus,
    queue: VecDeque<Arc<EventRecord>>,
    /// 正在执行的事件；内联等待时会同时存在父子两条
    running: Vec<Arc<EventRecord>>,
}

impl SharedState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }

    /// `Stopping` 且已排空时收尾为 `Stopped`
    fn settle_stop(&mut self) -> bool {
        if self.status == BusStatus::Stopping && self.is_idle() {
            self.status = BusStatus::Stopped;
            true
        } else {
            false
        }
    }
}

pub(crate) struct BusCore {
    id: u64,
    pub(crate) config: EventBusConfig,
    pub(crate) registry: HandlerRegistry,
    state: Mutex<SharedState>,
    /// 唤醒调度器；调度任务另持一份，总线释放时仍可被唤醒
    wake: Arc<Notify>,
    /// 队列/运行集/状态发生变化，唤醒 `wait_until_idle` 与 `stop` 的等待者
    changed: Notify,
    history: Mutex<VecDeque<Arc<EventRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BusCore {
    pub(crate) fn new(config: EventBusConfig) -> Self {
        Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            config,
            registry: HandlerRegistry::new(),
            state: Mutex::new(SharedState {
                status: BusStatus::Running,
                queue: VecDeque::new(),
                running: Vec::new(),
            }),
            wake: Arc::new(Notify::new()),
            changed: Notify::new(),
            history: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    // 锁内从不执行用户代码，中毒时沿用内部数据即可
    fn state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<Arc<EventRecord>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> BusStatus {
        self.state().status
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    // ---- 派发 ----

    /// 追加到队列尾部并唤醒调度器（首次派发时启动调度器）
    pub(crate) fn enqueue(self: &Arc<Self>, record: &Arc<EventRecord>) -> BusResult<()> {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        {
            let mut state = self.state();
            if state.status != BusStatus::Running {
                return Err(BusError::DispatchRejected {
                    status: state.status,
                });
            }
            record.advance(EventStatus::Dispatched);
            state.queue.push_back(record.clone());
            // 与入队同在锁内，历史顺序即队列顺序
            self.remember(record);
        }

        debug!(
            bus = %self.name(),
            event_id = %record.id(),
            event_type = record.event_type(),
            parent_id = ?record.parent_id(),
            "event dispatched"
        );

        self.ensure_worker(&runtime);
        self.wake.notify_one();
        Ok(())
    }

    fn ensure_worker(self: &Arc<Self>, runtime: &Handle) {
        let mut worker = self.worker_guard();
        if worker.is_none() {
            let task = Self::run(Arc::downgrade(self), self.wake.clone());
            *worker = Some(runtime.spawn(task));
        }
    }

    // ---- 调度循环 ----

    /// 调度任务只持有弱引用，所有持有者释放后随之退出
    async fn run(weak: Weak<Self>, wake: Arc<Notify>) {
        let mut started = false;

        loop {
            let Some(core) = weak.upgrade() else {
                debug!("scheduler exited: event bus dropped");
                return;
            };
            if !started {
                debug!(bus = %core.name(), "scheduler started");
                started = true;
            }

            let (stopped, next) = {
                let mut state = core.state();
                let next = match state.status {
                    BusStatus::Stopped => None,
                    _ => state.queue.pop_front(),
                };
                if let Some(record) = &next {
                    state.running.push(record.clone());
                }
                (state.status == BusStatus::Stopped, next)
            };

            if stopped {
                debug!(bus = %core.name(), "scheduler exited");
                return;
            }

            match next {
                Some(record) => {
                    let _running = RunningGuard::new(&core, &record);
                    core.process(&record).await;
                }
                None => {
                    drop(core);
                    wake.notified().await;
                }
            }
        }
    }

    /// 依次调用匹配的处理器并写入终态
    async fn process(&self, record: &Arc<EventRecord>) {
        if !record.advance(EventStatus::Running) {
            // 已被强制停止
            return;
        }

        let handlers = self.registry.matching(record.event_type());
        debug!(
            bus = %self.name(),
            event_id = %record.id(),
            event_type = record.event_type(),
            handlers = handlers.len(),
            "event started"
        );

        let ctx = HandlerContext {
            bus_id: self.id,
            event_id: record.id(),
        };
        for handler in handlers {
            let outcome = context::scope(ctx, self.invoke(&handler, record)).await;
            record.push_result(outcome);
        }

        let status = if record.has_failures() {
            EventStatus::Failed
        } else {
            EventStatus::Completed
        };
        record.advance(status);

        debug!(
            bus = %self.name(),
            event_id = %record.id(),
            event_type = record.event_type(),
            status = ?status,
            "event finished"
        );
    }

    async fn invoke(&self, handler: &HandlerEntry, record: &EventRecord) -> HandlerOutcome {
        let started_at = Utc::now();
        let fut = AssertUnwindSafe(handler.call(record)).catch_unwind();

        let value = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(caught) => settle(handler, caught),
                Err(_) => Err(BusError::HandlerTimeout {
                    handler: handler.name.clone(),
                    timeout: limit,
                }),
            },
            None => settle(handler, fut.await),
        };

        if let Err(err) = &value {
            warn!(
                bus = %self.name(),
                event_id = %record.id(),
                event_type = record.event_type(),
                handler = %handler.name,
                error = %err,
                "event handler failed"
            );
        }

        HandlerOutcome {
            handler_id: handler.id,
            handler_name: handler.name.clone(),
            started_at,
            completed_at: Utc::now(),
            value,
        }
    }

    fn finish(&self, record: &Arc<EventRecord>) {
        // 处理过程被中途丢弃（例如等待它的父处理器超时）
        if !record.status().is_terminal() && record.advance(EventStatus::Failed) {
            warn!(
                bus = %self.name(),
                event_id = %record.id(),
                event_type = record.event_type(),
                "event abandoned before its handlers finished"
            );
        }

        let stopped = {
            let mut state = self.state();
            state.running.retain(|r| !Arc::ptr_eq(r, record));
            state.settle_stop()
        };
        if stopped {
            info!(bus = %self.name(), "event bus stopped after draining");
            self.wake.notify_one();
        }
        self.changed.notify_waiters();
    }

    // ---- 内联等待 ----

    /// 若 `record` 仍在队列中，将其移出并在当前任务上立即处理
    ///
    /// 返回装箱的 future：调用方位于处理器 future 内部，避免递归类型。
    pub(crate) fn run_inline(
        self: Arc<Self>,
        record: Arc<EventRecord>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let claimed = {
                let mut state = self.state();
                match state.queue.iter().position(|r| Arc::ptr_eq(r, &record)) {
                    Some(idx) => {
                        state.queue.remove(idx);
                        state.running.push(record.clone());
                        true
                    }
                    None => false,
                }
            };
            if !claimed {
                return;
            }

            debug!(
                bus = %self.name(),
                event_id = %record.id(),
                event_type = record.event_type(),
                "processing awaited event inline, ahead of queue order"
            );
            let _running = RunningGuard::new(&self, &record);
            self.process(&record).await;
        }
        .boxed()
    }

    // ---- 空闲与停止 ----

    /// 等待 `ready` 成立；超时返回 `false`
    async fn wait_until<P>(&self, ready: P, timeout: Option<Duration>) -> bool
    where
        P: Fn(&SharedState) -> bool,
    {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                let done = ready(&*self.state());
                if done {
                    return;
                }
                changed.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }

    pub(crate) async fn wait_until_idle(&self, timeout: Option<Duration>) -> BusResult<()> {
        if context::inside_handler_of(self.id) {
            return Err(BusError::Reentrant {
                operation: "wait_until_idle",
            });
        }

        if self.wait_until(SharedState::is_idle, timeout).await {
            Ok(())
        } else {
            Err(BusError::Timeout {
                operation: "wait_until_idle",
                timeout: timeout.unwrap_or_default(),
            })
        }
    }

    pub(crate) async fn stop(&self, clear: bool, timeout: Option<Duration>) -> StopOutcome {
        let cancelled = {
            let mut state = self.state();
            match state.status {
                BusStatus::Stopped => return StopOutcome::AlreadyStopped,
                BusStatus::Running => state.status = BusStatus::Stopping,
                BusStatus::Stopping => {}
            }
            let cancelled: Vec<Arc<EventRecord>> = if clear {
                state.queue.drain(..).collect()
            } else {
                Vec::new()
            };
            state.settle_stop();
            cancelled
        };

        for record in &cancelled {
            record.advance(EventStatus::Cancelled);
        }
        info!(
            bus = %self.name(),
            clear,
            cancelled = cancelled.len(),
            timeout = ?timeout,
            "stopping event bus"
        );
        self.wake.notify_one();
        self.changed.notify_waiters();

        // 在处理器内部调用时无法等待自身所在的事件链，剩余队列排空后由调度器收尾
        if context::inside_handler_of(self.id) {
            return StopOutcome::Graceful;
        }

        let stopped = self
            .wait_until(|state| state.status == BusStatus::Stopped, timeout)
            .await;
        if stopped {
            StopOutcome::Graceful
        } else {
            self.force_stop();
            StopOutcome::Forced
        }
    }

    fn force_stop(&self) {
        let (queued, running) = {
            let mut state = self.state();
            state.status = BusStatus::Stopped;
            let queued: Vec<Arc<EventRecord>> = state.queue.drain(..).collect();
            (queued, std::mem::take(&mut state.running))
        };

        for record in queued.iter().chain(running.iter()) {
            record.advance(EventStatus::ForceStopped);
        }
        if let Some(worker) = self.worker_guard().take() {
            worker.abort();
        }

        warn!(
            bus = %self.name(),
            queued = queued.len(),
            running = running.len(),
            "event bus force-stopped after timeout"
        );
        self.wake.notify_one();
        self.changed.notify_waiters();
    }

    // ---- 历史 ----

    fn remember(&self, record: &Arc<EventRecord>) {
        let max = self.config.max_history;
        if max == 0 {
            return;
        }

        let mut history = self.history_guard();
        history.push_back(record.clone());
        while history.len() > max {
            // 优先淘汰最早结束的事件
            let idx = history
                .iter()
                .position(|r| r.status().is_terminal())
                .unwrap_or(0);
            history.remove(idx);
        }
    }

    pub(crate) fn history(&self) -> Vec<Arc<EventRecord>> {
        self.history_guard().iter().cloned().collect()
    }
}

impl Drop for BusCore {
    fn drop(&mut self) {
        // 挂起中的调度任务醒来后无法再升级弱引用，随即退出
        self.wake.notify_one();
    }
}

/// 事件离开运行集的唯一出口；在 future 被丢弃时同样生效
struct RunningGuard<'a> {
    core: &'a BusCore,
    record: &'a Arc<EventRecord>,
}

impl<'a> RunningGuard<'a> {
    fn new(core: &'a BusCore, record: &'a Arc<EventRecord>) -> Self {
        Self { core, record }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.core.finish(self.record);
    }
}

fn settle(
    handler: &HandlerEntry,
    caught: Result<anyhow::Result<Option<AnyValue>>, Box<dyn Any + Send>>,
) -> Result<Option<AnyValue>, BusError> {
    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(BusError::handler(handler.name.clone(), &err)),
        Err(panic) => Err(BusError::Handler {
            handler: handler.name.clone(),
            reason: format!("panicked: {}", panic_message(&*panic)),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}
