//! 事件句柄（EventHandle）
//!
//! `dispatch` 的返回值，可等待事件结束并读取聚合结果或各处理器的结果。
//! 在同一总线的处理器内部等待一个仍在排队的事件，会使其越过队列立即执行。
//!
use super::context;
use super::scheduler::BusCore;
use crate::error::{BusError, BusResult};
use crate::event::record::EventRecord;
use crate::event::{Event, EventSnapshot, EventStatus, HandlerResult};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use uuid::Uuid;

pub struct EventHandle<E: Event> {
    core: Arc<BusCore>,
    record: Arc<EventRecord>,
    event: Arc<E>,
}

impl<E: Event> Clone for EventHandle<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            record: self.record.clone(),
            event: self.event.clone(),
        }
    }
}

impl<E: Event> fmt::Debug for EventHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("id", &self.record.id())
            .field("event_type", &E::EVENT_TYPE)
            .field("status", &self.record.status())
            .finish()
    }
}

impl<E: Event> EventHandle<E> {
    pub(crate) fn new(core: Arc<BusCore>, record: Arc<EventRecord>, event: Arc<E>) -> Self {
        Self {
            core,
            record,
            event,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id()
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.record.parent_id()
    }

    /// 事件载荷
    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn status(&self) -> EventStatus {
        self.record.status()
    }

    pub fn snapshot(&self) -> EventSnapshot {
        self.record.snapshot()
    }

    /// 等待事件进入终态并返回该终态
    ///
    /// 在同一总线的处理器内部调用时：
    /// - 事件仍在排队：立即在当前任务上执行（内联等待，越过队列顺序）；
    /// - 事件正在运行：它只能是当前处理器链上的祖先，等待永远不会结束，返回 `Deadlock`。
    pub async fn wait(&self) -> BusResult<EventStatus> {
        if context::inside_handler_of(self.core.id()) {
            match self.record.status() {
                EventStatus::Pending | EventStatus::Dispatched => {
                    self.core
                        .clone()
                        .run_inline(self.record.clone())
                        .await;
                }
                EventStatus::Running => {
                    return Err(BusError::Deadlock {
                        event_id: self.record.id(),
                    });
                }
                _ => {}
            }
        }

        Ok(self.record.terminal().await)
    }

    /// 等待事件结束并返回聚合结果
    ///
    /// - 任一处理器失败：返回第一个失败；
    /// - 否则返回按调用顺序第一个处理器的返回值；没有类型处理器时为 `None`；
    /// - 被清空或强制停止的事件分别返回 `Cancelled` / `ForceStopped`。
    pub async fn event_result(&self) -> BusResult<Option<E::Output>> {
        let status = self.wait().await?;
        let event_id = self.record.id();

        match status {
            EventStatus::Cancelled => return Err(BusError::Cancelled { event_id }),
            EventStatus::ForceStopped => return Err(BusError::ForceStopped { event_id }),
            _ => {}
        }

        let results = self.handler_results();
        if let Some(err) = results.iter().find_map(|r| r.value.as_ref().err()) {
            return Err(err.clone());
        }
        if status == EventStatus::Failed {
            return Err(BusError::Abandoned { event_id });
        }

        Ok(results.into_iter().find_map(|r| r.value.ok().flatten()))
    }

    /// 当前已记录的各处理器结果（按调用顺序），不等待
    pub fn handler_results(&self) -> Vec<HandlerResult<E::Output>> {
        self.record
            .results()
            .into_iter()
            .map(|outcome| {
                let value = match outcome.value {
                    Ok(Some(v)) => match v.downcast_ref::<E::Output>() {
                        Some(out) => Ok(Some(out.clone())),
                        None => Err(BusError::TypeMismatch {
                            expected: std::any::type_name::<E::Output>(),
                        }),
                    },
                    Ok(None) => Ok(None),
                    Err(err) => Err(err),
                };
                HandlerResult {
                    handler_id: outcome.handler_id,
                    handler_name: outcome.handler_name,
                    value,
                }
            })
            .collect()
    }
}

/// 允许直接 `handle.await` 获取聚合结果
impl<E: Event> IntoFuture for EventHandle<E> {
    type Output = BusResult<Option<E::Output>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.event_result().await }.boxed()
    }
}
