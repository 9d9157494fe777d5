//! 事件记录（总线内部持有的可变信封）
//!
//! `EventRecord` 在 `dispatch` 时创建，排队期间由队列持有，执行期间由调度器持有，
//! 结束后由句柄与历史记录只读保留。状态通过 `watch` 通道广播，句柄据此等待终态。
//!
use super::{EventSnapshot, EventStatus, HandlerResultSnapshot};
use crate::error::BusError;
use crate::handler::HandlerId;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// 单个处理器的执行结果（类型擦除）
#[derive(Clone)]
pub(crate) struct HandlerOutcome {
    pub handler_id: HandlerId,
    pub handler_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// 通配处理器不产生值，记为 `Ok(None)`
    pub value: Result<Option<AnyValue>, BusError>,
}

#[derive(Default)]
struct Progress {
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    results: Vec<HandlerOutcome>,
}

pub(crate) struct EventRecord {
    id: Uuid,
    event_type: &'static str,
    parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    payload: AnyValue,
    payload_json: serde_json::Value,
    status: watch::Sender<EventStatus>,
    progress: Mutex<Progress>,
}

impl EventRecord {
    pub(crate) fn new(
        event_type: &'static str,
        parent_id: Option<Uuid>,
        payload: AnyValue,
        payload_json: serde_json::Value,
    ) -> Self {
        let (status, _rx) = watch::channel(EventStatus::Pending);
        Self {
            id: Uuid::new_v4(),
            event_type,
            parent_id,
            created_at: Utc::now(),
            payload,
            payload_json,
            status,
            progress: Mutex::new(Progress::default()),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub(crate) fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub(crate) fn payload(&self) -> AnyValue {
        self.payload.clone()
    }

    pub(crate) fn status(&self) -> EventStatus {
        *self.status.borrow()
    }

    /// 推进状态；若违反单向推进规则（含已处于终态）则忽略并返回 `false`
    pub(crate) fn advance(&self, next: EventStatus) -> bool {
        let advanced = self.status.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if advanced {
            let now = Utc::now();
            let mut progress = self.progress();
            match next {
                EventStatus::Running => progress.started_at = Some(now),
                s if s.is_terminal() => progress.completed_at = Some(now),
                _ => {}
            }
        }

        advanced
    }

    /// 等待事件进入终态
    pub(crate) async fn terminal(&self) -> EventStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            // 发送端与记录同生命周期，这里仅作兜底
            Err(_) => self.status(),
        }
    }

    pub(crate) fn push_result(&self, outcome: HandlerOutcome) {
        self.progress().results.push(outcome);
    }

    pub(crate) fn results(&self) -> Vec<HandlerOutcome> {
        self.progress().results.clone()
    }

    pub(crate) fn has_failures(&self) -> bool {
        self.progress().results.iter().any(|r| r.value.is_err())
    }

    pub(crate) fn snapshot(&self) -> EventSnapshot {
        let status = self.status();
        let progress = self.progress();
        EventSnapshot {
            id: self.id,
            event_type: self.event_type.to_string(),
            parent_id: self.parent_id,
            created_at: self.created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
            status,
            payload: self.payload_json.clone(),
            results: progress
                .results
                .iter()
                .map(|r| HandlerResultSnapshot {
                    handler_id: r.handler_id,
                    handler_name: r.handler_name.clone(),
                    started_at: r.started_at,
                    completed_at: r.completed_at,
                    error: r.value.as_ref().err().map(|e| e.to_string()),
                })
                .collect(),
        }
    }

    // 锁内从不执行用户代码，中毒时沿用内部数据即可
    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
