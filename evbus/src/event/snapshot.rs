use super::EventStatus;
use crate::error::BusError;
use crate::handler::HandlerId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// 事件信封的只读视图
///
/// 对应 `{id, type, payload, createdAt, status, results}`，可直接序列化用于日志或转发。
#[derive(Clone, Debug, Serialize)]
pub struct EventSnapshot {
    pub id: Uuid,
    pub event_type: String,
    /// 在处理器内部派发时，记录正在处理的上级事件
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub payload: serde_json::Value,
    pub results: Vec<HandlerResultSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HandlerResultSnapshot {
    pub handler_id: HandlerId,
    pub handler_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// 单个处理器的类型化结果
///
/// `value` 为 `Ok(None)` 表示该处理器是通配处理器，不参与事件结果聚合。
#[derive(Clone, Debug)]
pub struct HandlerResult<T> {
    pub handler_id: HandlerId,
    pub handler_name: String,
    pub value: Result<Option<T>, BusError>,
}
