//! 事件总线统一错误定义
//!
//! 覆盖处理器失败、派发拒绝、超时、取消/强制停止与重入检测等最小必要集合，
//! 以便调用方在等待某个事件结果时只观察到该事件自身的失败。
//!
use crate::bus::BusStatus;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// 统一错误类型
///
/// 需要 `Clone`：同一事件的结果可能被多个句柄重复读取。
#[non_exhaustive]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    // --- 处理器 ---
    #[error("event handler error: handler={handler}, reason={reason}")]
    Handler { handler: String, reason: String },
    #[error("event handler timed out: handler={handler}, timeout={timeout:?}")]
    HandlerTimeout { handler: String, timeout: Duration },

    // --- 总线生命周期 ---
    #[error("dispatch rejected: bus is {status:?}")]
    DispatchRejected { status: BusStatus },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("event cancelled before running: id={event_id}")]
    Cancelled { event_id: Uuid },
    #[error("event force-stopped: id={event_id}")]
    ForceStopped { event_id: Uuid },
    #[error("event abandoned before its handlers finished: id={event_id}")]
    Abandoned { event_id: Uuid },

    // --- 嵌套派发 ---
    #[error("awaiting event {event_id} from its own handler chain would never resolve")]
    Deadlock { event_id: Uuid },
    #[error("{operation} cannot be awaited from inside a handler of the same bus")]
    Reentrant { operation: &'static str },

    // --- 通用 ---
    #[error("serialization error: {reason}")]
    Serde { reason: String },
    #[error("no tokio runtime available to drive the bus")]
    NoRuntime,
    #[error("type mismatch: expected={expected}")]
    TypeMismatch { expected: &'static str },
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serde {
            reason: err.to_string(),
        }
    }
}

impl BusError {
    pub(crate) fn handler(handler: impl Into<String>, err: &anyhow::Error) -> Self {
        BusError::Handler {
            handler: handler.into(),
            // `{:#}` 保留 anyhow 的上下文链
            reason: format!("{err:#}"),
        }
    }
}
