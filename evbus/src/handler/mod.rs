//! 事件处理器（EventHandler）与订阅表
//!
//! - `EventHandler`：以 trait 对象形式消费某一类事件；
//! - `HandlerRegistry`：事件类型 → 有序处理器列表，插入顺序即调用顺序；
//! - 闭包形式的注册（同步/异步/通配）见 `EventBus::on*`。
//!
mod registry;

pub(crate) use registry::{HandlerEntry, HandlerRegistry};

use crate::event::Event;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// 处理器注册标识，可用于 `EventBus::off` 取消订阅
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// 处理器名称（用于结果记录与日志）
    fn handler_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 处理事件，返回值参与事件结果聚合
    async fn handle(&self, event: &E) -> anyhow::Result<E::Output>;
}
