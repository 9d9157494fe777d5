use super::{EventHandler, HandlerId};
use crate::error::BusError;
use crate::event::record::{AnyValue, EventRecord};
use crate::event::{Event, EventSnapshot};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type HandlerFuture = BoxFuture<'static, anyhow::Result<Option<AnyValue>>>;

type HandlerFn = Arc<dyn Fn(&EventRecord) -> HandlerFuture + Send + Sync>;

/// 订阅键：具体事件类型或全部事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Subscription {
    Type(&'static str),
    Any,
}

pub(crate) struct HandlerEntry {
    pub id: HandlerId,
    pub name: String,
    call: HandlerFn,
}

impl HandlerEntry {
    /// 生成处理器 future；用户代码只会在 future 被 poll 时执行
    pub(crate) fn call(&self, record: &EventRecord) -> HandlerFuture {
        (self.call)(record)
    }
}

/// 订阅表
///
/// 每个注册项携带单调递增的序号，匹配时将类型处理器与通配处理器按序号合并，
/// 因而实际调用顺序即注册顺序。
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    by_sub: DashMap<Subscription, Vec<Arc<HandlerEntry>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 注册异步处理器
    pub(crate) fn register<E, F, Fut>(&self, name: String, f: F) -> HandlerId
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<E::Output>> + Send + 'static,
    {
        let f = Arc::new(f);
        let call: HandlerFn = Arc::new(move |record: &EventRecord| -> HandlerFuture {
            let f = f.clone();
            let payload = record.payload();
            Box::pin(async move {
                let event = downcast_payload::<E>(payload)?;
                let out = f(event).await?;
                Ok(Some(Arc::new(out) as AnyValue))
            })
        });
        self.insert(Subscription::Type(E::EVENT_TYPE), name, call)
    }

    /// 注册同步处理器（在调度器上阻塞执行）
    pub(crate) fn register_sync<E, F>(&self, name: String, f: F) -> HandlerId
    where
        E: Event,
        F: Fn(&E) -> anyhow::Result<E::Output> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let call: HandlerFn = Arc::new(move |record: &EventRecord| -> HandlerFuture {
            let f = f.clone();
            let payload = record.payload();
            Box::pin(async move {
                let event = downcast_payload::<E>(payload)?;
                let out = f(&*event)?;
                Ok(Some(Arc::new(out) as AnyValue))
            })
        });
        self.insert(Subscription::Type(E::EVENT_TYPE), name, call)
    }

    /// 注册 trait 对象形式的处理器
    pub(crate) fn register_handler<E: Event>(
        &self,
        handler: Arc<dyn EventHandler<E>>,
    ) -> HandlerId {
        let name = handler.handler_name().to_string();
        let call: HandlerFn = Arc::new(move |record: &EventRecord| -> HandlerFuture {
            let handler = handler.clone();
            let payload = record.payload();
            Box::pin(async move {
                let event = downcast_payload::<E>(payload)?;
                let out = handler.handle(&*event).await?;
                Ok(Some(Arc::new(out) as AnyValue))
            })
        });
        self.insert(Subscription::Type(E::EVENT_TYPE), name, call)
    }

    /// 注册通配处理器：接收所有事件的信封快照
    pub(crate) fn register_any<F, Fut>(&self, name: String, f: F) -> HandlerId
    where
        F: Fn(EventSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        let call: HandlerFn = Arc::new(move |record: &EventRecord| -> HandlerFuture {
            let f = f.clone();
            let snapshot = record.snapshot();
            Box::pin(async move {
                f(snapshot).await?;
                Ok(None)
            })
        });
        self.insert(Subscription::Any, name, call)
    }

    fn insert(&self, sub: Subscription, name: String, call: HandlerFn) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(HandlerEntry { id, name, call });
        self.by_sub.entry(sub).or_default().push(entry);
        id
    }

    /// 取消注册；返回是否找到该处理器
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut removed = false;
        for mut list in self.by_sub.iter_mut() {
            let before = list.len();
            list.retain(|h| h.id != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// 某事件类型当前匹配的处理器快照（按注册顺序）
    pub(crate) fn matching(&self, event_type: &'static str) -> Vec<Arc<HandlerEntry>> {
        let mut merged: Vec<Arc<HandlerEntry>> = Vec::new();
        if let Some(list) = self.by_sub.get(&Subscription::Type(event_type)) {
            merged.extend(list.iter().cloned());
        }
        if let Some(list) = self.by_sub.get(&Subscription::Any) {
            merged.extend(list.iter().cloned());
        }
        merged.sort_by_key(|h| h.id);
        merged
    }

    pub(crate) fn len(&self) -> usize {
        self.by_sub.iter().map(|list| list.len()).sum()
    }
}

fn downcast_payload<E: Event>(payload: AnyValue) -> anyhow::Result<Arc<E>> {
    payload.downcast::<E>().map_err(|_| {
        anyhow::Error::new(BusError::TypeMismatch {
            expected: std::any::type_name::<E>(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Ping;

    impl Event for Ping {
        const EVENT_TYPE: &'static str = "Ping";
        type Output = &'static str;
    }

    #[derive(Serialize)]
    struct Pong;

    impl Event for Pong {
        const EVENT_TYPE: &'static str = "Pong";
        type Output = ();
    }

    fn ping_record() -> EventRecord {
        EventRecord::new("Ping", None, Arc::new(Ping), serde_json::Value::Null)
    }

    #[test]
    fn matching_merges_typed_and_wildcard_in_registration_order() {
        let reg = HandlerRegistry::new();
        let a = reg.register_sync::<Ping, _>("a".into(), |_| Ok("a"));
        let any = reg.register_any("any".into(), |_| async { Ok(()) });
        let _pong = reg.register_sync::<Pong, _>("pong".into(), |_| Ok(()));
        let b = reg.register::<Ping, _, _>("b".into(), |_| async { Ok("b") });

        let ids: Vec<HandlerId> = reg.matching("Ping").iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![a, any, b]);
        assert_eq!(reg.matching("Pong").len(), 2);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn remove_drops_only_the_given_handler() {
        let reg = HandlerRegistry::new();
        let a = reg.register_sync::<Ping, _>("a".into(), |_| Ok("a"));
        let b = reg.register_sync::<Ping, _>("b".into(), |_| Ok("b"));

        assert!(reg.remove(a));
        assert!(!reg.remove(a));
        let ids: Vec<HandlerId> = reg.matching("Ping").iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[tokio::test]
    async fn typed_call_downcasts_payload_and_boxes_output() {
        let reg = HandlerRegistry::new();
        reg.register_sync::<Ping, _>("a".into(), |_| Ok("pong"));

        let entry = reg.matching("Ping").remove(0);
        let value = entry.call(&ping_record()).await.unwrap().unwrap();
        assert_eq!(value.downcast_ref::<&'static str>(), Some(&"pong"));
    }

    #[tokio::test]
    async fn payload_of_wrong_type_is_reported_as_mismatch() {
        let reg = HandlerRegistry::new();
        reg.register_sync::<Pong, _>("p".into(), |_| Ok(()));

        let entry = reg.matching("Pong").remove(0);
        let err = entry.call(&ping_record()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BusError>(),
            Some(BusError::TypeMismatch { .. })
        ));
    }
}
