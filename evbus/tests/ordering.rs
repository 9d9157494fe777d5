use anyhow::anyhow;
use async_trait::async_trait;
use evbus::{
    BusError, EventBus, EventBusConfig, EventHandler, EventSnapshot, EventStatus,
};
use evbus_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[event]
struct Step {
    n: u32,
}

#[event]
struct Other {
    n: u32,
}

#[event(output = u64)]
struct Compute {
    value: u64,
}

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

const IDLE: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_run_in_dispatch_order_across_types() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let log: Log = Arc::default();

    let l = log.clone();
    bus.on(move |ev: Arc<Step>| {
        let log = l.clone();
        async move {
            push(&log, format!("step-{}-start", ev.n));
            tokio::time::sleep(Duration::from_millis(10)).await;
            push(&log, format!("step-{}-end", ev.n));
            anyhow::Ok(())
        }
    });
    let l = log.clone();
    bus.on_sync(move |ev: &Other| {
        push(&l, format!("other-{}", ev.n));
        Ok(())
    });

    bus.dispatch(Step { n: 1 })?;
    bus.dispatch(Other { n: 1 })?;
    bus.dispatch(Step { n: 2 })?;
    bus.wait_until_idle(IDLE).await?;

    assert_eq!(
        entries(&log),
        vec![
            "step-1-start",
            "step-1-end",
            "other-1",
            "step-2-start",
            "step-2-end"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn handlers_run_in_registration_order_for_every_instance() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let log: Log = Arc::default();

    for name in ["h1", "h2", "h3"] {
        let l = log.clone();
        bus.on_sync(move |ev: &Step| {
            push(&l, format!("{name}-{}", ev.n));
            Ok(())
        });
    }

    for n in 0..2 {
        bus.dispatch(Step { n })?;
    }
    bus.wait_until_idle(IDLE).await?;

    assert_eq!(
        entries(&log),
        vec!["h1-0", "h2-0", "h3-0", "h1-1", "h2-1", "h3-1"]
    );
    Ok(())
}

#[tokio::test]
async fn idle_is_reached_only_after_every_event_finishes() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let handled = Arc::new(AtomicUsize::new(0));

    let h = handled.clone();
    bus.on(move |_: Arc<Step>| {
        let handled = h.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            handled.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    });

    let handles = (0..10)
        .map(|n| bus.dispatch(Step { n }))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(!bus.is_idle());
    assert_eq!(bus.queue_len(), 10);

    bus.wait_until_idle(IDLE).await?;

    assert!(bus.is_idle());
    assert_eq!(handled.load(Ordering::SeqCst), 10);
    for h in &handles {
        assert_eq!(h.status(), EventStatus::Completed);
    }
    Ok(())
}

#[tokio::test]
async fn failing_handler_does_not_stop_siblings_or_other_events() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let log: Log = Arc::default();

    bus.on_sync(|ev: &Step| {
        if ev.n == 1 {
            Err(anyhow!("step {} rejected", ev.n))
        } else {
            Ok(())
        }
    });
    let l = log.clone();
    bus.on_sync(move |ev: &Step| {
        push(&l, format!("second-{}", ev.n));
        Ok(())
    });

    let bad = bus.dispatch(Step { n: 1 })?;
    let good = bus.dispatch(Step { n: 2 })?;
    bus.wait_until_idle(IDLE).await?;

    // 任一处理器失败即整体标记为 Failed
    assert_eq!(bad.status(), EventStatus::Failed);
    assert_eq!(good.status(), EventStatus::Completed);
    assert_eq!(entries(&log), vec!["second-1", "second-2"]);

    let results = bad.handler_results();
    assert_eq!(results.len(), 2);
    assert!(results[0].value.is_err());
    assert!(matches!(results[1].value, Ok(Some(()))));

    match bad.event_result().await {
        Err(BusError::Handler { reason, .. }) => assert!(reason.contains("step 1 rejected")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(good.event_result().await?, Some(()));

    let snapshot = bad.snapshot();
    assert!(snapshot.results[0].error.is_some());
    assert!(snapshot.results[1].error.is_none());
    Ok(())
}

#[tokio::test]
async fn panicking_handler_is_recorded_as_failure() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let reached = Arc::new(AtomicUsize::new(0));

    bus.on(|_: Arc<Step>| async move {
        if true {
            panic!("kaboom");
        }
        anyhow::Ok(())
    });
    let r = reached.clone();
    bus.on_sync(move |_: &Step| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let handle = bus.dispatch(Step { n: 0 })?;
    let err = handle.event_result().await.unwrap_err();

    match err {
        BusError::Handler { reason, .. } => assert!(reason.contains("panicked: kaboom")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(reached.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), EventStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn slow_handler_times_out_without_blocking_the_next_one() -> anyhow::Result<()> {
    let config = EventBusConfig::builder()
        .name("timeouts")
        .handler_timeout(Duration::from_millis(20))
        .build();
    let bus = EventBus::with_config(config);

    bus.on(|_: Arc<Compute>| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::Ok(1)
    });
    bus.on_sync(|ev: &Compute| Ok(ev.value * 2));

    let handle = bus.dispatch(Compute { value: 21 })?;
    handle.wait().await?;

    let results = handle.handler_results();
    assert!(matches!(
        &results[0].value,
        Err(BusError::HandlerTimeout { timeout, .. }) if *timeout == Duration::from_millis(20)
    ));
    assert!(matches!(results[1].value, Ok(Some(42))));
    assert_eq!(handle.status(), EventStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn event_result_is_first_handler_value_and_none_without_handlers() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.on_sync(|ev: &Compute| Ok(ev.value + 1));
    bus.on_sync(|ev: &Compute| Ok(ev.value + 2));

    assert_eq!(bus.dispatch_and_await(Compute { value: 1 }).await?, Some(2));

    let orphan = bus.dispatch(Step { n: 9 })?;
    assert_eq!(orphan.event_result().await?, None);
    assert_eq!(orphan.status(), EventStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn wildcard_handlers_interleave_by_registration_order() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let log: Log = Arc::default();

    let l = log.clone();
    bus.on_sync(move |_: &Step| {
        push(&l, "typed-before");
        Ok(())
    });
    let l = log.clone();
    bus.on_any(move |snap: EventSnapshot| {
        let log = l.clone();
        async move {
            push(&log, format!("any-{}-{}", snap.event_type, snap.payload["n"]));
            anyhow::Ok(())
        }
    });
    let l = log.clone();
    bus.on_sync(move |_: &Step| {
        push(&l, "typed-after");
        Ok(())
    });

    let step = bus.dispatch(Step { n: 3 })?;
    bus.dispatch(Other { n: 4 })?;
    bus.wait_until_idle(IDLE).await?;

    assert_eq!(
        entries(&log),
        vec!["typed-before", "any-Step-3", "typed-after", "any-Other-4"]
    );
    // 通配处理器不参与结果聚合
    assert_eq!(step.handler_results().len(), 3);
    assert_eq!(step.event_result().await?, Some(()));
    Ok(())
}

#[tokio::test]
async fn off_removes_a_registration() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    let id = bus.on_sync(move |_: &Step| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(bus.handler_count(), 1);

    assert!(bus.off(id));
    assert!(!bus.off(id));
    assert_eq!(bus.handler_count(), 0);

    bus.dispatch_and_await(Step { n: 0 }).await?;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

struct Doubler;

#[async_trait]
impl EventHandler<Compute> for Doubler {
    async fn handle(&self, event: &Compute) -> anyhow::Result<u64> {
        Ok(event.value * 2)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trait_handlers_serve_concurrent_dispatchers() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.subscribe::<Compute>(Arc::new(Doubler));

    let mut set = tokio::task::JoinSet::new();
    for value in 0..50_u64 {
        let bus = bus.clone();
        set.spawn(async move { bus.dispatch_and_await(Compute { value }).await });
    }

    let mut results = Vec::new();
    while let Some(res) = set.join_next().await {
        results.push(res??.unwrap());
    }
    results.sort_unstable();
    assert_eq!(results.len(), 50);
    assert_eq!(results[0], 0);
    assert_eq!(results[49], 98);

    let handle = bus.dispatch(Compute { value: 1 })?;
    handle.wait().await?;
    assert!(handle.handler_results()[0].handler_name.contains("Doubler"));
    Ok(())
}
