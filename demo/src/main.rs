use evbus::{EventBus, EventBusConfig, StopOutcome};
use evbus_macros::event;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[event(output = String)]
struct MainEvent {
    message: String,
}

#[event(output = String)]
struct SomeOtherEvent {
    extra_data: String,
}

#[event(event_type = "task.process")]
struct ProcessTaskEvent {
    task_id: u32,
}

#[event]
struct StopBusEvent;

/// 处理器内部派发并等待子事件：子事件越过队列立即执行
async fn nested_await() -> anyhow::Result<()> {
    let bus = EventBus::new();

    let b = bus.clone();
    bus.on(move |ev: Arc<MainEvent>| {
        let bus = b.clone();
        async move {
            println!("main handler: {}", ev.message);
            let child = bus.dispatch(SomeOtherEvent {
                extra_data: "payload".into(),
            })?;
            let result = child.await?.unwrap_or_default();
            println!("child event returned: {result}");
            anyhow::Ok(format!("result from awaiting child event: {result}"))
        }
    });
    bus.on(|ev: Arc<SomeOtherEvent>| async move {
        println!("other handler: {}", ev.extra_data);
        tokio::time::sleep(Duration::from_millis(100)).await;
        anyhow::Ok(String::from("xzy123"))
    });

    let result = bus
        .dispatch(MainEvent {
            message: "hello".into(),
        })?
        .await?;
    println!("main event result: {result:?}");

    bus.wait_until_idle(Some(Duration::from_secs(5))).await?;
    for snapshot in bus.history() {
        println!(
            "  {} {} parent={:?} status={:?}",
            snapshot.id, snapshot.event_type, snapshot.parent_id, snapshot.status
        );
    }
    Ok(())
}

/// 由处理器停止总线：已派发的任务先处理完，停止事件之后的排队事件被取消
async fn stop_from_handler() -> anyhow::Result<()> {
    let config = EventBusConfig::builder().name("tasks").build();
    let bus = EventBus::with_config(config);

    for task_id in 0..10 {
        bus.dispatch(ProcessTaskEvent { task_id })?;
    }
    bus.dispatch(StopBusEvent)?;
    let late = bus.dispatch(ProcessTaskEvent { task_id: 99 })?;

    bus.on_sync(|ev: &ProcessTaskEvent| {
        println!("processing task {}", ev.task_id);
        Ok(())
    });
    let b = bus.clone();
    bus.on(move |_: Arc<StopBusEvent>| {
        let bus = b.clone();
        async move {
            let outcome = bus.stop(true, Some(Duration::from_secs(3))).await;
            println!("stop requested from handler: {outcome:?}");
            anyhow::Ok(())
        }
    });

    bus.wait_until_idle(Some(Duration::from_secs(5))).await?;
    info!(status = ?bus.status(), late = ?late.status(), "tasks bus drained");

    let outcome = bus.stop(false, None).await;
    assert_eq!(outcome, StopOutcome::AlreadyStopped);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "evbus=info,demo=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("== nested await ==");
    nested_await().await?;

    println!("== stop from handler ==");
    stop_from_handler().await?;
    Ok(())
}
