use evbus::event::Event;
use evbus_macros::event;
use serde::Serialize;

#[event(event_type = "task.process", output = Vec<u32>)]
#[derive(Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ProcessTaskEvent {
    task_id: u32,
}

fn main() {
    assert_eq!(ProcessTaskEvent::EVENT_TYPE, "task.process");

    let ev = ProcessTaskEvent { task_id: 7 };
    assert_eq!(ev.clone(), ev);
    assert!(format!("{ev:?}").contains("task_id: 7"));
}
