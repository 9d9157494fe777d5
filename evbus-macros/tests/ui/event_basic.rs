use evbus::event::Event;
use evbus_macros::event;

#[event]
struct MainEvent;

#[event(output = String)]
struct SomeOtherEvent {
    label: String,
}

fn main() {
    assert_eq!(MainEvent::EVENT_TYPE, "MainEvent");
    assert_eq!(SomeOtherEvent::EVENT_TYPE, "SomeOtherEvent");

    let ev = SomeOtherEvent {
        label: "child".into(),
    };
    let cloned = ev.clone();
    assert_eq!(cloned.label, "child");
    let _: Option<<SomeOtherEvent as Event>::Output> = None::<String>;
}
