use evbus::event::Event;
use evbus_macros::event;

#[event(event_type = "browser.navigation", output = bool)]
enum NavigationEvent {
    Started { url: String },
    Finished { url: String, status: u16 },
}

fn main() {
    assert_eq!(NavigationEvent::EVENT_TYPE, "browser.navigation");

    let ev = NavigationEvent::Finished {
        url: "https://example.com".into(),
        status: 200,
    };
    match ev.clone() {
        NavigationEvent::Finished { status, .. } => assert_eq!(status, 200),
        NavigationEvent::Started { .. } => unreachable!(),
    }
    let _ = NavigationEvent::Started { url: String::new() };
}
