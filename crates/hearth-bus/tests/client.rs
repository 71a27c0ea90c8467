use std::time::Duration;

use hearth_bus::{BusClient, BusError, BusTransport, MemoryTransport, SessionOptions, SessionState};
use hearth_sched::ExponentialBackoff;

type Log = Vec<(String, String)>;

fn options() -> SessionOptions {
    SessionOptions {
        client_id: "node-office".to_owned(),
        host: "broker.local".to_owned(),
        port: 1883,
        keepalive_secs: 60,
        username: None,
        password: None,
        will: None,
    }
}

fn fast_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(4), 2.0, 0.0)
}

fn client(transport: &MemoryTransport) -> BusClient<Log> {
    BusClient::new(
        Box::new(transport.clone()),
        options(),
        "home/office/node/status",
        fast_backoff(),
    )
}

#[test]
fn connect_sets_will_and_announces_presence() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    bus.connect().unwrap();

    assert!(bus.is_connected());
    assert_eq!(bus.state(), SessionState::Connected);

    let opts = transport.last_options().unwrap();
    let will = opts.will.unwrap();
    assert_eq!(will.topic, "home/office/node/status");
    assert_eq!(will.payload, b"offline");
    assert!(will.retain);

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "home/office/node/status");
    assert_eq!(published[0].payload, b"online");
    assert!(published[0].retain);
}

#[test]
fn connect_is_idempotent() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    bus.connect().unwrap();
    bus.connect().unwrap();

    assert_eq!(transport.open_count(), 1);
    assert_eq!(transport.published().len(), 1);
}

#[test]
fn subscriptions_recorded_offline_are_replayed_on_every_connect() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    // Registered before any session exists.
    bus.subscribe("home/office/node/command", |_, _, _: &mut Log| Ok(()))
        .unwrap();
    bus.subscribe("home/office/node/config", |_, _, _: &mut Log| Ok(()))
        .unwrap();

    bus.connect().unwrap();
    assert_eq!(
        transport.subscriptions(),
        vec!["home/office/node/command", "home/office/node/config"]
    );

    // Broker restart wipes server-side state; reconnect must replay.
    transport.drop_session();
    assert!(!bus.is_connected());
    bus.reconnect().unwrap();
    assert_eq!(
        transport.subscriptions(),
        vec!["home/office/node/command", "home/office/node/config"]
    );
}

#[test]
fn publish_while_disconnected_is_an_error() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    let err = bus.publish("home/office/node/state", b"{}", false).unwrap_err();
    assert!(matches!(err, BusError::NotConnected));
}

#[test]
fn publish_failure_drops_the_session() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    bus.connect().unwrap();

    transport.set_fail_publishes(true);
    let err = bus.publish("home/office/node/state", b"{}", false).unwrap_err();

    assert!(matches!(err, BusError::Transport(_)));
    assert_eq!(bus.state(), SessionState::Disconnected);
    assert!(!transport.is_open());
}

#[test]
fn messages_dispatch_to_matching_handlers() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    bus.subscribe("home/+/node/command", |topic, payload, log: &mut Log| {
        log.push((topic.to_owned(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    })
    .unwrap();
    bus.set_catch_all(|topic, _, log: &mut Log| {
        log.push(("catch-all".to_owned(), topic.to_owned()));
        Ok(())
    });
    bus.connect().unwrap();

    transport.push_inbound("home/office/node/command", b"restart");
    transport.push_inbound("home/kitchen/node/command", b"status");
    transport.push_inbound("unrelated/topic", b"x");

    let mut log = Log::new();
    let processed = bus.check_msg(&mut log).unwrap();

    // The catch-all sees every message, after any matching handlers.
    assert_eq!(processed, 3);
    assert_eq!(
        log,
        vec![
            ("home/office/node/command".to_owned(), "restart".to_owned()),
            ("catch-all".to_owned(), "home/office/node/command".to_owned()),
            ("home/kitchen/node/command".to_owned(), "status".to_owned()),
            ("catch-all".to_owned(), "home/kitchen/node/command".to_owned()),
            ("catch-all".to_owned(), "unrelated/topic".to_owned()),
        ]
    );
}

#[test]
fn catch_all_runs_even_when_a_filter_matched() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);

    bus.subscribe("home/+/command", |_, _, log: &mut Log| {
        log.push(("matched".to_owned(), String::new()));
        Ok(())
    })
    .unwrap();
    bus.set_catch_all(|_, _, log: &mut Log| {
        log.push(("catch-all".to_owned(), String::new()));
        Ok(())
    });
    bus.connect().unwrap();

    transport.push_inbound("home/office/command", b"restart");
    let mut log = Log::new();
    bus.check_msg(&mut log).unwrap();

    let order: Vec<&str> = log.iter().map(|(tag, _)| tag.as_str()).collect();
    assert_eq!(order, vec!["matched", "catch-all"]);
}

#[test]
fn handler_error_does_not_drop_the_session() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    bus.subscribe("home/#", |_, _, _: &mut Log| {
        Err(BusError::Handler("bad payload".to_owned()))
    })
    .unwrap();
    bus.connect().unwrap();

    transport.push_inbound("home/office/node/command", b"???");
    let processed = bus.check_msg(&mut Log::new()).unwrap();

    assert_eq!(processed, 1);
    assert!(bus.is_connected());
}

#[test]
fn receive_error_drops_the_session() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    bus.connect().unwrap();

    transport.set_fail_receives(true);
    let err = bus.check_msg(&mut Log::new()).unwrap_err();

    assert!(matches!(err, BusError::Transport(_)));
    assert_eq!(bus.state(), SessionState::Disconnected);
}

#[test]
fn check_msg_while_disconnected_is_a_quiet_no_op() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    transport.push_inbound("home/office/node/command", b"restart");

    assert_eq!(bus.check_msg(&mut Log::new()).unwrap(), 0);
}

#[test]
fn reconnect_keeps_backing_off_until_the_broker_returns() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    transport.fail_next_opens(2);

    assert!(bus.reconnect().is_err());
    assert_eq!(bus.state(), SessionState::Disconnected);
    assert!(bus.reconnect().is_err());
    bus.reconnect().unwrap();

    assert!(bus.is_connected());
    assert_eq!(transport.open_count(), 1);
}

#[test]
fn disconnect_publishes_clean_offline() {
    let transport = MemoryTransport::new();
    let mut bus = client(&transport);
    bus.connect().unwrap();
    transport.clear_published();

    bus.disconnect();

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, b"offline");
    assert!(published[0].retain);
    assert_eq!(bus.state(), SessionState::Disconnected);
}
