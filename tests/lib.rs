use std::thread;
use std::time::Duration;
use tally::prelude::*;
use tally::test::{FailingConnector, SpyConnector};
use tally::{Configuration, ConnectionState, StatsdClient, Tags, MAX_CONNECT_ATTEMPTS};

mod utils;
use utils::{collect, count_by_type, run_arc_threaded_test};

fn config() -> Configuration {
    Configuration::new("127.0.0.1", 8125).with_idle_interval(Duration::from_millis(10))
}

fn to_strings(payloads: Vec<Vec<u8>>) -> Vec<String> {
    payloads.into_iter().map(|p| String::from_utf8(p).unwrap()).collect()
}

#[test]
fn test_statsd_client_spy_single_threaded() {
    let (rx, connector) = SpyConnector::new();
    let client = StatsdClient::builder(config()).with_connector(connector).build();

    run_arc_threaded_test(client, 1, 1);
    let counts = count_by_type(to_strings(collect(&rx, 4)));

    assert_eq!(4, counts.len());
    assert!(counts.values().all(|&n| n == 1));
}

#[test]
fn test_statsd_client_spy_multi_threaded() {
    let (rx, connector) = SpyConnector::new();
    let client = StatsdClient::builder(config()).with_connector(connector).build();

    run_arc_threaded_test(client, 10, 20);
    let counts = count_by_type(to_strings(collect(&rx, 800)));

    assert_eq!(Some(&200), counts.get("c"));
    assert_eq!(Some(&200), counts.get("c@"));
    assert_eq!(Some(&200), counts.get("ms"));
    assert_eq!(Some(&200), counts.get("g"));
}

#[test]
fn test_statsd_client_failing_connector_queues_everything() {
    let connector = FailingConnector::new();
    let connects = connector.connects();
    let client = StatsdClient::builder(config()).with_connector(connector).build();

    let client = run_arc_threaded_test(client, 4, 5);

    // Built without a connection, so nothing ever tried to send
    assert_eq!(80, client.queued());
    assert_eq!(1, connects.get());
    assert!(!client.is_running());
}

#[test]
fn test_statsd_client_survives_connection_outage() {
    let (rx, connector) = SpyConnector::new();
    let reachable = connector.reachable();
    let failing_sends = connector.failing_sends();
    let client = StatsdClient::builder(config()).with_connector(connector).build();

    client.increment_counter("app", "up", &Tags::new(), 1);
    assert_eq!(vec!["app.up:1|c"], to_strings(collect(&rx, 1)));

    // The server goes away: the next send fails and every reconnect after
    // it fails until the connection gives up.
    reachable.set(false);
    failing_sends.set(true);
    client.increment_counter("app", "lost", &Tags::new(), 1);
    thread::sleep(Duration::from_millis(50));
    failing_sends.set(false);

    client.increment_counter("app", "waiting", &Tags::new(), 1);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(1, client.queued());
    assert!(!client.is_connected());

    // Restarting makes one last attempt on the old connection, which has
    // given up, so the waiting metric is dropped.
    reachable.set(true);
    client.restart();
    assert_eq!(0, client.queued());
    assert!(client.is_connected());

    client.increment_counter("app", "back", &Tags::new(), 1);
    assert_eq!(vec!["app.back:1|c"], to_strings(collect(&rx, 1)));
}

#[test]
fn test_statsd_client_recovers_when_configured() {
    let (rx, connector) = SpyConnector::new();
    let reachable = connector.reachable();
    let failing_sends = connector.failing_sends();
    let client = StatsdClient::builder(config().with_recovery(Duration::from_millis(20)))
        .with_connector(connector)
        .build();

    reachable.set(false);
    failing_sends.set(true);
    client.increment_counter("app", "lost", &Tags::new(), 1);
    thread::sleep(Duration::from_millis(50));
    failing_sends.set(false);

    client.increment_counter("app", "recovered", &Tags::new(), 1);
    thread::sleep(Duration::from_millis(100));
    assert!(!client.is_connected());
    assert_eq!(1, client.queued());

    // No restart, the connection comes back on its own
    reachable.set(true);
    assert_eq!(vec!["app.recovered:1|c"], to_strings(collect(&rx, 1)));
}

#[test]
fn test_connection_exhausted_after_max_attempts() {
    let connector = FailingConnector::new();
    let connects = connector.connects();
    let connection = tally::Connection::new(config().endpoint().clone(), connector);

    for _ in 0..(MAX_CONNECT_ATTEMPTS * 2) {
        let _ = connection.connect();
    }

    assert_eq!(ConnectionState::Exhausted, connection.state());
    assert_eq!(MAX_CONNECT_ATTEMPTS as usize, connects.get());
}
