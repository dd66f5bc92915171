//! End-to-end tests: emitter -> socket -> receiver -> queue -> consumer.

use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use netlat::client::Client;
use netlat::net::Endpoint;
use netlat::sample::SampleSink;
use netlat::server::{Server, ServerConfig};
use netlat::thread::SchedulingRegistry;

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(netlat::init_tracing);
}

/// Sink that collects formatted lines for assertions.
struct VecSink(Arc<Mutex<Vec<String>>>);

impl SampleSink for VecSink {
    fn emit(&mut self, line: &str) {
        self.0.lock().expect("sink lock").push(line.to_owned());
    }
}

fn registry() -> Arc<SchedulingRegistry> {
    Arc::new(SchedulingRegistry::new())
}

/// Extracts the trailing `NSent:` counter from a formatted sample line.
fn sent_counter(line: &str) -> u64 {
    let idx = line.rfind("NSent:").expect("line has NSent field");
    line[idx + "NSent:".len()..]
        .trim()
        .parse()
        .expect("NSent field parses")
}

#[test]
fn stopping_a_blocked_receiver_is_bounded() {
    init_test_tracing();
    let registry = registry();
    let mut server = Server::bind(
        Endpoint::localhost(0),
        ServerConfig {
            priority: 0,
            recv_buffer_size: Some(256 * 1024),
        },
        &registry,
    )
    .expect("bind server");
    server.start().expect("start server");

    // Let the receive thread park in recv_from with no traffic arriving.
    std::thread::sleep(Duration::from_millis(100));
    assert!(server.is_running().expect("probe"));

    let start = Instant::now();
    server.stop().expect("stop server");
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "stop hung on a blocked receive"
    );
}

#[test]
fn three_probes_arrive_in_order_with_nonnegative_latency() {
    init_test_tracing();
    let registry = registry();
    let lines = Arc::new(Mutex::new(Vec::new()));

    let mut server = Server::bind_with_sink(
        Endpoint::localhost(0),
        ServerConfig::default(),
        &registry,
        Some(Box::new(VecSink(Arc::clone(&lines)))),
    )
    .expect("bind server");
    server.start().expect("start server");
    let target = server.local_endpoint().expect("server endpoint");

    let mut client =
        Client::new(target, Duration::from_millis(50), 0, &registry).expect("create client");
    client.start().expect("start client");

    // Wait for at least three formatted lines.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if lines.lock().expect("sink lock").len() >= 3 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "consumer produced {} lines within the deadline",
            lines.lock().expect("sink lock").len()
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    client.stop().expect("stop client");
    server.stop().expect("stop server");

    let lines = lines.lock().expect("sink lock");
    for (i, line) in lines.iter().take(3).enumerate() {
        assert_eq!(
            sent_counter(line),
            i as u64 + 1,
            "out-of-order line {i}: {line}"
        );
        assert!(
            !line.contains("Lat: -"),
            "negative latency on a local run: {line}"
        );
        assert!(line.contains(&format!("::({})", target.port())), "line: {line}");
    }
}

#[test]
fn stop_is_idempotent_per_benchmark_leg() {
    init_test_tracing();
    let registry = registry();
    let mut server = Server::bind(
        Endpoint::localhost(0),
        ServerConfig::default(),
        &registry,
    )
    .expect("bind server");
    server.start().expect("start server");
    server.stop().expect("first stop");

    // A second stop finds a zombie receive handle and reports it rather
    // than hanging or corrupting state.
    assert!(server.stop().is_err());
}
