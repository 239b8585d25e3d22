use std::io::{ErrorKind, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jsonrelay_frame::FrameReader;
use jsonrelay_ports::{MemoryDriver, PairConfigStore, PairProvisioner, PortPair};
use jsonrelay_relay::{
    ConnectionState, EngineConfig, EngineHealth, FaultPolicy, RelayEngine, RelayError,
    SupervisorConfig,
};
use jsonrelay_transport::{MemoryBus, PortIdentifier, SerialLink, SerialOpener, SerialSettings};

fn fast_config() -> EngineConfig {
    EngineConfig {
        supervisor: SupervisorConfig {
            fault: FaultPolicy {
                min_window: Duration::ZERO,
                pause: Duration::from_millis(1),
                permission_pause: Duration::from_millis(1),
                ..FaultPolicy::default()
            },
            restart_delay: Duration::from_millis(10),
            ..SupervisorConfig::default()
        },
        settle: Duration::from_millis(20),
        reconnect_attempts: 3,
        retry_delay: Duration::from_millis(20),
    }
}

/// Relay endpoints COM20/COM21, each cross-wired to a client port.
struct Bench {
    bus: MemoryBus,
    engine: RelayEngine,
    pair: PortPair,
}

impl Bench {
    fn new() -> Self {
        let bus = MemoryBus::new();
        bus.add_pair(&"COM1".into(), &"COM20".into()).unwrap();
        bus.add_pair(&"COM21".into(), &"COM2".into()).unwrap();
        let engine = RelayEngine::with_config(Arc::new(bus.clone()), fast_config());
        Self {
            bus,
            engine,
            pair: PortPair::new("COM20", "COM21"),
        }
    }

    fn client(&self, port: &str) -> Box<dyn SerialLink> {
        self.bus
            .open(&PortIdentifier::new(port), &SerialSettings::default())
            .unwrap()
    }
}

fn read_frames(link: Box<dyn SerialLink>, count: usize) -> Vec<Vec<u8>> {
    let mut reader = FrameReader::new(link);
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut frames = Vec::new();
    while frames.len() < count && Instant::now() < deadline {
        match reader.read_frame() {
            Ok(frame) => frames.push(frame.as_bytes().to_vec()),
            Err(err) if err.is_timeout() => continue,
            Err(err) => panic!("read failed: {err}"),
        }
    }
    frames
}

fn wait_for(what: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if what() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn frames_cross_in_both_directions() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();

    let mut left = bench.client("COM1");
    let mut right = bench.client("COM2");
    left.write_all(br#"{"to":"right"}"#).unwrap();
    right.write_all(br#"noise{"to":"left","n":{"deep":true}}"#).unwrap();

    assert_eq!(read_frames(right, 1), vec![br#"{"to":"right"}"#.to_vec()]);
    assert_eq!(
        read_frames(left, 1),
        vec![br#"{"to":"left","n":{"deep":true}}"#.to_vec()]
    );

    let status = bench.engine.status();
    assert_eq!(status.health, EngineHealth::Running);
    assert_eq!(status.input.unwrap().frames, 1);
    assert_eq!(status.output.unwrap().frames, 1);
    bench.engine.stop();
}

#[test]
fn order_is_preserved_within_a_direction() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();

    let mut left = bench.client("COM1");
    let right = bench.client("COM2");
    let expected: Vec<Vec<u8>> = (0..200)
        .map(|i| format!(r#"{{"seq":{i}}}"#).into_bytes())
        .collect();
    for chunk in expected.concat().chunks(7) {
        left.write_all(chunk).unwrap();
    }

    assert_eq!(read_frames(right, expected.len()), expected);
    bench.engine.stop();
}

#[test]
fn fault_threshold_triggers_one_full_reconnect() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();
    bench
        .bus
        .inject_read_faults(&"COM20".into(), ErrorKind::Other, 10);

    assert!(wait_for(|| bench.engine.status().reconnects == 1));
    assert!(wait_for(|| bench.engine.health() == EngineHealth::Running));
    let status = bench.engine.status();
    assert_eq!(status.reconnects, 1);
    assert_eq!(status.input.unwrap().state, ConnectionState::Open);

    let mut left = bench.client("COM1");
    left.write_all(br#"{"after":"reconnect"}"#).unwrap();
    assert_eq!(
        read_frames(bench.client("COM2"), 1),
        vec![br#"{"after":"reconnect"}"#.to_vec()]
    );
    bench.engine.stop();
}

#[test]
fn nine_faults_do_not_reconnect() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();
    bench
        .bus
        .inject_read_faults(&"COM21".into(), ErrorKind::Other, 9);

    thread::sleep(Duration::from_millis(300));
    let status = bench.engine.status();
    assert_eq!(status.reconnects, 0);
    assert_eq!(status.health, EngineHealth::Running);
    assert_eq!(status.output.unwrap().state, ConnectionState::Open);
    bench.engine.stop();
}

#[test]
fn exhausted_reconnect_stays_failed_until_requested() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();

    let port = PortIdentifier::new("COM20");
    bench
        .bus
        .inject_open_faults(&port, ErrorKind::PermissionDenied, 3);
    bench.bus.inject_read_faults(&port, ErrorKind::Other, 10);

    assert!(wait_for(
        || bench.engine.health() == EngineHealth::ReconnectFailed
    ));
    thread::sleep(Duration::from_millis(100));
    let status = bench.engine.status();
    assert_eq!(status.health, EngineHealth::ReconnectFailed);
    assert_eq!(status.reconnects, 1);
    assert!(!bench.bus.is_open(&port));
    assert!(!bench.bus.is_open(&"COM21".into()));

    bench.engine.reconnect().unwrap();
    assert!(wait_for(|| bench.engine.health() == EngineHealth::Running));
    assert_eq!(bench.engine.status().reconnects, 2);
    bench.engine.stop();
}

#[test]
fn stop_releases_ports_and_is_idempotent() {
    let bench = Bench::new();
    bench.engine.start(bench.pair.clone()).unwrap();
    assert!(matches!(
        bench.engine.start(bench.pair.clone()),
        Err(RelayError::AlreadyRunning)
    ));

    bench.engine.stop();
    bench.engine.stop();
    assert_eq!(bench.engine.health(), EngineHealth::Stopped);
    assert!(!bench.bus.is_open(&"COM20".into()));
    assert!(!bench.bus.is_open(&"COM21".into()));
    assert!(matches!(
        bench.engine.reconnect(),
        Err(RelayError::NotRunning)
    ));
}

#[test]
fn busy_port_fails_start_and_releases_the_other() {
    let bench = Bench::new();
    let _held = bench.client("COM21");

    let err = bench.engine.start(bench.pair.clone()).unwrap_err();
    assert!(matches!(err, RelayError::Open { .. }));
    assert!(!bench.bus.is_open(&"COM20".into()));
    assert_eq!(bench.engine.health(), EngineHealth::Idle);
}

#[test]
fn provisioned_start_orients_and_persists_pair() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryBus::new();
    let driver = Arc::new(MemoryDriver::new(bus.clone()));
    driver.mark_busy((1..=19).map(|n| format!("COM{n}")));
    let store = PairConfigStore::new(dir.path().join("com_ports_config.json"));

    let engine = RelayEngine::with_config(Arc::new(bus.clone()), fast_config())
        .with_provisioner(PairProvisioner::new(driver, store.clone()));

    let pair = engine.start_provisioned().unwrap();
    assert_eq!(pair, PortPair::new("COM21", "COM20"));
    assert_eq!(store.load().unwrap().pair, PortPair::new("COM20", "COM21"));
    assert_eq!(engine.health(), EngineHealth::Running);

    let next = engine.reconfigure().unwrap();
    assert_eq!(next, PortPair::new("COM23", "COM22"));
    assert_eq!(store.load().unwrap().pair, PortPair::new("COM22", "COM23"));
    engine.stop();
}

#[test]
fn provisioned_start_skips_pair_held_elsewhere() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryBus::new();
    let driver = Arc::new(MemoryDriver::new(bus.clone()));
    let store = PairConfigStore::new(dir.path().join("com_ports_config.json"));
    let provisioner = PairProvisioner::new(driver, store.clone());
    let stale = provisioner.get_or_create().unwrap().pair;
    assert_eq!(stale, PortPair::new("COM1", "COM2"));

    let _held = bus.open(&"COM2".into(), &SerialSettings::default()).unwrap();
    let engine = RelayEngine::with_config(Arc::new(bus.clone()), fast_config()).with_provisioner(
        provisioner
            .with_link_check(Arc::new(bus.clone()))
            .with_link_check_timeout(Duration::from_millis(500)),
    );

    let pair = engine.start_provisioned().unwrap();
    assert_eq!(pair, PortPair::new("COM4", "COM3"));
    assert_eq!(store.load().unwrap().pair, PortPair::new("COM3", "COM4"));
    assert_eq!(engine.health(), EngineHealth::Running);
    engine.stop();
}

#[test]
fn start_provisioned_needs_provisioner() {
    let engine = RelayEngine::new(Arc::new(MemoryBus::new()));
    assert!(matches!(
        engine.start_provisioned(),
        Err(RelayError::NoProvisioner)
    ));
}
