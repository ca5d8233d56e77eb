// Test-only host and controller devices for end-to-end sync tests.
//
// Wraps the real `HostSync` and `ControllerSync` (from `dune_timer_sync`)
// with `ManualClock`s and a `MemoryStore` to give a synchronous,
// test-friendly API for exercising the whole path:
// host action → snapshot → relay → controller view, and
// controller command → relay → host timer → snapshot → controller view.
//
// The only test-specific code here is the blocking polling wrappers (loops
// around `pump()` with a timeout). Networking, persistence and the timer
// itself use the same code paths as a real device.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dune_timer_core::{ManualClock, MemoryStore, TimerAction, TimerConfig, TimerEvent, TurnTimer};
use dune_timer_protocol::{Millis, Role, RoomCode, Snapshot};
use dune_timer_relay::{ClientConfig, ConnectionState};
use dune_timer_sync::{ControllerSync, HostSync};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wall-clock instant both test clocks start from.
pub const START_MS: Millis = 1_700_000_000_000;

fn client_config(addr: SocketAddr, code: &str, role: Role) -> ClientConfig {
    let mut config = ClientConfig::new(
        addr.to_string(),
        RoomCode::parse(code).expect("bad test room code"),
        role,
    );
    config.connect_timeout = Duration::from_secs(1);
    config
}

/// A host device: real `HostSync`, manual clock, in-memory store.
pub struct TestHost {
    pub sync: HostSync,
    pub clock: ManualClock,
}

impl TestHost {
    /// Connect to the relay and wait until the link is up and the
    /// connect-time broadcast has gone out.
    pub fn connect(addr: SocketAddr, code: &str) -> Self {
        let clock = ManualClock::new(START_MS);
        let timer = TurnTimer::new(TimerConfig::default(), Arc::new(clock.clone()));
        let sync = HostSync::open(
            timer,
            client_config(addr, code, Role::Host),
            Box::new(MemoryStore::new()),
        );
        assert!(
            sync.connection()
                .wait_for_state(ConnectionState::Connected, POLL_TIMEOUT),
            "host never connected"
        );
        let mut host = Self { sync, clock };
        host.sync.pump();
        host
    }

    pub fn act(&mut self, action: TimerAction) -> Vec<TimerEvent> {
        self.sync.handle(action)
    }

    /// Pump repeatedly for `window`, collecting every event.
    pub fn pump_for(&mut self, window: Duration) -> Vec<TimerEvent> {
        let start = Instant::now();
        let mut events = Vec::new();
        while start.elapsed() < window {
            events.extend(self.sync.pump());
            thread::sleep(POLL_INTERVAL);
        }
        events
    }

    /// Blocking pump until `done` holds for the host.
    pub fn pump_until(&mut self, what: &str, done: impl Fn(&HostSync) -> bool) {
        let start = Instant::now();
        loop {
            self.sync.pump();
            if done(&self.sync) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for host: {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// A controller device: real `ControllerSync` with its own manual clock.
pub struct TestController {
    pub sync: ControllerSync,
    pub clock: ManualClock,
}

impl TestController {
    /// Connect to the relay and wait until the link is up. The state
    /// request greeting is on its way once this returns.
    pub fn connect(addr: SocketAddr, code: &str) -> Self {
        let clock = ManualClock::new(START_MS);
        let sync = ControllerSync::new(
            client_config(addr, code, Role::Controller),
            Arc::new(clock.clone()),
        );
        assert!(
            sync.connection()
                .wait_for_state(ConnectionState::Connected, POLL_TIMEOUT),
            "controller never connected"
        );
        Self { sync, clock }
    }

    /// Blocking poll until the view satisfies `done`. Returns that view.
    pub fn poll_until_view(&mut self, what: &str, done: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let start = Instant::now();
        loop {
            self.sync.pump();
            if let Some(view) = self.sync.view().filter(|v| done(*v)) {
                return view.clone();
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for controller view: {what}"
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Pump `host` and this controller in turn until the view satisfies
    /// `done`. Lets one test thread play both devices.
    pub fn sync_with(
        &mut self,
        host: &mut TestHost,
        what: &str,
        done: impl Fn(&Snapshot) -> bool,
    ) -> Snapshot {
        let start = Instant::now();
        loop {
            host.sync.pump();
            self.sync.pump();
            if let Some(view) = self.sync.view().filter(|v| done(*v)) {
                return view.clone();
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out syncing controller: {what}"
            );
            thread::sleep(POLL_INTERVAL);
        }
    }
}
