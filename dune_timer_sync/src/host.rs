// Host side of the sync protocol.
//
// `HostSync` owns the authoritative `TurnTimer`, the host's `RelayConnection`
// and the client-local store. It is the only place mutations happen: local
// UI actions come in through `handle`, controller commands through the
// relay subscription, countdown ticks through `TurnTimer::poll`. After every
// mutation that changed something it saves the state and broadcasts a fresh
// snapshot. Broadcasts are fire-and-forget; a broadcast made while the link
// is down is simply lost, and the next mutation (or the rebroadcast on
// reconnect) brings controllers up to date.
//
// Snapshots are sent when:
// - an action produced events (no-ops are not broadcast);
// - a controller sends `host:requestState`;
// - the link (re)connects, so controllers already in the room catch up.
// Countdown ticks are saved but not broadcast; controllers extrapolate.
//
// Two ways to drive it:
// - call `pump` yourself (tests, embedding in another loop);
// - `spawn` it onto its own thread and talk to it through `HostHandle`. The
//   thread waits on its inbox with `recv_timeout` until the next tick is
//   due, the same timer-without-a-timer-thread loop the relay uses.
//
// See also: `controller.rs` for the receiving end, `dune_timer_core::timer`
// for the state machine, `dune_timer_relay::client` for the connection.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dune_timer_core::store::{TIMER_STATE_KEY, load_state, save_state};
use dune_timer_core::{KeyValueStore, StoreError, TimerAction, TimerEvent, TimerState, TurnTimer};
use dune_timer_protocol::{Command, Envelope, EventKind, Role, RoomCode};
use dune_timer_relay::{ClientConfig, ConnectionState, RelayConnection, Subscription};
use log::{debug, info, warn};

/// Longest the host loop sleeps before checking the relay for controller
/// messages.
const REMOTE_POLL: Duration = Duration::from_millis(50);

/// Messages the host reacts to. Everything else in the room is controller
/// chatter it does not need.
const HOST_EVENTS: [EventKind; 4] = [
    EventKind::RequestState,
    EventKind::NextTurn,
    EventKind::PauseResume,
    EventKind::RevealTurn,
];

/// The action a controller command stands for.
pub fn command_action(command: Command) -> TimerAction {
    match command {
        Command::NextTurn => TimerAction::NextTurn,
        Command::PauseResume => TimerAction::StartPauseResume,
        Command::RevealTurn => TimerAction::StartReveal,
    }
}

pub struct HostSync {
    timer: TurnTimer,
    link: RelayConnection,
    inbound: Subscription,
    store: Box<dyn KeyValueStore>,
    /// Set by the first mutation; hydration is refused afterwards.
    mutated: bool,
    /// `connect_count` at the last rebroadcast.
    seen_connects: u64,
}

impl HostSync {
    /// Wire a timer to a relay room. The connection is not started until
    /// `start()`; the role in `client` is forced to host.
    pub fn new(timer: TurnTimer, mut client: ClientConfig, store: Box<dyn KeyValueStore>) -> Self {
        client.role = Role::Host;
        let link = RelayConnection::new(client);
        // Subscribe before the link starts so nothing sent right after the
        // join is missed.
        let inbound = link.subscribe(&HOST_EVENTS);
        Self {
            timer,
            link,
            inbound,
            store,
            mutated: false,
            seen_connects: 0,
        }
    }

    /// `new` followed by `start`.
    pub fn open(timer: TurnTimer, client: ClientConfig, store: Box<dyn KeyValueStore>) -> Self {
        let mut host = Self::new(timer, client, store);
        host.start();
        host
    }

    /// Start connecting to the relay.
    pub fn start(&mut self) {
        info!("hosting room {}", self.link.room_code());
        self.link.start();
    }

    pub fn timer(&self) -> &TurnTimer {
        &self.timer
    }

    pub fn room_code(&self) -> &RoomCode {
        self.link.room_code()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn connection(&self) -> &RelayConnection {
        &self.link
    }

    /// Replace the in-memory defaults with the stored state. Allowed once,
    /// before any mutation; returns whether a state was restored. A stored
    /// state that no longer parses is discarded rather than reported.
    pub fn hydrate(&mut self) -> Result<bool, StoreError> {
        if self.mutated {
            debug!("not hydrating: the timer has already changed");
            return Ok(false);
        }
        let state = match load_state(self.store.as_ref()) {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(false),
            Err(StoreError::Json(e)) => {
                warn!("discarding unreadable stored timer state: {e}");
                self.store.remove(TIMER_STATE_KEY)?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if state.players.is_empty() {
            warn!("ignoring stored timer state with no players");
            return Ok(false);
        }
        info!(
            "restored timer state: round {}, {} players",
            state.current_round,
            state.players.len()
        );
        self.timer.restore(state);
        self.mutated = true;
        self.broadcast();
        Ok(true)
    }

    /// Apply a local action. Saves and broadcasts if it changed anything.
    /// Countdown ticks already due are applied first, so they are charged to
    /// the player whose turn it was.
    pub fn handle(&mut self, action: TimerAction) -> Vec<TimerEvent> {
        let mut events = self.catch_up();
        let changes = self.timer.apply(action);
        if !changes.is_empty() {
            self.mutated = true;
            self.persist();
            self.broadcast();
        }
        events.extend(changes);
        events
    }

    /// Apply a controller command exactly as the matching local action.
    pub fn handle_command(&mut self, command: Command) -> Vec<TimerEvent> {
        debug!("controller command {}", command.event());
        self.handle(command_action(command))
    }

    /// Send the current snapshot to the room. `false` if it was dropped.
    pub fn broadcast(&self) -> bool {
        match Envelope::host_state(self.link.room_code(), &self.timer.snapshot()) {
            Ok(envelope) => self.link.send(&envelope),
            Err(e) => {
                warn!("could not encode host state: {e}");
                false
            }
        }
    }

    /// One round of housekeeping: rebroadcast after a (re)connect, answer
    /// state requests, apply controller commands and due countdown ticks.
    /// Returns the events produced.
    pub fn pump(&mut self) -> Vec<TimerEvent> {
        let mut events = self.catch_up();

        let connects = self.link.connect_count();
        if connects > self.seen_connects {
            self.seen_connects = connects;
            self.broadcast();
        }

        for envelope in self.inbound.drain() {
            match envelope.event {
                EventKind::RequestState => {
                    debug!("state requested");
                    self.broadcast();
                }
                kind => match Command::from_event(kind) {
                    Some(command) => events.extend(self.handle_command(command)),
                    None => debug!("ignoring {kind}"),
                },
            }
        }
        events
    }

    /// Apply due countdown ticks and save the result.
    fn catch_up(&mut self) -> Vec<TimerEvent> {
        if self.timer.next_tick_in() != Some(Duration::ZERO) {
            return Vec::new();
        }
        let events = self.timer.poll();
        self.persist();
        events
    }

    /// Run the host loop on the current thread until `Shutdown` arrives or
    /// every sender of `inbox` is gone. Events go to `observer`, if any.
    pub fn run(mut self, inbox: Receiver<HostInput>, observer: Option<Sender<TimerEvent>>) -> Self {
        let notify = |events: Vec<TimerEvent>| {
            if let Some(observer) = &observer {
                for event in events {
                    let _ = observer.send(event);
                }
            }
        };

        loop {
            notify(self.pump());
            let wait = self
                .timer
                .next_tick_in()
                .map_or(REMOTE_POLL, |due| due.min(REMOTE_POLL));
            match inbox.recv_timeout(wait) {
                Ok(HostInput::Action(action)) => notify(self.handle(action)),
                Ok(HostInput::Broadcast) => {
                    self.broadcast();
                }
                Ok(HostInput::Query(reply)) => {
                    let _ = reply.send(self.timer.state().clone());
                }
                Ok(HostInput::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        debug!("host loop for room {} stopped", self.link.room_code());
        self
    }

    /// Move the host onto its own thread.
    pub fn spawn(self, observer: Option<Sender<TimerEvent>>) -> HostHandle {
        let (tx, inbox) = mpsc::channel();
        let thread = thread::spawn(move || self.run(inbox, observer));
        HostHandle {
            tx,
            thread: Some(thread),
        }
    }

    fn persist(&mut self) {
        if let Err(e) = save_state(self.store.as_mut(), self.timer.state()) {
            warn!("could not save timer state: {e}");
        }
    }
}

/// Input to a spawned host loop.
#[derive(Debug)]
pub enum HostInput {
    Action(TimerAction),
    /// Rebroadcast the current snapshot without changing anything.
    Broadcast,
    /// Reply with a copy of the current state.
    Query(Sender<TimerState>),
    Shutdown,
}

/// Handle to a host loop started with `HostSync::spawn`.
pub struct HostHandle {
    tx: Sender<HostInput>,
    thread: Option<JoinHandle<HostSync>>,
}

impl HostHandle {
    /// Queue a local action. `false` if the loop has already stopped.
    pub fn act(&self, action: TimerAction) -> bool {
        self.tx.send(HostInput::Action(action)).is_ok()
    }

    pub fn rebroadcast(&self) -> bool {
        self.tx.send(HostInput::Broadcast).is_ok()
    }

    /// Current state, or `None` if the loop does not answer in time.
    pub fn state(&self, timeout: Duration) -> Option<TimerState> {
        let (reply, answer) = mpsc::channel();
        self.tx.send(HostInput::Query(reply)).ok()?;
        answer.recv_timeout(timeout).ok()
    }

    /// Stop the loop and get the host back.
    pub fn stop(mut self) -> Option<HostSync> {
        let _ = self.tx.send(HostInput::Shutdown);
        self.thread.take()?.join().ok()
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(HostInput::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
