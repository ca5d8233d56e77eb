// Controller side of the sync protocol.
//
// A controller keeps no game state of its own. Its view is the last
// `Snapshot` the host broadcast, replaced wholesale on every `host:state`
// (no merging: the newest snapshot wins). Between broadcasts the active
// player's countdown is extrapolated from the snapshot's `sent_at`:
//
//     shown = max(0, ceil(remote - (now - sent_at) / 1000))
//
// when the game is running, and exactly `remote` otherwise. The
// extrapolation is for display only and is never sent anywhere.
//
// Commands (`nextTurn`, `pauseResume`, `revealTurn`) are fire-and-forget.
// Nothing is applied locally; the controller sees the effect when the host's
// next broadcast arrives. Every (re)connect re-sends `host:requestState` (as
// a connection greeting) so a controller that joins late, or missed
// broadcasts while disconnected, catches up.
//
// See also: `host.rs` for the sending end.

use std::sync::Arc;
use std::time::Duration;

use dune_timer_core::Clock;
use dune_timer_protocol::{Command, Envelope, EventKind, Millis, PlayerId, Role, RoomCode, Snapshot};
use dune_timer_relay::{ClientConfig, ConnectionState, RelayConnection, Subscription};
use log::{debug, warn};

/// Seconds to show for a countdown that stood at `remote` seconds at
/// `sent_at`. A `sent_at` in the future (clock skew) counts as no time
/// passed.
pub fn extrapolate_seconds(remote: u32, sent_at: Millis, now: Millis) -> u32 {
    let left_ms = i64::from(remote) * 1000 - now.saturating_sub(sent_at) as i64;
    if left_ms <= 0 {
        0
    } else {
        ((left_ms + 999) / 1000) as u32
    }
}

/// Time to show for `player`: extrapolated if it is the running active
/// player, exact otherwise. `None` for an unknown player.
pub fn display_time(snapshot: &Snapshot, player: PlayerId, now: Millis) -> Option<u32> {
    let p = snapshot.players.iter().find(|p| p.id == player)?;
    if snapshot.is_running && p.is_active {
        Some(extrapolate_seconds(p.time_remaining, snapshot.sent_at, now))
    } else {
        Some(p.time_remaining)
    }
}

pub struct ControllerSync {
    link: RelayConnection,
    updates: Subscription,
    clock: Arc<dyn Clock>,
    view: Option<Snapshot>,
}

impl ControllerSync {
    /// Join a room as a controller. The role in `client` is forced to
    /// controller and a state request is added to its greetings.
    pub fn new(mut client: ClientConfig, clock: Arc<dyn Clock>) -> Self {
        client.role = Role::Controller;
        if !client
            .greetings
            .iter()
            .any(|g| g.event == EventKind::RequestState)
        {
            client.greetings.push(Envelope::request_state());
        }
        let mut link = RelayConnection::new(client);
        let updates = link.subscribe(&[EventKind::HostState]);
        link.start();
        Self {
            link,
            updates,
            clock,
            view: None,
        }
    }

    /// Connect to the relay at `addr` with default settings.
    pub fn connect(addr: impl Into<String>, room_code: RoomCode, clock: Arc<dyn Clock>) -> Self {
        Self::new(ClientConfig::new(addr, room_code, Role::Controller), clock)
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

    /// Take in every snapshot that has arrived. Returns whether the view
    /// changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        for envelope in self.updates.drain() {
            changed |= self.accept(&envelope);
        }
        changed
    }

    /// Wait up to `timeout` for the next snapshot, then take in anything
    /// else already queued. Returns whether the view changed.
    pub fn wait_for_update(&mut self, timeout: Duration) -> bool {
        match self.updates.recv_timeout(timeout) {
            Some(envelope) => {
                let changed = self.accept(&envelope);
                self.pump() || changed
            }
            None => false,
        }
    }

    fn accept(&mut self, envelope: &Envelope) -> bool {
        match envelope.snapshot() {
            Ok(snapshot) => {
                debug!(
                    "host state: round {}, running {}",
                    snapshot.current_round, snapshot.is_running
                );
                self.view = Some(snapshot);
                true
            }
            Err(e) => {
                warn!("ignoring unreadable host state: {e}");
                false
            }
        }
    }

    /// The last snapshot received, as sent.
    pub fn view(&self) -> Option<&Snapshot> {
        self.view.as_ref()
    }

    /// What to show for `player` right now.
    pub fn display_time(&self, player: PlayerId) -> Option<u32> {
        display_time(self.view.as_ref()?, player, self.clock.now())
    }

    /// The last snapshot with the active player's time extrapolated to now.
    pub fn display_view(&self) -> Option<Snapshot> {
        let mut view = self.view.clone()?;
        let now = self.clock.now();
        if view.is_running {
            for p in view.players.iter_mut().filter(|p| p.is_active) {
                p.time_remaining = extrapolate_seconds(p.time_remaining, view.sent_at, now);
            }
        }
        Some(view)
    }

    /// Ask the host to broadcast its state. `false` if it was dropped.
    pub fn request_state(&self) -> bool {
        self.link.send(&Envelope::request_state())
    }

    pub fn send_command(&self, command: Command) -> bool {
        self.link.send(&Envelope::command(command))
    }

    pub fn next_turn(&self) -> bool {
        self.send_command(Command::NextTurn)
    }

    pub fn pause_resume(&self) -> bool {
        self.send_command(Command::PauseResume)
    }

    pub fn reveal_turn(&self) -> bool {
        self.send_command(Command::RevealTurn)
    }
}
