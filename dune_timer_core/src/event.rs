// Timer events: what a transition did.
//
// Every `TurnTimer` operation returns the events it produced. An empty list
// means the operation was a no-op (a guard rejected it or there was nothing
// to change), which the host driver uses to decide whether to broadcast a
// fresh snapshot. Ticks report only `Overtime`, since countdown decrements
// are not broadcast individually; controllers extrapolate them.
//
// Events are also the hook for presentation concerns the state machine does
// not own (sounds, notifications, logging).

use dune_timer_protocol::PlayerId;
use serde::{Deserialize, Serialize};

/// Statistics of a game that was reset after starting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    /// Round the game was in when it was reset.
    pub rounds: u32,
    /// Wall-clock seconds from start to reset.
    pub duration_secs: u64,
    pub player_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerEvent {
    GameStarted {
        first: PlayerId,
    },
    Paused {
        turn_seconds: u32,
    },
    Resumed,
    /// A running turn was closed and scored.
    TurnEnded {
        player: PlayerId,
        turn_seconds: u32,
        efficiency: i64,
    },
    /// A player became active. `bonus` is the time granted (zero for a
    /// switch made while paused).
    TurnStarted {
        player: PlayerId,
        bonus: u32,
    },
    RevealStarted {
        player: PlayerId,
    },
    /// A revealing player finished their turn and is out of the round.
    PlayerOut {
        player: PlayerId,
    },
    /// `round` finished; `starter` opens the next one.
    RoundEnded {
        round: u32,
        starter: Option<PlayerId>,
    },
    Overtime {
        player: PlayerId,
        turn_seconds: u32,
    },
    TimeAdjusted {
        player: PlayerId,
        time_remaining: u32,
    },
    /// A name, color, order or initial-time change.
    RosterChanged,
    GameReset {
        completed: Option<GameSummary>,
    },
}
