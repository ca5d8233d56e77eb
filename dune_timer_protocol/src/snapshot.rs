// Display-sufficient projection of the host's timer state.
//
// A `Snapshot` is what travels host → relay → controllers in `host:state`.
// It deliberately leaves out the host's bookkeeping (efficiency, turn
// counters, turn clock, rotation order); controllers only need enough to
// render whose turn it is and how much time everybody has left.
//
// Snapshots are immutable messages: the host builds a fresh one for every
// broadcast (see `TurnTimer::snapshot` in the core crate) and controllers
// replace their whole view with the latest one they receive. `sent_at` is the
// host's wall clock at construction time so controllers can extrapolate the
// active countdown between broadcasts.
//
// Field names are camelCase on the wire to stay compatible with browser
// controllers.

use serde::{Deserialize, Serialize};

use crate::types::{Millis, PlayerColor, PlayerId};

/// One player as seen by a controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPlayer {
    pub id: PlayerId,
    pub name: String,
    pub color: PlayerColor,
    pub is_active: bool,
    pub is_revealing: bool,
    pub is_out_of_round: bool,
    /// Seconds left on this player's clock at `sent_at`.
    pub time_remaining: u32,
}

/// Timestamped projection of the host state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub sent_at: Millis,
    pub players: Vec<SnapshotPlayer>,
    pub current_round: u32,
    pub is_running: bool,
    pub game_started: bool,
}

impl Snapshot {
    /// The player whose turn it is, if any.
    pub fn active_player(&self) -> Option<&SnapshotPlayer> {
        self.players.iter().find(|p| p.is_active)
    }

    /// Started but not running.
    pub fn is_paused(&self) -> bool {
        self.game_started && !self.is_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            sent_at: 1_700_000_000_000,
            players: vec![
                SnapshotPlayer {
                    id: PlayerId(1),
                    name: "Paul".into(),
                    color: PlayerColor::Blue,
                    is_active: false,
                    is_revealing: false,
                    is_out_of_round: true,
                    time_remaining: 540,
                },
                SnapshotPlayer {
                    id: PlayerId(2),
                    name: "Jessica".into(),
                    color: PlayerColor::Green,
                    is_active: true,
                    is_revealing: true,
                    is_out_of_round: false,
                    time_remaining: 601,
                },
            ],
            current_round: 3,
            is_running: false,
            game_started: true,
        }
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["sentAt"], 1_700_000_000_000u64);
        assert_eq!(value["currentRound"], 3);
        assert_eq!(value["isRunning"], false);
        assert_eq!(value["gameStarted"], true);
        let p = &value["players"][1];
        assert_eq!(p["id"], 2);
        assert_eq!(p["color"], "green");
        assert_eq!(p["isActive"], true);
        assert_eq!(p["isRevealing"], true);
        assert_eq!(p["isOutOfRound"], false);
        assert_eq!(p["timeRemaining"], 601);
        assert!(p.get("totalEfficiency").is_none());
    }

    #[test]
    fn parses_browser_payload() {
        let json = r#"{
            "sentAt": 10,
            "players": [{"id": 4, "name": "Feyd", "color": "orange",
                         "isActive": true, "isRevealing": false,
                         "isOutOfRound": false, "timeRemaining": 42}],
            "currentRound": 1, "isRunning": true, "gameStarted": true
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.active_player().map(|p| p.id), Some(PlayerId(4)));
        assert!(!snapshot.is_paused());
    }

    #[test]
    fn off_palette_color_does_not_sink_the_snapshot() {
        let json = r##"{
            "sentAt": 10,
            "players": [{"id": 1, "name": "Alia", "color": "#ff00aa",
                         "isActive": true, "isRevealing": false,
                         "isOutOfRound": false, "timeRemaining": 42}],
            "currentRound": 1, "isRunning": true, "gameStarted": true
        }"##;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.players[0].color, PlayerColor::Other);
        assert_eq!(snapshot.players[0].time_remaining, 42);
    }

    #[test]
    fn active_and_paused_helpers() {
        let snapshot = sample();
        assert_eq!(snapshot.active_player().unwrap().name, "Jessica");
        assert!(snapshot.is_paused());
    }
}
