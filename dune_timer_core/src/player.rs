// Per-player timer state.
//
// A `Player` is one seat at the table: display identity (name, color), the
// countdown clock, efficiency bookkeeping, and the three round flags
// (`is_active`, `is_revealing`, `is_out_of_round`). Only `TurnTimer` mutates
// these; the helpers here keep the per-player half of each transition in one
// place so the state machine reads as a sequence of seat-level steps.

use dune_timer_protocol::{PlayerColor, PlayerId, SnapshotPlayer};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: PlayerColor,
    /// Seconds left on this player's clock. Never negative.
    pub time_remaining: u32,
    /// Sum of per-turn efficiencies over completed turns. May go negative.
    pub total_efficiency: i64,
    /// Live efficiency of the turn in progress (`par - elapsed`).
    pub current_turn_efficiency: i64,
    /// Turns finished this round.
    pub turns_completed: u32,
    pub is_active: bool,
    pub is_revealing: bool,
    pub is_out_of_round: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, color: PlayerColor, time: u32) -> Self {
        Self {
            id,
            name: name.into(),
            color,
            time_remaining: time,
            total_efficiency: 0,
            current_turn_efficiency: 0,
            turns_completed: 0,
            is_active: false,
            is_revealing: false,
            is_out_of_round: false,
        }
    }

    /// Can take a turn this round.
    pub fn is_eligible(&self) -> bool {
        !self.is_out_of_round
    }

    /// Begin this player's turn, granting `bonus` seconds.
    pub(crate) fn activate(&mut self, bonus: u32) {
        self.is_active = true;
        self.is_revealing = false;
        self.current_turn_efficiency = 0;
        self.time_remaining = self.time_remaining.saturating_add(bonus);
    }

    /// Close the turn in progress and bank its efficiency.
    pub(crate) fn complete_turn(&mut self, efficiency: i64) {
        self.is_active = false;
        self.total_efficiency += efficiency;
        self.turns_completed += 1;
    }

    /// Add `delta` seconds (negative subtracts), clamped to `0..=u32::MAX`.
    pub(crate) fn adjust_time(&mut self, delta: i64) {
        let adjusted = i64::from(self.time_remaining).saturating_add(delta);
        self.time_remaining = adjusted.clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Back to the start-of-game condition with `time` on the clock.
    pub(crate) fn reset(&mut self, time: u32) {
        self.time_remaining = time;
        self.total_efficiency = 0;
        self.current_turn_efficiency = 0;
        self.turns_completed = 0;
        self.is_active = false;
        self.is_revealing = false;
        self.is_out_of_round = false;
    }

    pub fn to_snapshot(&self) -> SnapshotPlayer {
        SnapshotPlayer {
            id: self.id,
            name: self.name.clone(),
            color: self.color,
            is_active: self.is_active,
            is_revealing: self.is_revealing,
            is_out_of_round: self.is_out_of_round,
            time_remaining: self.time_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leto() -> Player {
        Player::new(PlayerId(1), "Leto", PlayerColor::Green, 100)
    }

    #[test]
    fn activation_grants_bonus_and_clears_turn_flags() {
        let mut p = leto();
        p.is_revealing = true;
        p.current_turn_efficiency = -12;
        p.activate(60);
        assert!(p.is_active);
        assert!(!p.is_revealing);
        assert_eq!(p.current_turn_efficiency, 0);
        assert_eq!(p.time_remaining, 160);
    }

    #[test]
    fn completing_a_turn_banks_efficiency() {
        let mut p = leto();
        p.activate(0);
        p.complete_turn(-15);
        p.activate(0);
        p.complete_turn(40);
        assert!(!p.is_active);
        assert_eq!(p.total_efficiency, 25);
        assert_eq!(p.turns_completed, 2);
    }

    #[test]
    fn time_adjustment_clamps_at_zero() {
        let mut p = leto();
        p.adjust_time(-30);
        assert_eq!(p.time_remaining, 70);
        p.adjust_time(-1_000);
        assert_eq!(p.time_remaining, 0);
        p.adjust_time(i64::MAX);
        assert_eq!(p.time_remaining, u32::MAX);
    }

    #[test]
    fn snapshot_carries_display_fields_only() {
        let mut p = leto();
        p.is_out_of_round = true;
        let snap = p.to_snapshot();
        assert_eq!(snap.id, PlayerId(1));
        assert_eq!(snap.name, "Leto");
        assert!(snap.is_out_of_round);
        assert_eq!(snap.time_remaining, 100);
    }
}
