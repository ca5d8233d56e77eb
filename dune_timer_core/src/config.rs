// Timer configuration.
//
// All tunables of the turn timer live in `TimerConfig`: the starting clock,
// the per-activation turn bonus, the efficiency par, the overtime warning
// interval, the tick cadence, and the starting roster. The state machine
// never hard-codes these; it reads them from the config it was built with.
//
// Configs load from JSON. Every field has a default (`#[serde(default)]`), so
// a file only needs to mention what it changes, e.g.
// `{"initial_time": 900, "roster": [{"name": "Ana"}, {"name": "Bo"}]}`.

use std::time::Duration;

use dune_timer_protocol::PlayerColor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a `TimerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// One seat of the starting roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatConfig {
    pub name: String,
    /// Defaults to the seat's position in `PlayerColor::SEATS`.
    #[serde(default)]
    pub color: Option<PlayerColor>,
}

/// Tunable parameters of the turn timer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Seconds on every player's clock at game start and after a reset.
    pub initial_time: u32,
    /// Seconds granted to a player each time their turn begins (game start,
    /// turn advance, explicit switch, round start). Not granted on resume.
    pub turn_bonus: u32,
    /// Turn length against which efficiency is scored:
    /// `efficiency = par_seconds - elapsed_turn_seconds`.
    pub par_seconds: u32,
    /// An overtime warning fires each time the elapsed turn time crosses a
    /// further multiple of this many seconds past par.
    pub overtime_interval: u32,
    /// Countdown cadence in milliseconds.
    pub tick_interval_ms: u64,
    /// Starting roster, in seat order.
    pub roster: Vec<SeatConfig>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_time: 600,
            turn_bonus: 60,
            par_seconds: 60,
            overtime_interval: 30,
            tick_interval_ms: 1_000,
            roster: (1..=4)
                .map(|n| SeatConfig {
                    name: format!("Player {n}"),
                    color: None,
                })
                .collect(),
        }
    }
}

impl TimerConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TimerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roster.is_empty() {
            return Err(ConfigError::Invalid("roster must have at least one seat"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive"));
        }
        if self.overtime_interval == 0 {
            return Err(ConfigError::Invalid("overtime_interval must be positive"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Color of seat `index`, falling back to the seat palette.
    pub fn seat_color(&self, index: usize) -> PlayerColor {
        self.roster
            .get(index)
            .and_then(|seat| seat.color)
            .unwrap_or(PlayerColor::SEATS[index % PlayerColor::SEATS.len()])
    }
}
