// Small shared types used across the protocol, the state machine, and the
// relay.
//
// `PlayerId` is the roster identity of a player at the table (not a network
// identity; the relay never sees it). `Role` is the tag a connection declares
// when it joins a room. `Millis` is wall-clock milliseconds since the Unix
// epoch, the unit of `Snapshot::sent_at` and of every clock reading in the
// core crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds since the Unix epoch.
pub type Millis = u64;

/// Roster identity of a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}", self.0)
    }
}

/// Role a connection declares on `room:join`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The device holding the authoritative timer.
    Host,
    /// A device viewing and commanding the host remotely.
    Controller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Controller => "controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seat color of a player. Purely presentational; carried in snapshots so
/// controllers can render the same palette as the host. A color name this
/// build does not know decodes as `Other` rather than failing the snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    #[default]
    Blue,
    Green,
    Purple,
    Orange,
    Red,
    Yellow,
    Pink,
    Teal,
    /// Any color outside the palette above. Never handed out to a seat.
    #[serde(other)]
    Other,
}

impl PlayerColor {
    /// Seat colors in the order new rosters hand them out.
    pub const SEATS: [PlayerColor; 8] = [
        PlayerColor::Blue,
        PlayerColor::Green,
        PlayerColor::Purple,
        PlayerColor::Orange,
        PlayerColor::Red,
        PlayerColor::Yellow,
        PlayerColor::Pink,
        PlayerColor::Teal,
    ];
}
