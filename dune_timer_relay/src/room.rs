// Room membership for the relay.
//
// `RoomRegistry` is the relay's only state: which connection sits in which
// room, and with which role. `server.rs` drives it from its single-threaded
// event loop, so there is no internal locking. The registry never touches
// sockets; fan-out asks it for the recipients of a message and does the
// writing itself.
//
// Rules:
// - A room is created by the first `join` naming its code and dropped when
//   its last member leaves. Codes are opaque strings here; the relay never
//   validates their format.
// - A connection is in at most one room. Joining again with the same code
//   only updates the role; joining a different code moves the connection.
// - A message is delivered to every other member of the sender's room,
//   never back to the sender. A sender that has not joined has no
//   recipients.
// - Roles are recorded (and logged) but not used for routing.

use std::collections::BTreeMap;
use std::fmt;

use dune_timer_protocol::Role;

/// Relay-assigned identity of one TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What a `join` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was not in any room before.
    Entered,
    /// Same room as before; the role was refreshed.
    Rejoined,
    /// The connection left `from` (which may now be gone) for the new room.
    Moved { from: String },
}

#[derive(Debug, Default)]
struct Room {
    members: BTreeMap<ConnectionId, Role>,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
    membership: BTreeMap<ConnectionId, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, conn: ConnectionId, room_code: &str, role: Role) -> JoinOutcome {
        let outcome = match self.membership.get(&conn) {
            None => JoinOutcome::Entered,
            Some(current) if current == room_code => JoinOutcome::Rejoined,
            Some(_) => match self.leave(conn) {
                Some(from) => JoinOutcome::Moved { from },
                None => JoinOutcome::Entered,
            },
        };
        self.rooms
            .entry(room_code.to_string())
            .or_default()
            .members
            .insert(conn, role);
        self.membership.insert(conn, room_code.to_string());
        outcome
    }

    /// Remove `conn` from its room. Returns the room it left, if any.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<String> {
        let code = self.membership.remove(&conn)?;
        if let Some(room) = self.rooms.get_mut(&code) {
            room.members.remove(&conn);
            if room.members.is_empty() {
                self.rooms.remove(&code);
            }
        }
        Some(code)
    }

    /// The sender's room and everybody else in it. `None` if the sender has
    /// not joined a room.
    pub fn recipients(&self, from: ConnectionId) -> Option<(&str, Vec<ConnectionId>)> {
        let code = self.membership.get(&from)?;
        let room = self.rooms.get(code)?;
        let others = room
            .members
            .keys()
            .copied()
            .filter(|&id| id != from)
            .collect();
        Some((code.as_str(), others))
    }

    pub fn room_of(&self, conn: ConnectionId) -> Option<&str> {
        self.membership.get(&conn).map(String::as_str)
    }

    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        let code = self.membership.get(&conn)?;
        self.rooms.get(code)?.members.get(&conn).copied()
    }

    /// Members of `room_code` with their roles, in connection order.
    pub fn members(&self, room_code: &str) -> Vec<(ConnectionId, Role)> {
        self.rooms
            .get(room_code)
            .map(|room| room.members.iter().map(|(&id, &role)| (id, role)).collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
