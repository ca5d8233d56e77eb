// Relay messages.
//
// Every frame carries one `Envelope`: a namespaced event name plus an
// optional JSON payload.
//
//   room:join          {roomCode, role}         any  → relay
//   host:state         {roomCode, snapshot}     host → relay
//                      Snapshot                 relay → others (unwrapped)
//   host:requestState  (none)                   controller → host
//   game:nextTurn      (none)                   controller → host
//   game:pauseResume   (none)                   controller → host
//   game:revealTurn    (none)                   controller → host
//
// The payload is kept as an opaque `serde_json::Value` so the relay can
// forward it verbatim without knowing the snapshot schema. Only the two ends
// decode it, through the typed accessors below (`join_request`, `snapshot`,
// `command`). `snapshot()` accepts both the wrapped host form and the bare
// relayed form, so a receiver does not need to know which hop it sits on.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::room_code::RoomCode;
use crate::snapshot::Snapshot;
use crate::types::Role;

/// Namespaced event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "room:join")]
    Join,
    #[serde(rename = "host:state")]
    HostState,
    #[serde(rename = "host:requestState")]
    RequestState,
    #[serde(rename = "game:nextTurn")]
    NextTurn,
    #[serde(rename = "game:pauseResume")]
    PauseResume,
    #[serde(rename = "game:revealTurn")]
    RevealTurn,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "room:join",
            EventKind::HostState => "host:state",
            EventKind::RequestState => "host:requestState",
            EventKind::NextTurn => "game:nextTurn",
            EventKind::PauseResume => "game:pauseResume",
            EventKind::RevealTurn => "game:revealTurn",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote intents a controller can send to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    NextTurn,
    PauseResume,
    RevealTurn,
}

impl Command {
    pub fn event(self) -> EventKind {
        match self {
            Command::NextTurn => EventKind::NextTurn,
            Command::PauseResume => EventKind::PauseResume,
            Command::RevealTurn => EventKind::RevealTurn,
        }
    }

    pub fn from_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::NextTurn => Some(Command::NextTurn),
            EventKind::PauseResume => Some(Command::PauseResume),
            EventKind::RevealTurn => Some(Command::RevealTurn),
            _ => None,
        }
    }
}

/// Payload of `room:join`. The room code is a plain string here: the relay
/// keys rooms by whatever the client sent and never validates the format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_code: String,
    pub role: Role,
}

/// Payload of `host:state` as sent by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatePayload {
    pub room_code: String,
    pub snapshot: Snapshot,
}

/// Errors decoding or encoding an envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{expected} payload requested from a {found} message")]
    WrongEvent { expected: EventKind, found: EventKind },
}

/// One relay message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// A message with no payload.
    pub fn bare(event: EventKind) -> Self {
        Self {
            event,
            payload: Value::Null,
        }
    }

    pub fn join(room_code: &RoomCode, role: Role) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(JoinRequest {
            room_code: room_code.to_string(),
            role,
        })?;
        Ok(Self {
            event: EventKind::Join,
            payload,
        })
    }

    pub fn host_state(room_code: &RoomCode, snapshot: &Snapshot) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(HostStatePayload {
            room_code: room_code.to_string(),
            snapshot: snapshot.clone(),
        })?;
        Ok(Self {
            event: EventKind::HostState,
            payload,
        })
    }

    pub fn request_state() -> Self {
        Self::bare(EventKind::RequestState)
    }

    pub fn command(command: Command) -> Self {
        Self::bare(command.event())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The form other room members receive. `host:state` is unwrapped to the
    /// bare snapshot value; everything else passes through untouched.
    pub fn into_relayed(self) -> Self {
        match self.event {
            EventKind::HostState => {
                let payload = match self.payload {
                    Value::Object(mut map) => match map.remove("snapshot") {
                        Some(snapshot) => snapshot,
                        None => Value::Object(map),
                    },
                    other => other,
                };
                Self {
                    event: EventKind::HostState,
                    payload,
                }
            }
            _ => self,
        }
    }

    pub fn join_request(&self) -> Result<JoinRequest, ProtocolError> {
        self.expect(EventKind::Join)?;
        Ok(JoinRequest::deserialize(&self.payload)?)
    }

    /// Decode a `host:state` payload in either the wrapped or the bare form.
    pub fn snapshot(&self) -> Result<Snapshot, ProtocolError> {
        self.expect(EventKind::HostState)?;
        let inner = self.payload.get("snapshot").unwrap_or(&self.payload);
        Ok(Snapshot::deserialize(inner)?)
    }

    pub fn command_kind(&self) -> Option<Command> {
        Command::from_event(self.event)
    }

    fn expect(&self, expected: EventKind) -> Result<(), ProtocolError> {
        if self.event == expected {
            Ok(())
        } else {
            Err(ProtocolError::WrongEvent {
                expected,
                found: self.event,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotPlayer;
    use crate::types::{PlayerColor, PlayerId};

    fn code() -> RoomCode {
        RoomCode::parse("ARRAKS").unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            sent_at: 99,
            players: vec![SnapshotPlayer {
                id: PlayerId(1),
                name: "Leto".into(),
                color: PlayerColor::Red,
                is_active: true,
                is_revealing: false,
                is_out_of_round: false,
                time_remaining: 300,
            }],
            current_round: 2,
            is_running: true,
            game_started: true,
        }
    }

    #[test]
    fn bare_events_have_no_payload_field() {
        let bytes = Envelope::command(Command::PauseResume).to_bytes().unwrap();
        assert_eq!(bytes, br#"{"event":"game:pauseResume"}"#.to_vec());
        let bytes = Envelope::request_state().to_bytes().unwrap();
        assert_eq!(bytes, br#"{"event":"host:requestState"}"#.to_vec());
    }

    #[test]
    fn join_wire_shape() {
        let env = Envelope::join(&code(), Role::Controller).unwrap();
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["event"], "room:join");
        assert_eq!(value["payload"]["roomCode"], "ARRAKS");
        assert_eq!(value["payload"]["role"], "controller");

        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        let join = decoded.join_request().unwrap();
        assert_eq!(join.room_code, "ARRAKS");
        assert_eq!(join.role, Role::Controller);
    }

    #[test]
    fn host_state_is_unwrapped_when_relayed() {
        let env = Envelope::host_state(&code(), &snapshot()).unwrap();
        assert_eq!(env.payload["roomCode"], "ARRAKS");

        let relayed = env.clone().into_relayed();
        assert_eq!(relayed.event, EventKind::HostState);
        assert!(relayed.payload.get("roomCode").is_none());
        assert_eq!(relayed.payload["sentAt"], 99);

        // Both forms decode to the same snapshot.
        assert_eq!(env.snapshot().unwrap(), snapshot());
        assert_eq!(relayed.snapshot().unwrap(), snapshot());
    }

    #[test]
    fn relaying_other_events_is_verbatim() {
        let env = Envelope {
            event: EventKind::NextTurn,
            payload: serde_json::json!({"extra": [1, 2, 3]}),
        };
        assert_eq!(env.clone().into_relayed(), env);
    }

    #[test]
    fn missing_payload_decodes_as_null() {
        let env = Envelope::from_bytes(br#"{"event":"game:revealTurn"}"#).unwrap();
        assert_eq!(env.payload, Value::Null);
        assert_eq!(env.command_kind(), Some(Command::RevealTurn));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let err = Envelope::from_bytes(br#"{"event":"chat:say","payload":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn typed_accessors_check_the_event() {
        let env = Envelope::command(Command::NextTurn);
        assert!(matches!(
            env.snapshot(),
            Err(ProtocolError::WrongEvent {
                expected: EventKind::HostState,
                found: EventKind::NextTurn
            })
        ));
        assert!(env.join_request().is_err());
        assert_eq!(Envelope::request_state().command_kind(), None);
    }

    #[test]
    fn join_without_room_code_fails_to_decode() {
        let env = Envelope::from_bytes(br#"{"event":"room:join","payload":{"role":"host"}}"#)
            .unwrap();
        assert!(matches!(env.join_request(), Err(ProtocolError::Json(_))));
    }
}
