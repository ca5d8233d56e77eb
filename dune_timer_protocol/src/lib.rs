// dune_timer_protocol — wire protocol between hosts, controllers, and the
// relay.
//
// Shared by every networked crate: the relay (`dune_timer_relay`) routes
// these messages, the host and controller drivers (`dune_timer_sync`) produce
// and consume them. No dependency on the timer state machine; the core crate
// depends on this one for the `Snapshot` type it builds.
//
// Module overview:
// - `types.rs`:     `PlayerId`, `Role`, `PlayerColor`, `Millis`.
// - `room_code.rs`: Six-character `[A-Z0-9]` room codes, parsing and
//                   generation (via `dune_timer_prng`).
// - `snapshot.rs`:  `Snapshot` / `SnapshotPlayer`, the display projection of
//                   host state sent in `host:state`.
// - `message.rs`:   `Envelope` (event name + opaque JSON payload),
//                   `EventKind`, `Command`, typed payload accessors.
// - `framing.rs`:   Length-delimited framing with zero-length heartbeat
//                   frames.
//
// Design decisions:
// - **JSON on the wire.** Snapshot field names match what browser
//   controllers already speak (camelCase), so a thin websocket bridge could
//   forward frames unchanged.
// - **Opaque payloads at the relay.** The relay never decodes snapshots or
//   commands; `Envelope::payload` is a `serde_json::Value` it forwards as-is.
// - **Blocking std I/O.** Framing works on any `Read`/`Write`, matching the
//   thread-per-connection model of the relay and client.

pub mod framing;
pub mod message;
pub mod room_code;
pub mod snapshot;
pub mod types;

pub use framing::{Frame, MAX_MESSAGE_SIZE, read_frame, read_message, write_heartbeat, write_message};
pub use message::{Command, Envelope, EventKind, HostStatePayload, JoinRequest, ProtocolError};
pub use room_code::{ROOM_CODE_LEN, RoomCode, RoomCodeError};
pub use snapshot::{Snapshot, SnapshotPlayer};
pub use types::{Millis, PlayerColor, PlayerId, Role};
