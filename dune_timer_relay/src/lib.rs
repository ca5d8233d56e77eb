// dune_timer_relay — room-code relay between a host and its controllers.
//
// The relay is a thin message broker: devices connect over TCP, declare a
// room code and a role with `room:join`, and every message a member sends is
// forwarded to every other member of the same room. It never interprets
// game state; `host:state` is the one message it reshapes (unwrapping the
// snapshot) and everything else passes through verbatim.
//
// Module overview:
// - `room.rs`:    `RoomRegistry`, room membership and fan-out recipients. The
//                 core data structure that `server.rs` drives.
// - `server.rs`:  TCP listener, per-connection reader and writer threads, and
//                 the main event loop. `std::net` with thread-per-connection
//                 and one `mpsc` channel into the single-threaded registry.
// - `client.rs`:  `RelayConnection`, the device side: connect/join/greet,
//                 reconnect with backoff, heartbeats, typed subscriptions.
//
// Dependencies: `dune_timer_protocol` (envelope and framing). No dependency
// on the timer state machine.
//
// The relay runs as a standalone binary (`main.rs`) or embedded via
// `start_relay`, which is how the integration tests use it.

pub mod client;
pub mod room;
pub mod server;

pub use client::{
    ClientConfig, ConnectError, ConnectionState, ReconnectPolicy, RelayConnection, Subscription,
};
pub use room::{ConnectionId, RoomRegistry};
pub use server::{RelayConfig, RelayHandle, start_relay};
