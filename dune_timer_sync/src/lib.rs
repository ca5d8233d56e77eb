// dune_timer_sync — keeps controllers in step with the host's timer.
//
// The host is authoritative. It broadcasts a display snapshot after every
// change and whenever asked; controllers replace their view with whatever
// arrives last and send commands back as fire-and-forget intents. There is
// no acknowledgement, retry, or merge: a lost message is repaired by the
// next broadcast.
//
// Module overview:
// - `host.rs`:       `HostSync`, which owns the `TurnTimer`, persists it,
//                    answers state requests and applies controller commands.
//                    `HostHandle` runs it on its own thread.
// - `controller.rs`: `ControllerSync`, the last-snapshot-wins view with
//                    countdown extrapolation, plus the command senders.
//
// Both sides talk through `dune_timer_relay::RelayConnection`, so
// reconnects, heartbeats and subscriptions are handled there.

pub mod controller;
pub mod host;

pub use controller::{ControllerSync, display_time, extrapolate_seconds};
pub use host::{HostHandle, HostInput, HostSync, command_action};
