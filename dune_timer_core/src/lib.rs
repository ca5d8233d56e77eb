// dune_timer_core — the turn-timer state machine.
//
// Everything a host needs to run a board-game turn timer, with no networking:
// the roster, the per-player countdown with a turn bonus, efficiency scoring
// against a fixed par, the reveal/out-of-round cycle of a round, overtime
// warnings, and persistence of all of it. Controllers never link this crate's
// state machine; they only consume the `Snapshot` it produces.
//
// Module overview:
// - `timer.rs`:  `TurnTimer`, `TimerState`, `TimerAction`, `Standing`. All
//                transitions, the tick handler, snapshot building.
// - `player.rs`: `Player`, the per-seat state and its transition helpers.
// - `event.rs`:  `TimerEvent`, returned by every mutator.
// - `config.rs`: `TimerConfig` (initial time, bonus, par, overtime interval,
//                tick cadence, roster), JSON-loadable.
// - `clock.rs`:  `Clock` trait, `SystemClock`, `ManualClock` for tests.
// - `ticker.rs`: `Ticker`, the cancellable tick schedule `TurnTimer` owns.
// - `store.rs`:  `KeyValueStore` boundary, `MemoryStore`, `FileStore`, and the
//                timer-state / room-code records.
//
// Single owner, no interior mutability: a `TurnTimer` is driven by one
// thread (see `dune_timer_sync::host`), which also decides when to poll it
// for ticks.

pub mod clock;
pub mod config;
pub mod event;
pub mod player;
pub mod store;
pub mod ticker;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use config::{ConfigError, SeatConfig, TimerConfig};
pub use event::{GameSummary, TimerEvent};
pub use player::Player;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use ticker::Ticker;
pub use timer::{Standing, TimerAction, TimerState, TurnTimer};
