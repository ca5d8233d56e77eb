// Turn state machine.
//
// `TurnTimer` is the single authority over a game: roster, whose turn it is,
// everybody's remaining time, per-turn efficiency, reveal/out-of-round flags,
// round counter, and the turn clock. Hosts own exactly one; controllers never
// run it and only see its `Snapshot`.
//
// ## Turn clock
//
// Elapsed time of the current turn is wall-clock based:
// `turn_seconds = floor((now - turn_started_at) / 1000) + paused_elapsed`.
// Pausing folds the running part into `paused_elapsed` and clears
// `turn_started_at`; resuming sets `turn_started_at = now` again. Every turn
// change restarts the clock (and the overtime level) from zero.
//
// ## Countdown
//
// The `Ticker` is started whenever the timer runs and restarted on each turn
// change. `poll()` replays every tick that has come due: each one takes one
// second off the active player's clock (saturating at zero), refreshes their
// live efficiency, and checks for an overtime level crossing. Nothing here
// sleeps; the host driver calls `poll()` when `next_tick_in()` says so.
//
// ## Bonus rule
//
// Every activation (game start, advance, switch while running, previous,
// round start) grants `turn_bonus` seconds to the incoming player. Resume
// and a switch made while paused grant nothing.
//
// ## Failure semantics
//
// Mutators never fail. An operation whose preconditions do not hold (game
// not started, unknown or out-of-round target, no active player) leaves the
// state untouched and returns no events.
//
// See also: `player.rs` for the seat-level half of each transition,
// `event.rs` for what the returned events mean, `ticker.rs` and `clock.rs`
// for the time sources.

use std::sync::Arc;
use std::time::Duration;

use dune_timer_protocol::{Millis, PlayerColor, PlayerId, Snapshot};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::TimerConfig;
use crate::event::{GameSummary, TimerEvent};
use crate::player::Player;
use crate::ticker::Ticker;

/// Everything a host needs to persist to resume a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Seat order. Drag-reorder changes it; turn rotation follows it.
    pub players: Vec<Player>,
    pub is_running: bool,
    pub game_started: bool,
    /// Starts at 1, only grows until a reset.
    pub current_round: u32,
    /// Start of the running part of the current turn. `None` while paused or
    /// before the game starts.
    pub turn_started_at: Option<Millis>,
    /// Whole seconds of the current turn consumed before the latest pause.
    pub paused_elapsed: u32,
    pub initial_time: u32,
    /// Seat order captured at game start; round starters rotate through it.
    pub player_order: Vec<PlayerId>,
    pub current_order_index: usize,
    /// Highest overtime level already announced this turn.
    pub last_overtime_warning: u32,
    pub game_started_at: Option<Millis>,
}

impl TimerState {
    /// Fresh, unstarted state for `config`'s roster with the first seat
    /// active.
    pub fn from_config(config: &TimerConfig) -> Self {
        let mut players: Vec<Player> = config
            .roster
            .iter()
            .enumerate()
            .map(|(i, seat)| {
                Player::new(
                    PlayerId(i as u32 + 1),
                    seat.name.clone(),
                    config.seat_color(i),
                    config.initial_time,
                )
            })
            .collect();
        if let Some(first) = players.first_mut() {
            first.is_active = true;
        }
        Self {
            players,
            is_running: false,
            game_started: false,
            current_round: 1,
            turn_started_at: None,
            paused_elapsed: 0,
            initial_time: config.initial_time,
            player_order: Vec::new(),
            current_order_index: 0,
            last_overtime_warning: 0,
            game_started_at: None,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    fn index_of(&self, id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    fn active_index(&self) -> Option<usize> {
        self.players.iter().position(|p| p.is_active)
    }
}

/// Final placing of one player, ranked by total efficiency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: PlayerId,
    pub player_name: String,
    /// 1-based; ties are broken by seat order, so ranks are never shared.
    pub rank: u32,
}

/// Every mutation a host can request, as data. Local UI input and remote
/// controller commands both end up here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerAction {
    StartPauseResume,
    SwitchTo(PlayerId),
    NextTurn,
    PreviousTurn,
    StartReveal,
    EndRound,
    Reset,
    AdjustTime { player: PlayerId, delta: i64 },
    Rename { player: PlayerId, name: String },
    SetColor { player: PlayerId, color: PlayerColor },
    MovePlayer { dragged: PlayerId, target: PlayerId },
    SetInitialTime(u32),
}

pub struct TurnTimer {
    config: TimerConfig,
    state: TimerState,
    clock: Arc<dyn Clock>,
    ticker: Ticker,
}

impl TurnTimer {
    pub fn new(config: TimerConfig, clock: Arc<dyn Clock>) -> Self {
        let state = TimerState::from_config(&config);
        Self::with_state(config, clock, state)
    }

    /// Resume from a previously persisted state. A game that was running
    /// keeps running; its turn clock still counts from the stored
    /// `turn_started_at`, and the countdown restarts from now.
    pub fn with_state(config: TimerConfig, clock: Arc<dyn Clock>, state: TimerState) -> Self {
        let mut timer = Self {
            ticker: Ticker::new(config.tick_interval()),
            config,
            state,
            clock,
        };
        timer.sync_ticker();
        timer
    }

    /// Replace the whole state, e.g. with one loaded from a store. Same
    /// running rules as `with_state`.
    pub fn restore(&mut self, state: TimerState) {
        self.state = state;
        self.sync_ticker();
    }

    fn sync_ticker(&mut self) {
        if self.state.game_started && self.state.is_running {
            self.ticker.start(self.clock.now());
        } else {
            self.ticker.stop();
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn players(&self) -> &[Player] {
        &self.state.players
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    pub fn active_player(&self) -> Option<&Player> {
        self.state.players.iter().find(|p| p.is_active)
    }

    /// Players not out of the round.
    pub fn eligible_count(&self) -> usize {
        self.state.players.iter().filter(|p| p.is_eligible()).count()
    }

    /// Elapsed seconds of the current turn. Zero before the game starts,
    /// frozen while paused.
    pub fn current_turn_seconds(&self) -> u32 {
        self.turn_seconds_at(self.clock.now())
    }

    /// Time until the next countdown tick, `None` while not running.
    pub fn next_tick_in(&self) -> Option<Duration> {
        self.ticker.time_until_next(self.clock.now())
    }

    /// Display projection of the current state, stamped with the clock.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sent_at: self.clock.now(),
            players: self.state.players.iter().map(Player::to_snapshot).collect(),
            current_round: self.state.current_round,
            is_running: self.state.is_running,
            game_started: self.state.game_started,
        }
    }

    /// Final placings by total efficiency, best first.
    pub fn standings(&self) -> Vec<Standing> {
        let mut ranked: Vec<&Player> = self.state.players.iter().collect();
        // Stable sort keeps seat order among ties.
        ranked.sort_by(|a, b| b.total_efficiency.cmp(&a.total_efficiency));
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| Standing {
                player_id: p.id,
                player_name: p.name.clone(),
                rank: i as u32 + 1,
            })
            .collect()
    }

    pub fn apply(&mut self, action: TimerAction) -> Vec<TimerEvent> {
        match action {
            TimerAction::StartPauseResume => self.start_or_pause_or_resume(),
            TimerAction::SwitchTo(id) => self.switch_to_player(id),
            TimerAction::NextTurn => self.next_turn(),
            TimerAction::PreviousTurn => self.previous_turn(),
            TimerAction::StartReveal => self.start_reveal(),
            TimerAction::EndRound => self.end_round(),
            TimerAction::Reset => self.reset_game(),
            TimerAction::AdjustTime { player, delta } => self.adjust_time(player, delta),
            TimerAction::Rename { player, name } => self.rename_player(player, name),
            TimerAction::SetColor { player, color } => self.set_player_color(player, color),
            TimerAction::MovePlayer { dragged, target } => self.move_player(dragged, target),
            TimerAction::SetInitialTime(seconds) => self.set_initial_time(seconds),
        }
    }

    // -----------------------------------------------------------------------
    // Run state
    // -----------------------------------------------------------------------

    /// The single start/pause/resume control.
    pub fn start_or_pause_or_resume(&mut self) -> Vec<TimerEvent> {
        if self.state.players.is_empty() {
            return Vec::new();
        }
        let now = self.clock.now();
        if !self.state.game_started {
            return self.start_game(now);
        }
        if self.state.is_running {
            let turn_seconds = self.turn_seconds_at(now);
            self.state.paused_elapsed = turn_seconds;
            self.state.turn_started_at = None;
            self.state.is_running = false;
            self.ticker.stop();
            debug!("paused at {turn_seconds}s into the turn");
            vec![TimerEvent::Paused { turn_seconds }]
        } else {
            self.state.turn_started_at = Some(now);
            self.state.is_running = true;
            self.ticker.start(now);
            debug!("resumed");
            vec![TimerEvent::Resumed]
        }
    }

    fn start_game(&mut self, now: Millis) -> Vec<TimerEvent> {
        let state = &mut self.state;
        let Some(first) = state
            .active_index()
            .filter(|&i| state.players[i].is_eligible())
            .or_else(|| state.players.iter().position(Player::is_eligible))
        else {
            debug!("not starting: every seat is out of the round");
            return Vec::new();
        };
        state.player_order = state.players.iter().map(|p| p.id).collect();
        state.current_order_index = 0;
        state.game_started = true;
        state.game_started_at = Some(now);

        for p in &mut state.players {
            p.is_active = false;
        }
        state.players[first].activate(self.config.turn_bonus);
        let first = state.players[first].id;

        self.restart_turn_clock(now);
        self.state.is_running = true;
        info!(
            "game started with {} players, {first} first",
            self.state.players.len()
        );
        vec![TimerEvent::GameStarted { first }]
    }

    // -----------------------------------------------------------------------
    // Turn changes
    // -----------------------------------------------------------------------

    /// Make `id` the active player. While paused only the active flag moves;
    /// while running the current turn is scored and the target gets the
    /// bonus.
    pub fn switch_to_player(&mut self, id: PlayerId) -> Vec<TimerEvent> {
        if !self.state.game_started {
            return Vec::new();
        }
        let Some(target) = self.state.index_of(id) else {
            return Vec::new();
        };
        let candidate = &self.state.players[target];
        if candidate.is_out_of_round || candidate.is_active {
            return Vec::new();
        }
        let current = self.state.active_index();

        if !self.state.is_running {
            if let Some(i) = current {
                self.state.players[i].is_active = false;
            }
            self.state.players[target].activate(0);
            return vec![TimerEvent::TurnStarted {
                player: id,
                bonus: 0,
            }];
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        if let Some(i) = current {
            events.push(self.close_turn(i, now));
            self.state.players[i].is_revealing = false;
        }
        let bonus = self.config.turn_bonus;
        self.state.players[target].activate(bonus);
        self.restart_turn_clock(now);
        events.push(TimerEvent::TurnStarted { player: id, bonus });
        events
    }

    /// Finish the current turn and hand over to the next eligible seat.
    pub fn next_turn(&mut self) -> Vec<TimerEvent> {
        if !self.state.game_started {
            return Vec::new();
        }
        if self.eligible_count() == 0 {
            return self.end_round();
        }
        let now = self.clock.now();
        let mut events = Vec::new();

        let current = self.state.active_index();
        if let Some(i) = current {
            events.push(self.close_turn(i, now));
            let leaving = &mut self.state.players[i];
            if leaving.is_revealing {
                leaving.is_revealing = false;
                leaving.is_out_of_round = true;
                events.push(TimerEvent::PlayerOut { player: leaving.id });
            }
        }

        // Forward scan over the updated flags. Wraps at most once; the player
        // who just finished is the last candidate.
        let n = self.state.players.len();
        let start = current.map_or(0, |i| i + 1);
        let next = (0..n)
            .map(|step| (start + step) % n)
            .find(|&j| self.state.players[j].is_eligible());

        match next {
            Some(j) => {
                let bonus = self.config.turn_bonus;
                self.state.players[j].activate(bonus);
                events.push(TimerEvent::TurnStarted {
                    player: self.state.players[j].id,
                    bonus,
                });
            }
            None => debug!(
                "round {} has no eligible players left",
                self.state.current_round
            ),
        }

        self.restart_turn_clock(now);
        self.state.is_running = true;
        events
    }

    /// Step back to the previous eligible seat. The player being left is not
    /// scored.
    pub fn previous_turn(&mut self) -> Vec<TimerEvent> {
        if !self.state.game_started {
            return Vec::new();
        }
        let Some(current) = self.state.active_index() else {
            return Vec::new();
        };
        let n = self.state.players.len();
        let Some(previous) = (1..n)
            .map(|step| (current + n - step) % n)
            .find(|&j| self.state.players[j].is_eligible())
        else {
            return Vec::new();
        };

        let now = self.clock.now();
        let bonus = self.config.turn_bonus;
        self.state.players[current].is_active = false;
        self.state.players[previous].activate(bonus);
        self.restart_turn_clock(now);
        self.state.is_running = true;
        vec![TimerEvent::TurnStarted {
            player: self.state.players[previous].id,
            bonus,
        }]
    }

    /// Flag the active player as revealing; they drop out of the round when
    /// their turn ends.
    pub fn start_reveal(&mut self) -> Vec<TimerEvent> {
        let Some(i) = self.state.active_index() else {
            return Vec::new();
        };
        let player = &mut self.state.players[i];
        if player.is_revealing {
            return Vec::new();
        }
        player.is_revealing = true;
        vec![TimerEvent::RevealStarted { player: player.id }]
    }

    /// Close the round: everybody is back in, the next seat in the start
    /// order opens the new round.
    pub fn end_round(&mut self) -> Vec<TimerEvent> {
        if !self.state.game_started || self.state.player_order.is_empty() {
            return Vec::new();
        }
        let now = self.clock.now();
        let state = &mut self.state;
        let finished = state.current_round;

        state.current_order_index = (state.current_order_index + 1) % state.player_order.len();
        let starter_id = state.player_order[state.current_order_index];

        for p in &mut state.players {
            p.is_out_of_round = false;
            p.is_revealing = false;
            p.is_active = false;
            p.turns_completed = 0;
            p.current_turn_efficiency = 0;
        }
        let starter = state.index_of(starter_id).map(|i| {
            state.players[i].activate(self.config.turn_bonus);
            starter_id
        });
        state.current_round += 1;

        self.restart_turn_clock(now);
        self.state.is_running = true;
        info!(
            "round {finished} ended, round {} starts with {starter_id}",
            self.state.current_round
        );
        vec![TimerEvent::RoundEnded {
            round: finished,
            starter,
        }]
    }

    /// Back to the unstarted state: full clocks, zero counters, first seat
    /// active, round 1. Calling it twice is the same as calling it once.
    pub fn reset_game(&mut self) -> Vec<TimerEvent> {
        let now = self.clock.now();
        let completed = match (self.state.game_started, self.state.game_started_at) {
            (true, Some(started)) => Some(GameSummary {
                rounds: self.state.current_round,
                duration_secs: now.saturating_sub(started) / 1000,
                player_count: self.state.players.len(),
            }),
            _ => None,
        };

        let state = &mut self.state;
        let initial = state.initial_time;
        for (i, p) in state.players.iter_mut().enumerate() {
            p.reset(initial);
            p.is_active = i == 0;
        }
        state.is_running = false;
        state.game_started = false;
        state.game_started_at = None;
        state.current_round = 1;
        state.turn_started_at = None;
        state.paused_elapsed = 0;
        state.last_overtime_warning = 0;
        state.player_order.clear();
        state.current_order_index = 0;
        self.ticker.stop();

        if let Some(summary) = &completed {
            info!(
                "game reset after {} rounds ({}s)",
                summary.rounds, summary.duration_secs
            );
        }
        vec![TimerEvent::GameReset { completed }]
    }

    // -----------------------------------------------------------------------
    // Clocks and roster
    // -----------------------------------------------------------------------

    /// Add (or with a negative `delta`, remove) seconds from a player's
    /// clock. Never goes below zero. Allowed in any run state.
    pub fn adjust_time(&mut self, id: PlayerId, delta: i64) -> Vec<TimerEvent> {
        let Some(i) = self.state.index_of(id) else {
            return Vec::new();
        };
        let player = &mut self.state.players[i];
        player.adjust_time(delta);
        vec![TimerEvent::TimeAdjusted {
            player: id,
            time_remaining: player.time_remaining,
        }]
    }

    pub fn rename_player(&mut self, id: PlayerId, name: String) -> Vec<TimerEvent> {
        let name = name.trim();
        let Some(i) = self.state.index_of(id) else {
            return Vec::new();
        };
        if name.is_empty() || self.state.players[i].name == name {
            return Vec::new();
        }
        self.state.players[i].name = name.to_string();
        vec![TimerEvent::RosterChanged]
    }

    pub fn set_player_color(&mut self, id: PlayerId, color: PlayerColor) -> Vec<TimerEvent> {
        let Some(i) = self.state.index_of(id) else {
            return Vec::new();
        };
        if self.state.players[i].color == color {
            return Vec::new();
        }
        self.state.players[i].color = color;
        vec![TimerEvent::RosterChanged]
    }

    /// Drag-reorder: take `dragged` out and insert it at `target`'s seat.
    pub fn move_player(&mut self, dragged: PlayerId, target: PlayerId) -> Vec<TimerEvent> {
        if dragged == target {
            return Vec::new();
        }
        let (Some(from), Some(to)) = (self.state.index_of(dragged), self.state.index_of(target))
        else {
            return Vec::new();
        };
        let player = self.state.players.remove(from);
        self.state.players.insert(to, player);
        vec![TimerEvent::RosterChanged]
    }

    /// Change the starting clock. Only before the game starts; every
    /// player's clock is set to the new value.
    pub fn set_initial_time(&mut self, seconds: u32) -> Vec<TimerEvent> {
        if self.state.game_started {
            return Vec::new();
        }
        self.state.initial_time = seconds;
        for p in &mut self.state.players {
            p.time_remaining = seconds;
        }
        vec![TimerEvent::RosterChanged]
    }

    // -----------------------------------------------------------------------
    // Countdown
    // -----------------------------------------------------------------------

    /// Apply every countdown tick that has come due. Returns overtime
    /// warnings; plain decrements produce no events.
    pub fn poll(&mut self) -> Vec<TimerEvent> {
        if !self.state.is_running {
            self.ticker.stop();
            return Vec::new();
        }
        let due = self.ticker.due(self.clock.now());
        due.into_iter().filter_map(|at| self.tick(at)).collect()
    }

    fn tick(&mut self, at: Millis) -> Option<TimerEvent> {
        let i = self.state.active_index()?;
        let turn_seconds = self.turn_seconds_at(at);
        let par = i64::from(self.config.par_seconds);

        let player = &mut self.state.players[i];
        player.time_remaining = player.time_remaining.saturating_sub(1);
        player.current_turn_efficiency = par - i64::from(turn_seconds);

        // A zero interval turns overtime warnings off.
        let level = turn_seconds.checked_div(self.config.overtime_interval)?;
        if i64::from(turn_seconds) > par && level > self.state.last_overtime_warning {
            self.state.last_overtime_warning = level;
            return Some(TimerEvent::Overtime {
                player: player.id,
                turn_seconds,
            });
        }
        None
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn turn_seconds_at(&self, now: Millis) -> u32 {
        if !self.state.game_started {
            return 0;
        }
        match self.state.turn_started_at {
            Some(start) => {
                let running = (now.saturating_sub(start) / 1000) as u32;
                running + self.state.paused_elapsed
            }
            None => self.state.paused_elapsed,
        }
    }

    /// Score and deactivate the player at `index`.
    fn close_turn(&mut self, index: usize, now: Millis) -> TimerEvent {
        let turn_seconds = self.turn_seconds_at(now);
        let efficiency = i64::from(self.config.par_seconds) - i64::from(turn_seconds);
        let player = &mut self.state.players[index];
        player.complete_turn(efficiency);
        TimerEvent::TurnEnded {
            player: player.id,
            turn_seconds,
            efficiency,
        }
    }

    fn restart_turn_clock(&mut self, now: Millis) {
        self.state.turn_started_at = Some(now);
        self.state.paused_elapsed = 0;
        self.state.last_overtime_warning = 0;
        self.ticker.start(now);
    }
}
