// Whole-game scenarios against the public `dune_timer_core` API, driven by a
// `ManualClock`. Unit tests in `timer.rs` cover individual transitions; these
// play a table's worth of turns end to end, including a persist/restore in
// the middle.

use std::sync::Arc;

use dune_timer_core::store::{load_state, save_state};
use dune_timer_core::{
    ManualClock, MemoryStore, TimerAction, TimerConfig, TimerEvent, TurnTimer,
};
use dune_timer_protocol::PlayerId;

fn new_game() -> (TurnTimer, ManualClock) {
    let clock = ManualClock::new(1_000);
    (
        TurnTimer::new(TimerConfig::default(), Arc::new(clock.clone())),
        clock,
    )
}

fn time(timer: &TurnTimer, n: u32) -> u32 {
    timer.state().player(PlayerId(n)).unwrap().time_remaining
}

// ---------------------------------------------------------------------------
// Four-player table
// ---------------------------------------------------------------------------

#[test]
fn opening_turns_of_a_four_player_game() {
    let (mut timer, clock) = new_game();

    timer.apply(TimerAction::StartPauseResume);
    assert_eq!(timer.active_player().unwrap().id, PlayerId(1));
    assert_eq!(time(&timer, 1), 660);

    clock.advance_secs(10);
    timer.poll();
    timer.apply(TimerAction::NextTurn);

    let first = timer.state().player(PlayerId(1)).unwrap();
    assert_eq!(first.total_efficiency, 50);
    assert_eq!(first.turns_completed, 1);
    assert_eq!(first.time_remaining, 650);
    assert_eq!(timer.active_player().unwrap().id, PlayerId(2));
    assert_eq!(time(&timer, 2), 660);
}

#[test]
fn reveal_keeps_a_player_out_until_the_round_ends() {
    let (mut timer, clock) = new_game();
    timer.apply(TimerAction::StartPauseResume);
    timer.apply(TimerAction::NextTurn);
    timer.apply(TimerAction::StartReveal);
    clock.advance_secs(45);
    timer.poll();
    timer.apply(TimerAction::NextTurn);

    // Two full laps: player 2 never comes up.
    for _ in 0..6 {
        assert_ne!(timer.active_player().unwrap().id, PlayerId(2));
        clock.advance_secs(20);
        timer.poll();
        timer.apply(TimerAction::NextTurn);
    }
    assert!(timer.state().player(PlayerId(2)).unwrap().is_out_of_round);
    assert_eq!(timer.state().player(PlayerId(2)).unwrap().total_efficiency, 15);

    let events = timer.apply(TimerAction::EndRound);
    assert!(matches!(events[0], TimerEvent::RoundEnded { round: 1, .. }));
    assert!(!timer.state().player(PlayerId(2)).unwrap().is_out_of_round);
    assert_eq!(timer.state().current_round, 2);
}

#[test]
fn a_whole_round_of_reveals_rolls_into_the_next_round() {
    let (mut timer, clock) = new_game();
    timer.apply(TimerAction::StartPauseResume);
    for _ in 0..4 {
        clock.advance_secs(30);
        timer.poll();
        timer.apply(TimerAction::StartReveal);
        timer.apply(TimerAction::NextTurn);
    }
    assert!(timer.active_player().is_none());

    timer.apply(TimerAction::NextTurn);
    assert_eq!(timer.state().current_round, 2);
    assert_eq!(timer.active_player().unwrap().id, PlayerId(2));

    // Round 3 opens with player 3.
    for _ in 0..4 {
        timer.apply(TimerAction::StartReveal);
        timer.apply(TimerAction::NextTurn);
    }
    timer.apply(TimerAction::NextTurn);
    assert_eq!(timer.state().current_round, 3);
    assert_eq!(timer.active_player().unwrap().id, PlayerId(3));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn game_resumes_from_the_store() {
    let (mut timer, clock) = new_game();
    timer.apply(TimerAction::StartPauseResume);
    clock.advance_secs(12);
    timer.poll();
    timer.apply(TimerAction::NextTurn);
    timer.apply(TimerAction::StartPauseResume);

    let mut store = MemoryStore::new();
    save_state(&mut store, timer.state()).unwrap();
    drop(timer);

    let state = load_state(&store).unwrap().unwrap();
    let mut restored = TurnTimer::with_state(TimerConfig::default(), Arc::new(clock.clone()), state);
    assert!(!restored.state().is_running);
    assert_eq!(restored.active_player().unwrap().id, PlayerId(2));
    assert_eq!(time(&restored, 1), 648);

    restored.apply(TimerAction::StartPauseResume);
    clock.advance_secs(3);
    restored.poll();
    assert_eq!(time(&restored, 2), 657);
}
