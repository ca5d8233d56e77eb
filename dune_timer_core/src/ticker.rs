// Cancellable periodic tick schedule.
//
// `Ticker` replaces a free-running interval timer with an explicit schedule
// owned by `TurnTimer`: it is started whenever the timer starts running (and
// restarted on every turn change, so ticks line up with the turn clock) and
// stopped on pause or reset. It never sleeps and owns no thread. The owner
// asks `due(now)` for every tick instant that has come due since the last
// call, which lets a driver loop wake on `time_until_next` and lets tests
// jump a `ManualClock` forward by whole minutes in one step.

use std::time::Duration;

use dune_timer_protocol::Millis;

/// Periodic schedule of tick instants.
#[derive(Clone, Debug)]
pub struct Ticker {
    interval_ms: u64,
    next_due: Option<Millis>,
}

impl Ticker {
    /// Create a stopped ticker. Intervals under 1 ms are clamped to 1 ms.
    pub fn new(interval: Duration) -> Self {
        let interval_ms = (interval.as_millis() as u64).max(1);
        Self {
            interval_ms,
            next_due: None,
        }
    }

    /// (Re)start the schedule; the first tick falls one interval after `now`.
    pub fn start(&mut self, now: Millis) {
        self.next_due = Some(now + self.interval_ms);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Instants of every tick due at or before `now`, oldest first. Advances
    /// the schedule past them.
    pub fn due(&mut self, now: Millis) -> Vec<Millis> {
        let mut ticks = Vec::new();
        if let Some(mut next) = self.next_due {
            while next <= now {
                ticks.push(next);
                next += self.interval_ms;
            }
            self.next_due = Some(next);
        }
        ticks
    }

    /// How long until the next tick, or `None` while stopped.
    pub fn time_until_next(&self, now: Millis) -> Option<Duration> {
        self.next_due
            .map(|next| Duration::from_millis(next.saturating_sub(now)))
    }
}
