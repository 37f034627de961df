//! Wall-clock and monotonic time, plus adjustable clocks and timers.

use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub fn time_since_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn milliseconds_since_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn monotonic_origin() -> Instant {
    static ORIGIN: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

pub fn monotonic_time() -> f64 {
    monotonic_origin().elapsed().as_secs_f64()
}

pub fn monotonic_milliseconds() -> i64 {
    monotonic_origin().elapsed().as_millis() as i64
}

/// A pausable, settable clock. Thread safe; shared across the universe and
/// world threads as the simulation reference clock.
pub struct Clock {
    state: Mutex<ClockState>,
}

struct ClockState {
    running: bool,
    /// Accumulated time up to `anchor`.
    elapsed: f64,
    anchor: Instant,
}

impl Clock {
    pub fn new(start: bool) -> Self {
        Clock {
            state: Mutex::new(ClockState {
                running: start,
                elapsed: 0.0,
                anchor: Instant::now(),
            }),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            state.anchor = Instant::now();
            state.running = true;
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if state.running {
            state.elapsed += state.anchor.elapsed().as_secs_f64();
            state.running = false;
        }
    }

    pub fn time(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.running {
            state.elapsed + state.anchor.elapsed().as_secs_f64()
        } else {
            state.elapsed
        }
    }

    pub fn milliseconds(&self) -> i64 {
        (self.time() * 1000.0) as i64
    }

    pub fn set_time(&self, time: f64) {
        let mut state = self.state.lock().unwrap();
        state.elapsed = time;
        state.anchor = Instant::now();
    }

    pub fn set_milliseconds(&self, millis: i64) {
        self.set_time(millis as f64 / 1000.0);
    }

    pub fn adjust_time(&self, adjustment: f64) {
        let mut state = self.state.lock().unwrap();
        state.elapsed += adjustment;
    }
}

/// A countdown driven by explicit ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameTimer {
    pub time: f32,
    pub time_left: f32,
}

impl GameTimer {
    pub fn new(time: f32) -> Self {
        GameTimer {
            time,
            time_left: time,
        }
    }

    /// Advances the timer, returning true when it fires. Firing resets it.
    pub fn wrap_tick(&mut self, dt: f32) -> bool {
        self.time_left -= dt;
        if self.time_left <= 0.0 {
            self.time_left += self.time.max(f32::EPSILON);
            true
        } else {
            false
        }
    }

    /// Advances without reset; true once expired.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.time_left = (self.time_left - dt).max(0.0);
        self.ready()
    }

    pub fn ready(&self) -> bool {
        self.time_left <= 0.0
    }

    pub fn reset(&mut self) {
        self.time_left = self.time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_accumulates_while_running() {
        let clock = Clock::new(false);
        assert_eq!(clock.time(), 0.0);
        clock.set_time(5.0);
        assert!(clock.time() >= 5.0);
        clock.adjust_time(-1.0);
        assert!(clock.time() >= 4.0 && clock.time() < 4.5);
    }

    #[test]
    fn stopped_clock_is_frozen() {
        let clock = Clock::new(true);
        clock.stop();
        let t1 = clock.time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.time(), t1);
        clock.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.time() > t1);
    }

    #[test]
    fn game_timer_wraps() {
        let mut timer = GameTimer::new(1.0);
        assert!(!timer.wrap_tick(0.5));
        assert!(timer.wrap_tick(0.6));
        assert!(timer.time_left > 0.0);
    }

    #[test]
    fn game_timer_tick_latches() {
        let mut timer = GameTimer::new(1.0);
        assert!(!timer.tick(0.5));
        assert!(timer.tick(0.5));
        assert!(timer.ready());
        timer.reset();
        assert!(!timer.ready());
    }
}
