//! Flight lifecycle schedule.
//!
//! A flight moves through four states:
//! 1. **Pending** - created and accepting bets
//! 2. **Loading** - countdown to launch, still accepting bets
//! 3. **Flying** - multiplier grows each tick, bets can only be cashed out
//! 4. **Exploded** - terminal; the engine seeds the next pending flight after a cooldown
//!
//! This module only decides *what* comes next and *how long* to wait. The server's engine
//! performs the writes and the sleeps.

use grandaviator_types::FlightState;

pub const DEFAULT_COUNTDOWN_MS: u64 = 14_000;
pub const DEFAULT_COUNTDOWN_STEP_MS: u64 = 1_000;
pub const DEFAULT_TICK_MS: u64 = 120;
pub const DEFAULT_COOLDOWN_MS: u64 = 4_000;

/// Phase timing in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Time from the start of the countdown until launch.
    pub countdown_ms: u64,
    /// Interval between loading broadcasts during the countdown.
    pub countdown_step_ms: u64,
    /// Period of multiplier growth and settlement.
    pub tick_ms: u64,
    /// Pause after an explosion before the next flight starts.
    pub cooldown_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            countdown_step_ms: DEFAULT_COUNTDOWN_STEP_MS,
            tick_ms: DEFAULT_TICK_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl PhaseConfig {
    /// Validate the configuration (all durations must be > 0).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.countdown_ms == 0 {
            return Err("countdown_ms must be greater than zero");
        }
        if self.countdown_step_ms == 0 {
            return Err("countdown_step_ms must be greater than zero");
        }
        if self.tick_ms == 0 {
            return Err("tick_ms must be greater than zero");
        }
        if self.cooldown_ms == 0 {
            return Err("cooldown_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn countdown(&self) -> Countdown {
        Countdown {
            remaining_ms: self.countdown_ms,
            step_ms: self.countdown_step_ms.max(1),
            launched: false,
        }
    }
}

/// Where the engine picks a flight up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumePoint {
    /// Run the countdown, then launch.
    Countdown,
    /// Already flying; go straight to ticking.
    Ticks,
    /// Finished; a new flight is needed.
    Replace,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoundScheduler;

impl RoundScheduler {
    /// State following `state`, or `None` once exploded.
    pub fn next_state(state: FlightState) -> Option<FlightState> {
        match state {
            FlightState::Pending => Some(FlightState::Loading),
            FlightState::Loading => Some(FlightState::Flying),
            FlightState::Flying => Some(FlightState::Exploded),
            FlightState::Exploded => None,
        }
    }

    pub fn resume_point(state: FlightState) -> ResumePoint {
        match state {
            FlightState::Pending | FlightState::Loading => ResumePoint::Countdown,
            FlightState::Flying => ResumePoint::Ticks,
            FlightState::Exploded => ResumePoint::Replace,
        }
    }

    /// Order in which existing flights are looked up before a new one is created.
    pub fn recovery_order() -> [FlightState; 3] {
        [FlightState::Flying, FlightState::Loading, FlightState::Pending]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownStep {
    /// Broadcast loading, then wait `wait_ms`.
    Loading { remaining_ms: u64, wait_ms: u64 },
    Launch,
}

/// Countdown to launch, yielding one step per loading broadcast and a final launch.
#[derive(Clone, Debug)]
pub struct Countdown {
    remaining_ms: u64,
    step_ms: u64,
    launched: bool,
}

impl Iterator for Countdown {
    type Item = CountdownStep;

    fn next(&mut self) -> Option<Self::Item> {
        if self.launched {
            return None;
        }
        if self.remaining_ms == 0 {
            self.launched = true;
            return Some(CountdownStep::Launch);
        }
        let remaining_ms = self.remaining_ms;
        let wait_ms = self.step_ms.min(remaining_ms);
        self.remaining_ms -= wait_ms;
        Some(CountdownStep::Loading {
            remaining_ms,
            wait_ms,
        })
    }
}

/// Counts launched flights and forces an explosion every `auto_explode_after` flights.
///
/// A limit of zero disables forced explosions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExplosionCounter {
    launched: u64,
}

impl ExplosionCounter {
    /// Record a launch; returns true if this flight must explode on its first tick.
    pub fn launch(&mut self, auto_explode_after: u64) -> bool {
        self.launched = self.launched.saturating_add(1);
        if auto_explode_after == 0 || self.launched < auto_explode_after {
            return false;
        }
        self.launched = 0;
        true
    }

    pub fn launched(&self) -> u64 {
        self.launched
    }
}
