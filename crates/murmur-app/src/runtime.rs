//! Headless fixed-step driver for the flock world.

use std::sync::{Arc, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::SharedWorld;
use crate::command::{CommandReceiver, drain_pending_commands};

/// Pacing and logging knobs for the tick loop.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    /// Seconds of simulated time advanced per step.
    pub dt: f32,
    /// Emit a summary log line every this many ticks; zero disables logging.
    pub log_interval: u64,
    /// Sleep between pause-flag rechecks while the loop is held.
    pub pause_poll: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            dt: 0.02,
            log_interval: 120,
            pause_poll: Duration::from_millis(10),
        }
    }
}

/// Owns the tick loop: drains queued commands at every boundary, then steps
/// the world unless the shared pause flag is set.
pub struct TickRunner {
    world: SharedWorld,
    receiver: CommandReceiver,
    paused: Arc<AtomicBool>,
    settings: RunnerSettings,
}

impl TickRunner {
    #[must_use]
    pub fn new(
        world: SharedWorld,
        receiver: CommandReceiver,
        paused: Arc<AtomicBool>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            world,
            receiver,
            paused,
            settings,
        }
    }

    /// Drain pending commands, then advance one step unless paused.
    /// Returns whether a step ran.
    pub fn tick_once(&mut self) -> bool {
        // The world stays step-consistent between locks, so a poisoned
        // guard is still safe to reuse.
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        drain_pending_commands(&self.receiver, &mut world);
        if self.paused.load(Ordering::Relaxed) {
            return false;
        }
        let summary = world.step(self.settings.dt);
        drop(world);

        if self.settings.log_interval > 0 && summary.tick.0 % self.settings.log_interval == 0 {
            info!(
                tick = summary.tick.0,
                agents = summary.active,
                avg_speed = summary.average_speed,
                max_speed = summary.max_speed,
                "flock summary"
            );
        }
        true
    }

    /// Run until `steps` simulation steps have completed. Pauses hold the
    /// loop (commands keep draining) without counting toward `steps`.
    pub fn run_steps(&mut self, steps: u64) {
        let mut completed = 0;
        while completed < steps {
            if self.tick_once() {
                completed += 1;
            } else {
                thread::sleep(self.settings.pause_poll);
            }
        }
    }
}
