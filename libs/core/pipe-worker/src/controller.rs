//! Hill-climb rate controller
//!
//! Once per window the controller compares how many messages finished in the
//! window with the previous window and moves the concurrency limit one step.
//! It keeps stepping in the same direction while throughput holds or grows,
//! and reverses when throughput drops.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::gate::AdmissionGate;
use crate::metrics::PipeMetrics;

/// What a controller tick did to the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Nothing finished in the window.
    Skipped,
    Raised,
    Lowered,
    /// Downscaling, but the limit is already at the minimum.
    AtMinimum,
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub processed: u64,
    pub limit: usize,
    pub adjustment: Adjustment,
}

/// Adaptive concurrency controller for one pipe.
pub struct RateController {
    gate: Arc<AdmissionGate>,
    window: Duration,
    previous: u64,
    upscale: bool,
    metrics: PipeMetrics,
}

impl RateController {
    pub fn new(gate: Arc<AdmissionGate>, window: Duration, metrics: PipeMetrics) -> Self {
        Self {
            gate,
            window,
            previous: 0,
            upscale: true,
            metrics,
        }
    }

    /// Apply one window.
    pub fn tick(&mut self) -> Tick {
        let processed = self.gate.take_processed();
        self.metrics.window_size(processed);
        if processed == 0 {
            return Tick {
                processed,
                limit: self.gate.limit(),
                adjustment: Adjustment::Skipped,
            };
        }

        if processed < self.previous {
            self.upscale = !self.upscale;
        }

        let adjustment = if self.upscale {
            self.gate.raise();
            Adjustment::Raised
        } else if self.gate.lower().is_some() {
            Adjustment::Lowered
        } else {
            Adjustment::AtMinimum
        };
        self.previous = processed;

        let limit = self.gate.limit();
        self.metrics.concurrency_limit(limit);

        Tick {
            processed,
            limit,
            adjustment,
        }
    }

    /// Tick once per window until cancelled. The first tick fires one full
    /// window after start.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = interval_at(tokio::time::Instant::now() + self.window, self.window);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let tick = self.tick();
                    debug!(
                        processed = tick.processed,
                        rate = tick.processed as f64 / self.window.as_secs_f64(),
                        limit = tick.limit,
                        adjustment = ?tick.adjustment,
                        "Rate controller tick"
                    );
                }
            }
        }
        debug!("Rate controller stopped");
    }
}
