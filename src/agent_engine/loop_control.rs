use std::time::{Duration, Instant};

/// Bounds the autonomous loop: an iteration cap plus an optional wall-clock budget.
pub struct LoopController {
    max_iterations: u32,
    max_duration: Option<Duration>,
    start_time: Instant,
    iterations: u32,
    failure_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    TimeBudget,
}

impl LoopController {
    pub fn new(max_iterations: u32, max_duration_minutes: Option<u32>) -> Self {
        Self {
            max_iterations,
            max_duration: max_duration_minutes.map(|m| Duration::from_secs(u64::from(m) * 60)),
            start_time: Instant::now(),
            iterations: 0,
            failure_count: 0,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Claim the next iteration number, or the reason the loop must stop.
    pub fn next_iteration(&mut self) -> Result<u32, StopReason> {
        if self.iterations >= self.max_iterations {
            return Err(StopReason::MaxIterations);
        }
        if let Some(budget) = self.max_duration {
            if self.start_time.elapsed() >= budget {
                return Err(StopReason::TimeBudget);
            }
        }
        self.iterations += 1;
        Ok(self.iterations)
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn failures(&self) -> u32 {
        self.failure_count
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}
