// Circuit breaker guarding the downstream booking API

use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    failure_threshold: u32,
    success_threshold: u32,
    open_duration: Duration,
    state: State,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        open_duration: Duration,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_duration,
            state: State::Closed { failures: 0 },
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> BreakerState {
        match self.state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    // Remaining cool-down while open
    pub fn retry_after(&self) -> Option<Duration> {
        match self.state {
            State::Open { opened_at } => Some(self.open_duration.saturating_sub(opened_at.elapsed())),
            _ => None,
        }
    }

    pub fn should_allow_call(&mut self) -> bool {
        match &self.state {
            State::Closed { .. } | State::HalfOpen { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.open_duration {
                    self.state = State::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn success(&mut self) {
        match &mut self.state {
            State::Closed { failures } => *failures = 0,
            State::HalfOpen { successes } => {
                *successes += 1;
                if *successes >= self.success_threshold {
                    self.state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn fail(&mut self) {
        match &mut self.state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    warn!(service = %self.service_name, failures = *failures, "circuit breaker opened");
                    self.state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                warn!(service = %self.service_name, "probe failed, circuit breaker reopened");
                self.state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }
}
