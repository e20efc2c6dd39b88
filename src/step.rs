use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Consecutive solver failures after which a sweep gives up.
pub const FAILURE_CAP: usize = 15;

/// Adaptive step size parameters of a sweep.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct StepParams {
    /// Transfer increment of the first step (MW).
    pub initial_step: f64,

    /// Smallest increment tried before giving up (MW).
    pub min_step: f64,

    /// Divisor applied to the step after a failed solve.
    pub reduction_factor: f64,

    /// Consecutive failures after which the sweep stops.
    pub failure_cap: usize,

    /// Monitored voltage (p.u.) below which the sweep stops.
    pub voltage_floor: f64,

    /// Optional ceiling on the cumulative transfer (MW).
    pub max_transfer: Option<f64>,

    /// Upper bound on the number of step attempts.
    pub max_steps: usize,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            initial_step: 100.0,
            min_step: 10.0,
            reduction_factor: 2.0,
            failure_cap: FAILURE_CAP,
            voltage_floor: 0.3,
            max_transfer: None,
            max_steps: 1000,
        }
    }
}

impl StepParamsBuilder {
    fn validate(&self) -> Result<(), String> {
        let d = StepParams::default();
        StepParams {
            initial_step: self.initial_step.unwrap_or(d.initial_step),
            min_step: self.min_step.unwrap_or(d.min_step),
            reduction_factor: self.reduction_factor.unwrap_or(d.reduction_factor),
            failure_cap: self.failure_cap.unwrap_or(d.failure_cap),
            voltage_floor: self.voltage_floor.unwrap_or(d.voltage_floor),
            max_transfer: self.max_transfer.unwrap_or(d.max_transfer),
            max_steps: self.max_steps.unwrap_or(d.max_steps),
        }
        .check()
    }
}

impl StepParams {
    /// Checks the parameter ranges.
    pub fn check(&self) -> Result<(), String> {
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return Err(format!("initial step must be positive: {}", self.initial_step));
        }
        if !(self.min_step.is_finite() && self.min_step > 0.0) {
            return Err(format!("minimum step must be positive: {}", self.min_step));
        }
        if self.min_step > self.initial_step {
            return Err(format!(
                "minimum step ({}) exceeds initial step ({})",
                self.min_step, self.initial_step
            ));
        }
        if !(self.reduction_factor.is_finite() && self.reduction_factor > 1.0) {
            return Err(format!(
                "step reduction factor must be greater than 1: {}",
                self.reduction_factor
            ));
        }
        if self.failure_cap == 0 {
            return Err("failure cap must be at least 1".to_string());
        }
        if !(self.voltage_floor.is_finite() && self.voltage_floor >= 0.0) {
            return Err(format!("voltage floor must be non-negative: {}", self.voltage_floor));
        }
        if let Some(m) = self.max_transfer {
            if !(m.is_finite() && m > 0.0) {
                return Err(format!("maximum transfer must be positive: {}", m));
            }
        }
        if self.max_steps == 0 {
            return Err("step budget must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Step shrank below the minimum after a failure.
    StepBelowMinimum,
    /// Too many consecutive solver failures.
    FailureCap,
    /// Monitored voltage fell below the floor.
    VoltageFloor,
    /// Next step would exceed the maximum transfer.
    TransferLimit,
    /// Step attempt budget exhausted.
    StepBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StepPhase {
    Stepping,
    Shrinking,
    Stopped(StopReason),
}

/// State of the adaptive step controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepState {
    pub current_step: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub reduction_factor: f64,
    pub consecutive_failures: usize,
    /// Cumulative committed transfer, λ (MW).
    pub cumulative_power: f64,
    pub phase: StepPhase,
    /// Step attempts made so far.
    pub attempts: usize,
}

/// Adaptive step size state machine.
///
/// `propose` returns the next increment; the caller solves at
/// `cumulative_power + step` and reports back through `on_success` or
/// `on_failure`. Only a success commits the increment.
#[derive(Debug, Clone)]
pub struct StepController {
    params: StepParams,
    state: StepState,
    enforce_transfer_limit: bool,
}

impl StepController {
    pub fn new(params: &StepParams) -> Self {
        Self {
            state: StepState {
                current_step: params.initial_step,
                initial_step: params.initial_step,
                min_step: params.min_step,
                reduction_factor: params.reduction_factor,
                consecutive_failures: 0,
                cumulative_power: 0.0,
                phase: StepPhase::Stepping,
                attempts: 0,
            },
            params: params.clone(),
            enforce_transfer_limit: true,
        }
    }

    /// Ignores `max_transfer`, letting the sweep run to collapse.
    pub fn without_transfer_limit(mut self) -> Self {
        self.enforce_transfer_limit = false;
        self
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state.phase {
            StepPhase::Stopped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_reason().is_some()
    }

    fn stop(&mut self, reason: StopReason) {
        log::debug!("step controller stopped: {:?}", reason);
        self.state.phase = StepPhase::Stopped(reason);
    }

    /// Next transfer increment (MW), or `None` once stopped.
    pub fn propose(&mut self) -> Option<f64> {
        if self.is_stopped() {
            return None;
        }
        if self.state.attempts >= self.params.max_steps {
            self.stop(StopReason::StepBudget);
            return None;
        }
        if let (true, Some(limit)) = (self.enforce_transfer_limit, self.params.max_transfer) {
            if self.state.cumulative_power + self.state.current_step > limit {
                self.stop(StopReason::TransferLimit);
                return None;
            }
        }
        self.state.attempts += 1;
        Some(self.state.current_step)
    }

    /// Commits a converged step. `voltage` is the monitored voltage of the
    /// recorded sample.
    pub fn on_success(&mut self, step: f64, voltage: f64) {
        self.state.cumulative_power += step;
        self.state.consecutive_failures = 0;
        self.state.phase = StepPhase::Stepping;
        if voltage < self.params.voltage_floor {
            self.stop(StopReason::VoltageFloor);
        }
    }

    /// Discards a failed step and shrinks the next one.
    pub fn on_failure(&mut self) {
        self.state.consecutive_failures += 1;
        self.state.phase = StepPhase::Shrinking;
        self.state.current_step /= self.state.reduction_factor;

        if self.state.consecutive_failures >= self.params.failure_cap {
            self.stop(StopReason::FailureCap);
        } else if self.state.current_step < self.state.min_step {
            self.stop(StopReason::StepBelowMinimum);
        } else {
            self.state.phase = StepPhase::Stepping;
        }
    }
}
