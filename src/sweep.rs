use crate::debug::format_f64;
use crate::error::CaseError;
use crate::mpopt::PFOpt;
use crate::nose::{extrapolate, NoseDetector};
use crate::pf::{solve_with_fallback, PfOutcome, PfSolution, PowerFlow};
use crate::scenario::Scenario;
use crate::step::{StepController, StepParams, StopReason};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleStatus {
    /// Solved by the power flow.
    Converged,
    /// Estimated past the nose after every solver attempt failed.
    Interpolated,
    /// Recorded for traceability; carries no voltage.
    Failed,
}

/// One point of a PV curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Position in the curve.
    pub step: usize,
    /// Commanded transfer above base, λ (MW).
    pub lambda_mw: f64,
    /// Measured load increase at the scaled buses (MW).
    pub power_mw: f64,
    /// Monitored bus voltage (p.u.).
    pub voltage_pu: f64,
    pub status: SampleStatus,
}

/// PV curve of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveResult {
    pub samples: Vec<Sample>,
    /// Sample of maximum delivered power.
    pub nose_index: usize,
    /// Nose power minus base power (MW).
    pub power_margin: f64,
    /// Nose voltage minus the reference voltage (p.u.).
    pub voltage_margin: f64,
    pub stop_reason: StopReason,
    pub past_nose: bool,
}

impl CurveResult {
    pub fn nose(&self) -> &Sample {
        &self.samples[self.nose_index]
    }

    pub fn power_samples(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power_mw).collect()
    }

    pub fn voltage_samples(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage_pu).collect()
    }

    pub fn statuses(&self) -> Vec<SampleStatus> {
        self.samples.iter().map(|s| s.status).collect()
    }
}

/// Settings shared by every sweep of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOptions {
    pub step: StepParams,
    /// Solver attempts on the upper branch, in order.
    pub fallbacks: Vec<PFOpt>,
    /// Solver attempts once past the nose, in order.
    pub relaxed: Vec<PFOpt>,
    /// Voltage the margin is measured against (p.u.).
    pub reference_voltage: f64,
    pub ignore_transfer_limit: bool,
    /// Record an extrapolated sample when every relaxed attempt fails.
    pub interpolate: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            step: StepParams::default(),
            fallbacks: PFOpt::standard_fallback(false),
            relaxed: PFOpt::relaxed_fallback(false),
            reference_voltage: 0.9,
            ignore_transfer_limit: false,
            interpolate: true,
        }
    }
}

fn monitored_voltage(solution: &PfSolution, monitor: usize) -> f64 {
    solution.vm.get(&monitor).copied().unwrap_or(f64::NAN)
}

/// Traces the PV curve of one scenario.
///
/// The unmodified snapshot is solved first and recorded as sample 0; if it
/// does not converge the case fails with `BaseCaseInfeasible`. Transfer is
/// then increased step by step until the step controller stops.
pub fn run_sweep(
    mut scenario: Scenario,
    opts: &SweepOptions,
    pf: &dyn PowerFlow,
) -> Result<CurveResult, CaseError> {
    let case = scenario
        .contingency
        .map(|c| c.to_string())
        .unwrap_or_else(|| "base".to_string());
    let monitor = scenario.monitor();

    scenario.set_transfer(0.0);
    let base = match solve_with_fallback(pf, &scenario.mpc, &opts.fallbacks, None).0 {
        PfOutcome::Converged(solution) => solution,
        PfOutcome::Failed { reason } => {
            log::warn!("{}: base case infeasible: {}", case, reason);
            return Err(CaseError::BaseCaseInfeasible(reason));
        }
    };
    let base_load = scenario.delivered_load(&base.vm);
    let v0 = monitored_voltage(&base, monitor);

    let mut samples = vec![Sample {
        step: 0,
        lambda_mw: 0.0,
        power_mw: 0.0,
        voltage_pu: v0,
        status: SampleStatus::Converged,
    }];
    let mut detector = NoseDetector::default();
    detector.observe(0, &samples[0]);

    let mut ctl = StepController::new(&opts.step);
    if opts.ignore_transfer_limit {
        ctl = ctl.without_transfer_limit();
    }
    // Commit the base point so its voltage is checked against the floor.
    ctl.on_success(0.0, v0);

    let mut warm = base.v;
    let mut interpolated = false;

    while let Some(step) = ctl.propose() {
        let lambda = ctl.state().cumulative_power + step;
        scenario.set_transfer(lambda);

        let fallbacks = if detector.past_nose() {
            &opts.relaxed
        } else {
            &opts.fallbacks
        };
        let (outcome, attempts) = solve_with_fallback(pf, &scenario.mpc, fallbacks, Some(&warm));

        match outcome {
            PfOutcome::Converged(solution) => {
                let sample = Sample {
                    step: samples.len(),
                    lambda_mw: lambda,
                    power_mw: scenario.delivered_load(&solution.vm) - base_load,
                    voltage_pu: monitored_voltage(&solution, monitor),
                    status: SampleStatus::Converged,
                };
                log::info!(
                    "{}: λ = {} MW, P = {} MW, V = {} p.u. ({} attempt(s))",
                    case,
                    format_f64(sample.lambda_mw),
                    format_f64(sample.power_mw),
                    format_f64(sample.voltage_pu),
                    attempts
                );
                if detector.observe(sample.step, &sample) {
                    log::info!("{}: past the nose, switching to relaxed solver settings", case);
                }
                ctl.on_success(step, sample.voltage_pu);
                samples.push(sample);
                warm = solution.v;
                interpolated = false;
            }
            PfOutcome::Failed { reason } => {
                scenario.set_transfer(ctl.state().cumulative_power);
                log::debug!("{}: step of {} MW failed: {}", case, format_f64(step), reason);
                samples.push(Sample {
                    step: samples.len(),
                    lambda_mw: lambda,
                    power_mw: f64::NAN,
                    voltage_pu: f64::NAN,
                    status: SampleStatus::Failed,
                });

                if detector.past_nose() && opts.interpolate && !interpolated {
                    if let Some((voltage, power)) = extrapolate(&samples, lambda) {
                        let sample = Sample {
                            step: samples.len(),
                            lambda_mw: lambda,
                            power_mw: power,
                            voltage_pu: voltage,
                            status: SampleStatus::Interpolated,
                        };
                        log::info!(
                            "{}: λ = {} MW, V ≈ {} p.u. (interpolated)",
                            case,
                            format_f64(lambda),
                            format_f64(voltage)
                        );
                        detector.observe(sample.step, &sample);
                        samples.push(sample);
                        interpolated = true;
                    }
                }
                ctl.on_failure();
            }
        }
    }

    let stop_reason = ctl.stop_reason().unwrap_or(StopReason::StepBudget);
    let nose_index = detector.nose_index().unwrap_or(0);
    let nose = &samples[nose_index];
    let curve = CurveResult {
        nose_index,
        power_margin: nose.power_mw - samples[0].power_mw,
        voltage_margin: nose.voltage_pu - opts.reference_voltage,
        stop_reason,
        past_nose: detector.past_nose(),
        samples,
    };
    log::info!(
        "{}: nose at {} MW, {} p.u. after {} samples ({:?})",
        case,
        format_f64(curve.nose().power_mw),
        format_f64(curve.nose().voltage_pu),
        curve.samples.len(),
        curve.stop_reason
    );
    Ok(curve)
}
