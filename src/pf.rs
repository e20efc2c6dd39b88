use crate::bus_types::bus_types;
use crate::debug::format_polar_vec;
use crate::gauss::gausspf;
use crate::mpc::MPC;
use crate::mpopt::{Alg, InitMode, PFOpt};
use crate::newton::{mismatch, newtonpf, LogProgress};
use crate::sbus::MakeSBus;
use crate::traits::{DenseLU, LinearSolver};
use crate::ybus::make_ybus;

use num_complex::Complex64;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Solved operating point of a case.
#[derive(Debug, Clone, PartialEq)]
pub struct PfSolution {
    /// Complex bus voltages in case bus order (p.u.).
    pub v: Vec<Complex64>,
    /// Voltage magnitude by external bus number (p.u.).
    pub vm: HashMap<usize, f64>,
    /// Total iterations, including Q limit re-solves.
    pub iterations: usize,
}

/// Normalized result of one power flow attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PfOutcome {
    Converged(PfSolution),
    Failed { reason: String },
}

impl PfOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, PfOutcome::Converged(_))
    }

    pub fn solution(&self) -> Option<&PfSolution> {
        match self {
            PfOutcome::Converged(s) => Some(s),
            PfOutcome::Failed { .. } => None,
        }
    }
}

/// Steady-state solver seen by the sweep.
///
/// Implementations must report non-convergence, singular Jacobians and
/// numerical blow-up as `Failed`; they never panic on a bad operating point.
pub trait PowerFlow: Send + Sync {
    fn solve(&self, mpc: &MPC, opt: &PFOpt, warm: Option<&[Complex64]>) -> PfOutcome;
}

/// In-house dense AC power flow.
#[derive(Debug, Default, Clone)]
pub struct RunPF<L: LinearSolver = DenseLU> {
    pub lin_solver: L,
}

impl RunPF<DenseLU> {
    pub fn new() -> Self {
        Self { lin_solver: DenseLU }
    }
}

impl<L> PowerFlow for RunPF<L>
where
    L: LinearSolver + Send + Sync,
{
    fn solve(&self, mpc: &MPC, opt: &PFOpt, warm: Option<&[Complex64]>) -> PfOutcome {
        match runpf(mpc, opt, warm, &self.lin_solver) {
            Ok((v, true, iterations)) => {
                let vm = mpc
                    .bus
                    .iter()
                    .zip(&v)
                    .map(|(b, v)| (b.bus_i, v.norm()))
                    .collect();
                PfOutcome::Converged(PfSolution { v, vm, iterations })
            }
            Ok((_, false, iterations)) => PfOutcome::Failed {
                reason: format!(
                    "{:?} did not converge in {} iterations",
                    opt.algorithm, iterations
                ),
            },
            Err(reason) => PfOutcome::Failed { reason },
        }
    }
}

/// Initial voltage vector for the requested start mode.
fn initial_voltage(mpc: &MPC, opt: &PFOpt, warm: Option<&[Complex64]>) -> Vec<Complex64> {
    let case_data = || -> Vec<Complex64> {
        mpc.bus
            .iter()
            .map(|b| Complex64::from_polar(b.vm, b.va * PI / 180.0))
            .collect()
    };
    match opt.init {
        InitMode::Flat => vec![Complex64::new(1.0, 0.0); mpc.bus.len()],
        InitMode::CaseData => case_data(),
        InitMode::Warm => match warm {
            // De-energized buses come back as zero; start them from case data.
            Some(v) if v.len() == mpc.bus.len() => v
                .iter()
                .zip(case_data())
                .map(|(&w, c)| if w.norm() > 0.0 { w } else { c })
                .collect(),
            _ => case_data(),
        },
    }
}

/// Runs an AC power flow on `mpc`.
///
/// Returns the bus voltages, whether the solution converged and the number of
/// iterations. Buses with no path to a reference bus are not solved and
/// come back with zero voltage. With `enforce_q_limits` generators at PV buses that violate
/// their reactive limits are fixed at the limit, their buses are converted
/// to PQ and the case is re-solved until no limit is violated.
pub fn runpf(
    mpc: &MPC,
    opt: &PFOpt,
    warm: Option<&[Complex64]>,
    lin_solver: &dyn LinearSolver,
) -> Result<(Vec<Complex64>, bool, usize), String> {
    if mpc.bus.is_empty() {
        return Err("case contains no connected buses".to_string());
    }
    let base_mva = mpc.base_mva;
    let bus = &mpc.bus;
    let mut gen = mpc.gen.clone();
    let e2i = mpc.bus_index();

    // get bus index lists of each type of bus
    let (ref_, mut pv, mut pq) = bus_types(bus, &gen);
    if ref_.is_empty() {
        return Err("case has no reference bus with a generator in service".to_string());
    }

    // Buses cut off from every reference bus are left out of the solve.
    let energized = mpc.energized_buses();
    let dead: Vec<usize> = (0..bus.len())
        .filter(|&k| !energized.contains(&bus[k].bus_i))
        .collect();
    if !dead.is_empty() {
        log::debug!(
            "{} bus(es) not connected to a reference bus: {:?}",
            dead.len(),
            dead.iter().map(|&k| bus[k].bus_i).collect::<Vec<usize>>()
        );
        pv.retain(|k| !dead.contains(k));
        pq.retain(|k| !dead.contains(k));
    }
    let de_energize = |mut v: Vec<Complex64>| -> Vec<Complex64> {
        for &k in &dead {
            v[k] = Complex64::default();
        }
        v
    };

    let mut v0 = initial_voltage(mpc, opt, warm);
    for g in gen.iter().filter(|g| g.is_on()) {
        if let Some(&i) = e2i.get(&g.gen_bus) {
            if !pq.contains(&i) {
                let m = v0[i].norm();
                v0[i] = if m > 0.0 { v0[i] / m * g.vg } else { Complex64::new(g.vg, 0.0) };
            }
        }
    }

    let y_bus = make_ybus(base_mva, bus, &mpc.branch, &e2i)?;

    let progress = LogProgress {};
    let mut its = 0;
    loop {
        let s_bus = MakeSBus {
            base_mva,
            bus,
            gen: &gen,
            e2i: &e2i,
            zip: mpc.zip_loads,
        };
        let (v, success, iterations) = match opt.algorithm {
            Alg::NR | Alg::NRLineSearch => newtonpf(
                &y_bus,
                &s_bus,
                &v0,
                &pv,
                &pq,
                lin_solver,
                opt,
                opt.algorithm == Alg::NRLineSearch,
                Some(&progress),
            )?,
            Alg::GS => gausspf(&y_bus, &s_bus, &v0, &pv, &pq, opt, Some(&progress))?,
        };
        its += iterations;

        if !success || !opt.enforce_q_limits || pv.is_empty() {
            log::trace!("V = {}", format_polar_vec(&v));
            return Ok((de_energize(v), success, its));
        }

        // Reactive generation needed at each PV bus: the mismatch is the
        // shortfall of the generators' current output.
        let mis = mismatch(&y_bus, &s_bus, &v);

        let mut limited = Vec::new();
        for &k in &pv {
            let at_bus: Vec<usize> = gen
                .iter()
                .enumerate()
                .filter(|(_, g)| g.is_on() && g.gen_bus == bus[k].bus_i)
                .map(|(i, _)| i)
                .collect();
            let q_bus = mis[k].im * base_mva + at_bus.iter().map(|&gi| gen[gi].qg).sum::<f64>();
            let share = q_bus / at_bus.len().max(1) as f64;
            let mut hit = false;
            for &gi in &at_bus {
                let g = &mut gen[gi];
                if share > g.qmax {
                    g.qg = g.qmax;
                    hit = true;
                } else if share < g.qmin {
                    g.qg = g.qmin;
                    hit = true;
                } else {
                    g.qg = share;
                }
            }
            if hit {
                limited.push(k);
            }
        }
        if limited.is_empty() {
            return Ok((de_energize(v), success, its));
        }

        log::debug!(
            "{} gen bus(es) at reactive limit, switching to PQ: {:?}",
            limited.len(),
            limited.iter().map(|&k| bus[k].bus_i).collect::<Vec<usize>>()
        );
        pv.retain(|k| !limited.contains(k));
        pq.extend(limited);
        pq.sort_unstable();
        v0 = v;
    }
}

/// Tries each option in turn until one converges.
///
/// Returns the final outcome and the number of attempts made. When every
/// option fails the reasons of all attempts are joined.
pub fn solve_with_fallback(
    pf: &dyn PowerFlow,
    mpc: &MPC,
    fallbacks: &[PFOpt],
    warm: Option<&[Complex64]>,
) -> (PfOutcome, usize) {
    let mut reasons = Vec::with_capacity(fallbacks.len());
    for (i, opt) in fallbacks.iter().enumerate() {
        match pf.solve(mpc, opt, warm) {
            PfOutcome::Converged(solution) => {
                if i > 0 {
                    log::debug!("converged on fallback attempt {} ({:?})", i + 1, opt.algorithm);
                }
                return (PfOutcome::Converged(solution), i + 1);
            }
            PfOutcome::Failed { reason } => {
                log::debug!("attempt {} ({:?}) failed: {}", i + 1, opt.algorithm, reason);
                reasons.push(reason);
            }
        }
    }
    let reason = if reasons.is_empty() {
        "no solver options given".to_string()
    } else {
        reasons.join("; ")
    };
    (PfOutcome::Failed { reason }, fallbacks.len())
}
