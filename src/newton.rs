use crate::debug::format_f64;
use crate::dense::Mat;
use crate::jac::{d_sbus_d_v, make_jac};
use crate::mpopt::PFOpt;
use crate::sbus::SBus;
use crate::traits::LinearSolver;
use num_complex::Complex64;

/// Mismatch norm above which an iteration is treated as diverged.
const DIVERGENCE_NORM: f64 = 1e10;

/// Backtracking line search: number of trials and step reduction per trial.
const LS_MAX_TRIALS: usize = 5;
const LS_REDUCTION: f64 = 0.25;

pub trait ProgressMonitor {
    fn update(&self, i: usize, norm_f: f64);
}

/// Reports the mismatch of each iteration at trace level.
pub struct LogProgress {}

impl ProgressMonitor for LogProgress {
    fn update(&self, i: usize, norm_f: f64) {
        if i == 0 {
            log::trace!(" it    max P & Q mismatch (p.u.)");
        }
        log::trace!("{:>3}        {}", i, format_f64(norm_f));
    }
}

pub(crate) fn norm_inf(f: &[f64]) -> f64 {
    if f.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    f.iter().fold(0.0, |m, v| m.max(v.abs()))
}

/// Complex power mismatch `V .* conj(Ybus * V) - Sbus(|V|)` at every bus.
pub(crate) fn mismatch(y_bus: &Mat<Complex64>, s_bus: &dyn SBus, v: &[Complex64]) -> Vec<Complex64> {
    let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();
    let i_bus = y_bus.mat_vec(v);
    let s = s_bus.s_bus(&vm);
    v.iter()
        .zip(&i_bus)
        .zip(&s)
        .map(|((v, i), s)| *v * i.conj() - *s)
        .collect()
}

/// Stacks the real mismatch of the PV and PQ buses over the reactive
/// mismatch of the PQ buses.
fn mismatch_vector(mis: &[Complex64], pv_pq: &[usize], pq: &[usize]) -> Vec<f64> {
    pv_pq
        .iter()
        .map(|&i| mis[i].re)
        .chain(pq.iter().map(|&i| mis[i].im))
        .collect()
}

/// Applies a scaled Newton update to the polar voltage components.
fn update_voltage(
    va: &[f64],
    vm: &[f64],
    dx: &[f64],
    t: f64,
    pv: &[usize],
    pq: &[usize],
) -> Vec<Complex64> {
    let mut va = va.to_vec();
    let mut vm = vm.to_vec();

    // set up indexing for updating V
    let npv = pv.len();
    let npq = pq.len();
    let (j1, j2) = (0, npv); // j1:j2 - V angle of pv buses
    let (j3, j4) = (j2, j2 + npq); // j3:j4 - V angle of pq buses
    let (j5, j6) = (j4, j4 + npq); // j5:j6 - V mag of pq buses

    pv.iter().zip(j1..j2).for_each(|(&i, j)| va[i] += t * dx[j]);
    pq.iter().zip(j3..j4).for_each(|(&i, j)| va[i] += t * dx[j]);
    pq.iter().zip(j5..j6).for_each(|(&i, j)| vm[i] += t * dx[j]);

    vm.iter()
        .zip(&va)
        .map(|(&m, &a)| Complex64::from_polar(m, a))
        .collect()
}

/// Solves power flow using full Newton's method (power/polar).
///
/// With `line_search` each update is damped by backtracking until the
/// infinity norm of the mismatch decreases. Returns the final voltage,
/// whether the tolerance was met and the number of iterations taken.
/// Diverging iterations stop early and report non-convergence.
pub(crate) fn newtonpf(
    y_bus: &Mat<Complex64>,
    s_bus: &dyn SBus,
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
    opt: &PFOpt,
    line_search: bool,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<Complex64>, bool, usize), String> {
    let pv_pq = [pv, pq].concat();

    let tol = opt.tolerance;
    let max_it = opt.max_it;

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();

    // evaluate F(x0)
    let mut f = mismatch_vector(&mismatch(y_bus, s_bus, &v), &pv_pq, pq);

    // check tolerance
    let mut norm_f = norm_inf(&f);
    if let Some(pm) = progress {
        pm.update(i, norm_f);
    }
    if norm_f < tol {
        converged = true;
    }

    // do Newton iterations
    while !converged && i < max_it {
        i += 1;

        let va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
        let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

        // evaluate Jacobian
        let (d_sbus_d_va, d_sbus_d_vm) = d_sbus_d_v(y_bus, &v);
        let d_sd_d_vm = s_bus.d_sbus_d_vm(&vm);
        let jac = make_jac(&d_sbus_d_va, &d_sbus_d_vm, &d_sd_d_vm, pv, pq)?;

        // compute update step
        let neg_f: Vec<f64> = f.iter().map(|f| -f).collect();
        let dx = match lin_solver.solve(jac, &neg_f) {
            Ok(dx) => dx,
            Err(err) => {
                log::debug!("Newton iteration {}: {}", i, err);
                return Ok((v, false, i));
            }
        };

        let mut t = 1.0;
        let mut v_new = update_voltage(&va, &vm, &dx, t, pv, pq);
        let mut f_new = mismatch_vector(&mismatch(y_bus, s_bus, &v_new), &pv_pq, pq);
        if line_search {
            let mut trial = 1;
            while !(norm_inf(&f_new) < norm_f) && trial < LS_MAX_TRIALS {
                t *= LS_REDUCTION;
                v_new = update_voltage(&va, &vm, &dx, t, pv, pq);
                f_new = mismatch_vector(&mismatch(y_bus, s_bus, &v_new), &pv_pq, pq);
                trial += 1;
            }
            if t < 1.0 {
                log::trace!("line search step {}", format_f64(t));
            }
        }
        v = v_new;
        f = f_new;

        // check for convergence
        norm_f = norm_inf(&f);
        if let Some(pm) = progress {
            pm.update(i, norm_f);
        }
        if !norm_f.is_finite() || norm_f > DIVERGENCE_NORM {
            log::debug!("Newton's method diverged at iteration {}", i);
            return Ok((v, false, i));
        }
        if norm_f < tol {
            converged = true;
            log::debug!(
                "Newton's method power flow (power balance, polar) converged in {} iterations.",
                i
            );
        }
    }

    if !converged {
        log::debug!(
            "Newton's method power flow (power balance, polar) did not converge in {} iterations.",
            i
        );
    }

    Ok((v, converged, i))
}
