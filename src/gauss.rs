use crate::dense::Mat;
use crate::dense::dot;
use crate::mpopt::PFOpt;
use crate::newton::{mismatch, norm_inf, ProgressMonitor};
use crate::sbus::SBus;
use num_complex::Complex64;

/// Solves the power flow using a Gauss-Seidel method.
///
/// PQ bus voltages are updated in place; PV buses have their reactive
/// injection recomputed and their magnitude restored to the set point.
pub(crate) fn gausspf(
    y_bus: &Mat<Complex64>,
    s_bus: &dyn SBus,
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    opt: &PFOpt,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<Complex64>, bool, usize), String> {
    let pv_pq = [pv, pq].concat();
    let tol = opt.tolerance;
    let max_it = opt.max_it;

    for &k in &pv_pq {
        if y_bus.get(k, k) == Complex64::default() {
            return Err(format!("bus {} has zero self admittance", k));
        }
    }

    let mut v = v0.to_vec();
    let vm_pv: Vec<f64> = pv.iter().map(|&k| v[k].norm()).collect();

    let mismatch_norm = |v: &[Complex64]| -> f64 {
        let mis = mismatch(y_bus, s_bus, v);
        let f: Vec<f64> = pv_pq
            .iter()
            .map(|&i| mis[i].re)
            .chain(pq.iter().map(|&i| mis[i].im))
            .collect();
        norm_inf(&f)
    };

    let mut converged = false;
    let mut i = 0;
    let mut norm_f = mismatch_norm(&v);
    if let Some(pm) = progress {
        pm.update(i, norm_f);
    }
    if norm_f < tol {
        converged = true;
    }

    while !converged && i < max_it {
        i += 1;

        let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();
        let mut s = s_bus.s_bus(&vm);

        // update voltage
        // at PQ buses
        for &k in pq {
            let y_kk = y_bus.get(k, k);
            let i_k = dot(y_bus.row(k), &v);
            let v_k = v[k];
            v[k] = v_k + ((s[k] / v_k).conj() - i_k) / y_kk;
        }
        // at PV buses
        for (&k, &vm_k) in pv.iter().zip(&vm_pv) {
            let y_kk = y_bus.get(k, k);
            let i_k = dot(y_bus.row(k), &v);
            s[k] = Complex64::new(s[k].re, (v[k] * i_k.conj()).im);
            let v_k = v[k];
            v[k] = v_k + ((s[k] / v_k).conj() - i_k) / y_kk;
            v[k] = v[k] / v[k].norm() * vm_k;
        }

        norm_f = mismatch_norm(&v);
        if let Some(pm) = progress {
            pm.update(i, norm_f);
        }
        if !norm_f.is_finite() {
            log::debug!("Gauss-Seidel diverged at iteration {}", i);
            return Ok((v, false, i));
        }
        if norm_f < tol {
            converged = true;
            log::debug!("Gauss-Seidel power flow converged in {} iterations.", i);
        }
    }

    if !converged {
        log::debug!("Gauss-Seidel power flow did not converge in {} iterations.", i);
    }

    Ok((v, converged, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_types::bus_types;
    use crate::loadcase::radial_case;
    use crate::mpopt::Alg;
    use crate::sbus::MakeSBus;
    use crate::ybus::make_ybus;

    #[test]
    fn test_gausspf_radial() -> Result<(), String> {
        let mpc = radial_case(3, &[1], &[2, 3], Complex64::new(0.01, 0.05));
        let e2i = mpc.bus_index();
        let y = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch, &e2i)?;
        let (_, pv, pq) = bus_types(&mpc.bus, &mpc.gen);
        let s_bus = MakeSBus {
            base_mva: mpc.base_mva,
            bus: &mpc.bus,
            gen: &mpc.gen,
            e2i: &e2i,
            zip: mpc.zip_loads,
        };
        let opt = PFOpt {
            algorithm: Alg::GS,
            tolerance: 1e-8,
            max_it: 1000,
            ..PFOpt::default()
        };
        let v0 = vec![Complex64::new(1.0, 0.0); 3];
        let (v, converged, _) = gausspf(&y, &s_bus, &v0, &pv, &pq, &opt, None)?;
        assert!(converged);
        assert_eq!(v[0], Complex64::new(1.0, 0.0));
        assert!(v[2].norm() < v[1].norm() && v[1].norm() < 1.0);
        Ok(())
    }
}
