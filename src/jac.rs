use crate::dense::Mat;
use num_complex::Complex64;

/// Computes partial derivatives of power injection w.r.t. voltage angle and
/// magnitude (polar coordinates).
///
/// ```txt
/// dSbus/dVa = 1j * diagV * conj(diagIbus - Ybus * diagV)
/// dSbus/dVm = diagV * conj(Ybus * diagVnorm) + conj(diagIbus) * diagVnorm
/// ```
pub fn d_sbus_d_v(y_bus: &Mat<Complex64>, v: &[Complex64]) -> (Mat<Complex64>, Mat<Complex64>) {
    let n = v.len();
    let i_bus = y_bus.mat_vec(v);
    let v_norm: Vec<Complex64> = v
        .iter()
        .map(|v| {
            let m = v.norm();
            if m > 0.0 {
                *v / m
            } else {
                Complex64::new(1.0, 0.0)
            }
        })
        .collect();

    let mut d_sbus_d_va = Mat::zeros(n);
    let mut d_sbus_d_vm = Mat::zeros(n);
    for i in 0..n {
        for k in 0..n {
            let y_ik = y_bus.get(i, k);
            let mut a = -(y_ik * v[k]);
            let mut m = v[i] * (y_ik * v_norm[k]).conj();
            if i == k {
                a += i_bus[i];
                m += i_bus[i].conj() * v_norm[i];
            }
            d_sbus_d_va.set(i, k, Complex64::i() * v[i] * a.conj());
            d_sbus_d_vm.set(i, k, m);
        }
    }
    (d_sbus_d_va, d_sbus_d_vm)
}

/// Forms the reduced power flow Jacobian used in the Newton updates.
///
/// Rows are the P equations of the PV and PQ buses followed by the Q
/// equations of the PQ buses; columns are the matching voltage angles and
/// magnitudes. `d_sd_d_vm` is the diagonal of the voltage sensitivity of the
/// injections themselves (ZIP loads), which is subtracted from dS/dVm.
pub fn make_jac(
    d_sbus_d_va: &Mat<Complex64>,
    d_sbus_d_vm: &Mat<Complex64>,
    d_sd_d_vm: &[Complex64],
    pv: &[usize],
    pq: &[usize],
) -> Result<Mat<f64>, String> {
    let pv_pq = [pv, pq].concat();

    let mut d_vm = d_sbus_d_vm.clone();
    for (i, d) in d_sd_d_vm.iter().enumerate() {
        d_vm.add_at(i, i, -*d);
    }

    let j11 = d_sbus_d_va.select(&pv_pq, &pv_pq).map(|z| z.re);
    let j12 = d_vm.select(&pv_pq, pq).map(|z| z.re);
    let j21 = d_sbus_d_va.select(pq, &pv_pq).map(|z| z.im);
    let j22 = d_vm.select(pq, pq).map(|z| z.im);

    Mat::compose(&j11, &j12, &j21, &j22)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;
    use crate::ybus::make_ybus;

    #[test]
    fn test_jacobian_matches_finite_difference() -> Result<(), String> {
        let mpc = radial_case(3, &[1], &[3], Complex64::new(0.02, 0.1));
        let y = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch, &mpc.bus_index())?;
        let v = vec![
            Complex64::from_polar(1.0, 0.0),
            Complex64::from_polar(0.97, -0.05),
            Complex64::from_polar(0.93, -0.11),
        ];
        let (dva, dvm) = d_sbus_d_v(&y, &v);

        let s = |v: &[Complex64]| -> Vec<Complex64> {
            let i = y.mat_vec(v);
            v.iter().zip(&i).map(|(v, i)| *v * i.conj()).collect()
        };
        let h = 1e-7;
        let s0 = s(&v);

        // Perturb the angle and magnitude of bus 2.
        let mut va = v.clone();
        va[2] = Complex64::from_polar(v[2].norm(), v[2].arg() + h);
        let mut vm = v.clone();
        vm[2] = Complex64::from_polar(v[2].norm() + h, v[2].arg());
        let (sa, sm) = (s(&va), s(&vm));

        for i in 0..3 {
            let fd_a = (sa[i] - s0[i]) / h;
            let fd_m = (sm[i] - s0[i]) / h;
            assert!((fd_a - dva.get(i, 2)).norm() < 1e-5, "dVa row {}", i);
            assert!((fd_m - dvm.get(i, 2)).norm() < 1e-5, "dVm row {}", i);
        }

        let jac = make_jac(&dva, &dvm, &[Complex64::default(); 3], &[], &[1, 2])?;
        assert_eq!(jac.shape(), (4, 4));
        assert_eq!(jac.get(0, 0), dva.get(1, 1).re);
        assert_eq!(jac.get(3, 3), dvm.get(2, 2).im);
        Ok(())
    }
}
