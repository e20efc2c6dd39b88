use crate::dense::Mat;
use crate::mpc::{Branch, Bus};
use num_complex::Complex64;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Builds the bus admittance matrix.
///
/// `e2i` maps external bus numbers to rows of the matrix. Out-of-service
/// branches contribute nothing, so applying an outage is a matter of
/// clearing the branch status before calling this.
pub fn make_ybus(
    base_mva: f64,
    bus: &[Bus],
    branch: &[Branch],
    e2i: &HashMap<usize, usize>,
) -> Result<Mat<Complex64>, String> {
    let nb = bus.len();

    // For each branch, compute the elements of the branch admittance matrix where:
    //
    //      | If |   | Yff  Yft |   | Vf |
    //      |    | = |          | * |    |
    //      | It |   | Ytf  Ytt |   | Vt |
    let mut y_bus = Mat::<Complex64>::zeros(nb);

    for br in branch.iter().filter(|br| br.is_on()) {
        let (f, t) = match (e2i.get(&br.f_bus), e2i.get(&br.t_bus)) {
            (Some(&f), Some(&t)) => (f, t),
            _ => {
                return Err(format!(
                    "branch {}-{} references an unknown bus",
                    br.f_bus, br.t_bus
                ))
            }
        };
        if br.r == 0.0 && br.x == 0.0 {
            return Err(format!("branch {}-{} has zero impedance", br.f_bus, br.t_bus));
        }

        let y_s = Complex64::new(1.0, 0.0) / Complex64::new(br.r, br.x); // series admittance
        let b_c = br.b; // line charging susceptance
        let tap = if br.tap == 0.0 { 1.0 } else { br.tap }; // default tap ratio = 1
        let tap = Complex64::from_polar(tap, br.shift * PI / 180.0); // add phase shifters

        let y_tt = y_s + Complex64::new(0.0, b_c / 2.0);
        let y_ff = y_tt / (tap * tap.conj());
        let y_ft = -y_s / tap.conj();
        let y_tf = -y_s / tap;

        y_bus.add_at(f, f, y_ff);
        y_bus.add_at(f, t, y_ft);
        y_bus.add_at(t, f, y_tf);
        y_bus.add_at(t, t, y_tt);
    }

    for (i, b) in bus.iter().enumerate() {
        y_bus.add_at(i, i, b.y_sh(base_mva));
    }
    Ok(y_bus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;

    #[test]
    fn test_make_ybus_two_bus() -> Result<(), String> {
        let mpc = radial_case(2, &[1], &[2], Complex64::new(0.0, 0.1));
        let y = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch, &mpc.bus_index())?;

        assert!((y.get(0, 0) - Complex64::new(0.0, -10.0)).norm() < 1e-12);
        assert!((y.get(0, 1) - Complex64::new(0.0, 10.0)).norm() < 1e-12);
        assert_eq!(y.get(0, 1), y.get(1, 0));
        Ok(())
    }

    #[test]
    fn test_out_of_service_branch_ignored() -> Result<(), String> {
        let mut mpc = radial_case(3, &[1], &[3], Complex64::new(0.01, 0.1));
        mpc.branch[1].status = false;
        let y = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch, &mpc.bus_index())?;

        assert_eq!(y.get(1, 2), Complex64::default());
        assert_eq!(y.get(2, 2), Complex64::default());
        Ok(())
    }
}
