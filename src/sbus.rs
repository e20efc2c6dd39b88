use crate::mpc::{Bus, Gen, SysWideZipLoads};
use num_complex::Complex64;
use std::collections::HashMap;

pub trait SBus {
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64>;
    fn d_sbus_d_vm(&self, v_m: &[f64]) -> Vec<Complex64>;
}

pub struct MakeSBus<'a> {
    pub base_mva: f64,
    pub bus: &'a [Bus],
    pub gen: &'a [Gen],
    pub e2i: &'a HashMap<usize, usize>,
    pub zip: SysWideZipLoads,
}

impl<'a> SBus for MakeSBus<'a> {
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64> {
        make_sbus(self.base_mva, self.bus, self.gen, self.e2i, &self.zip, Some(v_m))
    }

    fn d_sbus_d_vm(&self, v_m: &[f64]) -> Vec<Complex64> {
        make_d_sbus_d_vm(self.base_mva, self.bus, &self.zip, v_m)
    }
}

/// Builds the vector of complex bus power injections.
///
/// Returns the vector of complex bus power injections, that is, generation
/// minus load. Power is expressed in per unit. ZIP loads are evaluated at
/// the voltage magnitudes `vm`, or at nominal voltage when `vm` is `None`.
pub fn make_sbus(
    base_mva: f64,
    bus: &[Bus],
    gen: &[Gen],
    e2i: &HashMap<usize, usize>,
    zip: &SysWideZipLoads,
    vm: Option<&[f64]>,
) -> Vec<Complex64> {
    let nb = bus.len();
    let base_mva = Complex64::new(base_mva, 0.0);

    // Form net complex bus power injection vector
    // (power injected by generators + power injected by loads).
    let mut s_bus = vec![Complex64::default(); nb];

    gen.iter().filter(|g| g.is_on()).for_each(|g| {
        if let Some(&i) = e2i.get(&g.gen_bus) {
            s_bus[i] += Complex64::new(g.pg, g.qg) / base_mva;
        }
    });

    let (pw, qw) = (zip.pw, zip.qw);

    bus.iter()
        .enumerate()
        .filter(|(_, b)| b.pd != 0.0 || b.qd != 0.0)
        .for_each(|(i, b)| {
            // Compute per-bus loads in p.u.
            let sd_z = Complex64::new(b.pd * pw[2], b.qd * qw[2]) / base_mva;
            let sd_i = Complex64::new(b.pd * pw[1], b.qd * qw[1]) / base_mva;
            let sd_p = Complex64::new(b.pd * pw[0], b.qd * qw[0]) / base_mva;

            let vm_i = vm.map(|vm| vm[i]).unwrap_or(1.0);

            let sd = sd_p + (sd_i * vm_i) + (sd_z * (vm_i * vm_i));

            s_bus[i] -= sd;
        });

    s_bus
}

/// Computes the diagonal of the partial derivative of the bus injections
/// with respect to voltage magnitude.
pub fn make_d_sbus_d_vm(
    base_mva: f64,
    bus: &[Bus],
    zip: &SysWideZipLoads,
    vm: &[f64],
) -> Vec<Complex64> {
    let base_mva = Complex64::new(base_mva, 0.0);
    let (pw, qw) = (zip.pw, zip.qw);

    bus.iter()
        .enumerate()
        .map(|(i, b)| {
            if b.pd != 0.0 || b.qd != 0.0 {
                let sd_z = Complex64::new(b.pd * pw[2], b.qd * qw[2]) / base_mva;
                let sd_i = Complex64::new(b.pd * pw[1], b.qd * qw[1]) / base_mva;

                -(sd_i + 2.0 * vm[i] * sd_z)
            } else {
                Complex64::default()
            }
        })
        .collect()
}

/// Real power actually consumed by the loads at `buses` (MW), with ZIP
/// loads evaluated at the solved voltage magnitudes.
pub fn delivered_load(
    bus: &[Bus],
    zip: &SysWideZipLoads,
    vm: &HashMap<usize, f64>,
    buses: &[usize],
) -> f64 {
    bus.iter()
        .filter(|b| buses.contains(&b.bus_i))
        .map(|b| b.pd * zip.p_factor(vm.get(&b.bus_i).copied().unwrap_or(1.0)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;

    #[test]
    fn test_make_sbus_constant_power() {
        let mut mpc = radial_case(2, &[1], &[2], Complex64::new(0.0, 0.1));
        mpc.gen[0].pg = 25.0;
        let s = make_sbus(
            mpc.base_mva,
            &mpc.bus,
            &mpc.gen,
            &mpc.bus_index(),
            &mpc.zip_loads,
            Some(&[1.0, 0.5]),
        );
        assert!((s[0] - Complex64::new(0.25, 0.0)).norm() < 1e-12);
        assert!((s[1] - Complex64::new(-0.1, -0.05)).norm() < 1e-12);
    }

    #[test]
    fn test_make_sbus_constant_impedance() {
        let mpc = radial_case(2, &[1], &[2], Complex64::new(0.0, 0.1));
        let zip = SysWideZipLoads::constant_impedance();
        let s = make_sbus(mpc.base_mva, &mpc.bus, &mpc.gen, &mpc.bus_index(), &zip, Some(&[1.0, 0.5]));
        assert!((s[1] - Complex64::new(-0.025, -0.0125)).norm() < 1e-12);

        let d = make_d_sbus_d_vm(mpc.base_mva, &mpc.bus, &zip, &[1.0, 0.5]);
        assert!((d[1] - Complex64::new(-0.1, -0.05)).norm() < 1e-12);
        assert_eq!(d[0], Complex64::default());
    }

    #[test]
    fn test_delivered_load() {
        let mpc = radial_case(3, &[1], &[2, 3], Complex64::new(0.0, 0.1));
        let vm = HashMap::from([(2, 0.9), (3, 0.8)]);

        let p = delivered_load(&mpc.bus, &mpc.zip_loads, &vm, &[2, 3]);
        assert!((p - 20.0).abs() < 1e-12);

        let zip = SysWideZipLoads::constant_current();
        let p = delivered_load(&mpc.bus, &zip, &vm, &[3]);
        assert!((p - 8.0).abs() < 1e-12);
    }
}
