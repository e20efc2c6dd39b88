use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// MPC is a MATPOWER case that models a power system as a directed graph
/// structure.
#[derive(Debug, Clone, PartialEq)]
pub struct MPC {
    pub name: String,

    /// System MVA base used for converting power into per-unit quantities.
    /// Default value is 100.
    pub base_mva: f64,

    /// Power system nodes, including static loads and shunts.
    pub bus: Vec<Bus>,

    /// Generators and dispatchable loads.
    pub gen: Vec<Gen>,

    /// Transmission lines/cables and transformers.
    pub branch: Vec<Branch>,

    /// Voltage dependence of every static load in the case.
    pub zip_loads: SysWideZipLoads,
}

impl Default for MPC {
    fn default() -> Self {
        Self {
            name: String::default(),
            base_mva: 100.0,
            bus: Vec::default(),
            gen: Vec::default(),
            branch: Vec::default(),
            zip_loads: SysWideZipLoads::default(),
        }
    }
}

impl MPC {
    /// Maps external bus numbers to positions in `bus`.
    pub fn bus_index(&self) -> HashMap<usize, usize> {
        self.bus
            .iter()
            .enumerate()
            .map(|(i, b)| (b.bus_i, i))
            .collect()
    }

    pub fn has_bus(&self, bus_i: usize) -> bool {
        self.bus.iter().any(|b| b.bus_i == bus_i)
    }

    pub fn has_load(&self) -> bool {
        self.bus.iter().any(|b| b.pd != 0.0 || b.qd != 0.0)
    }

    /// Indexes of the branches joining `a` and `b` in either orientation.
    pub fn branches_between(&self, a: usize, b: usize) -> Vec<usize> {
        self.branch
            .iter()
            .enumerate()
            .filter(|(_, br)| (br.f_bus == a && br.t_bus == b) || (br.f_bus == b && br.t_bus == a))
            .map(|(i, _)| i)
            .collect()
    }

    /// External numbers of the buses reachable from a reference bus through
    /// in-service branches.
    pub fn energized_buses(&self) -> HashSet<usize> {
        let mut adjacent: HashMap<usize, Vec<usize>> = HashMap::new();
        for br in self.branch.iter().filter(|br| br.is_on()) {
            adjacent.entry(br.f_bus).or_default().push(br.t_bus);
            adjacent.entry(br.t_bus).or_default().push(br.f_bus);
        }
        let mut stack: Vec<usize> = self
            .bus
            .iter()
            .filter(|b| b.is_ref())
            .map(|b| b.bus_i)
            .collect();
        let mut seen: HashSet<usize> = stack.iter().copied().collect();
        while let Some(b) = stack.pop() {
            for &n in adjacent.get(&b).into_iter().flatten() {
                if seen.insert(n) {
                    stack.push(n);
                }
            }
        }
        seen
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum BusType {
    /// Fixed active and reactive power.
    PQ,
    /// Fixed voltage magnitude and active power.
    PV,
    /// Reference voltage angle. Slack active and reactive power.
    REF,
    /// Isolated bus.
    NONE,
}

/// Bus is a node in the power system graph structure.
/// Static loads and shunts are included in the Bus definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    /// Bus number.
    pub bus_i: usize,

    pub bus_type: BusType,

    /// Real power demand (MW).
    pub pd: f64,

    /// Reactive power demand (MVAr).
    pub qd: f64,

    /// Shunt conductance (MW at V = 1.0 p.u.).
    pub gs: f64,

    /// Shunt susceptance (MVAr at V = 1.0 p.u.).
    pub bs: f64,

    /// Area number, 1-100.
    pub area: usize,

    /// Voltage magnitude (p.u.).
    pub vm: f64,

    /// Voltage angle (degrees).
    pub va: f64,

    /// Base voltage (kV).
    pub base_kv: f64,

    /// Maximum voltage magnitude (p.u.).
    pub vmax: f64,

    /// Minimum voltage magnitude (p.u.).
    pub vmin: f64,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            bus_i: 0,
            bus_type: BusType::PQ,
            pd: 0.0,
            qd: 0.0,
            gs: 0.0,
            bs: 0.0,
            area: 1,
            vm: 1.0,
            va: 0.0,
            base_kv: 0.0,
            vmax: 1.1,
            vmin: 0.9,
        }
    }
}

impl Bus {
    pub fn is_pq(&self) -> bool {
        self.bus_type == BusType::PQ
    }
    pub fn is_pv(&self) -> bool {
        self.bus_type == BusType::PV
    }
    pub fn is_ref(&self) -> bool {
        self.bus_type == BusType::REF
    }
    pub fn is_isolated(&self) -> bool {
        self.bus_type == BusType::NONE
    }

    pub(crate) fn y_sh(&self, base_mva: f64) -> Complex64 {
        Complex64::new(self.gs, self.bs) / Complex64::new(base_mva, 0.0)
    }
}

/// Gen is a generator or dispatchable load.
#[derive(Debug, Clone, PartialEq)]
pub struct Gen {
    /// Bus number.
    pub gen_bus: usize,

    /// Real power output (MW).
    pub pg: f64,

    /// Reactive power output (MVAr).
    pub qg: f64,

    /// Maximum reactive power output (MVAr).
    pub qmax: f64,

    /// Minimum reactive power output (MVAr).
    pub qmin: f64,

    /// Voltage magnitude setpoint (p.u.).
    pub vg: f64,

    /// Total MVA base of machine, defaults to baseMVA.
    pub mbase: f64,

    /// Machine status.
    pub status: bool,

    /// Maximum real power output (MW).
    pub pmax: f64,

    /// Minimum real power output (MW).
    pub pmin: f64,
}

impl Default for Gen {
    fn default() -> Self {
        Self {
            gen_bus: 0,
            pg: 0.0,
            qg: 0.0,
            qmax: f64::INFINITY,
            qmin: f64::NEG_INFINITY,
            vg: 1.0,
            mbase: 100.0,
            status: true,
            pmax: f64::INFINITY,
            pmin: 0.0,
        }
    }
}

impl Gen {
    pub fn is_on(&self) -> bool {
        self.status
    }
    pub fn is_off(&self) -> bool {
        !self.status
    }
}

/// Branch is a transmission line/cable or a two winding transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// "From" bus number.
    pub f_bus: usize,

    /// "To" bus number.
    pub t_bus: usize,

    /// Resistance (p.u.).
    pub r: f64,

    /// Reactance (p.u.).
    pub x: f64,

    /// Total line charging susceptance (p.u.).
    pub b: f64,

    /// MVA rating A (long term rating), 0 for unlimited.
    pub rate_a: f64,

    /// Transformer off nominal turns ratio, 0 for lines.
    pub tap: f64,

    /// Transformer phase shift angle (degrees).
    pub shift: f64,

    /// In-service status.
    pub status: bool,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            f_bus: 0,
            t_bus: 0,
            r: 0.0,
            x: 0.0,
            b: 0.0,
            rate_a: 0.0,
            tap: 0.0,
            shift: 0.0,
            status: true,
        }
    }
}

impl Branch {
    pub fn is_on(&self) -> bool {
        self.status
    }
    pub fn is_off(&self) -> bool {
        !self.status
    }
}

/// ZIP load weights applied to every bus load: `[p, i, z]` fractions of
/// constant power, constant current and constant impedance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SysWideZipLoads {
    pub pw: [f64; 3],
    pub qw: [f64; 3],
}

impl Default for SysWideZipLoads {
    fn default() -> Self {
        Self {
            pw: [1.0, 0.0, 0.0],
            qw: [1.0, 0.0, 0.0],
        }
    }
}

impl SysWideZipLoads {
    pub fn constant_power() -> Self {
        Self::default()
    }

    pub fn constant_current() -> Self {
        Self {
            pw: [0.0, 1.0, 0.0],
            qw: [0.0, 1.0, 0.0],
        }
    }

    pub fn constant_impedance() -> Self {
        Self {
            pw: [0.0, 0.0, 1.0],
            qw: [0.0, 0.0, 1.0],
        }
    }

    /// Voltage dependent loads change their consumption along the curve.
    pub fn is_voltage_dependent(&self) -> bool {
        self.pw[1] != 0.0 || self.pw[2] != 0.0
    }

    /// Fraction of nominal real power consumed at voltage `vm`.
    pub fn p_factor(&self, vm: f64) -> f64 {
        self.pw[0] + self.pw[1] * vm + self.pw[2] * vm * vm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;

    #[test]
    fn test_energized_buses() {
        let mut mpc = radial_case(4, &[1], &[4], Complex64::new(0.01, 0.1));
        assert_eq!(mpc.energized_buses(), HashSet::from([1, 2, 3, 4]));

        mpc.branch[1].status = false;
        assert_eq!(mpc.energized_buses(), HashSet::from([1, 2]));
    }
}
