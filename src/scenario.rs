use crate::error::CaseError;
use crate::mpc::MPC;
use crate::sbus::delivered_load;
use crate::transfer::TransferSpec;

use anyhow::{format_err, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Outage of every branch joining two buses, written `"from_to"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Contingency {
    pub from: usize,
    pub to: usize,
}

impl fmt::Display for Contingency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.from, self.to)
    }
}

impl FromStr for Contingency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("line_").unwrap_or(s);
        let (from, to) = s
            .split_once('_')
            .ok_or_else(|| format_err!("contingency {:?} must be written from_to", s))?;
        let from = from
            .trim()
            .parse()
            .map_err(|err| format_err!("invalid from bus in {:?}: {}", s, err))?;
        let to = to
            .trim()
            .parse()
            .map_err(|err| format_err!("invalid to bus in {:?}: {}", s, err))?;
        if from == to {
            return Err(format_err!("contingency {:?} joins a bus to itself", s));
        }
        Ok(Self { from, to })
    }
}

impl TryFrom<String> for Contingency {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Contingency> for String {
    fn from(c: Contingency) -> Self {
        c.to_string()
    }
}

/// Network snapshot owned by one sweep.
///
/// Transfer injections are always set from the base values, so moving to
/// any transfer level and back restores the injections exactly.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub contingency: Option<Contingency>,
    pub mpc: MPC,
    /// False when the contingency named no in-service branch.
    pub outage_applied: bool,

    transfer: TransferSpec,
    base_pd: Vec<f64>,
    base_qd: Vec<f64>,
    base_pg: Vec<f64>,
    load_shares: Vec<(usize, f64)>,
    gen_shares: Vec<(usize, f64)>,
    lambda: f64,
}

/// Builds an isolated snapshot of `base` for one case.
///
/// The base network is never modified. A contingency that matches no
/// in-service branch is not an error: the snapshot is returned with
/// `outage_applied` cleared.
pub fn build(
    base: &MPC,
    transfer: &TransferSpec,
    contingency: Option<Contingency>,
) -> Result<Scenario, CaseError> {
    if base.bus.is_empty() {
        return Err(CaseError::EmptyNetwork);
    }
    if !base.has_load() {
        return Err(CaseError::NoLoads);
    }
    if !base.bus.iter().any(|b| b.is_ref()) {
        return Err(CaseError::NoReferenceBus);
    }
    if let Some(&bus) = transfer.unknown_buses(base).first() {
        return Err(CaseError::UnknownBus(bus));
    }
    let load_shares = transfer.load_shares(base);
    if load_shares.is_empty() {
        return Err(CaseError::NoSinks);
    }

    let mut mpc = base.clone();
    let mut outage_applied = false;
    if let Some(c) = contingency {
        let branches: Vec<usize> = mpc
            .branches_between(c.from, c.to)
            .into_iter()
            .filter(|&i| mpc.branch[i].is_on())
            .collect();
        if branches.is_empty() {
            log::warn!("contingency {}: no in-service branch joins buses {} and {}", c, c.from, c.to);
        } else {
            for &i in &branches {
                mpc.branch[i].status = false;
            }
            outage_applied = true;
            log::debug!("contingency {}: {} branch(es) out of service", c, branches.len());
        }
    }

    // Transfer buses must stay connected to a reference bus.
    let energized = mpc.energized_buses();
    if let Some(bus) = load_shares
        .iter()
        .map(|&(i, _)| mpc.bus[i].bus_i)
        .chain(transfer.sources.iter().copied())
        .chain(std::iter::once(transfer.monitor))
        .find(|b| !energized.contains(b))
    {
        return Err(CaseError::IslandedBus(bus));
    }

    Ok(Scenario {
        contingency,
        base_pd: mpc.bus.iter().map(|b| b.pd).collect(),
        base_qd: mpc.bus.iter().map(|b| b.qd).collect(),
        base_pg: mpc.gen.iter().map(|g| g.pg).collect(),
        gen_shares: transfer.gen_shares(&mpc),
        load_shares,
        transfer: transfer.clone(),
        mpc,
        outage_applied,
        lambda: 0.0,
    })
}

impl Scenario {
    /// Transfer level (MW above base) the injections currently reflect.
    pub fn transfer_level(&self) -> f64 {
        self.lambda
    }

    /// Sets the load and source generation to `lambda` MW above base.
    pub fn set_transfer(&mut self, lambda: f64) {
        for (i, b) in self.mpc.bus.iter_mut().enumerate() {
            b.pd = self.base_pd[i];
            b.qd = self.base_qd[i];
        }
        for &(i, share) in &self.load_shares {
            let dp = share * lambda;
            let b = &mut self.mpc.bus[i];
            b.pd += dp;
            if self.transfer.constant_power_factor && self.base_pd[i] != 0.0 {
                b.qd += dp * self.base_qd[i] / self.base_pd[i];
            }
        }
        for (i, g) in self.mpc.gen.iter_mut().enumerate() {
            g.pg = self.base_pg[i];
        }
        for &(i, share) in &self.gen_shares {
            self.mpc.gen[i].pg += share * lambda;
        }
        self.lambda = lambda;
    }

    /// External numbers of the buses whose load is scaled.
    pub fn scaled_buses(&self) -> Vec<usize> {
        self.load_shares
            .iter()
            .map(|&(i, _)| self.mpc.bus[i].bus_i)
            .collect()
    }

    /// Real power consumed at the scaled buses for the solved voltages.
    pub fn delivered_load(&self, vm: &HashMap<usize, f64>) -> f64 {
        delivered_load(&self.mpc.bus, &self.mpc.zip_loads, vm, &self.scaled_buses())
    }

    pub fn monitor(&self) -> usize {
        self.transfer.monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;
    use crate::mpc::{Branch, Bus};
    use crate::transfer::ScalingMode;
    use num_complex::Complex64;

    /// Chain 1-2-3-4 with a second path from 2 to 4.
    fn network() -> MPC {
        let mut mpc = radial_case(4, &[1], &[3, 4], Complex64::new(0.01, 0.1));
        mpc.branch.push(Branch {
            f_bus: 2,
            t_bus: 4,
            x: 0.1,
            ..Default::default()
        });
        mpc
    }

    #[test]
    fn test_parse_contingency() -> Result<()> {
        let c: Contingency = "1_2".parse()?;
        assert_eq!(c, Contingency { from: 1, to: 2 });
        assert_eq!(c.to_string(), "1_2");
        assert_eq!("line_4_7".parse::<Contingency>()?, Contingency { from: 4, to: 7 });
        assert!("12".parse::<Contingency>().is_err());
        assert!("a_2".parse::<Contingency>().is_err());
        assert!("3_3".parse::<Contingency>().is_err());
        Ok(())
    }

    #[test]
    fn test_build_applies_outage_either_orientation() -> Result<()> {
        let base = network();
        let transfer = TransferSpec::targeted(&[1], &[4], 4);

        let s = build(&base, &transfer, Some("3_2".parse()?))?;
        assert!(s.outage_applied);
        assert!(s.mpc.branch[1].is_off());
        assert!(base.branch[1].is_on());

        let s = build(&base, &transfer, Some("1_4".parse()?))?;
        assert!(!s.outage_applied);
        assert_eq!(s.mpc, base);
        Ok(())
    }

    #[test]
    fn test_build_is_repeatable() -> Result<()> {
        let base = network();
        let transfer = TransferSpec::targeted(&[1], &[3, 4], 4);
        let mut a = build(&base, &transfer, Some("2_3".parse()?))?;
        let mut b = build(&base, &transfer, Some("2_3".parse()?))?;
        assert_eq!(a.mpc, b.mpc);

        a.set_transfer(40.0);
        b.set_transfer(40.0);
        assert_eq!(a.mpc, b.mpc);
        Ok(())
    }

    #[test]
    fn test_build_rejects_invalid_network() {
        let transfer = TransferSpec::targeted(&[1], &[4], 4);
        assert_eq!(build(&MPC::default(), &transfer, None).err(), Some(CaseError::EmptyNetwork));

        let mut no_load = network();
        no_load.bus.iter_mut().for_each(|b| {
            b.pd = 0.0;
            b.qd = 0.0;
        });
        assert_eq!(build(&no_load, &transfer, None).err(), Some(CaseError::NoLoads));

        let mut no_ref = network();
        no_ref.bus[0].bus_type = crate::mpc::BusType::PV;
        assert_eq!(build(&no_ref, &transfer, None).err(), Some(CaseError::NoReferenceBus));

        let unknown = TransferSpec::targeted(&[1], &[8], 4);
        assert_eq!(build(&network(), &unknown, None).err(), Some(CaseError::UnknownBus(8)));

        let no_sinks = TransferSpec::targeted(&[1], &[], 4);
        assert_eq!(build(&network(), &no_sinks, None).err(), Some(CaseError::NoSinks));
    }

    #[test]
    fn test_build_rejects_islanded_transfer_bus() -> Result<()> {
        let base = radial_case(4, &[1], &[4], Complex64::new(0.01, 0.1));
        let transfer = TransferSpec::targeted(&[1], &[4], 4);
        assert_eq!(
            build(&base, &transfer, Some("3_4".parse()?)).err(),
            Some(CaseError::IslandedBus(4))
        );

        // Cutting off a bus the transfer does not touch is fine.
        let mut stub = base.clone();
        stub.bus.push(Bus {
            bus_i: 5,
            ..Default::default()
        });
        stub.branch.push(Branch {
            f_bus: 2,
            t_bus: 5,
            x: 0.1,
            ..Default::default()
        });
        let s = build(&stub, &transfer, Some("2_5".parse()?))?;
        assert!(s.outage_applied);
        Ok(())
    }

    #[test]
    fn test_set_transfer_and_restore() -> Result<()> {
        let base = network();
        let mut transfer = TransferSpec::targeted(&[1], &[3, 4], 4);
        transfer.constant_power_factor = true;
        let mut s = build(&base, &transfer, None)?;

        s.set_transfer(30.0);
        assert_eq!(s.mpc.bus[2].pd, 25.0);
        assert_eq!(s.mpc.bus[3].pd, 25.0);
        assert_eq!(s.mpc.bus[3].qd, 12.5);
        assert_eq!(s.mpc.gen[0].pg, 30.0);
        assert_eq!(s.transfer_level(), 30.0);

        s.set_transfer(0.0);
        assert_eq!(s.mpc, base);

        transfer.mode = ScalingMode::Uniform;
        transfer.constant_power_factor = false;
        let mut s = build(&base, &transfer, None)?;
        s.set_transfer(10.0);
        assert_eq!(s.mpc.bus[2].pd, 15.0);
        assert_eq!(s.mpc.bus[3].qd, 5.0);
        assert_eq!(s.scaled_buses(), vec![3, 4]);
        Ok(())
    }

    #[test]
    fn test_delivered_load() -> Result<()> {
        let base = network();
        let transfer = TransferSpec::targeted(&[1], &[4], 4);
        let mut s = build(&base, &transfer, None)?;
        s.set_transfer(20.0);
        let vm = HashMap::from([(4, 0.9)]);
        assert_eq!(s.delivered_load(&vm), 30.0);

        s.mpc.zip_loads = crate::mpc::SysWideZipLoads::constant_impedance();
        assert!((s.delivered_load(&vm) - 30.0 * 0.81).abs() < 1e-12);
        Ok(())
    }
}
