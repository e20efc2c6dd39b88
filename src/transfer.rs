use crate::mpc::MPC;
use serde::{Deserialize, Serialize};

/// Which loads take up the transfer increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Every load, in proportion to its base demand.
    Uniform,
    /// Sink buses only, split evenly.
    #[default]
    Targeted,
}

/// Power transfer between generation at the source buses and load at the
/// sink buses. Bus numbers are external (case) numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSpec {
    pub sources: Vec<usize>,
    pub sinks: Vec<usize>,
    /// Bus whose voltage traces the curve.
    pub monitor: usize,
    pub mode: ScalingMode,
    /// Scale reactive demand with real demand at each bus's base power factor.
    pub constant_power_factor: bool,
}

impl TransferSpec {
    pub fn targeted(sources: &[usize], sinks: &[usize], monitor: usize) -> Self {
        Self {
            sources: sources.to_vec(),
            sinks: sinks.to_vec(),
            monitor,
            ..Default::default()
        }
    }

    /// Buses named by the transfer that are missing from `mpc`.
    pub fn unknown_buses(&self, mpc: &MPC) -> Vec<usize> {
        let mut missing: Vec<usize> = self
            .sources
            .iter()
            .chain(&self.sinks)
            .chain(std::iter::once(&self.monitor))
            .copied()
            .filter(|&b| !mpc.has_bus(b))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// Real power share of a transfer increment taken by each bus, as
    /// `(bus position, fraction)` pairs summing to one.
    pub(crate) fn load_shares(&self, mpc: &MPC) -> Vec<(usize, f64)> {
        let e2i = mpc.bus_index();
        let even = |buses: &[usize]| -> Vec<(usize, f64)> {
            let n = buses.len() as f64;
            buses
                .iter()
                .filter_map(|b| e2i.get(b))
                .map(|&i| (i, 1.0 / n))
                .collect()
        };
        match self.mode {
            ScalingMode::Targeted => even(&self.sinks),
            ScalingMode::Uniform => {
                let total: f64 = mpc.bus.iter().map(|b| b.pd.max(0.0)).sum();
                if total > 0.0 {
                    mpc.bus
                        .iter()
                        .enumerate()
                        .filter(|(_, b)| b.pd > 0.0)
                        .map(|(i, b)| (i, b.pd / total))
                        .collect()
                } else {
                    even(&self.sinks)
                }
            }
        }
    }

    /// Share of a transfer increment picked up by each in-service source
    /// generator, as `(gen position, fraction)` pairs.
    pub(crate) fn gen_shares(&self, mpc: &MPC) -> Vec<(usize, f64)> {
        let gens: Vec<usize> = mpc
            .gen
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_on() && self.sources.contains(&g.gen_bus))
            .map(|(i, _)| i)
            .collect();
        let n = gens.len() as f64;
        gens.into_iter().map(|i| (i, 1.0 / n)).collect()
    }
}
