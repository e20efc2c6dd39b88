use crate::mpc::{SysWideZipLoads, MPC};
use crate::mpopt::PFOpt;
use crate::scenario::Contingency;
use crate::step::StepParams;
use crate::sweep::SweepOptions;
use crate::transfer::{ScalingMode, TransferSpec};

use anyhow::{format_err, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoadModel {
    /// Demand independent of voltage.
    #[default]
    ConstantPower,
    /// Demand proportional to voltage.
    ConstantCurrent,
    /// Demand proportional to voltage squared.
    ConstantImpedance,
}

impl LoadModel {
    pub fn zip_loads(&self) -> SysWideZipLoads {
        match self {
            LoadModel::ConstantPower => SysWideZipLoads::constant_power(),
            LoadModel::ConstantCurrent => SysWideZipLoads::constant_current(),
            LoadModel::ConstantImpedance => SysWideZipLoads::constant_impedance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Enforce generator reactive power limits.
    pub enforce_q_limits: bool,

    /// Attempts on the upper branch. Defaults to the standard list.
    pub fallbacks: Option<Vec<PFOpt>>,

    /// Attempts once past the nose. Defaults to the relaxed list.
    pub relaxed: Option<Vec<PFOpt>>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            enforce_q_limits: true,
            fallbacks: None,
            relaxed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Branch outages, written `"from_to"`.
    pub contingencies: Vec<Contingency>,

    /// Number of most critical contingencies to report.
    pub critical_scenarios: usize,

    /// Trace the base case to collapse regardless of `max_transfer`.
    pub run_base_to_completion: bool,

    /// Voltage the margin is measured against (p.u.).
    pub reference_voltage: f64,

    /// Estimate a point past the nose when every solver attempt fails.
    pub interpolate: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            contingencies: Vec::new(),
            critical_scenarios: 5,
            run_base_to_completion: true,
            reference_voltage: 0.9,
            interpolate: true,
        }
    }
}

/// Complete description of a PV curve analysis, usually read from TOML.
///
/// ```toml
/// case = "case9.json"
///
/// [transfer]
/// sources = [1]
/// sinks = [5, 7]
/// monitor = 5
/// mode = "targeted"
///
/// [step]
/// initial_step = 100.0
/// min_step = 10.0
///
/// [analysis]
/// contingencies = ["4_5", "7_8"]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PvConfig {
    /// MATPOWER JSON case, relative to the working directory.
    pub case: Option<PathBuf>,
    pub transfer: TransferSpec,
    pub step: StepParams,
    pub load_model: LoadModel,
    pub solver: SolverConfig,
    pub analysis: AnalysisConfig,
}

impl PvConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| format_err!("unable to read config {}: {}", path.display(), err))?;
        Self::parse(&text)
            .map_err(|err| format_err!("invalid config {}: {}", path.display(), err))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Checks the settings that do not depend on the network.
    pub fn validate(&self) -> Result<()> {
        self.step.check().map_err(|err| format_err!("step: {}", err))?;

        if self.transfer.mode == ScalingMode::Targeted && self.transfer.sinks.is_empty() {
            return Err(format_err!("transfer: targeted scaling needs at least one sink bus"));
        }
        let v_ref = self.analysis.reference_voltage;
        if !(v_ref > 0.0 && v_ref < 2.0) {
            return Err(format_err!("analysis: reference voltage out of range: {}", v_ref));
        }
        for (name, list) in [
            ("fallbacks", &self.solver.fallbacks),
            ("relaxed", &self.solver.relaxed),
        ] {
            if let Some(list) = list {
                if list.is_empty() {
                    return Err(format_err!("solver: {} list is empty", name));
                }
                for opt in list {
                    if !(opt.tolerance > 0.0) || opt.max_it == 0 {
                        return Err(format_err!(
                            "solver: {} entry needs a positive tolerance and iteration limit",
                            name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks the transfer against a loaded network. Contingencies naming
    /// absent buses are only reported: those cases are skipped.
    pub fn validate_for(&self, mpc: &MPC) -> Result<()> {
        let missing = self.transfer.unknown_buses(mpc);
        if !missing.is_empty() {
            return Err(format_err!(
                "transfer buses not found in case {}: {:?}",
                mpc.name,
                missing
            ));
        }
        for c in &self.analysis.contingencies {
            if mpc.branches_between(c.from, c.to).is_empty() {
                log::warn!("contingency {} matches no branch in case {}", c, mpc.name);
            }
        }
        Ok(())
    }

    /// Sets the case-wide load model.
    pub fn apply_load_model(&self, mpc: &mut MPC) {
        mpc.zip_loads = self.load_model.zip_loads();
    }

    pub fn sweep_options(&self) -> SweepOptions {
        let q = self.solver.enforce_q_limits;
        SweepOptions {
            step: self.step.clone(),
            fallbacks: self
                .solver
                .fallbacks
                .clone()
                .unwrap_or_else(|| PFOpt::standard_fallback(q)),
            relaxed: self
                .solver
                .relaxed
                .clone()
                .unwrap_or_else(|| PFOpt::relaxed_fallback(q)),
            reference_voltage: self.analysis.reference_voltage,
            ignore_transfer_limit: false,
            interpolate: self.analysis.interpolate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;
    use crate::mpopt::Alg;
    use num_complex::Complex64;

    const CONFIG: &str = r#"
        case = "radial.json"
        load_model = "constant_impedance"

        [transfer]
        sources = [1]
        sinks = [3, 4]
        monitor = 4

        [step]
        initial_step = 50.0
        max_transfer = 400.0

        [solver]
        enforce_q_limits = false
        relaxed = [{ algorithm = "GS", tolerance = 1e-4, max_it = 500 }]

        [analysis]
        contingencies = ["1_2", "3_4"]
        critical_scenarios = 3
    "#;

    #[test]
    fn test_parse_config() -> anyhow::Result<()> {
        let cfg = PvConfig::parse(CONFIG)?;
        cfg.validate()?;

        assert_eq!(cfg.case, Some(PathBuf::from("radial.json")));
        assert_eq!(cfg.transfer.mode, ScalingMode::Targeted);
        assert_eq!(cfg.step.initial_step, 50.0);
        assert_eq!(cfg.step.min_step, 10.0);
        assert_eq!(cfg.step.max_transfer, Some(400.0));
        assert_eq!(cfg.load_model, LoadModel::ConstantImpedance);
        assert_eq!(cfg.analysis.contingencies.len(), 2);
        assert_eq!(cfg.analysis.contingencies[1].to_string(), "3_4");
        assert!(cfg.analysis.run_base_to_completion);

        let opts = cfg.sweep_options();
        assert_eq!(opts.fallbacks, PFOpt::standard_fallback(false));
        assert_eq!(opts.relaxed.len(), 1);
        assert_eq!(opts.relaxed[0].algorithm, Alg::GS);
        assert_eq!(opts.relaxed[0].max_it, 500);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() -> anyhow::Result<()> {
        let mut cfg = PvConfig::parse(CONFIG)?;
        cfg.step.reduction_factor = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PvConfig::parse(CONFIG)?;
        cfg.transfer.sinks.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = PvConfig::parse(CONFIG)?;
        cfg.solver.fallbacks = Some(vec![]);
        assert!(cfg.validate().is_err());

        assert!(PvConfig::parse("[analysis]\ncontingencies = [\"12\"]").is_err());
        Ok(())
    }

    #[test]
    fn test_validate_for_case() -> anyhow::Result<()> {
        let cfg = PvConfig::parse(CONFIG)?;
        let mut mpc = radial_case(4, &[1], &[3, 4], Complex64::new(0.01, 0.1));
        cfg.validate_for(&mpc)?;

        cfg.apply_load_model(&mut mpc);
        assert_eq!(mpc.zip_loads, SysWideZipLoads::constant_impedance());

        let small = radial_case(3, &[1], &[3], Complex64::new(0.01, 0.1));
        assert!(cfg.validate_for(&small).is_err());
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pv.toml");
        fs::write(&path, CONFIG)?;
        let cfg = PvConfig::load(&path)?;
        assert_eq!(cfg.transfer.sinks, vec![3, 4]);

        assert!(PvConfig::load(&dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
