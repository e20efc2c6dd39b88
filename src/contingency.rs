use crate::error::CaseError;
use crate::mpc::MPC;
use crate::pf::PowerFlow;
use crate::scenario::{build, Contingency};
use crate::sweep::{run_sweep, CurveResult, Sample, SweepOptions};
use crate::transfer::TransferSpec;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifies one case of a contingency analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum CaseKey {
    Base,
    Outage(Contingency),
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseKey::Base => write!(f, "base"),
            CaseKey::Outage(c) => write!(f, "{}", c),
        }
    }
}

impl From<CaseKey> for String {
    fn from(key: CaseKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    Complete(CurveResult),
    /// Structural failure; holds whatever samples were recorded.
    Failed {
        error: CaseError,
        samples: Vec<Sample>,
    },
    /// The case was not run, e.g. its branch does not exist.
    Skipped {
        reason: String,
    },
    Cancelled,
}

impl CaseOutcome {
    pub fn curve(&self) -> Option<&CurveResult> {
        match self {
            CaseOutcome::Complete(curve) => Some(curve),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CaseOutcome::Complete(_) => "complete",
            CaseOutcome::Failed { .. } => "failed",
            CaseOutcome::Skipped { .. } => "skipped",
            CaseOutcome::Cancelled => "cancelled",
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// analysis. Checked before each case starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of every case of an analysis, ordered by case key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContingencySet {
    cases: BTreeMap<CaseKey, CaseOutcome>,
}

impl ContingencySet {
    pub fn get(&self, key: &CaseKey) -> Option<&CaseOutcome> {
        self.cases.get(key)
    }

    pub fn base(&self) -> Option<&CurveResult> {
        self.get(&CaseKey::Base).and_then(CaseOutcome::curve)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaseKey, &CaseOutcome)> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// The `n` completed contingencies with the smallest power margin,
    /// most critical first.
    pub fn critical(&self, n: usize) -> Vec<(&CaseKey, &CurveResult)> {
        let mut curves: Vec<(&CaseKey, &CurveResult)> = self
            .cases
            .iter()
            .filter(|(key, _)| **key != CaseKey::Base)
            .filter_map(|(key, outcome)| outcome.curve().map(|c| (key, c)))
            .collect();
        curves.sort_by(|a, b| a.1.power_margin.total_cmp(&b.1.power_margin));
        curves.truncate(n);
        curves
    }
}

impl FromIterator<(CaseKey, CaseOutcome)> for ContingencySet {
    fn from_iter<I: IntoIterator<Item = (CaseKey, CaseOutcome)>>(iter: I) -> Self {
        Self {
            cases: iter.into_iter().collect(),
        }
    }
}

/// Runs the base case and a list of branch outages on a common network.
pub struct ContingencyAnalysis<'a> {
    pub base: &'a MPC,
    pub transfer: &'a TransferSpec,
    pub sweep: &'a SweepOptions,
    /// Trace the base case to collapse regardless of the transfer limit.
    pub run_base_to_completion: bool,
}

impl<'a> ContingencyAnalysis<'a> {
    /// Sweeps every case. Cases are independent: a failure or skip never
    /// affects the others. With the `parallel` feature cases run on the
    /// rayon thread pool.
    pub fn run(&self, contingencies: &[Contingency], pf: &dyn PowerFlow, cancel: &CancelToken) -> ContingencySet {
        let mut keys = vec![CaseKey::Base];
        keys.extend(contingencies.iter().map(|&c| CaseKey::Outage(c)));
        keys.sort_unstable();
        keys.dedup();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<(CaseKey, CaseOutcome)> = keys
            .par_iter()
            .map(|&key| (key, self.run_isolated(key, pf, cancel)))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<(CaseKey, CaseOutcome)> = keys
            .iter()
            .map(|&key| (key, self.run_isolated(key, pf, cancel)))
            .collect();

        outcomes.into_iter().collect()
    }

    /// Runs one case, turning a panic into a failed outcome for that case.
    fn run_isolated(&self, key: CaseKey, pf: &dyn PowerFlow, cancel: &CancelToken) -> CaseOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_case(key, pf, cancel))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("{}: sweep panicked: {}", key, message);
                CaseOutcome::Failed {
                    error: CaseError::Panicked(message),
                    samples: Vec::new(),
                }
            }
        }
    }

    fn run_case(&self, key: CaseKey, pf: &dyn PowerFlow, cancel: &CancelToken) -> CaseOutcome {
        if cancel.is_cancelled() {
            log::debug!("{}: cancelled", key);
            return CaseOutcome::Cancelled;
        }
        let contingency = match key {
            CaseKey::Base => None,
            CaseKey::Outage(c) => Some(c),
        };
        log::info!("{}: starting sweep", key);

        let scenario = match build(self.base, self.transfer, contingency) {
            Ok(scenario) => scenario,
            Err(error) => {
                log::warn!("{}: {}", key, error);
                return CaseOutcome::Failed {
                    error,
                    samples: Vec::new(),
                };
            }
        };
        if let (Some(c), false) = (contingency, scenario.outage_applied) {
            let reason = format!("no in-service branch joins buses {} and {}", c.from, c.to);
            log::warn!("{}: skipped, {}", key, reason);
            return CaseOutcome::Skipped { reason };
        }

        let result = if key == CaseKey::Base && self.run_base_to_completion {
            let opts = SweepOptions {
                ignore_transfer_limit: true,
                ..self.sweep.clone()
            };
            run_sweep(scenario, &opts, pf)
        } else {
            run_sweep(scenario, self.sweep, pf)
        };
        match result {
            Ok(curve) => CaseOutcome::Complete(curve),
            Err(error) => CaseOutcome::Failed {
                error,
                samples: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcase::radial_case;
    use crate::mpc::{Branch, Bus};
    use crate::mpopt::PFOpt;
    use crate::pf::{PfOutcome, RunPF};
    use num_complex::Complex64;

    /// Three buses in a ring, transfer from bus 1 to bus 3.
    fn ring() -> MPC {
        let mut mpc = radial_case(3, &[1], &[3], Complex64::new(0.0, 0.1));
        mpc.branch.push(Branch {
            f_bus: 1,
            t_bus: 3,
            x: 0.1,
            ..Default::default()
        });
        mpc
    }

    /// Power flow that panics whenever a branch is out of service.
    struct PanicsOnOutage;

    impl PowerFlow for PanicsOnOutage {
        fn solve(&self, mpc: &MPC, opt: &PFOpt, warm: Option<&[Complex64]>) -> PfOutcome {
            if mpc.branch.iter().any(|br| br.is_off()) {
                panic!("solver blew up");
            }
            RunPF::new().solve(mpc, opt, warm)
        }
    }

    fn outages(list: &[&str]) -> anyhow::Result<Vec<Contingency>> {
        list.iter().map(|s| s.parse()).collect()
    }

    #[test]
    fn test_unknown_branch_is_skipped() -> anyhow::Result<()> {
        let mpc = ring();
        let transfer = TransferSpec::targeted(&[1], &[3], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: true,
        };
        let set = analysis.run(&outages(&["1_2", "9_8", "3_1"])?, &RunPF::new(), &CancelToken::new());

        assert_eq!(set.len(), 4);
        let skipped = set.get(&CaseKey::Outage("9_8".parse()?));
        assert!(matches!(skipped, Some(CaseOutcome::Skipped { .. })));

        let base = set.base().ok_or_else(|| anyhow::anyhow!("base case incomplete"))?;
        let critical = set.critical(5);
        assert_eq!(critical.len(), 2);
        assert_eq!(critical[0].0.to_string(), "3_1");
        assert!(critical[0].1.power_margin < critical[1].1.power_margin);
        assert!(critical[1].1.power_margin < base.power_margin);
        assert_eq!(set.critical(1).len(), 1);
        Ok(())
    }

    #[test]
    fn test_base_case_failure_is_per_case() -> anyhow::Result<()> {
        let mut mpc = ring();
        mpc.bus[2].pd = 600.0;
        mpc.bus[2].qd = 0.0;
        let transfer = TransferSpec::targeted(&[1], &[3], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: false,
        };
        let set = analysis.run(&outages(&["1_3"])?, &RunPF::new(), &CancelToken::new());

        // 600 MW is within reach of the ring but not of the single path left.
        assert!(set.base().is_some());
        assert!(matches!(
            set.get(&CaseKey::Outage("1_3".parse()?)),
            Some(CaseOutcome::Failed {
                error: CaseError::BaseCaseInfeasible(_),
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_cancelled_before_start() -> anyhow::Result<()> {
        let mpc = ring();
        let transfer = TransferSpec::targeted(&[1], &[3], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: false,
        };
        let cancel = CancelToken::new();
        cancel.clone().cancel();
        let set = analysis.run(&outages(&["1_2"])?, &RunPF::new(), &cancel);
        assert!(set.iter().all(|(_, o)| *o == CaseOutcome::Cancelled));
        Ok(())
    }

    #[test]
    fn test_structural_failure() {
        let mpc = ring();
        let transfer = TransferSpec::targeted(&[1], &[7], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: false,
        };
        let set = analysis.run(&[], &RunPF::new(), &CancelToken::new());
        assert_eq!(
            set.get(&CaseKey::Base).map(CaseOutcome::label),
            Some("failed")
        );
    }

    #[test]
    fn test_panic_fails_only_its_case() -> anyhow::Result<()> {
        let mpc = ring();
        let transfer = TransferSpec::targeted(&[1], &[3], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: false,
        };
        let set = analysis.run(&outages(&["1_2"])?, &PanicsOnOutage, &CancelToken::new());

        assert!(set.base().is_some());
        assert_eq!(
            set.get(&CaseKey::Outage("1_2".parse()?)),
            Some(&CaseOutcome::Failed {
                error: CaseError::Panicked("solver blew up".to_string()),
                samples: vec![],
            })
        );
        Ok(())
    }

    #[test]
    fn test_disconnected_unloaded_bus_completes() -> anyhow::Result<()> {
        // Stub bus 4 on bus 2 with no load; its outage leaves the loads served.
        let mut mpc = radial_case(3, &[1], &[3], Complex64::new(0.01, 0.1));
        mpc.bus.push(Bus {
            bus_i: 4,
            ..Default::default()
        });
        mpc.branch.push(Branch {
            f_bus: 2,
            t_bus: 4,
            x: 0.1,
            ..Default::default()
        });
        let transfer = TransferSpec::targeted(&[1], &[3], 3);
        let sweep = SweepOptions::default();
        let analysis = ContingencyAnalysis {
            base: &mpc,
            transfer: &transfer,
            sweep: &sweep,
            run_base_to_completion: false,
        };
        let set = analysis.run(&outages(&["2_4"])?, &RunPF::new(), &CancelToken::new());

        let base = set.base().ok_or_else(|| anyhow::anyhow!("base case incomplete"))?;
        let stub = set
            .get(&CaseKey::Outage("2_4".parse()?))
            .and_then(CaseOutcome::curve)
            .ok_or_else(|| anyhow::anyhow!("stub outage incomplete"))?;
        assert!(base.power_margin > 0.0);
        assert!((stub.power_margin - base.power_margin).abs() < 0.1 * base.power_margin);
        Ok(())
    }

    #[test]
    fn test_case_key_display() {
        assert_eq!(CaseKey::Base.to_string(), "base");
        assert_eq!(CaseKey::Outage(Contingency { from: 4, to: 7 }).to_string(), "4_7");
        assert!(CaseKey::Base < CaseKey::Outage(Contingency { from: 1, to: 2 }));
    }
}
