use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize, clap::ValueEnum)]
pub enum Alg {
    /// Newton's method.
    NR,
    /// Newton's method with a backtracking line search on the mismatch norm.
    NRLineSearch,
    /// Gauss-Seidel method.
    GS,
}

/// Starting point of the iterative solution.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum InitMode {
    /// All voltages 1 p.u. at zero angle (generator setpoints still apply).
    Flat,
    /// Voltages stored in the case data.
    CaseData,
    /// Previous converged solution, falling back to case data when none.
    Warm,
}

/// Power flow options. One entry of a solver fallback list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PFOpt {
    /// AC power flow algorithm.
    pub algorithm: Alg,

    /// Termination tolerance on per unit P & Q mismatch. Default value is 1e-8.
    pub tolerance: f64,

    /// Maximum number of iterations. Default value is 10.
    pub max_it: usize,

    pub init: InitMode,

    /// Enforce gen reactive power limits at expense of |V|.
    pub enforce_q_limits: bool,
}

impl Default for PFOpt {
    fn default() -> Self {
        Self {
            algorithm: Alg::NR,
            tolerance: 1e-8,
            max_it: 10,
            init: InitMode::Warm,
            enforce_q_limits: false,
        }
    }
}

impl PFOpt {
    /// Default iteration limit of each algorithm.
    pub fn default_max_it(alg: Alg) -> usize {
        match alg {
            Alg::NR | Alg::NRLineSearch => 10,
            Alg::GS => 1000,
        }
    }

    /// Fallback list used on the stable branch of the curve: a tight warm
    /// started Newton solve, then a looser flat start, then a damped Newton.
    pub fn standard_fallback(enforce_q_limits: bool) -> Vec<PFOpt> {
        vec![
            PFOpt {
                algorithm: Alg::NR,
                tolerance: 1e-8,
                max_it: 10,
                init: InitMode::Warm,
                enforce_q_limits,
            },
            PFOpt {
                algorithm: Alg::NR,
                tolerance: 1e-6,
                max_it: 50,
                init: InitMode::Flat,
                enforce_q_limits,
            },
            PFOpt {
                algorithm: Alg::NRLineSearch,
                tolerance: 1e-6,
                max_it: 50,
                init: InitMode::Warm,
                enforce_q_limits,
            },
        ]
    }

    /// Fallback list used once the nose has been passed. Always warm
    /// started with relaxed tolerances.
    pub fn relaxed_fallback(enforce_q_limits: bool) -> Vec<PFOpt> {
        vec![
            PFOpt {
                algorithm: Alg::NRLineSearch,
                tolerance: 1e-5,
                max_it: 100,
                init: InitMode::Warm,
                enforce_q_limits,
            },
            PFOpt {
                algorithm: Alg::GS,
                tolerance: 1e-4,
                max_it: 1000,
                init: InitMode::Warm,
                enforce_q_limits,
            },
        ]
    }
}
