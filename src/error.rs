use serde::Serialize;
use thiserror::Error;

/// Structural failure of a single case. Never aborts sibling cases.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum CaseError {
    #[error("network has no buses")]
    EmptyNetwork,

    #[error("network has no loads")]
    NoLoads,

    #[error("network has no reference bus")]
    NoReferenceBus,

    #[error("bus {0} does not exist in the network")]
    UnknownBus(usize),

    #[error("targeted transfer has no sink buses")]
    NoSinks,

    #[error("bus {0} is not connected to a reference bus")]
    IslandedBus(usize),

    #[error("base case power flow did not converge: {0}")]
    BaseCaseInfeasible(String),

    #[error("sweep panicked: {0}")]
    Panicked(String),
}
