mod bus_types;
mod config;
mod contingency;
mod dense;
mod error;
mod gauss;
mod idx;
mod jac;
mod loadcase;
mod mpc;
mod mpopt;
mod newton;
mod nose;
mod pf;
mod sbus;
mod step;
mod sweep;
mod traits;
mod transfer;
mod ybus;

pub mod debug;
pub mod export;
pub mod scenario;

pub use bus_types::*;
pub use config::*;
pub use contingency::*;
pub use dense::*;
pub use error::*;
pub use jac::*;
pub use loadcase::*;
pub use mpc::*;
pub use mpopt::*;
pub use newton::{LogProgress, ProgressMonitor};
pub use nose::*;
pub use pf::*;
pub use sbus::*;
pub use scenario::{Contingency, Scenario};
pub use step::*;
pub use sweep::*;
pub use traits::*;
pub use transfer::*;
pub use ybus::*;
