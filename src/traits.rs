use crate::dense::{lu_solve, Mat};

pub trait LinearSolver {
    fn solve(&self, a_mat: Mat<f64>, b: &[f64]) -> Result<Vec<f64>, String>;
}

/// Dense LU factorization with partial pivoting.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseLU;

impl LinearSolver for DenseLU {
    fn solve(&self, a_mat: Mat<f64>, b: &[f64]) -> Result<Vec<f64>, String> {
        lu_solve(a_mat, b)
    }
}
