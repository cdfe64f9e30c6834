use anyhow::Result;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// A smooth nonlinear program
///
/// ```text
/// minimize f(x)  subject to  h(x) = 0,  g(x) ≤ 0,  lower ≤ x ≤ upper
/// ```
///
/// Jacobians are dense with one row per constraint.
pub trait NlpProblem {
    fn num_variables(&self) -> usize;

    fn num_equalities(&self) -> usize;

    fn num_inequalities(&self) -> usize;

    /// Lower and upper variable bounds.
    fn bounds(&self) -> (Vec<f64>, Vec<f64>);

    fn objective(&self, x: &[f64]) -> f64;

    fn objective_gradient(&self, x: &[f64], out: &mut [f64]);

    fn equalities(&self, x: &[f64], out: &mut [f64]);

    fn equality_jacobian(&self, x: &[f64]) -> DMatrix<f64>;

    fn inequalities(&self, x: &[f64], out: &mut [f64]);

    fn inequality_jacobian(&self, x: &[f64]) -> DMatrix<f64>;

    /// Hessian of `σ·f(x) + λᵀh(x) + zᵀg(x)`.
    fn lagrangian_hessian(
        &self,
        x: &[f64],
        objective_factor: f64,
        equality_multipliers: &[f64],
        inequality_multipliers: &[f64],
    ) -> DMatrix<f64>;

    /// A point strictly inside the bounds and every inequality, if one is known. Solvers use it
    /// to recover a start that lies on or outside an inequality constraint.
    fn interior_reference(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    MaxIterations,
    /// An iterate or a KKT quantity became non-finite.
    InvalidNumbers,
    /// The initial point violates a general inequality constraint and could not be recovered.
    InfeasibleStart,
    /// The Newton system could not be factorized.
    SingularSystem,
    /// No trial point along the Newton direction stayed strictly feasible.
    Stalled,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NlpSolution {
    /// Final iterate. For non-optimal statuses this is the last point reached.
    pub x: Vec<f64>,
    pub objective: f64,
    pub status: SolveStatus,
    pub iterations: usize,
    pub primal_infeasibility: f64,
    pub dual_infeasibility: f64,
}

/// A solver for [`NlpProblem`]s.
///
/// `Err` is reserved for malformed input (dimension mismatches, invalid settings). Failing to
/// converge is reported through [`NlpSolution::status`].
pub trait NlpSolver {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &[f64]) -> Result<NlpSolution>;
}

impl<T: NlpSolver + ?Sized> NlpSolver for &T {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &[f64]) -> Result<NlpSolution> {
        (**self).solve(problem, initial_guess)
    }
}

impl<T: NlpSolver + ?Sized> NlpSolver for Box<T> {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &[f64]) -> Result<NlpSolution> {
        (**self).solve(problem, initial_guess)
    }
}
