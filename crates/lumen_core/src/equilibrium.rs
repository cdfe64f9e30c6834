//! Constrained equilibrium problem at a single light intensity.
//!
//! The equilibrium is the stationary point of the balance equations that maximizes net
//! production `v_P(p) - γ·p`, subject to the biological partition `c + p ≤ 1 - ε` and the
//! variable bounds.

use crate::model::{AllocationModel, StateVector};
use crate::nlp::{NlpProblem, NlpSolver, SolveStatus};
use anyhow::{anyhow, Context, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EquilibriumSolution {
    pub state: StateVector,
    /// Net production `v_P(p) - γ·p` at `state`.
    pub objective: f64,
    pub status: SolveStatus,
    pub iterations: usize,
    /// Largest absolute balance residual at `state`.
    pub residual: f64,
}

impl EquilibriumSolution {
    pub fn is_optimal(&self) -> bool {
        self.status.is_optimal()
    }
}

/// [`NlpProblem`] view of the model at one light intensity. Variables are ordered `(c, p, u)`.
pub struct EquilibriumProblem<'a> {
    model: &'a AllocationModel,
}

impl<'a> EquilibriumProblem<'a> {
    pub fn new(model: &'a AllocationModel) -> Self {
        Self { model }
    }

    fn state(x: &[f64]) -> StateVector {
        StateVector::new(x[0], x[1], x[2])
    }
}

impl<'a> NlpProblem for EquilibriumProblem<'a> {
    fn num_variables(&self) -> usize {
        3
    }

    fn num_equalities(&self) -> usize {
        2
    }

    fn num_inequalities(&self) -> usize {
        1
    }

    fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let (lower, upper) = StateVector::bounds(self.model.params().epsilon);
        (lower.to_vec(), upper.to_vec())
    }

    fn objective(&self, x: &[f64]) -> f64 {
        -self.model.net_production(x[1])
    }

    fn objective_gradient(&self, x: &[f64], out: &mut [f64]) {
        out[0] = 0.0;
        out[1] = -self.model.net_production_gradient(x[1]);
        out[2] = 0.0;
    }

    fn equalities(&self, x: &[f64], out: &mut [f64]) {
        out.copy_from_slice(&self.model.balance(&Self::state(x)));
    }

    fn equality_jacobian(&self, x: &[f64]) -> DMatrix<f64> {
        let jac = self.model.balance_jacobian(&Self::state(x));
        DMatrix::from_row_slice(2, 3, &[jac.fc, jac.fp].concat())
    }

    fn inequalities(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[0] + x[1] - (1.0 - self.model.params().epsilon);
    }

    fn inequality_jacobian(&self, _x: &[f64]) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 0.0])
    }

    fn lagrangian_hessian(
        &self,
        x: &[f64],
        objective_factor: f64,
        equality_multipliers: &[f64],
        _inequality_multipliers: &[f64],
    ) -> DMatrix<f64> {
        let [hess_c, hess_p] = self.model.balance_hessians(&Self::state(x));
        let mut hessian = DMatrix::zeros(3, 3);
        hessian[(1, 1)] = -objective_factor * self.model.net_production_curvature(x[1]);
        for i in 0..3 {
            for j in 0..3 {
                hessian[(i, j)] += equality_multipliers[0] * hess_c[(i, j)]
                    + equality_multipliers[1] * hess_p[(i, j)];
            }
        }
        hessian
    }

    /// Centroid of the feasible `(c, p)` triangle with half allocation.
    fn interior_reference(&self) -> Option<Vec<f64>> {
        Some(vec![1.0 / 3.0, 1.0 / 3.0, 0.5])
    }
}

/// Solves for the equilibrium of `model`, starting from `seed`.
///
/// Non-convergence is not an error: the last iterate is returned with a non-optimal status.
/// The returned state is clamped into the variable bounds.
pub fn solve_equilibrium<S: NlpSolver + ?Sized>(
    solver: &S,
    model: &AllocationModel,
    seed: &StateVector,
) -> Result<EquilibriumSolution> {
    let problem = EquilibriumProblem::new(model);
    let solution = solver
        .solve(&problem, &seed.to_array())
        .with_context(|| format!("Equilibrium solve failed at light {}", model.light()))?;

    let state = StateVector::from_slice(&solution.x)
        .ok_or_else(|| {
            anyhow!(
                "Solver returned {} values for a 3-dimensional problem.",
                solution.x.len()
            )
        })?
        .clamped(model.params().epsilon);

    let residual = model
        .balance(&state)
        .iter()
        .fold(0.0_f64, |acc, r| acc.max(r.abs()));

    Ok(EquilibriumSolution {
        state,
        objective: model.net_production(state.p),
        status: solution.status,
        iterations: solution.iterations,
        residual,
    })
}
