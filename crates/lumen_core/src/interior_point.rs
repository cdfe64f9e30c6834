//! Primal log-barrier interior-point method for small dense NLPs.
//!
//! Each iteration takes a Newton step on the KKT system of the barrier subproblem
//!
//! ```text
//! minimize φ_μ(x) = f(x) - μ·Σ ln(-g_k(x)) - μ·Σ ln(x_i - l_i) - μ·Σ ln(u_i - x_i)
//! subject to h(x) = 0
//! ```
//!
//! with inertia correction of the KKT matrix, the fraction-to-boundary rule and Armijo
//! backtracking on the ℓ1 merit `φ_μ(x) + ν·‖h(x)‖₁`. Inequality multipliers are the
//! primal estimates `z_k = μ / s_k`.

use crate::nlp::{NlpProblem, NlpSolution, NlpSolver, SolveStatus};
use anyhow::{bail, Result};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};

const ARMIJO_FACTOR: f64 = 1e-4;
const PENALTY_MARGIN: f64 = 1.1;
const PENALTY_FLOOR: f64 = 1e-6;
const FIRST_HESSIAN_SHIFT: f64 = 1e-4;
const HESSIAN_SHIFT_GROWTH: f64 = 8.0;
const CONSTRAINT_REGULARIZATION: f64 = 1e-8;
const MAX_INERTIA_CORRECTIONS: usize = 60;
const ZERO_EIGENVALUE: f64 = 1e-14;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InteriorPointSettings {
    /// Target for primal and dual infeasibility.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Initial barrier parameter.
    pub mu_init: f64,
    /// Absolute push of the initial point away from the variable bounds.
    pub bound_push: f64,
    /// Relative push, as a fraction of the bound interval.
    pub bound_frac: f64,
    /// Minimum fraction-to-boundary factor.
    pub fraction_to_boundary: f64,
    pub mu_linear_decrease: f64,
    pub mu_superlinear_power: f64,
    /// A barrier subproblem counts as solved once its error drops below this factor times μ.
    pub barrier_tolerance_factor: f64,
    pub max_backtracks: usize,
}

impl Default for InteriorPointSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 3000,
            mu_init: 0.1,
            bound_push: 1e-2,
            bound_frac: 1e-2,
            fraction_to_boundary: 0.99,
            mu_linear_decrease: 0.2,
            mu_superlinear_power: 1.5,
            barrier_tolerance_factor: 10.0,
            max_backtracks: 40,
        }
    }
}

impl InteriorPointSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            bail!("tolerance must be positive.");
        }
        if self.max_iterations == 0 {
            bail!("max_iterations must be greater than zero.");
        }
        if !(self.mu_init > 0.0) {
            bail!("mu_init must be positive.");
        }
        if !(self.bound_push > 0.0) {
            bail!("bound_push must be positive.");
        }
        if !(self.bound_frac > 0.0 && self.bound_frac <= 0.5) {
            bail!("bound_frac must lie in (0, 0.5].");
        }
        if !(self.fraction_to_boundary > 0.0 && self.fraction_to_boundary < 1.0) {
            bail!("fraction_to_boundary must lie in (0, 1).");
        }
        if !(self.mu_linear_decrease > 0.0 && self.mu_linear_decrease < 1.0) {
            bail!("mu_linear_decrease must lie in (0, 1).");
        }
        if !(self.mu_superlinear_power > 1.0 && self.mu_superlinear_power < 2.0) {
            bail!("mu_superlinear_power must lie in (1, 2).");
        }
        if !(self.barrier_tolerance_factor > 0.0) {
            bail!("barrier_tolerance_factor must be positive.");
        }
        if self.max_backtracks == 0 {
            bail!("max_backtracks must be greater than zero.");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteriorPointSolver {
    settings: InteriorPointSettings,
}

impl InteriorPointSolver {
    pub fn new(settings: InteriorPointSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &InteriorPointSettings {
        &self.settings
    }
}

impl NlpSolver for InteriorPointSolver {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &[f64]) -> Result<NlpSolution> {
        let settings = &self.settings;
        settings.validate()?;

        let barrier = BarrierProblem::new(problem)?;
        if initial_guess.len() != barrier.n {
            bail!(
                "Initial guess dimension mismatch. Expected {}, got {}.",
                barrier.n,
                initial_guess.len()
            );
        }
        if initial_guess.iter().any(|v| !v.is_finite()) {
            bail!("Initial guess must be finite.");
        }

        let pushed = barrier.push_into_interior(initial_guess, settings);
        let mut x = barrier.recover_strict_feasibility(pushed);
        let mut lambda = DVector::zeros(barrier.m);
        let mut mu = settings.mu_init;

        if !barrier.is_strictly_feasible(&x) {
            debug!("initial point violates an inequality constraint");
            return Ok(barrier.finish(x, &lambda, mu, SolveStatus::InfeasibleStart, 0));
        }

        let mu_floor = settings.tolerance / 10.0;
        let mut iterations = 0usize;

        let status = loop {
            let errors = barrier.kkt_errors(&x, &lambda, mu);
            if !errors.is_finite() {
                break SolveStatus::InvalidNumbers;
            }
            if errors.dual <= settings.tolerance
                && errors.primal <= settings.tolerance
                && mu <= mu_floor
            {
                break SolveStatus::Optimal;
            }
            if errors.max() <= settings.barrier_tolerance_factor * mu {
                if mu <= mu_floor {
                    break SolveStatus::Optimal;
                }
                mu = (settings.mu_linear_decrease * mu)
                    .min(mu.powf(settings.mu_superlinear_power))
                    .max(mu_floor);
                debug!("barrier parameter reduced to {mu:e} after {iterations} iterations");
                continue;
            }
            if iterations >= settings.max_iterations {
                break SolveStatus::MaxIterations;
            }
            iterations += 1;

            match self.newton_step(&barrier, &x, &lambda, mu) {
                StepOutcome::Taken {
                    x: next,
                    lambda: next_lambda,
                    alpha,
                } => {
                    trace!(
                        "iteration {iterations}: mu = {mu:e}, alpha = {alpha:.3e}, dual = {:.3e}, primal = {:.3e}",
                        errors.dual,
                        errors.primal
                    );
                    x = next;
                    lambda = next_lambda;
                }
                // Nothing changed, so another Newton step would stall identically.
                StepOutcome::Stalled => break SolveStatus::Stalled,
                StepOutcome::Singular => break SolveStatus::SingularSystem,
                StepOutcome::NonFinite => break SolveStatus::InvalidNumbers,
            }
        };

        debug!("interior point finished with {status:?} after {iterations} iterations");
        Ok(barrier.finish(x, &lambda, mu, status, iterations))
    }
}

enum StepOutcome {
    Taken {
        x: Vec<f64>,
        lambda: DVector<f64>,
        alpha: f64,
    },
    Stalled,
    Singular,
    NonFinite,
}

impl InteriorPointSolver {
    fn newton_step(
        &self,
        barrier: &BarrierProblem<'_>,
        x: &[f64],
        lambda: &DVector<f64>,
        mu: f64,
    ) -> StepOutcome {
        let problem = barrier.problem;
        let (n, m) = (barrier.n, barrier.m);

        let slacks = barrier.slacks(x);
        let z: Vec<f64> = slacks.iter().map(|s| mu / s).collect();
        let grad_phi = barrier.barrier_gradient(x, mu, &slacks);
        let a = problem.equality_jacobian(x);
        let mut h = vec![0.0; m];
        problem.equalities(x, &mut h);

        let mut w = problem.lagrangian_hessian(x, 1.0, lambda.as_slice(), &z);
        barrier.add_barrier_hessian(&mut w, x, mu, &slacks, &z);
        let kkt = inertia_corrected_kkt(&w, &a, mu);

        let mut rhs = DVector::zeros(n + m);
        for i in 0..n {
            rhs[i] = -grad_phi[i];
        }
        for j in 0..m {
            rhs[n + j] = -h[j];
        }
        let solution = match kkt.lu().solve(&rhs) {
            Some(solution) => solution,
            None => return StepOutcome::Singular,
        };
        if solution.iter().any(|v| !v.is_finite()) {
            return StepOutcome::NonFinite;
        }
        let dx: Vec<f64> = solution.iter().take(n).cloned().collect();
        let lambda_trial = DVector::from_iterator(m, solution.iter().skip(n).cloned());

        let tau = self.settings.fraction_to_boundary.max(1.0 - mu);
        let alpha_max = barrier.max_step(x, &dx, &slacks, tau);

        let h_norm: f64 = h.iter().map(|v| v.abs()).sum();
        let nu = PENALTY_MARGIN * max_abs(lambda_trial.as_slice()) + PENALTY_FLOOR;
        let merit0 = barrier.barrier_value(x, mu) + nu * h_norm;
        let slope = grad_phi.iter().zip(&dx).map(|(g, d)| g * d).sum::<f64>() - nu * h_norm;

        let mut alpha = alpha_max;
        let mut fallback = None;
        let mut accepted = None;
        for _ in 0..self.settings.max_backtracks {
            let candidate: Vec<f64> = x.iter().zip(&dx).map(|(xi, di)| xi + alpha * di).collect();
            if barrier.is_strictly_feasible(&candidate) {
                let merit = barrier.merit(&candidate, mu, nu);
                if merit <= merit0 + ARMIJO_FACTOR * alpha * slope.min(0.0) {
                    accepted = Some((candidate, alpha));
                    break;
                }
                fallback = Some((candidate, alpha));
            }
            alpha *= 0.5;
        }

        match accepted.or(fallback) {
            Some((next, alpha)) => StepOutcome::Taken {
                x: next,
                lambda: lambda + (lambda_trial - lambda) * alpha,
                alpha,
            },
            None => StepOutcome::Stalled,
        }
    }
}

/// Builds `[W + δI, Aᵀ; A, -δc·I]`, increasing `δ` (and `δc` for rank-deficient `A`) until the
/// matrix has `n` positive and `m` negative eigenvalues.
fn inertia_corrected_kkt(w: &DMatrix<f64>, a: &DMatrix<f64>, mu: f64) -> DMatrix<f64> {
    let n = w.nrows();
    let m = a.nrows();
    let mut delta = 0.0;
    let mut delta_c = 0.0;
    let mut kkt = assemble_kkt(w, a, delta, delta_c);

    for _ in 0..MAX_INERTIA_CORRECTIONS {
        let (positive, negative) = inertia(&kkt);
        if positive == n && negative == m {
            break;
        }
        if positive + negative < n + m && delta_c == 0.0 {
            delta_c = CONSTRAINT_REGULARIZATION * mu.powf(0.25);
        } else {
            delta = if delta == 0.0 {
                FIRST_HESSIAN_SHIFT
            } else {
                delta * HESSIAN_SHIFT_GROWTH
            };
        }
        kkt = assemble_kkt(w, a, delta, delta_c);
    }

    kkt
}

fn assemble_kkt(w: &DMatrix<f64>, a: &DMatrix<f64>, delta: f64, delta_c: f64) -> DMatrix<f64> {
    let n = w.nrows();
    let m = a.nrows();
    let mut kkt = DMatrix::zeros(n + m, n + m);
    for i in 0..n {
        for j in 0..n {
            kkt[(i, j)] = w[(i, j)];
        }
        kkt[(i, i)] += delta;
    }
    for j in 0..m {
        for i in 0..n {
            kkt[(n + j, i)] = a[(j, i)];
            kkt[(i, n + j)] = a[(j, i)];
        }
        kkt[(n + j, n + j)] = -delta_c;
    }
    kkt
}

fn inertia(matrix: &DMatrix<f64>) -> (usize, usize) {
    let eigen = SymmetricEigen::new(matrix.clone());
    let positive = eigen.eigenvalues.iter().filter(|&&v| v > ZERO_EIGENVALUE).count();
    let negative = eigen.eigenvalues.iter().filter(|&&v| v < -ZERO_EIGENVALUE).count();
    (positive, negative)
}

#[derive(Debug, Clone, Copy)]
struct KktErrors {
    dual: f64,
    primal: f64,
}

impl KktErrors {
    fn max(&self) -> f64 {
        self.dual.max(self.primal)
    }

    fn is_finite(&self) -> bool {
        self.dual.is_finite() && self.primal.is_finite()
    }
}

/// The barrier reformulation of an [`NlpProblem`] with its bounds unpacked.
struct BarrierProblem<'a> {
    problem: &'a dyn NlpProblem,
    lower: Vec<f64>,
    upper: Vec<f64>,
    n: usize,
    m: usize,
    k: usize,
}

impl<'a> BarrierProblem<'a> {
    fn new(problem: &'a dyn NlpProblem) -> Result<Self> {
        let n = problem.num_variables();
        if n == 0 {
            bail!("Problem has zero variables.");
        }
        let (lower, upper) = problem.bounds();
        if lower.len() != n || upper.len() != n {
            bail!(
                "Bound dimension mismatch. Expected {}, got {} lower and {} upper.",
                n,
                lower.len(),
                upper.len()
            );
        }
        if lower.iter().zip(&upper).any(|(l, u)| !(l < u)) {
            bail!("Variable bounds must satisfy lower < upper.");
        }
        Ok(Self {
            problem,
            lower,
            upper,
            n,
            m: problem.num_equalities(),
            k: problem.num_inequalities(),
        })
    }

    fn push_into_interior(&self, guess: &[f64], settings: &InteriorPointSettings) -> Vec<f64> {
        guess
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let (l, u) = (self.lower[i], self.upper[i]);
                let width = u - l;
                let mut x = value;
                if l.is_finite() {
                    let push = (settings.bound_push * l.abs().max(1.0))
                        .min(settings.bound_frac * width);
                    x = x.max(l + push);
                }
                if u.is_finite() {
                    let push = (settings.bound_push * u.abs().max(1.0))
                        .min(settings.bound_frac * width);
                    x = x.min(u - push);
                }
                x
            })
            .collect()
    }

    /// Pulls `x` toward the problem's interior reference until every slack is positive.
    /// Returns `x` unchanged if it is already strictly feasible or no usable reference exists.
    fn recover_strict_feasibility(&self, x: Vec<f64>) -> Vec<f64> {
        if self.is_strictly_feasible(&x) {
            return x;
        }
        let Some(reference) = self.problem.interior_reference() else {
            return x;
        };
        if reference.len() != self.n || !self.is_strictly_feasible(&reference) {
            debug!("interior reference is not strictly feasible; keeping the initial point");
            return x;
        }

        let mut t = 0.01_f64;
        loop {
            let trial: Vec<f64> = x
                .iter()
                .zip(&reference)
                .map(|(xi, ri)| xi + t * (ri - xi))
                .collect();
            if self.is_strictly_feasible(&trial) {
                debug!("initial point pulled {t} of the way toward the interior reference");
                return trial;
            }
            if t >= 1.0 {
                return x;
            }
            t = (2.0 * t).min(1.0);
        }
    }

    /// `s = -g(x)`, positive in the strict interior.
    fn slacks(&self, x: &[f64]) -> Vec<f64> {
        let mut g = vec![0.0; self.k];
        self.problem.inequalities(x, &mut g);
        g.iter().map(|v| -v).collect()
    }

    fn is_strictly_feasible(&self, x: &[f64]) -> bool {
        let inside_bounds = x
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(xi, (l, u))| xi > l && xi < u);
        inside_bounds && self.slacks(x).iter().all(|s| *s > 0.0)
    }

    fn barrier_value(&self, x: &[f64], mu: f64) -> f64 {
        let mut value = self.problem.objective(x);
        for s in self.slacks(x) {
            value -= mu * s.ln();
        }
        for i in 0..self.n {
            if self.lower[i].is_finite() {
                value -= mu * (x[i] - self.lower[i]).ln();
            }
            if self.upper[i].is_finite() {
                value -= mu * (self.upper[i] - x[i]).ln();
            }
        }
        value
    }

    fn merit(&self, x: &[f64], mu: f64, nu: f64) -> f64 {
        let mut h = vec![0.0; self.m];
        self.problem.equalities(x, &mut h);
        self.barrier_value(x, mu) + nu * h.iter().map(|v| v.abs()).sum::<f64>()
    }

    fn barrier_gradient(&self, x: &[f64], mu: f64, slacks: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; self.n];
        self.problem.objective_gradient(x, &mut grad);
        if self.k > 0 {
            let g_jac = self.problem.inequality_jacobian(x);
            for (row, s) in slacks.iter().enumerate() {
                let z = mu / s;
                for i in 0..self.n {
                    grad[i] += g_jac[(row, i)] * z;
                }
            }
        }
        for i in 0..self.n {
            if self.lower[i].is_finite() {
                grad[i] -= mu / (x[i] - self.lower[i]);
            }
            if self.upper[i].is_finite() {
                grad[i] += mu / (self.upper[i] - x[i]);
            }
        }
        grad
    }

    fn add_barrier_hessian(
        &self,
        w: &mut DMatrix<f64>,
        x: &[f64],
        mu: f64,
        slacks: &[f64],
        z: &[f64],
    ) {
        for i in 0..self.n {
            if self.lower[i].is_finite() {
                let d = x[i] - self.lower[i];
                w[(i, i)] += mu / (d * d);
            }
            if self.upper[i].is_finite() {
                let d = self.upper[i] - x[i];
                w[(i, i)] += mu / (d * d);
            }
        }
        if self.k > 0 {
            let g_jac = self.problem.inequality_jacobian(x);
            for row in 0..self.k {
                let weight = z[row] / slacks[row];
                for i in 0..self.n {
                    for j in 0..self.n {
                        w[(i, j)] += weight * g_jac[(row, i)] * g_jac[(row, j)];
                    }
                }
            }
        }
    }

    /// Largest step in `(0, 1]` keeping every bound distance and slack above `(1 - τ)` of its
    /// current value, to first order.
    fn max_step(&self, x: &[f64], dx: &[f64], slacks: &[f64], tau: f64) -> f64 {
        let mut alpha: f64 = 1.0;
        for i in 0..self.n {
            if dx[i] < 0.0 && self.lower[i].is_finite() {
                alpha = alpha.min(tau * (x[i] - self.lower[i]) / -dx[i]);
            }
            if dx[i] > 0.0 && self.upper[i].is_finite() {
                alpha = alpha.min(tau * (self.upper[i] - x[i]) / dx[i]);
            }
        }
        if self.k > 0 {
            let g_jac = self.problem.inequality_jacobian(x);
            for (row, s) in slacks.iter().enumerate() {
                let rate: f64 = (0..self.n).map(|i| g_jac[(row, i)] * dx[i]).sum();
                if rate > 0.0 {
                    alpha = alpha.min(tau * s / rate);
                }
            }
        }
        alpha
    }

    fn kkt_errors(&self, x: &[f64], lambda: &DVector<f64>, mu: f64) -> KktErrors {
        let slacks = self.slacks(x);
        let mut residual = self.barrier_gradient(x, mu, &slacks);
        if self.m > 0 {
            let a = self.problem.equality_jacobian(x);
            for j in 0..self.m {
                for i in 0..self.n {
                    residual[i] += a[(j, i)] * lambda[j];
                }
            }
        }
        KktErrors {
            dual: max_abs(&residual),
            primal: self.primal_infeasibility(x),
        }
    }

    fn primal_infeasibility(&self, x: &[f64]) -> f64 {
        let mut h = vec![0.0; self.m];
        self.problem.equalities(x, &mut h);
        max_abs(&h)
    }

    fn finish(
        &self,
        x: Vec<f64>,
        lambda: &DVector<f64>,
        mu: f64,
        status: SolveStatus,
        iterations: usize,
    ) -> NlpSolution {
        let errors = self.kkt_errors(&x, lambda, mu);
        NlpSolution {
            objective: self.problem.objective(&x),
            x,
            status,
            iterations,
            primal_infeasibility: errors.primal,
            dual_infeasibility: errors.dual,
        }
    }
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}
