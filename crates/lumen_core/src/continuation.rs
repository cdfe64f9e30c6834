pub mod types;

pub use types::{ContinuationRecord, ContinuationResult, SolverWarning, SweepProgress};

use crate::equilibrium::solve_equilibrium;
use crate::model::{validate_lights, AllocationModel, ModelParameters, StateVector};
use crate::nlp::NlpSolver;
use crate::stability::classify;
use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// How the warm-start seed moves after each solve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Always seed the next solve with the latest point, even after a failed solve.
    #[default]
    AlwaysAdvance,
    /// Only advance after an optimal solve; otherwise keep the previous seed.
    HoldOnFailure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SweepSettings {
    pub initial_seed: StateVector,
    pub seed_policy: SeedPolicy,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            initial_seed: StateVector::default(),
            seed_policy: SeedPolicy::AlwaysAdvance,
        }
    }
}

/// `count` evenly spaced light values from `start` to `end` inclusive.
pub fn linear_sweep(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Warm-started continuation of the model's equilibrium over an ordered light sequence.
///
/// One record is produced per light value, in input order, whatever the solver status. The
/// sweep can be driven to completion with [`SweepRunner::run_to_end`] or in batches with
/// [`SweepRunner::run_steps`] when progress needs reporting.
pub struct SweepRunner<S> {
    solver: S,
    params: ModelParameters,
    lights: Vec<f64>,
    policy: SeedPolicy,
    seed: StateVector,
    result: ContinuationResult,
}

impl<S: NlpSolver> SweepRunner<S> {
    /// Validates every input up front; domain violations are returned before any solve.
    pub fn new(
        solver: S,
        params: ModelParameters,
        lights: Vec<f64>,
        settings: SweepSettings,
    ) -> Result<Self> {
        params.validate()?;
        validate_lights(&lights)?;
        settings.initial_seed.check_feasible(params.epsilon)?;

        Ok(Self {
            solver,
            params,
            result: ContinuationResult::default(),
            lights,
            policy: settings.seed_policy,
            seed: settings.initial_seed,
        })
    }

    pub fn is_done(&self) -> bool {
        self.result.len() >= self.lights.len()
    }

    /// Seed for the next solve.
    pub fn seed(&self) -> &StateVector {
        &self.seed
    }

    pub fn result(&self) -> &ContinuationResult {
        &self.result
    }

    pub fn take_result(self) -> ContinuationResult {
        self.result
    }

    pub fn progress(&self) -> SweepProgress {
        SweepProgress {
            done: self.is_done(),
            completed: self.result.len(),
            total: self.lights.len(),
            warnings: self.result.warnings().len(),
            current_light: self.result.records().last().map(|r| r.light),
        }
    }

    /// Solves the next light value. Returns `None` once the sweep is complete.
    pub fn step(&mut self) -> Result<Option<&ContinuationRecord>> {
        let index = self.result.len();
        let Some(&light) = self.lights.get(index) else {
            return Ok(None);
        };

        let model = AllocationModel::new(self.params, light);
        let solution = solve_equilibrium(&self.solver, &model, &self.seed)?;

        if solution.is_optimal() {
            debug!(
                "light {light} ({}/{}): optimal after {} iterations",
                index + 1,
                self.lights.len(),
                solution.iterations
            );
        } else {
            warn!(
                "light {light} ({}/{}): solver stopped with {:?} after {} iterations (residual {:.3e})",
                index + 1,
                self.lights.len(),
                solution.status,
                solution.iterations,
                solution.residual
            );
        }

        let advance = match self.policy {
            SeedPolicy::AlwaysAdvance => true,
            SeedPolicy::HoldOnFailure => solution.is_optimal(),
        };
        if advance && solution.state.is_finite() {
            self.seed = solution.state;
        }

        let stability = classify(&model, &solution.state);
        self.result.push(ContinuationRecord {
            light,
            decay_rate: model.decay_rate(),
            solution,
            stability,
        });

        Ok(self.result.records().last())
    }

    pub fn run_steps(&mut self, batch_size: usize) -> Result<SweepProgress> {
        for _ in 0..batch_size {
            if self.step()?.is_none() {
                break;
            }
        }
        Ok(self.progress())
    }

    pub fn run_to_end(mut self) -> Result<ContinuationResult> {
        while self.step()?.is_some() {}
        Ok(self.take_result())
    }
}

/// Runs a full sweep over `lights` in order.
pub fn run_sweep<S: NlpSolver>(
    solver: S,
    params: ModelParameters,
    lights: &[f64],
    settings: SweepSettings,
) -> Result<ContinuationResult> {
    SweepRunner::new(solver, params, lights.to_vec(), settings)?.run_to_end()
}
