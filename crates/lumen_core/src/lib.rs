pub mod continuation;
pub mod equilibrium;
pub mod interior_point;
pub mod model;
pub mod nlp;
/// The `lumen_core` crate computes equilibria of a light-driven resource allocation model
/// across a sweep of light intensities and classifies their local stability.
///
/// Key components:
/// - **Model**: production rate, decay rate and the balance equations with their exact derivatives.
/// - **NLP**: the `NlpProblem`/`NlpSolver` capability traits and an interior-point implementation.
/// - **Equilibrium**: the constrained equilibrium problem solved at a single light intensity.
/// - **Stability**: trace/determinant classification of the reduced 2x2 Jacobian.
/// - **Continuation**: the warm-started sweep runner and its ordered result record.
pub mod stability;

pub use continuation::{
    linear_sweep, run_sweep, ContinuationRecord, ContinuationResult, SeedPolicy, SweepProgress,
    SweepRunner, SweepSettings,
};
pub use equilibrium::{solve_equilibrium, EquilibriumSolution};
pub use interior_point::{InteriorPointSettings, InteriorPointSolver};
pub use model::{AllocationModel, ModelError, ModelParameters, StateVector};
pub use nlp::{NlpProblem, NlpSolution, NlpSolver, SolveStatus};
pub use stability::{classify, Stability, StabilityReport};
