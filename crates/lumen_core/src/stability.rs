use crate::model::{AllocationModel, StateVector};
use nalgebra::Matrix2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Local stability verdict. `NotStable` covers saddles, unstable nodes and foci, marginal
/// cases and non-finite Jacobians alike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stability {
    Stable,
    NotStable,
}

impl Stability {
    /// Routh-Hurwitz test for a 2x2 linearization.
    pub fn from_trace_determinant(trace: f64, determinant: f64) -> Self {
        if trace < 0.0 && determinant > 0.0 {
            Stability::Stable
        } else {
            Stability::NotStable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilityReport {
    pub j11: f64,
    pub j12: f64,
    pub j21: f64,
    pub j22: f64,
    pub trace: f64,
    pub determinant: f64,
    pub eigenvalues: Vec<Complex<f64>>,
    pub verdict: Stability,
}

impl StabilityReport {
    pub fn jacobian(&self) -> Matrix2<f64> {
        Matrix2::new(self.j11, self.j12, self.j21, self.j22)
    }

    pub fn is_stable(&self) -> bool {
        self.verdict == Stability::Stable
    }
}

/// Classifies the equilibrium `state` of `model` from the reduced `(c, p)` Jacobian.
///
/// Never fails: non-finite entries propagate into the report and yield `NotStable`.
pub fn classify(model: &AllocationModel, state: &StateVector) -> StabilityReport {
    let jacobian = model.balance_jacobian(state).reduced();
    let (j11, j12, j21, j22) = (
        jacobian[(0, 0)],
        jacobian[(0, 1)],
        jacobian[(1, 0)],
        jacobian[(1, 1)],
    );
    let trace = j11 + j22;
    let determinant = j11 * j22 - j12 * j21;

    StabilityReport {
        j11,
        j12,
        j21,
        j22,
        trace,
        determinant,
        eigenvalues: eigenvalues_2x2(trace, determinant),
        verdict: Stability::from_trace_determinant(trace, determinant),
    }
}

/// Roots of `λ² - trace·λ + det`.
fn eigenvalues_2x2(trace: f64, determinant: f64) -> Vec<Complex<f64>> {
    let half = trace / 2.0;
    let root = Complex::new(half * half - determinant, 0.0).sqrt();
    let center = Complex::new(half, 0.0);
    vec![center + root, center - root]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelParameters;
    use approx::assert_abs_diff_eq;

    /// Entries written out directly from the closed-form linearization.
    fn reference_entries(model: &AllocationModel, state: &StateVector) -> [f64; 4] {
        let params = model.params();
        let light = model.light();
        let gamma = model.decay_rate();
        let kr = params.kr;
        let StateVector { c, p, u } = *state;
        let vp = params.production_rate(p, light);
        let dvp = params.production_rate_gradient(p, light);
        [
            -vp - kr * (1.0 - 2.0 * c - p) + gamma * p,
            dvp * (1.0 - c) + kr * c + gamma * c,
            u * kr * (1.0 - 2.0 * c - p),
            -u * kr * c - dvp * p - vp - gamma * (1.0 - 2.0 * p),
        ]
    }

    #[test]
    fn report_is_consistent_with_closed_form() {
        let params = ModelParameters::default();
        let states = [
            StateVector::new(0.1856, 0.6629, 0.8161),
            StateVector::new(0.45, 0.25, 0.66),
            StateVector::new(0.05, 0.9, 0.1),
            StateVector::new(0.7, 0.2, 1.0),
        ];
        for &light in &[0.0, 10.0, 300.0, 1500.0] {
            let model = AllocationModel::new(params, light);
            for state in &states {
                let report = classify(&model, state);
                let [j11, j12, j21, j22] = reference_entries(&model, state);
                assert_abs_diff_eq!(report.j11, j11, epsilon = 1e-9);
                assert_abs_diff_eq!(report.j12, j12, epsilon = 1e-9);
                assert_abs_diff_eq!(report.j21, j21, epsilon = 1e-9);
                assert_abs_diff_eq!(report.j22, j22, epsilon = 1e-9);
                assert_abs_diff_eq!(report.trace, j11 + j22, epsilon = 1e-9);
                assert_abs_diff_eq!(report.determinant, j11 * j22 - j12 * j21, epsilon = 1e-9);
                assert_eq!(
                    report.is_stable(),
                    report.trace < 0.0 && report.determinant > 0.0
                );
            }
        }
    }

    #[test]
    fn sign_pattern_rule() {
        assert_eq!(Stability::from_trace_determinant(-1.0, 0.5), Stability::Stable);
        assert_eq!(Stability::from_trace_determinant(1.0, 0.5), Stability::NotStable);
        assert_eq!(Stability::from_trace_determinant(-1.0, -0.5), Stability::NotStable);
        assert_eq!(Stability::from_trace_determinant(-1.0, 0.0), Stability::NotStable);
        assert_eq!(Stability::from_trace_determinant(0.0, 0.5), Stability::NotStable);
        assert_eq!(Stability::from_trace_determinant(f64::NAN, 0.5), Stability::NotStable);
        assert_eq!(Stability::from_trace_determinant(-1.0, f64::NAN), Stability::NotStable);
    }

    #[test]
    fn degenerate_state_reports_raw_numbers() {
        let model = AllocationModel::new(ModelParameters::default(), 10.0);
        let state = StateVector::new(f64::NAN, 0.3, 0.5);
        let report = classify(&model, &state);
        assert!(report.trace.is_nan());
        assert!(report.determinant.is_nan());
        assert_eq!(report.verdict, Stability::NotStable);
    }

    #[test]
    fn eigenvalues_match_trace_and_determinant() {
        let model = AllocationModel::new(ModelParameters::default(), 250.0);
        let report = classify(&model, &StateVector::new(0.3, 0.4, 0.2));
        let sum = report.eigenvalues[0] + report.eigenvalues[1];
        let product = report.eigenvalues[0] * report.eigenvalues[1];
        assert_abs_diff_eq!(sum.re, report.trace, epsilon = 1e-9);
        assert_abs_diff_eq!(sum.im, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(product.re, report.determinant, epsilon = 1e-9);
        assert_abs_diff_eq!(product.im, 0.0, epsilon = 1e-9);

        let eigen = report.jacobian().complex_eigenvalues();
        let mut expected: Vec<f64> = eigen.iter().map(|l| l.re).collect();
        let mut actual: Vec<f64> = report.eigenvalues.iter().map(|l| l.re).collect();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        actual.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(expected[0], actual[0], epsilon = 1e-9);
        assert_abs_diff_eq!(expected[1], actual[1], epsilon = 1e-9);
    }

    #[test]
    fn saddle_is_not_stable() {
        // Crowded partition with full allocation: det < 0.
        let model = AllocationModel::new(ModelParameters::default(), 10.0);
        let report = classify(&model, &StateVector::new(0.05, 0.05, 1.0));
        assert!(report.determinant < 0.0, "det = {}", report.determinant);
        assert_eq!(report.verdict, Stability::NotStable);
    }
}
