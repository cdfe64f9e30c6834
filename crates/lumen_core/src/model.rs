//! Light-driven resource allocation model.
//!
//! The reduced dynamics track two bounded fractions `c` and `p` and are steered by the
//! allocation control `u`:
//!
//! ```text
//! dc/dt = f_c = v_P(p)·(1 - c) - kR·c·(1 - c - p) + γ·p·c
//! dp/dt = f_p = u·kR·c·(1 - c - p) - v_P(p)·p - γ·p·(1 - p)
//! ```
//!
//! with the saturating production rate `v_P(p) = kP·p·I / (K + p·I)` and the light dependent
//! decay rate `γ = k_γ·I^α`. Every derivative of `f_c` and `f_p` used elsewhere in the crate
//! (constraint Jacobians, Lagrangian Hessians and the stability Jacobian) comes from this module.

use nalgebra::{Matrix2, Matrix3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Violations of the model's input domain. These are fatal and reported before a sweep starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("light intensity at index {index} must be finite and non-negative, got {value}")]
    InvalidLight { index: usize, value: f64 },
    #[error("half-saturation constant K must be finite and positive, got {0}")]
    NonPositiveHalfSaturation(f64),
    #[error("rate constant {name} must be finite and non-negative, got {value}")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("light exponent alpha must be finite and non-negative, got {0}")]
    InvalidExponent(f64),
    #[error("epsilon must lie in (0, 1/3), got {0}")]
    InvalidEpsilon(f64),
    #[error("initial guess (c = {c}, p = {p}, u = {u}) lies outside the feasible region")]
    SeedOutOfBounds { c: f64, p: f64, u: f64 },
}

/// Physical constants of the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// Maximum production rate `kP`.
    pub kp: f64,
    /// Half-saturation constant `K` of the production term.
    pub k_half: f64,
    /// Allocation rate `kR`.
    pub kr: f64,
    /// Decay prefactor `k_γ`.
    pub k_gamma: f64,
    /// Light exponent `α` of the decay rate.
    pub alpha: f64,
    /// Margin `ε` keeping `c`, `p` and `c + p` away from the edges of the unit interval.
    pub epsilon: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            kp: 1.6,
            k_half: 140.0,
            kr: 2.1,
            k_gamma: 1e-5,
            alpha: 2.0,
            epsilon: 1e-4,
        }
    }
}

impl ModelParameters {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.k_half.is_finite() && self.k_half > 0.0) {
            return Err(ModelError::NonPositiveHalfSaturation(self.k_half));
        }
        for (name, value) in [("kP", self.kp), ("kR", self.kr), ("k_gamma", self.k_gamma)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ModelError::InvalidRate { name, value });
            }
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(ModelError::InvalidExponent(self.alpha));
        }
        // Beyond 1/3 the region c, p ≥ ε, c + p ≤ 1 - ε has no interior.
        if !(self.epsilon > 0.0 && self.epsilon < 1.0 / 3.0) {
            return Err(ModelError::InvalidEpsilon(self.epsilon));
        }
        Ok(())
    }

    /// Production rate `v_P(p, I) = kP·p·I / (K + p·I)`.
    pub fn production_rate(&self, p: f64, light: f64) -> f64 {
        self.kp * p * light / (self.k_half + p * light)
    }

    /// `dv_P/dp = kP·I·K / (K + p·I)^2`.
    pub fn production_rate_gradient(&self, p: f64, light: f64) -> f64 {
        let denom = self.k_half + p * light;
        self.kp * light * self.k_half / (denom * denom)
    }

    /// `d²v_P/dp² = -2·kP·I²·K / (K + p·I)^3`.
    pub fn production_rate_curvature(&self, p: f64, light: f64) -> f64 {
        let denom = self.k_half + p * light;
        -2.0 * self.kp * light * light * self.k_half / (denom * denom * denom)
    }

    /// Decay rate `γ = k_γ·I^α`.
    pub fn decay_rate(&self, light: f64) -> f64 {
        self.k_gamma * light.powf(self.alpha)
    }
}

/// Checks that every light value of a sweep is finite and non-negative.
pub fn validate_lights(lights: &[f64]) -> Result<(), ModelError> {
    match lights
        .iter()
        .enumerate()
        .find(|(_, value)| !(value.is_finite() && **value >= 0.0))
    {
        Some((index, &value)) => Err(ModelError::InvalidLight { index, value }),
        None => Ok(()),
    }
}

/// Internal state `(c, p, u)` of the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StateVector {
    pub c: f64,
    pub p: f64,
    pub u: f64,
}

impl Default for StateVector {
    fn default() -> Self {
        Self {
            c: 0.5,
            p: 0.3,
            u: 0.5,
        }
    }
}

impl StateVector {
    pub fn new(c: f64, p: f64, u: f64) -> Self {
        Self { c, p, u }
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [c, p, u] => Some(Self::new(*c, *p, *u)),
            _ => None,
        }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.c, self.p, self.u]
    }

    pub fn is_finite(&self) -> bool {
        self.c.is_finite() && self.p.is_finite() && self.u.is_finite()
    }

    /// Whether the state satisfies every bound and `c + p ≤ 1 - ε`, up to `tolerance`.
    pub fn is_feasible(&self, epsilon: f64, tolerance: f64) -> bool {
        let fraction_ok = |v: f64| v >= epsilon - tolerance && v <= 1.0 - epsilon + tolerance;
        fraction_ok(self.c)
            && fraction_ok(self.p)
            && self.u >= -tolerance
            && self.u <= 1.0 + tolerance
            && self.c + self.p <= 1.0 - epsilon + tolerance
    }

    /// Rejects seeds outside the feasible region.
    pub fn check_feasible(&self, epsilon: f64) -> Result<(), ModelError> {
        if self.is_finite() && self.is_feasible(epsilon, 0.0) {
            Ok(())
        } else {
            Err(ModelError::SeedOutOfBounds {
                c: self.c,
                p: self.p,
                u: self.u,
            })
        }
    }

    /// Lower and upper variable bounds, ordered `(c, p, u)`.
    pub fn bounds(epsilon: f64) -> ([f64; 3], [f64; 3]) {
        (
            [epsilon, epsilon, 0.0],
            [1.0 - epsilon, 1.0 - epsilon, 1.0],
        )
    }

    /// Clamps each component into its variable bounds. NaN components stay NaN.
    pub fn clamped(self, epsilon: f64) -> Self {
        let (lower, upper) = Self::bounds(epsilon);
        Self {
            c: self.c.clamp(lower[0], upper[0]),
            p: self.p.clamp(lower[1], upper[1]),
            u: self.u.clamp(lower[2], upper[2]),
        }
    }
}

/// Partial derivatives of `(f_c, f_p)` with respect to `(c, p, u)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceJacobian {
    pub fc: [f64; 3],
    pub fp: [f64; 3],
}

impl BalanceJacobian {
    /// The `(c, p)` block, i.e. the Jacobian of the reduced dynamics.
    pub fn reduced(&self) -> Matrix2<f64> {
        Matrix2::new(self.fc[0], self.fc[1], self.fp[0], self.fp[1])
    }
}

/// The model evaluated at a fixed light intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationModel {
    params: ModelParameters,
    light: f64,
    decay_rate: f64,
}

impl AllocationModel {
    pub fn new(params: ModelParameters, light: f64) -> Self {
        Self {
            params,
            light,
            decay_rate: params.decay_rate(light),
        }
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    pub fn light(&self) -> f64 {
        self.light
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn production_rate(&self, p: f64) -> f64 {
        self.params.production_rate(p, self.light)
    }

    pub fn production_rate_gradient(&self, p: f64) -> f64 {
        self.params.production_rate_gradient(p, self.light)
    }

    /// Net production `v_P(p) - γ·p`, the quantity maximized at equilibrium.
    pub fn net_production(&self, p: f64) -> f64 {
        self.production_rate(p) - self.decay_rate * p
    }

    pub fn net_production_gradient(&self, p: f64) -> f64 {
        self.production_rate_gradient(p) - self.decay_rate
    }

    pub fn net_production_curvature(&self, p: f64) -> f64 {
        self.params.production_rate_curvature(p, self.light)
    }

    /// Balance residuals `[f_c, f_p]`.
    pub fn balance(&self, state: &StateVector) -> [f64; 2] {
        let StateVector { c, p, u } = *state;
        let kr = self.params.kr;
        let gamma = self.decay_rate;
        let vp = self.production_rate(p);
        let free = 1.0 - c - p;
        [
            vp * (1.0 - c) - kr * c * free + gamma * p * c,
            u * kr * c * free - vp * p - gamma * p * (1.0 - p),
        ]
    }

    pub fn balance_jacobian(&self, state: &StateVector) -> BalanceJacobian {
        let StateVector { c, p, u } = *state;
        let kr = self.params.kr;
        let gamma = self.decay_rate;
        let vp = self.production_rate(p);
        let dvp = self.production_rate_gradient(p);
        let crowding = 1.0 - 2.0 * c - p;
        BalanceJacobian {
            fc: [
                -vp - kr * crowding + gamma * p,
                dvp * (1.0 - c) + kr * c + gamma * c,
                0.0,
            ],
            fp: [
                u * kr * crowding,
                -u * kr * c - dvp * p - vp - gamma * (1.0 - 2.0 * p),
                kr * c * (1.0 - c - p),
            ],
        }
    }

    /// Hessians of `f_c` and `f_p` with respect to `(c, p, u)`.
    pub fn balance_hessians(&self, state: &StateVector) -> [Matrix3<f64>; 2] {
        let StateVector { c, p, u } = *state;
        let kr = self.params.kr;
        let gamma = self.decay_rate;
        let dvp = self.production_rate_gradient(p);
        let d2vp = self.params.production_rate_curvature(p, self.light);

        let fc_cp = -dvp + kr + gamma;
        let hess_c = Matrix3::new(
            2.0 * kr, fc_cp, 0.0, //
            fc_cp, d2vp * (1.0 - c), 0.0, //
            0.0, 0.0, 0.0,
        );

        let fp_cp = -u * kr;
        let fp_cu = kr * (1.0 - 2.0 * c - p);
        let fp_pu = -kr * c;
        let hess_p = Matrix3::new(
            -2.0 * u * kr, fp_cp, fp_cu, //
            fp_cp, -d2vp * p - 2.0 * dvp + 2.0 * gamma, fp_pu, //
            fp_cu, fp_pu, 0.0,
        );

        [hess_c, hess_p]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn central_difference(f: impl Fn(f64) -> f64, x: f64, h: f64) -> f64 {
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn production_rate_is_monotone_in_p() {
        let params = ModelParameters::default();
        for &light in &[0.5, 10.0, 250.0, 2000.0] {
            let mut previous = params.production_rate(0.0, light);
            for i in 1..=100 {
                let p = i as f64 / 100.0;
                let current = params.production_rate(p, light);
                assert!(current > previous, "v_P not increasing at p = {p}, I = {light}");
                previous = current;
            }
        }
    }

    #[test]
    fn production_rate_gradient_matches_finite_difference() {
        let params = ModelParameters::default();
        for &light in &[1.0, 10.0, 400.0] {
            for &p in &[0.05, 0.3, 0.7, 0.95] {
                let numeric = central_difference(|q| params.production_rate(q, light), p, 1e-5);
                let analytic = params.production_rate_gradient(p, light);
                assert!((numeric - analytic).abs() < 1e-6, "I = {light}, p = {p}");
            }
        }
    }

    #[test]
    fn production_rate_curvature_matches_finite_difference() {
        let params = ModelParameters::default();
        for &light in &[1.0, 10.0, 400.0] {
            for &p in &[0.1, 0.5, 0.9] {
                let numeric =
                    central_difference(|q| params.production_rate_gradient(q, light), p, 1e-5);
                let analytic = params.production_rate_curvature(p, light);
                assert!((numeric - analytic).abs() < 1e-6, "I = {light}, p = {p}");
            }
        }
    }

    #[test]
    fn zero_light_gives_zero_production_and_decay() {
        let model = AllocationModel::new(ModelParameters::default(), 0.0);
        assert_eq!(model.production_rate(0.4), 0.0);
        assert_eq!(model.production_rate_gradient(0.4), 0.0);
        assert_eq!(model.decay_rate(), 0.0);
        let residual = model.balance(&StateVector::default());
        assert!(residual.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn decay_rate_follows_power_law() {
        let params = ModelParameters::default();
        assert_relative_eq!(params.decay_rate(10.0), 1e-3, max_relative = 1e-12);
        assert_relative_eq!(params.decay_rate(300.0), 0.9, max_relative = 1e-12);
    }

    #[test]
    fn balance_jacobian_matches_finite_difference() {
        let model = AllocationModel::new(ModelParameters::default(), 75.0);
        let state = StateVector::new(0.31, 0.42, 0.67);
        let jac = model.balance_jacobian(&state);
        let h = 1e-6;
        for var in 0..3 {
            let mut plus = state.to_array();
            let mut minus = state.to_array();
            plus[var] += h;
            minus[var] -= h;
            let f_plus = model.balance(&StateVector::from_slice(&plus).unwrap());
            let f_minus = model.balance(&StateVector::from_slice(&minus).unwrap());
            assert_relative_eq!((f_plus[0] - f_minus[0]) / (2.0 * h), jac.fc[var], epsilon = 1e-7);
            assert_relative_eq!((f_plus[1] - f_minus[1]) / (2.0 * h), jac.fp[var], epsilon = 1e-7);
        }
    }

    #[test]
    fn balance_hessians_match_finite_difference_of_jacobian() {
        let model = AllocationModel::new(ModelParameters::default(), 40.0);
        let state = StateVector::new(0.22, 0.51, 0.38);
        let [hess_c, hess_p] = model.balance_hessians(&state);
        let h = 1e-6;
        for var in 0..3 {
            let mut plus = state.to_array();
            let mut minus = state.to_array();
            plus[var] += h;
            minus[var] -= h;
            let jp = model.balance_jacobian(&StateVector::from_slice(&plus).unwrap());
            let jm = model.balance_jacobian(&StateVector::from_slice(&minus).unwrap());
            for row in 0..3 {
                let dc = (jp.fc[row] - jm.fc[row]) / (2.0 * h);
                let dp = (jp.fp[row] - jm.fp[row]) / (2.0 * h);
                assert_relative_eq!(dc, hess_c[(row, var)], epsilon = 1e-6);
                assert_relative_eq!(dp, hess_p[(row, var)], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let mut params = ModelParameters::default();
        assert!(params.validate().is_ok());

        params.k_half = 0.0;
        assert_eq!(
            params.validate(),
            Err(ModelError::NonPositiveHalfSaturation(0.0))
        );

        params = ModelParameters {
            kr: -1.0,
            ..ModelParameters::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ModelError::InvalidRate { name: "kR", .. })
        ));

        params = ModelParameters {
            epsilon: 0.0,
            ..ModelParameters::default()
        };
        assert_eq!(params.validate(), Err(ModelError::InvalidEpsilon(0.0)));

        params.epsilon = 0.4;
        assert_eq!(params.validate(), Err(ModelError::InvalidEpsilon(0.4)));
    }

    #[test]
    fn negative_exponent_is_rejected() {
        // 0^α is infinite for α < 0, so darkness would poison the decay rate.
        let params = ModelParameters {
            alpha: -0.5,
            ..ModelParameters::default()
        };
        assert_eq!(params.validate(), Err(ModelError::InvalidExponent(-0.5)));

        let flat = ModelParameters {
            alpha: 0.0,
            ..ModelParameters::default()
        };
        assert!(flat.validate().is_ok());
        assert_eq!(flat.decay_rate(0.0), flat.k_gamma);
    }

    #[test]
    fn light_validation_reports_first_offender() {
        assert!(validate_lights(&[0.0, 1.0, 1e3]).is_ok());
        assert_eq!(
            validate_lights(&[1.0, -2.0, f64::NAN]),
            Err(ModelError::InvalidLight {
                index: 1,
                value: -2.0
            })
        );
    }

    #[test]
    fn seed_feasibility_checks_partition() {
        let eps = 1e-4;
        assert!(StateVector::default().check_feasible(eps).is_ok());
        assert!(StateVector::new(0.6, 0.5, 0.5).check_feasible(eps).is_err());
        assert!(StateVector::new(0.5, 0.3, 1.5).check_feasible(eps).is_err());
        assert!(StateVector::new(0.0, 0.3, 0.5).check_feasible(eps).is_err());
    }
}
