//! WASM bindings for `lumen_core`.

mod sweep_runner;

pub use sweep_runner::WasmSweepRunner;

use lumen_core::{AllocationModel, ModelParameters, StateVector};
use serde_wasm_bindgen::to_value;
use sweep_runner::decode_or_default;
use wasm_bindgen::prelude::*;

/// Stability report for `state` = `[c, p, u]` at one light intensity.
#[wasm_bindgen]
pub fn classify_equilibrium(
    params_val: JsValue,
    light: f64,
    state: Vec<f64>,
) -> Result<JsValue, JsValue> {
    let params: ModelParameters = decode_or_default(params_val, "model parameters")?;
    params
        .validate()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    lumen_core::model::validate_lights(&[light]).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let state = StateVector::from_slice(&state).ok_or_else(|| {
        JsValue::from_str(&format!(
            "State dimension mismatch. Expected 3, got {}.",
            state.len()
        ))
    })?;

    let report = lumen_core::classify(&AllocationModel::new(params, light), &state);

    to_value(&report).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// `count` evenly spaced light values from `start` to `end` inclusive.
#[wasm_bindgen]
pub fn linear_sweep(start: f64, end: f64, count: u32) -> Vec<f64> {
    lumen_core::linear_sweep(start, end, count as usize)
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_value_tests {
    use super::classify_equilibrium;
    use lumen_core::{Stability, StabilityReport};
    use serde_wasm_bindgen::from_value;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn classify_equilibrium_reports_saddle() {
        let value = classify_equilibrium(JsValue::UNDEFINED, 10.0, vec![0.05, 0.05, 1.0])
            .expect("classify");
        let report: StabilityReport = from_value(value).expect("decode report");
        assert!(report.determinant < 0.0);
        assert_eq!(report.verdict, Stability::NotStable);
    }

    #[wasm_bindgen_test]
    fn classify_equilibrium_rejects_short_state() {
        let err = classify_equilibrium(JsValue::UNDEFINED, 10.0, vec![0.5, 0.3])
            .expect_err("state too short");
        assert!(err.as_string().unwrap_or_default().contains("dimension mismatch"));
    }
}
