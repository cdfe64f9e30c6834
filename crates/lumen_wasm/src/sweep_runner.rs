//! Stepped light-sweep runner.

use lumen_core::{
    InteriorPointSettings, InteriorPointSolver, ModelParameters, SweepRunner, SweepSettings,
};
use serde::de::DeserializeOwned;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Deserializes `value`, falling back to `T::default()` when the host passes nothing.
pub(crate) fn decode_or_default<T: DeserializeOwned + Default>(
    value: JsValue,
    label: &str,
) -> Result<T, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", label, e)))
}

/// WASM-exported runner for a warm-started light sweep.
/// Runs a batch of light values at a time so the host can report progress.
#[wasm_bindgen]
pub struct WasmSweepRunner {
    runner: Option<SweepRunner<InteriorPointSolver>>,
}

#[wasm_bindgen]
impl WasmSweepRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        lights: Vec<f64>,
        params_val: JsValue,
        solver_settings_val: JsValue,
        sweep_settings_val: JsValue,
    ) -> Result<WasmSweepRunner, JsValue> {
        console_error_panic_hook::set_once();

        let params: ModelParameters = decode_or_default(params_val, "model parameters")?;
        let solver_settings: InteriorPointSettings =
            decode_or_default(solver_settings_val, "solver settings")?;
        let sweep_settings: SweepSettings = decode_or_default(sweep_settings_val, "sweep settings")?;

        solver_settings
            .validate()
            .map_err(|e| JsValue::from_str(&format!("Invalid solver settings: {}", e)))?;

        let runner = SweepRunner::new(
            InteriorPointSolver::new(solver_settings),
            params,
            lights,
            sweep_settings,
        )
        .map_err(|e| JsValue::from_str(&format!("Sweep init failed: {}", e)))?;

        Ok(WasmSweepRunner {
            runner: Some(runner),
        })
    }

    pub fn is_done(&self) -> bool {
        self.runner.as_ref().map_or(true, |runner| runner.is_done())
    }

    /// Solve up to `batch_size` more light values and return progress.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let progress = runner
            .run_steps(batch_size as usize)
            .map_err(|e| JsValue::from_str(&format!("Sweep step failed: {}", e)))?;

        to_value(&progress).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        to_value(&runner.progress())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Take the ordered records. The runner is consumed.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .take()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let records = runner.take_result().into_records();

        to_value(&records).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use lumen_core::{ContinuationRecord, SweepProgress};
    use wasm_bindgen_test::wasm_bindgen_test;

    fn build_runner(lights: Vec<f64>) -> WasmSweepRunner {
        WasmSweepRunner::new(lights, JsValue::UNDEFINED, JsValue::UNDEFINED, JsValue::NULL)
            .expect("runner")
    }

    #[wasm_bindgen_test]
    fn sweep_runner_reports_progress_and_result() {
        let mut runner = build_runner(vec![10.0, 50.0, 100.0]);
        assert!(!runner.is_done());

        let progress: SweepProgress =
            from_value(runner.run_steps(2).expect("run steps")).expect("decode progress");
        assert_eq!(progress.completed, 2);
        assert!(!progress.done);

        runner.run_steps(5).expect("run steps");
        assert!(runner.is_done());

        let records: Vec<ContinuationRecord> =
            from_value(runner.get_result().expect("result")).expect("decode records");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].light, 10.0);
    }

    #[wasm_bindgen_test]
    fn sweep_runner_handles_empty_lights() {
        let mut runner = build_runner(Vec::new());
        assert!(runner.is_done());
        let records: Vec<ContinuationRecord> =
            from_value(runner.get_result().expect("result")).expect("decode records");
        assert!(records.is_empty());
    }

    #[wasm_bindgen_test]
    fn sweep_runner_rejects_negative_light() {
        let result = WasmSweepRunner::new(
            vec![1.0, -2.0],
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
        );
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Sweep init failed"));
    }

    #[wasm_bindgen_test]
    fn sweep_runner_rejects_invalid_settings() {
        let result = WasmSweepRunner::new(
            vec![1.0],
            JsValue::from_str("nope"),
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
        );
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Invalid model parameters"));
    }

    #[wasm_bindgen_test]
    fn sweep_runner_errors_after_result_taken() {
        let mut runner = build_runner(vec![10.0]);
        runner.run_steps(1).expect("run steps");
        runner.get_result().expect("result");

        let err = runner.run_steps(1).expect_err("runner should be consumed");
        assert!(err.as_string().unwrap_or_default().contains("Runner not initialized"));
    }
}
