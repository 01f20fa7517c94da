use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scene_graph::HookError;

use crate::types::{ConstraintRecord, ConstraintResult, SolveReport};

/// Cooperative cancellation flag shared between the solver and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Configuration of one solver pass.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Convergence tolerance handed to constraints. Sign is ignored.
    pub tolerance: f64,
    /// Maximum number of sweeps over the constraint list.
    pub iterations: usize,
    /// Damping applied to every translation correction, in [0, 1].
    pub translation_gain: f64,
    /// Damping applied to every rotation correction, in [0, 1].
    pub rotation_gain: f64,
    /// Pause after each sweep. Defaults to 500 ms in debug mode, else 0.
    pub delay_ms: Option<u64>,
    /// Emit debug arrows and slow the pass down for inspection.
    pub debug: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            iterations: 1,
            translation_gain: 0.5,
            rotation_gain: 0.5,
            delay_ms: None,
            debug: false,
            cancel: None,
        }
    }
}

impl SolveOptions {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Clamp every field into its valid range.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let gain = |g: f64, fallback: f64| if g.is_finite() { g.clamp(0.0, 1.0) } else { fallback };
        Self {
            tolerance: if self.tolerance.is_finite() {
                self.tolerance.abs()
            } else {
                defaults.tolerance
            },
            iterations: self.iterations.max(1),
            translation_gain: gain(self.translation_gain, defaults.translation_gain),
            rotation_gain: gain(self.rotation_gain, defaults.rotation_gain),
            delay_ms: Some(
                self.delay_ms
                    .unwrap_or(if self.debug { 500 } else { 0 }),
            ),
            debug: self.debug,
            cancel: self.cancel.clone(),
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay_ms.unwrap_or(if self.debug { 500 } else { 0 })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Passed to [`SolverHooks::on_start`].
#[derive(Debug, Clone, Copy)]
pub struct StartEvent {
    pub constraint_count: usize,
    pub iterations: usize,
    pub tolerance: f64,
}

/// Instrumentation callbacks. Errors are logged and never change control flow.
pub trait SolverHooks {
    fn on_start(&mut self, _event: &StartEvent) -> Result<(), HookError> {
        Ok(())
    }

    fn on_iteration_start(&mut self, _iteration: usize) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_start(
        &mut self,
        _iteration: usize,
        _record: &ConstraintRecord,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_skipped(
        &mut self,
        _iteration: usize,
        _record: &ConstraintRecord,
        _reason: &str,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_end(
        &mut self,
        _iteration: usize,
        _result: &ConstraintResult,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn on_iteration_complete(&mut self, _iteration: usize, _applied: bool) -> Result<(), HookError> {
        Ok(())
    }

    fn on_complete(&mut self, _report: &SolveReport) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SolverHooks for NoHooks {}
