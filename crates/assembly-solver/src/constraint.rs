use history_types::{ParamSchema, Registered, Registry};
use scene_graph::Scene;
use serde_json::{Map, Value};

use crate::context::{SolveContext, DEBUG_ARROW_PREFIX};
use crate::types::{ConstraintError, SolveOutcome};

/// A live constraint instance, created once per solver pass.
pub trait AssemblyConstraint {
    /// Nudge the constrained components toward satisfaction.
    ///
    /// Defaults to the older `run` entry point so implementations written
    /// against it keep working.
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        self.run(ctx)
    }

    fn run(&mut self, _ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        Err(ConstraintError::NotImplemented)
    }

    /// Remove debug visuals left by a previous pass.
    fn clear_debug_arrows(&mut self, _scene: &mut Scene) {}
}

/// A constraint type: its schema and a factory for instances.
pub trait ConstraintClass: Registered {
    fn input_params_schema(&self) -> ParamSchema;

    /// Build an instance from input params with schema defaults filled in.
    fn create(&self, params: &Map<String, Value>) -> Box<dyn AssemblyConstraint>;
}

pub type ConstraintRegistry = Registry<dyn ConstraintClass>;

/// Dispose every debug arrow node tagged with `constraint_id`.
pub fn clear_debug_arrows_for(scene: &mut Scene, constraint_id: &str) -> usize {
    let prefix = format!("{DEBUG_ARROW_PREFIX}{constraint_id}:");
    let arrows: Vec<_> = scene
        .descendants(scene.root())
        .into_iter()
        .filter(|id| scene.node(*id).is_some_and(|n| n.name.starts_with(&prefix)))
        .collect();
    arrows.into_iter().map(|id| scene.dispose(id)).sum()
}

/// Dispose every debug arrow node in the scene.
pub fn sweep_debug_arrows(scene: &mut Scene) -> usize {
    let arrows: Vec<_> = scene
        .descendants(scene.root())
        .into_iter()
        .filter(|id| {
            scene
                .node(*id)
                .is_some_and(|n| n.name.starts_with(DEBUG_ARROW_PREFIX))
        })
        .collect();
    arrows.into_iter().map(|id| scene.dispose(id)).sum()
}
