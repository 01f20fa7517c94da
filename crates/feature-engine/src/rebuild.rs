use assembly_solver::SolveReport;
use chrono::Utc;
use expression::{Evaluate, ExpressionContext};
use scene_graph::Scene;
use tracing::{debug, warn};

use crate::feature::{FeatureClass, FeatureContext, FeatureRegistry, RunResult};
use crate::sanitize::{sanitize, SanitizeEnv};
use crate::types::{Effects, FailureKind, FeatureTree, LastRun, RunFailure};

/// Outcome of one `run_history` pass.
#[derive(Debug, Default)]
pub struct HistoryRun {
    /// Features whose `run` was invoked, in order.
    pub executed: Vec<String>,
    /// Clean features whose previous effects were reapplied.
    pub reused: Vec<String>,
    /// Features whose type is not registered.
    pub missing: Vec<String>,
    /// The current-step feature the pass stopped after.
    pub stopped_at: Option<String>,
    /// The feature whose failure aborted the pass.
    pub aborted_at: Option<String>,
    pub error: Option<RunFailure>,
    /// Constraint pass result. `None` when the replay aborted.
    pub solve: Option<SolveReport>,
}

impl HistoryRun {
    pub fn is_ok(&self) -> bool {
        self.aborted_at.is_none()
    }
}

/// Shared read-only inputs of a replay pass.
pub(crate) struct ReplayEnv<'a> {
    pub registry: &'a FeatureRegistry,
    pub evaluator: &'a dyn Evaluate,
    pub expressions: &'a ExpressionContext,
}

/// Replay the feature list into the scene.
///
/// Features run in list order. A feature re-runs when it is dirty; otherwise
/// its previous effects are reapplied. Re-running a feature marks the next
/// one dirty, and the fresh timestamp keeps the cascade going downstream.
/// A failing run aborts the pass immediately.
pub(crate) fn replay(
    tree: &mut FeatureTree,
    scene: &mut Scene,
    env: &ReplayEnv<'_>,
    clock: &mut u64,
) -> HistoryRun {
    let mut run = HistoryRun::default();

    scene.clear();
    scene.add_ambient_light();
    let stop_at = tree.current_step.clone();

    for idx in 0..tree.features.len() {
        let feature_id = tree.features[idx].feature_id().unwrap_or_default().to_string();
        let stop_here = stop_at.as_deref() == Some(feature_id.as_str());

        let Some(class) = env.registry.resolve(&tree.features[idx].feature_type) else {
            let record = &mut tree.features[idx];
            let now = Utc::now();
            let failure = RunFailure::new(
                FailureKind::MissingFeature,
                format!("missing feature type: {}", record.feature_type),
            );
            warn!(
                feature_id = %feature_id,
                feature_type = %record.feature_type,
                "feature type not registered"
            );
            record.last_run = Some(LastRun::failed(now, now, failure));
            run.missing.push(feature_id.clone());
            if stop_here {
                run.stopped_at = Some(feature_id);
                break;
            }
            continue;
        };

        scene.remove_owned_by(&feature_id);

        if is_dirty(tree, idx) {
            if let Some(next) = tree.features.get_mut(idx + 1) {
                next.dirty = true;
            }
            if let Err(failure) = execute(tree, idx, class.as_ref(), scene, env, clock) {
                warn!(
                    feature_id = %feature_id,
                    error = %failure.message,
                    "feature run failed, aborting replay"
                );
                run.aborted_at = Some(feature_id);
                run.error = Some(failure);
                return run;
            }
            debug!(feature_id = %feature_id, "feature executed");
            run.executed.push(feature_id.clone());
        } else {
            debug!(feature_id = %feature_id, "feature clean, reusing effects");
            run.reused.push(feature_id.clone());
        }

        apply_effects(scene, &tree.features[idx].effects);

        if stop_here {
            run.stopped_at = Some(feature_id);
            break;
        }
    }
    run
}

/// Explicit flag, an upstream feature that ran more recently, or params that
/// changed since the last successful run.
fn is_dirty(tree: &FeatureTree, idx: usize) -> bool {
    let record = &tree.features[idx];
    let upstream_newer = idx > 0 && tree.features[idx - 1].timestamp > record.timestamp;
    record.dirty || upstream_newer || record.params_changed()
}

/// Run one feature and record its effects. Artifact hooks do not run here;
/// `apply_effects` runs them once when the effects are attached.
fn execute(
    tree: &mut FeatureTree,
    idx: usize,
    class: &dyn FeatureClass,
    scene: &mut Scene,
    env: &ReplayEnv<'_>,
    clock: &mut u64,
) -> Result<(), RunFailure> {
    let started_at = Utc::now();
    let (previous, rest) = tree.features.split_at_mut(idx);
    let record = &mut rest[0];
    let feature_id = record.feature_id().unwrap_or_default().to_string();

    let params = sanitize(
        &class.input_params_schema(),
        &record.input_params,
        &SanitizeEnv {
            scene,
            evaluator: env.evaluator,
            expressions: env.expressions,
        },
    );
    let mut instance = class.create();
    let mut persistent_data = record.persistent_data.clone();

    let outcome = {
        let mut ctx = FeatureContext {
            feature_id: &feature_id,
            params: &params,
            persistent_data: &mut persistent_data,
            scene: &mut *scene,
            expressions: env.expressions,
            evaluator: env.evaluator,
            previous,
        };
        instance.run(&mut ctx)
    };
    let result = outcome
        .map_err(|e| RunFailure::new(FailureKind::RunFailed, e.to_string()))
        .and_then(|result| validate(scene, result));
    let ended_at = Utc::now();

    let result = match result {
        Ok(result) => result,
        Err(failure) => {
            record.last_run = Some(LastRun::failed(started_at, ended_at, failure.clone()));
            return Err(failure);
        }
    };

    // Artifacts of the previous run that were not handed back are gone for good.
    for stale in &record.effects.added {
        if !result.added.contains(stale) {
            scene.dispose(*stale);
        }
    }
    for id in &result.added {
        if let Some(node) = scene.node_mut(*id) {
            node.owning_feature_id = Some(feature_id.clone());
        }
    }

    *clock += 1;
    record.effects = Effects {
        added: result.added,
        removed: result.removed,
    };
    record.persistent_data = persistent_data;
    record.timestamp = *clock;
    record.dirty = false;
    record.last_run_input_params = Some(record.snapshot());
    record.last_run = Some(LastRun::succeeded(started_at, ended_at));
    Ok(())
}

/// Every added handle must be a live scene node. On failure the live ones
/// are disposed so nothing half-built lingers in the arena.
fn validate(scene: &mut Scene, result: RunResult) -> Result<RunResult, RunFailure> {
    let dead = result.added.iter().filter(|id| !scene.contains(**id)).count();
    if dead == 0 {
        return Ok(result);
    }
    for id in &result.added {
        scene.dispose(*id);
    }
    Err(RunFailure::new(
        FailureKind::MalformedResult,
        format!("{dead} added artifact(s) are not live scene nodes"),
    ))
}

/// Detach `removed`, then run hooks on and attach each `added` artifact.
/// This is the only place the visualize and free-memory hooks fire, once per
/// artifact per application.
fn apply_effects(scene: &mut Scene, effects: &Effects) {
    for id in &effects.removed {
        scene.remove(*id);
    }
    for id in &effects.added {
        scene.run_artifact_hooks(*id);
        if scene.add(*id) {
            scene.enable_click(*id);
        } else {
            debug!(?id, "artifact no longer exists");
        }
    }
}
