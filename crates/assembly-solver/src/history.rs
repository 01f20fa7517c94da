use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use history_types::Registered;
use scene_graph::{HookError, Scene};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::constraint::{sweep_debug_arrows, AssemblyConstraint, ConstraintRegistry};
use crate::context::{ComponentFeatures, SolveContext};
use crate::options::{NoHooks, SolveOptions, SolverHooks, StartEvent};
use crate::types::{
    ConstraintRecord, ConstraintResult, HistoryError, SolveReport, APPLY_IMMEDIATELY_PARAM,
    CONSTRAINT_ID_PARAM, HELD_MESSAGE,
};

/// The ordered list of assembly constraints and the solver that enforces them.
pub struct AssemblyConstraintHistory {
    registry: Arc<ConstraintRegistry>,
    constraints: Vec<ConstraintRecord>,
    id_counter: u64,
}

impl AssemblyConstraintHistory {
    pub fn new(registry: Arc<ConstraintRegistry>) -> Self {
        Self {
            registry,
            constraints: Vec::new(),
            id_counter: 0,
        }
    }

    pub fn registry(&self) -> &ConstraintRegistry {
        &self.registry
    }

    pub fn constraints(&self) -> &[ConstraintRecord] {
        &self.constraints
    }

    pub fn constraint(&self, id: &str) -> Option<&ConstraintRecord> {
        self.constraints
            .iter()
            .find(|c| c.constraint_id() == Some(id))
    }

    pub fn constraint_index(&self, id: &str) -> Option<usize> {
        self.constraints
            .iter()
            .position(|c| c.constraint_id() == Some(id))
    }

    pub fn id_counter(&self) -> u64 {
        self.id_counter
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Append a constraint of `constraint_type` with schema defaults overlaid by
    /// `initial_input`. Returns the assigned `constraintID`.
    pub fn add_constraint(
        &mut self,
        constraint_type: &str,
        initial_input: Map<String, Value>,
    ) -> Result<String, HistoryError> {
        let class = self
            .registry
            .resolve(constraint_type)
            .ok_or_else(|| HistoryError::MissingConstraint {
                constraint_type: constraint_type.to_string(),
            })?;

        let mut params = class.input_params_schema().defaults();
        for (key, value) in initial_input {
            if key != CONSTRAINT_ID_PARAM {
                params.insert(key, value);
            }
        }
        let id = self.next_id(class.short_name());
        params.insert(CONSTRAINT_ID_PARAM.into(), Value::String(id.clone()));
        params
            .entry(APPLY_IMMEDIATELY_PARAM)
            .or_insert(Value::Bool(true));

        let mut record = ConstraintRecord::new(class.type_name(), params);
        record.open = true;
        self.constraints.push(record);
        debug!(id = %id, constraint_type = class.type_name(), "constraint added");
        Ok(id)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        loop {
            self.id_counter += 1;
            let id = format!("{prefix}{}", self.id_counter);
            if self.constraint(&id).is_none() {
                return id;
            }
        }
    }

    /// Replace the whole list (project load). Records without an ID, or with an
    /// ID already taken, receive a fresh one.
    pub fn replace_all(&mut self, constraints: Vec<ConstraintRecord>, id_counter: u64) {
        self.constraints = Vec::with_capacity(constraints.len());
        self.id_counter = id_counter;
        for mut record in constraints {
            let needs_id = match record.constraint_id() {
                None | Some("") => true,
                Some(id) => self.constraint(id).is_some(),
            };
            if needs_id {
                let prefix = self
                    .registry
                    .resolve(&record.constraint_type)
                    .map(|c| c.short_name().to_string())
                    .unwrap_or_else(|| "C".to_string());
                let id = self.next_id(&prefix);
                record
                    .input_params
                    .insert(CONSTRAINT_ID_PARAM.into(), Value::String(id));
            }
            self.constraints.push(record);
        }
    }

    pub fn remove_constraint(&mut self, id: &str) -> Result<ConstraintRecord, HistoryError> {
        let pos = self
            .constraint_index(id)
            .ok_or_else(|| HistoryError::ConstraintNotFound { id: id.to_string() })?;
        Ok(self.constraints.remove(pos))
    }

    /// Move a constraint `delta` places, clamped to the list bounds. Returns the
    /// new index.
    pub fn move_constraint(&mut self, id: &str, delta: isize) -> Result<usize, HistoryError> {
        let pos = self
            .constraint_index(id)
            .ok_or_else(|| HistoryError::ConstraintNotFound { id: id.to_string() })?;
        let max = self.constraints.len().saturating_sub(1) as isize;
        let target = (pos as isize + delta).clamp(0, max) as usize;
        if target != pos {
            let record = self.constraints.remove(pos);
            self.constraints.insert(target, record);
        }
        Ok(target)
    }

    pub fn set_open(&mut self, id: &str, open: bool) -> Result<(), HistoryError> {
        let pos = self
            .constraint_index(id)
            .ok_or_else(|| HistoryError::ConstraintNotFound { id: id.to_string() })?;
        self.constraints[pos].open = open;
        Ok(())
    }

    /// Update one input parameter. The `constraintID` cannot be changed.
    pub fn set_input_param(&mut self, id: &str, key: &str, value: Value) -> Result<(), HistoryError> {
        let pos = self
            .constraint_index(id)
            .ok_or_else(|| HistoryError::ConstraintNotFound { id: id.to_string() })?;
        if key != CONSTRAINT_ID_PARAM {
            self.constraints[pos].input_params.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.constraints.clear();
        self.id_counter = 0;
    }

    pub fn run_all(
        &mut self,
        scene: &mut Scene,
        features: &mut dyn ComponentFeatures,
        options: &SolveOptions,
    ) -> SolveReport {
        self.run_all_with_hooks(scene, features, options, &mut NoHooks)
    }

    /// Run the solver pass.
    ///
    /// Sweeps the constraint list up to `options.iterations` times, stopping
    /// early after a sweep in which no constraint applied a correction, or when
    /// the cancellation token fires. Components moved during the pass have their
    /// owning feature's transform parameters synced from the scene afterwards.
    #[instrument(skip_all, fields(constraints = self.constraints.len()))]
    pub fn run_all_with_hooks(
        &mut self,
        scene: &mut Scene,
        features: &mut dyn ComponentFeatures,
        options: &SolveOptions,
        hooks: &mut dyn SolverHooks,
    ) -> SolveReport {
        let opts = options.normalized();
        let delay = opts.delay();

        let swept = sweep_debug_arrows(scene);
        if swept > 0 {
            debug!(swept, "removed debug arrows from previous pass");
        }

        let mut results: Vec<ConstraintResult> =
            self.constraints.iter().map(ConstraintResult::pending).collect();
        let mut instances = self.instantiate(scene, &mut results);

        call_hook(
            "on_start",
            hooks.on_start(&StartEvent {
                constraint_count: self.constraints.len(),
                iterations: opts.iterations,
                tolerance: opts.tolerance,
            }),
        );

        let mut touched = BTreeSet::new();
        let mut iterations_completed = 0;
        let mut converged = false;
        let mut aborted = false;

        for iteration in 0..opts.iterations {
            if opts.is_cancelled() {
                aborted = true;
                break;
            }
            call_hook("on_iteration_start", hooks.on_iteration_start(iteration));

            let mut iteration_applied = false;
            for (idx, record) in self.constraints.iter().enumerate() {
                if opts.is_cancelled() {
                    aborted = true;
                    break;
                }
                let Some(instance) = instances[idx].as_mut() else {
                    let reason = results[idx]
                        .error
                        .clone()
                        .or_else(|| results[idx].message.clone())
                        .unwrap_or_default();
                    call_hook(
                        "on_constraint_skipped",
                        hooks.on_constraint_skipped(iteration, record, &reason),
                    );
                    continue;
                };
                call_hook(
                    "on_constraint_start",
                    hooks.on_constraint_start(iteration, record),
                );

                let constraint_id = record.constraint_id().unwrap_or_default();
                let mut ctx = SolveContext::new(
                    scene,
                    &*features,
                    &mut touched,
                    constraint_id,
                    &opts,
                    iteration,
                );
                let outcome = instance.solve(&mut ctx);
                let mutated = ctx.mutations() > 0;
                let result = match outcome {
                    Ok(outcome) => ConstraintResult::from_outcome(record, outcome, iteration, mutated),
                    Err(e) => {
                        warn!(constraint = constraint_id, error = %e, "constraint solve failed");
                        ConstraintResult::error(record, e.to_string(), Some(iteration))
                    }
                };
                debug!(
                    constraint = constraint_id,
                    iteration,
                    status = ?result.status,
                    applied = result.applied,
                    "constraint solved"
                );
                iteration_applied |= result.applied;
                call_hook("on_constraint_end", hooks.on_constraint_end(iteration, &result));
                results[idx] = result;
            }
            if aborted {
                break;
            }

            scene.request_render();
            iterations_completed += 1;
            call_hook(
                "on_iteration_complete",
                hooks.on_iteration_complete(iteration, iteration_applied),
            );
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            if !iteration_applied {
                converged = true;
                break;
            }
        }

        self.sync_touched(scene, features, &touched);
        self.persist(&results);

        let report = SolveReport {
            results,
            iterations_completed,
            converged,
            aborted,
        };
        info!(
            iterations = report.iterations_completed,
            converged = report.converged,
            aborted = report.aborted,
            "assembly solve finished"
        );
        call_hook("on_complete", hooks.on_complete(&report));
        report
    }

    /// Build one instance per record. Unresolvable types get an `error` result
    /// and no instance. Records with `applyImmediately` off are held back: no
    /// instance, a pending result and their stored status left as it was.
    fn instantiate(
        &self,
        scene: &mut Scene,
        results: &mut [ConstraintResult],
    ) -> Vec<Option<Box<dyn AssemblyConstraint>>> {
        self.constraints
            .iter()
            .zip(results.iter_mut())
            .map(|(record, result)| {
                if !record.apply_immediately() {
                    debug!(
                        constraint = record.constraint_id().unwrap_or_default(),
                        "constraint held back"
                    );
                    result.message = Some(HELD_MESSAGE.to_string());
                    return None;
                }
                self.instance_for(record, scene, result)
            })
            .collect()
    }

    fn instance_for(
        &self,
        record: &ConstraintRecord,
        scene: &mut Scene,
        result: &mut ConstraintResult,
    ) -> Option<Box<dyn AssemblyConstraint>> {
        match self.registry.resolve(&record.constraint_type) {
            Some(class) => {
                let mut params = record.input_params.clone();
                class.input_params_schema().fill_defaults(&mut params);
                let mut instance = class.create(&params);
                instance.clear_debug_arrows(scene);
                Some(instance)
            }
            None => {
                let err = HistoryError::MissingConstraint {
                    constraint_type: record.constraint_type.clone(),
                };
                warn!(error = %err, "constraint class not registered");
                *result = ConstraintResult::error(record, err.to_string(), None);
                None
            }
        }
    }

    /// Write solved local transforms back to the owning features.
    fn sync_touched(
        &self,
        scene: &mut Scene,
        features: &mut dyn ComponentFeatures,
        touched: &BTreeSet<scene_graph::NodeId>,
    ) {
        for component in touched {
            scene.update_world_matrix(*component);
            let Some(node) = scene.node(*component) else {
                continue;
            };
            let Some(feature_id) = node.owning_feature_id.as_deref() else {
                continue;
            };
            if !features.sync_transform(feature_id, &node.transform_params()) {
                debug!(feature_id, "no feature to receive solved transform");
            }
        }
    }

    fn persist(&mut self, results: &[ConstraintResult]) {
        let now = Utc::now();
        for (record, result) in self.constraints.iter_mut().zip(results) {
            if result.iteration.is_some() || result.error.is_some() {
                record.persistent_data = result.to_status_data(now);
            }
        }
    }
}

fn call_hook(name: &str, result: Result<(), HookError>) {
    if let Err(e) = result {
        warn!(hook = name, error = %e, "solver hook failed");
    }
}
