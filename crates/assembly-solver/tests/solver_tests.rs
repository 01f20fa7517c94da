use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use approx::assert_relative_eq;
use assembly_solver::*;
use history_types::{ParamSchema, Registered, TransformParams};
use nalgebra::{UnitQuaternion, Vector3};
use scene_graph::{HookError, Node, NodeId, Scene};
use serde_json::{json, Map, Value};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn two_components(b_position: [f64; 3]) -> (Scene, NodeId, NodeId) {
    let mut scene = Scene::new();
    let root = scene.root();
    let a = scene.create_child(root, Node::component("A"));
    let b = scene.create_child(root, Node::component("B").with_position(b_position));
    (scene, a, b)
}

fn history_with(registry: ConstraintRegistry) -> AssemblyConstraintHistory {
    AssemblyConstraintHistory::new(Arc::new(registry))
}

fn builtin_history() -> AssemblyConstraintHistory {
    history_with(builtin_registry())
}

fn opts(iterations: usize) -> SolveOptions {
    SolveOptions::default().with_iterations(iterations)
}

fn position(scene: &Scene, id: NodeId) -> Vector3<f64> {
    scene.node(id).unwrap().position
}

fn arrow_count(scene: &Scene) -> usize {
    scene
        .descendants(scene.root())
        .into_iter()
        .filter(|id| scene.node(*id).unwrap().name.starts_with(DEBUG_ARROW_PREFIX))
        .count()
}

#[derive(Default)]
struct RecordingFeatures {
    fixed: BTreeSet<String>,
    synced: BTreeMap<String, TransformParams>,
}

impl ComponentFeatures for RecordingFeatures {
    fn is_fixed(&self, feature_id: &str) -> bool {
        self.fixed.contains(feature_id)
    }

    fn sync_transform(&mut self, feature_id: &str, transform: &TransformParams) -> bool {
        self.synced.insert(feature_id.to_string(), *transform);
        true
    }
}

/// Records hook calls; optionally fails every hook or cancels after a sweep.
#[derive(Default)]
struct RecordingHooks {
    events: Vec<String>,
    fail: bool,
    cancel_after_iteration: Option<(usize, CancelToken)>,
    cancel_after_constraint: Option<CancelToken>,
}

impl RecordingHooks {
    fn log(&mut self, event: String) -> Result<(), HookError> {
        self.events.push(event);
        if self.fail {
            return Err(HookError::Other("hook exploded".into()));
        }
        Ok(())
    }
}

impl SolverHooks for RecordingHooks {
    fn on_start(&mut self, event: &StartEvent) -> Result<(), HookError> {
        self.log(format!("start:{}", event.constraint_count))
    }

    fn on_iteration_start(&mut self, iteration: usize) -> Result<(), HookError> {
        self.log(format!("iteration:{iteration}"))
    }

    fn on_constraint_start(
        &mut self,
        _iteration: usize,
        record: &ConstraintRecord,
    ) -> Result<(), HookError> {
        self.log(format!("constraint:{}", record.constraint_id().unwrap_or("?")))
    }

    fn on_constraint_skipped(
        &mut self,
        _iteration: usize,
        record: &ConstraintRecord,
        _reason: &str,
    ) -> Result<(), HookError> {
        self.log(format!("skipped:{}", record.constraint_type))
    }

    fn on_constraint_end(
        &mut self,
        _iteration: usize,
        result: &ConstraintResult,
    ) -> Result<(), HookError> {
        if let Some(token) = &self.cancel_after_constraint {
            token.cancel();
        }
        self.log(format!("end:{}", result.constraint_id))
    }

    fn on_iteration_complete(&mut self, iteration: usize, applied: bool) -> Result<(), HookError> {
        if let Some((at, token)) = &self.cancel_after_iteration {
            if *at == iteration {
                token.cancel();
            }
        }
        self.log(format!("complete:{iteration}:{applied}"))
    }

    fn on_complete(&mut self, report: &SolveReport) -> Result<(), HookError> {
        self.log(format!("done:{}", report.iterations_completed))
    }
}

struct LegacyClass;

impl Registered for LegacyClass {
    fn type_name(&self) -> &str {
        "legacy"
    }
    fn short_name(&self) -> &str {
        "LG"
    }
}

impl ConstraintClass for LegacyClass {
    fn input_params_schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    fn create(&self, _params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        Box::new(Legacy)
    }
}

/// Only implements the older `run` entry point.
struct Legacy;

impl AssemblyConstraint for Legacy {
    fn run(&mut self, _ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        Ok(SolveOutcome::satisfied().with_message("legacy run"))
    }
}

struct HollowClass;

impl Registered for HollowClass {
    fn type_name(&self) -> &str {
        "hollow"
    }
    fn short_name(&self) -> &str {
        "H"
    }
}

impl ConstraintClass for HollowClass {
    fn input_params_schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    fn create(&self, _params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        Box::new(Hollow)
    }
}

/// Implements neither `solve` nor `run`.
struct Hollow;

impl AssemblyConstraint for Hollow {}

/// Test constraint class whose instances are built by a plain function.
struct ScriptedClass {
    name: &'static str,
    short: &'static str,
    build: fn() -> Box<dyn AssemblyConstraint>,
}

impl Registered for ScriptedClass {
    fn type_name(&self) -> &str {
        self.name
    }
    fn short_name(&self) -> &str {
        self.short
    }
}

impl ConstraintClass for ScriptedClass {
    fn input_params_schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    fn create(&self, _params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        (self.build)()
    }
}

fn scripted_history(
    name: &'static str,
    build: fn() -> Box<dyn AssemblyConstraint>,
) -> AssemblyConstraintHistory {
    let mut registry = builtin_registry();
    registry.register(Arc::new(ScriptedClass { name, short: "S", build }));
    history_with(registry)
}

fn component_a(ctx: &SolveContext<'_>) -> Result<NodeId, ConstraintError> {
    ctx.resolve_object("A")
        .and_then(|id| ctx.resolve_component(id))
        .ok_or_else(|| ConstraintError::Unresolved {
            reference: "A".into(),
        })
}

/// Moves component A along +X but reports nothing done.
struct Nudge;

impl AssemblyConstraint for Nudge {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let a = component_a(ctx)?;
        ctx.apply_translation(a, Vector3::x());
        Ok(SolveOutcome::pending())
    }
}

/// Turns component A so its local Z axis points along world +X.
struct AimAlongX;

impl AssemblyConstraint for AimAlongX {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let a = component_a(ctx)?;
        let axis = ctx.world_direction(a, [0.0, 0.0, 1.0]);
        let turn = UnitQuaternion::rotation_between(&axis, &Vector3::x())
            .unwrap_or_else(UnitQuaternion::identity);
        ctx.apply_rotation(a, turn);
        Ok(SolveOutcome::adjusted())
    }
}

/// Group "G" turned 90 degrees about X, holding component A.
fn nested_component() -> (Scene, NodeId) {
    let mut scene = Scene::new();
    let root = scene.root();
    let quarter = UnitQuaternion::from_euler_angles(90f64.to_radians(), 0.0, 0.0);
    let group = scene.create_child(root, Node::group("G").with_rotation(quarter));
    let a = scene.create_child(group, Node::component("A"));
    (scene, a)
}

// ── Constraint list ──────────────────────────────────────────────────────────

#[test]
fn add_constraint_assigns_ids_and_defaults() {
    let mut history = builtin_history();
    let first = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    let second = history.add_constraint("distance", Map::new()).unwrap();
    assert_eq!(first, "CO1");
    assert_eq!(second, "D2");

    let record = history.constraint("D2").unwrap();
    assert_eq!(record.constraint_type, "distance");
    assert_eq!(record.input_params["distance"], json!(10));
    assert_eq!(record.input_params["elements"], json!([]));
    assert!(record.apply_immediately());
    assert!(record.open);
    assert_eq!(history.id_counter(), 2);
}

#[test]
fn add_constraint_ignores_caller_supplied_id() {
    let mut history = builtin_history();
    let id = history
        .add_constraint("parallel", params(json!({"constraintID": "mine"})))
        .unwrap();
    assert_eq!(id, "PA1");
    assert!(history.constraint("mine").is_none());
}

#[test]
fn add_unknown_constraint_type_fails() {
    let mut history = builtin_history();
    let err = history.add_constraint("tangent", Map::new()).unwrap_err();
    assert!(matches!(err, HistoryError::MissingConstraint { .. }));
    assert!(history.is_empty());
}

#[test]
fn move_remove_and_open() {
    let mut history = builtin_history();
    let a = history.add_constraint("coincident", Map::new()).unwrap();
    let b = history.add_constraint("distance", Map::new()).unwrap();
    let c = history.add_constraint("parallel", Map::new()).unwrap();

    assert_eq!(history.move_constraint(&c, -5).unwrap(), 0);
    let order: Vec<_> = history
        .constraints()
        .iter()
        .map(|r| r.constraint_id().unwrap().to_string())
        .collect();
    assert_eq!(order, vec![c.clone(), a.clone(), b.clone()]);

    history.set_open(&a, false).unwrap();
    assert!(!history.constraint(&a).unwrap().open);

    let removed = history.remove_constraint(&b).unwrap();
    assert_eq!(removed.constraint_type, "distance");
    assert_eq!(history.len(), 2);
    assert!(matches!(
        history.remove_constraint(&b),
        Err(HistoryError::ConstraintNotFound { .. })
    ));
}

#[test]
fn set_input_param_keeps_constraint_id() {
    let mut history = builtin_history();
    let id = history.add_constraint("distance", Map::new()).unwrap();
    history.set_input_param(&id, "distance", json!(3)).unwrap();
    history.set_input_param(&id, "constraintID", json!("other")).unwrap();
    let record = history.constraint(&id).unwrap();
    assert_eq!(record.input_params["distance"], json!(3));
    assert_eq!(record.constraint_id(), Some(id.as_str()));
}

#[test]
fn replace_all_repairs_missing_and_duplicate_ids() {
    let mut history = builtin_history();
    let records = vec![
        ConstraintRecord::new("coincident", params(json!({"constraintID": "CO1"}))),
        ConstraintRecord::new("coincident", params(json!({"constraintID": "CO1"}))),
        ConstraintRecord::new("distance", Map::new()),
    ];
    history.replace_all(records, 4);
    let ids: Vec<_> = history
        .constraints()
        .iter()
        .map(|r| r.constraint_id().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["CO1", "CO5", "D6"]);
    assert_eq!(history.id_counter(), 6);
}

// ── Solver pass ──────────────────────────────────────────────────────────────

#[test]
fn satisfied_constraint_converges_after_one_iteration() {
    let (mut scene, _, _) = two_components([0.0, 0.0, 0.0]);
    let mut history = builtin_history();
    let id = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(5));
    assert_eq!(report.iterations_completed, 1);
    assert!(report.converged);
    assert!(!report.aborted);

    let result = report.result(&id).unwrap();
    assert_eq!(result.status, SolveStatus::Satisfied);
    assert!(result.ok && result.satisfied && !result.applied);
    assert_eq!(result.iteration, Some(0));
    assert_eq!(result.constraint_type, "coincident");

    let data = &history.constraint(&id).unwrap().persistent_data;
    assert_eq!(data.status, SolveStatus::Satisfied);
    assert!(data.last_run_at.is_some());
    assert_eq!(data.last_iteration, Some(0));
    assert_eq!(scene.render_requests(), 1);
}

#[test]
fn coincident_closes_half_the_gap_per_sweep() {
    let (mut scene, a, b) = two_components([4.0, 0.0, 0.0]);
    let mut history = builtin_history();
    let id = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    let result = report.result(&id).unwrap();
    assert_eq!(result.status, SolveStatus::Adjusted);
    assert!(result.applied);
    assert!(!report.converged);
    assert_relative_eq!(position(&scene, b).x, 2.0, epsilon = 1e-12);
    assert_relative_eq!(position(&scene, a).x, 0.0);

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(60));
    assert!(report.converged);
    assert!(report.all_satisfied());
    assert!(position(&scene, b).norm() <= 1e-4);
}

#[test]
fn fixed_component_moves_the_other() {
    let mut scene = Scene::new();
    let root = scene.root();
    let a = scene.create_child(root, Node::component("A"));
    let b = scene.create_child(root, Node::component("B").with_position([0.0, 2.0, 0.0]).fixed());
    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    assert_relative_eq!(position(&scene, b).y, 2.0);
    assert_relative_eq!(position(&scene, a).y, 1.0, epsilon = 1e-12);
}

#[test]
fn feature_fixed_flag_is_respected() {
    let (mut scene, a, b) = two_components([2.0, 0.0, 0.0]);
    scene.node_mut(b).unwrap().owning_feature_id = Some("AC2".into());
    let mut features = RecordingFeatures::default();
    features.fixed.insert("AC2".into());

    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    history.run_all(&mut scene, &mut features, &opts(1));
    assert_relative_eq!(position(&scene, b).x, 2.0);
    assert_relative_eq!(position(&scene, a).x, 1.0, epsilon = 1e-12);
}

#[test]
fn both_fixed_reports_error_without_moving() {
    let mut scene = Scene::new();
    let root = scene.root();
    scene.create_child(root, Node::component("A").fixed());
    let b = scene.create_child(root, Node::component("B").with_position([1.0, 0.0, 0.0]).fixed());
    let mut history = builtin_history();
    let id = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(3));
    let result = report.result(&id).unwrap();
    assert_eq!(result.status, SolveStatus::Error);
    assert!(!result.ok);
    assert!(!result.applied);
    assert!(report.converged, "nothing moved, so the pass stops");
    assert_relative_eq!(position(&scene, b).x, 1.0);
}

#[test]
fn distance_constraint_reaches_target() {
    let (mut scene, _, b) = two_components([4.0, 0.0, 0.0]);
    let mut history = builtin_history();
    let id = history
        .add_constraint(
            "distance",
            params(json!({"elements": ["A", "B"], "distance": 10})),
        )
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(80));
    assert!(report.converged);
    assert_eq!(report.result(&id).unwrap().status, SolveStatus::Satisfied);
    assert_relative_eq!(position(&scene, b).x, 10.0, epsilon = 1e-4);
}

#[test]
fn parallel_constraint_aligns_axes() {
    let mut scene = Scene::new();
    let root = scene.root();
    scene.create_child(root, Node::component("A"));
    let tilt = UnitQuaternion::from_euler_angles(30f64.to_radians(), 0.0, 0.0);
    let b = scene.create_child(root, Node::component("B").with_rotation(tilt));
    let mut history = builtin_history();
    history
        .add_constraint("parallel", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(60));
    assert!(report.converged);
    let axis = scene.node(b).unwrap().unit_rotation() * Vector3::z();
    assert_relative_eq!(axis.z, 1.0, epsilon = 1e-6);
    let q = scene.node(b).unwrap().rotation;
    assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-6);
}

#[test]
fn unreported_mutation_counts_as_adjusted() {
    let (mut scene, a, _) = two_components([0.0; 3]);
    let mut history = scripted_history("nudge", || Box::new(Nudge));
    let id = history.add_constraint("nudge", Map::new()).unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    let result = report.result(&id).unwrap();
    assert!(result.applied);
    assert_eq!(result.status, SolveStatus::Adjusted);
    assert!(!report.converged);
    assert_relative_eq!(position(&scene, a).x, 0.5, epsilon = 1e-12);
    assert_eq!(
        history.constraint(&id).unwrap().persistent_data.status,
        SolveStatus::Adjusted
    );
}

#[test]
fn rotation_is_applied_in_world_space_under_a_turned_parent() {
    let (mut scene, a) = nested_component();
    let mut history = scripted_history("aim", || Box::new(AimAlongX));
    history.add_constraint("aim", Map::new()).unwrap();
    let options = SolveOptions {
        rotation_gain: 1.0,
        ..opts(1)
    };

    history.run_all(&mut scene, &mut NoFeatures, &options);
    let axis = scene.world_matrix(a).transform_vector(&Vector3::z());
    assert_relative_eq!(axis.x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(axis.y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(axis.z, 0.0, epsilon = 1e-9);
}

#[test]
fn parallel_converges_for_nested_component() {
    let (mut scene, a) = nested_component();
    let root = scene.root();
    let tilt = UnitQuaternion::from_euler_angles(0.0, 40f64.to_radians(), 0.0);
    let b = scene.create_child(root, Node::component("B").with_rotation(tilt));
    scene.node_mut(b).unwrap().fixed = true;
    let mut history = builtin_history();
    let id = history
        .add_constraint("parallel", params(json!({"elements": ["B", "A"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(80));
    assert!(report.converged);
    assert_eq!(report.result(&id).unwrap().status, SolveStatus::Satisfied);
    let wa = scene.world_matrix(a).transform_vector(&Vector3::z());
    let wb = scene.world_matrix(b).transform_vector(&Vector3::z());
    assert_relative_eq!(wa.cross(&wb).norm(), 0.0, epsilon = 1e-3);
}

#[test]
fn held_constraint_is_skipped_and_keeps_its_status() {
    let (mut scene, _, b) = two_components([0.0; 3]);
    let mut history = builtin_history();
    let id = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    let stored = history.constraint(&id).unwrap().persistent_data.clone();
    assert_eq!(stored.status, SolveStatus::Satisfied);

    history
        .set_input_param(&id, APPLY_IMMEDIATELY_PARAM, json!(false))
        .unwrap();
    scene.node_mut(b).unwrap().position = Vector3::new(5.0, 0.0, 0.0);
    let mut hooks = RecordingHooks::default();
    let report = history.run_all_with_hooks(&mut scene, &mut NoFeatures, &opts(10), &mut hooks);

    let result = report.result(&id).unwrap();
    assert_eq!(result.status, SolveStatus::Pending);
    assert_eq!(result.iteration, None);
    assert_eq!(result.message.as_deref(), Some(HELD_MESSAGE));
    assert!(report.converged);
    assert!(hooks.events.contains(&"skipped:coincident".to_string()));
    assert_relative_eq!(position(&scene, b).x, 5.0);
    assert_eq!(history.constraint(&id).unwrap().persistent_data, stored);
}

#[test]
fn missing_type_yields_error_result_and_skip_hook() {
    let (mut scene, _, _) = two_components([0.0; 3]);
    let mut history = builtin_history();
    history.replace_all(
        vec![
            ConstraintRecord::new("tangent", params(json!({"constraintID": "T1"}))),
            ConstraintRecord::new(
                "coincident",
                params(json!({"constraintID": "CO2", "elements": ["A", "B"]})),
            ),
        ],
        2,
    );
    let mut hooks = RecordingHooks::default();
    let report = history.run_all_with_hooks(&mut scene, &mut NoFeatures, &opts(1), &mut hooks);

    let missing = report.result("T1").unwrap();
    assert_eq!(missing.status, SolveStatus::Error);
    assert!(missing.error.as_deref().unwrap().contains("tangent"));
    assert_eq!(missing.iteration, None);
    assert!(hooks.events.contains(&"skipped:tangent".to_string()));
    assert_eq!(report.result("CO2").unwrap().status, SolveStatus::Satisfied);
    assert_eq!(
        history.constraint("T1").unwrap().persistent_data.status,
        SolveStatus::Error
    );
}

#[test]
fn solve_error_is_not_fatal() {
    let (mut scene, _, _) = two_components([0.0; 3]);
    let mut history = builtin_history();
    let broken = history
        .add_constraint("coincident", params(json!({"elements": ["A", "Nowhere"]})))
        .unwrap();
    let fine = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    let err = report.result(&broken).unwrap();
    assert_eq!(err.status, SolveStatus::Error);
    assert!(err.error.as_deref().unwrap().contains("Nowhere"));
    assert_eq!(err.iteration, Some(0));
    assert_eq!(report.result(&fine).unwrap().status, SolveStatus::Satisfied);
}

#[test]
fn element_outside_any_component_is_an_error() {
    let mut scene = Scene::new();
    let root = scene.root();
    scene.create_child(root, Node::component("A"));
    scene.create_child(root, Node::solid("Loose"));
    let mut history = builtin_history();
    let id = history
        .add_constraint("coincident", params(json!({"elements": ["A", "Loose"]})))
        .unwrap();
    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    let result = report.result(&id).unwrap();
    assert_eq!(result.status, SolveStatus::Error);
    assert!(result.error.as_deref().unwrap().contains("assembly component"));
}

#[test]
fn legacy_run_entry_point_is_used() {
    let mut registry = builtin_registry();
    registry.register(Arc::new(LegacyClass));
    registry.register(Arc::new(HollowClass));
    let mut history = history_with(registry);
    let legacy = history.add_constraint("legacy", Map::new()).unwrap();
    let hollow = history.add_constraint("hollow", Map::new()).unwrap();

    let mut scene = Scene::new();
    let report = history.run_all(&mut scene, &mut NoFeatures, &opts(1));

    let legacy = report.result(&legacy).unwrap();
    assert_eq!(legacy.status, SolveStatus::Satisfied);
    assert_eq!(legacy.message.as_deref(), Some("legacy run"));

    let hollow = report.result(&hollow).unwrap();
    assert_eq!(hollow.status, SolveStatus::Error);
    assert_eq!(hollow.error.as_deref(), Some("constraint does not implement solve"));
}

// ── Cancellation & hooks ─────────────────────────────────────────────────────

#[test]
fn cancellation_before_second_iteration() {
    let (mut scene, _, b) = two_components([4.0, 0.0, 0.0]);
    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let token = CancelToken::new();
    let mut hooks = RecordingHooks {
        cancel_after_iteration: Some((0, token.clone())),
        ..RecordingHooks::default()
    };
    let options = opts(5).with_cancel(token);
    let report = history.run_all_with_hooks(&mut scene, &mut NoFeatures, &options, &mut hooks);

    assert!(report.aborted);
    assert!(!report.converged);
    assert_eq!(report.iterations_completed, 1);
    assert_relative_eq!(position(&scene, b).x, 2.0, epsilon = 1e-12);
    assert!(!hooks.events.contains(&"iteration:1".to_string()));
    assert_eq!(hooks.events.last().map(String::as_str), Some("done:1"));
}

#[test]
fn cancellation_between_constraints() {
    let (mut scene, _, _) = two_components([1.0, 0.0, 0.0]);
    let mut history = builtin_history();
    let first = history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    let second = history
        .add_constraint("parallel", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let token = CancelToken::new();
    let mut hooks = RecordingHooks {
        cancel_after_constraint: Some(token.clone()),
        ..RecordingHooks::default()
    };
    let options = opts(3).with_cancel(token);
    let report = history.run_all_with_hooks(&mut scene, &mut NoFeatures, &options, &mut hooks);

    assert!(report.aborted);
    assert_eq!(report.iterations_completed, 0);
    assert_eq!(report.result(&first).unwrap().status, SolveStatus::Adjusted);
    let pending = report.result(&second).unwrap();
    assert_eq!(pending.status, SolveStatus::Pending);
    assert_eq!(pending.iteration, None);
}

#[test]
fn hook_order_and_failures_are_swallowed() {
    let (mut scene, _, _) = two_components([0.0; 3]);
    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();

    let mut hooks = RecordingHooks {
        fail: true,
        ..RecordingHooks::default()
    };
    let report = history.run_all_with_hooks(&mut scene, &mut NoFeatures, &opts(3), &mut hooks);
    assert!(report.converged);
    assert_eq!(
        hooks.events,
        vec![
            "start:1",
            "iteration:0",
            "constraint:CO1",
            "end:CO1",
            "complete:0:false",
            "done:1"
        ]
    );
}

// ── Post-pass effects ────────────────────────────────────────────────────────

#[test]
fn touched_components_sync_to_owning_features() {
    let (mut scene, a, b) = two_components([4.0, 0.0, 0.0]);
    scene.node_mut(a).unwrap().owning_feature_id = Some("AC1".into());
    scene.node_mut(b).unwrap().owning_feature_id = Some("AC2".into());
    let mut features = RecordingFeatures::default();

    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    history.run_all(&mut scene, &mut features, &opts(1));

    assert!(!features.synced.contains_key("AC1"), "A never moved");
    let synced = features.synced["AC2"];
    assert_relative_eq!(synced.position[0], 2.0, epsilon = 1e-12);
    assert_eq!(synced.scale, [1.0, 1.0, 1.0]);

    let world = scene.node(b).unwrap().cached_world_matrix();
    assert_relative_eq!(world[(0, 3)], 2.0, epsilon = 1e-12);
}

#[test]
fn debug_arrows_are_swept_between_passes() {
    let (mut scene, _, _) = two_components([4.0, 0.0, 0.0]);
    let mut history = builtin_history();
    history
        .add_constraint("coincident", params(json!({"elements": ["A", "B"]})))
        .unwrap();
    let options = SolveOptions {
        debug: true,
        delay_ms: Some(0),
        ..opts(1)
    };

    history.run_all(&mut scene, &mut NoFeatures, &options);
    assert_eq!(arrow_count(&scene), 1);
    history.run_all(&mut scene, &mut NoFeatures, &options);
    assert_eq!(arrow_count(&scene), 1);

    history.run_all(&mut scene, &mut NoFeatures, &opts(1));
    assert_eq!(arrow_count(&scene), 0);
}
