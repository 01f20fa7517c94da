//! Built-in assembly constraints.
//!
//! Each constraint relates a local point or axis on two components. Every
//! solve computes the world-space error, and if it exceeds the tolerance
//! moves component B toward satisfaction (or A when B is fixed). The context
//! damps each correction by the pass gain, so an unfixed pair closes half the
//! gap per sweep at the default gains.

use std::sync::Arc;

use history_types::{as_finite_f64, ParamSchema, ParamSpec, ParamType, Registered};
use nalgebra::{UnitQuaternion, Vector3};
use scene_graph::{NodeId, Scene};
use serde_json::{json, Map, Value};

use crate::constraint::{
    clear_debug_arrows_for, AssemblyConstraint, ConstraintClass, ConstraintRegistry,
};
use crate::context::SolveContext;
use crate::types::{ConstraintError, SolveOutcome, CONSTRAINT_ID_PARAM};

/// Registry holding `coincident`, `distance` and `parallel`.
pub fn builtin_registry() -> ConstraintRegistry {
    let mut registry = ConstraintRegistry::new();
    registry.register(Arc::new(CoincidentClass));
    registry.register(Arc::new(DistanceClass));
    registry.register(Arc::new(ParallelClass));
    registry
}

// ── Parameter helpers ────────────────────────────────────────────────────────

fn elements_schema() -> ParamSchema {
    ParamSchema::new().param(
        "elements",
        ParamSpec::new(ParamType::ReferenceSelection, json!([]))
            .with_hint("Two objects inside different components")
            .multiple(),
    )
}

/// `[x, y, z]` or `{x, y, z}`; missing or non-numeric components fall back to
/// `default`.
fn vec3_param(params: &Map<String, Value>, key: &str, default: [f64; 3]) -> [f64; 3] {
    let mut out = default;
    match params.get(key) {
        Some(Value::Array(items)) => {
            for (slot, item) in out.iter_mut().zip(items) {
                if let Some(v) = as_finite_f64(item) {
                    *slot = v;
                }
            }
        }
        Some(Value::Object(map)) => {
            for (slot, axis) in out.iter_mut().zip(["x", "y", "z"]) {
                if let Some(v) = map.get(axis).and_then(as_finite_f64) {
                    *slot = v;
                }
            }
        }
        _ => {}
    }
    out
}

fn constraint_id(params: &Map<String, Value>) -> String {
    params
        .get(CONSTRAINT_ID_PARAM)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The two elements and the components that carry them.
struct Pair {
    a: NodeId,
    b: NodeId,
    component_a: NodeId,
    component_b: NodeId,
}

fn resolve_pair(ctx: &SolveContext<'_>, elements: &Value) -> Result<Pair, ConstraintError> {
    let items: Vec<&Value> = match elements {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    if items.len() < 2 {
        return Err(ConstraintError::InvalidParameter {
            key: "elements".into(),
            reason: format!("expected two references, got {}", items.len()),
        });
    }

    let resolve = |value: &Value| -> Result<(NodeId, NodeId), ConstraintError> {
        let reference = value.to_string();
        let id = ctx
            .resolve_reference(value)
            .ok_or_else(|| ConstraintError::Unresolved {
                reference: reference.clone(),
            })?;
        let component = ctx
            .resolve_component(id)
            .ok_or(ConstraintError::NotAComponent { reference })?;
        Ok((id, component))
    };
    let (a, component_a) = resolve(items[0])?;
    let (b, component_b) = resolve(items[1])?;
    Ok(Pair {
        a,
        b,
        component_a,
        component_b,
    })
}

/// Translate B by `delta`, or A by `-delta` when B is fixed.
fn close_gap(
    ctx: &mut SolveContext<'_>,
    pair: &Pair,
    delta: Vector3<f64>,
) -> Option<SolveOutcome> {
    if pair.component_a == pair.component_b {
        return Some(SolveOutcome::failed("both elements belong to the same component"));
    }
    if ctx.apply_translation(pair.component_b, delta)
        || ctx.apply_translation(pair.component_a, -delta)
    {
        return None;
    }
    Some(SolveOutcome::failed("both components are fixed"))
}

// ── Coincident ───────────────────────────────────────────────────────────────

struct CoincidentClass;

impl Registered for CoincidentClass {
    fn type_name(&self) -> &str {
        "coincident"
    }
    fn short_name(&self) -> &str {
        "CO"
    }
}

impl ConstraintClass for CoincidentClass {
    fn input_params_schema(&self) -> ParamSchema {
        elements_schema()
            .param("pointA", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 0.0])))
            .param("pointB", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 0.0])))
    }

    fn create(&self, params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        Box::new(Coincident {
            id: constraint_id(params),
            elements: params.get("elements").cloned().unwrap_or(Value::Null),
            point_a: vec3_param(params, "pointA", [0.0; 3]),
            point_b: vec3_param(params, "pointB", [0.0; 3]),
        })
    }
}

/// Local point A on element A coincides with local point B on element B.
struct Coincident {
    id: String,
    elements: Value,
    point_a: [f64; 3],
    point_b: [f64; 3],
}

impl AssemblyConstraint for Coincident {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let pair = resolve_pair(ctx, &self.elements)?;
        let a = ctx.world_point(pair.a, self.point_a);
        let b = ctx.world_point(pair.b, self.point_b);
        let delta = a - b;
        let error = delta.norm();
        let diagnostics = json!({ "error": error });

        if error <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied().with_diagnostics(diagnostics));
        }
        ctx.add_debug_arrow(b, delta);
        if let Some(failed) = close_gap(ctx, &pair, delta) {
            return Ok(failed.with_diagnostics(diagnostics));
        }
        Ok(SolveOutcome::adjusted().with_diagnostics(diagnostics))
    }

    fn clear_debug_arrows(&mut self, scene: &mut Scene) {
        clear_debug_arrows_for(scene, &self.id);
    }
}

// ── Distance ─────────────────────────────────────────────────────────────────

struct DistanceClass;

impl Registered for DistanceClass {
    fn type_name(&self) -> &str {
        "distance"
    }
    fn short_name(&self) -> &str {
        "D"
    }
}

impl ConstraintClass for DistanceClass {
    fn input_params_schema(&self) -> ParamSchema {
        elements_schema()
            .param("pointA", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 0.0])))
            .param("pointB", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 0.0])))
            .param("distance", ParamSpec::new(ParamType::Number, json!(10)))
    }

    fn create(&self, params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        Box::new(Distance {
            id: constraint_id(params),
            elements: params.get("elements").cloned().unwrap_or(Value::Null),
            point_a: vec3_param(params, "pointA", [0.0; 3]),
            point_b: vec3_param(params, "pointB", [0.0; 3]),
            distance: params.get("distance").and_then(as_finite_f64),
        })
    }
}

/// Keeps two local points a fixed distance apart.
struct Distance {
    id: String,
    elements: Value,
    point_a: [f64; 3],
    point_b: [f64; 3],
    distance: Option<f64>,
}

impl AssemblyConstraint for Distance {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let target = match self.distance {
            Some(d) if d >= 0.0 => d,
            _ => {
                return Err(ConstraintError::InvalidParameter {
                    key: "distance".into(),
                    reason: "must be a non-negative number".into(),
                })
            }
        };
        let pair = resolve_pair(ctx, &self.elements)?;
        let a = ctx.world_point(pair.a, self.point_a);
        let b = ctx.world_point(pair.b, self.point_b);
        let offset = b - a;
        let current = offset.norm();
        let error = current - target;
        let diagnostics = json!({ "distance": current, "error": error });

        if error.abs() <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied().with_diagnostics(diagnostics));
        }
        // Coincident points give no direction; push apart along X.
        let direction = offset
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::x);
        let delta = -direction * error;
        ctx.add_debug_arrow(b, delta);
        if let Some(failed) = close_gap(ctx, &pair, delta) {
            return Ok(failed.with_diagnostics(diagnostics));
        }
        Ok(SolveOutcome::adjusted().with_diagnostics(diagnostics))
    }

    fn clear_debug_arrows(&mut self, scene: &mut Scene) {
        clear_debug_arrows_for(scene, &self.id);
    }
}

// ── Parallel ─────────────────────────────────────────────────────────────────

struct ParallelClass;

impl Registered for ParallelClass {
    fn type_name(&self) -> &str {
        "parallel"
    }
    fn short_name(&self) -> &str {
        "PA"
    }
}

impl ConstraintClass for ParallelClass {
    fn input_params_schema(&self) -> ParamSchema {
        elements_schema()
            .param("axisA", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 1.0])))
            .param("axisB", ParamSpec::new(ParamType::Vec3, json!([0.0, 0.0, 1.0])))
    }

    fn create(&self, params: &Map<String, Value>) -> Box<dyn AssemblyConstraint> {
        Box::new(Parallel {
            id: constraint_id(params),
            elements: params.get("elements").cloned().unwrap_or(Value::Null),
            axis_a: vec3_param(params, "axisA", [0.0, 0.0, 1.0]),
            axis_b: vec3_param(params, "axisB", [0.0, 0.0, 1.0]),
        })
    }
}

/// Local axis B is parallel to local axis A. Anti-parallel counts as parallel.
struct Parallel {
    id: String,
    elements: Value,
    axis_a: [f64; 3],
    axis_b: [f64; 3],
}

impl AssemblyConstraint for Parallel {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let pair = resolve_pair(ctx, &self.elements)?;
        let wa = ctx.world_direction(pair.a, self.axis_a);
        let wb = ctx.world_direction(pair.b, self.axis_b);
        if wa.norm() < f64::EPSILON || wb.norm() < f64::EPSILON {
            return Err(ConstraintError::InvalidParameter {
                key: "axisA/axisB".into(),
                reason: "zero-length axis".into(),
            });
        }
        let target = if wa.dot(&wb) < 0.0 { -wa } else { wa };
        let angle = wb.angle(&target);
        let diagnostics = json!({ "angle": angle });

        if angle <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied().with_diagnostics(diagnostics));
        }
        if pair.component_a == pair.component_b {
            return Ok(SolveOutcome::failed("both elements belong to the same component")
                .with_diagnostics(diagnostics));
        }
        let origin = ctx.world_point(pair.b, [0.0; 3]);
        ctx.add_debug_arrow(origin, target - wb);

        // Angle is in (0, pi/2], so the rotation between the axes is defined.
        let to_target =
            UnitQuaternion::rotation_between(&wb, &target).unwrap_or_else(UnitQuaternion::identity);
        let applied = ctx.apply_rotation(pair.component_b, to_target)
            || ctx.apply_rotation(pair.component_a, to_target.inverse());
        if !applied {
            return Ok(SolveOutcome::failed("both components are fixed").with_diagnostics(diagnostics));
        }
        Ok(SolveOutcome::adjusted().with_diagnostics(diagnostics))
    }

    fn clear_debug_arrows(&mut self, scene: &mut Scene) {
        clear_debug_arrows_for(scene, &self.id);
    }
}
