use std::collections::BTreeSet;

use history_types::{is_truthy, TransformParams};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use scene_graph::{Node, NodeId, NodeKind, Scene};
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::options::SolveOptions;

/// Name prefix of debug arrow nodes. Arrows are named
/// `"{prefix}{constraintID}:{n}"`.
pub const DEBUG_ARROW_PREFIX: &str = "__debugArrow:";

/// Drift from unit length (squared norm) tolerated before renormalizing.
const QUATERNION_DRIFT: f64 = 1e-6;

/// The feature-side view the solver needs: fixed flags in, solved poses out.
pub trait ComponentFeatures {
    /// Whether the feature that produced a component pins it in place.
    fn is_fixed(&self, feature_id: &str) -> bool;

    /// Store the solved local transform on the owning feature. Returns `false`
    /// when the feature is unknown.
    fn sync_transform(&mut self, feature_id: &str, transform: &TransformParams) -> bool;
}

/// No feature history behind the scene.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFeatures;

impl ComponentFeatures for NoFeatures {
    fn is_fixed(&self, _feature_id: &str) -> bool {
        false
    }

    fn sync_transform(&mut self, _feature_id: &str, _transform: &TransformParams) -> bool {
        false
    }
}

/// Everything a constraint may read or mutate during one `solve` call.
pub struct SolveContext<'a> {
    scene: &'a mut Scene,
    features: &'a dyn ComponentFeatures,
    touched: &'a mut BTreeSet<NodeId>,
    constraint_id: &'a str,
    pub tolerance: f64,
    pub translation_gain: f64,
    pub rotation_gain: f64,
    pub iteration: usize,
    pub debug: bool,
    mutations: usize,
    arrows: usize,
}

impl<'a> SolveContext<'a> {
    pub fn new(
        scene: &'a mut Scene,
        features: &'a dyn ComponentFeatures,
        touched: &'a mut BTreeSet<NodeId>,
        constraint_id: &'a str,
        options: &SolveOptions,
        iteration: usize,
    ) -> Self {
        Self {
            scene,
            features,
            touched,
            constraint_id,
            tolerance: options.tolerance,
            translation_gain: options.translation_gain,
            rotation_gain: options.rotation_gain,
            iteration,
            debug: options.debug,
            mutations: 0,
            arrows: 0,
        }
    }

    pub fn scene(&self) -> &Scene {
        self.scene
    }

    pub fn constraint_id(&self) -> &str {
        self.constraint_id
    }

    /// Number of successful `apply_*` calls made through this context.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Find a scene object by name, falling back to its uuid.
    pub fn resolve_object(&self, reference: &str) -> Option<NodeId> {
        self.scene
            .get_object_by_name(reference)
            .or_else(|| Uuid::parse_str(reference).ok().and_then(|u| self.scene.find_by_uuid(u)))
    }

    /// Resolve a raw parameter value: a name, a `{uuid}` / `{name}` object, or
    /// the first element of an array of those.
    pub fn resolve_reference(&self, value: &Value) -> Option<NodeId> {
        match value {
            Value::String(s) => self.resolve_object(s),
            Value::Array(items) => items.iter().find_map(|v| self.resolve_reference(v)),
            Value::Object(map) => {
                let by_uuid = map
                    .get("uuid")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .and_then(|u| self.scene.find_by_uuid(u));
                by_uuid.or_else(|| {
                    map.get("name")
                        .and_then(Value::as_str)
                        .and_then(|s| self.scene.get_object_by_name(s))
                })
            }
            _ => None,
        }
    }

    /// Nearest assembly component at or above `id`.
    pub fn resolve_component(&self, id: NodeId) -> Option<NodeId> {
        self.scene.component_of(id)
    }

    /// Fixed via the node flag, `userData.fixed`, or the owning feature's
    /// `isFixed` parameter.
    pub fn is_component_fixed(&self, component: NodeId) -> bool {
        let Some(node) = self.scene.node(component) else {
            return false;
        };
        node.fixed
            || node.user_data.get("fixed").is_some_and(is_truthy)
            || node
                .owning_feature_id
                .as_deref()
                .is_some_and(|id| self.features.is_fixed(id))
    }

    /// Local point of `id` in world coordinates.
    pub fn world_point(&self, id: NodeId, local: [f64; 3]) -> Point3<f64> {
        self.scene
            .world_matrix(id)
            .transform_point(&Point3::from(local))
    }

    /// Local direction of `id` in world coordinates, normalized.
    pub fn world_direction(&self, id: NodeId, local: [f64; 3]) -> Vector3<f64> {
        let v = self
            .scene
            .world_matrix(id)
            .transform_vector(&Vector3::from(local));
        v.try_normalize(f64::EPSILON).unwrap_or(v)
    }

    /// Move `component` by the world-space `delta`, damped by the translation
    /// gain. Fixed components are left alone.
    pub fn apply_translation(&mut self, component: NodeId, delta: Vector3<f64>) -> bool {
        if self.is_component_fixed(component) || !delta.iter().all(|c| c.is_finite()) {
            return false;
        }
        let parent_inverse = self
            .scene
            .parent(component)
            .map(|p| self.scene.world_matrix(p))
            .and_then(|m| m.try_inverse());
        let step = delta * self.translation_gain;
        let local_step = match parent_inverse {
            Some(inv) => inv.transform_vector(&step),
            None => step,
        };
        let Some(node) = self.scene.node_mut(component) else {
            return false;
        };
        node.position += local_step;
        trace!(component = %node.name, ?local_step, "apply_translation");
        self.mark(component);
        true
    }

    /// World rotation of `id`, composed from the unit rotations up its chain.
    /// Scale is ignored.
    pub fn world_rotation(&self, id: NodeId) -> UnitQuaternion<f64> {
        let mut rotation = UnitQuaternion::identity();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.scene.node(current) else {
                break;
            };
            rotation = node.unit_rotation() * rotation;
            cursor = node.parent();
        }
        rotation
    }

    /// Pre-rotate `component` by the world-space `rotation`, damped by the
    /// rotation gain. Fixed components are left alone.
    pub fn apply_rotation(&mut self, component: NodeId, rotation: UnitQuaternion<f64>) -> bool {
        if self.is_component_fixed(component) {
            return false;
        }
        let step = rotation.powf(self.rotation_gain);
        let parent = self
            .scene
            .parent(component)
            .map(|p| self.world_rotation(p))
            .unwrap_or_else(UnitQuaternion::identity);
        // World step expressed in the parent frame.
        let local_step = parent.inverse() * step * parent;
        let Some(node) = self.scene.node_mut(component) else {
            return false;
        };
        let mut q = local_step.into_inner() * node.rotation;
        if (q.norm_squared() - 1.0).abs() > QUATERNION_DRIFT {
            q = q.normalize();
        }
        node.rotation = q;
        trace!(component = %node.name, angle = local_step.angle(), "apply_rotation");
        self.mark(component);
        true
    }

    fn mark(&mut self, component: NodeId) {
        self.mutations += 1;
        self.touched.insert(component);
    }

    /// Add a debug arrow from `origin` along `vector`. No-op outside debug mode.
    pub fn add_debug_arrow(&mut self, origin: Point3<f64>, vector: Vector3<f64>) -> Option<NodeId> {
        if !self.debug {
            return None;
        }
        let name = format!("{DEBUG_ARROW_PREFIX}{}:{}", self.constraint_id, self.arrows);
        self.arrows += 1;
        let mut arrow = Node::new(name, NodeKind::Helper).with_position(origin.coords.into());
        arrow
            .user_data
            .insert("direction".into(), serde_json::json!([vector.x, vector.y, vector.z]));
        let root = self.scene.root();
        Some(self.scene.create_child(root, arrow))
    }
}
