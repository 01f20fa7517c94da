use std::fmt;

use history_types::TransformParams;
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde_json::{Map, Value};
use uuid::Uuid;

slotmap::new_key_type! {
    /// Arena key of a scene node. Valid until the node is disposed.
    pub struct NodeId;
}

/// What a node represents. Only `Solid` and `Component` carry meaning for
/// selection dispatch and constraint solving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Group,
    Solid,
    /// A rigid, independently transformable sub-assembly.
    Component,
    Light,
    Mesh,
    /// Visual helpers such as debug arrows.
    Helper,
    Other(String),
}

/// Errors raised by optional artifact hooks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("visualize failed: {0}")]
    Visualize(String),

    #[error("free failed: {0}")]
    Free(String),

    #[error("hook failed: {0}")]
    Other(String),
}

/// Optional capabilities an artifact may implement.
///
/// Every method has a no-op default: an artifact without hooks behaves exactly
/// like one whose hooks do nothing.
pub trait NodeHooks: fmt::Debug {
    /// Build display data for the artifact.
    fn visualize(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Release kernel-side resources once display data exists.
    fn free(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Offered a click on one of this node's solid children. Return `true` to
    /// claim it.
    fn toggle_click(&mut self) -> bool {
        false
    }
}

/// A scene-graph node.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub uuid: Uuid,
    pub kind: NodeKind,
    pub position: Vector3<f64>,
    /// Local rotation. Kept as a raw quaternion; the solver renormalizes drift.
    pub rotation: Quaternion<f64>,
    pub scale: Vector3<f64>,
    /// Provenance stamp set by the replay engine.
    pub owning_feature_id: Option<String>,
    pub user_data: Map<String, Value>,
    pub assembly_component: bool,
    pub fixed: bool,
    /// Process-managed nodes (persistent lights) survive `Scene::clear`.
    pub persistent: bool,
    pub visible: bool,
    pub(crate) removed: bool,
    pub(crate) click_enabled: bool,
    pub(crate) selected: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) world: Matrix4<f64>,
    pub(crate) hooks: Option<Box<dyn NodeHooks>>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            kind,
            position: Vector3::zeros(),
            rotation: Quaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            owning_feature_id: None,
            user_data: Map::new(),
            assembly_component: false,
            fixed: false,
            persistent: false,
            visible: true,
            removed: false,
            click_enabled: false,
            selected: false,
            parent: None,
            children: Vec::new(),
            world: Matrix4::identity(),
            hooks: None,
        }
    }

    pub fn solid(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Solid)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    /// An assembly component node.
    pub fn component(name: impl Into<String>) -> Self {
        let mut node = Self::new(name, NodeKind::Component);
        node.assembly_component = true;
        node
    }

    pub fn light(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Light)
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = Vector3::from(position);
        self
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = rotation.into_inner();
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn NodeHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_user_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.user_data.insert(key.into(), value);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn is_click_enabled(&self) -> bool {
        self.click_enabled
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    /// World matrix cached by the last `Scene::update_world_matrix`.
    pub fn cached_world_matrix(&self) -> &Matrix4<f64> {
        &self.world
    }

    /// Unit rotation, normalizing whatever drift the raw quaternion carries.
    pub fn unit_rotation(&self) -> UnitQuaternion<f64> {
        if self.rotation.norm_squared() < f64::EPSILON {
            return UnitQuaternion::identity();
        }
        UnitQuaternion::from_quaternion(self.rotation)
    }

    /// translation * rotation * scale.
    pub fn local_matrix(&self) -> Matrix4<f64> {
        Matrix4::new_translation(&self.position)
            * self.unit_rotation().to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }

    /// Local transform as feature parameters (Euler angles in degrees).
    pub fn transform_params(&self) -> TransformParams {
        let (rx, ry, rz) = self.unit_rotation().euler_angles();
        TransformParams {
            position: [self.position.x, self.position.y, self.position.z],
            rotation_euler: [rx.to_degrees(), ry.to_degrees(), rz.to_degrees()],
            scale: [self.scale.x, self.scale.y, self.scale.z],
        }
    }

    pub fn set_transform_params(&mut self, params: &TransformParams) {
        let [rx, ry, rz] = params.rotation_euler;
        self.position = Vector3::from(params.position);
        self.rotation = UnitQuaternion::from_euler_angles(
            rx.to_radians(),
            ry.to_radians(),
            rz.to_radians(),
        )
        .into_inner();
        self.scale = Vector3::from(params.scale);
    }
}
