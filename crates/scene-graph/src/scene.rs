use nalgebra::Matrix4;
use slotmap::SlotMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::node::{HookError, Node, NodeId, NodeKind};

/// Name given to the ambient light re-added on every replay pass.
pub const AMBIENT_LIGHT_NAME: &str = "AmbientLight";

/// Arena-backed scene graph with a single root.
#[derive(Debug)]
pub struct Scene {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
    render_requests: u64,
}

impl Scene {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new("Scene", NodeKind::Root));
        Self {
            nodes,
            root,
            render_requests: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Whether `id` still refers to a live (not disposed) node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.nodes.get(current).and_then(|n| n.parent);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Insert a detached node into the arena.
    pub fn create(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    /// Insert `node` and attach it under `parent` in one step.
    pub fn create_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.nodes.insert(node);
        self.add_child(parent, id);
        id
    }

    /// Attach `id` to the root and clear its removal flag.
    pub fn add(&mut self, id: NodeId) -> bool {
        self.add_child(self.root, id)
    }

    /// Attach `child` under `parent`, detaching it from any previous parent.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            return false;
        }
        // Refuse cycles: `parent` must not live inside `child`'s subtree.
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return false;
            }
            cursor = self.nodes[current].parent;
        }
        self.detach(child);
        self.nodes[parent].children.push(child);
        let node = &mut self.nodes[child];
        node.parent = Some(parent);
        node.removed = false;
        true
    }

    /// Detach `id` from its parent and flag it removed. Null-safe: returns
    /// `false` for disposed or already detached nodes.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if !self.contains(id) || id == self.root {
            return false;
        }
        let detached = self.detach(id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.removed = true;
        }
        detached
    }

    fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes.get_mut(id).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|c| *c != id);
        }
        true
    }

    /// Drop `id` and its whole subtree from the arena. Returns the number of
    /// nodes freed.
    pub fn dispose(&mut self, id: NodeId) -> usize {
        if id == self.root || !self.contains(id) {
            return 0;
        }
        self.detach(id);
        let subtree = self.descendants(id);
        for node in &subtree {
            self.nodes.remove(*node);
        }
        subtree.len()
    }

    /// Detach every root child except persistent nodes.
    ///
    /// Detached nodes without an owning feature are transient (lights, debug
    /// helpers) and are disposed; owned artifacts stay in the arena so clean
    /// features can reapply them.
    pub fn clear(&mut self) {
        let children = self.nodes[self.root].children.clone();
        for child in children {
            let node = &self.nodes[child];
            if node.persistent {
                continue;
            }
            let owned = node.owning_feature_id.is_some();
            self.remove(child);
            if !owned {
                self.dispose(child);
            }
        }
    }

    /// Re-add the standard ambient light under the root.
    pub fn add_ambient_light(&mut self) -> NodeId {
        self.create_child(self.root, Node::light(AMBIENT_LIGHT_NAME))
    }

    pub fn root_children(&self) -> &[NodeId] {
        &self.nodes[self.root].children
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// `id` followed by its descendants, depth-first pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Depth-first pre-order walk of the subtree at `start`.
    pub fn traverse(&self, start: NodeId, mut visitor: impl FnMut(NodeId, &Node)) {
        for id in self.descendants(start) {
            visitor(id, &self.nodes[id]);
        }
    }

    /// First attached node with the given name.
    pub fn get_object_by_name(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|id| self.nodes[*id].name == name)
    }

    /// Any live node with the given uuid, attached or not.
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.uuid == uuid)
            .map(|(id, _)| id)
    }

    /// Attached nodes stamped with `feature_id`.
    pub fn owned_by(&self, feature_id: &str) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| self.nodes[*id].owning_feature_id.as_deref() == Some(feature_id))
            .collect()
    }

    /// Detach every attached node owned by `feature_id`.
    pub fn remove_owned_by(&mut self, feature_id: &str) -> usize {
        let owned = self.owned_by(feature_id);
        owned.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Nearest node at or above `id` flagged as an assembly component.
    pub fn component_of(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.nodes.get(current)?;
            if node.assembly_component {
                return Some(current);
            }
            cursor = node.parent;
        }
        None
    }

    /// World matrix computed from the live local transforms up the parent chain.
    pub fn world_matrix(&self, id: NodeId) -> Matrix4<f64> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            chain.push(node.local_matrix());
            cursor = node.parent;
        }
        chain
            .into_iter()
            .rev()
            .fold(Matrix4::identity(), |acc, local| acc * local)
    }

    /// Refresh the cached world matrix of `id` and its subtree.
    pub fn update_world_matrix(&mut self, id: NodeId) {
        let base = match self.parent(id) {
            Some(parent) => self.world_matrix(parent),
            None => Matrix4::identity(),
        };
        let mut stack = vec![(id, base)];
        while let Some((current, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current) else {
                continue;
            };
            node.world = parent_world * node.local_matrix();
            let world = node.world;
            stack.extend(node.children.iter().map(|c| (*c, world)));
        }
    }

    /// Ask renderers to redraw.
    pub fn request_render(&mut self) {
        self.render_requests += 1;
    }

    pub fn render_requests(&self) -> u64 {
        self.render_requests
    }

    /// Run the artifact's `visualize` then `free` hooks. Failures are logged
    /// and swallowed.
    pub fn run_artifact_hooks(&mut self, id: NodeId) {
        let Some(mut hooks) = self.nodes.get_mut(id).and_then(|n| n.hooks.take()) else {
            return;
        };
        let results: [Result<(), HookError>; 2] = [hooks.visualize(), hooks.free()];
        for result in results {
            if let Err(e) = result {
                warn!(node = %self.nodes[id].name, error = %e, "artifact hook failed");
            }
        }
        self.nodes[id].hooks = Some(hooks);
    }

    /// Make every node of the subtree at `id` clickable.
    pub fn enable_click(&mut self, id: NodeId) {
        for node in self.descendants(id) {
            self.nodes[node].click_enabled = true;
        }
    }

    /// Dispatch a click. A solid whose parent is a component offers the click
    /// to the component first; the solid handles it only if the parent
    /// declines. Returns the node whose selection toggled.
    pub fn click(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id)?;
        if !node.click_enabled {
            return None;
        }
        if node.kind == NodeKind::Solid {
            if let Some(parent) = node.parent {
                if self.offer_toggle(parent) {
                    return Some(parent);
                }
            }
        }
        let node = &mut self.nodes[id];
        node.selected = !node.selected;
        debug!(node = %node.name, selected = node.selected, "click");
        Some(id)
    }

    fn offer_toggle(&mut self, parent: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(parent) else {
            return false;
        };
        if node.kind != NodeKind::Component || !node.click_enabled {
            return false;
        }
        let claimed = node.hooks.as_mut().is_some_and(|h| h.toggle_click());
        if claimed {
            node.selected = !node.selected;
        }
        claimed
    }

    /// Attached nodes currently selected.
    pub fn selection(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| self.nodes[*id].selected)
            .collect()
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
