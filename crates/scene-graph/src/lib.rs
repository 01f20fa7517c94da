//! Retained-mode scene graph shared by the replay engine and the assembly solver.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Detaching a node from the tree
//! (`remove`, `clear`) keeps it alive so a clean feature can re-add its previous
//! artifacts; only [`Scene::dispose`] drops a subtree.

pub mod node;
pub mod scene;

pub use node::*;
pub use scene::*;
