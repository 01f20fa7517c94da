//! Assembly constraint history and its iterative solver.
//!
//! Constraints are solved by damped local correction: every sweep asks each
//! constraint to nudge its components toward satisfaction, and the pass stops
//! after the iteration budget or the first sweep in which nothing moved.

pub mod builtin;
pub mod constraint;
pub mod context;
pub mod history;
pub mod options;
pub mod types;

pub use builtin::builtin_registry;
pub use constraint::*;
pub use context::*;
pub use history::*;
pub use options::*;
pub use types::*;
