pub mod registry;
pub mod schema;
pub mod transform;
pub mod value;

pub use registry::*;
pub use schema::*;
pub use transform::*;
pub use value::*;
