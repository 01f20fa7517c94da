//! Project documents on disk: a part's feature history, expressions and
//! assembly constraints as a single JSON file.

pub mod errors;
pub mod load;
pub mod metadata;
pub mod save;

pub use errors::{LoadError, SaveError};
pub use load::{load_project, parse_project};
pub use metadata::{modified_at, stamp_saved};
pub use save::{save_project, FORMAT_VERSION};
