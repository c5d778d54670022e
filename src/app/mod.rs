//! App records, history and retention

pub mod record;
pub mod touch;

pub use record::{App, AppChange, AppMeta, ChangeMeta, known_owners};
pub use touch::Touch;
