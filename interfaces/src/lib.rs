pub mod baseline;
pub mod defs;
pub mod empty;

pub use baseline::{BaselineMetadataService, Catalog, CallLog, SeriesEntry};
pub use defs::*;
pub use empty::EmptyMetadataService;
