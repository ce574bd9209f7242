pub mod registry;
pub mod types;

pub use registry::{scan_roots, ScanRoot, UnitRegistry};
pub use types::{PromptUnit, UnitKind};
