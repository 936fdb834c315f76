//! duosync-core: Snapshot model and staging engine
//!
//! Provides the recursive snapshot entry model, versioned content digests,
//! content-addressed staging of received files, and directory scanning.

pub mod config;
pub mod entry;
pub mod hash;
pub mod housekeeping;
pub mod paths;
pub mod scan;
pub mod staging;

pub use config::DuosyncConfig;
pub use entry::{Entry, InvalidEntry, RawEntry, Violation};
pub use hash::{Hasher, HashingReader, Version};
pub use scan::Scanner;
pub use staging::{Provider, Side, Sink, Sinker, StagingCoordinator, StagingError, StagingSink};
