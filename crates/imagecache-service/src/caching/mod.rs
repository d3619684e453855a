//! The on-disk image cache.
//!
//! Cache entries are plain files below a source's cache directory. Their existence and their
//! timestamps are the only metadata:
//!
//! - The modification time of a file system copy mirrors the modification time of its origin.
//!   A copy whose mtime differs from its origin is stale and removed.
//! - The access time is refreshed whenever an entry is served.
//!
//! Entries are created in the background by the [`PopulationQueue`], and written to a temporary
//! file which is then moved into place. Readers thus never observe partially written files.

mod fs;
mod population;

pub use fs::*;
pub use population::*;
