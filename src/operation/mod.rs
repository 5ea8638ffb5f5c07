//! Table-level operations built on snapshots and manifests.
//!
//! - [`FileStoreCommit`]: publish writer increments as new snapshots
//! - [`FileStoreScan`]: list the live files of a snapshot
//! - [`FileStoreRead`]: merged records of one bucket
//! - [`FileStoreExpire`]: drop old snapshots and the files only they use

pub mod commit;
pub mod committable;
pub mod expire;
pub mod read;
pub mod scan;

pub use commit::FileStoreCommit;
pub use committable::{ManifestCommittable, ManifestCommittableSerializer};
pub use expire::FileStoreExpire;
pub use read::FileStoreRead;
pub use scan::{FileStoreScan, Plan};
