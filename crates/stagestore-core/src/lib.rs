//! StageStore Core: filesystem-backed staged record storage
//!
//! Records are opaque byte blobs grouped under caller-chosen names and kept in
//! one of two partitions under a storage root:
//!
//! ```text
//! <root>/current/<group>/<record>   written, not yet processed
//! <root>/archive/<group>/<record>   promoted after processing
//! ```
//!
//! # Lifecycle
//!
//! - **Save**: a group is created on first write; every save is flushed
//!   before it returns
//! - **Read**: `read_all` walks `current/` on a background thread and streams
//!   lazy record descriptors plus listing errors over two rendezvous channels
//! - **Archive**: a group is renamed into `archive/`, or merged file by file
//!   when an earlier cycle already archived the same group
//!
//! # Example
//!
//! ```rust,no_run
//! use stagestore_core::StageStore;
//!
//! let store = StageStore::open("/var/lib/stage")?;
//! store.save("0xAA", "/f1", &[1, 2, 3])?;
//!
//! let outcome = store.read_all()?.drain();
//! for record in &outcome.records {
//!     let bytes = record.content()?;
//!     println!("{}/{}: {} bytes", record.group(), record.name(), bytes.len());
//! }
//!
//! store.archive("0xAA")?;
//! # Ok::<(), stagestore_core::StageError>(())
//! ```
//!
//! Nothing here coordinates separate processes sharing a root.

pub mod access;
pub mod archive;
pub mod config;
pub mod error;
pub mod layout;
pub mod locks;
pub mod platform_durability;
pub mod scan;
pub mod stats;
pub mod store;
pub mod writer;

// Re-export key types for convenience
pub use archive::{ArchiveMode, ArchiveReport};
pub use config::{Config, SyncMode};
pub use error::{StageError, StageResult};
pub use layout::{GroupName, Partition, RecordName, StageLayout};
pub use scan::{CancelToken, RecordDescriptor, Scan, ScanGuard, ScanOutcome};
pub use stats::{MetricsSink, StatsSnapshot};
pub use store::{Persistence, StageStore};
