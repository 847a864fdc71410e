//! WAL archive for a local storage engine:
//! a segmented Write-Ahead Log whose sealed segments are archived, and
//! deleted once no retained checkpoint needs them.
//!
//! ## Features
//!
//! - Fixed-size WAL segments, sealed and moved into an archive directory in
//!   order
//! - Checkpoints driven by a timer, by the amount of WAL written since the
//!   last one, or on demand; concurrent requests collapse
//! - Checkpoint history persisted as marker files, restored on restart
//! - Archive retention by byte budget, by checkpoint count, or unlimited
//! - Deletion never removes a segment a retained checkpoint needs
//!
//! ## Example
//!
//! ```rust
//! # use std::io;
//! # use std::sync::Arc;
//! use wal_archive::Config;
//! use wal_archive::NoPages;
//! use wal_archive::WalEngine;
//!
//! let temp_dir = tempfile::tempdir().unwrap();
//! let config = Arc::new(Config {
//!     dir: temp_dir.path().to_str().unwrap().to_string(),
//!     wal_segment_size: Some(64 * 1024),
//!     max_wal_archive_size: Some(1024 * 1024),
//!     ..Default::default()
//! });
//!
//! let engine = WalEngine::open(config, Arc::new(NoPages)).unwrap();
//!
//! let p = engine.put("key", "value").unwrap();
//! engine.flush().unwrap();
//!
//! let cp = engine.force_checkpoint("example").unwrap();
//! assert!(cp.floor > p);
//!
//! assert_eq!(engine.checkpoint_history().len(), 1);
//! ```

mod checkpoint;
mod cleaner;
mod config;
mod engine;
mod segment;
mod wal;

pub(crate) mod file_lock;
pub(crate) mod num;
#[cfg(test)]
pub(crate) mod testing;

pub use codeq;

pub mod api;
pub mod dump_writer;
pub mod errors;

pub use api::page_store::NoPages;
pub use api::page_store::PageStore;
pub use checkpoint::checkpointer::CheckpointResult;
pub use checkpoint::checkpointer::CheckpointTrigger;
pub use checkpoint::checkpointer::Checkpointer;
pub use checkpoint::entry::CheckpointEntry;
pub use checkpoint::history::CheckpointHistory;
pub use checkpoint::markers::MarkerKind;
pub use checkpoint::progress::CheckpointProgress;
pub use checkpoint::progress::CheckpointState;
pub use checkpoint::reason::CheckpointReason;
pub use cleaner::report::CleanupReport;
pub use cleaner::ArchiveCleaner;
pub use config::Config;
pub use config::Retention;
pub use config::WalMode;
pub use config::MAX_WAL_SEGMENT_SIZE;
pub use config::MIN_WAL_SEGMENT_SIZE;
pub use config::UNLIMITED_WAL_ARCHIVE;
pub use engine::dump::Dump;
pub use engine::stat::SegmentStat;
pub use engine::stat::Stat;
pub use engine::wal_engine::WalEngine;
pub use segment::segment_index::SegmentIndex;
pub use segment::store::DeleteReport;
pub use segment::store::SegmentStore;
pub use segment::SegmentDescriptor;
pub use segment::SegmentStatus;
pub use wal::pointer::WalPointer;
pub use wal::reader::WalReader;
pub use wal::wal_record::WalRecord;

#[cfg(test)]
mod tests;
