use std::time::Duration;

use crate::errors::ConfigError;
use crate::errors::InvalidSegmentFileName;
use crate::num;
use crate::SegmentIndex;

/// Special value of [`Config::max_wal_archive_size`] that disables WAL
/// archive deletion: archived segments accumulate and only the in-memory
/// checkpoint history is pruned.
pub const UNLIMITED_WAL_ARCHIVE: u64 = u64::MAX;

/// Smallest accepted segment size in bytes.
pub const MIN_WAL_SEGMENT_SIZE: u64 = 4 * 1024;

/// Largest accepted segment size in bytes. A record filling a segment of
/// this size still has a payload within the record format's limit.
pub const MAX_WAL_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Controls when appended WAL data is written to the file and fsync-ed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalMode {
    /// Write and fsync every appended record.
    Fsync,

    /// Write every appended record to the OS; fsync when a segment is sealed
    /// or a checkpoint is marked.
    #[default]
    LogOnly,

    /// Buffer appended records; write and fsync when a segment is sealed, a
    /// checkpoint is marked or [`WalEngine::flush`](crate::WalEngine::flush)
    /// is called.
    Background,

    /// Buffer appended records; write them without ever calling fsync.
    None,
}

impl WalMode {
    /// Whether a record is written to the file as soon as it is appended.
    pub(crate) fn write_through(&self) -> bool {
        matches!(self, WalMode::Fsync | WalMode::LogOnly)
    }

    /// Whether writes are followed by fsync at all.
    pub(crate) fn fsync_enabled(&self) -> bool {
        !matches!(self, WalMode::None)
    }
}

/// How archived WAL segments are retained, derived from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retention {
    /// Keep the archive under this many bytes.
    ArchiveSize(u64),

    /// Never delete archived segments.
    Unlimited,

    /// Legacy mode: keep segments needed by the last N checkpoints.
    HistoryDepth(usize),
}

impl Retention {
    /// Whether the archive cleaner deletes segments under this policy.
    pub fn deletion_enabled(&self) -> bool {
        !matches!(self, Retention::Unlimited)
    }
}

/// Configuration for the WAL archive.
///
/// Optional parameters are `Option<T>` in this struct, and default values
/// are evaluated when a getter method is called.
///
/// A `Config` is validated once by
/// [`WalEngine::open`](crate::WalEngine::open) and never changes afterwards.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Base directory for the WAL, the archive and checkpoint markers
    pub dir: String,

    /// Fsync strategy
    pub wal_mode: Option<WalMode>,

    /// Maximum size of a segment file in bytes
    pub wal_segment_size: Option<u64>,

    /// Interval between timer triggered checkpoints
    pub checkpoint_frequency: Option<Duration>,

    /// Byte budget of the WAL archive, or [`UNLIMITED_WAL_ARCHIVE`]
    pub max_wal_archive_size: Option<u64>,

    /// Legacy count based retention: number of checkpoints whose WAL is
    /// kept. Can not be used together with `max_wal_archive_size`.
    pub wal_history_size: Option<usize>,

    /// Fraction of `max_wal_archive_size` that, once written since the last
    /// checkpoint, triggers a new checkpoint
    pub checkpoint_trigger_archive_size_percentage: Option<f64>,

    /// Maximum number of checkpoint history entries kept in memory
    pub max_checkpoint_memory_history_size: Option<usize>,

    /// Number of deleted segment files kept for recycling
    pub wal_segment_reuse_count: Option<usize>,

    /// Size of the read buffer in bytes
    pub read_buffer_size: Option<usize>,

    /// Whether to truncate the last half written record of a segment found
    /// when re-opening.
    ///
    /// If truncate, the segment is considered successfully opened.
    /// Otherwise, an io::Error will be returned.
    pub truncate_incomplete_record: Option<bool>,
}

impl Config {
    /// Creates a new Config with the specified directory and default values
    /// for other fields
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Returns the WAL mode (defaults to [`WalMode::LogOnly`])
    pub fn wal_mode(&self) -> WalMode {
        self.wal_mode.unwrap_or_default()
    }

    /// Returns the segment size in bytes (defaults to 64MB)
    pub fn wal_segment_size(&self) -> u64 {
        self.wal_segment_size.unwrap_or(64 * 1024 * 1024)
    }

    /// Returns the checkpoint timer interval (defaults to 3 minutes)
    pub fn checkpoint_frequency(&self) -> Duration {
        self.checkpoint_frequency
            .unwrap_or_else(|| Duration::from_secs(180))
    }

    /// Returns the archive byte budget (defaults to 1GB)
    pub fn max_wal_archive_size(&self) -> u64 {
        self.max_wal_archive_size.unwrap_or(1024 * 1024 * 1024)
    }

    /// Returns the size-trigger fraction (defaults to 0.25)
    pub fn checkpoint_trigger_archive_size_percentage(&self) -> f64 {
        self.checkpoint_trigger_archive_size_percentage.unwrap_or(0.25)
    }

    /// Returns the in-memory checkpoint history cap.
    ///
    /// It is the smaller one of `max_checkpoint_memory_history_size` and the
    /// legacy `wal_history_size`; `None` means unbounded.
    pub fn checkpoint_history_cap(&self) -> Option<usize> {
        match (self.max_checkpoint_memory_history_size, self.wal_history_size)
        {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Returns the number of recycled segment files to keep (defaults to 0)
    pub fn wal_segment_reuse_count(&self) -> usize {
        self.wal_segment_reuse_count.unwrap_or(0)
    }

    /// Returns the size of read buffer in bytes (defaults to 1MB)
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.unwrap_or(1024 * 1024)
    }

    /// Returns whether to truncate incomplete records (defaults to true)
    pub fn truncate_incomplete_record(&self) -> bool {
        self.truncate_incomplete_record.unwrap_or(true)
    }

    /// Returns the number of bytes written since the last checkpoint that
    /// triggers a new checkpoint, or `None` if the trigger is disabled.
    pub fn checkpoint_trigger_bytes(&self) -> Option<u64> {
        match self.retention().ok()? {
            Retention::ArchiveSize(max) => {
                let pct = self.checkpoint_trigger_archive_size_percentage();
                Some((max as f64 * pct) as u64)
            }
            Retention::Unlimited | Retention::HistoryDepth(_) => None,
        }
    }

    /// Derive the retention policy from the configured options.
    pub fn retention(&self) -> Result<Retention, ConfigError> {
        match (self.wal_history_size, self.max_wal_archive_size) {
            (Some(_), Some(_)) => Err(ConfigError::BothRetentionOptions),
            (Some(depth), None) => Ok(Retention::HistoryDepth(depth)),
            (None, _) => {
                let max = self.max_wal_archive_size();
                if max == UNLIMITED_WAL_ARCHIVE {
                    Ok(Retention::Unlimited)
                } else {
                    Ok(Retention::ArchiveSize(max))
                }
            }
        }
    }

    /// Check every option; called before anything is written to `dir`.
    pub fn validate(&self) -> Result<Retention, ConfigError> {
        let retention = self.retention()?;

        if self.dir.is_empty() {
            return Err(ConfigError::invalid("dir", "must not be empty"));
        }

        if self.wal_segment_size() < MIN_WAL_SEGMENT_SIZE {
            return Err(ConfigError::invalid(
                "wal_segment_size",
                format!(
                    "{} is less than the minimum {}",
                    self.wal_segment_size(),
                    MIN_WAL_SEGMENT_SIZE
                ),
            ));
        }

        if self.wal_segment_size() > MAX_WAL_SEGMENT_SIZE {
            return Err(ConfigError::invalid(
                "wal_segment_size",
                format!(
                    "{} is greater than the maximum {}",
                    self.wal_segment_size(),
                    MAX_WAL_SEGMENT_SIZE
                ),
            ));
        }

        if let Retention::ArchiveSize(0) = retention {
            return Err(ConfigError::invalid(
                "max_wal_archive_size",
                "must be positive",
            ));
        }

        if let Retention::HistoryDepth(0) = retention {
            return Err(ConfigError::invalid(
                "wal_history_size",
                "must be positive",
            ));
        }

        let pct = self.checkpoint_trigger_archive_size_percentage();
        if !pct.is_finite() || pct <= 0.0 {
            return Err(ConfigError::invalid(
                "checkpoint_trigger_archive_size_percentage",
                format!("{} is not a positive number", pct),
            ));
        }

        if self.checkpoint_frequency().is_zero() {
            return Err(ConfigError::invalid(
                "checkpoint_frequency",
                "must be positive",
            ));
        }

        if self.max_checkpoint_memory_history_size == Some(0) {
            return Err(ConfigError::invalid(
                "max_checkpoint_memory_history_size",
                "must be positive",
            ));
        }

        Ok(retention)
    }

    /// Directory holding the active segment and recycled segment files
    pub fn work_dir(&self) -> String {
        format!("{}/wal", self.dir)
    }

    /// Directory holding archived segments
    pub fn archive_dir(&self) -> String {
        format!("{}/archive", self.dir)
    }

    /// Directory holding checkpoint marker files
    pub fn checkpoint_dir(&self) -> String {
        format!("{}/cp", self.dir)
    }

    /// Returns the path of an active segment in the work directory
    pub fn work_segment_path(&self, index: SegmentIndex) -> String {
        format!("{}/{}", self.work_dir(), Self::segment_file_name(index))
    }

    /// Returns the path of an archived segment
    pub fn archive_segment_path(&self, index: SegmentIndex) -> String {
        format!("{}/{}", self.archive_dir(), Self::segment_file_name(index))
    }

    /// Generates the file name for a given segment index
    ///
    /// The file name format is "{zero_padded_index}.wal", e.g.
    /// `0000000000000001.wal`
    pub(crate) fn segment_file_name(index: SegmentIndex) -> String {
        format!("{}.wal", num::format_segment_index(*index))
    }

    /// Parses a segment file name and returns the segment index
    ///
    /// # Arguments
    /// * `file_name` - Name of the segment file (format:
    ///   "{zero_padded_index}.wal")
    ///
    /// # Returns
    /// * `Ok(u64)` - The segment index if parsing succeeds
    /// * `Err(InvalidSegmentFileName)` - If the file name format is invalid
    pub(crate) fn parse_segment_file_name(
        file_name: &str,
    ) -> Result<u64, InvalidSegmentFileName> {
        let digits = file_name.strip_suffix(".wal").ok_or_else(|| {
            InvalidSegmentFileName::new(file_name, "has no '.wal' suffix")
        })?;

        if digits.len() < 16 {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "has less than 16 digits before '.wal'",
            ));
        }

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "contains non digit characters",
            ));
        }

        digits.parse::<u64>().map_err(|e| {
            InvalidSegmentFileName::new(
                file_name,
                format!("cannot parse as u64: {}", e),
            )
        })
    }
}
