use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::sync::Arc;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;
use codeq::Encode;
use log::debug;
use log::info;
use log::warn;

use crate::CheckpointEntry;
use crate::Config;
use crate::WalPointer;

/// Kind of a checkpoint marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Written when a checkpoint starts; records its WAL mark.
    Start,

    /// Written when a checkpoint completes; records its floor.
    End,
}

impl MarkerKind {
    fn suffix(&self) -> &'static str {
        match self {
            MarkerKind::Start => "START",
            MarkerKind::End => "END",
        }
    }
}

/// Name of a checkpoint marker file: `{timestamp}-{id}-{START|END}.bin`.
pub(crate) fn marker_file_name(timestamp: u64, id: u64, kind: MarkerKind) -> String {
    format!("{}-{}-{}.bin", timestamp, id, kind.suffix())
}

/// Parse a marker file name into `(timestamp, id, kind)`.
pub(crate) fn parse_marker_file_name(file_name: &str) -> Option<(u64, u64, MarkerKind)> {
    let stem = file_name.strip_suffix(".bin")?;
    let mut parts = stem.split('-');

    let ts = parts.next()?.parse::<u64>().ok()?;
    let id = parts.next()?.parse::<u64>().ok()?;
    let kind = match parts.next()? {
        "START" => MarkerKind::Start,
        "END" => MarkerKind::End,
        _ => return None,
    };

    if parts.next().is_some() {
        return None;
    }

    Some((ts, id, kind))
}

const NODE_STARTED_SUFFIX: &str = "-node-started.bin";

/// Checkpoint markers found on disk.
#[derive(Debug, Default)]
pub(crate) struct LoadedMarkers {
    /// Completed checkpoints, by id.
    pub(crate) completed: Vec<CheckpointEntry>,

    /// START markers without an END marker: checkpoints interrupted by a
    /// crash.
    pub(crate) incomplete: Vec<String>,
}

/// Persists checkpoint markers in the checkpoint directory, so that the
/// history survives a restart.
///
/// A completed checkpoint has a START and an END marker. At most one
/// node-started marker exists, recording where the WAL stood when the
/// engine last opened.
#[derive(Debug)]
pub struct CheckpointMarkers {
    config: Arc<Config>,
}

impl CheckpointMarkers {
    pub(crate) fn open(config: Arc<Config>) -> Result<Self, io::Error> {
        let dir = config.checkpoint_dir();
        std::fs::create_dir_all(&dir)
            .context(|| format!("create checkpoint dir {}", dir))?;
        Ok(Self { config })
    }

    fn path(&self, file_name: &str) -> String {
        format!("{}/{}", self.config.checkpoint_dir(), file_name)
    }

    /// Load completed checkpoints, and remove markers of interrupted ones.
    pub(crate) fn recover(&self) -> Result<Vec<CheckpointEntry>, io::Error> {
        let loaded = self.load()?;

        for file_name in loaded.incomplete.iter() {
            warn!(
                "Remove marker of incomplete checkpoint: {}",
                file_name
            );
            self.remove_file(file_name)?;
        }

        info!(
            "Loaded {} completed checkpoints from markers",
            loaded.completed.len()
        );
        Ok(loaded.completed)
    }

    /// Read all markers without changing anything on disk.
    pub(crate) fn load(&self) -> Result<LoadedMarkers, io::Error> {
        let mut starts = vec![];
        let mut ends = std::collections::BTreeMap::new();

        for file_name in self.list_files()? {
            let Some((_ts, id, kind)) = parse_marker_file_name(&file_name) else {
                continue;
            };

            match kind {
                MarkerKind::Start => starts.push((id, file_name)),
                MarkerKind::End => {
                    let entry = self.read_entry(&file_name)?;
                    ends.insert(id, entry);
                }
            }
        }

        let incomplete = starts
            .into_iter()
            .filter(|(id, _)| !ends.contains_key(id))
            .map(|(_, f)| f)
            .collect();

        Ok(LoadedMarkers {
            completed: ends.into_values().collect(),
            incomplete,
        })
    }

    fn read_entry(&self, file_name: &str) -> Result<CheckpointEntry, io::Error> {
        let data = std::fs::read(self.path(file_name))
            .context(|| format!("read marker {}", file_name))?;
        CheckpointEntry::decode(&mut data.as_slice())
            .context(|| format!("decode marker {}", file_name))
    }

    /// File names in the checkpoint directory, sorted.
    pub(crate) fn list_files(&self) -> Result<Vec<String>, io::Error> {
        let dir = self.config.checkpoint_dir();
        let mut names = vec![];

        for entry in std::fs::read_dir(&dir).context(|| format!("list {}", dir))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".bin") {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Write the START marker of a checkpoint. `entry.floor` holds the
    /// checkpoint's WAL mark.
    pub(crate) fn write_start(&self, entry: &CheckpointEntry) -> Result<(), io::Error> {
        let name = marker_file_name(entry.timestamp, entry.id, MarkerKind::Start);
        self.write_file(&name, entry)
    }

    /// Write the END marker, which makes the checkpoint completed on disk.
    pub(crate) fn write_end(&self, entry: &CheckpointEntry) -> Result<(), io::Error> {
        let name = marker_file_name(entry.timestamp, entry.id, MarkerKind::End);
        self.write_file(&name, entry)
    }

    /// Replace the node-started marker.
    pub(crate) fn write_node_started(
        &self,
        timestamp: u64,
        pointer: WalPointer,
    ) -> Result<(), io::Error> {
        for file_name in self.list_files()? {
            if file_name.ends_with(NODE_STARTED_SUFFIX) {
                self.remove_file(&file_name)?;
            }
        }

        let name = format!("{}{}", timestamp, NODE_STARTED_SUFFIX);
        let entry = CheckpointEntry::new(0, timestamp, pointer, "node started");
        self.write_file(&name, &entry)
    }

    /// Remove both markers of each entry.
    pub(crate) fn remove(&self, entries: &[CheckpointEntry]) -> Result<(), io::Error> {
        for e in entries {
            self.remove_file(&marker_file_name(e.timestamp, e.id, MarkerKind::Start))?;
            self.remove_file(&marker_file_name(e.timestamp, e.id, MarkerKind::End))?;
        }
        Ok(())
    }

    pub(crate) fn remove_start(&self, timestamp: u64, id: u64) -> Result<(), io::Error> {
        self.remove_file(&marker_file_name(timestamp, id, MarkerKind::Start))
    }

    fn remove_file(&self, file_name: &str) -> Result<(), io::Error> {
        match std::fs::remove_file(self.path(file_name)) {
            Ok(_) => {
                debug!("Removed checkpoint marker {}", file_name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(|| format!("remove marker {}", file_name)),
        }
    }

    /// Write to a temp file, fsync, then rename into place, so a marker is
    /// either complete or absent.
    fn write_file(&self, file_name: &str, entry: &CheckpointEntry) -> Result<(), io::Error> {
        let path = self.path(file_name);
        let tmp = format!("{}.tmp", path);

        let mut buf = Vec::new();
        entry.encode(&mut buf)?;

        {
            let mut f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .context(|| format!("create {}", tmp))?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }

        std::fs::rename(&tmp, &path).context(|| format!("rename {} to {}", tmp, path))?;
        Ok(())
    }
}
