//! Checkpoints: when they run, how they run, and the history of completed
//! ones.
//!
//! A checkpoint writes a begin record to the WAL, asks the page store to
//! flush dirty pages, and records the resulting floor: the lowest WAL
//! position recovery from this checkpoint needs. The history of floors
//! decides which archived segments may be deleted.

pub(crate) mod checkpointer;
pub(crate) mod entry;
pub(crate) mod history;
pub(crate) mod markers;
pub(crate) mod progress;
pub(crate) mod reason;
pub(crate) mod runner;
