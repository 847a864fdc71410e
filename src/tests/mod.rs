pub(crate) mod context;

mod test_checkpoint;
mod test_wal_engine;
