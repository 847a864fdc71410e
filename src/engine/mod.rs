pub(crate) mod dump;
pub(crate) mod stat;
pub(crate) mod wal_engine;
