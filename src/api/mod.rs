//! Interfaces implemented by users of the engine.

pub mod page_store;
