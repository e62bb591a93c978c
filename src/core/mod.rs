//! Domain types, error taxonomy, and the report store.

pub mod error;
pub mod report;
pub mod store;
pub mod time;
