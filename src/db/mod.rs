//! Database layer - storage handle, connection targets, and schema synchronization

pub mod pool;
pub mod schema;
pub mod target;

pub use pool::{Backend, Pool};
pub use schema::{SqlValue, ensure_table};
pub use target::ConnectionTarget;
