//! Local filesystem access: resource discovery and line reading

pub mod discovery;
pub mod local_reader;

pub use discovery::{ResourcePattern, discover};
pub use local_reader::LocalLineReader;
