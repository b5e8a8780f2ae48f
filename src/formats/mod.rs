//! Spec file parsing and fixed-width row decoding

pub mod fixed_width;
pub mod spec;

pub use fixed_width::{decode, decode_record};
pub use spec::FormatSpec;
