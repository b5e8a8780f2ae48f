//! Configuration constants for the loader
//!
//! This module centralizes the defaults and tunable parameters used throughout
//! the application. The CLI exposes most of them as flags.

use std::time::Duration;

// ============================================================================
// Resource Discovery
// ============================================================================

pub const DEFAULT_SPEC_DIR: &str = "./spec";

pub const DEFAULT_DATA_DIR: &str = "./data";

/// Extension (without the dot) identifying specification files
pub const DEFAULT_SPEC_EXTENSION: &str = "csv";

/// Extension (without the dot) identifying fixed-width data files
pub const DEFAULT_DATA_EXTENSION: &str = "txt";

// ============================================================================
// Storage Configuration
// ============================================================================

pub const DEFAULT_CONNECTION: &str = "text_to_sql.sqlite3";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The loader is a single writer; one connection keeps in-memory SQLite
/// databases alive for the whole run.
pub const MAX_CONNECTIONS: u32 = 1;

// ============================================================================
// Loading
// ============================================================================

/// Rows per transaction. One commit per row unless the operator asks for more.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Number of leading characters of a rejected line kept in log messages
pub const ERROR_PREVIEW_CHARS: usize = 20;
