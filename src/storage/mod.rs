//! Storage helpers for opsvault
//!
//! Provides JSON and raw file writes that are atomic with respect to readers
//! and automatic directory creation.

pub mod file_io;

pub use file_io::{read_json, read_json_required, write_bytes_atomic, write_json_atomic};
