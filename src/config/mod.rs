//! Configuration module for opsvault
//!
//! This module provides configuration management including:
//! - Base directory resolution
//! - Settings persistence
//! - The backup schedule record consumed by an external scheduler

pub mod paths;
pub mod schedule;
pub mod settings;

pub use paths::OpsPaths;
pub use schedule::BackupSchedule;
pub use settings::Settings;
