//! Checksum and integrity verification for archives
//!
//! - `checksum`: SHA-256 digests, detached `.sha256` files, a hashing writer
//! - `verifier`: listing pass, content check, and the combined report used by
//!   the verify command and the recovery pre-check

pub mod checksum;
pub mod verifier;

pub use checksum::{compute, verify, verify_against_file, write_checksum_file, HashingWriter};
pub use verifier::{
    check_archive, list_archive, verify_archive_integrity, verify_contents, ArchiveListing,
    CheckOutcome, IntegrityReport, IntegritySummary,
};
