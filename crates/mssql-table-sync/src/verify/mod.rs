//! Divergence detection: column normalization and table fingerprints.

pub mod checksum;
pub mod normalize;

pub use checksum::{ChecksumKind, ChecksumQuery, Fingerprint};
pub use normalize::{normalize_expr, rule_for, NormalizeOptions, Normalization};
