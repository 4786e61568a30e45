//! Presentation-only unit conversion.
//!
//! Stored and compared values are always exact byte counts; these helpers are
//! for rendering only.

#![allow(clippy::cast_precision_loss)]

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Bytes as megabytes (1 MB = 1024 * 1024 bytes), rounded to two decimals.
#[must_use]
pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    let mb = bytes as f64 / MIB as f64;
    (mb * 100.0).round() / 100.0
}

/// Human-readable size with one decimal and a binary-prefixed unit.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
