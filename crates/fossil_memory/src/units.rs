//! # Byte Units
//!
//! Binary-unit helpers shared by settings and usage reports.

/// Bytes in one KiB.
pub const KIB: u64 = 1024;
/// Bytes in one MiB.
pub const MIB: u64 = 1024 * KIB;
/// Bytes in one GiB.
pub const GIB: u64 = 1024 * MIB;

/// `amount` KiB in bytes.
#[inline]
#[must_use]
pub const fn kibibytes(amount: u64) -> u64 {
    amount * KIB
}

/// `amount` MiB in bytes.
#[inline]
#[must_use]
pub const fn mebibytes(amount: u64) -> u64 {
    amount * MIB
}

/// `amount` GiB in bytes.
#[inline]
#[must_use]
pub const fn gibibytes(amount: u64) -> u64 {
    amount * GIB
}

/// Formats a byte count with the largest fitting binary unit.
///
/// Three decimals are always printed: `512` is `"512.000B"`,
/// `1536` is `"1.500KiB"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    let (amount, unit) = if bytes >= GIB {
        (bytes as f64 / GIB as f64, "GiB")
    } else if bytes >= MIB {
        (bytes as f64 / MIB as f64, "MiB")
    } else if bytes >= KIB {
        (bytes as f64 / KIB as f64, "KiB")
    } else {
        (bytes as f64, "B")
    };
    format!("{amount:.3}{unit}")
}
