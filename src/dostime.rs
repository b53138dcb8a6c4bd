//! MS-DOS timestamp handling.
//!
//! ZIP entry headers carry modification times in the classic DOS format:
//! a 16-bit date word and a 16-bit time word, stored together as one
//! little-endian 32-bit value (`date << 16 | time`). The encoding has
//! 2-second granularity and can only represent dates between
//! 1980-01-01 and 2107-12-31; values outside that window clamp to it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unix seconds for 1980-01-01 00:00:00 UTC, the earliest DOS timestamp.
const DOS_EPOCH_UNIX: i64 = 315_532_800;

/// Unix seconds for 2107-12-31 23:59:58 UTC, the latest DOS timestamp.
const DOS_MAX_UNIX: i64 = 4_354_819_198;

/// Returns the current system time as a packed DOS timestamp.
pub fn now() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(DOS_EPOCH_UNIX);
    from_unix(secs)
}

/// Converts Unix seconds to a packed DOS timestamp, clamping to the
/// representable 1980..2107 range.
pub fn from_unix(secs: i64) -> u32 {
    let secs = secs.clamp(DOS_EPOCH_UNIX, DOS_MAX_UNIX);
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);

    let (year, month, day) = civil_from_days(days);
    let hour = (tod / 3600) as u32;
    let minute = (tod % 3600 / 60) as u32;
    let second = (tod % 60) as u32;

    let date = (((year - 1980) as u32) << 9) | ((month as u32) << 5) | day as u32;
    let time = (hour << 11) | (minute << 5) | (second / 2);
    (date << 16) | time
}

/// Converts a packed DOS timestamp back to Unix seconds.
///
/// Malformed field values (month 0, day 0) are clamped to 1 rather than
/// rejected, matching how most tooling treats sloppy archivers.
pub fn to_unix(dos: u32) -> i64 {
    let (year, month, day, hour, minute, second) = components(dos);
    let days = days_from_civil(year as i64, month.max(1) as u32, day.max(1) as u32);
    days * 86_400 + hour as i64 * 3600 + minute as i64 * 60 + second as i64
}

/// Splits a packed DOS timestamp into calendar components.
///
/// Returns `(year, month, day, hour, minute, second)`. Seconds are always
/// even because of the 2-second granularity.
pub fn components(dos: u32) -> (u16, u8, u8, u8, u8, u8) {
    let date = (dos >> 16) as u16;
    let time = (dos & 0xFFFF) as u16;
    (
        1980 + (date >> 9),
        ((date >> 5) & 0x0F) as u8,
        (date & 0x1F) as u8,
        (time >> 11) as u8,
        ((time >> 5) & 0x3F) as u8,
        ((time & 0x1F) as u8) * 2,
    )
}

// Calendar conversions below use the days-from-civil algorithm built on
// 400-year eras, operating on days since 1970-01-01.

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = (y - era * 400) as i64;
    let mp = ((m as i64) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + (d as i64) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (u16, u8, u8) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as u16, m as u8, d as u8)
}
