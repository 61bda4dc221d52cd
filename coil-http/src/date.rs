//! Time formatting helpers for access logs and Date headers.
//!
//! Month and weekday names are fixed tables so the output never
//! depends on the locale.

use std::mem;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn gmtime_now() -> libc::tm {
    let mut now: libc::time_t = 0;
    let mut tm: libc::tm = unsafe { mem::zeroed() };
    unsafe {
        libc::time(&mut now);
        libc::gmtime_r(&now, &mut tm);
    }
    tm
}

/// Common Log Format timestamp, e.g. `24/Aug/2026:12:00:00 -0000`.
pub fn access_log_stamp() -> String {
    let tm = gmtime_now();
    format!(
        "{:02}/{}/{:04}:{:02}:{:02}:{:02} -0000",
        tm.tm_mday,
        MONTHS[tm.tm_mon.clamp(0, 11) as usize],
        tm.tm_year + 1900,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
    )
}

/// RFC 1123 timestamp for the `Date` header, e.g.
/// `Mon, 24 Aug 2026 12:00:00 GMT`.
pub fn rfc1123_now() -> String {
    let tm = gmtime_now();
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        WEEKDAYS[tm.tm_wday.clamp(0, 6) as usize],
        tm.tm_mday,
        MONTHS[tm.tm_mon.clamp(0, 11) as usize],
        tm.tm_year + 1900,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_log_stamp_shape() {
        let stamp = access_log_stamp();
        assert!(stamp.ends_with(" -0000"), "{stamp}");
        assert_eq!(stamp.len(), "24/Aug/2026:12:00:00 -0000".len(), "{stamp}");
    }

    #[test]
    fn rfc1123_shape() {
        let stamp = rfc1123_now();
        assert!(stamp.ends_with(" GMT"), "{stamp}");
        assert_eq!(stamp.len(), "Mon, 24 Aug 2026 12:00:00 GMT".len(), "{stamp}");
    }
}
