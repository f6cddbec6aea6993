//! Integer money helpers. Amounts are minor units (pence); "round to two
//! decimal places" is half-up rounding at the pence boundary.

/// Formats pence as `12.34` for logs and receipts.
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// `price * numerator / denominator`, rounded half-up. Inputs are non-negative.
pub fn prorate(price: i64, numerator: i64, denominator: i64) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    let scaled = price as i128 * numerator as i128;
    let d = denominator as i128;
    ((2 * scaled + d) / (2 * d)) as i64
}

/// Hourly rate applied to a duration in minutes.
pub fn hourly(rate_per_hour: i64, minutes: u32) -> i64 {
    prorate(rate_per_hour, minutes as i64, 60)
}

/// Even per-lesson share of a package price.
///
/// Each share is rounded on its own, so `share * count` may differ from
/// `total` by up to `count / 2` pence; the difference is not reconciled.
pub fn even_share(total: i64, count: u32) -> i64 {
    prorate(total, 1, count as i64)
}
