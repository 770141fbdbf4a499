//! Custom askama filters.

/// Render integer cents as a dollar amount, e.g. `3250` -> `$32.50`.
pub fn money(cents: &i64) -> askama::Result<String> {
    let sign = if *cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    Ok(format!("{sign}${}.{:02}", cents / 100, cents % 100))
}
