use std::time::Duration;

use anyhow::{bail, Context};
use url::Url;

/// Parses a "human-readable" duration string into a [Duration].
///
/// Accepted units are `ms`, `s`, `min` and `h`, for example `500ms`, `5s`, `2min` or `1h`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split_at);
    if value.is_empty() {
        bail!("Invalid duration `{s}`: missing numeric value");
    }
    let value: u64 = value.parse().with_context(|| format!("Invalid duration value in `{s}`"))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "min" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        "" => bail!("Invalid duration `{s}`: missing unit (expected one of ms, s, min, h)"),
        other => bail!("Invalid duration `{s}`: unknown unit `{other}`"),
    }
}

/// Parses a url, making sure it has a scheme and a host.
pub fn parse_url(s: &str) -> anyhow::Result<Url> {
    let url = Url::parse(s).with_context(|| format!("Invalid url `{s}`"))?;
    if url.host_str().is_none() {
        bail!("Invalid url `{s}`: missing host");
    }
    Ok(url)
}
