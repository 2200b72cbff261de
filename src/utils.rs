use crate::consts::{ASSISTANT_NAME_MAX_CHARS, DEFAULT_ASSISTANT_NAME};

use serde_json::Value;
use time::OffsetDateTime;

/// Current wall-clock time as fractional unix seconds, the unit dashboards expect.
pub fn unix_now() -> f64 {
    to_unix_seconds(OffsetDateTime::now_utc())
}

pub fn to_unix_seconds(t: OffsetDateTime) -> f64 {
    t.unix_timestamp_nanos() as f64 / 1e9
}

pub fn from_unix_seconds(secs: f64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9) as i128).ok()
}

/// Short label for an assistant: its `name`, else its `firstMessage`, truncated for the UI.
pub fn assistant_display_name(cfg: &Value) -> String {
    let name = cfg
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| cfg.get("firstMessage").and_then(Value::as_str))
        .unwrap_or(DEFAULT_ASSISTANT_NAME);
    if name.chars().count() > ASSISTANT_NAME_MAX_CHARS {
        let head: String = name.chars().take(ASSISTANT_NAME_MAX_CHARS - 3).collect();
        format!("{head}…")
    } else {
        name.to_string()
    }
}
