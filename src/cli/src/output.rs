//! Formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Placeholder for an absent repository or tag.
pub const NONE: &str = "<none>";

/// Create a borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count with decimal units, as registries report sizes.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = 1000 * KB;
    const GB: u64 = 1000 * MB;

    if bytes >= GB {
        format!("{:.3} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.3} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.3} kB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a timestamp relative to now.
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let duration = chrono::Utc::now().signed_duration_since(*dt);
    let secs = duration.num_seconds();
    if secs < 1 {
        return "Less than a second ago".to_string();
    }

    let (count, unit) = if secs < 60 {
        (secs, "second")
    } else if duration.num_minutes() < 60 {
        (duration.num_minutes(), "minute")
    } else if duration.num_hours() < 24 {
        (duration.num_hours(), "hour")
    } else if duration.num_days() < 30 {
        (duration.num_days(), "day")
    } else if duration.num_days() < 365 {
        (duration.num_days() / 30, "month")
    } else {
        (duration.num_days() / 365, "year")
    };

    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Image ID as shown in listings: 12 characters unless `full`.
pub fn display_id(id: &str, full: bool) -> &str {
    if full {
        id
    } else {
        &id[..id.len().min(12)]
    }
}

/// Digest as shown in listings: `sha256:` plus 12 hex characters unless `full`.
pub fn display_digest(digest: &str, full: bool) -> String {
    match digest.strip_prefix("sha256:") {
        Some(hex) if !full => format!("sha256:{}", &hex[..hex.len().min(12)]),
        _ => digest.to_string(),
    }
}

/// Split `name:tag` into repository and tag; the tag follows the last ':'
/// after the last '/'.
pub fn split_repo_tag(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |p| p + 1);
    match name[segment_start..].rfind(':') {
        Some(colon) => {
            let split = segment_start + colon;
            (&name[..split], &name[split + 1..])
        }
        None => (name, NONE),
    }
}

/// Summary printed after an all-tags pull.
pub fn pulled_summary<'a>(references: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from("Pulled Images:\n");
    for reference in references {
        out.push_str(reference);
        out.push('\n');
    }
    out
}
