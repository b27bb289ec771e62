//! Human-readable formatting for preview fields

/// Format a duration as `MM:SS` or `HH:MM:SS`; unknown or zero gives "Unknown"
pub fn format_duration(seconds: Option<u64>) -> String {
    let seconds = match seconds {
        Some(value) if value > 0 => value,
        _ => return "Unknown".to_string(),
    };

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format a byte count with binary units
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

pub fn format_view_count(views: Option<u64>) -> String {
    match views {
        None | Some(0) => "0 views".to_string(),
        Some(v) if v >= 1_000_000 => format!("{:.1}M views", v as f64 / 1_000_000.0),
        Some(v) if v >= 1_000 => format!("{:.1}K views", v as f64 / 1_000.0),
        Some(v) => format!("{} views", v),
    }
}
