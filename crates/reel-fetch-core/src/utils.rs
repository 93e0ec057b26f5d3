//! Formatting and arithmetic helpers shared by the engine and frontends

/// Format bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format speed to human-readable string
pub fn format_speed(bytes_per_sec: u64) -> String {
    if bytes_per_sec == 0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Format an ETA in seconds; infinite means stalled
pub fn format_eta(eta_seconds: f64) -> String {
    if !eta_seconds.is_finite() || eta_seconds < 0.0 {
        return "--".to_string();
    }

    let seconds = eta_seconds.round() as u64;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// Calculate progress fraction (0.0 - 1.0)
pub fn calculate_progress(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64).min(1.0)
}

/// Seconds left at the current rate.
///
/// Zero once complete, infinite while stalled.
pub fn compute_eta(total_wanted: u64, done: u64, rate_bps: u64, progress_percent: f64) -> f64 {
    if progress_percent >= 100.0 {
        0.0
    } else if rate_bps > 0 {
        total_wanted.saturating_sub(done) as f64 / rate_bps as f64
    } else {
        f64::INFINITY
    }
}
