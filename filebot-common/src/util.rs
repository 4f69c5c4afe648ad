//! Utility functions for filebot.

use std::sync::OnceLock;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Uses character boundaries, so multi-byte UTF-8 input is safe.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Strip characters that are illegal in file names on common platforms.
///
/// Removes `<>:"/\|?*` and control characters, then trims whitespace.
pub fn sanitize_filename(name: &str) -> String {
    static ILLEGAL: OnceLock<regex::Regex> = OnceLock::new();
    let re = ILLEGAL.get_or_init(|| {
        regex::Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static regex is valid")
    });

    re.replace_all(name, "").trim().to_string()
}

/// Format bytes as human-readable size.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format seconds as `HH:MM:SS`.
pub fn format_hms(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("😀😀😀😀", 2), "😀😀...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("  my:report?  "), "myreport");
        assert_eq!(sanitize_filename(r#"a<b>c"d/e\f|g*h"#), "abcdefgh");
        assert_eq!(sanitize_filename("tab\there"), "tabhere");
        assert_eq!(sanitize_filename("résumé 2024"), "résumé 2024");
        assert_eq!(sanitize_filename("???"), "");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(61), "00:01:01");
        assert_eq!(format_hms(3725), "01:02:05");
    }
}
