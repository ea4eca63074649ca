use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, spaces, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse a date from the House archive link text.
///
/// Examples: "Thursday, February 20, 2025", "Wednesday, April 16, 2025 - Part 2"
pub fn parse_house_date(text: &str) -> Option<DateTime<Utc>> {
    let mut date_string = text.trim().to_string();

    // Drop " - Part N" suffixes
    let part_re = Regex::new(r"(?i)\s*-\s*Part\s+\d+").ok()?;
    date_string = part_re.replace_all(&date_string, "").to_string();

    // Drop the day-of-week prefix before the first comma
    if let Some((_, rest)) = date_string.split_once(',') {
        date_string = rest.trim().to_string();
    }

    let date = NaiveDate::parse_from_str(&date_string, "%B %d, %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Parse a date from the Senate archive's YY-MM-DD convention.
///
/// Examples: "25-12-23", "Senate Session 25-12-23"
pub fn parse_senate_date(text: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"(\d{2})-(\d{2})-(\d{2})").ok()?;
    let caps = re.captures(text)?;

    // Two-digit years are assumed to be 20XX
    let year: i32 = 2000 + caps[1].parse::<i32>().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Check whether a payload's leading bytes look like an HTML document rather
/// than a media file. Archive servers answer missing videos with an error
/// page and a 200 status, so this is the only reliable signal.
pub fn looks_like_html(leading_bytes: &[u8]) -> bool {
    let window = leading_bytes[..leading_bytes.len().min(1024)].to_ascii_lowercase();
    window
        .windows(9)
        .any(|w| w == b"<!doctype")
        || window.windows(5).any(|w| w == b"<html")
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// A short window of transcript text around the first case-insensitive match
/// of `query`, for search result display. Falls back to the leading text when
/// the query is not found.
pub fn excerpt(content: &str, query: &str, context_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let needle: Vec<char> = query
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();

    let match_at = if needle.is_empty() {
        None
    } else {
        lowered
            .windows(needle.len())
            .position(|window| window == needle.as_slice())
    };

    let (start, end) = match match_at {
        Some(at) => (
            at.saturating_sub(context_chars),
            (at + needle.len() + context_chars).min(chars.len()),
        ),
        None => (0, (context_chars * 2).min(chars.len())),
    };

    let mut result = String::new();
    if start > 0 {
        result.push('…');
    }
    result.extend(&chars[start..end]);
    if end < chars.len() {
        result.push('…');
    }
    result
}

/// Check if the current environment has required external tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for HLS manifest downloads".to_string());
    }

    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for audio extraction".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
