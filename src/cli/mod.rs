use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};

use crate::store::DateWindow;

#[derive(Parser)]
#[command(
    name = "gavel",
    about = "Discover, download, and transcribe legislative archive videos",
    version,
    long_about = "A pipeline service that discovers archival recordings from the House archive \
page and the Senate hosting API, resolves stream URLs, downloads the videos, extracts \
speech-ready audio, and transcribes it, with persistent per-stage state and crash recovery."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover videos recorded within a date window and register them
    Discover {
        /// Lookback window in days (ignored when --start-date is given)
        #[arg(long, value_name = "DAYS")]
        days: Option<i64>,

        /// Absolute window start (YYYY-MM-DD)
        #[arg(long, value_name = "DATE", requires = "end_date")]
        start_date: Option<String>,

        /// Absolute window end (YYYY-MM-DD, inclusive)
        #[arg(long, value_name = "DATE", requires = "start_date")]
        end_date: Option<String>,

        /// Only this source ("house" or "senate")
        #[arg(long, value_name = "SOURCE")]
        source: Option<String>,

        /// Maximum videos per source
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,

        /// Resolve stream URLs during discovery (expensive; normally the
        /// pipeline resolves at download time)
        #[arg(long)]
        resolve_streams: bool,
    },

    /// Discover, then run the full pipeline over pending videos
    Run {
        /// Lookback window in days (ignored when --start-date is given)
        #[arg(long, value_name = "DAYS")]
        days: Option<i64>,

        /// Absolute window start (YYYY-MM-DD)
        #[arg(long, value_name = "DATE", requires = "end_date")]
        start_date: Option<String>,

        /// Absolute window end (YYYY-MM-DD, inclusive)
        #[arg(long, value_name = "DATE", requires = "start_date")]
        end_date: Option<String>,

        /// Only this source ("house" or "senate")
        #[arg(long, value_name = "SOURCE")]
        source: Option<String>,

        /// Maximum videos to process
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,

        /// Process already-registered videos without re-discovering
        #[arg(long)]
        skip_discovery: bool,
    },

    /// Re-enter failed or abandoned videos at the correct stage
    Sweep {
        /// Keep sweeping on this interval instead of running once
        #[arg(long, value_name = "MINUTES")]
        every: Option<u64>,
    },

    /// Show pipeline counters
    Status,

    /// Search transcripts for a phrase
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
    },

    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Build the recording-date window from CLI arguments. An absolute pair wins
/// over the lookback; the end date is pushed to end-of-day so an inclusive
/// "same day" window works.
pub fn resolve_window(
    days: Option<i64>,
    start_date: Option<&str>,
    end_date: Option<&str>,
    default_days: i64,
) -> Result<DateWindow> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .with_context(|| format!("invalid start date: {}", start))?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .with_context(|| format!("invalid end date: {}", end))?;

        let start = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap());
        let end = Utc.from_utc_datetime(&end.and_hms_opt(23, 59, 59).unwrap());
        if end < start {
            anyhow::bail!("end date precedes start date");
        }
        return Ok(DateWindow::new(start, end));
    }

    Ok(DateWindow::lookback_days(days.unwrap_or(default_days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_resolve_window_absolute_pair() {
        let window = resolve_window(None, Some("2025-02-19"), Some("2025-02-20"), 60).unwrap();
        assert_eq!(window.start.day(), 19);
        assert_eq!(window.end.day(), 20);
        assert_eq!(window.end.hour(), 23, "end date is inclusive");
    }

    #[test]
    fn test_resolve_window_same_day() {
        let window = resolve_window(None, Some("2025-02-20"), Some("2025-02-20"), 60).unwrap();
        assert!(window.contains(
            Utc.with_ymd_and_hms(2025, 2, 20, 12, 0, 0).unwrap()
        ));
    }

    #[test]
    fn test_resolve_window_rejects_inverted_pair() {
        assert!(resolve_window(None, Some("2025-02-20"), Some("2025-02-19"), 60).is_err());
        assert!(resolve_window(None, Some("garbage"), Some("2025-02-19"), 60).is_err());
    }

    #[test]
    fn test_resolve_window_lookback() {
        let window = resolve_window(Some(2), None, None, 60).unwrap();
        let span = window.end - window.start;
        assert_eq!(span.num_days(), 2);
    }
}
