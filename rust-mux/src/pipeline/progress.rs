//! FFmpeg diagnostic output parsing.
//!
//! ffmpeg reports the input length once (`Duration: 00:01:00.00, ...`) and the
//! current position repeatedly, either as `time=` in the stderr stats line or
//! as `out_time=` on the `-progress` channel.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::MAX_RUNNING_PERCENT;

/// A data point extracted from one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Total input duration in seconds.
    Duration(f64),
    /// Current output position in seconds.
    Position(f64),
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid duration regex")
    })
}

/// Parse time string in HH:MM:SS[.frac] format to seconds.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    total.is_finite().then_some(total)
}

/// Parse the `time=` (or `out_time=`) field of a line.
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = line[time_start + 5..].trim_start();
    let end = time_str.find(char::is_whitespace).unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse the `Duration:` header of a line. `Duration: N/A` yields `None`.
pub fn parse_duration_field(line: &str) -> Option<f64> {
    let caps = duration_regex().captures(line)?;
    parse_time(caps.get(1)?.as_str())
}

/// Extract a progress data point from one line, if it carries one.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    if let Some(duration) = parse_duration_field(line) {
        return Some(ProgressEvent::Duration(duration));
    }
    parse_time_field(line).map(ProgressEvent::Position)
}

/// Running percent: `floor(min(current / total, 0.99) * 100)`.
///
/// Unknown or non-positive totals give 0.
pub fn percent(current: f64, total: f64) -> u8 {
    if total <= 0.0 || !current.is_finite() || current <= 0.0 {
        return 0;
    }
    let ratio = (current / total).min(0.99);
    ((ratio * 100.0).floor() as u8).min(MAX_RUNNING_PERCENT)
}

/// Per-job progress state.
///
/// The first duration seen wins. Only increases are reported.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration: Option<f64>,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Feed one line; returns the new percent when it increased.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        match parse_line(line)? {
            ProgressEvent::Duration(duration) => {
                if self.duration.is_none() && duration > 0.0 {
                    self.duration = Some(duration);
                }
                None
            }
            ProgressEvent::Position(position) => {
                let pct = percent(position, self.duration?);
                if pct > self.last_percent {
                    self.last_percent = pct;
                    Some(pct)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("00:01:05"), Some(65.0));
        assert_eq!(parse_time("invalid"), None);
        assert_eq!(parse_time("N/A"), None);
    }

    #[test]
    fn test_parse_line_stats_and_progress_channel() {
        let stats = "frame=  100 fps=0.0 q=-1.0 size=    1024kB time=00:00:30.00 bitrate=2097.2kbits/s speed=60x";
        assert_eq!(parse_line(stats), Some(ProgressEvent::Position(30.0)));
        assert_eq!(
            parse_line("out_time=00:00:12.500000"),
            Some(ProgressEvent::Position(12.5))
        );
        // Microsecond fields are not positions in HH:MM:SS form.
        assert_eq!(parse_line("out_time_us=12500000"), None);
        assert_eq!(parse_line("out_time=N/A"), None);
    }

    #[test]
    fn test_parse_duration_header() {
        let header = "  Duration: 00:01:00.00, start: 0.000000, bitrate: 4000 kb/s";
        assert_eq!(parse_line(header), Some(ProgressEvent::Duration(60.0)));
        assert_eq!(parse_line("  Duration: N/A, bitrate: N/A"), None);
    }

    #[test]
    fn test_percent_is_floored_and_capped() {
        assert_eq!(percent(30.0, 60.0), 50);
        assert_eq!(percent(59.9, 60.0), 99);
        assert_eq!(percent(60.0, 60.0), 99);
        assert_eq!(percent(120.0, 60.0), 99);
        assert_eq!(percent(1.0, 3.0), 33);
        assert_eq!(percent(10.0, 0.0), 0);
        assert_eq!(percent(-1.0, 60.0), 0);
    }

    #[test]
    fn test_tracker_first_duration_wins() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("time=00:00:10.00"), None);
        tracker.observe("  Duration: 00:01:40.00, start: 0.0");
        tracker.observe("  Duration: 00:00:10.00, start: 0.0");
        assert_eq!(tracker.duration(), Some(100.0));

        assert_eq!(tracker.observe("time=00:00:10.00"), Some(10));
        assert_eq!(tracker.observe("out_time=00:00:10.000000"), None);
        assert_eq!(tracker.observe("time=00:00:05.00"), None);
        assert_eq!(tracker.observe("garbage line"), None);
        assert_eq!(tracker.observe("time=00:01:45.00"), Some(99));
    }
}
