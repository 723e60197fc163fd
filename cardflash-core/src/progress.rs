//! Live throughput display for the copy phase.
//!
//! [`ProgressReporter`] turns the copier's running byte count into
//! [`ProgressFrame`]s: a percentage, an instantaneous MB/s figure and a text
//! bar. It never looks at the clock itself; callers pass `Instant`s in, which
//! keeps the throttling and speed math deterministic under test.
use console::style;
use std::time::{Duration, Instant};

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(200);
pub const MIN_BAR_WIDTH: usize = 30;
/// Used when the terminal width cannot be detected.
pub const FALLBACK_TERMINAL_WIDTH: usize = 120;

const MIB: u64 = 1024 * 1024;
const SPINNER: [char; 4] = ['/', '-', '\\', '|'];

/// Bar width for a terminal `columns` wide: a third of it, at least 30.
pub fn bar_width(columns: usize) -> usize {
    (columns / 3).max(MIN_BAR_WIDTH)
}

/// `floor(done * 100 / total)` clamped to 100. An empty image is complete.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as u128 * 100 / total as u128).min(100);
    pct as u8
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressFrame {
    pub percent: u8,
    pub bytes_written: u64,
    pub image_size: u64,
    pub speed_mbs: u64,
    pub bar: String,
    /// The final frame ends with a newline instead of being overwritten.
    pub last: bool,
}

impl ProgressFrame {
    /// Renders the frame as one status line, without the leading carriage
    /// return. Styling is applied only when `color` is set.
    pub fn render(&self, color: bool) -> String {
        let body = format!(
            " [{}] {:3}% ({}MB/{}MB) @ {}MB/s",
            self.bar,
            self.percent,
            self.bytes_written / MIB,
            self.image_size / MIB,
            self.speed_mbs
        );
        format!(
            "{}{}",
            style("==>").green().bold().force_styling(color),
            style(body).bold().force_styling(color)
        )
    }
}

#[derive(Debug)]
pub struct ProgressReporter {
    image_size: u64,
    width: usize,
    interval: Duration,
    last_update: Instant,
    last_bytes: u64,
    speed_mbs: u64,
    spinner: usize,
}

impl ProgressReporter {
    /// Starts a reporter for an image of `image_size` bytes on a terminal
    /// `columns` wide. `started` is the moment the copy began.
    pub fn new(image_size: u64, columns: usize, started: Instant) -> Self {
        Self {
            image_size,
            width: bar_width(columns),
            interval: REFRESH_INTERVAL,
            last_update: started,
            last_bytes: 0,
            speed_mbs: 0,
            spinner: 0,
        }
    }

    /// Records the byte counter at `now` and returns a frame to display, or
    /// `None` if less than the refresh interval passed since the last one.
    pub fn sample(&mut self, bytes_written: u64, now: Instant) -> Option<ProgressFrame> {
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed < self.interval {
            return None;
        }

        // The first sample has nothing meaningful to compare against.
        let secs = elapsed.as_secs_f64();
        self.speed_mbs = if secs > 0.0 && self.last_bytes > 0 {
            let delta = bytes_written.saturating_sub(self.last_bytes);
            (delta as f64 / secs / MIB as f64) as u64
        } else {
            0
        };

        let pct = percent(bytes_written, self.image_size);
        let glyph = SPINNER[self.spinner];
        self.spinner = (self.spinner + 1) % SPINNER.len();

        self.last_update = now;
        self.last_bytes = bytes_written;

        Some(ProgressFrame {
            percent: pct,
            bytes_written,
            image_size: self.image_size,
            speed_mbs: self.speed_mbs,
            bar: self.bar(pct, Some(glyph)),
            last: false,
        })
    }

    /// The closing frame: a full bar at 100% with the last known throughput.
    pub fn finish(&self) -> ProgressFrame {
        ProgressFrame {
            percent: 100,
            bytes_written: self.image_size,
            image_size: self.image_size,
            speed_mbs: self.speed_mbs,
            bar: self.bar(100, None),
            last: true,
        }
    }

    fn bar(&self, pct: u8, glyph: Option<char>) -> String {
        let mut filled = pct as usize * self.width / 100;
        let mut bar = "=".repeat(filled);
        if let Some(glyph) = glyph {
            if filled < self.width && pct < 100 {
                bar.push(glyph);
                filled += 1;
            }
        }
        bar.push_str(&" ".repeat(self.width - filled));
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(250);

    #[test]
    fn percent_is_floored_and_clamped() {
        assert_eq!(percent(0, 1000), 0);
        assert_eq!(percent(999, 1000), 99);
        assert_eq!(percent(1000, 1000), 100);
        assert_eq!(percent(2000, 1000), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(u64::MAX - 1, u64::MAX), 99);
    }

    #[test]
    fn percent_is_monotonic_and_hits_100_only_at_end() {
        let total = 10_007u64;
        let mut prev = 0;
        for done in (0..=total).step_by(13).chain([total]) {
            let p = percent(done, total);
            assert!(p >= prev);
            assert_eq!(p == 100, done == total, "done={done}");
            prev = p;
        }
    }

    #[test]
    fn bar_width_is_a_third_with_floor() {
        assert_eq!(bar_width(120), 40);
        assert_eq!(bar_width(60), 30);
        assert_eq!(bar_width(0), 30);
        assert_eq!(bar_width(200), 66);
    }

    #[test]
    fn samples_are_throttled() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100 * MIB, 120, start);
        assert!(reporter.sample(MIB, start + Duration::from_millis(100)).is_none());
        assert!(reporter.sample(2 * MIB, start + Duration::from_millis(200)).is_some());
        assert!(reporter.sample(3 * MIB, start + Duration::from_millis(300)).is_none());
        assert!(reporter.sample(4 * MIB, start + Duration::from_millis(400)).is_some());
    }

    #[test]
    fn first_sample_reports_zero_speed() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100 * MIB, 120, start);
        let first = reporter.sample(50 * MIB, start + STEP).unwrap();
        assert_eq!(first.speed_mbs, 0);

        // 10 MiB more in a quarter second is 40 MB/s.
        let second = reporter.sample(60 * MIB, start + 2 * STEP).unwrap();
        assert_eq!(second.speed_mbs, 40);
    }

    #[test]
    fn bar_has_fixed_width_and_spinner_after_fill() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100, 90, start);
        let frame = reporter.sample(50, start + STEP).unwrap();
        assert_eq!(frame.bar.chars().count(), 30);
        assert_eq!(&frame.bar[..15], "===============");
        assert_eq!(frame.bar.chars().nth(15), Some('/'));
        assert!(frame.bar[16..].chars().all(|c| c == ' '));
    }

    #[test]
    fn spinner_cycles_four_frames_without_touching_counters() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100, 90, start);
        let glyphs: Vec<char> = (1..=5)
            .map(|i| {
                let frame = reporter.sample(10, start + STEP * i).unwrap();
                assert_eq!(frame.percent, 10);
                assert_eq!(frame.bytes_written, 10);
                frame.bar.chars().nth(3).unwrap()
            })
            .collect();
        assert_eq!(glyphs, vec!['/', '-', '\\', '|', '/']);
    }

    #[test]
    fn full_bar_has_no_spinner() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100, 90, start);
        let frame = reporter.sample(100, start + STEP).unwrap();
        assert_eq!(frame.bar, "=".repeat(30));
    }

    #[test]
    fn final_frame_is_complete_and_keeps_last_speed() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100 * MIB, 120, start);
        reporter.sample(10 * MIB, start + STEP);
        reporter.sample(20 * MIB, start + 2 * STEP);
        let done = reporter.finish();
        assert!(done.last);
        assert_eq!(done.percent, 100);
        assert_eq!(done.bar, "=".repeat(40));
        assert_eq!(done.speed_mbs, 40);
        assert_eq!(
            done.render(false),
            format!("==> [{}] 100% (100MB/100MB) @ 40MB/s", "=".repeat(40))
        );
    }

    #[test]
    fn plain_render_has_no_escape_codes() {
        let start = Instant::now();
        let mut reporter = ProgressReporter::new(100 * MIB, 120, start);
        let frame = reporter.sample(25 * MIB, start + STEP).unwrap();
        let line = frame.render(false);
        assert!(!line.contains('\u{1b}'));
        assert!(line.contains(" 25% (25MB/100MB) @ 0MB/s"));
        assert!(frame.render(true).contains('\u{1b}'));
    }
}
