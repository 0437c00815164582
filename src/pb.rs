use std::{
    cmp::min,
    fmt::Write as _,
    io::{self, Stdout, Write},
    thread,
    time::Duration,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};

use crate::{
    color::{green, red, yellow},
    downloader::{format_byte_length, DownloadObserver},
    Result,
};

pub const PROGRESS_BAR_LENGTH: usize = 50;

const LABEL: &str = "Downloading";
const FILLED: &str = "█";
const FILLER: &str = "~";

/// Byte counters of a single download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    total: Option<u64>,
    downloaded: u64,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            downloaded: 0,
        }
    }

    pub fn record(&mut self, len: u64) {
        self.downloaded = self.downloaded.saturating_add(len);
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// `None` when the total is unknown or zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.downloaded as f64 / total as f64),
            _ => None,
        }
    }

    pub fn completed_cells(&self) -> usize {
        match self.total {
            Some(total) if total > 0 => {
                let cells = PROGRESS_BAR_LENGTH as u128 * self.downloaded as u128 / total as u128;
                min(cells, PROGRESS_BAR_LENGTH as u128) as usize
            }
            _ => 0,
        }
    }

    /// The colored gauge, without the leading carriage return.
    pub fn line(&self) -> String {
        let done = self.completed_cells();
        let bar = format!(
            "{}{}",
            green(&FILLED.repeat(done)),
            yellow(&FILLER.repeat(PROGRESS_BAR_LENGTH - done))
        );

        match self.fraction() {
            Some(fraction) => format!(" {} [{}] {:.1}", red(LABEL), bar, fraction * 100.0),
            // without a total only the byte count is meaningful
            None => format!(
                " {} [{}] {}",
                red(LABEL),
                bar,
                format_byte_length(self.downloaded)
            ),
        }
    }
}

/// Redraws the gauge in place on a terminal line.
pub struct ProgressPrinter<W: Write> {
    out: W,
    delay: Duration,
    tracker: ProgressTracker,
}

impl ProgressPrinter<Stdout> {
    pub fn stdout(delay: Duration) -> Self {
        ProgressPrinter::new(io::stdout(), delay)
    }
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(out: W, delay: Duration) -> Self {
        Self {
            out,
            delay,
            tracker: ProgressTracker::default(),
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn redraw(&mut self) {
        let line = self.tracker.line();
        if let Err(err) = write!(self.out, "\r{}", line).and_then(|_| self.out.flush()) {
            log::debug!("progress redraw failed: {}", err);
        }
    }
}

impl<W: Write> DownloadObserver for ProgressPrinter<W> {
    fn on_download_start(&mut self, total: Option<u64>) {
        self.tracker = ProgressTracker::new(total);
    }

    fn on_progress(&mut self, len: u64) {
        self.tracker.record(len);
        self.redraw();

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }

    fn on_download_end(&mut self) {
        if let Err(err) = writeln!(self.out).and_then(|_| self.out.flush()) {
            log::debug!("progress redraw failed: {}", err);
        }
    }
}

/// The same gauge rendered by indicatif; falls back to a spinner when the
/// total is unknown.
pub struct FancyProgress {
    bar_style: ProgressStyle,
    spinner_style: ProgressStyle,
    hidden: bool,
    pb: Option<ProgressBar>,
    tracker: ProgressTracker,
}

impl FancyProgress {
    pub fn new() -> Result<Self> {
        let bar_style = ProgressStyle::with_template(" {prefix:.red} [{bar:50.green/yellow}] {pct}")?
            .with_key("pct", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.1}", state.fraction() * 100.0);
            })
            .progress_chars("█~");
        let spinner_style = ProgressStyle::with_template(" {prefix:.red} {spinner:.green} {bytes}")?;

        Ok(Self {
            bar_style,
            spinner_style,
            hidden: false,
            pb: None,
            tracker: ProgressTracker::default(),
        })
    }

    /// Tracks progress without drawing anything.
    #[cfg(test)]
    pub(crate) fn hidden() -> Result<Self> {
        let mut fancy = FancyProgress::new()?;
        fancy.hidden = true;
        Ok(fancy)
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> Option<u64> {
        self.pb.as_ref().map(|pb| pb.position())
    }
}

impl DownloadObserver for FancyProgress {
    fn on_download_start(&mut self, total: Option<u64>) {
        self.tracker = ProgressTracker::new(total);

        let pb = match total {
            Some(len) if len > 0 => ProgressBar::new(len).with_style(self.bar_style.clone()),
            _ => ProgressBar::new_spinner().with_style(self.spinner_style.clone()),
        };
        if self.hidden {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_prefix(LABEL);

        self.pb = Some(pb);
    }

    fn on_progress(&mut self, len: u64) {
        self.tracker.record(len);
        if let Some(pb) = &self.pb {
            pb.inc(len);
        }
    }

    fn on_download_end(&mut self) {
        if let Some(pb) = &self.pb {
            pb.finish();
        }
    }
}
