//! Terminal progress for builds, driven by the pipeline's progress hooks.

use std::time::Duration;

use hss_core::{BuildProgress, BuildResult, Phase};
use hss_fetch::{FetchEvent, WarmReport};
use indicatif::{ProgressBar, ProgressStyle};

/// Single spinner line showing the current phase and resource.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl BuildProgress for CliProgress {
    fn phase(&self, phase: Phase) {
        self.spinner.set_message(phase.to_string());
    }

    fn discovered(&self, phase: Phase, total: usize) {
        self.spinner.set_message(format!("{phase} [0/{total}]"));
    }

    fn processed(&self, phase: Phase, slug: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{phase} [{current}/{total}] {slug}"));
    }

    fn fetch(&self, event: &FetchEvent) {
        match event {
            FetchEvent::Retrying {
                url,
                attempt,
                delay,
            } => self.spinner.println(format!(
                "  retrying {url} (attempt {attempt}) in {}ms",
                delay.as_millis()
            )),
            FetchEvent::Failed { url, error } => {
                self.spinner.println(format!("  failed {url}: {error}"))
            }
            _ => {}
        }
    }

    fn warm(&self, totals: WarmReport) {
        self.spinner.set_message(format!(
            "warm-remote [{}/{}]",
            totals.completed, totals.discovered
        ));
    }

    fn done(&self, _result: &BuildResult) {
        self.spinner.finish_and_clear();
    }
}
