#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the `deso_score` binary.
//!
//! Each long-running pipeline stage gets a [`Stage`] bar that counts the
//! stage's own unit of work (indicators for normalization, build steps for
//! mapping and projection), and `run` gets a [`IndicatifProgress::pipeline_bar`] that
//! names the step in flight. [`init_logger`] routes `log` output through
//! `indicatif-log-bridge` so log lines never tear a bar mid-redraw.

use std::sync::Arc;
use std::time::Duration;

use deso_score_progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

pub use indicatif::MultiProgress;

/// A pipeline stage that reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Normalizing raw indicator values.
    Normalize,
    /// Building the area-to-cell mapping.
    CellMapping,
    /// Smoothing and storing hex cell scores.
    Projection,
}

impl Stage {
    /// Spinner text shown before the stage knows its size.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normalize => "Normalizing indicators",
            Self::CellMapping => "Mapping areas to cells",
            Self::Projection => "Projecting scores onto cells",
        }
    }

    /// What the stage's `pos/len` counts.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Normalize => "indicators",
            Self::CellMapping | Self::Projection => "steps",
        }
    }
}

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `set_total()` provides a known length.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates the bar for one [`Stage`]. Spins until the stage calls
    /// [`ProgressCallback::set_total()`], then counts in the stage's unit.
    #[must_use]
    pub fn stage_bar(multi: &MultiProgress, stage: Stage) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(stage.label());

        let bar_style = ProgressStyle::with_template(&format!(
            "  {{msg:<28}} {{wide_bar:.cyan/dim}} {{pos}}/{{len}} {} [{{eta}}]",
            stage.unit()
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }

    /// Creates the bar for `run`: one tick per lifecycle step, with the
    /// message naming the step in flight.
    #[must_use]
    pub fn pipeline_bar(
        multi: &MultiProgress,
        year: i32,
        steps: u64,
    ) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new(steps));
        bar.set_style(
            ProgressStyle::with_template(&format!(
                "{year} {{wide_bar:.green/dim}} {{pos}}/{{len}} {{msg}} [{{elapsed_precise}}]"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );

        let bar_style = bar.style();

        Arc::new(Self { bar, bar_style })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Initializes the global logger behind `indicatif-log-bridge`.
///
/// Logs at `info` unless `RUST_LOG` says otherwise, since operators watch
/// stage timings and fallback-year notices at that level.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Already set in tests

    log::set_max_level(level);

    multi
}
