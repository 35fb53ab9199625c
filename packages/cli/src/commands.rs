//! Subcommand implementations shared by the flag-driven CLI and the
//! interactive menu.

use deso_score_cli_utils::{IndicatifProgress, MultiProgress, Stage};
use deso_score_config::ScoringConfig;
use deso_score_database::{areas_db, config_db};
use deso_score_spatial::{ProjectionSummary, build_cell_mapping, project_year};
use deso_score_version::{ManagerSettings, VersionManager, stages};
use deso_score_version_models::{ScoreVersion, ValidationReport};
use duckdb::Connection;

/// Everything a command needs: the database, the operator configuration,
/// and the progress bar container.
pub struct Context {
    pub conn: Connection,
    pub config: ScoringConfig,
    pub multi: MultiProgress,
}

impl Context {
    fn manager(&self) -> VersionManager<'_> {
        VersionManager::new(&self.conn, ManagerSettings::from(&self.config))
    }

    /// `config sync`: writes the configuration document to the database.
    pub fn config_sync(&self) -> Result<(), Box<dyn std::error::Error>> {
        let summary = config_db::sync_config(
            &self.conn,
            &self.config.indicators(),
            &self.config.penalty_rules(),
            &self.config.sentinel_areas(),
            &self.config.smoothing_configs(),
        )?;
        println!(
            "Synced {} indicators, {} penalties, {} sentinels, {} smoothing presets",
            summary.indicators, summary.penalties, summary.sentinels, summary.smoothing
        );
        println!("Changes take effect on the next `create`.");
        Ok(())
    }

    /// `config show`: prints the configuration document.
    pub fn config_show(&self) {
        let scoring = &self.config.scoring;
        println!(
            "Scoring: overlap threshold {}, top factors {}, drift threshold {}",
            scoring.penalty_overlap_threshold, scoring.top_factors, scoring.drift_threshold
        );
        println!(
            "Publish: require passing sentinels = {}",
            self.config.publish.require_passing_sentinels
        );

        println!();
        println!("Indicators:");
        for i in self.config.indicators() {
            println!(
                "  {:<32} {:>5.3} {:<8} {:<16} {:<20}{}",
                i.slug,
                i.weight,
                i.direction,
                i.normalization,
                i.normalization_scope,
                if i.is_active { "" } else { " (inactive)" }
            );
        }

        println!();
        println!("Penalties:");
        for p in self.config.penalty_rules() {
            println!(
                "  {:>2}. {:<24} {} {} when overlapping `{}`",
                p.display_order, p.slug, p.penalty_type, p.magnitude, p.tier
            );
        }

        println!();
        println!("Sentinels:");
        for s in self.config.sentinel_areas() {
            println!(
                "  {} {:<24} [{}, {}]",
                s.area_code, s.name, s.expected_score_min, s.expected_score_max
            );
        }

        println!();
        println!("Smoothing presets:");
        for s in self.config.smoothing_configs() {
            println!(
                "  {:<10} self {:.2} neighbor {:.2} k={} {}{}",
                s.name,
                s.self_weight,
                s.neighbor_weight,
                s.k_rings,
                s.decay_function,
                if s.is_active { " (active)" } else { "" }
            );
        }
    }

    /// `normalize`: normalizes every active indicator for a year.
    pub fn normalize(&self, year: i32) -> Result<(), Box<dyn std::error::Error>> {
        let progress = IndicatifProgress::stage_bar(&self.multi, Stage::Normalize);
        let count = stages::normalize_year(&self.conn, year, &progress)?;
        println!("Normalized {count} values for {year}");
        Ok(())
    }

    /// `create`: computes a new pending version.
    pub fn create(
        &self,
        year: i32,
        computed_by: &str,
    ) -> Result<ScoreVersion, Box<dyn std::error::Error>> {
        let version = self
            .manager()
            .with_progress(IndicatifProgress::stage_bar(&self.multi, Stage::Normalize))
            .create(year, computed_by)?;
        println!(
            "Created version {} for {year}: {} areas scored, mean {}",
            version.id,
            version.stats.area_count,
            version
                .stats
                .mean_score
                .map_or_else(|| "-".to_string(), |m| format!("{m:.2}")),
        );
        Ok(version)
    }

    /// `validate`: runs the data-quality checks on a version.
    pub fn validate(&self, id: i64) -> Result<ValidationReport, Box<dyn std::error::Error>> {
        let report = self.manager().validate(id)?;
        print_report(&report);
        Ok(report)
    }

    /// `publish`: makes a version live, then re-projects its year.
    pub fn publish(
        &self,
        version: Option<i64>,
        year: Option<i32>,
        skip_projection: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let manager = self.manager();
        let outcome = match (version, year) {
            (Some(id), _) => manager.publish(id)?,
            (None, Some(year)) => manager.publish_latest(year)?,
            (None, None) => return Err("publish needs --version or --year".into()),
        };

        println!(
            "Published version {} for {}",
            outcome.version.id, outcome.version.year
        );
        if let Some(old) = outcome.superseded {
            println!("Superseded version {old}");
        }
        if !outcome.validated {
            println!("Warning: version was published without validation");
        }
        for failure in &outcome.sentinel_failures {
            println!(
                "Warning: sentinel {} ({}) {}",
                failure.area_code, failure.name, failure.status
            );
        }

        if !skip_projection {
            self.project(outcome.version.year, None)?;
        }
        Ok(())
    }

    /// `rollback`: restores an earlier version, then re-projects its year.
    pub fn rollback(
        &self,
        to_version: i64,
        reason: &str,
        skip_projection: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let outcome = self.manager().rollback(to_version, reason)?;
        println!(
            "Version {} is live again for {}",
            outcome.restored.id, outcome.restored.year
        );
        if let Some(old) = outcome.rolled_back {
            println!("Rolled back version {old}");
        }

        if !skip_projection {
            self.project(outcome.restored.year, None)?;
        }
        Ok(())
    }

    /// `unlock`: force-releases a stale run lock.
    pub fn unlock(&self, year: i32) -> Result<(), Box<dyn std::error::Error>> {
        if let Some((run_id, started_at)) = self.manager().unlock(year)? {
            println!("Released run lock {run_id} for {year} (started {started_at})");
        } else {
            println!("No run lock held for {year}");
        }
        Ok(())
    }

    /// `build-cell-mapping`: rebuilds the area-to-cell mapping.
    pub fn build_cell_mapping(&self) -> Result<(), Box<dyn std::error::Error>> {
        let areas = areas_db::load_areas(&self.conn)?.len();
        let progress = IndicatifProgress::stage_bar(&self.multi, Stage::CellMapping);
        let stored = build_cell_mapping(&self.conn, &progress)?;
        println!("Stored {stored} area-cell rows for {areas} areas");
        Ok(())
    }

    /// `project`: projects the published version of a year onto the grid.
    pub fn project(
        &self,
        year: i32,
        smoothing: Option<&str>,
    ) -> Result<ProjectionSummary, Box<dyn std::error::Error>> {
        let preset = config_db::find_smoothing_config(&self.conn, smoothing)?.ok_or_else(|| {
            smoothing.map_or_else(
                || "No active smoothing preset; run `config sync`".to_string(),
                |name| format!("Unknown smoothing preset `{name}`"),
            )
        })?;

        let progress = IndicatifProgress::stage_bar(&self.multi, Stage::Projection);
        let summary = project_year(&self.conn, year, &preset, &progress)?;

        println!(
            "Projected version {} for {year} with preset {}:",
            summary.score_version_id, preset.name
        );
        for (res, count) in &summary.cells_by_resolution {
            println!("  resolution {res}: {count} cells");
        }
        Ok(summary)
    }

    /// `versions`: lists the versions of a year.
    pub fn versions(&self, year: i32) -> Result<(), Box<dyn std::error::Error>> {
        let versions = self.manager().list_versions(year)?;
        if versions.is_empty() {
            println!("No score versions for {year}");
            return Ok(());
        }

        println!(
            "{:>6}  {:<12} {:>6} {:>8} {:>8}  {:<25} {:<25}",
            "id", "status", "areas", "mean", "stddev", "computed", "published"
        );
        for v in &versions {
            println!(
                "{:>6}  {:<12} {:>6} {:>8} {:>8}  {:<25} {:<25}",
                v.id,
                v.status.as_ref(),
                v.stats.area_count,
                fmt_opt(v.stats.mean_score),
                fmt_opt(v.stats.stddev_score),
                v.computed_at.to_rfc3339(),
                v.published_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            );
        }
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn print_report(report: &ValidationReport) {
    println!(
        "Coverage: {}/{} areas ({:.1}%)",
        report.coverage.scored_areas,
        report.coverage.known_areas,
        report.coverage.fraction() * 100.0
    );
    println!("Scores out of bounds: {}", report.out_of_bounds);

    for s in &report.sentinels {
        println!(
            "  sentinel {} ({}): {} score {} expected [{}, {}]",
            s.area_code,
            s.name,
            s.status,
            fmt_opt(s.score),
            s.expected_min,
            s.expected_max
        );
    }

    if let Some(drift) = &report.drift {
        println!(
            "Drift vs version {}: mean {:.2}, max {:.2}, {} areas moved more than {}",
            drift.compared_version_id,
            drift.mean_drift,
            drift.max_drift,
            drift.areas_with_large_drift.len(),
            drift.threshold
        );
        for d in drift.areas_with_large_drift.iter().take(10) {
            println!(
                "  {} {:.2} -> {:.2} ({:+.2})",
                d.area_code, d.old_score, d.new_score, d.drift
            );
        }
    }

    println!(
        "Validation {}",
        if report.passed() { "passed" } else { "reported failures" }
    );
}
