//! Full pipeline for one year.
//!
//! Chains create -> validate -> publish -> project. A failure at any step
//! stops the run; whatever version was live stays live.

use std::time::Instant;

use deso_score_cli_utils::IndicatifProgress;
use deso_score_progress::ProgressCallback as _;

use crate::commands::Context;

/// Runs the full pipeline for `year`.
///
/// # Errors
///
/// Returns an error if any step fails, including a publish refused by the
/// strict sentinel policy.
pub fn run(
    ctx: &Context,
    year: i32,
    computed_by: &str,
    smoothing: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline_start = Instant::now();
    let steps = IndicatifProgress::pipeline_bar(&ctx.multi, year, 4);

    steps.set_message("create".to_string());
    let start = Instant::now();
    let version = ctx.create(year, computed_by)?;
    log::info!("Create finished in {:.1}s", start.elapsed().as_secs_f64());
    steps.inc(1);

    steps.set_message("validate".to_string());
    let start = Instant::now();
    let report = ctx.validate(version.id)?;
    log::info!("Validate finished in {:.1}s", start.elapsed().as_secs_f64());
    if !report.passed() {
        log::warn!("Version {} has validation failures", version.id);
    }
    steps.inc(1);

    steps.set_message("publish".to_string());
    ctx.publish(Some(version.id), None, true)?;
    steps.inc(1);

    steps.set_message("project".to_string());
    let start = Instant::now();
    ctx.project(year, smoothing)?;
    log::info!("Project finished in {:.1}s", start.elapsed().as_secs_f64());
    steps.inc(1);

    steps.finish(format!(
        "Pipeline for {year} finished in {:.1}s",
        pipeline_start.elapsed().as_secs_f64()
    ));
    Ok(())
}
