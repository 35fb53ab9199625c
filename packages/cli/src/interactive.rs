//! Interactive menu shown when no subcommand is given.
//!
//! Provides a terminal-based UI using `dialoguer` so operators can run the
//! lifecycle steps without memorizing CLI flags.

use dialoguer::{Confirm, Input, Select};

use crate::commands::Context;
use crate::pipeline;

/// Top-level actions.
enum Action {
    RunPipeline,
    SyncConfig,
    Create,
    Validate,
    Publish,
    Rollback,
    Project,
    BuildCellMapping,
    Versions,
}

impl Action {
    const ALL: &[Self] = &[
        Self::RunPipeline,
        Self::SyncConfig,
        Self::Create,
        Self::Validate,
        Self::Publish,
        Self::Rollback,
        Self::Project,
        Self::BuildCellMapping,
        Self::Versions,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::RunPipeline => "Run full pipeline (create, validate, publish, project)",
            Self::SyncConfig => "Sync configuration",
            Self::Create => "Create score version",
            Self::Validate => "Validate score version",
            Self::Publish => "Publish score version",
            Self::Rollback => "Roll back to an earlier version",
            Self::Project => "Project published scores onto hexagons",
            Self::BuildCellMapping => "Rebuild area-to-cell mapping",
            Self::Versions => "List score versions",
        }
    }
}

fn prompt_year() -> Result<i32, dialoguer::Error> {
    Input::new().with_prompt("Year").interact_text()
}

fn prompt_version() -> Result<i64, dialoguer::Error> {
    Input::new().with_prompt("Score version id").interact_text()
}

/// Runs the interactive menu.
///
/// # Errors
///
/// Returns an error if a prompt or the chosen action fails.
pub fn run(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    println!("DeSO Score Toolchain");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Action::ALL[idx] {
        Action::RunPipeline => pipeline::run(ctx, prompt_year()?, "interactive", None)?,
        Action::SyncConfig => ctx.config_sync()?,
        Action::Create => {
            ctx.create(prompt_year()?, "interactive")?;
        }
        Action::Validate => {
            ctx.validate(prompt_version()?)?;
        }
        Action::Publish => {
            let id = prompt_version()?;
            let project = Confirm::new()
                .with_prompt("Re-project hexagons afterwards?")
                .default(true)
                .interact()?;
            ctx.publish(Some(id), None, !project)?;
        }
        Action::Rollback => {
            let id = prompt_version()?;
            let reason: String = Input::new().with_prompt("Reason").interact_text()?;
            ctx.rollback(id, &reason, false)?;
        }
        Action::Project => {
            let year = prompt_year()?;
            let preset: String = Input::new()
                .with_prompt("Smoothing preset (leave empty for the active one)")
                .allow_empty(true)
                .interact_text()?;
            let preset = preset.trim();
            ctx.project(year, (!preset.is_empty()).then_some(preset))?;
        }
        Action::BuildCellMapping => ctx.build_cell_mapping()?,
        Action::Versions => ctx.versions(prompt_year()?)?,
    }

    Ok(())
}
