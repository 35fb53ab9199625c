#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Operator CLI for the DeSO score pipeline.
//!
//! Every lifecycle step (normalize, create, validate, publish, rollback,
//! project) is a subcommand; without one an interactive menu is shown.
//! Publishing or rolling back re-projects the affected year unless
//! `--skip-projection` is given, so the hex grid never lags the live
//! version.
//!
//! Uses `indicatif-log-bridge` (via [`deso_score_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod commands;
mod interactive;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use deso_score_config::ScoringConfig;

use crate::commands::Context;

#[derive(Parser)]
#[command(name = "deso_score", about = "DeSO score computation and publishing")]
struct Cli {
    /// Operator configuration file (defaults to the embedded configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or store the operator configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Normalize every active indicator for a year
    Normalize {
        #[arg(long)]
        year: i32,
    },
    /// Compute a new pending score version
    Create {
        #[arg(long)]
        year: i32,
        /// Recorded on the version as who triggered the run
        #[arg(long, default_value = "cli")]
        computed_by: String,
    },
    /// Run sentinel, coverage, bounds, and drift checks on a version
    Validate {
        #[arg(long)]
        version: i64,
    },
    /// Make a version live for its year
    Publish {
        /// Version to publish
        #[arg(long, conflicts_with = "year", required_unless_present = "year")]
        version: Option<i64>,
        /// Publish the newest pending or validated version of this year
        #[arg(long)]
        year: Option<i32>,
        /// Do not re-project the hex grid afterwards
        #[arg(long)]
        skip_projection: bool,
    },
    /// Restore an earlier published version
    Rollback {
        #[arg(long)]
        to_version: i64,
        /// Recorded in the notes of both affected versions
        #[arg(long)]
        reason: String,
        /// Do not re-project the hex grid afterwards
        #[arg(long)]
        skip_projection: bool,
    },
    /// Release a stale run lock left by a crashed `create`
    Unlock {
        #[arg(long)]
        year: i32,
    },
    /// Rebuild the area-to-cell mapping from the stored area boundaries
    BuildCellMapping,
    /// Project the published version of a year onto the hex grid
    Project {
        #[arg(long)]
        year: i32,
        /// Smoothing preset name (defaults to the active preset)
        #[arg(long)]
        smoothing: Option<String>,
    },
    /// List the score versions of a year
    Versions {
        #[arg(long)]
        year: i32,
    },
    /// Create, validate, publish, and project in one go
    Run {
        #[arg(long)]
        year: i32,
        /// Smoothing preset name (defaults to the active preset)
        #[arg(long)]
        smoothing: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the configuration and write it to the database
    Sync,
    /// Print the configuration
    Show,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = deso_score_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = ScoringConfig::load_or_default(cli.config.as_deref())?;
    let conn = deso_score_database::open_default()?;
    let ctx = Context {
        conn,
        config,
        multi,
    };

    let Some(command) = cli.command else {
        return interactive::run(&ctx);
    };

    match command {
        Commands::Config { action } => match action {
            ConfigAction::Sync => ctx.config_sync()?,
            ConfigAction::Show => ctx.config_show(),
        },
        Commands::Normalize { year } => ctx.normalize(year)?,
        Commands::Create { year, computed_by } => {
            ctx.create(year, &computed_by)?;
        }
        Commands::Validate { version } => {
            ctx.validate(version)?;
        }
        Commands::Publish {
            version,
            year,
            skip_projection,
        } => ctx.publish(version, year, skip_projection)?,
        Commands::Rollback {
            to_version,
            reason,
            skip_projection,
        } => ctx.rollback(to_version, &reason, skip_projection)?,
        Commands::Unlock { year } => ctx.unlock(year)?,
        Commands::BuildCellMapping => ctx.build_cell_mapping()?,
        Commands::Project { year, smoothing } => {
            ctx.project(year, smoothing.as_deref())?;
        }
        Commands::Versions { year } => ctx.versions(year)?,
        Commands::Run { year, smoothing } => {
            pipeline::run(&ctx, year, "cli", smoothing.as_deref())?;
        }
    }

    Ok(())
}
