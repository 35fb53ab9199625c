#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Score version manager.
//!
//! Wraps one full scoring run for one year as a [`ScoreVersion`] and moves
//! it through its lifecycle. Every status change is looked up in the
//! transition table of [`VersionStatus`]; publish and rollback run their
//! demote-then-promote pair inside a single transaction and re-check that
//! the year ends up with exactly one published version before committing.

pub mod stages;
pub mod validation;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use deso_score_config::ScoringConfig;
use deso_score_database::{
    DbError, areas_db, config_db, runs_db, versions_db, with_transaction,
};
use deso_score_indicator_models::ConfigError;
use deso_score_progress::{ProgressCallback, null_progress};
use deso_score_scoring::ScoringOptions;
use deso_score_version_models::{
    CoverageCheck, IndicatorSnapshot, ScoreVersion, SentinelResult, ValidationReport,
    VersionAction, VersionStatus,
};
use duckdb::Connection;

/// Errors returned by version lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// No version with this id.
    #[error("Score version {id} not found")]
    NotFound {
        /// Requested version id.
        id: i64,
    },

    /// The requested action is not allowed from the version's status.
    #[error("Cannot {action} score version {id}: current status is {status}")]
    StateConflict {
        /// Version id.
        id: i64,
        /// Status the version is in.
        status: VersionStatus,
        /// Action that was attempted.
        action: VersionAction,
    },

    /// Another `create` for the year holds the run lock.
    #[error("A scoring run for {year} is already in progress")]
    RunInProgress {
        /// Locked year.
        year: i32,
    },

    /// The year has no published version.
    #[error("No published score version for {year}")]
    NoPublishedVersion {
        /// Requested year.
        year: i32,
    },

    /// The year has no pending or validated version to publish.
    #[error("No pending or validated score version for {year}")]
    NothingToPublish {
        /// Requested year.
        year: i32,
    },

    /// Strict publish policy: the version has never been validated.
    #[error("Score version {id} must be validated before it can be published")]
    NotValidated {
        /// Version id.
        id: i64,
    },

    /// Strict publish policy: sentinel checks failed.
    #[error("Publish blocked: {} sentinel check(s) failed", failures.len())]
    SentinelGate {
        /// The failing sentinels.
        failures: Vec<SentinelResult>,
    },

    /// A lifecycle operation would break the one-published-per-year rule.
    #[error("Invariant violated: {message}")]
    Invariant {
        /// Description of the violation.
        message: String,
    },

    /// Invalid stored configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database error.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Tunables the manager reads from the operator configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerSettings {
    /// Scoring pass options.
    pub scoring: ScoringOptions,
    /// Score change flagged by drift detection.
    pub drift_threshold: f64,
    /// Whether failed or missing sentinel checks block `publish`.
    pub require_passing_sentinels: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            scoring: ScoringOptions::default(),
            drift_threshold: 20.0,
            require_passing_sentinels: false,
        }
    }
}

impl From<&ScoringConfig> for ManagerSettings {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            scoring: ScoringOptions {
                overlap_threshold: config.scoring.penalty_overlap_threshold,
                top_factors: config.scoring.top_factors,
            },
            drift_threshold: config.scoring.drift_threshold,
            require_passing_sentinels: config.publish.require_passing_sentinels,
        }
    }
}

/// Result of a successful `publish`.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The now-published version.
    pub version: ScoreVersion,
    /// Version that was live before, now superseded.
    pub superseded: Option<i64>,
    /// Sentinel failures from the latest validation (advisory unless the
    /// strict policy is on, in which case this is always empty).
    pub sentinel_failures: Vec<SentinelResult>,
    /// Whether the version had been validated at all.
    pub validated: bool,
}

/// Result of a successful `rollback`.
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    /// The restored, now-published version.
    pub restored: ScoreVersion,
    /// Version that was live before, now rolled back.
    pub rolled_back: Option<i64>,
}

/// Drives score versions through create, validate, publish, and rollback.
pub struct VersionManager<'a> {
    conn: &'a Connection,
    settings: ManagerSettings,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> VersionManager<'a> {
    /// Creates a manager over an open database.
    #[must_use]
    pub fn new(conn: &'a Connection, settings: ManagerSettings) -> Self {
        Self {
            conn,
            settings,
            progress: null_progress(),
        }
    }

    /// Reports long stages through `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs normalization and scoring for `year` and stores the result as a
    /// new `pending` version.
    ///
    /// Holds the run lock for `year` while working. The version row, its
    /// scores, and its stats are written in one transaction at the end, so
    /// a failed run leaves no version behind and the live version is
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::RunInProgress`] if another run holds the
    /// lock, or any error from the stages.
    pub fn create(&self, year: i32, computed_by: &str) -> Result<ScoreVersion, VersionError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        if !runs_db::try_acquire(self.conn, year, &run_id)? {
            return Err(VersionError::RunInProgress { year });
        }
        log::debug!("Acquired run lock {run_id} for {year}");

        let result = self.create_locked(year, computed_by);

        if let Err(e) = runs_db::release(self.conn, year, &run_id) {
            log::error!("Failed to release run lock for {year}: {e}");
        }

        result
    }

    fn create_locked(&self, year: i32, computed_by: &str) -> Result<ScoreVersion, VersionError> {
        log::info!("Creating score version for {year}");
        stages::normalize_year(self.conn, year, &self.progress)?;

        let indicators = stages::active_indicators(self.conn)?;
        let snapshot: Vec<IndicatorSnapshot> = indicators
            .iter()
            .map(|i| IndicatorSnapshot {
                slug: i.slug.clone(),
                weight: i.weight,
                direction: i.direction,
                normalization: i.normalization,
                normalization_scope: i.normalization_scope,
            })
            .collect();

        let computed_at = Utc::now();
        let id = versions_db::next_version_id(self.conn)?;

        let scores = stages::score_year(self.conn, year, id, &indicators, &self.settings.scoring)?;
        let stats = stages::summarize(&scores);

        // The version row only appears together with its scores.
        with_transaction(self.conn, |tx| {
            versions_db::insert_version_with_id(
                tx,
                id,
                year,
                &snapshot,
                computed_by,
                &computed_at,
            )?;
            versions_db::insert_composite_scores(tx, &scores)?;
            versions_db::set_stats(tx, id, &stats)?;
            Ok::<_, VersionError>(())
        })?;

        log::info!(
            "Version {id} for {year}: {} areas scored, mean {:?}, stddev {:?}",
            stats.area_count,
            stats.mean_score,
            stats.stddev_score,
        );

        self.get(id)
    }

    /// Runs the data-quality checks on a version and records them. Failures
    /// are reported in the returned report; they never fail this call.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::StateConflict`] unless the version is
    /// `pending` or `validated`.
    pub fn validate(&self, id: i64) -> Result<ValidationReport, VersionError> {
        let version = self.get(id)?;
        let next = transition(&version, VersionAction::Validate)?;

        let scores: BTreeMap<String, Option<f64>> =
            versions_db::load_composite_scores(self.conn, id)?
                .into_iter()
                .map(|s| (s.area_code, s.score))
                .collect();
        let scored: BTreeMap<String, f64> = scores
            .iter()
            .filter_map(|(code, score)| score.map(|s| (code.clone(), s)))
            .collect();

        let sentinels = config_db::load_sentinels(self.conn)?;
        let sentinel_results = validation::check_sentinels(&sentinels, &scores);

        let known_areas = areas_db::load_areas(self.conn)?.len().max(scores.len()) as u64;
        let coverage = CoverageCheck {
            known_areas,
            scored_areas: scored.len() as u64,
        };

        let drift = match self.published_version(version.year)? {
            Some(live) if live.id != id => {
                let old = versions_db::version_scores(self.conn, live.id)?;
                Some(validation::detect_drift(
                    live.id,
                    &old,
                    &scored,
                    self.settings.drift_threshold,
                ))
            }
            _ => None,
        };

        let report = ValidationReport {
            sentinels: sentinel_results,
            coverage,
            out_of_bounds: validation::count_out_of_bounds(scored.values()),
            drift,
            validated_at: Utc::now(),
        };

        with_transaction(self.conn, |tx| {
            versions_db::set_validation(tx, id, &report)?;
            versions_db::set_status(tx, id, next, None)?;
            Ok::<_, VersionError>(())
        })?;

        for failure in report.sentinel_failures() {
            log::warn!(
                "Sentinel {} ({}) {}: score {:?}, expected {}..={}",
                failure.area_code,
                failure.name,
                failure.status,
                failure.score,
                failure.expected_min,
                failure.expected_max,
            );
        }
        if let Some(drift) = &report.drift {
            log::info!(
                "Drift vs version {}: mean {:.2}, max {:.2}, {} areas over {}",
                drift.compared_version_id,
                drift.mean_drift,
                drift.max_drift,
                drift.areas_with_large_drift.len(),
                drift.threshold,
            );
        }
        log::info!(
            "Validated version {id}: coverage {:.1}%, {} sentinel failure(s), {} out of bounds",
            coverage.fraction() * 100.0,
            report.sentinel_failures().len(),
            report.out_of_bounds,
        );

        Ok(report)
    }

    /// Makes a `pending` or `validated` version the live one for its year,
    /// superseding whatever was live.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::StateConflict`] for any other status, and
    /// [`VersionError::NotValidated`] / [`VersionError::SentinelGate`] when
    /// the strict publish policy rejects the version.
    pub fn publish(&self, id: i64) -> Result<PublishOutcome, VersionError> {
        let version = self.get(id)?;
        let next = transition(&version, VersionAction::Publish)?;

        let validated = version.validation.is_some();
        let sentinel_failures: Vec<SentinelResult> = version
            .validation
            .as_ref()
            .map(|v| v.sentinel_failures().into_iter().cloned().collect())
            .unwrap_or_default();

        if self.settings.require_passing_sentinels {
            if !validated {
                return Err(VersionError::NotValidated { id });
            }
            if !sentinel_failures.is_empty() {
                return Err(VersionError::SentinelGate {
                    failures: sentinel_failures,
                });
            }
        } else if !validated {
            log::warn!("Publishing version {id} without validation");
        } else if !sentinel_failures.is_empty() {
            log::warn!(
                "Publishing version {id} with {} failing sentinel(s)",
                sentinel_failures.len()
            );
        }

        let year = version.year;
        let superseded = with_transaction(self.conn, |tx| {
            let mut demoted = None;
            for live in versions_db::versions_with_status(tx, year, VersionStatus::Published)? {
                let status = transition(&live, VersionAction::Supersede)?;
                versions_db::set_status(tx, live.id, status, None)?;
                demoted = Some(live.id);
            }
            versions_db::set_status(tx, id, next, Some(&Utc::now()))?;
            ensure_single_published(tx, year)?;
            Ok::<_, VersionError>(demoted)
        })?;

        log::info!(
            "Published version {id} for {year}{}",
            superseded.map_or_else(String::new, |s| format!(" (superseded {s})"))
        );

        Ok(PublishOutcome {
            version: self.get(id)?,
            superseded,
            sentinel_failures,
            validated,
        })
    }

    /// Publishes the newest `pending` or `validated` version of `year`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::NothingToPublish`] if there is none, or any
    /// error from [`Self::publish`].
    pub fn publish_latest(&self, year: i32) -> Result<PublishOutcome, VersionError> {
        let candidate = versions_db::list_versions(self.conn, year)?
            .into_iter()
            .find(|v| {
                matches!(
                    v.status,
                    VersionStatus::Pending | VersionStatus::Validated
                )
            })
            .ok_or(VersionError::NothingToPublish { year })?;
        self.publish(candidate.id)
    }

    /// Restores a previously live (`superseded` or `rolled_back`) version,
    /// marking the current live version `rolled_back`. `reason` is appended
    /// to the notes of both versions.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::StateConflict`] if the target was never live
    /// or is live right now.
    pub fn rollback(&self, to_id: i64, reason: &str) -> Result<RollbackOutcome, VersionError> {
        let target = self.get(to_id)?;
        let next = transition(&target, VersionAction::Restore)?;
        let year = target.year;

        let rolled_back = with_transaction(self.conn, |tx| {
            let mut demoted = None;
            for live in versions_db::versions_with_status(tx, year, VersionStatus::Published)? {
                let status = transition(&live, VersionAction::RollBack)?;
                versions_db::set_status(tx, live.id, status, None)?;
                versions_db::append_note(
                    tx,
                    live.id,
                    &format!("Rolled back in favour of version {to_id}: {reason}"),
                )?;
                demoted = Some(live.id);
            }

            versions_db::set_status(tx, to_id, next, Some(&Utc::now()))?;
            let note = demoted.map_or_else(
                || format!("Restored: {reason}"),
                |d| format!("Restored, replacing version {d}: {reason}"),
            );
            versions_db::append_note(tx, to_id, &note)?;

            ensure_single_published(tx, year)?;
            Ok::<_, VersionError>(demoted)
        })?;

        log::info!("Rolled back {year} to version {to_id}");

        Ok(RollbackOutcome {
            restored: self.get(to_id)?,
            rolled_back,
        })
    }

    /// Force-releases a stale run lock. Returns the released holder as
    /// `(run_id, started_at)`, or `None` if the year was not locked.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Database`] if the lookup or delete fails.
    pub fn unlock(&self, year: i32) -> Result<Option<(String, String)>, VersionError> {
        let Some(holder) = runs_db::current_run(self.conn, year)? else {
            return Ok(None);
        };
        runs_db::force_release(self.conn, year)?;
        log::warn!(
            "Released run lock {} for {year} (started {})",
            holder.0,
            holder.1
        );
        Ok(Some(holder))
    }

    /// Loads a version.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::NotFound`] if it does not exist.
    pub fn get(&self, id: i64) -> Result<ScoreVersion, VersionError> {
        versions_db::get_version(self.conn, id)?.ok_or(VersionError::NotFound { id })
    }

    /// The live version of `year`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Database`] if the query fails.
    pub fn published_version(&self, year: i32) -> Result<Option<ScoreVersion>, VersionError> {
        Ok(versions_db::versions_with_status(self.conn, year, VersionStatus::Published)?
            .into_iter()
            .next())
    }

    /// The live version of `year`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::NoPublishedVersion`] if the year has none.
    pub fn require_published(&self, year: i32) -> Result<ScoreVersion, VersionError> {
        self.published_version(year)?
            .ok_or(VersionError::NoPublishedVersion { year })
    }

    /// The most recently created version of `year`, in any status.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Database`] if the query fails.
    pub fn latest_version(&self, year: i32) -> Result<Option<ScoreVersion>, VersionError> {
        Ok(versions_db::list_versions(self.conn, year)?.into_iter().next())
    }

    /// All versions of `year`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Database`] if the query fails.
    pub fn list_versions(&self, year: i32) -> Result<Vec<ScoreVersion>, VersionError> {
        Ok(versions_db::list_versions(self.conn, year)?)
    }

    /// One area's live score for `year`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Database`] if the query fails.
    pub fn published_score(&self, area_code: &str, year: i32) -> Result<Option<f64>, VersionError> {
        Ok(versions_db::published_score(self.conn, area_code, year)?)
    }
}

fn transition(
    version: &ScoreVersion,
    action: VersionAction,
) -> Result<VersionStatus, VersionError> {
    version
        .status
        .transition(action)
        .ok_or(VersionError::StateConflict {
            id: version.id,
            status: version.status,
            action,
        })
}

fn ensure_single_published(conn: &Connection, year: i32) -> Result<(), VersionError> {
    let live = versions_db::versions_with_status(conn, year, VersionStatus::Published)?;
    if live.len() == 1 {
        Ok(())
    } else {
        Err(VersionError::Invariant {
            message: format!("{} published versions for {year}", live.len()),
        })
    }
}
