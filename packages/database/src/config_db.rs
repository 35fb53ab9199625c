//! Operator configuration tables.
//!
//! `sync_config` upserts a validated configuration document. Indicator and
//! penalty ids are assigned once, on first sync, and stay stable so stored
//! indicator values keep pointing at the right row. Entries missing from the
//! document are deactivated, never deleted.

use deso_score_indicator_models::{Indicator, PenaltyRule, SentinelArea, SmoothingConfig};
use duckdb::Connection;

use crate::{DbError, parse_enum, with_transaction};

/// Row counts written by [`sync_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Indicators upserted.
    pub indicators: usize,
    /// Penalty rules upserted.
    pub penalties: usize,
    /// Sentinel areas upserted.
    pub sentinels: usize,
    /// Smoothing presets upserted.
    pub smoothing: usize,
}

/// Writes a full configuration in one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; nothing is written then.
pub fn sync_config(
    conn: &Connection,
    indicators: &[Indicator],
    penalties: &[PenaltyRule],
    sentinels: &[SentinelArea],
    smoothing: &[SmoothingConfig],
) -> Result<SyncSummary, DbError> {
    with_transaction(conn, |tx| {
        let summary = SyncSummary {
            indicators: sync_indicators(tx, indicators)?,
            penalties: sync_penalties(tx, penalties)?,
            sentinels: sync_sentinels(tx, sentinels)?,
            smoothing: sync_smoothing(tx, smoothing)?,
        };
        log::info!(
            "Synced config: {} indicators, {} penalties, {} sentinels, {} smoothing presets",
            summary.indicators,
            summary.penalties,
            summary.sentinels,
            summary.smoothing,
        );
        Ok(summary)
    })
}

fn id_for_slug(conn: &Connection, table: &str, slug: &str) -> Result<Option<i64>, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table} WHERE slug = ?"))?;
    let mut rows = stmt.query([slug])?;
    Ok(match rows.next()? {
        Some(row) => Some(row.get(0)?),
        None => None,
    })
}

/// Sets `is_active = FALSE` on every row whose key is not in `keep`.
fn deactivate_missing(
    conn: &Connection,
    table: &str,
    key_column: &str,
    keep: &[&str],
) -> Result<(), DbError> {
    if keep.is_empty() {
        conn.execute(&format!("UPDATE {table} SET is_active = FALSE"), [])?;
        return Ok(());
    }

    let placeholders: String = keep.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql =
        format!("UPDATE {table} SET is_active = FALSE WHERE {key_column} NOT IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    for (i, key) in keep.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, key)?;
    }
    stmt.raw_execute()?;
    Ok(())
}

fn sync_indicators(conn: &Connection, indicators: &[Indicator]) -> Result<usize, DbError> {
    for indicator in indicators {
        if let Some(id) = id_for_slug(conn, "indicators", &indicator.slug)? {
            conn.execute(
                "UPDATE indicators SET
                    name = ?, direction = ?, weight = ?, normalization = ?,
                    normalization_scope = ?, is_active = ?
                 WHERE id = ?",
                duckdb::params![
                    indicator.name,
                    indicator.direction.as_ref(),
                    indicator.weight,
                    indicator.normalization.as_ref(),
                    indicator.normalization_scope.as_ref(),
                    indicator.is_active,
                    id,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO indicators (
                    id, slug, name, direction, weight, normalization,
                    normalization_scope, is_active
                 ) VALUES (nextval('indicators_id_seq'), ?, ?, ?, ?, ?, ?, ?)",
                duckdb::params![
                    indicator.slug,
                    indicator.name,
                    indicator.direction.as_ref(),
                    indicator.weight,
                    indicator.normalization.as_ref(),
                    indicator.normalization_scope.as_ref(),
                    indicator.is_active,
                ],
            )?;
        }
    }

    let slugs: Vec<&str> = indicators.iter().map(|i| i.slug.as_str()).collect();
    deactivate_missing(conn, "indicators", "slug", &slugs)?;

    Ok(indicators.len())
}

fn sync_penalties(conn: &Connection, penalties: &[PenaltyRule]) -> Result<usize, DbError> {
    for rule in penalties {
        if let Some(id) = id_for_slug(conn, "score_penalties", &rule.slug)? {
            conn.execute(
                "UPDATE score_penalties SET
                    name = ?, category = ?, penalty_type = ?, magnitude = ?,
                    tier = ?, display_order = ?, is_active = ?
                 WHERE id = ?",
                duckdb::params![
                    rule.name,
                    rule.category,
                    rule.penalty_type.as_ref(),
                    rule.magnitude,
                    rule.tier,
                    rule.display_order,
                    rule.is_active,
                    id,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO score_penalties (
                    id, slug, name, category, penalty_type, magnitude, tier,
                    display_order, is_active
                 ) VALUES (nextval('score_penalties_id_seq'), ?, ?, ?, ?, ?, ?, ?, ?)",
                duckdb::params![
                    rule.slug,
                    rule.name,
                    rule.category,
                    rule.penalty_type.as_ref(),
                    rule.magnitude,
                    rule.tier,
                    rule.display_order,
                    rule.is_active,
                ],
            )?;
        }
    }

    let slugs: Vec<&str> = penalties.iter().map(|p| p.slug.as_str()).collect();
    deactivate_missing(conn, "score_penalties", "slug", &slugs)?;

    Ok(penalties.len())
}

fn sync_sentinels(conn: &Connection, sentinels: &[SentinelArea]) -> Result<usize, DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO sentinel_areas (
            area_code, name, expected_score_min, expected_score_max,
            expected_tier, is_active
         ) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (area_code) DO UPDATE SET
            name = EXCLUDED.name,
            expected_score_min = EXCLUDED.expected_score_min,
            expected_score_max = EXCLUDED.expected_score_max,
            expected_tier = EXCLUDED.expected_tier,
            is_active = EXCLUDED.is_active",
    )?;

    for sentinel in sentinels {
        stmt.execute(duckdb::params![
            sentinel.area_code,
            sentinel.name,
            sentinel.expected_score_min,
            sentinel.expected_score_max,
            sentinel.expected_tier.as_deref(),
            sentinel.is_active,
        ])?;
    }

    let codes: Vec<&str> = sentinels.iter().map(|s| s.area_code.as_str()).collect();
    deactivate_missing(conn, "sentinel_areas", "area_code", &codes)?;

    Ok(sentinels.len())
}

fn sync_smoothing(conn: &Connection, presets: &[SmoothingConfig]) -> Result<usize, DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO smoothing_configs (
            name, self_weight, neighbor_weight, k_rings, decay_function,
            decay_base, is_active
         ) VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (name) DO UPDATE SET
            self_weight = EXCLUDED.self_weight,
            neighbor_weight = EXCLUDED.neighbor_weight,
            k_rings = EXCLUDED.k_rings,
            decay_function = EXCLUDED.decay_function,
            decay_base = EXCLUDED.decay_base,
            is_active = EXCLUDED.is_active",
    )?;

    for preset in presets {
        stmt.execute(duckdb::params![
            preset.name,
            preset.self_weight,
            preset.neighbor_weight,
            preset.k_rings,
            preset.decay_function.as_ref(),
            preset.decay_base,
            preset.is_active,
        ])?;
    }

    let names: Vec<&str> = presets.iter().map(|p| p.name.as_str()).collect();
    deactivate_missing(conn, "smoothing_configs", "name", &names)?;

    Ok(presets.len())
}

/// Loads every indicator (active or not), ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored enum is unknown.
pub fn load_indicators(conn: &Connection) -> Result<Vec<Indicator>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, slug, name, direction, weight, normalization,
                normalization_scope, is_active
         FROM indicators
         ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;

    let mut indicators = Vec::new();
    while let Some(row) = rows.next()? {
        let direction: String = row.get(3)?;
        let normalization: String = row.get(5)?;
        let scope: String = row.get(6)?;
        indicators.push(Indicator {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            direction: parse_enum("direction", &direction)?,
            weight: row.get(4)?,
            normalization: parse_enum("normalization", &normalization)?,
            normalization_scope: parse_enum("normalization_scope", &scope)?,
            is_active: row.get(7)?,
        });
    }

    Ok(indicators)
}

/// Loads active penalty rules in application order.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored enum is unknown.
pub fn load_penalty_rules(conn: &Connection) -> Result<Vec<PenaltyRule>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, slug, name, category, penalty_type, magnitude, tier,
                display_order, is_active
         FROM score_penalties
         WHERE is_active
         ORDER BY display_order, slug",
    )?;
    let mut rows = stmt.query([])?;

    let mut rules = Vec::new();
    while let Some(row) = rows.next()? {
        let penalty_type: String = row.get(4)?;
        rules.push(PenaltyRule {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            penalty_type: parse_enum("penalty_type", &penalty_type)?,
            magnitude: row.get(5)?,
            tier: row.get(6)?,
            display_order: row.get(7)?,
            is_active: row.get(8)?,
        });
    }

    Ok(rules)
}

/// Loads active sentinel areas.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_sentinels(conn: &Connection) -> Result<Vec<SentinelArea>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT area_code, name, expected_score_min, expected_score_max,
                expected_tier, is_active
         FROM sentinel_areas
         WHERE is_active
         ORDER BY area_code",
    )?;
    let mut rows = stmt.query([])?;

    let mut sentinels = Vec::new();
    while let Some(row) = rows.next()? {
        sentinels.push(SentinelArea {
            area_code: row.get(0)?,
            name: row.get(1)?,
            expected_score_min: row.get(2)?,
            expected_score_max: row.get(3)?,
            expected_tier: row.get(4)?,
            is_active: row.get(5)?,
        });
    }

    Ok(sentinels)
}

/// Loads every smoothing preset, ordered by name.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value is invalid.
pub fn load_smoothing_configs(conn: &Connection) -> Result<Vec<SmoothingConfig>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, self_weight, neighbor_weight, k_rings, decay_function,
                decay_base, is_active
         FROM smoothing_configs
         ORDER BY name",
    )?;
    let mut rows = stmt.query([])?;

    let mut presets = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let k_rings: i32 = row.get(3)?;
        let decay: String = row.get(4)?;
        presets.push(SmoothingConfig {
            k_rings: u32::try_from(k_rings).map_err(|_| DbError::Conversion {
                message: format!("negative k_rings {k_rings} for preset {name}"),
            })?,
            name,
            self_weight: row.get(1)?,
            neighbor_weight: row.get(2)?,
            decay_function: parse_enum("decay_function", &decay)?,
            decay_base: row.get(5)?,
            is_active: row.get(6)?,
        });
    }

    Ok(presets)
}

/// Finds a smoothing preset by name (case-insensitive), or the active one
/// when `name` is `None`.
///
/// # Errors
///
/// Returns [`DbError`] if the presets cannot be loaded.
pub fn find_smoothing_config(
    conn: &Connection,
    name: Option<&str>,
) -> Result<Option<SmoothingConfig>, DbError> {
    let presets = load_smoothing_configs(conn)?;
    Ok(match name {
        Some(name) => presets
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name)),
        None => presets.into_iter().find(|p| p.is_active),
    })
}

#[cfg(test)]
mod tests {
    use deso_score_indicator_models::{
        DecayFunction, Direction, NormalizationMethod, NormalizationScope, PenaltyType,
    };

    use super::*;
    use crate::open_in_memory;

    fn indicator(slug: &str, weight: f64) -> Indicator {
        Indicator {
            id: 0,
            slug: slug.to_string(),
            name: slug.to_string(),
            direction: Direction::Positive,
            weight,
            normalization: NormalizationMethod::RankPercentile,
            normalization_scope: NormalizationScope::National,
            is_active: true,
        }
    }

    fn smoothing(name: &str, active: bool) -> SmoothingConfig {
        SmoothingConfig {
            name: name.to_string(),
            self_weight: 0.7,
            neighbor_weight: 0.3,
            k_rings: 1,
            decay_function: DecayFunction::Linear,
            decay_base: 0.5,
            is_active: active,
        }
    }

    #[test]
    fn resync_keeps_ids_and_deactivates_removed_entries() {
        let conn = open_in_memory().unwrap();

        sync_config(
            &conn,
            &[indicator("income", 0.3), indicator("crime", 0.2)],
            &[],
            &[],
            &[],
        )
        .unwrap();
        let first = load_indicators(&conn).unwrap();

        sync_config(&conn, &[indicator("income", 0.5)], &[], &[], &[]).unwrap();
        let second = load_indicators(&conn).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);

        let income = second.iter().find(|i| i.slug == "income").unwrap();
        let crime = second.iter().find(|i| i.slug == "crime").unwrap();
        assert_eq!(
            income.id,
            first.iter().find(|i| i.slug == "income").unwrap().id
        );
        assert!((income.weight - 0.5).abs() < f64::EPSILON);
        assert!(!crime.is_active);
    }

    #[test]
    fn penalties_load_in_display_order() {
        let conn = open_in_memory().unwrap();
        let rule = |slug: &str, order: i32| PenaltyRule {
            id: 0,
            slug: slug.to_string(),
            name: slug.to_string(),
            category: "vulnerability".to_string(),
            penalty_type: PenaltyType::Absolute,
            magnitude: -5.0,
            tier: slug.to_string(),
            display_order: order,
            is_active: true,
        };

        sync_config(&conn, &[], &[rule("late", 2), rule("early", 1)], &[], &[]).unwrap();
        let rules = load_penalty_rules(&conn).unwrap();
        let slugs: Vec<&str> = rules.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["early", "late"]);
    }

    #[test]
    fn finds_active_or_named_smoothing_preset() {
        let conn = open_in_memory().unwrap();
        sync_config(
            &conn,
            &[],
            &[],
            &[],
            &[smoothing("Light", true), smoothing("Strong", false)],
        )
        .unwrap();

        let active = find_smoothing_config(&conn, None).unwrap().unwrap();
        assert_eq!(active.name, "Light");

        let named = find_smoothing_config(&conn, Some("strong")).unwrap().unwrap();
        assert_eq!(named.name, "Strong");

        assert!(find_smoothing_config(&conn, Some("missing")).unwrap().is_none());
    }
}
