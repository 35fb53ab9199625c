#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Normalization engine.
//!
//! Converts raw indicator observations for one indicator and one year into
//! comparable `[0, 1]` values. The indicator's scope decides the population
//! each value is ranked against: the whole country, or only areas of the
//! same urbanity class. Missing raw values stay missing; nothing is imputed.

pub mod methods;

use std::collections::BTreeMap;

use deso_score_indicator_models::{
    Indicator, IndicatorObservation, NormalizationScope, UrbanityClass,
};
use rayon::prelude::*;

/// Grouping key for one normalization population. Areas without an
/// urbanity class form their own group under stratified scope.
type ScopeGroup = Option<UrbanityClass>;

/// Normalizes every observation of one indicator for one year.
///
/// Returns the observations with `normalized_value` set, in the same order
/// as the input. Observations with a missing (or non-finite) raw value get
/// `None`.
#[must_use]
pub fn normalize_indicator(
    indicator: &Indicator,
    observations: &[IndicatorObservation],
    urbanity: &BTreeMap<String, UrbanityClass>,
) -> Vec<IndicatorObservation> {
    let mut groups: BTreeMap<ScopeGroup, Vec<usize>> = BTreeMap::new();

    for (idx, obs) in observations.iter().enumerate() {
        let Some(raw) = obs.raw_value else {
            continue;
        };
        if !raw.is_finite() {
            log::warn!(
                "Ignoring non-finite raw value for {} in area {}",
                indicator.slug,
                obs.area_code
            );
            continue;
        }

        let group = match indicator.normalization_scope {
            NormalizationScope::National => None,
            NormalizationScope::UrbanityStratified => urbanity.get(&obs.area_code).copied(),
        };
        groups.entry(group).or_default().push(idx);
    }

    let mut out: Vec<IndicatorObservation> = observations
        .iter()
        .map(|obs| IndicatorObservation {
            normalized_value: None,
            ..obs.clone()
        })
        .collect();

    for (group, members) in &groups {
        let raw: Vec<f64> = members
            .iter()
            .filter_map(|&i| observations[i].raw_value)
            .collect();
        let normalized = methods::normalize(indicator.normalization, &raw);

        log::debug!(
            "Normalized {} values for {} (group {:?}, method {})",
            raw.len(),
            indicator.slug,
            group,
            indicator.normalization,
        );

        for (&i, value) in members.iter().zip(normalized) {
            out[i].normalized_value = Some(value);
        }
    }

    out
}

/// Normalizes a whole year: every active indicator that has observations.
///
/// Indicators are independent, so they are normalized in parallel. The
/// result is keyed by indicator id.
#[must_use]
pub fn normalize_all(
    indicators: &[Indicator],
    observations: &BTreeMap<i64, Vec<IndicatorObservation>>,
    urbanity: &BTreeMap<String, UrbanityClass>,
) -> BTreeMap<i64, Vec<IndicatorObservation>> {
    indicators
        .par_iter()
        .filter(|indicator| indicator.is_active)
        .filter_map(|indicator| {
            let obs = observations.get(&indicator.id)?;
            Some((indicator.id, normalize_indicator(indicator, obs, urbanity)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use deso_score_indicator_models::{Direction, NormalizationMethod};

    use super::*;

    fn indicator(scope: NormalizationScope) -> Indicator {
        Indicator {
            id: 1,
            slug: "grocery_access".to_string(),
            name: "Grocery access".to_string(),
            direction: Direction::Positive,
            weight: 0.5,
            normalization: NormalizationMethod::RankPercentile,
            normalization_scope: scope,
            is_active: true,
        }
    }

    fn obs(area: &str, raw: Option<f64>) -> IndicatorObservation {
        IndicatorObservation {
            indicator_id: 1,
            area_code: area.to_string(),
            year: 2024,
            raw_value: raw,
            normalized_value: None,
        }
    }

    fn urbanity() -> BTreeMap<String, UrbanityClass> {
        [
            ("U1", UrbanityClass::Urban),
            ("U2", UrbanityClass::Urban),
            ("R1", UrbanityClass::Rural),
            ("R2", UrbanityClass::Rural),
        ]
        .into_iter()
        .map(|(code, class)| (code.to_string(), class))
        .collect()
    }

    #[test]
    fn null_raw_values_stay_null() {
        let input = vec![obs("U1", Some(1.0)), obs("U2", None), obs("R1", Some(3.0))];
        let out = normalize_indicator(
            &indicator(NormalizationScope::National),
            &input,
            &urbanity(),
        );
        assert_eq!(out[0].normalized_value, Some(0.25));
        assert_eq!(out[1].normalized_value, None);
        assert_eq!(out[2].normalized_value, Some(0.75));
    }

    #[test]
    fn stratified_scope_ranks_within_class() {
        // Rural areas have far fewer stores; nationally they'd sit at the
        // bottom, within their class the better one is on top.
        let input = vec![
            obs("U1", Some(40.0)),
            obs("U2", Some(50.0)),
            obs("R1", Some(1.0)),
            obs("R2", Some(2.0)),
        ];
        let national =
            normalize_indicator(&indicator(NormalizationScope::National), &input, &urbanity());
        let stratified = normalize_indicator(
            &indicator(NormalizationScope::UrbanityStratified),
            &input,
            &urbanity(),
        );

        assert_eq!(national[3].normalized_value, Some(0.375));
        assert_eq!(stratified[3].normalized_value, Some(0.75));
        assert_eq!(stratified[1].normalized_value, Some(0.75));
        assert_eq!(stratified[2].normalized_value, Some(0.25));
    }

    #[test]
    fn unclassified_areas_form_their_own_group() {
        let input = vec![obs("U1", Some(10.0)), obs("X1", Some(1.0))];
        let out = normalize_indicator(
            &indicator(NormalizationScope::UrbanityStratified),
            &input,
            &urbanity(),
        );
        assert_eq!(out[0].normalized_value, Some(0.5));
        assert_eq!(out[1].normalized_value, Some(0.5));
    }

    #[test]
    fn non_finite_raw_values_are_ignored() {
        let input = vec![obs("U1", Some(f64::NAN)), obs("U2", Some(2.0))];
        let out = normalize_indicator(
            &indicator(NormalizationScope::National),
            &input,
            &urbanity(),
        );
        assert_eq!(out[0].normalized_value, None);
        assert_eq!(out[1].normalized_value, Some(0.5));
    }

    #[test]
    fn normalize_all_skips_inactive_indicators() {
        let mut inactive = indicator(NormalizationScope::National);
        inactive.id = 2;
        inactive.is_active = false;

        let mut observations = BTreeMap::new();
        observations.insert(1, vec![obs("U1", Some(1.0))]);
        observations.insert(2, vec![obs("U1", Some(1.0))]);

        let out = normalize_all(
            &[indicator(NormalizationScope::National), inactive],
            &observations,
            &urbanity(),
        );
        assert!(out.contains_key(&1));
        assert!(!out.contains_key(&2));
    }
}
