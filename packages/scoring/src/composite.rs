//! Weighted combination of normalized indicator values for one area.

use std::collections::BTreeMap;

use deso_score_indicator_models::Indicator;

/// Normalized values for one area, keyed by indicator id.
pub type AreaValues = BTreeMap<i64, f64>;

/// Factor contributions are stored with this many decimals.
const FACTOR_PRECISION: f64 = 10_000.0;

/// Result of weighting one area's values, before penalties.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedScore {
    /// `100 * Σ(wᵢ·eᵢ) / W`, where `W` is the weight actually available.
    pub score: f64,
    /// Weight of the indicators that contributed.
    pub available_weight: f64,
    /// Indicator slug -> effective contribution.
    pub factor_scores: BTreeMap<String, f64>,
    /// Slugs with the largest `w·e`.
    pub top_positive: Vec<String>,
    /// Slugs with the smallest `w·e`.
    pub top_negative: Vec<String>,
}

/// Running sums over the indicators that have a value for this area.
#[derive(Debug, Default)]
struct Accumulator<'a> {
    weighted_sum: f64,
    available_weight: f64,
    contributions: Vec<(&'a str, f64, f64)>,
}

impl<'a> Accumulator<'a> {
    fn add(&mut self, slug: &'a str, weight: f64, effective: f64) {
        self.weighted_sum += weight * effective;
        self.available_weight += weight;
        self.contributions.push((slug, weight * effective, effective));
    }
}

/// Combines one area's normalized values into a weighted score.
///
/// Only active, non-neutral indicators with a finite value for the area take
/// part. Returns `None` when no weight is available.
#[must_use]
pub fn weighted_score(
    indicators: &[Indicator],
    values: &AreaValues,
    top_factors: usize,
) -> Option<WeightedScore> {
    let mut acc = Accumulator::default();

    for indicator in indicators.iter().filter(|i| i.is_scoreable()) {
        let Some(&normalized) = values.get(&indicator.id) else {
            continue;
        };
        if !normalized.is_finite() {
            continue;
        }
        let Some(effective) = indicator.direction.effective(normalized) else {
            continue;
        };
        acc.add(&indicator.slug, indicator.weight, effective);
    }

    if acc.available_weight <= 0.0 {
        return None;
    }

    let score = (100.0 * acc.weighted_sum / acc.available_weight).clamp(0.0, 100.0);

    let factor_scores = acc
        .contributions
        .iter()
        .map(|(slug, _, e)| {
            (
                (*slug).to_string(),
                (e * FACTOR_PRECISION).round() / FACTOR_PRECISION,
            )
        })
        .collect();

    let mut ranked = acc.contributions;
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top_positive = ranked
        .iter()
        .take(top_factors)
        .map(|(slug, ..)| (*slug).to_string())
        .collect();

    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let top_negative = ranked
        .iter()
        .take(top_factors)
        .map(|(slug, ..)| (*slug).to_string())
        .collect();

    Some(WeightedScore {
        score,
        available_weight: acc.available_weight,
        factor_scores,
        top_positive,
        top_negative,
    })
}

#[cfg(test)]
mod tests {
    use deso_score_indicator_models::{Direction, NormalizationMethod, NormalizationScope};

    use super::*;

    fn indicator(id: i64, slug: &str, weight: f64, direction: Direction) -> Indicator {
        Indicator {
            id,
            slug: slug.to_string(),
            name: slug.to_string(),
            direction,
            weight,
            normalization: NormalizationMethod::RankPercentile,
            normalization_scope: NormalizationScope::National,
            is_active: true,
        }
    }

    fn three_indicators() -> Vec<Indicator> {
        vec![
            indicator(1, "income", 0.3, Direction::Positive),
            indicator(2, "crime", 0.2, Direction::Negative),
            indicator(3, "education", 0.5, Direction::Positive),
        ]
    }

    #[test]
    fn weighted_example_scores_56() {
        let values = AreaValues::from([(1, 0.80), (2, 0.90), (3, 0.60)]);
        let result = weighted_score(&three_indicators(), &values, 3).unwrap();

        assert!((result.score - 56.0).abs() < 1e-9);
        assert!((result.available_weight - 1.0).abs() < 1e-12);
        assert!((result.factor_scores["crime"] - 0.1).abs() < 1e-12);
        assert_eq!(result.top_positive, vec!["education", "income", "crime"]);
        assert_eq!(result.top_negative, vec!["crime", "income", "education"]);
    }

    #[test]
    fn missing_values_do_not_lower_the_score() {
        let indicators = three_indicators();
        let with_gap = AreaValues::from([(1, 0.80), (2, 0.90)]);
        let result = weighted_score(&indicators, &with_gap, 3).unwrap();

        // (0.3 * 0.8 + 0.2 * 0.1) / 0.5
        assert!((result.score - 52.0).abs() < 1e-9);

        let without_indicator = weighted_score(&indicators[..2], &with_gap, 3).unwrap();
        assert!((result.score - without_indicator.score).abs() < 1e-12);
    }

    #[test]
    fn single_extreme_indicator_is_not_pulled_to_the_middle() {
        let indicators = three_indicators();
        let best = weighted_score(&indicators, &AreaValues::from([(2, 0.0)]), 3).unwrap();
        let worst = weighted_score(&indicators, &AreaValues::from([(3, 0.0)]), 3).unwrap();
        assert!((best.score - 100.0).abs() < f64::EPSILON);
        assert!(worst.score.abs() < f64::EPSILON);
    }

    #[test]
    fn no_available_weight_is_unscored() {
        let mut indicators = three_indicators();
        indicators.push(indicator(4, "population", 0.4, Direction::Neutral));
        indicators[0].is_active = false;

        assert!(weighted_score(&indicators, &AreaValues::new(), 3).is_none());
        assert!(weighted_score(&indicators, &AreaValues::from([(1, 0.9), (4, 0.5)]), 3).is_none());
    }

    #[test]
    fn top_factor_ties_break_by_slug() {
        let indicators = vec![
            indicator(1, "b_slug", 0.5, Direction::Positive),
            indicator(2, "a_slug", 0.5, Direction::Positive),
        ];
        let values = AreaValues::from([(1, 0.5), (2, 0.5)]);
        let result = weighted_score(&indicators, &values, 1).unwrap();
        assert_eq!(result.top_positive, vec!["a_slug"]);
        assert_eq!(result.top_negative, vec!["a_slug"]);
    }
}
