//! Overlap-based deductions applied after weighting.
//!
//! Rules are applied one at a time against the running score, in ascending
//! `display_order`, with a clamp to `[0, 100]` after every step. Order is
//! observable: a percentage rule applied after an absolute one deducts less
//! than the other way round.

use deso_score_indicator_models::{AreaVulnerabilityOverlap, PenaltyRule, PenaltyType};
use deso_score_scoring_models::{AppliedPenalty, round2};

/// Default minimum overlap fraction for a rule to apply.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.10;

/// Selects the active rules whose tier overlaps the area by at least
/// `threshold`, ordered by `display_order` (then slug).
#[must_use]
pub fn applicable_rules<'a>(
    rules: &'a [PenaltyRule],
    overlaps: &[AreaVulnerabilityOverlap],
    threshold: f64,
) -> Vec<&'a PenaltyRule> {
    let mut applicable: Vec<&PenaltyRule> = rules
        .iter()
        .filter(|rule| rule.is_active)
        .filter(|rule| {
            overlaps
                .iter()
                .any(|o| o.tier == rule.tier && o.overlap_fraction >= threshold)
        })
        .collect();

    applicable.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.slug.cmp(&b.slug))
    });
    applicable
}

/// Folds `rules` over `score`, clamping after each step.
///
/// Returns the final score and what each rule actually deducted.
#[must_use]
pub fn apply_penalties(score: f64, rules: &[&PenaltyRule]) -> (f64, Vec<AppliedPenalty>) {
    rules
        .iter()
        .fold((score, Vec::with_capacity(rules.len())), |(running, mut applied), rule| {
            let delta = match rule.penalty_type {
                PenaltyType::Absolute => rule.magnitude,
                PenaltyType::Percentage => running * (rule.magnitude / 100.0),
            };
            let next = (running + delta).clamp(0.0, 100.0);

            applied.push(AppliedPenalty {
                slug: rule.slug.clone(),
                name: rule.name.clone(),
                amount: round2(next - running),
            });
            (next, applied)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(slug: &str, penalty_type: PenaltyType, magnitude: f64, order: i32) -> PenaltyRule {
        PenaltyRule {
            id: 0,
            slug: slug.to_string(),
            name: slug.to_string(),
            category: "vulnerability".to_string(),
            penalty_type,
            magnitude,
            tier: format!("tier_{slug}"),
            display_order: order,
            is_active: true,
        }
    }

    fn overlap(tier: &str, fraction: f64) -> AreaVulnerabilityOverlap {
        AreaVulnerabilityOverlap {
            area_code: "0180C1090".to_string(),
            tier: tier.to_string(),
            overlap_fraction: fraction,
        }
    }

    #[test]
    fn absolute_penalty_deducts() {
        let r = rule("a", PenaltyType::Absolute, -10.0, 1);
        let (score, applied) = apply_penalties(56.0, &[&r]);
        assert!((score - 46.0).abs() < 1e-9);
        assert!((applied[0].amount + 10.0).abs() < 1e-9);
    }

    #[test]
    fn penalty_clamps_at_zero() {
        let r = rule("a", PenaltyType::Absolute, -60.0, 1);
        let (score, applied) = apply_penalties(56.0, &[&r]);
        assert!(score.abs() < f64::EPSILON);
        assert!((applied[0].amount + 56.0).abs() < 1e-9);
    }

    #[test]
    fn order_changes_the_result() {
        let pct = rule("pct", PenaltyType::Percentage, -20.0, 1);
        let abs = rule("abs", PenaltyType::Absolute, -10.0, 2);

        let (pct_first, _) = apply_penalties(50.0, &[&pct, &abs]);
        let (abs_first, _) = apply_penalties(50.0, &[&abs, &pct]);
        assert!((pct_first - 30.0).abs() < 1e-9);
        assert!((abs_first - 32.0).abs() < 1e-9);
    }

    #[test]
    fn rules_need_enough_overlap() {
        let rules = vec![
            rule("b", PenaltyType::Absolute, -8.0, 2),
            rule("a", PenaltyType::Absolute, -15.0, 1),
            rule("c", PenaltyType::Absolute, -5.0, 3),
        ];
        let overlaps = vec![
            overlap("tier_a", 0.10),
            overlap("tier_b", 0.5),
            overlap("tier_c", 0.099),
        ];

        let applicable = applicable_rules(&rules, &overlaps, DEFAULT_OVERLAP_THRESHOLD);
        let slugs: Vec<&str> = applicable.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b"]);
    }

    #[test]
    fn inactive_rules_never_apply() {
        let mut r = rule("a", PenaltyType::Absolute, -15.0, 1);
        r.is_active = false;
        let rules = [r];
        assert!(applicable_rules(&rules, &[overlap("tier_a", 1.0)], 0.1).is_empty());
    }
}
