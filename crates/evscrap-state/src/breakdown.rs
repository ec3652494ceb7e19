//! # Settlement Breakdown
//!
//! Line items explaining how a settlement total is composed. Default items
//! are generated at settlement creation; regeneration only inserts codes
//! that are missing, so it is idempotent.
//!
//! Amounts are signed minor units. Deductions carry negative amounts so
//! that the sum of all items equals the settlement total.
//!
//! The consistency check is soft: a mismatch is reported, never rejected.

use chrono::{DateTime, Utc};
use evscrap_core::{BreakdownItemId, SettlementId};
use serde::{Deserialize, Serialize};

use crate::settlement::Settlement;

/// Human-readable rule string reported with every consistency check.
pub const CONSISTENCY_RULE: &str =
    "amount_min=sum(MIN); amount_bonus=sum(NON_MIN); amount_total=sum(ALL)";

/// Code of the guaranteed-minimum default item.
pub const MIN_BASE_CODE: &str = "MIN_BASE";
/// Code of the grade-bonus default item.
pub const BONUS_GRADE_CODE: &str = "BONUS_GRADE";

/// Category of a breakdown item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakdownCategory {
    Min,
    Bonus,
    Deduction,
    Logistics,
    Other,
}

impl BreakdownCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Bonus => "BONUS",
            Self::Deduction => "DEDUCTION",
            Self::Logistics => "LOGISTICS",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MIN" => Some(Self::Min),
            "BONUS" => Some(Self::Bonus),
            "DEDUCTION" => Some(Self::Deduction),
            "LOGISTICS" => Some(Self::Logistics),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// One line item. `code` is unique within its settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownItem {
    pub id: BreakdownItemId,
    pub settlement_id: SettlementId,
    pub code: String,
    pub title: String,
    pub category: BreakdownCategory,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl BreakdownItem {
    fn new(
        settlement_id: SettlementId,
        code: &str,
        title: &str,
        category: BreakdownCategory,
        amount: i64,
    ) -> Self {
        Self {
            id: BreakdownItemId::new(),
            settlement_id,
            code: code.to_string(),
            title: title.to_string(),
            category,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// The default items for a settlement.
pub fn default_items(settlement: &Settlement) -> Vec<BreakdownItem> {
    vec![
        BreakdownItem::new(
            settlement.id,
            MIN_BASE_CODE,
            "Guaranteed minimum",
            BreakdownCategory::Min,
            settlement.amount_min,
        ),
        BreakdownItem::new(
            settlement.id,
            BONUS_GRADE_CODE,
            "Grade bonus",
            BreakdownCategory::Bonus,
            settlement.amount_bonus,
        ),
    ]
}

/// Default items whose codes are not yet present in `existing`.
pub fn missing_default_items(
    settlement: &Settlement,
    existing: &[BreakdownItem],
) -> Vec<BreakdownItem> {
    default_items(settlement)
        .into_iter()
        .filter(|item| !existing.iter().any(|e| e.code == item.code))
        .collect()
}

/// Per-category totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakdownSummary {
    pub min: i64,
    pub bonus: i64,
    pub deduction: i64,
    /// Logistics and other items.
    pub other: i64,
    pub total: i64,
}

/// Sum items by category.
pub fn summarize(items: &[BreakdownItem]) -> BreakdownSummary {
    items.iter().fold(BreakdownSummary::default(), |mut acc, item| {
        match item.category {
            BreakdownCategory::Min => acc.min += item.amount,
            BreakdownCategory::Bonus => acc.bonus += item.amount,
            BreakdownCategory::Deduction => acc.deduction += item.amount,
            BreakdownCategory::Logistics | BreakdownCategory::Other => acc.other += item.amount,
        }
        acc.total += item.amount;
        acc
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyDetails {
    pub min_ok: bool,
    pub bonus_ok: bool,
    pub total_ok: bool,
}

/// Result of comparing items against the settlement amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consistency {
    pub ok: bool,
    pub rule: String,
    pub details: ConsistencyDetails,
}

/// Compare item sums against the settlement's stored amounts.
///
/// Amounts are integral minor units, so the comparison is exact: an item set
/// one unit short of the total is inconsistent.
pub fn check_consistency(settlement: &Settlement, items: &[BreakdownItem]) -> Consistency {
    let min_sum: i64 = items
        .iter()
        .filter(|i| i.category == BreakdownCategory::Min)
        .map(|i| i.amount)
        .sum();
    let non_min_sum: i64 = items
        .iter()
        .filter(|i| i.category != BreakdownCategory::Min)
        .map(|i| i.amount)
        .sum();
    let details = ConsistencyDetails {
        min_ok: min_sum == settlement.amount_min,
        bonus_ok: non_min_sum == settlement.amount_bonus,
        total_ok: min_sum + non_min_sum == settlement.amount_total,
    };
    Consistency {
        ok: details.min_ok && details.bonus_ok && details.total_ok,
        rule: CONSISTENCY_RULE.to_string(),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::SettlementAmounts;
    use evscrap_core::{TargetRef, TargetType, TenantId};

    fn settlement(total: i64, min: i64, bonus: i64) -> Settlement {
        Settlement::new(
            TenantId::new("t").unwrap(),
            TargetRef::new(TargetType::Case, uuid::Uuid::new_v4()),
            SettlementAmounts {
                total,
                min: Some(min),
                bonus: Some(bonus),
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_consistent_when_amounts_add_up() {
        let s = settlement(100_000, 80_000, 20_000);
        let items = default_items(&s);
        let codes: Vec<_> = items.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec![MIN_BASE_CODE, BONUS_GRADE_CODE]);
        let c = check_consistency(&s, &items);
        assert!(c.ok);
        assert_eq!(c.rule, CONSISTENCY_RULE);
    }

    #[test]
    fn one_unit_short_of_total_is_inconsistent() {
        let s = settlement(100_000, 80_000, 20_000);
        let mut items = default_items(&s);
        items[1].amount = 19_999;
        let c = check_consistency(&s, &items);
        assert!(!c.ok);
        assert!(c.details.min_ok);
        assert!(!c.details.bonus_ok);
        assert!(!c.details.total_ok);
        assert_eq!(
            c.rule,
            "amount_min=sum(MIN); amount_bonus=sum(NON_MIN); amount_total=sum(ALL)"
        );
    }

    #[test]
    fn inconsistent_settlement_amounts_are_reported() {
        // total != min + bonus: defaults mirror the stored amounts, so the total check fails.
        let s = settlement(100_000, 70_000, 20_000);
        let c = check_consistency(&s, &default_items(&s));
        assert!(c.details.min_ok && c.details.bonus_ok);
        assert!(!c.details.total_ok);
        assert!(!c.ok);
    }

    #[test]
    fn regeneration_only_adds_missing_codes() {
        let s = settlement(10, 10, 0);
        let existing = vec![default_items(&s).remove(0)];
        let missing = missing_default_items(&s, &existing);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].code, BONUS_GRADE_CODE);

        let mut all = existing;
        all.extend(missing);
        assert!(missing_default_items(&s, &all).is_empty());
    }

    #[test]
    fn summary_groups_by_category() {
        let s = settlement(1_000, 800, 200);
        let mut items = default_items(&s);
        items.push(BreakdownItem::new(
            s.id,
            "FREIGHT",
            "Freight",
            BreakdownCategory::Logistics,
            -50,
        ));
        items.push(BreakdownItem::new(
            s.id,
            "DAMAGE",
            "Damage deduction",
            BreakdownCategory::Deduction,
            -30,
        ));
        let sum = summarize(&items);
        assert_eq!(sum.min, 800);
        assert_eq!(sum.bonus, 200);
        assert_eq!(sum.deduction, -30);
        assert_eq!(sum.other, -50);
        assert_eq!(sum.total, 920);
    }

    #[test]
    fn category_names_roundtrip() {
        for c in [
            BreakdownCategory::Min,
            BreakdownCategory::Bonus,
            BreakdownCategory::Deduction,
            BreakdownCategory::Logistics,
            BreakdownCategory::Other,
        ] {
            assert_eq!(BreakdownCategory::parse(c.as_str()), Some(c));
        }
    }
}
