//! Splits warehouse item remainders across a trip.
//!
//! `plan_dispatch` never touches the database: callers load the current
//! stock, build a plan, then apply every allocation inside one transaction.

use std::collections::HashMap;

use serde::Serialize;

/// Current stock of one branch entry line.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStock {
    pub item_id: String,
    pub entry_id: String,
    pub quantity: i64,
    pub dispatched: i64,
}

impl ItemStock {
    pub fn remaining(&self) -> i64 {
        self.quantity - self.dispatched
    }
}

/// A caller request; `quantity: None` means "everything still on hand".
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchLine {
    pub item_id: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub item_id: String,
    pub entry_id: String,
    pub quantity: i64,
    /// Remainder left on the item after this allocation.
    pub remaining_after: i64,
    /// The request asked for more than was left and was cut down.
    pub clamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownItem,
    FullyDispatched,
    NonPositiveQuantity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub item_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchPlan {
    pub allocations: Vec<Allocation>,
    pub skipped: Vec<Skipped>,
}

impl DispatchPlan {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn total_quantity(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }
}

pub fn plan_dispatch(stock: &[ItemStock], lines: &[DispatchLine]) -> DispatchPlan {
    let by_id: HashMap<&str, &ItemStock> = stock.iter().map(|s| (s.item_id.as_str(), s)).collect();
    // Running remainder so repeated lines for one item draw from the same pool.
    let mut remaining: HashMap<&str, i64> = HashMap::new();
    let mut plan = DispatchPlan::default();

    for line in lines {
        let Some(item) = by_id.get(line.item_id.as_str()) else {
            plan.skipped.push(Skipped {
                item_id: line.item_id.clone(),
                reason: SkipReason::UnknownItem,
            });
            continue;
        };

        let left = remaining
            .entry(item.item_id.as_str())
            .or_insert_with(|| item.remaining());

        if *left <= 0 {
            plan.skipped.push(Skipped {
                item_id: line.item_id.clone(),
                reason: SkipReason::FullyDispatched,
            });
            continue;
        }

        let requested = line.quantity.unwrap_or(*left);
        if requested <= 0 {
            plan.skipped.push(Skipped {
                item_id: line.item_id.clone(),
                reason: SkipReason::NonPositiveQuantity,
            });
            continue;
        }

        let quantity = requested.min(*left);
        *left -= quantity;
        plan.allocations.push(Allocation {
            item_id: item.item_id.clone(),
            entry_id: item.entry_id.clone(),
            quantity,
            remaining_after: *left,
            clamped: requested > quantity,
        });
    }

    plan
}

/// Expands whole entries into one "take everything" line per item.
pub fn lines_for_entries(stock: &[ItemStock], entry_ids: &[String]) -> Vec<DispatchLine> {
    stock
        .iter()
        .filter(|s| entry_ids.iter().any(|e| *e == s.entry_id))
        .map(|s| DispatchLine {
            item_id: s.item_id.clone(),
            quantity: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(item: &str, entry: &str, quantity: i64, dispatched: i64) -> ItemStock {
        ItemStock {
            item_id: item.to_string(),
            entry_id: entry.to_string(),
            quantity,
            dispatched,
        }
    }

    fn line(item: &str, quantity: Option<i64>) -> DispatchLine {
        DispatchLine {
            item_id: item.to_string(),
            quantity,
        }
    }

    #[test]
    fn missing_quantity_takes_the_remainder() {
        let items = [stock("a", "e1", 10, 4)];
        let plan = plan_dispatch(&items, &[line("a", None)]);
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].quantity, 6);
        assert_eq!(plan.allocations[0].remaining_after, 0);
        assert!(!plan.allocations[0].clamped);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn partial_request_leaves_the_rest() {
        let items = [stock("a", "e1", 10, 0)];
        let plan = plan_dispatch(&items, &[line("a", Some(3))]);
        assert_eq!(plan.allocations[0].quantity, 3);
        assert_eq!(plan.allocations[0].remaining_after, 7);
    }

    #[test]
    fn over_request_is_clamped() {
        let items = [stock("a", "e1", 5, 2)];
        let plan = plan_dispatch(&items, &[line("a", Some(50))]);
        assert_eq!(plan.allocations[0].quantity, 3);
        assert!(plan.allocations[0].clamped);
    }

    #[test]
    fn skips_non_positive_remainders_and_requests() {
        let items = [stock("done", "e1", 5, 5), stock("over", "e1", 5, 7), stock("ok", "e1", 5, 0)];
        let plan = plan_dispatch(
            &items,
            &[line("done", None), line("over", Some(1)), line("ok", Some(0)), line("ghost", None)],
        );
        assert!(plan.is_empty());
        let reasons: Vec<SkipReason> = plan.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::FullyDispatched,
                SkipReason::FullyDispatched,
                SkipReason::NonPositiveQuantity,
                SkipReason::UnknownItem,
            ]
        );
    }

    #[test]
    fn repeated_lines_share_one_remainder() {
        let items = [stock("a", "e1", 10, 0)];
        let plan = plan_dispatch(&items, &[line("a", Some(6)), line("a", Some(6)), line("a", None)]);
        let quantities: Vec<i64> = plan.allocations.iter().map(|a| a.quantity).collect();
        assert_eq!(quantities, vec![6, 4]);
        assert!(plan.allocations[1].clamped);
        assert_eq!(plan.skipped[0].reason, SkipReason::FullyDispatched);
        assert_eq!(plan.total_quantity(), 10);
    }

    #[test]
    fn entry_expansion_only_picks_listed_entries() {
        let items = [stock("a", "e1", 3, 0), stock("b", "e2", 4, 1), stock("c", "e1", 2, 2)];
        let lines = lines_for_entries(&items, &["e1".to_string()]);
        assert_eq!(lines, vec![line("a", None), line("c", None)]);

        let plan = plan_dispatch(&items, &lines);
        assert_eq!(plan.total_quantity(), 3);
        assert_eq!(plan.skipped.len(), 1);
    }
}
