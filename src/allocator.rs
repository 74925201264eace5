use crate::error::{LedgerError, Result};
use crate::money::{ensure_non_negative, round_to_2_decimals};
use crate::schemas::{Expense, Shares, Split, UserId};
use crate::store::LedgerWrite;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};

/// Splits to persist for a new expense.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub splits: Vec<Split>,
    pub total: Decimal,
}

impl Allocation {
    pub fn into_writes(self) -> Vec<LedgerWrite> {
        self.splits.into_iter().map(LedgerWrite::InsertSplit).collect()
    }
}

/// Difference between an expense's current splits and the requested shares.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reallocation {
    pub inserted: Vec<Split>,
    pub updated: Vec<Split>,
    pub removed: Vec<UserId>,
    pub total: Decimal,
}

impl Reallocation {
    pub fn into_writes(self, expense: &Expense) -> Vec<LedgerWrite> {
        let removed = self.removed.into_iter().map(|user_id| LedgerWrite::DeleteSplit {
            expense_id: expense.id.clone(),
            user_id,
        });
        let updated = self.updated.into_iter().map(LedgerWrite::UpdateSplit);
        let inserted = self.inserted.into_iter().map(LedgerWrite::InsertSplit);
        removed.chain(updated).chain(inserted).collect()
    }
}

/// Validates the requested shares against the expense amount and turns the
/// non-zero ones into splits. Zero shares are accepted but produce no row.
pub fn allocate(
    expense: &Expense,
    candidates: &BTreeSet<UserId>,
    shares: &Shares,
) -> Result<Allocation> {
    let total = validate_shares(expense, candidates, shares)?;
    let splits = shares
        .iter()
        .filter(|(_, owed)| !owed.is_zero())
        .map(|(user_id, owed)| Split {
            expense_id: expense.id.clone(),
            user_id: user_id.clone(),
            owed_amount: *owed,
        })
        .collect();
    Ok(Allocation { splits, total })
}

/// Diffs the requested shares against the existing splits of an expense.
///
/// The requested shares describe the complete new split set: an existing
/// split whose user is missing from `shares`, or whose new share is zero, is
/// removed. Splits present on both sides are updated in place when the amount
/// changed, and newly non-zero shares are inserted.
pub fn reallocate(
    expense: &Expense,
    existing: &[Split],
    candidates: &BTreeSet<UserId>,
    shares: &Shares,
) -> Result<Reallocation> {
    let total = validate_shares(expense, candidates, shares)?;
    let current: HashMap<&UserId, &Split> =
        existing.iter().map(|split| (&split.user_id, split)).collect();

    let mut reallocation = Reallocation {
        total,
        ..Reallocation::default()
    };

    for split in existing {
        let requested = shares.get(&split.user_id).copied().unwrap_or(Decimal::ZERO);
        if requested.is_zero() {
            reallocation.removed.push(split.user_id.clone());
        }
    }

    for (user_id, owed) in shares.iter().filter(|(_, owed)| !owed.is_zero()) {
        let split = Split {
            expense_id: expense.id.clone(),
            user_id: user_id.clone(),
            owed_amount: *owed,
        };
        match current.get(user_id) {
            Some(previous) if previous.owed_amount == *owed => {}
            Some(_) => reallocation.updated.push(split),
            None => reallocation.inserted.push(split),
        }
    }

    Ok(reallocation)
}

fn validate_shares(
    expense: &Expense,
    candidates: &BTreeSet<UserId>,
    shares: &Shares,
) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for (user_id, owed) in shares {
        ensure_non_negative(*owed)?;
        if !owed.is_zero() && !candidates.contains(user_id) {
            return Err(LedgerError::InvalidInput(format!(
                "user '{user_id}' cannot take part in this expense"
            )));
        }
        total = total
            .checked_add(*owed)
            .ok_or_else(|| LedgerError::InvalidInput("shares add up to too much".to_string()))?;
    }
    check_total(total, expense.amount)?;
    if !shares.values().any(|owed| *owed > Decimal::ZERO) {
        return Err(LedgerError::InvalidInput(
            "an expense needs at least one share".to_string(),
        ));
    }
    Ok(total)
}

/// Both sides are compared after rounding to cents.
pub fn check_total(total: Decimal, amount: Decimal) -> Result<()> {
    let computed = round_to_2_decimals(total);
    let expected = round_to_2_decimals(amount);
    if computed != expected {
        return Err(LedgerError::SplitMismatch { computed, expected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ExpenseId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn expense(amount: Decimal) -> Expense {
        Expense {
            id: ExpenseId::new("e1"),
            description: "Groceries".to_string(),
            amount,
            payer: UserId::new("alice"),
            group_id: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    fn members(names: &[&str]) -> BTreeSet<UserId> {
        names.iter().map(|name| UserId::new(*name)).collect()
    }

    fn shares(entries: &[(&str, Decimal)]) -> Shares {
        entries
            .iter()
            .map(|(name, owed)| (UserId::new(*name), *owed))
            .collect()
    }

    fn split(user: &str, owed: Decimal) -> Split {
        Split {
            expense_id: ExpenseId::new("e1"),
            user_id: UserId::new(user),
            owed_amount: owed,
        }
    }

    #[test]
    fn allocates_one_split_per_positive_share() {
        let allocation = allocate(
            &expense(dec!(30.00)),
            &members(&["alice", "bob", "carol"]),
            &shares(&[("alice", dec!(10.00)), ("bob", dec!(20.00)), ("carol", dec!(0))]),
        )
        .unwrap();

        assert_eq!(allocation.total, dec!(30.00));
        assert_eq!(
            allocation.splits,
            vec![split("alice", dec!(10.00)), split("bob", dec!(20.00))]
        );
    }

    #[test]
    fn mismatch_reports_rounded_totals() {
        let err = allocate(
            &expense(dec!(30.00)),
            &members(&["alice", "bob"]),
            &shares(&[("alice", dec!(10.004)), ("bob", dec!(15))]),
        )
        .unwrap_err();

        match err {
            LedgerError::SplitMismatch { computed, expected } => {
                assert_eq!(computed, dec!(25.00));
                assert_eq!(expected, dec!(30.00));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn totals_within_a_cent_of_rounding_are_accepted() {
        let allocation = allocate(
            &expense(dec!(10)),
            &members(&["alice", "bob", "carol"]),
            &shares(&[("alice", dec!(3.333)), ("bob", dec!(3.333)), ("carol", dec!(3.333))]),
        )
        .unwrap();
        assert_eq!(allocation.total, dec!(9.999));
    }

    #[test]
    fn negative_shares_are_invalid_input() {
        let err = allocate(
            &expense(dec!(10)),
            &members(&["alice", "bob"]),
            &shares(&[("alice", dec!(15)), ("bob", dec!(-5))]),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn outsiders_cannot_owe_anything() {
        let err = allocate(
            &expense(dec!(10)),
            &members(&["alice"]),
            &shares(&[("alice", dec!(5)), ("mallory", dec!(5))]),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        // A zero entry for an outsider is harmless.
        allocate(
            &expense(dec!(10)),
            &members(&["alice"]),
            &shares(&[("alice", dec!(10)), ("mallory", dec!(0))]),
        )
        .unwrap();
    }

    #[test]
    fn oversized_shares_are_invalid_input() {
        let err = allocate(
            &expense(dec!(30)),
            &members(&["alice", "bob"]),
            &shares(&[("alice", Decimal::MAX), ("bob", Decimal::MAX)]),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn sub_cent_expense_without_shares_is_rejected() {
        let err = allocate(
            &expense(dec!(0.004)),
            &members(&["alice"]),
            &shares(&[("alice", dec!(0))]),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn reallocation_diffs_against_existing_splits() {
        let existing = vec![
            split("alice", dec!(10)),
            split("bob", dec!(10)),
            split("carol", dec!(10)),
        ];
        let reallocation = reallocate(
            &expense(dec!(30)),
            &existing,
            &members(&["alice", "bob", "carol", "dave"]),
            &shares(&[
                ("alice", dec!(10)),
                ("bob", dec!(0)),
                ("carol", dec!(15)),
                ("dave", dec!(5)),
            ]),
        )
        .unwrap();

        assert_eq!(reallocation.removed, vec![UserId::new("bob")]);
        assert_eq!(reallocation.updated, vec![split("carol", dec!(15))]);
        assert_eq!(reallocation.inserted, vec![split("dave", dec!(5))]);
        assert_eq!(reallocation.total, dec!(30));
    }

    #[test]
    fn users_missing_from_the_request_lose_their_split() {
        let existing = vec![split("alice", dec!(15)), split("bob", dec!(15))];
        let reallocation = reallocate(
            &expense(dec!(30)),
            &existing,
            &members(&["alice", "bob"]),
            &shares(&[("alice", dec!(30))]),
        )
        .unwrap();

        assert_eq!(reallocation.removed, vec![UserId::new("bob")]);
        assert_eq!(reallocation.updated, vec![split("alice", dec!(30))]);
        assert!(reallocation.inserted.is_empty());
    }

    #[test]
    fn reallocation_writes_remove_before_insert() {
        let existing = vec![split("bob", dec!(30))];
        let exp = expense(dec!(30));
        let writes = reallocate(
            &exp,
            &existing,
            &members(&["alice", "bob"]),
            &shares(&[("alice", dec!(30))]),
        )
        .unwrap()
        .into_writes(&exp);

        assert_eq!(
            writes,
            vec![
                LedgerWrite::DeleteSplit {
                    expense_id: ExpenseId::new("e1"),
                    user_id: UserId::new("bob"),
                },
                LedgerWrite::InsertSplit(split("alice", dec!(30))),
            ]
        );
    }

    #[test]
    fn failed_reallocation_produces_nothing() {
        let existing = vec![split("alice", dec!(15)), split("bob", dec!(15))];
        let result = reallocate(
            &expense(dec!(30)),
            &existing,
            &members(&["alice", "bob"]),
            &shares(&[("alice", dec!(15)), ("bob", dec!(10))]),
        );
        assert!(matches!(result, Err(LedgerError::SplitMismatch { .. })));
    }
}
