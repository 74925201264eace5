//! Balances derived from expenses and their splits.
//!
//! Every function here is a pure fold over already loaded records, so the
//! result only depends on the records passed in. Positive values mean the
//! user is owed money, negative values mean the user owes. Nothing is rounded
//! here: callers round once when presenting the value.

use crate::schemas::{ExpenseRecord, GroupId, UserId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

pub type Balance = BTreeMap<UserId, Decimal>;

/// Amount paid minus amount owed by `user`, over a single expense.
pub fn expense_balance(user: &UserId, record: &ExpenseRecord) -> Decimal {
    let paid = if &record.expense.payer == user {
        record.expense.amount
    } else {
        Decimal::ZERO
    };
    paid - record.owed_by(user)
}

fn balance_over<'a>(
    user: &UserId,
    expenses: impl IntoIterator<Item = &'a ExpenseRecord>,
) -> Decimal {
    expenses
        .into_iter()
        .map(|record| expense_balance(user, record))
        .sum()
}

pub fn user_balance_in_group(user: &UserId, group: &GroupId, expenses: &[ExpenseRecord]) -> Decimal {
    balance_over(
        user,
        expenses
            .iter()
            .filter(|record| record.expense.group_id.as_ref() == Some(group)),
    )
}

/// Balance over the user's groupless expenses.
pub fn personal_balance(user: &UserId, expenses: &[ExpenseRecord]) -> Decimal {
    balance_over(
        user,
        expenses
            .iter()
            .filter(|record| record.expense.group_id.is_none()),
    )
}

/// Sum of the user's balance in each of `groups` plus the personal balance.
pub fn user_net_balance(user: &UserId, groups: &[GroupId], expenses: &[ExpenseRecord]) -> Decimal {
    let groups: BTreeSet<&GroupId> = groups.iter().collect();
    let in_groups: Decimal = groups
        .into_iter()
        .map(|group| user_balance_in_group(user, group, expenses))
        .sum();
    in_groups + personal_balance(user, expenses)
}

/// What `other` owes `user` through expenses that involve exactly the two of
/// them. Expenses with a third participant never count, even when all three
/// share a group.
pub fn pairwise_balance(user: &UserId, other: &UserId, expenses: &[ExpenseRecord]) -> Decimal {
    if user == other {
        return Decimal::ZERO;
    }
    let pair: BTreeSet<&UserId> = [user, other].into_iter().collect();
    balance_over(
        user,
        expenses
            .iter()
            .filter(|record| record.participants() == pair),
    )
}

/// Per-user balances over a set of expenses, usually one group's.
pub fn compute_balance_from_group(expenses: &[ExpenseRecord]) -> Balance {
    let mut balance = Balance::new();
    for record in expenses {
        let amount = record.expense.amount;
        balance
            .entry(record.expense.payer.clone())
            .and_modify(|v| *v += amount)
            .or_insert(amount);
        for split in &record.splits {
            balance
                .entry(split.user_id.clone())
                .and_modify(|v| *v -= split.owed_amount)
                .or_insert(-split.owed_amount);
        }
    }
    balance
}
