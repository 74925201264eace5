use crate::schemas::{ExpenseId, GroupId, UserId};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    User(UserId),
    Group(GroupId),
    Expense(ExpenseId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User(id) => write!(f, "user '{id}'"),
            Entity::Group(id) => write!(f, "group '{id}'"),
            Entity::Expense(id) => write!(f, "expense '{id}'"),
        }
    }
}

/// Failures of the persistence layer. These are infrastructure faults and
/// are never retried inside the ledger.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("BSON serialization error: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("Write conflict: {0}")]
    Conflict(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Split amounts add up to {computed} but the expense total is {expected}")]
    SplitMismatch { computed: Decimal, expected: Decimal },

    #[error("Expense '{expense}' does not belong to {}", describe_group(.group))]
    OwnershipMismatch {
        expense: ExpenseId,
        group: Option<GroupId>,
    },

    #[error("Could not find {0}")]
    NotFound(Entity),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("You do not have access to this {0}")]
    AccessDenied(&'static str),

    #[error("Invalid username or password.")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_group(group: &Option<GroupId>) -> String {
    match group {
        Some(id) => format!("group '{id}'"),
        None => "your personal expenses".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn split_mismatch_message_carries_both_totals() {
        let err = LedgerError::SplitMismatch {
            computed: dec!(25.00),
            expected: dec!(30.00),
        };
        assert_eq!(
            err.to_string(),
            "Split amounts add up to 25.00 but the expense total is 30.00"
        );
    }

    #[test]
    fn ownership_message_names_the_context() {
        let err = LedgerError::OwnershipMismatch {
            expense: ExpenseId::new("e1"),
            group: Some(GroupId::new("g1")),
        };
        assert_eq!(err.to_string(), "Expense 'e1' does not belong to group 'g1'");

        let err = LedgerError::OwnershipMismatch {
            expense: ExpenseId::new("e1"),
            group: None,
        };
        assert_eq!(
            err.to_string(),
            "Expense 'e1' does not belong to your personal expenses"
        );
    }
}
