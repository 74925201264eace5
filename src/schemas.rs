use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(UserId);
string_id!(GroupId);
string_id!(ExpenseId);

/// Requested owed amount per participant.
pub type Shares = BTreeMap<UserId, Decimal>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
}

/// Login secret of a user, kept apart from `User` so it never leaves the store.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Credential {
    pub user_id: UserId,
    /// bcrypt hash, never the plaintext.
    pub password_hash: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: Option<String>,
    pub is_friend_group: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Membership {
    pub user_id: UserId,
    pub group_id: GroupId,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub description: String,
    pub amount: Decimal,
    pub payer: UserId,
    /// `None` for personal expenses between two users.
    pub group_id: Option<GroupId>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every edit; a replace only lands on the version it was read at.
    #[serde(default)]
    pub version: i64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Split {
    pub expense_id: ExpenseId,
    pub user_id: UserId,
    pub owed_amount: Decimal,
}

/// An expense together with every split that references it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseRecord {
    pub expense: Expense,
    pub splits: Vec<Split>,
}

impl ExpenseRecord {
    /// The payer plus every user holding a split.
    pub fn participants(&self) -> BTreeSet<&UserId> {
        self.splits
            .iter()
            .map(|split| &split.user_id)
            .chain(std::iter::once(&self.expense.payer))
            .collect()
    }

    pub fn owed_by(&self, user: &UserId) -> Decimal {
        self.splits
            .iter()
            .filter(|split| &split.user_id == user)
            .map(|split| split.owed_amount)
            .sum()
    }

    pub fn split_total(&self) -> Decimal {
        self.splits.iter().map(|split| split.owed_amount).sum()
    }
}
