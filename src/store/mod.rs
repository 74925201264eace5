mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::error::StoreError;
use crate::schemas::{
    Credential, Expense, ExpenseId, ExpenseRecord, Group, GroupId, Membership, Split, User,
    UserId,
};
use async_trait::async_trait;

/// One row-level change. A ledger mutation is a batch of these and the store
/// applies the whole batch or none of it.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerWrite {
    InsertUser(User),
    InsertCredential(Credential),
    InsertGroup(Group),
    InsertMembership(Membership),
    DeleteMembership(Membership),
    InsertExpense(Expense),
    /// Fails with a conflict unless the stored expense is still at
    /// `expected_version`.
    ReplaceExpense {
        expense: Expense,
        expected_version: i64,
    },
    DeleteExpense(ExpenseId),
    InsertSplit(Split),
    UpdateSplit(Split),
    DeleteSplit { expense_id: ExpenseId, user_id: UserId },
    DeleteSplitsOf(ExpenseId),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn get_credential(&self, user: &UserId) -> StoreResult<Option<Credential>>;

    async fn get_group(&self, id: &GroupId) -> StoreResult<Option<Group>>;

    async fn group_members(&self, group: &GroupId) -> StoreResult<Vec<UserId>>;

    async fn user_groups(&self, user: &UserId) -> StoreResult<Vec<GroupId>>;

    async fn get_expense(&self, id: &ExpenseId) -> StoreResult<Option<ExpenseRecord>>;

    async fn expense_splits(&self, id: &ExpenseId) -> StoreResult<Vec<Split>>;

    async fn group_expenses(&self, group: &GroupId) -> StoreResult<Vec<ExpenseRecord>>;

    /// Every expense the user paid or holds a split in, across all contexts.
    async fn user_expenses(&self, user: &UserId) -> StoreResult<Vec<ExpenseRecord>>;

    async fn apply(&self, batch: Vec<LedgerWrite>) -> StoreResult<()>;
}
