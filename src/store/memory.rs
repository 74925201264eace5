use super::{EntityStore, LedgerWrite, StoreResult};
use crate::error::StoreError;
use crate::schemas::{
    Credential, Expense, ExpenseId, ExpenseRecord, Group, GroupId, Split, User, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    credentials: HashMap<UserId, Credential>,
    groups: HashMap<GroupId, Group>,
    memberships: BTreeSet<(GroupId, UserId)>,
    expenses: HashMap<ExpenseId, Expense>,
    splits: BTreeMap<(ExpenseId, UserId), Split>,
}

impl Tables {
    fn splits_of(&self, id: &ExpenseId) -> Vec<Split> {
        self.splits
            .values()
            .filter(|split| &split.expense_id == id)
            .cloned()
            .collect()
    }

    fn record(&self, expense: &Expense) -> ExpenseRecord {
        ExpenseRecord {
            expense: expense.clone(),
            splits: self.splits_of(&expense.id),
        }
    }

    fn write(&mut self, write: LedgerWrite) -> StoreResult<()> {
        match write {
            LedgerWrite::InsertUser(user) => {
                if self.users.contains_key(&user.id)
                    || self.users.values().any(|u| u.username == user.username)
                {
                    return Err(conflict(format!("user '{}' already exists", user.username)));
                }
                self.users.insert(user.id.clone(), user);
            }
            LedgerWrite::InsertCredential(credential) => {
                if !self.users.contains_key(&credential.user_id) {
                    return Err(conflict(format!(
                        "credential references unknown user '{}'",
                        credential.user_id
                    )));
                }
                if self.credentials.contains_key(&credential.user_id) {
                    return Err(conflict(format!(
                        "user '{}' already has a credential",
                        credential.user_id
                    )));
                }
                self.credentials.insert(credential.user_id.clone(), credential);
            }
            LedgerWrite::InsertGroup(group) => {
                if self.groups.contains_key(&group.id) {
                    return Err(conflict(format!("group '{}' already exists", group.id)));
                }
                self.groups.insert(group.id.clone(), group);
            }
            LedgerWrite::InsertMembership(membership) => {
                if !self
                    .memberships
                    .insert((membership.group_id.clone(), membership.user_id.clone()))
                {
                    return Err(conflict(format!(
                        "user '{}' is already a member of group '{}'",
                        membership.user_id, membership.group_id
                    )));
                }
            }
            LedgerWrite::DeleteMembership(membership) => {
                if !self
                    .memberships
                    .remove(&(membership.group_id.clone(), membership.user_id.clone()))
                {
                    return Err(conflict(format!(
                        "user '{}' is not a member of group '{}'",
                        membership.user_id, membership.group_id
                    )));
                }
            }
            LedgerWrite::InsertExpense(expense) => {
                if self.expenses.contains_key(&expense.id) {
                    return Err(conflict(format!("expense '{}' already exists", expense.id)));
                }
                self.expenses.insert(expense.id.clone(), expense);
            }
            LedgerWrite::ReplaceExpense {
                expense,
                expected_version,
            } => match self.expenses.get_mut(&expense.id) {
                Some(existing) if existing.version == expected_version => *existing = expense,
                Some(existing) => {
                    return Err(conflict(format!(
                        "expense '{}' is at version {}, not {expected_version}",
                        expense.id, existing.version
                    )))
                }
                None => return Err(conflict(format!("expense '{}' does not exist", expense.id))),
            },
            LedgerWrite::DeleteExpense(id) => {
                if self.splits.keys().any(|(expense_id, _)| expense_id == &id) {
                    return Err(conflict(format!("expense '{id}' still has splits")));
                }
                if self.expenses.remove(&id).is_none() {
                    return Err(conflict(format!("expense '{id}' does not exist")));
                }
            }
            LedgerWrite::InsertSplit(split) => {
                if !self.expenses.contains_key(&split.expense_id) {
                    return Err(conflict(format!(
                        "split references unknown expense '{}'",
                        split.expense_id
                    )));
                }
                let key = (split.expense_id.clone(), split.user_id.clone());
                if self.splits.contains_key(&key) {
                    return Err(conflict(format!(
                        "user '{}' already has a split on expense '{}'",
                        split.user_id, split.expense_id
                    )));
                }
                self.splits.insert(key, split);
            }
            LedgerWrite::UpdateSplit(split) => {
                let key = (split.expense_id.clone(), split.user_id.clone());
                match self.splits.get_mut(&key) {
                    Some(existing) => *existing = split,
                    None => {
                        return Err(conflict(format!(
                            "user '{}' has no split on expense '{}'",
                            split.user_id, split.expense_id
                        )))
                    }
                }
            }
            LedgerWrite::DeleteSplit {
                expense_id,
                user_id,
            } => {
                if self.splits.remove(&(expense_id.clone(), user_id.clone())).is_none() {
                    return Err(conflict(format!(
                        "user '{user_id}' has no split on expense '{expense_id}'"
                    )));
                }
            }
            LedgerWrite::DeleteSplitsOf(id) => {
                self.splits.retain(|(expense_id, _), _| expense_id != &id);
            }
        }
        Ok(())
    }
}

fn conflict(message: String) -> StoreError {
    StoreError::Conflict(message)
}

/// Entity store kept in process memory. Writers take the table lock, apply
/// the batch to a copy and swap it in only when every write succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn get_credential(&self, user: &UserId) -> StoreResult<Option<Credential>> {
        Ok(self.tables.read().await.credentials.get(user).cloned())
    }

    async fn get_group(&self, id: &GroupId) -> StoreResult<Option<Group>> {
        Ok(self.tables.read().await.groups.get(id).cloned())
    }

    async fn group_members(&self, group: &GroupId) -> StoreResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|(group_id, _)| group_id == group)
            .map(|(_, user_id)| user_id.clone())
            .collect())
    }

    async fn user_groups(&self, user: &UserId) -> StoreResult<Vec<GroupId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|(_, user_id)| user_id == user)
            .map(|(group_id, _)| group_id.clone())
            .collect())
    }

    async fn get_expense(&self, id: &ExpenseId) -> StoreResult<Option<ExpenseRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.expenses.get(id).map(|expense| tables.record(expense)))
    }

    async fn expense_splits(&self, id: &ExpenseId) -> StoreResult<Vec<Split>> {
        Ok(self.tables.read().await.splits_of(id))
    }

    async fn group_expenses(&self, group: &GroupId) -> StoreResult<Vec<ExpenseRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .expenses
            .values()
            .filter(|expense| expense.group_id.as_ref() == Some(group))
            .map(|expense| tables.record(expense))
            .collect())
    }

    async fn user_expenses(&self, user: &UserId) -> StoreResult<Vec<ExpenseRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .expenses
            .values()
            .filter(|expense| {
                &expense.payer == user
                    || tables.splits.contains_key(&(expense.id.clone(), user.clone()))
            })
            .map(|expense| tables.record(expense))
            .collect())
    }

    async fn apply(&self, batch: Vec<LedgerWrite>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for write in batch {
            staged.write(write)?;
        }
        *tables = staged;
        Ok(())
    }
}
