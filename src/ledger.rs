//! Expense mutations and the read views built on top of them.
//!
//! Every mutation validates and stages its rows first, then hands the whole
//! batch to the store in one `apply` call. A validation failure returns
//! before anything is written; a store failure leaves no partial rows.

use crate::allocator;
use crate::balance::{
    compute_balance_from_group, pairwise_balance, user_balance_in_group, user_net_balance,
};
use crate::error::{Entity, LedgerError, Result};
use crate::exchange::{get_exchanges_from_group, Exchange};
use crate::money::{ensure_positive, round_to_2_decimals};
use crate::schemas::{
    Expense, ExpenseId, ExpenseRecord, Group, GroupId, Shares, User, UserId,
};
use crate::store::{EntityStore, LedgerWrite};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A new expense as submitted by a collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseDraft {
    pub description: String,
    pub amount: Decimal,
    pub payer: UserId,
    pub group_id: Option<GroupId>,
    pub shares: Shares,
}

/// Replacement fields for an existing expense. `shares` is the full new split.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseEdit {
    pub description: String,
    pub amount: Decimal,
    pub payer: UserId,
    pub shares: Shares,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub expense_id: ExpenseId,
    pub description: String,
    /// Positive when the counterparty owes the user.
    pub signed_amount: Decimal,
    pub counterparty_name: String,
    pub group_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupBalance {
    pub group: Group,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Friend {
    pub group_id: GroupId,
    pub user: User,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FriendBalance {
    pub friend: Friend,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overview {
    pub net_balance: Decimal,
    pub groups: Vec<GroupBalance>,
    pub friends: Vec<FriendBalance>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberBalance {
    pub user: User,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupView {
    pub group: Group,
    pub balance: Decimal,
    pub members: Vec<MemberBalance>,
    pub expenses: Vec<ExpenseRecord>,
    pub settlements: Vec<Exchange>,
}

#[derive(Clone)]
pub struct Ledger {
    pub(crate) store: Arc<dyn EntityStore>,
    clock: Clock,
    pub(crate) password_cost: u32,
}

impl Ledger {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::with_clock(store, Utc::now)
    }

    pub fn with_clock(
        store: Arc<dyn EntityStore>,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock: Arc::new(clock),
            password_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// bcrypt cost for new credentials. Lower costs only make sense in tests.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    #[tracing::instrument(skip_all, fields(actor = %actor, group = ?draft.group_id))]
    pub async fn create_expense(&self, actor: &UserId, draft: ExpenseDraft) -> Result<ExpenseRecord> {
        let description = required_text("description", &draft.description)?;
        ensure_positive(draft.amount)?;
        self.require_user(&draft.payer).await?;

        let candidates = match &draft.group_id {
            Some(group) => {
                self.group_participants(actor, group, &draft.payer, None)
                    .await?
            }
            None => {
                let participants = personal_participants(&draft.payer, &draft.shares)?;
                if !participants.contains(actor) {
                    return Err(LedgerError::AccessDenied("expense"));
                }
                for user in &participants {
                    self.require_user(user).await?;
                }
                participants
            }
        };

        let expense = Expense {
            id: ExpenseId::generate(),
            description,
            amount: draft.amount,
            payer: draft.payer,
            group_id: draft.group_id,
            created_at: self.now(),
            version: 0,
        };

        let allocation = allocator::allocate(&expense, &candidates, &draft.shares)
            .inspect_err(|err| tracing::warn!("Expense creation aborted: {err}"))?;
        let splits = allocation.splits.clone();

        let mut batch = vec![LedgerWrite::InsertExpense(expense.clone())];
        batch.extend(allocation.into_writes());
        self.store.apply(batch).await?;

        tracing::info!(expense = %expense.id, amount = %expense.amount, "Expense created");
        Ok(ExpenseRecord { expense, splits })
    }

    #[tracing::instrument(skip_all, fields(actor = %actor, expense = %expense_id))]
    pub async fn edit_expense(
        &self,
        actor: &UserId,
        expense_id: &ExpenseId,
        group: Option<&GroupId>,
        edit: ExpenseEdit,
    ) -> Result<ExpenseRecord> {
        let record = self.owned_expense(expense_id, group).await?;
        let description = required_text("description", &edit.description)?;
        ensure_positive(edit.amount)?;
        self.require_user(&edit.payer).await?;

        let candidates = match &record.expense.group_id {
            Some(group) => {
                self.group_participants(actor, group, &edit.payer, Some(&record))
                    .await?
            }
            None => {
                let current: BTreeSet<UserId> =
                    record.participants().into_iter().cloned().collect();
                if !current.contains(actor) {
                    return Err(LedgerError::AccessDenied("expense"));
                }
                let requested = personal_participants(&edit.payer, &edit.shares)?;
                if requested != current {
                    return Err(LedgerError::InvalidInput(
                        "the people involved in a personal expense cannot change".to_string(),
                    ));
                }
                requested
            }
        };

        let updated = Expense {
            description,
            amount: edit.amount,
            payer: edit.payer,
            version: record.expense.version + 1,
            ..record.expense.clone()
        };
        let reallocation =
            allocator::reallocate(&updated, &record.splits, &candidates, &edit.shares)
                .inspect_err(|err| tracing::warn!("Expense edit aborted: {err}"))?;

        let mut batch = vec![LedgerWrite::ReplaceExpense {
            expense: updated.clone(),
            expected_version: record.expense.version,
        }];
        batch.extend(reallocation.into_writes(&updated));
        self.store
            .apply(batch)
            .await
            .inspect_err(|err| tracing::warn!("Expense edit not applied: {err}"))?;

        tracing::info!(amount = %updated.amount, version = updated.version, "Expense updated");
        let mut splits = self.store.expense_splits(expense_id).await?;
        splits.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(ExpenseRecord {
            expense: updated,
            splits,
        })
    }

    #[tracing::instrument(skip_all, fields(actor = %actor, expense = %expense_id))]
    pub async fn delete_expense(
        &self,
        actor: &UserId,
        expense_id: &ExpenseId,
        group: Option<&GroupId>,
    ) -> Result<()> {
        let record = self.owned_expense(expense_id, group).await?;
        match &record.expense.group_id {
            Some(group) => {
                self.require_member(actor, group).await?;
            }
            None => {
                if !record.participants().contains(actor) {
                    return Err(LedgerError::AccessDenied("expense"));
                }
            }
        }

        self.store
            .apply(vec![
                LedgerWrite::DeleteSplitsOf(expense_id.clone()),
                LedgerWrite::DeleteExpense(expense_id.clone()),
            ])
            .await?;

        tracing::info!("Expense deleted");
        Ok(())
    }

    /// Net balance over every group the user belongs to plus personal expenses.
    #[tracing::instrument(skip_all, fields(user = %user), err)]
    pub async fn balance_for_user(&self, user: &UserId) -> Result<Decimal> {
        self.require_user(user).await?;
        let groups = self.store.user_groups(user).await?;
        let expenses = self.store.user_expenses(user).await?;
        Ok(round_to_2_decimals(user_net_balance(user, &groups, &expenses)))
    }

    #[tracing::instrument(skip_all, fields(user = %user, group = %group), err)]
    pub async fn balance_for_user_in_group(&self, user: &UserId, group: &GroupId) -> Result<Decimal> {
        self.require_member(user, group).await?;
        let expenses = self.store.group_expenses(group).await?;
        Ok(round_to_2_decimals(user_balance_in_group(user, group, &expenses)))
    }

    /// What `other` owes `user` through expenses involving only the two of them.
    #[tracing::instrument(skip_all, fields(user = %user, other = %other), err)]
    pub async fn balance_between(&self, user: &UserId, other: &UserId) -> Result<Decimal> {
        self.require_user(user).await?;
        self.require_user(other).await?;
        let expenses = self.store.user_expenses(user).await?;
        Ok(round_to_2_decimals(pairwise_balance(user, other, &expenses)))
    }

    /// One line per counterparty per expense, newest first.
    #[tracing::instrument(skip_all, fields(user = %user), err)]
    pub async fn list_activity(&self, user: &UserId) -> Result<Vec<ActivityEntry>> {
        self.require_user(user).await?;
        let mut expenses = self.store.user_expenses(user).await?;
        newest_first(&mut expenses);

        let mut names = NameCache::default();
        let mut activity = Vec::new();
        for mut record in expenses {
            record.splits.sort_by(|a, b| a.user_id.cmp(&b.user_id));
            let group_name = match &record.expense.group_id {
                Some(group) => names.group(self, group).await?,
                None => None,
            };

            if &record.expense.payer == user {
                for split in &record.splits {
                    if &split.user_id == user || split.owed_amount <= Decimal::ZERO {
                        continue;
                    }
                    activity.push(ActivityEntry {
                        expense_id: record.expense.id.clone(),
                        description: record.expense.description.clone(),
                        signed_amount: round_to_2_decimals(split.owed_amount),
                        counterparty_name: names.user(self, &split.user_id).await?,
                        group_name: group_name.clone(),
                        timestamp: record.expense.created_at,
                    });
                }
            } else if let Some(split) = record.splits.iter().find(|split| &split.user_id == user) {
                activity.push(ActivityEntry {
                    expense_id: record.expense.id.clone(),
                    description: record.expense.description.clone(),
                    signed_amount: -round_to_2_decimals(split.owed_amount),
                    counterparty_name: names.user(self, &record.expense.payer).await?,
                    group_name,
                    timestamp: record.expense.created_at,
                });
            }
        }
        Ok(activity)
    }

    /// Dashboard numbers: net balance, each regular group and each friend.
    #[tracing::instrument(skip_all, fields(actor = %actor), err)]
    pub async fn overview(&self, actor: &UserId) -> Result<Overview> {
        self.require_user(actor).await?;
        let group_ids = self.store.user_groups(actor).await?;
        let expenses = self.store.user_expenses(actor).await?;

        let mut groups = Vec::new();
        for id in &group_ids {
            let group = self.require_group(id).await?;
            if group.is_friend_group {
                continue;
            }
            groups.push(GroupBalance {
                balance: round_to_2_decimals(user_balance_in_group(actor, id, &expenses)),
                group,
            });
        }

        let friends = self
            .friends_of(actor)
            .await?
            .into_iter()
            .map(|friend| FriendBalance {
                balance: round_to_2_decimals(pairwise_balance(actor, &friend.user.id, &expenses)),
                friend,
            })
            .collect();

        Ok(Overview {
            net_balance: round_to_2_decimals(user_net_balance(actor, &group_ids, &expenses)),
            groups,
            friends,
        })
    }

    /// Users the actor shares a two-member friend group with.
    pub async fn friends_of(&self, actor: &UserId) -> Result<Vec<Friend>> {
        let mut friends = Vec::new();
        for id in self.store.user_groups(actor).await? {
            let group = self.require_group(&id).await?;
            if !group.is_friend_group {
                continue;
            }
            let members = self.store.group_members(&id).await?;
            if members.len() != 2 {
                continue;
            }
            if let Some(other) = members.iter().find(|member| *member != actor) {
                friends.push(Friend {
                    group_id: id.clone(),
                    user: self.require_user(other).await?,
                });
            }
        }
        friends.sort_by(|a, b| a.user.name.cmp(&b.user.name));
        Ok(friends)
    }

    #[tracing::instrument(skip_all, fields(actor = %actor, group = %group), err)]
    pub async fn group_expenses(&self, actor: &UserId, group: &GroupId) -> Result<Vec<ExpenseRecord>> {
        self.require_member(actor, group).await?;
        let mut expenses = self.store.group_expenses(group).await?;
        newest_first(&mut expenses);
        Ok(expenses)
    }

    #[tracing::instrument(skip_all, fields(actor = %actor, group = %group_id), err)]
    pub async fn group_view(&self, actor: &UserId, group_id: &GroupId) -> Result<GroupView> {
        let group = self.require_member(actor, group_id).await?;
        let mut expenses = self.store.group_expenses(group_id).await?;
        newest_first(&mut expenses);
        let balances = compute_balance_from_group(&expenses);

        let mut members = Vec::new();
        for id in self.store.group_members(group_id).await? {
            members.push(MemberBalance {
                balance: round_to_2_decimals(balances.get(&id).copied().unwrap_or_default()),
                user: self.require_user(&id).await?,
            });
        }

        Ok(GroupView {
            balance: round_to_2_decimals(user_balance_in_group(actor, group_id, &expenses)),
            settlements: get_exchanges_from_group(&expenses),
            group,
            members,
            expenses,
        })
    }

    async fn owned_expense(&self, id: &ExpenseId, group: Option<&GroupId>) -> Result<ExpenseRecord> {
        let record = self
            .store
            .get_expense(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(Entity::Expense(id.clone())))?;
        if record.expense.group_id.as_ref() != group {
            return Err(LedgerError::OwnershipMismatch {
                expense: id.clone(),
                group: group.cloned(),
            });
        }
        Ok(record)
    }

    /// Current members, plus everyone already on `history` so that people
    /// who left can keep their part of an edited expense.
    async fn group_participants(
        &self,
        actor: &UserId,
        group: &GroupId,
        payer: &UserId,
        history: Option<&ExpenseRecord>,
    ) -> Result<BTreeSet<UserId>> {
        self.require_member(actor, group).await?;
        let mut participants: BTreeSet<UserId> =
            self.store.group_members(group).await?.into_iter().collect();
        if let Some(record) = history {
            participants.extend(record.participants().into_iter().cloned());
        }
        if !participants.contains(payer) {
            return Err(LedgerError::InvalidInput(format!(
                "payer '{payer}' is not a member of the group"
            )));
        }
        Ok(participants)
    }

    pub(crate) async fn require_user(&self, id: &UserId) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(Entity::User(id.clone())))
    }

    pub(crate) async fn require_group(&self, id: &GroupId) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(Entity::Group(id.clone())))
    }

    pub(crate) async fn require_member(&self, user: &UserId, group: &GroupId) -> Result<Group> {
        let found = self.require_group(group).await?;
        let members = self.store.group_members(group).await?;
        if !members.contains(user) {
            return Err(LedgerError::AccessDenied("group"));
        }
        Ok(found)
    }
}

/// The payer plus everyone with a positive share must be exactly two people.
fn personal_participants(payer: &UserId, shares: &Shares) -> Result<BTreeSet<UserId>> {
    let participants: BTreeSet<UserId> = shares
        .iter()
        .filter(|(_, owed)| **owed > Decimal::ZERO)
        .map(|(user, _)| user.clone())
        .chain(std::iter::once(payer.clone()))
        .collect();
    if participants.len() != 2 {
        return Err(LedgerError::InvalidInput(
            "a personal expense must involve exactly two people".to_string(),
        ));
    }
    Ok(participants)
}

pub(crate) fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn newest_first(records: &mut [ExpenseRecord]) {
    records.sort_by(|a, b| {
        b.expense
            .created_at
            .cmp(&a.expense.created_at)
            .then_with(|| b.expense.id.cmp(&a.expense.id))
    });
}

#[derive(Default)]
struct NameCache {
    users: HashMap<UserId, String>,
    groups: HashMap<GroupId, Option<String>>,
}

impl NameCache {
    async fn user(&mut self, ledger: &Ledger, id: &UserId) -> Result<String> {
        if let Some(name) = self.users.get(id) {
            return Ok(name.clone());
        }
        let name = ledger.require_user(id).await?.name;
        self.users.insert(id.clone(), name.clone());
        Ok(name)
    }

    async fn group(&mut self, ledger: &Ledger, id: &GroupId) -> Result<Option<String>> {
        if let Some(name) = self.groups.get(id) {
            return Ok(name.clone());
        }
        let name = ledger.require_group(id).await?.name;
        self.groups.insert(id.clone(), name.clone());
        Ok(name)
    }
}
