use super::{EntityStore, LedgerWrite, StoreResult};
use crate::error::StoreError;
use crate::schemas::{
    Credential, Expense, ExpenseId, ExpenseRecord, Group, GroupId, Membership, Split, User,
    UserId,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client, ClientSession, Collection, IndexModel,
};
use std::collections::HashMap;

/// Entity store backed by MongoDB. Each batch runs inside a session
/// transaction, so the deployment must be a replica set.
#[derive(Clone, Debug)]
pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self {
            client,
            database: database.to_string(),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.database).collection(name)
    }

    fn users(&self) -> Collection<User> {
        self.collection("Users")
    }

    fn credentials(&self) -> Collection<Credential> {
        self.collection("Credentials")
    }

    fn groups(&self) -> Collection<Group> {
        self.collection("Groups")
    }

    fn memberships(&self) -> Collection<Membership> {
        self.collection("Memberships")
    }

    fn expenses(&self) -> Collection<Expense> {
        self.collection("Expenses")
    }

    fn splits(&self) -> Collection<Split> {
        self.collection("Splits")
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        self.users().create_index(unique(doc! { "id": 1 }), None).await?;
        self.users()
            .create_index(unique(doc! { "username": 1 }), None)
            .await?;
        self.credentials()
            .create_index(unique(doc! { "user_id": 1 }), None)
            .await?;
        self.groups().create_index(unique(doc! { "id": 1 }), None).await?;
        self.memberships()
            .create_index(unique(doc! { "group_id": 1, "user_id": 1 }), None)
            .await?;
        self.expenses()
            .create_index(unique(doc! { "id": 1 }), None)
            .await?;
        self.splits()
            .create_index(unique(doc! { "expense_id": 1, "user_id": 1 }), None)
            .await?;
        Ok(())
    }

    async fn find_expenses(&self, filter: Document) -> StoreResult<Vec<ExpenseRecord>> {
        let expenses: Vec<Expense> = self.expenses().find(filter, None).await?.try_collect().await?;
        let ids: Vec<&str> = expenses.iter().map(|expense| expense.id.as_str()).collect();
        let splits: Vec<Split> = self
            .splits()
            .find(doc! { "expense_id": { "$in": ids } }, None)
            .await?
            .try_collect()
            .await?;

        let mut splits_by_expense: HashMap<ExpenseId, Vec<Split>> = HashMap::new();
        for split in splits {
            splits_by_expense
                .entry(split.expense_id.clone())
                .or_default()
                .push(split);
        }

        Ok(expenses
            .into_iter()
            .map(|expense| ExpenseRecord {
                splits: splits_by_expense.remove(&expense.id).unwrap_or_default(),
                expense,
            })
            .collect())
    }

    async fn write(&self, write: LedgerWrite, session: &mut ClientSession) -> StoreResult<()> {
        match write {
            LedgerWrite::InsertUser(user) => {
                self.users().insert_one_with_session(user, None, session).await?;
            }
            LedgerWrite::InsertCredential(credential) => {
                self.credentials()
                    .insert_one_with_session(credential, None, session)
                    .await?;
            }
            LedgerWrite::InsertGroup(group) => {
                self.groups().insert_one_with_session(group, None, session).await?;
            }
            LedgerWrite::InsertMembership(membership) => {
                self.memberships()
                    .insert_one_with_session(membership, None, session)
                    .await?;
            }
            LedgerWrite::DeleteMembership(membership) => {
                let result = self
                    .memberships()
                    .delete_one_with_session(
                        doc! {
                            "group_id": membership.group_id.as_str(),
                            "user_id": membership.user_id.as_str(),
                        },
                        None,
                        session,
                    )
                    .await?;
                if result.deleted_count == 0 {
                    return Err(StoreError::Conflict(format!(
                        "user '{}' is not a member of group '{}'",
                        membership.user_id, membership.group_id
                    )));
                }
            }
            LedgerWrite::InsertExpense(expense) => {
                self.expenses()
                    .insert_one_with_session(expense, None, session)
                    .await?;
            }
            LedgerWrite::ReplaceExpense {
                expense,
                expected_version,
            } => {
                let result = self
                    .expenses()
                    .replace_one_with_session(
                        doc! { "id": expense.id.as_str(), "version": expected_version },
                        &expense,
                        None,
                        session,
                    )
                    .await?;
                if result.matched_count == 0 {
                    return Err(StoreError::Conflict(format!(
                        "expense '{}' does not exist at version {expected_version}",
                        expense.id
                    )));
                }
            }
            LedgerWrite::DeleteExpense(id) => {
                let remaining = self
                    .splits()
                    .count_documents_with_session(doc! { "expense_id": id.as_str() }, None, session)
                    .await?;
                if remaining > 0 {
                    return Err(StoreError::Conflict(format!(
                        "expense '{id}' still has splits"
                    )));
                }
                let result = self
                    .expenses()
                    .delete_one_with_session(doc! { "id": id.as_str() }, None, session)
                    .await?;
                if result.deleted_count == 0 {
                    return Err(StoreError::Conflict(format!("expense '{id}' does not exist")));
                }
            }
            LedgerWrite::InsertSplit(split) => {
                let parent = self
                    .expenses()
                    .find_one_with_session(doc! { "id": split.expense_id.as_str() }, None, session)
                    .await?;
                if parent.is_none() {
                    return Err(StoreError::Conflict(format!(
                        "split references unknown expense '{}'",
                        split.expense_id
                    )));
                }
                self.splits().insert_one_with_session(split, None, session).await?;
            }
            LedgerWrite::UpdateSplit(split) => {
                let result = self
                    .splits()
                    .update_one_with_session(
                        doc! {
                            "expense_id": split.expense_id.as_str(),
                            "user_id": split.user_id.as_str(),
                        },
                        doc! { "$set": { "owed_amount": bson::to_bson(&split.owed_amount)? } },
                        None,
                        session,
                    )
                    .await?;
                if result.matched_count == 0 {
                    return Err(StoreError::Conflict(format!(
                        "user '{}' has no split on expense '{}'",
                        split.user_id, split.expense_id
                    )));
                }
            }
            LedgerWrite::DeleteSplit {
                expense_id,
                user_id,
            } => {
                let result = self
                    .splits()
                    .delete_one_with_session(
                        doc! { "expense_id": expense_id.as_str(), "user_id": user_id.as_str() },
                        None,
                        session,
                    )
                    .await?;
                if result.deleted_count == 0 {
                    return Err(StoreError::Conflict(format!(
                        "user '{user_id}' has no split on expense '{expense_id}'"
                    )));
                }
            }
            LedgerWrite::DeleteSplitsOf(id) => {
                self.splits()
                    .delete_many_with_session(doc! { "expense_id": id.as_str() }, None, session)
                    .await?;
            }
        }
        Ok(())
    }
}

fn unique(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

#[async_trait]
impl EntityStore for MongoStore {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.users().find_one(doc! { "id": id.as_str() }, None).await?)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users()
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.users().find(None, None).await?.try_collect().await?)
    }

    async fn get_credential(&self, user: &UserId) -> StoreResult<Option<Credential>> {
        Ok(self
            .credentials()
            .find_one(doc! { "user_id": user.as_str() }, None)
            .await?)
    }

    async fn get_group(&self, id: &GroupId) -> StoreResult<Option<Group>> {
        Ok(self.groups().find_one(doc! { "id": id.as_str() }, None).await?)
    }

    async fn group_members(&self, group: &GroupId) -> StoreResult<Vec<UserId>> {
        let memberships: Vec<Membership> = self
            .memberships()
            .find(doc! { "group_id": group.as_str() }, None)
            .await?
            .try_collect()
            .await?;
        Ok(memberships.into_iter().map(|m| m.user_id).collect())
    }

    async fn user_groups(&self, user: &UserId) -> StoreResult<Vec<GroupId>> {
        let memberships: Vec<Membership> = self
            .memberships()
            .find(doc! { "user_id": user.as_str() }, None)
            .await?
            .try_collect()
            .await?;
        Ok(memberships.into_iter().map(|m| m.group_id).collect())
    }

    async fn get_expense(&self, id: &ExpenseId) -> StoreResult<Option<ExpenseRecord>> {
        Ok(self
            .find_expenses(doc! { "id": id.as_str() })
            .await?
            .into_iter()
            .next())
    }

    async fn expense_splits(&self, id: &ExpenseId) -> StoreResult<Vec<Split>> {
        Ok(self
            .splits()
            .find(doc! { "expense_id": id.as_str() }, None)
            .await?
            .try_collect()
            .await?)
    }

    async fn group_expenses(&self, group: &GroupId) -> StoreResult<Vec<ExpenseRecord>> {
        self.find_expenses(doc! { "group_id": group.as_str() }).await
    }

    async fn user_expenses(&self, user: &UserId) -> StoreResult<Vec<ExpenseRecord>> {
        let owed: Vec<Split> = self
            .splits()
            .find(doc! { "user_id": user.as_str() }, None)
            .await?
            .try_collect()
            .await?;
        let owed_ids: Vec<String> = owed
            .into_iter()
            .map(|split| split.expense_id.to_string())
            .collect();
        self.find_expenses(doc! {
            "$or": [
                { "payer": user.as_str() },
                { "id": { "$in": owed_ids } },
            ]
        })
        .await
    }

    async fn apply(&self, batch: Vec<LedgerWrite>) -> StoreResult<()> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        for write in batch {
            if let Err(err) = self.write(write, &mut session).await {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::error!("Failed to abort transaction: {abort_err}");
                }
                return Err(err);
            }
        }
        session.commit_transaction().await?;
        Ok(())
    }
}
