use crate::error::{Entity, LedgerError, Result};
use crate::ledger::{required_text, Ledger};
use crate::schemas::{Credential, Group, GroupId, Membership, User, UserId};
use crate::store::LedgerWrite;
use std::collections::BTreeSet;

impl Ledger {
    /// Registers a user and stores a bcrypt hash of their password.
    pub async fn register_user(&self, name: &str, username: &str, password: &str) -> Result<User> {
        let name = required_text("name", name)?;
        let username = required_text("username", username)?;
        if password.is_empty() {
            return Err(LedgerError::InvalidInput(
                "password cannot be empty".to_string(),
            ));
        }
        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(LedgerError::InvalidInput(
                "Username already exists. Try another one.".to_string(),
            ));
        }

        let user = User {
            id: UserId::generate(),
            name,
            username,
        };
        let password_hash = bcrypt::hash(password, self.password_cost)
            .map_err(|err| LedgerError::InvalidInput(format!("password rejected: {err}")))?;
        self.store
            .apply(vec![
                LedgerWrite::InsertUser(user.clone()),
                LedgerWrite::InsertCredential(Credential {
                    user_id: user.id.clone(),
                    password_hash,
                }),
            ])
            .await?;
        tracing::info!(user = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Checks a username/password pair. Unknown users and wrong passwords
    /// fail the same way.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let user = self
            .store
            .find_user_by_username(username.trim())
            .await?
            .ok_or(LedgerError::InvalidCredentials)?;
        let credential = self
            .store
            .get_credential(&user.id)
            .await?
            .ok_or(LedgerError::InvalidCredentials)?;
        if !bcrypt::verify(password, &credential.password_hash).unwrap_or(false) {
            tracing::warn!(username = %user.username, "Login rejected");
            return Err(LedgerError::InvalidCredentials);
        }
        Ok(user)
    }

    /// Creates a named group with the actor as its first member.
    pub async fn create_group(&self, actor: &UserId, name: &str) -> Result<Group> {
        let name = required_text("group name", name)?;
        self.require_user(actor).await?;

        let group = Group {
            id: GroupId::generate(),
            name: Some(name),
            is_friend_group: false,
        };
        self.store
            .apply(vec![
                LedgerWrite::InsertGroup(group.clone()),
                LedgerWrite::InsertMembership(Membership {
                    user_id: actor.clone(),
                    group_id: group.id.clone(),
                }),
            ])
            .await?;
        tracing::info!(group = %group.id, actor = %actor, "Group created");
        Ok(group)
    }

    /// Creates the two-member friend group between the actor and `other`.
    pub async fn create_friend(&self, actor: &UserId, other: &UserId) -> Result<Group> {
        if actor == other {
            return Err(LedgerError::InvalidInput(
                "You cannot add yourself as a friend.".to_string(),
            ));
        }
        self.require_user(actor).await?;
        self.require_user(other).await?;
        if self
            .friends_of(actor)
            .await?
            .iter()
            .any(|friend| &friend.user.id == other)
        {
            return Err(LedgerError::InvalidInput(
                "You're already friends with this user.".to_string(),
            ));
        }

        let group = Group {
            id: GroupId::generate(),
            name: None,
            is_friend_group: true,
        };
        let mut batch = vec![LedgerWrite::InsertGroup(group.clone())];
        for user in [actor, other] {
            batch.push(LedgerWrite::InsertMembership(Membership {
                user_id: user.clone(),
                group_id: group.id.clone(),
            }));
        }
        self.store.apply(batch).await?;
        tracing::info!(group = %group.id, actor = %actor, friend = %other, "Friend added");
        Ok(group)
    }

    /// Adds users to a group, skipping anyone already in it. Returns the
    /// users that were actually added.
    pub async fn invite_members(
        &self,
        actor: &UserId,
        group_id: &GroupId,
        users: &[UserId],
    ) -> Result<Vec<UserId>> {
        let group = self.require_member(actor, group_id).await?;
        if group.is_friend_group {
            return Err(LedgerError::InvalidInput(
                "a friend group always has exactly two members".to_string(),
            ));
        }

        let existing: BTreeSet<UserId> =
            self.store.group_members(group_id).await?.into_iter().collect();
        let mut added = Vec::new();
        for user in users {
            if existing.contains(user) || added.contains(user) {
                continue;
            }
            self.require_user(user).await?;
            added.push(user.clone());
        }

        if !added.is_empty() {
            let batch = added
                .iter()
                .map(|user| {
                    LedgerWrite::InsertMembership(Membership {
                        user_id: user.clone(),
                        group_id: group_id.clone(),
                    })
                })
                .collect();
            self.store.apply(batch).await?;
        }
        tracing::info!(group = %group_id, invited = added.len(), "Members invited");
        Ok(added)
    }

    /// Removes the actor from a group. Expenses and splits stay untouched.
    pub async fn leave_group(&self, actor: &UserId, group_id: &GroupId) -> Result<()> {
        let group = self.require_member(actor, group_id).await?;
        if group.is_friend_group {
            return Err(LedgerError::InvalidInput(
                "a friend group always has exactly two members".to_string(),
            ));
        }
        self.store
            .apply(vec![LedgerWrite::DeleteMembership(Membership {
                user_id: actor.clone(),
                group_id: group_id.clone(),
            })])
            .await?;
        tracing::info!(group = %group_id, actor = %actor, "Member left group");
        Ok(())
    }

    /// Everyone the actor could invite, sorted by username.
    pub async fn user_directory(&self, actor: &UserId) -> Result<Vec<User>> {
        self.require_user(actor).await?;
        let mut users = self.store.list_users().await?;
        users.retain(|user| &user.id != actor);
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub async fn find_user(&self, username: &str) -> Result<User> {
        self.store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| LedgerError::NotFound(Entity::User(UserId::new(username))))
    }
}
