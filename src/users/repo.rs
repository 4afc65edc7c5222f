use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::AppError,
    users::repo_types::{NewUser, User, UserRow},
};

/// Partial profile update; `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Credential store. Every read only sees active users; email uniqueness
/// covers active and inactive records alike.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError>;
    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, AppError>;
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), AppError>;
    /// Store (or clear, with `None`) the hashed reset token and its expiry.
    async fn set_reset_token(
        &self,
        id: Uuid,
        reset: Option<(String, OffsetDateTime)>,
    ) -> Result<(), AppError>;
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, AppError>;
    /// Atomically swap the password for the holder of an unexpired reset
    /// token and clear the token. Returns `None` when nothing matched.
    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, AppError>;
    /// Soft delete.
    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError>;
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

const USER_COLUMNS: &str = "id, name, email, photo, role, password_hash, password_changed_at, \
     password_reset_token, password_reset_expires, active, created_at";

fn into_user(row: UserRow) -> Result<User, AppError> {
    Ok(User::try_from(row)?)
}

fn into_user_opt(row: Option<UserRow>) -> Result<Option<User>, AppError> {
    row.map(into_user).transpose()
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (name, email, role, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE active
            ORDER BY created_at, id
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                email = COALESCE($3, email)
            WHERE id = $1 AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, password_changed_at = $3
            WHERE id = $1 AND active
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        reset: Option<(String, OffsetDateTime)>,
    ) -> Result<(), AppError> {
        let (hash, expires) = match reset {
            Some((hash, expires)) => (Some(hash), Some(expires)),
            None => (None, None),
        };
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hash)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE password_reset_token = $1 AND password_reset_expires > $2 AND active
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                password_changed_at = $4,
                password_reset_token = NULL,
                password_reset_expires = NULL
            WHERE password_reset_token = $1 AND password_reset_expires > $2 AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        into_user_opt(row)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Process-local store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| u.email == email && Some(u.id) != except)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        if email_taken(&users, &user.email, None) {
            return Err(AppError::DuplicateKey {
                field: "email".into(),
                value: user.email,
            });
        }
        let record = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            photo: "default.jpg".into(),
            role: user.role,
            password_hash: user.password_hash,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| u.active).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.active && u.email == email)
            .cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError> {
        let users = self.users.read().await;
        let mut active: Vec<User> = users.values().filter(|u| u.active).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, AppError> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if email_taken(&users, email, Some(id)) {
                return Err(AppError::DuplicateKey {
                    field: "email".into(),
                    value: email.clone(),
                });
            }
        }
        let Some(user) = users.get_mut(&id).filter(|u| u.active) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        Ok(Some(user.clone()))
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&id).filter(|u| u.active) {
            user.password_hash = password_hash.to_string();
            user.password_changed_at = Some(changed_at);
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        reset: Option<(String, OffsetDateTime)>,
    ) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&id) {
            match reset {
                Some((hash, expires)) => {
                    user.password_reset_token = Some(hash);
                    user.password_reset_expires = Some(expires);
                }
                None => {
                    user.password_reset_token = None;
                    user.password_reset_expires = None;
                }
            }
        }
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| reset_matches(u, token_hash, now))
            .cloned())
    }

    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| reset_matches(u, token_hash, now))
        else {
            return Ok(None);
        };
        user.password_hash = password_hash.to_string();
        user.password_changed_at = Some(changed_at);
        user.password_reset_token = None;
        user.password_reset_expires = None;
        Ok(Some(user.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id).filter(|u| u.active) {
            Some(user) => {
                user.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut users = self.users.write().await;
        if users.get(&id).is_some_and(|u| u.active) {
            users.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}

fn reset_matches(user: &User, token_hash: &str, now: OffsetDateTime) -> bool {
    user.active
        && user.password_reset_token.as_deref() == Some(token_hash)
        && user.password_reset_expires.is_some_and(|exp| exp > now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser::prehashed(email, Default::default(), "hash")
    }

    #[tokio::test]
    async fn email_is_unique_even_for_inactive_users() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        assert!(store.deactivate(user.id).await.unwrap());

        let err = store.insert(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey { ref field, .. } if field == "email"));
    }

    #[tokio::test]
    async fn inactive_users_are_hidden_from_reads() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        store.deactivate(user.id).await.unwrap();

        assert!(store.find_by_id(user.id).await.unwrap().is_none());
        assert!(store.find_by_email("a@x.com").await.unwrap().is_none());
        assert!(store.list(10, 0).await.unwrap().is_empty());
        assert!(!store.delete(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn redeem_is_single_use_and_respects_expiry() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token(user.id, Some(("h1".into(), now + Duration::minutes(10))))
            .await
            .unwrap();

        let late = now + Duration::minutes(11);
        assert!(store
            .redeem_reset_token("h1", late, "new", late)
            .await
            .unwrap()
            .is_none());

        let redeemed = store
            .redeem_reset_token("h1", now, "new", now)
            .await
            .unwrap()
            .expect("token matches");
        assert_eq!(redeemed.password_hash, "new");
        assert!(redeemed.password_reset_token.is_none());

        assert!(store
            .redeem_reset_token("h1", now, "newer", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_redeems_leave_one_winner() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token(user.id, Some(("h1".into(), now + Duration::minutes(10))))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            store.redeem_reset_token("h1", now, "first", now),
            store.redeem_reset_token("h1", now, "second", now),
        );
        let winners: Vec<User> = [first.unwrap(), second.unwrap()]
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(winners.len(), 1);

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, winners[0].password_hash);
        assert!(stored.password_reset_token.is_none());
    }

    #[tokio::test]
    async fn update_profile_rejects_taken_email() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@x.com")).await.unwrap();
        let b = store.insert(new_user("b@x.com")).await.unwrap();

        let err = store
            .update_profile(
                b.id,
                ProfileChanges {
                    email: Some("a@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey { .. }));

        let updated = store
            .update_profile(
                b.id,
                ProfileChanges {
                    name: Some("Bee".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Bee");
        assert_eq!(updated.email, "b@x.com");
    }
}
