use std::collections::HashMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use parking_lot::RwLock;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::error::ApiError;
use crate::models::user::User;

/// Resolves user ids to profiles.
///
/// Backed by Postgres in production and an in-memory map in tests.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when no such user exists.
    async fn get_user(&self, id: &str) -> Result<Option<User>, ApiError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgUserDirectory {
    db: DbPool,
}

impl PgUserDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, id: &str) -> Result<Option<User>, ApiError> {
        let mut conn = self.db.get().await?;

        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<User> {
        self.users.write().remove(id)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, id: &str) -> Result<Option<User>, ApiError> {
        Ok(self.get(id))
    }
}
