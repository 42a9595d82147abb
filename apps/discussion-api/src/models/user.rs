use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::users;

/// A platform account, as far as discussions need to know it.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Author identity attached to every live event and history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Author {
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            user_role: user.role.clone(),
        }
    }
}
