use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::discussions;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = discussions)]
pub struct Discussion {
    pub id: String,
    pub user_id: String,
    pub context_type: String,
    pub context_id: String,
    pub title: Option<String>,
    pub body: String,
    pub reply_count: i32,
    pub last_reply_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = discussions)]
pub struct NewDiscussion<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub context_type: &'a str,
    pub context_id: &'a str,
    pub title: Option<&'a str>,
    pub body: &'a str,
    pub reply_count: i32,
    pub last_reply_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Discussion joined with its author's display name and role.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DiscussionView {
    #[serde(flatten)]
    pub discussion: Discussion,
    pub user_name: String,
    pub user_role: String,
}

/// Input for starting a discussion.
#[derive(Debug, Clone)]
pub struct DiscussionDraft {
    pub user_id: String,
    pub context_type: String,
    pub context_id: String,
    pub title: Option<String>,
    pub body: String,
}
