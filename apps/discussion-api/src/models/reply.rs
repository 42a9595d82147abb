use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Serialize, Serializer};
use utoipa::ToSchema;

use crate::db::schema::discussion_replies;
use crate::models::user::Author;

/// A persisted reply. Ids are snowflakes, so id order is creation order.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = discussion_replies)]
pub struct Reply {
    /// Serialized as a string; snowflakes exceed the JSON safe-integer range.
    #[serde(serialize_with = "id_as_string")]
    #[schema(value_type = String)]
    pub id: i64,
    pub discussion_id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = discussion_replies)]
pub struct NewReplyRow<'a> {
    pub id: i64,
    pub discussion_id: &'a str,
    pub user_id: &'a str,
    pub body: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReply {
    pub discussion_id: String,
    pub user_id: String,
    pub body: String,
}

/// Reply joined with its author. This is the shape of both the history
/// listing and the live `REPLY_CREATE` event payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReplyView {
    #[serde(flatten)]
    pub reply: Reply,
    pub user_name: String,
    pub user_role: String,
}

impl ReplyView {
    pub fn new(reply: Reply, author: &Author) -> Self {
        Self {
            reply,
            user_name: author.user_name.clone(),
            user_role: author.user_role.clone(),
        }
    }
}

fn id_as_string<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}
