//! Discussion and reply persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel_async::AsyncConnection;
use iqraa_common::id::{prefix, prefixed_ulid};
use iqraa_common::SnowflakeGenerator;
use parking_lot::Mutex;
use scoped_futures::ScopedFutureExt;

use crate::db::pool::DbPool;
use crate::db::schema::{discussion_replies, discussions, users};
use crate::db::users::MemoryUserDirectory;
use crate::error::ApiError;
use crate::models::discussion::{Discussion, DiscussionDraft, DiscussionView, NewDiscussion};
use crate::models::reply::{NewReply, NewReplyRow, Reply, ReplyView};

/// Most discussions returned for one learning context.
pub const CONTEXT_LIST_LIMIT: i64 = 50;

/// Write path used by the hub for every inbound reply.
#[async_trait]
pub trait ReplyStore: Send + Sync {
    /// Insert the reply and bump the parent discussion's counters in one
    /// transaction. Unknown discussions are `not_found`.
    async fn create_reply(&self, new: &NewReply) -> Result<Reply, ApiError>;
}

/// Read path and discussion creation used by the REST routes.
#[async_trait]
pub trait DiscussionStore: Send + Sync {
    async fn create_discussion(&self, draft: &DiscussionDraft) -> Result<Discussion, ApiError>;

    async fn get_discussion(&self, id: &str) -> Result<Option<Discussion>, ApiError>;

    /// Most recently active first, at most [`CONTEXT_LIST_LIMIT`].
    async fn list_for_context(
        &self,
        context_type: &str,
        context_id: &str,
    ) -> Result<Vec<DiscussionView>, ApiError>;

    /// Oldest first.
    async fn list_replies(&self, discussion_id: &str) -> Result<Vec<ReplyView>, ApiError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgCommunityStore {
    db: DbPool,
    snowflake: SnowflakeGenerator,
}

impl PgCommunityStore {
    pub fn new(db: DbPool, worker_id: u16) -> Self {
        Self {
            db,
            snowflake: SnowflakeGenerator::new(worker_id),
        }
    }
}

#[async_trait]
impl ReplyStore for PgCommunityStore {
    async fn create_reply(&self, new: &NewReply) -> Result<Reply, ApiError> {
        let mut conn = self.db.get().await?;
        let id = self.snowflake.generate();
        let now = Utc::now();

        let reply = conn
            .transaction::<_, ApiError, _>(|conn| {
                async move {
                    let bumped = diesel_async::RunQueryDsl::execute(
                        diesel::update(discussions::table.find(&new.discussion_id)).set((
                            discussions::reply_count.eq(discussions::reply_count + 1),
                            discussions::last_reply_at.eq(now),
                        )),
                        conn,
                    )
                    .await?;

                    if bumped == 0 {
                        return Err(ApiError::not_found("Discussion not found"));
                    }

                    let reply: Reply = diesel_async::RunQueryDsl::get_result(
                        diesel::insert_into(discussion_replies::table)
                            .values(NewReplyRow {
                                id,
                                discussion_id: &new.discussion_id,
                                user_id: &new.user_id,
                                body: &new.body,
                                created_at: now,
                            })
                            .returning(Reply::as_returning()),
                        conn,
                    )
                    .await?;

                    Ok(reply)
                }
                .scope_boxed()
            })
            .await?;

        Ok(reply)
    }
}

#[async_trait]
impl DiscussionStore for PgCommunityStore {
    async fn create_discussion(&self, draft: &DiscussionDraft) -> Result<Discussion, ApiError> {
        let mut conn = self.db.get().await?;
        let id = prefixed_ulid(prefix::DISCUSSION);
        let now = Utc::now();

        let discussion = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(discussions::table)
                .values(NewDiscussion {
                    id: &id,
                    user_id: &draft.user_id,
                    context_type: &draft.context_type,
                    context_id: &draft.context_id,
                    title: draft.title.as_deref(),
                    body: &draft.body,
                    reply_count: 0,
                    last_reply_at: now,
                    created_at: now,
                })
                .returning(Discussion::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(discussion)
    }

    async fn get_discussion(&self, id: &str) -> Result<Option<Discussion>, ApiError> {
        let mut conn = self.db.get().await?;

        let discussion = diesel_async::RunQueryDsl::get_result(
            discussions::table.find(id).select(Discussion::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(discussion)
    }

    async fn list_for_context(
        &self,
        context_type: &str,
        context_id: &str,
    ) -> Result<Vec<DiscussionView>, ApiError> {
        let mut conn = self.db.get().await?;

        let rows: Vec<(Discussion, String, String)> = diesel_async::RunQueryDsl::load(
            discussions::table
                .inner_join(users::table)
                .filter(discussions::context_type.eq(context_type))
                .filter(discussions::context_id.eq(context_id))
                .order(discussions::last_reply_at.desc())
                .limit(CONTEXT_LIST_LIMIT)
                .select((Discussion::as_select(), users::name, users::role)),
            &mut conn,
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(discussion, user_name, user_role)| DiscussionView {
                discussion,
                user_name,
                user_role,
            })
            .collect())
    }

    async fn list_replies(&self, discussion_id: &str) -> Result<Vec<ReplyView>, ApiError> {
        let mut conn = self.db.get().await?;

        let rows: Vec<(Reply, String, String)> = diesel_async::RunQueryDsl::load(
            discussion_replies::table
                .inner_join(users::table)
                .filter(discussion_replies::discussion_id.eq(discussion_id))
                .order(discussion_replies::id.asc())
                .select((Reply::as_select(), users::name, users::role)),
            &mut conn,
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(reply, user_name, user_role)| ReplyView {
                reply,
                user_name,
                user_role,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Timeout decorator
// ---------------------------------------------------------------------------

/// Bounds every `create_reply` call on the wrapped store. An elapsed call is
/// reported as an internal error; whatever the inner store was doing is
/// cancelled.
pub struct TimeoutReplyStore {
    inner: Arc<dyn ReplyStore>,
    timeout: Duration,
}

impl TimeoutReplyStore {
    pub fn new(inner: Arc<dyn ReplyStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ReplyStore for TimeoutReplyStore {
    async fn create_reply(&self, new: &NewReply) -> Result<Reply, ApiError> {
        match tokio::time::timeout(self.timeout, self.inner.create_reply(new)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    discussion_id = %new.discussion_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "reply persistence timed out"
                );
                Err(ApiError::internal("Timed out saving reply"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    discussions: Vec<Discussion>,
    replies: Vec<Reply>,
}

/// Keeps discussions and replies in process memory. Author names are joined
/// from the paired [`MemoryUserDirectory`].
pub struct MemoryCommunityStore {
    users: Arc<MemoryUserDirectory>,
    tables: Mutex<Tables>,
    snowflake: SnowflakeGenerator,
    fail_writes: AtomicBool,
}

impl MemoryCommunityStore {
    pub fn new(users: Arc<MemoryUserDirectory>) -> Self {
        Self {
            users,
            tables: Mutex::new(Tables::default()),
            snowflake: SnowflakeGenerator::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `create_reply` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reply_count(&self, discussion_id: &str) -> usize {
        self.tables
            .lock()
            .replies
            .iter()
            .filter(|r| r.discussion_id == discussion_id)
            .count()
    }
}

#[async_trait]
impl ReplyStore for MemoryCommunityStore {
    async fn create_reply(&self, new: &NewReply) -> Result<Reply, ApiError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::internal("Reply store unavailable"));
        }

        let now = Utc::now();
        let mut tables = self.tables.lock();

        let discussion = tables
            .discussions
            .iter_mut()
            .find(|d| d.id == new.discussion_id)
            .ok_or_else(|| ApiError::not_found("Discussion not found"))?;
        discussion.reply_count += 1;
        discussion.last_reply_at = now;

        let reply = Reply {
            id: self.snowflake.generate(),
            discussion_id: new.discussion_id.clone(),
            user_id: new.user_id.clone(),
            body: new.body.clone(),
            created_at: now,
        };
        tables.replies.push(reply.clone());

        Ok(reply)
    }
}

#[async_trait]
impl DiscussionStore for MemoryCommunityStore {
    async fn create_discussion(&self, draft: &DiscussionDraft) -> Result<Discussion, ApiError> {
        let now = Utc::now();
        let discussion = Discussion {
            id: prefixed_ulid(prefix::DISCUSSION),
            user_id: draft.user_id.clone(),
            context_type: draft.context_type.clone(),
            context_id: draft.context_id.clone(),
            title: draft.title.clone(),
            body: draft.body.clone(),
            reply_count: 0,
            last_reply_at: now,
            created_at: now,
        };
        self.tables.lock().discussions.push(discussion.clone());
        Ok(discussion)
    }

    async fn get_discussion(&self, id: &str) -> Result<Option<Discussion>, ApiError> {
        Ok(self
            .tables
            .lock()
            .discussions
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list_for_context(
        &self,
        context_type: &str,
        context_id: &str,
    ) -> Result<Vec<DiscussionView>, ApiError> {
        let mut matching: Vec<Discussion> = self
            .tables
            .lock()
            .discussions
            .iter()
            .filter(|d| d.context_type == context_type && d.context_id == context_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_reply_at.cmp(&a.last_reply_at));

        Ok(matching
            .into_iter()
            .filter_map(|discussion| {
                let author = self.users.get(&discussion.user_id)?;
                Some(DiscussionView {
                    discussion,
                    user_name: author.name,
                    user_role: author.role,
                })
            })
            .take(CONTEXT_LIST_LIMIT as usize)
            .collect())
    }

    async fn list_replies(&self, discussion_id: &str) -> Result<Vec<ReplyView>, ApiError> {
        let mut replies: Vec<Reply> = self
            .tables
            .lock()
            .replies
            .iter()
            .filter(|r| r.discussion_id == discussion_id)
            .cloned()
            .collect();
        replies.sort_by_key(|r| r.id);

        Ok(replies
            .into_iter()
            .filter_map(|reply| {
                let author = self.users.get(&reply.user_id)?;
                Some(ReplyView {
                    reply,
                    user_name: author.name,
                    user_role: author.role,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::User;

    fn store_with_user(id: &str) -> MemoryCommunityStore {
        let users = Arc::new(MemoryUserDirectory::new());
        users.insert(User {
            id: id.to_string(),
            name: "Amina".to_string(),
            email: "amina@example.com".to_string(),
            username: None,
            role: "student".to_string(),
            created_at: Utc::now(),
        });
        MemoryCommunityStore::new(users)
    }

    fn draft(user_id: &str, context_id: &str) -> DiscussionDraft {
        DiscussionDraft {
            user_id: user_id.to_string(),
            context_type: "lesson".to_string(),
            context_id: context_id.to_string(),
            title: Some("Question".to_string()),
            body: "How does this work?".to_string(),
        }
    }

    fn reply(discussion_id: &str, body: &str) -> NewReply {
        NewReply {
            discussion_id: discussion_id.to_string(),
            user_id: "usr_a".to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn create_reply_bumps_discussion_counters() {
        let store = store_with_user("usr_a");
        let discussion = store.create_discussion(&draft("usr_a", "l1")).await.unwrap();

        store.create_reply(&reply(&discussion.id, "first")).await.unwrap();
        store.create_reply(&reply(&discussion.id, "second")).await.unwrap();

        let updated = store.get_discussion(&discussion.id).await.unwrap().unwrap();
        assert_eq!(updated.reply_count, 2);
        assert!(updated.last_reply_at >= discussion.last_reply_at);

        let replies = store.list_replies(&discussion.id).await.unwrap();
        let bodies: Vec<_> = replies.iter().map(|r| r.reply.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);
        assert_eq!(replies[0].user_name, "Amina");
    }

    #[tokio::test]
    async fn create_reply_for_unknown_discussion_is_not_found() {
        let store = store_with_user("usr_a");
        let err = store.create_reply(&reply("dsc_missing", "hi")).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
        assert_eq!(store.reply_count("dsc_missing"), 0);
    }

    #[tokio::test]
    async fn failing_writes_persist_nothing() {
        let store = store_with_user("usr_a");
        let discussion = store.create_discussion(&draft("usr_a", "l1")).await.unwrap();
        store.set_fail_writes(true);
        assert!(store.create_reply(&reply(&discussion.id, "lost")).await.is_err());
        assert_eq!(store.reply_count(&discussion.id), 0);
    }

    #[tokio::test]
    async fn context_listing_orders_by_latest_activity() {
        let store = store_with_user("usr_a");
        let older = store.create_discussion(&draft("usr_a", "l1")).await.unwrap();
        let newer = store.create_discussion(&draft("usr_a", "l1")).await.unwrap();
        store.create_discussion(&draft("usr_a", "other")).await.unwrap();

        store.create_reply(&reply(&older.id, "bump")).await.unwrap();

        let listed = store.list_for_context("lesson", "l1").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|d| d.discussion.id.as_str()).collect();
        assert_eq!(ids, [older.id.as_str(), newer.id.as_str()]);
    }

    struct StalledStore;

    #[async_trait]
    impl ReplyStore for StalledStore {
        async fn create_reply(&self, _new: &NewReply) -> Result<Reply, ApiError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_store_bounds_slow_writes() {
        let store = TimeoutReplyStore::new(Arc::new(StalledStore), Duration::from_secs(3));
        let err = store.create_reply(&reply("dsc_1", "hi")).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
