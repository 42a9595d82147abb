#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;

use discussion_api::auth::tokens::{TokenKeys, DEFAULT_ISSUER};
use discussion_api::config::Config;
use discussion_api::db::community::{
    DiscussionStore, MemoryCommunityStore, ReplyStore, TimeoutReplyStore,
};
use discussion_api::db::users::MemoryUserDirectory;
use discussion_api::gateway::hub::{Hub, HubHandle};
use discussion_api::gateway::policy::DeliveryPolicy;
use discussion_api::models::discussion::DiscussionDraft;
use discussion_api::models::user::User;
use discussion_api::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";

/// App state wired to in-memory collaborators, plus handles to them.
pub struct TestContext {
    pub state: AppState,
    pub users: Arc<MemoryUserDirectory>,
    pub store: Arc<MemoryCommunityStore>,
}

impl TestContext {
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    pub fn tokens(&self) -> &TokenKeys {
        &self.state.tokens
    }

    /// Insert a user and return a valid credential for them.
    pub fn add_user(&self, name: &str, role: &str) -> (String, String) {
        let id = iqraa_common::id::prefixed_ulid(iqraa_common::id::prefix::USER);
        self.users.insert(User {
            id: id.clone(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            username: Some(name.to_lowercase()),
            role: role.to_string(),
            created_at: Utc::now(),
        });
        let token = self.tokens().issue(&id).expect("issue token");
        (id, token)
    }

    pub async fn seed_discussion(&self, user_id: &str, context_id: &str) -> String {
        self.store
            .create_discussion(&DiscussionDraft {
                user_id: user_id.to_string(),
                context_type: "lesson".to_string(),
                context_id: context_id.to_string(),
                title: Some("Seeded".to_string()),
                body: "Seeded discussion".to_string(),
            })
            .await
            .expect("seed discussion")
            .id
    }

    /// Poll the hub until `room_id` has exactly `expected` members.
    pub async fn wait_for_members(&self, room_id: &str, expected: usize) {
        let hub = self.hub().clone();
        let room_id = room_id.to_string();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                let snapshot = hub.snapshot().await.expect("hub running");
                if snapshot.rooms.get(&room_id).copied().unwrap_or(0) == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("room never reached {expected} members"));
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        let hub = self.hub().clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                if hub.snapshot().await.expect("hub running").connections == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("hub never reached {expected} connections"));
    }
}

pub fn test_config(delivery: DeliveryPolicy) -> Config {
    Config {
        database_url: "postgres://unused/iqraa_test".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_issuer: DEFAULT_ISSUER.to_string(),
        port: 0,
        persist_timeout: Duration::from_secs(3),
        delivery,
    }
}

/// Must be called inside a Tokio runtime; the hub is spawned immediately.
pub fn test_context_with(delivery: DeliveryPolicy) -> TestContext {
    let config = test_config(delivery);
    let users = Arc::new(MemoryUserDirectory::new());
    let store = Arc::new(MemoryCommunityStore::new(users.clone()));
    let replies: Arc<dyn ReplyStore> =
        Arc::new(TimeoutReplyStore::new(store.clone(), config.persist_timeout));
    let discussions: Arc<dyn DiscussionStore> = store.clone();

    let (hub, _task) = Hub::spawn(replies.clone());

    let state = AppState {
        tokens: Arc::new(TokenKeys::new(&config.jwt_secret, &config.jwt_issuer)),
        users: users.clone(),
        discussions,
        replies,
        hub,
        config: Arc::new(config),
    };

    TestContext {
        state,
        users,
        store,
    }
}

pub fn test_context() -> TestContext {
    test_context_with(DeliveryPolicy::default())
}

/// Build the full application router wired to the test state.
pub fn test_app(ctx: &TestContext) -> Router {
    discussion_api::routes::router().with_state(ctx.state.clone())
}
