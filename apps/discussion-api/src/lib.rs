pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenKeys;
use config::Config;
use db::community::{DiscussionStore, ReplyStore};
use db::users::UserDirectory;
use gateway::hub::HubHandle;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenKeys>,
    pub users: Arc<dyn UserDirectory>,
    pub discussions: Arc<dyn DiscussionStore>,
    /// Time-bounded write path; the hub holds the same store.
    pub replies: Arc<dyn ReplyStore>,
    pub hub: HubHandle,
}
