//! Real-time discussion gateway: one room per discussion, fan-out through a
//! single hub task, one reader and one writer task per connection.

pub mod connection;
pub mod events;
pub mod hub;
pub mod policy;
pub mod registry;
pub mod server;
pub mod session;
