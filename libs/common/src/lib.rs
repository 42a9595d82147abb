//! Identifier helpers shared by the Iqraa backend services.

pub mod id;
pub mod snowflake;

pub use snowflake::SnowflakeGenerator;
