pub mod discussion;
pub mod reply;
pub mod user;
