//! Accounts, credentials, and sessions.

mod flow;
mod password;
mod sessions;
mod users;

pub use flow::{LoginFlow, LoginRequest, RegisterRequest};
pub use sessions::{MemorySessionStore, RedisSessionStore, SessionStore};
pub use users::{MemoryUserStore, RedisUserStore, UserStore};
