//! Domain Layer
//!
//! # Architecture
//!
//! - **User** (`user.rs`) - User records and credential payloads
//! - **Ports** (`ports.rs`) - Trait abstraction for the authoritative store
//!
//! # Usage
//!
//! ```ignore
//! use vless_userdb::domain::{UserRecord, UserStorage};
//!
//! async fn lookup<S: UserStorage>(storage: &S, email: &str) -> Option<UserRecord> {
//!     storage.get_user_by_email(email).await.ok()
//! }
//! ```

pub mod ports;
pub mod user;

pub use ports::UserStorage;
pub use user::{Account, UserRecord, VlessAccount, DEFAULT_ENCRYPTION};
