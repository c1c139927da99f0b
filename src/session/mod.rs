//! Client session lifecycle: state machine, credential store and manager.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use storefront_session::{IdentityClient, IdentityConfig, FileStorage, SessionConfig, SessionManager};
//!
//! // 1. Build the Identity Service client and durable storage
//! let identity = IdentityClient::new(IdentityConfig::from_env()?);
//! let storage = FileStorage::new(data_dir.join("session"))?;
//!
//! // 2. Construct once at startup; rehydration happens here
//! let session = SessionManager::new(identity, storage, SessionConfig::from_env()?);
//!
//! // 3. Drive intents and watch the store
//! session.login("a@b.com", "Secret1!").await?;
//! let mut changes = session.subscribe();
//! ```

mod config;
mod machine;
mod manager;
mod store;
mod traits;

pub use config::SessionConfig;
pub use machine::{SessionEvent, SessionStatus, transition};
pub use manager::SessionManager;
pub use store::Session;
pub use traits::{IdentityService, Storage};
