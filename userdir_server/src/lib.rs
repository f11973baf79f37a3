//! User directory server library
//!
//! Serves pages of a user record collection, and single record updates, to
//! websocket clients.

pub mod server;
pub mod session;
pub mod store;

pub use tokio;
pub use userdir_common;
