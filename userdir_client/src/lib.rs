//! User directory client library

pub mod client;
pub mod columns;
pub mod pagination;

pub use userdir_common;
