//! Common elements for the user directory client and server libraries

pub mod coerce;
pub mod network;
pub mod protocol;
pub mod record;

/// Number of records in one page of the collection.
///
/// Client and server must agree on this value; it is not negotiated over
/// the wire.
pub const DEFAULT_PAGE_SIZE: usize = 15;
