//! Builders and an in-process network of nodes on loopback addresses. They are used for
//!  testing this crate, and they are also exported for testing applications built on top of it,
//!  which is why they are part of the regular (non-#[cfg(test)]) code.

pub mod network;
pub mod record;
