//! The listening nodes of the network and the accept loop they share.

pub mod ground_station;
pub mod relay;
pub mod server;
