//! Everything that travels between two nodes: length-prefixed frames, the encrypted envelope
//!  with its path trace, and the plain-text acknowledgments returned for each message.

pub mod ack;
pub mod canonical;
pub mod envelope;
pub mod frame;
