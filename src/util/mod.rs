pub mod clock;
pub mod logging;
pub mod random;
pub mod shutdown;
