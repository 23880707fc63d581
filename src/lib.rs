pub mod config;
pub mod directory;
pub mod messaging;
pub mod node;
pub mod orbit;
pub mod routing;
pub mod tracker;
pub mod util;
pub mod test_util;
