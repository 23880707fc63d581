use tracing::Level;

pub fn level_from_flags(verbose: bool, very_verbose: bool) -> Level {
    match (verbose, very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    }
}

pub fn init_logging(verbose: bool, very_verbose: bool) {
    tracing_subscriber::fmt()
        .with_max_level(level_from_flags(verbose, very_verbose))
        .try_init()
        .ok();
}
