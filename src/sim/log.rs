use log::LevelFilter;

/// Numeric log level of the `[sim]` section: 0 none, 1 info, 2 debug.  Anything higher is debug.
pub fn to_level_filter(ulevel: u64) -> LevelFilter {
    match ulevel {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install `env_logger` at the configured level.  `RUST_LOG`, when set, wins.  Safe to call more
/// than once; later calls are ignored.
pub fn init_logging(ulevel: u64) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(to_level_filter(ulevel));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.format_timestamp(None).try_init();
}
