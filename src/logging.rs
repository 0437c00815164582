use env_logger::{Builder, Env, Target};

/// Logs go to stderr so stdout only carries the progress line.
///
/// `RUST_LOG` wins over the default level; `verbose` raises the default to debug.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };

    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .target(Target::Stderr)
        .format_timestamp(None)
        .try_init();
}
