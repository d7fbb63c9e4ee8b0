use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Directives used when RUST_LOG is not set.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "trees2vcf=debug,info"
    } else {
        "trees2vcf=info"
    }
}

/// Compact logging to stderr. `RUST_LOG` takes precedence over `verbose`.
///
/// Without `RUST_LOG`, `verbose` lowers this crate's level from `info`
/// to `debug`; other crates stay at `info`.
pub fn init_cli_logger(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
