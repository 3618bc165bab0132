//! Logging setup for the command line tool.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "episodl=info,episodl_engine=info,remux=warn,hls=warn,webvtt=warn";

/// Filter used when `RUST_LOG` is not set.
pub fn filter_directives(verbose: u8, quiet: bool) -> String {
    if quiet {
        return "warn".to_string();
    }
    match verbose {
        0 => DEFAULT_LOG_FILTER.to_string(),
        1 => "episodl=debug,episodl_engine=debug,remux=debug,hls=info,webvtt=info".to_string(),
        _ => "trace".to_string(),
    }
}

/// Installs the global subscriber. Logs go to stderr so they do not mix
/// with progress output.
pub fn init_logging(verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(filter_directives(verbose, quiet))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 0),
        )
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for (verbose, quiet) in [(0, false), (1, false), (2, false), (0, true)] {
            let directives = filter_directives(verbose, quiet);
            assert!(EnvFilter::try_new(&directives).is_ok(), "{directives}");
        }
        assert_eq!(filter_directives(3, true), "warn");
    }
}
