use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging flags shared by the supervisor and the demo worker
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub verbose: bool,
    pub quiet: bool,
    /// json, pretty or compact
    pub format: Option<String>,
}

impl LogOptions {
    pub fn level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }

    /// Default directives when `RUST_LOG` is not set
    pub fn directives(&self, binary: &str) -> String {
        let level = self.level();
        if binary == "lameduck" {
            format!("lameduck={}", level)
        } else {
            format!("lameduck={},{}={}", level, binary, level)
        }
    }
}

/// Install the global subscriber. `binary` is the crate name of the calling
/// executable, so its own log lines pass the default filter.
pub fn init_logging(options: &LogOptions, binary: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.directives(binary)));

    let fmt_layer = match options.format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(options.debug)
            .with_file(options.debug)
            .with_line_number(options.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(options.debug)
                .with_file(options.debug)
                .with_line_number(options.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_precedence() {
        let options = LogOptions {
            debug: true,
            quiet: true,
            ..LogOptions::default()
        };
        assert_eq!(options.level(), "debug");

        let options = LogOptions {
            quiet: true,
            ..LogOptions::default()
        };
        assert_eq!(options.level(), "error");
        assert_eq!(LogOptions::default().level(), "warn");
    }

    #[test]
    fn test_directives_include_binary() {
        let options = LogOptions {
            verbose: true,
            ..LogOptions::default()
        };
        assert_eq!(options.directives("lameduck"), "lameduck=info");
        assert_eq!(
            options.directives("lameduck_worker"),
            "lameduck=info,lameduck_worker=info"
        );
    }
}
