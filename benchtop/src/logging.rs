use anyhow::{Context as _, Result};
use pacebench_core::operation::LATENCY_TARGET;
use std::io::{self, IsTerminal as _};
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Directive, fmt, EnvFilter};
use tracing_subscriber::{prelude::*, registry::Registry, Layer};

const ENV_NAME: &str = "PACEBENCH_LOG";

fn istty() -> bool {
    io::stdout().is_terminal() && io::stderr().is_terminal()
}

/// Creates the console filter from [`ENV_NAME`], defaulting to `info`.
///
/// The events of the measured operation never reach the console.
fn console_filter() -> Result<EnvFilter> {
    let directives = match std::env::var(ENV_NAME) {
        Ok(env) => env,
        Err(std::env::VarError::NotPresent) => String::new(),
        Err(std::env::VarError::NotUnicode(_)) => {
            anyhow::bail!("environment variable {} is not unicode", ENV_NAME)
        }
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(directives)
        .with_context(|| format!("invalid {}", ENV_NAME))?;
    let off: Directive = format!("{}=off", LATENCY_TARGET).parse()?;
    Ok(filter.add_directive(off))
}

fn latency_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .parse(format!("{}=info", LATENCY_TARGET))?)
}

/// Install the global subscriber. If `latency_log` is given, the events of the measured
/// operation are appended to it.
pub fn init(latency_log: Option<&Path>) -> Result<()> {
    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .event_format(
            fmt::format()
                .with_level(true)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(istty())
                .compact()
                .with_timer(fmt::time::SystemTime),
        )
        .with_filter(console_filter()?);

    let file_layer = match latency_log {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
            let file = std::fs::File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open latency log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .event_format(
                        fmt::format()
                            .with_level(false)
                            .with_target(false)
                            .with_thread_names(true)
                            .compact()
                            .with_timer(fmt::time::SystemTime),
                    )
                    .with_filter(latency_filter()?),
            )
        }
        None => None,
    };

    let subscriber = Registry::default().with(console_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context("failed to set subscriber")
}
