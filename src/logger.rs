//! Logging setup for the apex-ik binary and benchmark.
//!
//! The library itself only emits `tracing` events; installing a subscriber is left to the
//! application. These helpers install the one used by the shipped tools.

use chrono::Local;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    registry::LookupSpan,
};

/// Install the default subscriber at INFO level.
///
/// Output looks like `[INFO 2024-05-01 12:00:00 apex_ik::ik::solve] message`. DEBUG and
/// TRACE events show `file:line` instead of the module path.
///
/// ```no_run
/// apex_ik::init_logger();
/// tracing::info!("solver ready");
/// ```
///
/// `RUST_LOG` overrides the level, e.g. `RUST_LOG=apex_ik::optimizer=debug`.
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the default subscriber with a custom default level.
///
/// Calling it again after a subscriber is installed has no effect.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // A second install is not an error for the caller
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(BracketFormatter)
        .try_init();
}

struct BracketFormatter;

fn level_label(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN\x1b[0m",
        Level::INFO => "\x1b[32mINFO\x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

impl<S, N> FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();

        write!(
            writer,
            "[{} {} ",
            level_label(level),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        let verbose = level == Level::DEBUG || level == Level::TRACE;
        match (verbose, metadata.file()) {
            (true, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{}:{}", filename, metadata.line().unwrap_or(0))?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }

        write!(writer, "] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
