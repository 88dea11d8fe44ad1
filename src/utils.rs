use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

/// Style used for the per-task spinners.
pub(crate) static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template("{span_child_prefix}{spinner:.green} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

/// Style used for the overall progress of a run.
pub(crate) static RUN_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
});

/// Formats the time elapsed since `s` as a short suffix, e.g. `(+12ms)`.
pub fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Installs a global tracing subscriber.
///
/// Log lines are routed through the progress bars so they don't tear them.
/// The filter defaults to `info` and can be overridden with `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()
}
