use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use super::env::{env_flag, env_opt};

/// Filter directives to install: `RUST_LOG` when it is set and parses,
/// otherwise `fallback`. The second value carries the rejected `RUST_LOG`
/// and its parse error, if any.
fn filter_directives(rust_log: Option<&str>, fallback: &str) -> (EnvFilter, Option<String>) {
    let Some(raw) = rust_log.map(str::trim).filter(|r| !r.is_empty()) else {
        return (EnvFilter::new(fallback), None);
    };
    match EnvFilter::try_new(raw) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(fallback), Some(format!("{raw:?}: {e}"))),
    }
}

/// Installs the process-wide subscriber for the sync binary. Logs go to
/// stderr so stdout stays free for progress lines; `NO_COLOR` turns off ANSI.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let (filter, rejected) = filter_directives(env_opt("RUST_LOG").as_deref(), default_filter);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(!env_flag("NO_COLOR", false))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))?;

    if let Some(reason) = rejected {
        tracing::warn!(default_filter, %reason, "ignoring unparsable RUST_LOG");
    }
    Ok(())
}
