use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level for sqlx when `log_targets` does not set one
const SQLX_DEFAULT_LEVEL: &str = "warn";

/// Filter directives: the base level, then one `target=level` per configured target
fn filter_directives(config: &AppConfig) -> String {
    let mut directives = vec![config.log_level.clone()];
    if !config.log_targets.contains_key("sqlx") {
        directives.push(format!("sqlx={}", SQLX_DEFAULT_LEVEL));
    }
    directives.extend(
        config
            .log_targets
            .iter()
            .map(|(target, level)| format!("{}={}", target, level)),
    );
    directives.join(",")
}

/// Install the global subscriber; keep the returned guard alive to flush the file writer
///
/// `RUST_LOG` replaces the configured filter when set.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let directives = filter_directives(config);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stderr_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_ansi(true);
        registry.with(file_layer).with(stderr_layer).init();
    }

    tracing::debug!(filter = %directives, log_dir = %config.log_dir, "Logging initialized");
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(targets: &[(&str, &str)]) -> AppConfig {
        let mut config = AppConfig::from_yaml(
            r#"
log_level: "info"
log_dir: "./logs"
log_file: "ledger.log"
use_json: false
rotation: "never"
database:
  url: "postgres://localhost/ledger"
"#,
        )
        .unwrap();
        config.log_targets = targets
            .iter()
            .map(|(t, l)| (t.to_string(), l.to_string()))
            .collect();
        config
    }

    #[test]
    fn test_sqlx_quiet_by_default() {
        assert_eq!(filter_directives(&config(&[])), "info,sqlx=warn");
    }

    #[test]
    fn test_configured_targets_appended() {
        let directives = filter_directives(&config(&[
            ("simple_ledger::ledger::tx", "debug"),
            ("sqlx", "info"),
        ]));
        assert_eq!(directives, "info,simple_ledger::ledger::tx=debug,sqlx=info");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
