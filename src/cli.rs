//! Manual flag parsing in the teacher's own style — a handful of
//! `--flag <value>` pairs scanned out of `std::env::args()`, no argument
//! parsing crate pulled in for five flags.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Cli {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    /// Run exactly one scheduling tick and exit — for smoke-testing a config.
    pub once: bool,
    /// Overrides `monitoring.monitoring_duration_hours` from the config file.
    pub duration_hours: Option<f64>,
}

impl Cli {
    pub fn parse() -> Self {
        Self::parse_from(std::env::args().skip(1))
    }

    pub fn parse_from(args: impl Iterator<Item = String>) -> Self {
        let args: Vec<String> = args.collect();

        let config_path = flag_value(&args, "--config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.json"));
        let log_dir = flag_value(&args, "--log-dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let once = args.iter().any(|a| a == "--once");
        let duration_hours = flag_value(&args, "--duration-hours").and_then(|v| v.parse().ok());

        Self {
            config_path,
            log_dir,
            once,
            duration_hours,
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(argv: &[&str]) -> Cli {
        Cli::parse_from(argv.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_when_no_flags_given() {
        let c = cli(&[]);
        assert_eq!(c.config_path, PathBuf::from("config.json"));
        assert_eq!(c.log_dir, PathBuf::from("."));
        assert!(!c.once);
        assert!(c.duration_hours.is_none());
    }

    #[test]
    fn parses_all_flags() {
        let c = cli(&[
            "--config",
            "/tmp/x.json",
            "--log-dir",
            "/tmp/logs",
            "--once",
            "--duration-hours",
            "2.5",
        ]);
        assert_eq!(c.config_path, PathBuf::from("/tmp/x.json"));
        assert_eq!(c.log_dir, PathBuf::from("/tmp/logs"));
        assert!(c.once);
        assert_eq!(c.duration_hours, Some(2.5));
    }

    #[test]
    fn ignores_unknown_flags() {
        let c = cli(&["--bogus", "value"]);
        assert_eq!(c.config_path, PathBuf::from("config.json"));
    }
}
