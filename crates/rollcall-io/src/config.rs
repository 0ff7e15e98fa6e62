use rollcall_core::{MatchConfig, Metric, ParseOptionError, RepresentativeMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var}: {source}")]
    InvalidOption {
        var: &'static str,
        source: ParseOptionError,
    },
    #[error("{var}: invalid value '{value}'")]
    InvalidValue { var: &'static str, value: String },
    #[error("match threshold must be finite, got {0}")]
    InvalidThreshold(f32),
}

/// Runtime configuration shared by the daemon and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Roster CSV with `USN,Name` columns.
    pub roster_path: PathBuf,
    /// Enrollment tree: one sub-directory of face manifests per USN.
    pub enroll_dir: PathBuf,
    /// SQLite file holding the enrolled gallery.
    pub gallery_path: PathBuf,
    /// Directory watched by the daemon for new scene manifests.
    pub inbox_dir: PathBuf,
    /// Attendance ledger CSV, overwritten on every run.
    pub ledger_path: PathBuf,
    /// Optional per-face match report CSV.
    pub report_path: Option<PathBuf>,
    pub matching: MatchConfig,
    /// Capacity of the daemon's request queue.
    pub queue_depth: usize,
    /// Whether the daemon registers its D-Bus interface.
    pub dbus_enabled: bool,
}

/// Shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    roster: Option<PathBuf>,
    enroll_dir: Option<PathBuf>,
    gallery: Option<PathBuf>,
    inbox: Option<PathBuf>,
    ledger: Option<PathBuf>,
    report: Option<PathBuf>,
    #[serde(rename = "match")]
    matching: FileMatch,
    queue_depth: Option<usize>,
    dbus_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileMatch {
    metric: Option<Metric>,
    threshold: Option<f32>,
    representative_mode: Option<RepresentativeMode>,
}

impl Config {
    /// Load `$ROLLCALL_CONFIG` (or the XDG default, if present), then apply
    /// `ROLLCALL_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => {
                let default = config_dir().join("config.toml");
                if default.exists() {
                    read_file(&default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, &|key| std::env::var(key).ok())
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::resolve(read_file(path)?, &|key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = data_dir();
        let path = |var: &str, from_file: Option<PathBuf>, default: &str| {
            env(var)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let file_metric = file.matching.metric.unwrap_or_default();
        let metric = match env("ROLLCALL_METRIC") {
            Some(v) => v.parse().map_err(|source| ConfigError::InvalidOption {
                var: "ROLLCALL_METRIC",
                source,
            })?,
            None => file_metric,
        };
        let representative_mode = match env("ROLLCALL_REPRESENTATIVE_MODE") {
            Some(v) => v.parse().map_err(|source| ConfigError::InvalidOption {
                var: "ROLLCALL_REPRESENTATIVE_MODE",
                source,
            })?,
            None => file.matching.representative_mode.unwrap_or_default(),
        };
        let threshold = match env_parse::<f32>(env, "ROLLCALL_THRESHOLD")? {
            Some(t) => t,
            // The threshold only makes sense relative to the metric in use; a
            // file threshold tuned for another metric is not carried over.
            None => file
                .matching
                .threshold
                .filter(|_| metric == file_metric)
                .unwrap_or_else(|| metric.default_threshold()),
        };
        if !threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        Ok(Self {
            roster_path: path("ROLLCALL_ROSTER", file.roster, "students.csv"),
            enroll_dir: path("ROLLCALL_ENROLL_DIR", file.enroll_dir, "enroll"),
            gallery_path: path("ROLLCALL_GALLERY", file.gallery, "gallery.db"),
            inbox_dir: path("ROLLCALL_INBOX", file.inbox, "inbox"),
            ledger_path: path("ROLLCALL_LEDGER", file.ledger, "attendance.csv"),
            report_path: env("ROLLCALL_REPORT").map(PathBuf::from).or(file.report),
            matching: MatchConfig {
                metric,
                threshold,
                representative_mode,
            },
            queue_depth: env_parse(env, "ROLLCALL_QUEUE_DEPTH")?
                .or(file.queue_depth)
                .unwrap_or(8)
                .max(1),
            dbus_enabled: match env("ROLLCALL_DBUS_ENABLED") {
                Some(v) => v != "0",
                None => file.dbus_enabled.unwrap_or(true),
            },
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_parse<T: std::str::FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = env(var) else {
        return Ok(None);
    };
    match value.trim().parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidValue { var, value }),
    }
}

fn home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("rollcall")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(toml_text: &str, vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let file: FileConfig = toml::from_str(toml_text).unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(file, &|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve("", &[]).unwrap();
        assert_eq!(config.matching, MatchConfig::default());
        assert_eq!(config.matching.threshold, 0.40);
        assert!(config.roster_path.ends_with("rollcall/students.csv"));
        assert!(config.report_path.is_none());
        assert_eq!(config.queue_depth, 8);
        assert!(config.dbus_enabled);
    }

    #[test]
    fn test_file_values() {
        let config = resolve(
            r#"
            roster = "/srv/class/students.csv"
            report = "/srv/class/faces.csv"
            dbus_enabled = false

            [match]
            metric = "euclidean"
            representative_mode = "mean"
            "#,
            &[],
        )
        .unwrap();
        assert_eq!(config.roster_path, PathBuf::from("/srv/class/students.csv"));
        assert_eq!(config.report_path, Some(PathBuf::from("/srv/class/faces.csv")));
        assert_eq!(config.matching.metric, Metric::Euclidean);
        assert_eq!(config.matching.representative_mode, RepresentativeMode::Mean);
        // Euclidean without an explicit threshold gets the Euclidean default.
        assert_eq!(config.matching.threshold, 0.80);
        assert!(!config.dbus_enabled);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = resolve(
            "ledger = \"/a.csv\"\n[match]\nthreshold = 0.5\n",
            &[
                ("ROLLCALL_LEDGER", "/b.csv"),
                ("ROLLCALL_THRESHOLD", "0.65"),
                ("ROLLCALL_METRIC", "COSINE"),
                ("ROLLCALL_DBUS_ENABLED", "0"),
            ],
        )
        .unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("/b.csv"));
        assert_eq!(config.matching.threshold, 0.65);
        assert_eq!(config.matching.metric, Metric::Cosine);
        assert!(!config.dbus_enabled);
    }

    #[test]
    fn test_env_metric_switch_drops_file_threshold() {
        let file = "[match]\nmetric = \"cosine\"\nthreshold = 0.55\n";

        let switched = resolve(file, &[("ROLLCALL_METRIC", "euclidean")]).unwrap();
        assert_eq!(switched.matching.metric, Metric::Euclidean);
        assert_eq!(switched.matching.threshold, 0.80);

        let same = resolve(file, &[("ROLLCALL_METRIC", "cosine")]).unwrap();
        assert_eq!(same.matching.threshold, 0.55);

        let explicit = resolve(
            file,
            &[("ROLLCALL_METRIC", "euclidean"), ("ROLLCALL_THRESHOLD", "0.7")],
        )
        .unwrap();
        assert_eq!(explicit.matching.threshold, 0.7);
    }

    #[test]
    fn test_invalid_metric_is_error() {
        let err = resolve("", &[("ROLLCALL_METRIC", "hamming")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { var: "ROLLCALL_METRIC", .. }));
    }

    #[test]
    fn test_invalid_threshold_is_error() {
        let err = resolve("", &[("ROLLCALL_THRESHOLD", "high")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "ROLLCALL_THRESHOLD", .. }));
        let err = resolve("", &[("ROLLCALL_THRESHOLD", "NaN")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(_)));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
        assert!(toml::from_str::<FileConfig>("[match]\nmetric = \"manhattan\"").is_err());
    }

    #[test]
    fn test_queue_depth_at_least_one() {
        let config = resolve("queue_depth = 0", &[]).unwrap();
        assert_eq!(config.queue_depth, 1);
    }
}
