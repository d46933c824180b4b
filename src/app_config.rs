//! Config file loading for CLI defaults.
//!
//! The file is a flat list of `key = value` lines; `#` starts a comment
//! outside quoted strings. Every value is range-checked while parsing so the
//! error names the key and the line.

use std::env;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

/// Values read from the config file. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Largest chunk held in memory, in MiB.
    pub max_chunk_size_mb: Option<u64>,
    pub max_concurrent_downloads: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    /// Retries per chunk before the download fails.
    pub max_retries: Option<u64>,
    pub retry_backoff_base_secs: Option<f64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub connect_timeout_secs: Option<u64>,
    /// Per-request timeout; 0 disables it.
    pub request_timeout_secs: Option<u64>,
    /// Directory bare URLs are saved into.
    pub output_dir: Option<PathBuf>,
    /// Root that temp names are made relative to.
    pub project_dir: Option<PathBuf>,
    /// Temp files live in `<saved_dir>/temp`.
    pub saved_dir: Option<PathBuf>,
}

const CHUNK_SIZE_MB_RANGE: RangeInclusive<u64> = 1..=1023;
const CONCURRENCY_RANGE: RangeInclusive<u64> = 1..=1000;
const TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 1..=3600;
const REQUEST_TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 0..=86_400;
const MAX_RETRIES_RANGE: RangeInclusive<u64> = 0..=10;
const BACKOFF_BASE_RANGE: RangeInclusive<f64> = 0.0..=600.0;
const BACKOFF_MULTIPLIER_RANGE: RangeInclusive<f64> = 1.0..=10.0;

/// Config file path plus its parsed contents, if one was found.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/chunkstream/config.toml`
/// 2. `$HOME/.config/chunkstream/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("chunkstream")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("chunkstream")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads an explicitly requested config file; it must exist.
pub fn load_explicit_file_config(path: &Path) -> Result<LoadedConfig> {
    let config = load_file_config(path)?;
    Ok(LoadedConfig {
        path: Some(path.to_path_buf()),
        config: Some(config),
    })
}

/// Loads the config from the default path if a file is there.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.exists() => Some(load_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

pub(crate) fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "max_chunk_size_mb" => {
                cfg.max_chunk_size_mb =
                    Some(parse_integer_in(value, &CHUNK_SIZE_MB_RANGE).with_context(context)?);
            }
            "max_concurrent_downloads" => {
                cfg.max_concurrent_downloads =
                    Some(parse_integer_in(value, &CONCURRENCY_RANGE).with_context(context)?);
            }
            "stall_timeout_secs" => {
                cfg.stall_timeout_secs =
                    Some(parse_integer_in(value, &TIMEOUT_SECS_RANGE).with_context(context)?);
            }
            "max_retries" => {
                cfg.max_retries =
                    Some(parse_integer_in(value, &MAX_RETRIES_RANGE).with_context(context)?);
            }
            "retry_backoff_base_secs" => {
                cfg.retry_backoff_base_secs =
                    Some(parse_float_in(value, &BACKOFF_BASE_RANGE).with_context(context)?);
            }
            "retry_backoff_multiplier" => {
                cfg.retry_backoff_multiplier =
                    Some(parse_float_in(value, &BACKOFF_MULTIPLIER_RANGE).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs =
                    Some(parse_integer_in(value, &TIMEOUT_SECS_RANGE).with_context(context)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(
                    parse_integer_in(value, &REQUEST_TIMEOUT_SECS_RANGE).with_context(context)?,
                );
            }
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "project_dir" => {
                cfg.project_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "saved_dir" => {
                cfg.saved_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_in(raw_value: &str, range: &RangeInclusive<u64>) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    let value =
        u64::try_from(value).map_err(|_| anyhow!("Integer value out of range for u64"))?;
    if !range.contains(&value) {
        bail!(
            "{value} is out of range. Expected range: {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(value)
}

fn parse_float_in(raw_value: &str, range: &RangeInclusive<f64>) -> Result<f64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected number");
    }
    let value = token.parse::<f64>()?;
    if !value.is_finite() || !range.contains(&value) {
        bail!(
            "{value} is out of range. Expected range: {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
            # chunk settings
            max_chunk_size_mb = 8
            max_concurrent_downloads = 5   # inline comment
            saved_dir = "/var/lib/app#1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.max_chunk_size_mb, Some(8));
        assert_eq!(cfg.max_concurrent_downloads, Some(5));
        assert_eq!(cfg.saved_dir, Some(PathBuf::from("/var/lib/app#1")));
        assert_eq!(cfg.stall_timeout_secs, None);
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
            max_chunk_size_mb = 100
            max_concurrent_downloads = 3
            stall_timeout_secs = 14
            max_retries = 3
            retry_backoff_base_secs = 1.5
            retry_backoff_multiplier = 2
            connect_timeout_secs = 30
            request_timeout_secs = 0
            output_dir = "downloads"
            project_dir = "/srv/project"
            saved_dir = "/srv/project/saved"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.max_retries, Some(3));
        assert_eq!(cfg.retry_backoff_base_secs, Some(1.5));
        assert_eq!(cfg.retry_backoff_multiplier, Some(2.0));
        assert_eq!(cfg.request_timeout_secs, Some(0));
        assert_eq!(cfg.output_dir, Some(PathBuf::from("downloads")));
        assert_eq!(cfg.project_dir, Some(PathBuf::from("/srv/project")));
    }

    #[test]
    fn test_parse_config_empty_is_default() {
        assert_eq!(parse_config_str("\n# nothing\n").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_out_of_range_reports_key_and_line() {
        let err = parse_config_str("max_retries = 2\nmax_chunk_size_mb = 1024\n").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("max_chunk_size_mb"), "{message}");
        assert!(message.contains("line 2"), "{message}");
        assert!(message.contains("1..=1023"), "{message}");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse_config_str("max_concurrent_downloads = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrent_downloads"));
    }

    #[test]
    fn test_backoff_multiplier_below_one_rejected() {
        let err = parse_config_str("retry_backoff_multiplier = 0.5").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn test_negative_integer_rejected() {
        assert!(parse_config_str("stall_timeout_secs = -5").is_err());
    }

    #[test]
    fn test_unquoted_path_rejected() {
        assert!(parse_config_str("saved_dir = /tmp/saved").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config_str("\nrate_limit = 5").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("rate_limit"), "{message}");
        assert!(message.contains("line 2"), "{message}");
    }

    #[test]
    fn test_missing_equals_rejected() {
        let err = parse_config_str("max_retries 3").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_explicit_file_config(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_explicit_file_loads() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_retries = 1\n").unwrap();
        let loaded = load_explicit_file_config(&path).unwrap();
        assert_eq!(loaded.path, Some(path));
        assert_eq!(loaded.config.unwrap().max_retries, Some(1));
    }
}
