//! Merges defaults, the config file and CLI flags into one download config.
//!
//! Precedence: CLI flag > config file > built-in default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chunkstream_core::download::TempLayout;
use chunkstream_core::{DownloadConfig, RetryPolicy};

use crate::app_config::FileConfig;
use crate::cli::Args;

/// Everything `main` needs besides the download targets.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) download: DownloadConfig,
    pub(crate) output_dir: PathBuf,
}

pub(crate) fn build_runtime_settings(
    args: &Args,
    file_config: Option<&FileConfig>,
) -> Result<RuntimeSettings> {
    let file = file_config.cloned().unwrap_or_default();
    let mut config = DownloadConfig::default();

    if let Some(mb) = args.chunk_size_mb.map(u64::from).or(file.max_chunk_size_mb) {
        config = config.with_max_chunk_size_mb(i64::try_from(mb).unwrap_or(i64::MAX));
    }
    if let Some(limit) = args
        .concurrency
        .map(u64::from)
        .or(file.max_concurrent_downloads)
    {
        config = config.with_max_concurrent_downloads(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    if let Some(secs) = args.stall_timeout.or(file.stall_timeout_secs) {
        config = config.with_stall_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = file.connect_timeout_secs {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = file.request_timeout_secs {
        config = config.with_request_timeout(Duration::from_secs(secs));
    }

    let defaults = RetryPolicy::default();
    let max_retries = args
        .max_retries
        .map(u32::from)
        .or(file.max_retries.and_then(|n| u32::try_from(n).ok()))
        .unwrap_or(defaults.max_retries());
    let base_delay = file
        .retry_backoff_base_secs
        .map_or(defaults.base_delay(), Duration::from_secs_f64);
    #[allow(clippy::cast_possible_truncation)]
    let multiplier = file
        .retry_backoff_multiplier
        .map_or(defaults.backoff_multiplier(), |m| m as f32);
    config = config.with_retry(RetryPolicy::new(max_retries, base_delay, multiplier));

    if file.project_dir.is_some() || file.saved_dir.is_some() {
        let fallback = TempLayout::default();
        let project_dir = file.project_dir.unwrap_or(fallback.project_dir);
        let saved_dir = file
            .saved_dir
            .unwrap_or_else(|| project_dir.join("saved"));
        config = config.with_layout(TempLayout::new(project_dir, saved_dir));
    }

    config.validate().context("Invalid download settings")?;

    let output_dir = args
        .output_dir
        .clone()
        .or(file.output_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(RuntimeSettings {
        download: config,
        output_dir,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::app_config::parse_config_str;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["chunkstream"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_file_or_flags() {
        let settings = build_runtime_settings(&args(&[]), None).unwrap();
        assert_eq!(settings.download.max_chunk_size, 100 * 1024 * 1024);
        assert_eq!(settings.download.max_concurrent_downloads, 3);
        assert_eq!(settings.download.retry.max_retries(), 3);
        assert_eq!(settings.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_file_values_apply() {
        let file = parse_config_str(
            "max_chunk_size_mb = 4\nmax_concurrent_downloads = 8\nrequest_timeout_secs = 60\noutput_dir = \"dl\"\n",
        )
        .unwrap();
        let settings = build_runtime_settings(&args(&[]), Some(&file)).unwrap();
        assert_eq!(settings.download.max_chunk_size, 4 * 1024 * 1024);
        assert_eq!(settings.download.max_concurrent_downloads, 8);
        assert_eq!(settings.download.request_timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.output_dir, PathBuf::from("dl"));
    }

    #[test]
    fn test_cli_flags_override_file() {
        let file = parse_config_str("max_concurrent_downloads = 8\nmax_retries = 5\n").unwrap();
        let settings =
            build_runtime_settings(&args(&["-c", "2", "-r", "1", "-o", "out"]), Some(&file))
                .unwrap();
        assert_eq!(settings.download.max_concurrent_downloads, 2);
        assert_eq!(settings.download.retry.max_retries(), 1);
        assert_eq!(settings.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_saved_dir_defaults_under_project_dir() {
        let file = parse_config_str("project_dir = \"/srv/app\"\n").unwrap();
        let settings = build_runtime_settings(&args(&[]), Some(&file)).unwrap();
        assert_eq!(settings.download.layout.saved_dir, PathBuf::from("/srv/app/saved"));
    }
}
