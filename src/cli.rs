//! CLI argument definitions using clap derive macros.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

/// Download files over HTTP in memory-bounded chunks.
///
/// Each TARGET is either `URL=PATH` or a bare `URL`, which is saved into the
/// output directory under the last segment of its path. URLs carrying a
/// query string can only be given bare.
#[derive(Parser, Debug)]
#[command(name = "chunkstream")]
#[command(author, version, about)]
pub struct Args {
    /// Downloads to run (`URL=PATH` or `URL`)
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Directory for targets given without a path
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Read settings from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum downloads fetching at once (1-1000)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub concurrency: Option<u16>,

    /// Largest chunk held in memory, in MiB (1-1023)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1023))]
    pub chunk_size_mb: Option<u16>,

    /// Retries per chunk for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Seconds without data before a chunk is retried (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub stall_timeout: Option<u64>,

    /// Content-Type header sent with every request
    #[arg(long)]
    pub content_type: Option<String>,

    /// Print one JSON report per download instead of text
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// One parsed download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub save_path: PathBuf,
}

/// Splits `URL=PATH`, or derives the path for a bare URL.
pub fn parse_target(raw: &str, output_dir: &Path) -> Result<Target> {
    let (url, explicit_path) = match raw.rsplit_once('=') {
        Some((url, path)) if !url.contains('?') && !path.is_empty() => (url, Some(path)),
        _ => (raw, None),
    };

    let parsed = Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Unsupported URL scheme '{}' in '{url}'", parsed.scheme());
    }

    let save_path = match explicit_path {
        Some(path) => PathBuf::from(path),
        None => output_dir.join(file_name_from_url(&parsed)),
    };
    Ok(Target {
        url: url.to_string(),
        save_path,
    })
}

/// File name from the last non-empty path segment, percent-decoded.
fn file_name_from_url(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).next_back());
    let Some(last) = last else {
        return "download.bin".to_string();
    };
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    sanitize_filename(&decoded)
}

fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Flag Tests ====================

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["chunkstream"]).unwrap();
        assert!(args.targets.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
        assert_eq!(args.concurrency, None);
        assert_eq!(args.max_retries, None);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["chunkstream", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_overrides_parse() {
        let args = Args::try_parse_from([
            "chunkstream",
            "-c",
            "7",
            "--chunk-size-mb",
            "16",
            "-r",
            "0",
            "--stall-timeout",
            "30",
            "--json",
            "http://host/a=out/a",
        ])
        .unwrap();
        assert_eq!(args.concurrency, Some(7));
        assert_eq!(args.chunk_size_mb, Some(16));
        assert_eq!(args.max_retries, Some(0));
        assert_eq!(args.stall_timeout, Some(30));
        assert!(args.json);
        assert_eq!(args.targets, vec!["http://host/a=out/a"]);
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        assert!(Args::try_parse_from(["chunkstream", "-c", "0"]).is_err());
        assert!(Args::try_parse_from(["chunkstream", "-c", "1001"]).is_err());
    }

    #[test]
    fn test_cli_chunk_size_out_of_range_rejected() {
        assert!(Args::try_parse_from(["chunkstream", "--chunk-size-mb", "1024"]).is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["chunkstream", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    // ==================== Target Tests ====================

    #[test]
    fn test_target_with_path() {
        let target = parse_target("https://host/file.bin=out/x.bin", Path::new("dl")).unwrap();
        assert_eq!(target.url, "https://host/file.bin");
        assert_eq!(target.save_path, PathBuf::from("out/x.bin"));
    }

    #[test]
    fn test_bare_target_uses_output_dir() {
        let target = parse_target("https://host/a/report%20v2.pdf", Path::new("dl")).unwrap();
        assert_eq!(target.save_path, PathBuf::from("dl/report v2.pdf"));
    }

    #[test]
    fn test_bare_target_with_query_keeps_whole_url() {
        let target = parse_target("https://host/get?id=42", Path::new(".")).unwrap();
        assert_eq!(target.url, "https://host/get?id=42");
        assert_eq!(target.save_path, PathBuf::from("./get"));
    }

    #[test]
    fn test_bare_target_without_path_segment() {
        let target = parse_target("https://host/", Path::new("dl")).unwrap();
        assert_eq!(target.save_path, PathBuf::from("dl/download.bin"));
    }

    #[test]
    fn test_invalid_targets_rejected() {
        assert!(parse_target("not a url", Path::new(".")).is_err());
        assert!(parse_target("ftp://host/file=out", Path::new(".")).is_err());
    }

    #[test]
    fn test_sanitize_filename_replaces_separators() {
        assert_eq!(sanitize_filename("a:b*c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename(".."), "download.bin");
    }
}
