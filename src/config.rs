//! Runtime configuration (SPEC_FULL.md §B.3): environment variables with defaults, analogous to
//! how the codebase this engine is grounded on builds its CLI `Opt` from `clap`, except here the
//! process runs as a long-lived server rather than a one-shot CLI invocation.
//!
//! Precedence: CLI flag > TOML file (`--config`) > environment variable > built-in default.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "judge", about = "Online-judge evaluation engine")]
pub struct Opt {
    /// TOML file overriding environment defaults.
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    /// Address the control endpoint listens on.
    #[arg(long = "bind-addr")]
    pub bind_addr: Option<SocketAddr>,

    /// Maximum number of tasks running concurrently across all challenges.
    #[arg(long = "max-concurrent")]
    pub max_concurrent: Option<usize>,
}

/// File layout accepted by `--config`; every field is optional so a partial override is legal.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<SocketAddr>,
    max_concurrent: Option<usize>,
    sandbox_root: Option<PathBuf>,
    cpuset: Option<String>,
    checker_dir: Option<PathBuf>,
    archive_outputs: Option<bool>,
}

/// Immutable process-wide configuration, shared by the scheduler, the gateway and the control
/// endpoint behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_concurrent: usize,
    pub sandbox_root: PathBuf,
    /// Round-robin cpuset strings assigned to Execute tasks (`JUDGE_CPUSET`, §4.3). Empty means
    /// no cpuset pinning.
    pub cpuset: Vec<String>,
    /// Directory holding the bundled DIFF-family checker binaries (`JUDGE_CHECKER_DIR`, §4.4).
    pub checker_dir: PathBuf,
    /// Whether to opportunistically zip every produced user-output file (§C.1 of SPEC_FULL.md).
    /// Off by default: a debugging aid, not needed for scoring.
    pub archive_outputs: bool,
}

impl Config {
    pub fn load(opt: &Opt) -> Result<Self> {
        let file = match &opt.config_file {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let bind_addr = opt
            .bind_addr
            .or(file.bind_addr)
            .or_else(|| env_parsed("JUDGE_BIND_ADDR"))
            .unwrap_or_else(|| "0.0.0.0:2503".parse().expect("valid default bind addr"));

        let max_concurrent = opt
            .max_concurrent
            .or(file.max_concurrent)
            .or_else(|| env_parsed("JUDGE_MAX_CONCURRENT"))
            .unwrap_or_else(num_cpus::get);

        let sandbox_root = file
            .sandbox_root
            .or_else(|| env::var("JUDGE_SANDBOX_ROOT").ok().map(PathBuf::from))
            .map(Ok)
            .unwrap_or_else(default_sandbox_root)?;

        let cpuset = file
            .cpuset
            .or_else(|| env::var("JUDGE_CPUSET").ok())
            .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        let checker_dir = file
            .checker_dir
            .or_else(|| env::var("JUDGE_CHECKER_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/usr/lib/judge/checkers"));

        let archive_outputs = file
            .archive_outputs
            .or_else(|| env_parsed("JUDGE_ARCHIVE_OUTPUTS"))
            .unwrap_or(false);

        Ok(Config {
            bind_addr,
            max_concurrent,
            sandbox_root,
            cpuset,
            checker_dir,
            archive_outputs,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_sandbox_root() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("judge-sandbox-")
        .tempdir()
        .context("failed to allocate default sandbox root")?;
    Ok(dir.keep())
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path:?}"))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {path:?}"))
}
