//! The Sandbox Gateway (§2.1, §3, §6): turns a `SandboxParams` record into a confined run of one
//! executable and reports back a structured outcome. Built directly on `tabox`, in-process — no
//! subprocess, no JSON wire format, unlike the external sandbox binary the specification treats as
//! an out-of-scope collaborator.

use std::path::{Path, PathBuf};

use anyhow::{format_err, Context, Result};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use tabox::configuration::SandboxConfiguration;
use tabox::result::{ExitStatus, ResourceUsage};
use tabox::syscall_filter::SyscallFilter;
use tabox::{Sandbox as TaboxSandbox, SandboxImplementation};

use judge_dag::SandboxStatus;

/// A single bind mount: host path, sandbox-relative destination, and whether it's read-only.
#[derive(Debug, Clone)]
pub struct BindPath {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub readonly: bool,
}

impl BindPath {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>, readonly: bool) -> Self {
        BindPath {
            src: src.into(),
            dst: dst.into(),
            readonly,
        }
    }
}

/// Parameter record for one sandboxed run (§3 "Sandbox parameter record").
///
/// `workdir` is assigned by the Gateway, not by the caller: `run_sandbox` allocates a fresh
/// subdirectory of the challenge's scratch box for every invocation.
#[derive(Debug, Clone)]
pub struct SandboxParams {
    pub exe_path: PathBuf,
    pub args: Vec<String>,
    pub time_limit_ms: u64,
    pub memory_limit_kib: u64,
    pub stack_limit_kib: u64,
    pub output_limit_kib: u64,
    pub open_file_limit: u32,
    pub proc_limit: u32,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub extra_env: Vec<(String, String)>,
    pub allow_proc: bool,
    pub allow_mount_proc: bool,
    pub allow_mount_proc_rw: bool,
    pub cpuset: Option<String>,
    /// Bind mounts rooted at an absolute path inside the sandbox.
    pub bind_paths: Vec<BindPath>,
    /// Bind mounts rooted at a workdir-relative path inside the sandbox.
    pub bind_to_workdir_paths: Vec<BindPath>,
    /// Filenames, relative to the workdir, to move into the challenge's file store once the
    /// sandbox exits.
    pub copy_out_cache_files: Vec<String>,
}

impl Default for SandboxParams {
    fn default() -> Self {
        SandboxParams {
            exe_path: PathBuf::new(),
            args: Vec::new(),
            time_limit_ms: 1000,
            memory_limit_kib: 262_144,
            stack_limit_kib: 65_536,
            output_limit_kib: 65_536,
            open_file_limit: 16,
            proc_limit: 1,
            stdin: None,
            stdout: None,
            stderr: None,
            extra_env: Vec::new(),
            allow_proc: false,
            allow_mount_proc: false,
            allow_mount_proc_rw: false,
            cpuset: None,
            bind_paths: Vec::new(),
            bind_to_workdir_paths: Vec::new(),
            copy_out_cache_files: Vec::new(),
        }
    }
}

/// The readable system directories bind-mounted into every sandbox, mirroring a stock Linux
/// userland closely enough for gcc/clang/the JVM/python3 to find their own support files.
pub const READABLE_DIRS: &[&str] = &[
    "/lib",
    "/lib64",
    "/usr",
    "/bin",
    "/opt",
    "/etc/alternatives/",
    "/var/lib/dpkg/alternatives/",
];

/// Outcome of one sandboxed run, already mapped onto the engine's internal vocabulary.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub status: SandboxStatus,
    /// Process exit code, meaningful only when `status` is `Normal` or `NonzeroExitStatus`.
    pub exit_code: i32,
    /// Signal number, meaningful only when `status` is `Signalled`.
    pub signal: Option<i32>,
    /// Wall-clock time and CPU time, whichever is larger, in nanoseconds.
    pub time_ns: u64,
    /// Peak memory usage in bytes.
    pub memory_bytes: u64,
    /// Set when `status` is `RunnerError`: a human-readable diagnostic, never shown to the user.
    pub error: Option<String>,
}

/// Run one program inside the sandbox and wait for it to finish.
///
/// `workdir` must already exist and be writable; the caller (the challenge's scratch `Box`) owns
/// its lifetime and is responsible for removing it afterwards.
pub fn run_sandbox(params: &SandboxParams, workdir: &Path) -> Result<SandboxOutcome> {
    let config = build_configuration(params, workdir)
        .with_context(|| format!("failed to build sandbox configuration in {:?}", workdir))?;

    apply_cpuset(params.cpuset.as_deref());

    let sandbox = match SandboxImplementation::run(config) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            return Ok(SandboxOutcome {
                status: SandboxStatus::RunnerError,
                exit_code: 0,
                signal: None,
                time_ns: 0,
                memory_bytes: 0,
                error: Some(format!("failed to start sandbox: {e:?}")),
            })
        }
    };
    let result = match sandbox.wait() {
        Ok(result) => result,
        Err(e) => {
            return Ok(SandboxOutcome {
                status: SandboxStatus::RunnerError,
                exit_code: 0,
                signal: None,
                time_ns: 0,
                memory_bytes: 0,
                error: Some(format!("sandbox wait failed: {e:?}")),
            })
        }
    };

    Ok(classify(params, &result.status, &result.resource_usage))
}

/// Pin the calling thread to the cpuset string (a comma-separated list of cpu ids, e.g.
/// `"0,2,3"`), or release any earlier pinning back to every online core when `cpuset` is `None`.
/// `tabox` forks the sandboxed process from whichever thread calls
/// [`SandboxImplementation::run`], and a forked child inherits its parent thread's affinity mask
/// at fork time, so pinning the calling worker thread here pins the sandboxed process itself
/// (§4.3's "cpuset chosen round-robin from configuration").
fn apply_cpuset(cpuset: Option<&str>) {
    let mut set = CpuSet::new();
    match cpuset {
        Some(spec) => {
            for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if let Ok(cpu) = part.parse::<usize>() {
                    let _ = set.set(cpu);
                }
            }
        }
        None => {
            for cpu in 0..CpuSet::count() {
                let _ = set.set(cpu);
            }
        }
    }
    if let Err(e) = sched_setaffinity(Pid::from_raw(0), &set) {
        log::warn!("failed to set cpu affinity: {e}");
    }
}

fn build_configuration(params: &SandboxParams, workdir: &Path) -> Result<SandboxConfiguration> {
    let mut config = SandboxConfiguration::default();
    config.working_directory(workdir);
    config.mount(workdir, workdir, true);

    config.stdin(params.stdin.clone().unwrap_or_else(|| "/dev/null".into()));
    config.stdout(params.stdout.clone().unwrap_or_else(|| "/dev/null".into()));
    config.stderr(params.stderr.clone().unwrap_or_else(|| "/dev/null".into()));

    if let Ok(path) = std::env::var("PATH") {
        config.env("PATH", path);
    }
    for (key, value) in &params.extra_env {
        config.env(key, value);
    }

    // tabox only has integer-second granularity; the precise sub-second comparison that decides
    // TimeLimitExceeded happens in `classify` against the exact `time_limit_ms`, so rounding up
    // here only affects how long the kernel-level backstop takes to fire, not the verdict. Both
    // the CPU-time limit and the wall-clock limit are set to the same rounded value: a program
    // that blocks without burning CPU (sleeping, waiting on stdin) would otherwise never hit
    // `time_limit` and could hang the sandbox indefinitely.
    let time_limit_s = params.time_limit_ms.div_ceil(1000).max(1);
    config.time_limit(time_limit_s);
    config.wall_time_limit(time_limit_s);
    config.memory_limit(params.memory_limit_kib * 1024);
    config.stack_limit(params.stack_limit_kib * 1024);
    config.syscall_filter(SyscallFilter::build(params.allow_proc, true));

    if params.allow_mount_proc {
        config.mount_proc(true);
    }

    for dir in READABLE_DIRS {
        if Path::new(dir).is_dir() {
            config.mount(dir, dir, false);
        }
    }
    for bind in &params.bind_paths {
        config.mount(&bind.src, &bind.dst, !bind.readonly);
    }
    for bind in &params.bind_to_workdir_paths {
        let dst = workdir.join(&bind.dst);
        config.mount(&bind.src, dst, !bind.readonly);
    }

    if !params.exe_path.is_absolute() {
        return Err(format_err!(
            "sandbox executable path must be absolute, got {:?}",
            params.exe_path
        ));
    }
    config.executable(&params.exe_path);
    for arg in &params.args {
        config.arg(arg);
    }
    config.uid(1000);
    config.gid(1000);

    Ok(config)
}

/// Map tabox's raw exit status + resource usage onto `SandboxStatus`, checking limits in the same
/// order the engine's reference implementation does: a limit violation always takes priority over
/// the raw exit status, since exceeding memory or time can itself trigger a `Killed`/signal exit.
fn classify(
    params: &SandboxParams,
    status: &ExitStatus,
    resources: &ResourceUsage,
) -> SandboxOutcome {
    let time_ns = (resources.wall_time_usage.max(resources.user_cpu_time) * 1e9) as u64;
    let memory_bytes = resources.memory_usage;

    if time_ns > params.time_limit_ms * 1_000_000 {
        return SandboxOutcome {
            status: SandboxStatus::TimeLimitExceeded,
            exit_code: 0,
            signal: None,
            time_ns,
            memory_bytes,
            error: None,
        };
    }
    if memory_bytes > params.memory_limit_kib * 1024 {
        return SandboxOutcome {
            status: SandboxStatus::MemoryLimitExceeded,
            exit_code: 0,
            signal: None,
            time_ns,
            memory_bytes,
            error: None,
        };
    }

    match status {
        ExitStatus::ExitCode(0) => SandboxOutcome {
            status: SandboxStatus::Normal,
            exit_code: 0,
            signal: None,
            time_ns,
            memory_bytes,
            error: None,
        },
        ExitStatus::ExitCode(code) => SandboxOutcome {
            status: SandboxStatus::NonzeroExitStatus,
            exit_code: *code,
            signal: None,
            time_ns,
            memory_bytes,
            error: None,
        },
        ExitStatus::Signal(signal) => {
            let status = if is_syscall_signal(*signal) {
                SandboxStatus::DisallowedSyscall
            } else {
                SandboxStatus::Signalled
            };
            SandboxOutcome {
                status,
                exit_code: 0,
                signal: Some(*signal),
                time_ns,
                memory_bytes,
                error: None,
            }
        }
        ExitStatus::Killed => SandboxOutcome {
            status: SandboxStatus::TimeLimitExceeded,
            exit_code: 0,
            signal: None,
            time_ns,
            memory_bytes,
            error: None,
        },
    }
}

/// `tabox`'s syscall filter kills the process with `SIGSYS` on a disallowed syscall.
fn is_syscall_signal(signal: i32) -> bool {
    const SIGSYS: i32 = 31;
    signal == SIGSYS
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> SandboxParams {
        SandboxParams {
            time_limit_ms: 1000,
            memory_limit_kib: 1024,
            ..Default::default()
        }
    }

    fn resources(wall: f64, mem_bytes: u64) -> ResourceUsage {
        ResourceUsage {
            memory_usage: mem_bytes,
            user_cpu_time: wall,
            system_cpu_time: 0.0,
            wall_time_usage: wall,
        }
    }

    #[test]
    fn normal_exit_is_normal() {
        let outcome = classify(&params(), &ExitStatus::ExitCode(0), &resources(0.1, 512));
        assert_eq!(outcome.status, SandboxStatus::Normal);
    }

    #[test]
    fn nonzero_exit_maps_to_nonzero_exit_status() {
        let outcome = classify(&params(), &ExitStatus::ExitCode(42), &resources(0.1, 512));
        assert_eq!(outcome.status, SandboxStatus::NonzeroExitStatus);
        assert_eq!(outcome.exit_code, 42);
    }

    #[test]
    fn time_limit_dominates_exit_code() {
        // Exceeding the wall clock can still exit 0 if the kill races the process; the limit
        // check must run before the exit-code dispatch.
        let outcome = classify(&params(), &ExitStatus::ExitCode(0), &resources(5.0, 512));
        assert_eq!(outcome.status, SandboxStatus::TimeLimitExceeded);
    }

    #[test]
    fn memory_limit_dominates_signal() {
        let outcome = classify(
            &params(),
            &ExitStatus::Signal(9),
            &resources(0.1, 10 * 1024 * 1024),
        );
        assert_eq!(outcome.status, SandboxStatus::MemoryLimitExceeded);
    }

    #[test]
    fn ordinary_signal_is_signalled() {
        let outcome = classify(&params(), &ExitStatus::Signal(11), &resources(0.1, 512));
        assert_eq!(outcome.status, SandboxStatus::Signalled);
        assert_eq!(outcome.signal, Some(11));
    }

    #[test]
    fn sigsys_is_disallowed_syscall() {
        let outcome = classify(&params(), &ExitStatus::Signal(31), &resources(0.1, 512));
        assert_eq!(outcome.status, SandboxStatus::DisallowedSyscall);
    }

    #[test]
    fn killed_without_limit_breach_is_time_limit_exceeded() {
        let outcome = classify(&params(), &ExitStatus::Killed, &resources(0.1, 512));
        assert_eq!(outcome.status, SandboxStatus::TimeLimitExceeded);
    }
}
