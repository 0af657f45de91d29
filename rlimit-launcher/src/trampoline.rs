//! The trampoline's own logic: install rlimits on the *current* process,
//! then replace its image with the target executable via `execvp`.
//!
//! This module is only ever reached in the freshly-forked child; it never
//! returns on success because `execvp` replaces the running image.

use std::ffi::CString;

use clap::Parser;

use crate::rlimits::RlimitName;
use crate::rlimits::RlimitPair;
use crate::rlimits::Rlimits;

#[derive(Debug, Parser)]
#[command(name = "rlimit-trampoline")]
struct TrampolineArgs {
    /// JSON-encoded `Rlimits` map to apply to this process before exec.
    #[arg(long)]
    rlimits: String,

    /// The target executable followed by its argv, separated by `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Parses argv, installs the requested rlimits on the current process, then
/// `execvp`s the target executable. Never returns: on success the process
/// image is replaced; on failure the process exits with a diagnostic on
/// stderr, since there is no supervisor RPC channel to report through yet.
pub fn run_trampoline_main() -> ! {
    let args = TrampolineArgs::parse();

    let rlimits: Rlimits = match serde_json::from_str(&args.rlimits) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("rlimit-trampoline: invalid --rlimits payload: {e}");
            std::process::exit(70);
        }
    };

    if let Err(e) = apply_rlimits(&rlimits) {
        eprintln!("rlimit-trampoline: {e}");
        std::process::exit(71);
    }

    if args.command.is_empty() {
        eprintln!("rlimit-trampoline: no command given to exec");
        std::process::exit(72);
    }

    exec_replace(&args.command);
}

fn apply_rlimits(rlimits: &Rlimits) -> Result<(), crate::error::LaunchError> {
    for (name, pair) in rlimits {
        set_one_rlimit(*name, *pair)?;
    }
    Ok(())
}

fn set_one_rlimit(name: RlimitName, pair: RlimitPair) -> Result<(), crate::error::LaunchError> {
    let limit = libc::rlimit {
        rlim_cur: to_rlim_t(pair.soft),
        rlim_max: to_rlim_t(pair.hard),
    };
    let rc = unsafe { libc::setrlimit(name.to_libc_resource(), &limit) };
    if rc != 0 {
        return Err(crate::error::LaunchError::SetRlimit(
            format!("{name:?}"),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Negative values (e.g. `-1`) mean "unlimited", matching the POSIX
/// `RLIM_INFINITY` convention operators expect from `ulimit`-style config.
fn to_rlim_t(value: i64) -> libc::rlim_t {
    if value < 0 {
        libc::RLIM_INFINITY
    } else {
        value as libc::rlim_t
    }
}

/// Replaces the current process image with `command[0]`, passing
/// `command` as argv. Inherited fds, env, and cwd carry over untouched.
fn exec_replace(command: &[String]) -> ! {
    #[expect(clippy::expect_used)]
    let c_command = CString::new(command[0].as_str()).expect("executable path has no NUL bytes");
    #[expect(clippy::expect_used)]
    let c_args: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_str()).expect("argv entry has no NUL bytes"))
        .collect();
    let mut c_args_ptrs: Vec<*const libc::c_char> = c_args.iter().map(|arg| arg.as_ptr()).collect();
    c_args_ptrs.push(std::ptr::null());

    unsafe {
        libc::execvp(c_command.as_ptr(), c_args_ptrs.as_ptr());
    }

    let err = std::io::Error::last_os_error();
    eprintln!("rlimit-trampoline: execvp({}) failed: {err}", command[0]);
    std::process::exit(73);
}
