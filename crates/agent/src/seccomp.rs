//! Syscall filters for the code sandbox
//!
//! Filters come in two stages. The spawn stage is applied in `pre_exec` and
//! keeps the interpreter from creating processes, tracing, or opening
//! anything but Unix sockets. `execve` can only be refused once the
//! interpreter is running, so the exec stage is handed to the prelude as raw
//! bytecode and loaded with `prctl` before the snippet starts.

use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::convert::TryInto;
use std::io;

/// Compiled filters for one sandbox run
pub struct SyscallFilters {
    /// Applied in the child before exec
    pub spawn: Vec<BpfProgram>,
    /// Installed by the prelude once the interpreter is up
    pub exec: BpfProgram,
}

impl SyscallFilters {
    pub fn build() -> Result<Self, String> {
        Ok(Self {
            spawn: vec![deny_processes()?, hide_clone3()?],
            exec: deny_exec()?,
        })
    }
}

fn target_arch() -> Result<TargetArch, String> {
    std::env::consts::ARCH
        .try_into()
        .map_err(|e: seccompiler::BackendError| e.to_string())
}

/// Compile a filter answering `errno` for matching calls and allowing the rest
fn refuse(rules: Vec<(i64, Vec<SeccompRule>)>, errno: i32) -> Result<BpfProgram, String> {
    let filter = SeccompFilter::new(
        rules.into_iter().collect::<BTreeMap<_, _>>(),
        SeccompAction::Allow,
        SeccompAction::Errno(errno as u32),
        target_arch()?,
    )
    .map_err(|e| e.to_string())?;

    filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| e.to_string())
}

fn arg_rule(
    index: u8,
    len: SeccompCmpArgLen,
    op: SeccompCmpOp,
    value: u64,
) -> Result<SeccompRule, String> {
    let condition = SeccompCondition::new(index, len, op, value).map_err(|e| e.to_string())?;
    SeccompRule::new(vec![condition]).map_err(|e| e.to_string())
}

fn deny_processes() -> Result<BpfProgram, String> {
    #[allow(unused_mut)]
    let mut rules = vec![
        // Threads carry CLONE_THREAD; any other clone is a new process
        (
            libc::SYS_clone,
            vec![arg_rule(
                0,
                SeccompCmpArgLen::Qword,
                SeccompCmpOp::MaskedEq(libc::CLONE_THREAD as u64),
                0,
            )?],
        ),
        (
            libc::SYS_socket,
            vec![arg_rule(
                0,
                SeccompCmpArgLen::Dword,
                SeccompCmpOp::Ne,
                libc::AF_UNIX as u64,
            )?],
        ),
        (libc::SYS_ptrace, vec![]),
    ];

    #[cfg(target_arch = "x86_64")]
    {
        rules.push((libc::SYS_fork, vec![]));
        rules.push((libc::SYS_vfork, vec![]));
    }

    refuse(rules, libc::EPERM)
}

/// `clone3` flags live in memory the filter cannot read. glibc falls back
/// to `clone` on ENOSYS, where the flags are checked.
fn hide_clone3() -> Result<BpfProgram, String> {
    refuse(vec![(libc::SYS_clone3, vec![])], libc::ENOSYS)
}

fn deny_exec() -> Result<BpfProgram, String> {
    refuse(
        vec![(libc::SYS_execve, vec![]), (libc::SYS_execveat, vec![])],
        libc::EPERM,
    )
}

/// Raw `sock_filter` array in native byte order
pub fn to_bytes(program: &BpfProgram) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(program.len() * 8);
    for insn in program {
        bytes.extend_from_slice(&insn.code.to_ne_bytes());
        bytes.push(insn.jt);
        bytes.push(insn.jf);
        bytes.extend_from_slice(&insn.k.to_ne_bytes());
    }
    bytes
}

/// Install `programs` on the calling thread. Allocates nothing, so it is
/// safe between fork and exec.
pub fn apply(programs: &[BpfProgram]) -> io::Result<()> {
    for program in programs {
        if seccompiler::apply_filter(program).is_err() {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
