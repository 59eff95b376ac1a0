// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process Cloner: creates a sibling process — one whose parent is the
//! *caller's* parent, not the caller — so that `getppid()` in the new
//! process equals the grandparent's PID (spec §4.3).
//!
//! Unlike `sandbox-core::process::ProcessManager`, which gets by with
//! plain `nix::unistd::fork()`, this bootstrap needs both the sibling
//! property (`CLONE_PARENT`) *and* fork's "both branches resume at the
//! call site" behavior: Stage-2 must return out of this call, back up
//! through the Rust call stack, through the constructor, and into the
//! managed runtime's own entry point exactly as a forked child would.
//! `nix::sched::clone` can't give us that — it hands the child a
//! caller-supplied stack and an entry closure, with no way back into the
//! parent's stack. So, following the raw-syscall pattern the `porkg`
//! container runtime uses for its own `clone3`-based process spawner, we
//! call the kernel's `clone`/`clone3` directly with a null stack, which
//! asks the kernel for exactly fork's copy-the-stack semantics plus our
//! choice of flags (spec Design Notes §9).

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::error::{Error, Result};

const CLONE_PARENT: u64 = 0x0000_8000;

/// Outcome of [`clone_sibling`], mirroring `nix::unistd::ForkResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneResult {
    /// Running in the original process; `child` is the sibling's pid.
    Parent { child: Pid },
    /// Running in the newly created sibling.
    Child,
}

/// Create a sibling of the caller (same parent, per `CLONE_PARENT`) that
/// resumes execution at this call site, like `fork()`.
pub fn clone_sibling() -> Result<CloneResult> {
    match clone3_sibling() {
        Ok(r) => Ok(r),
        Err(Errno::ENOSYS) => clone_legacy_sibling(),
        Err(e) => Err(Error::SiblingClone(e)),
    }
}

#[repr(C)]
struct Clone3Args {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

fn clone3_sibling() -> std::result::Result<CloneResult, Errno> {
    let mut args = Clone3Args {
        flags: CLONE_PARENT,
        pidfd: 0,
        child_tid: 0,
        parent_tid: 0,
        // No SIGCHLD: the bootstrap reaps its own children via the sync
        // protocol and explicit waitpid, not signal delivery.
        exit_signal: 0,
        stack: 0,
        stack_size: 0,
        tls: 0,
        set_tid: 0,
        set_tid_size: 0,
        cgroup: 0,
    };
    let args_ptr = &mut args as *mut Clone3Args;
    let args_size = std::mem::size_of::<Clone3Args>();

    match unsafe { libc::syscall(libc::SYS_clone3, args_ptr, args_size) } {
        -1 => Err(Errno::last()),
        0 => Ok(CloneResult::Child),
        ret if ret > 0 => Ok(CloneResult::Parent {
            child: Pid::from_raw(ret as i32),
        }),
        _ => Err(Errno::UnknownErrno),
    }
}

fn clone_legacy_sibling() -> Result<CloneResult> {
    // Null stack + null *_tid pointers + zero tls asks the legacy `clone`
    // syscall for the same copy-the-caller's-stack behavior as `fork()`,
    // the same fallback shape `porkg` uses when `clone3` is unavailable.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone,
            CLONE_PARENT as libc::c_ulong,
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::pid_t>(),
            std::ptr::null_mut::<libc::pid_t>(),
            0u64,
        )
    };
    match ret {
        -1 => Err(Error::SiblingClone(Errno::last())),
        0 => Ok(CloneResult::Child),
        pid => Ok(CloneResult::Parent {
            child: Pid::from_raw(pid as i32),
        }),
    }
}
