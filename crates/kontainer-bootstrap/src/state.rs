// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide bootstrap state, queried by the managed runtime after the
//! constructor returns (spec §3 "Global bootstrap state", Design Notes
//! §9). Written exactly once per process; `OnceCell` (the same
//! once-initialized-cell primitive `ah-command-trace-shim` uses for its
//! own per-process shim state) gives us that guarantee without a mutable
//! static.

use nix::unistd::Pid;
use once_cell::sync::OnceCell;

static IS_INIT_PROCESS: OnceCell<bool> = OnceCell::new();
static INIT_PID: OnceCell<Pid> = OnceCell::new();

/// Record that this process is (or is not) the resumed Stage-2 / init
/// process. Idempotent if called twice with the same value; panics if
/// called twice with different values, since the bootstrap only ever
/// sets this once per process by construction.
pub(crate) fn set_is_init_process(value: bool) {
    if let Err(existing) = IS_INIT_PROCESS.set(value) {
        assert_eq!(
            existing, value,
            "is_init_process set twice with different values"
        );
    }
}

/// True exactly in the process that returned from the constructor as
/// Stage-2 (spec §6 "Query API").
pub fn is_init_process() -> bool {
    IS_INIT_PROCESS.get().copied().unwrap_or(false)
}

pub(crate) fn set_init_pid(pid: Pid) {
    let _ = INIT_PID.set(pid);
}

/// Stage-2's PID as known to its kernel parent (spec §6). Only
/// meaningful in Stage-0's ancestry — unset elsewhere.
pub fn get_init_pid() -> Option<Pid> {
    INIT_PID.get().copied()
}
