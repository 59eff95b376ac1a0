// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Namespace Sequencer: applies the unshare operations in the
//! correctness-critical order spec.md §4.4 lays out, interleaved with
//! the uid/gid map handshake.
//!
//! Adapted from `sandbox-core::process::ProcessManager::setup_namespaces_in_child_with_sync`,
//! which performs the same unshare-then-sync-then-become-root dance but
//! for its own broader sandbox product; this sequencer follows spec.md's
//! narrower, literal six-namespace contract and its exact step ordering.

use std::os::fd::RawFd;

use nix::sched::{unshare, CloneFlags};
use nix::sys::prctl;
use nix::unistd::{setgid, setuid, Gid, Pid, Uid};
use tracing::{debug, info};

use crate::config;
use crate::error::{Error, Result};
use crate::sync::{self, Token};

/// Decoded namespace request, derived from [`config::CloneFlags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub user_ns: bool,
    pub pid_ns: bool,
    pub net_ns: bool,
    pub ipc_ns: bool,
    pub uts_ns: bool,
    pub mount_ns: bool,
}

impl From<config::CloneFlags> for NamespaceConfig {
    fn from(flags: config::CloneFlags) -> Self {
        Self {
            user_ns: flags.contains(config::CloneFlags::USER),
            pid_ns: flags.contains(config::CloneFlags::PID),
            net_ns: flags.contains(config::CloneFlags::NET),
            ipc_ns: flags.contains(config::CloneFlags::IPC),
            uts_ns: flags.contains(config::CloneFlags::UTS),
            mount_ns: flags.contains(config::CloneFlags::MOUNT),
        }
    }
}

impl NamespaceConfig {
    fn other_flags(self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.mount_ns {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.net_ns {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.uts_ns {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.ipc_ns {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        flags
    }
}

/// Apply the namespace unshares in the required order: USER first, then
/// {MOUNT, NET, UTS, IPC} in any order among themselves, then PID last
/// (spec §4.4). `sync_fd` is the upward channel used for the uid/gid map
/// handshake when `config.user_ns` is set.
pub fn run(config: &NamespaceConfig, sync_fd: RawFd) -> Result<()> {
    if config.user_ns {
        user_namespace_handshake(sync_fd)?;
    }

    let rest = config.other_flags();
    if !rest.is_empty() {
        debug!(?rest, "unsharing mount/net/uts/ipc namespaces");
        unshare(rest).map_err(Error::Clone)?;
    }

    // PID namespace last: unshare(CLONE_NEWPID) does not move the caller
    // into the namespace, only the next clone/fork does (spec §4.4).
    if config.pid_ns {
        debug!("unsharing PID namespace");
        unshare(CloneFlags::CLONE_NEWPID).map_err(Error::Clone)?;
    }

    info!("namespace sequencing complete");
    Ok(())
}

/// Steps 1-6 of spec §4.4's USER branch.
fn user_namespace_handshake(sync_fd: RawFd) -> Result<()> {
    debug!("unsharing user namespace");
    unshare(CloneFlags::CLONE_NEWUSER).map_err(Error::Clone)?;

    // Required so an external, privileged observer can open
    // /proc/<pid>/uid_map for writing against this (now unprivileged)
    // process — see `man 7 user_namespaces`.
    prctl::set_dumpable(true).map_err(Error::Privilege)?;

    sync::send_token_with_pid(sync_fd, Token::UsermapPls, Pid::this())?;

    sync::expect_token(sync_fd, Token::UsermapAck).map_err(|e| match e {
        Error::ProtocolViolation(msg) => {
            debug!(%msg, "uid/gid map not acknowledged");
            Error::MapInstallation
        }
        other => other,
    })?;

    prctl::set_dumpable(false).map_err(Error::Privilege)?;

    // Now root inside the new user namespace.
    setuid(Uid::from_raw(0)).map_err(Error::Privilege)?;
    setgid(Gid::from_raw(0)).map_err(Error::Privilege)?;

    debug!("user namespace handshake complete, now root in namespace");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_translate_to_namespace_config() {
        let flags = config::CloneFlags(
            config::CloneFlags::USER | config::CloneFlags::PID | config::CloneFlags::NET,
        );
        let ns = NamespaceConfig::from(flags);
        assert!(ns.user_ns);
        assert!(ns.pid_ns);
        assert!(ns.net_ns);
        assert!(!ns.ipc_ns);
        assert!(!ns.uts_ns);
        assert!(!ns.mount_ns);
    }

    #[test]
    fn other_flags_excludes_user_and_pid() {
        let ns = NamespaceConfig {
            user_ns: true,
            pid_ns: true,
            net_ns: true,
            ipc_ns: true,
            uts_ns: true,
            mount_ns: true,
        };
        let rest = ns.other_flags();
        assert!(!rest.contains(CloneFlags::CLONE_NEWUSER));
        assert!(!rest.contains(CloneFlags::CLONE_NEWPID));
        assert!(rest.contains(CloneFlags::CLONE_NEWNET));
        assert!(rest.contains(CloneFlags::CLONE_NEWIPC));
        assert!(rest.contains(CloneFlags::CLONE_NEWUTS));
        assert!(rest.contains(CloneFlags::CLONE_NEWNS));
    }
}
