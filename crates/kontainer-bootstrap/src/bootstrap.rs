// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bootstrap Orchestrator: the top-level state machine (spec §4.5).
//!
//! Role dispatch happens once, at constructor entry (see `lib.rs`). This
//! module implements the three-stage choreography the spec normatively
//! mandates (spec §9 Open Questions) as the only variant that satisfies
//! the PID-1 invariant under `CLONE_NEWPID`.
//!
//! Stage-1 and Stage-2 are not separate env-dispatched roles: each is
//! reached by the *child* branch of a [`clone::clone_sibling`] call made
//! from the stage above it, exactly as `fork()`'s child branch resumes
//! at the call site. [`Outcome::Resumed`] threads back up through that
//! call chain to tell the constructor "this process is Stage-2; return
//! into the managed runtime" instead of exiting.

use std::os::fd::{IntoRawFd, RawFd};

use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::close;
use tracing::{debug, error, info};

use crate::clone::{clone_sibling, CloneResult};
use crate::config;
use crate::env;
use crate::error::{Error, Result};
use crate::namespaces::{self, NamespaceConfig};
use crate::state;
use crate::sync::{self, Token};

/// The role a process plays, determined at constructor entry (spec §3,
/// §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No init pipe: ordinary execution, e.g. under `cargo test`.
    Normal,
    /// Resumed Stage-2: hand control to the managed runtime.
    Init,
    /// The top-level choreographer.
    Stage0,
}

/// What the constructor should do once [`run_stage0`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exit the process with the given status.
    Exit(i32),
    /// This process is Stage-2; let the managed runtime continue.
    Resumed,
}

/// Inspect the environment and decide this process's role (spec §4.5).
///
/// `_KONTAINER_IS_INIT` takes priority over the init pipe: a process
/// resumed as Stage-2 still carries the original `INITPIPE` var in its
/// inherited environment, but must never re-read it (spec §8 scenario
/// S6 — "no I/O on INITPIPE").
pub fn detect_role() -> Role {
    if env::is_set(env::IS_INIT) {
        return Role::Init;
    }
    if env::getenv_fd(env::INITPIPE).is_none() {
        return Role::Normal;
    }
    Role::Stage0
}

/// Run the full bootstrap choreography starting from the Stage-0 role.
/// Never returns `Outcome::Resumed` in the original process itself — only
/// in whichever clone-descendant turns out to be Stage-2.
pub fn run_stage0() -> Outcome {
    match run_stage0_inner() {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(stage = "stage-0", error = %e, "fatal");
            Outcome::Exit(1)
        }
    }
}

fn run_stage0_inner() -> Result<Outcome> {
    let initpipe = env::require_fd(env::INITPIPE)?;
    let config = config::parse(initpipe)?;
    let ext_fd = env::require_fd(env::SYNCPIPE)?;

    info!(
        clone_flags = config.clone_flags().0,
        "stage-0: parsed bootstrap config"
    );

    let ns_config = NamespaceConfig::from(config.clone_flags());

    let (s0_s1, s1_side) = new_socketpair()?;
    let (s0_s2, s2_side) = new_socketpair()?;

    match clone_sibling()? {
        CloneResult::Child => {
            // This process is now Stage-1. `ext_fd` is Stage-0's sole
            // property (spec §5); Stage-1 has no use for it and must not
            // carry it forward into Stage-2's inherited FD table either.
            let _ = close(s0_s1);
            let _ = close(ext_fd);
            run_stage1(s1_side, s0_s2, s2_side, &ns_config)
        }
        CloneResult::Parent { .. } => {
            // Stage-0 never needs its own copies of the child-side
            // ends; clone already duplicated them into Stage-1's table
            // (spec §4.5 step 4). Stage-1 is a CLONE_PARENT sibling, not
            // a child, so Stage-0 cannot and need not waitpid it — the
            // orchestrator is its kernel parent and the one that reaps it.
            let _ = close(s1_side);
            let _ = close(s2_side);

            let result = stage0_choreograph(s0_s1, s0_s2, ns_config.user_ns, ext_fd);

            let _ = close(s0_s1);
            let _ = close(s0_s2);
            let _ = close(ext_fd);

            if let Err(ref e) = result {
                error!(stage = "stage-0", error = %e, "fatal");
                if let Some(init_pid) = state::get_init_pid() {
                    debug!(%init_pid, "stage-0: killing surviving stage-2 after failure");
                    let _ = kill(init_pid, Signal::SIGKILL);
                }
                return Ok(Outcome::Exit(1));
            }

            Ok(Outcome::Exit(0))
        }
    }
}

fn new_socketpair() -> Result<(RawFd, RawFd)> {
    socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map(|(a, b)| (a.into_raw_fd(), b.into_raw_fd()))
    .map_err(|e| Error::Io(std::io::Error::from(e)))
}

/// Stage-0's side of the choreography once Stage-1 has been spawned.
fn stage0_choreograph(s0_s1: RawFd, s0_s2: RawFd, user_ns: bool, ext_fd: RawFd) -> Result<()> {
    if user_ns {
        relay_usermap_handshake(s0_s1, ext_fd)?;
    }

    let stage2_pid = sync::recv_pid(s0_s1)?;
    sync::send_pid(ext_fd, stage2_pid)?;
    state::set_init_pid(stage2_pid);
    info!(%stage2_pid, "stage-0: stage-2 is container init");

    sync::send_token(s0_s2, Token::Grandchild)?;
    sync::expect_token(s0_s2, Token::ChildFinish)?;
    info!("stage-0: stage-2 finished post-namespace setup");

    Ok(())
}

/// Forward the uid/gid map handshake between Stage-1 and the external
/// orchestrator (spec §4.2 token sequence, "with user namespace").
fn relay_usermap_handshake(s0_s1: RawFd, ext_fd: RawFd) -> Result<()> {
    sync::expect_token(s0_s1, Token::UsermapPls)?;
    let stage1_pid = sync::recv_pid(s0_s1)?;
    debug!(%stage1_pid, "stage-0: relaying USERMAP_PLS to orchestrator");

    sync::send_token_with_pid(ext_fd, Token::UsermapPls, stage1_pid)?;
    sync::expect_token(ext_fd, Token::UsermapAck)?;
    sync::send_token(s0_s1, Token::UsermapAck)?;
    debug!("stage-0: relayed USERMAP_ACK back to stage-1");
    Ok(())
}

/// Stage-1: unshare namespaces, run the uid/gid handshake, then clone
/// Stage-2 as a sibling of Stage-0 (spec §4.5 "Stage-1 procedure"). The
/// `s0_s1` Stage-0 side has already been closed by the caller.
fn run_stage1(
    s1_side: RawFd,
    s0_s2: RawFd,
    s2_side: RawFd,
    ns_config: &NamespaceConfig,
) -> Result<Outcome> {
    namespaces::run(ns_config, s1_side)?;

    match clone_sibling()? {
        CloneResult::Child => {
            // This process is now Stage-2.
            let _ = close(s0_s2);
            let _ = close(s1_side);
            run_stage2(s2_side)?;
            Ok(Outcome::Resumed)
        }
        CloneResult::Parent { child: stage2_pid } => {
            sync::send_pid(s1_side, stage2_pid)?;
            let _ = close(s1_side);
            let _ = close(s0_s2);
            let _ = close(s2_side);
            Ok(Outcome::Exit(0))
        }
    }
}

/// Stage-2: become container init. Returns having set the process-wide
/// `is_init_process` marker — the caller (the constructor, by way of
/// [`Outcome::Resumed`]) then returns control to the managed runtime.
fn run_stage2(s2_side: RawFd) -> Result<()> {
    sync::expect_token(s2_side, Token::Grandchild)?;

    nix::unistd::setsid().map_err(Error::Privilege)?;
    debug!("stage-2: created new session");

    sync::send_token(s2_side, Token::ChildFinish)?;
    let _ = close(s2_side);

    std::env::set_var(env::IS_INIT, "1");
    state::set_is_init_process(true);

    info!("stage-2: returning as container init");
    Ok(())
}
