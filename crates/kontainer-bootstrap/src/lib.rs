// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pre-runtime namespace and process bootstrap for container init.
//!
//! Linking this crate into a binary installs a constructor
//! (`#[ctor::ctor]`, the same link-time hook `stackable-hooks` uses to
//! run code before `main`) that runs before any of the binary's own
//! code, including before the Rust runtime spins up other threads. In
//! the normal case — no bootstrap environment present — the
//! constructor is a no-op and the binary proceeds as usual.
//!
//! When the managed process is launched with the bootstrap environment
//! variables set (spec §3), the constructor instead forks off the
//! three-stage namespace/PID-1 choreography described in [`bootstrap`],
//! and either `_exit`s (Stage-0) or returns having marked this process
//! as the resumed container init (Stage-2). Callers query that outcome
//! with [`is_init_process`] and [`get_init_pid`].

mod bootstrap;
mod clone;
mod config;
mod env;
mod error;
mod namespaces;
mod state;
mod sync;

pub use error::{Error, Result};
pub use state::{get_init_pid, is_init_process};

use bootstrap::{Outcome, Role};

#[ctor::ctor]
fn kontainer_bootstrap() {
    match bootstrap::detect_role() {
        Role::Normal => {}
        Role::Init => {
            state::set_is_init_process(true);
        }
        Role::Stage0 => match bootstrap::run_stage0() {
            Outcome::Exit(code) => std::process::exit(code),
            Outcome::Resumed => {}
        },
    }
}
