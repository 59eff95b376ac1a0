// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed accessors for the environment variables the bootstrap reads at
//! constructor entry. Rust-ified equivalents of `bootstrap.c`'s
//! `getenv_int`/`getenv_uint_hex` helpers.

use crate::error::{Error, Result};

pub const INITPIPE: &str = "_KONTAINER_INITPIPE";
pub const SYNCPIPE: &str = "_KONTAINER_SYNCPIPE";
pub const IS_INIT: &str = "_KONTAINER_IS_INIT";

/// Parse a decimal file descriptor out of an environment variable.
///
/// Returns `None` if the variable is unset or does not parse as a
/// non-negative integer. Never fatal by itself; callers decide whether
/// absence means NORMAL role or a missing-environment error.
pub fn getenv_fd(name: &str) -> Option<i32> {
    std::env::var(name).ok()?.trim().parse::<i32>().ok()
}

/// Same as [`getenv_fd`] but fatal if absent, for call sites where the
/// variable is required by the current role.
pub fn require_fd(name: &'static str) -> Result<i32> {
    getenv_fd(name).ok_or(Error::MissingEnv(name))
}

/// True if the variable is present, regardless of its value.
pub fn is_set(name: &str) -> bool {
    std::env::var_os(name).is_some()
}
