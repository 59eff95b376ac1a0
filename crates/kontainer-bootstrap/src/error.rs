// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the bootstrap state machine.

use thiserror::Error;

/// Errors that can occur anywhere in the bootstrap.
///
/// Every variant is fatal at the point it is detected (spec §7): the
/// detecting stage logs it and exits nonzero. There is no recovery path.
#[derive(Error, Debug)]
pub enum Error {
    #[error("required environment variable {0} is missing")]
    MissingEnv(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration header: {0}")]
    MalformedHeader(String),

    #[error("unexpected message type: {0} (expected {1})")]
    WrongMessageType(u16, u16),

    #[error("malformed attribute: {0}")]
    MalformedAttribute(String),

    #[error("failed to unshare namespace(s): {0}")]
    Clone(#[source] nix::Error),

    #[error("failed to clone sibling process: {0}")]
    SiblingClone(#[source] nix::Error),

    #[error("privilege transition failed: {0}")]
    Privilege(#[source] nix::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("uid/gid map installation was not acknowledged")]
    MapInstallation,
}

pub type Result<T> = std::result::Result<T, Error>;
