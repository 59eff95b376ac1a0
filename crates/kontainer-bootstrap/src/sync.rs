// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The hand-rolled synchronization protocol carried on the stage sync
//! sockets and the external orchestrator FD (spec §4.2).
//!
//! Every message is a single [`Token`] byte, optionally followed by a
//! `pid_t`. Reads/writes are strictly sized: a short read or write is a
//! [`Error::ProtocolViolation`], never retried, except that the read loop
//! retries on `EINTR` before giving up (spec Design Notes §9).

use std::os::fd::RawFd;

use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Single-byte tokens exchanged on the sync sockets (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Token {
    /// "please install my uid/gid map."
    UsermapPls = 0x40,
    /// "map installed; proceed."
    UsermapAck = 0x41,
    /// "Stage-2 may now perform post-namespace setup."
    Grandchild = 0x44,
    /// "Stage-2 setup complete."
    ChildFinish = 0x45,
}

impl Token {
    fn from_byte(byte: u8) -> Option<Token> {
        match byte {
            0x40 => Some(Token::UsermapPls),
            0x41 => Some(Token::UsermapAck),
            0x44 => Some(Token::Grandchild),
            0x45 => Some(Token::ChildFinish),
            _ => None,
        }
    }
}

/// Read exactly `buf.len()` bytes, retrying on `EINTR`, failing on any
/// other short read (spec Design Notes §9).
fn read_exact(fd: RawFd, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match nix::unistd::read(fd, &mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::ProtocolViolation(format!(
                    "unexpected EOF after {filled} of {} bytes",
                    buf.len()
                )));
            }
            Ok(n) => filled += n,
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(Error::Io(std::io::Error::from(e))),
        }
    }
    Ok(())
}

fn write_all(fd: RawFd, buf: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match nix::unistd::write(fd, &buf[sent..]) {
            Ok(n) => sent += n,
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(Error::Io(std::io::Error::from(e))),
        }
    }
    Ok(())
}

/// Send a bare token.
pub fn send_token(fd: RawFd, token: Token) -> Result<()> {
    write_all(fd, &[token as u8])
}

/// Receive a token, failing with [`Error::ProtocolViolation`] if the byte
/// read does not decode to a known token or does not match `expected`.
pub fn expect_token(fd: RawFd, expected: Token) -> Result<()> {
    let mut byte = [0u8; 1];
    read_exact(fd, &mut byte)?;
    match Token::from_byte(byte[0]) {
        Some(t) if t == expected => Ok(()),
        Some(t) => Err(Error::ProtocolViolation(format!(
            "expected {expected:?}, got {t:?}"
        ))),
        None => Err(Error::ProtocolViolation(format!(
            "expected {expected:?}, got unrecognized byte 0x{:02x}",
            byte[0]
        ))),
    }
}

/// Send a token immediately followed by a `pid_t` payload.
pub fn send_token_with_pid(fd: RawFd, token: Token, pid: Pid) -> Result<()> {
    send_token(fd, token)?;
    send_pid(fd, pid)
}

/// Send a bare `pid_t` payload (no token prefix) — used for the PID-only
/// leg of the handshake (e.g. Stage-1 forwarding Stage-2's pid upward).
pub fn send_pid(fd: RawFd, pid: Pid) -> Result<()> {
    write_all(fd, &pid.as_raw().to_ne_bytes())
}

/// Receive a bare `pid_t` payload.
pub fn recv_pid(fd: RawFd) -> Result<Pid> {
    let mut buf = [0u8; std::mem::size_of::<libc::pid_t>()];
    read_exact(fd, &mut buf)?;
    Ok(Pid::from_raw(libc::pid_t::from_ne_bytes(buf)))
}
