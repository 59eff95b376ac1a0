// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Netlink-style configuration message parser.
//!
//! Decodes the bootstrap configuration delivered on the init pipe FD: a
//! fixed 16-byte header followed by a stream of `{len, type, payload}`
//! attributes, 4-byte aligned — the same framing `netlink.c` /
//! `netlink.h` in the original implementation used, ported to safe Rust.

use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};

use tracing::warn;

use crate::error::{Error, Result};

/// Header length in bytes: `u32 length | u16 type | u16 flags | u32 seq | u32 pid`.
const HEADER_LEN: usize = 16;
/// Attribute header length: `u16 nla_len | u16 nla_type`.
const ATTR_HEADER_LEN: usize = 4;
const ATTR_ALIGN: usize = 4;

/// Sentinel message type. Must match the orchestrator's constant.
pub const INIT_MSG: u16 = 62000;

pub const CLONE_FLAGS_ATTR: u16 = 27281;
pub const UIDMAP_ATTR: u16 = 27283;
pub const GIDMAP_ATTR: u16 = 27284;
pub const ROOTFS_PATH_ATTR: u16 = 27285;
pub const BUNDLE_PATH_ATTR: u16 = 27286;
pub const CONTAINER_ID_ATTR: u16 = 27287;
pub const USER_NS_ATTR: u16 = 27288;

fn align4(len: usize) -> usize {
    (len + ATTR_ALIGN - 1) & !(ATTR_ALIGN - 1)
}

/// Bitmask over the namespace kinds the orchestrator asked for.
///
/// Bit positions are this crate's own wire contract, not the kernel's
/// `CLONE_NEW*` values — [`crate::namespaces::NamespaceConfig`] is what
/// translates this into `nix::sched::CloneFlags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneFlags(pub u32);

impl CloneFlags {
    pub const USER: u32 = 1 << 0;
    pub const PID: u32 = 1 << 1;
    pub const NET: u32 = 1 << 2;
    pub const IPC: u32 = 1 << 3;
    pub const UTS: u32 = 1 << 4;
    pub const MOUNT: u32 = 1 << 5;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// Parsed bootstrap configuration.
///
/// Byte-range fields (`uidmap`, `gidmap`, `rootfs_path`, `bundle_path`,
/// `container_id`) borrow from `raw`, the single heap allocation backing
/// the whole payload (spec §3 "Backing storage"). Owning the bytes as a
/// `Vec<u8>` plus `(offset, len)` pairs — rather than raw pointers into
/// it, as the C original does — gives the compiler-checked lifetime the
/// spec's Design Notes §9 ask for.
#[derive(Debug, Clone, Default)]
pub struct Config {
    raw: Vec<u8>,
    clone_flags: u32,
    uidmap: Option<(usize, usize)>,
    gidmap: Option<(usize, usize)>,
    rootfs_path: Option<(usize, usize)>,
    bundle_path: Option<(usize, usize)>,
    container_id: Option<(usize, usize)>,
    user_ns_enabled: bool,
}

impl Config {
    pub fn clone_flags(&self) -> CloneFlags {
        CloneFlags(self.clone_flags)
    }

    pub fn user_ns_enabled(&self) -> bool {
        self.user_ns_enabled || self.clone_flags().contains(CloneFlags::USER)
    }

    pub fn uidmap(&self) -> Option<&[u8]> {
        self.uidmap.map(|(o, l)| &self.raw[o..o + l])
    }

    pub fn gidmap(&self) -> Option<&[u8]> {
        self.gidmap.map(|(o, l)| &self.raw[o..o + l])
    }

    pub fn rootfs_path(&self) -> Option<&str> {
        self.str_field(self.rootfs_path)
    }

    pub fn bundle_path(&self) -> Option<&str> {
        self.str_field(self.bundle_path)
    }

    pub fn container_id(&self) -> Option<&str> {
        self.str_field(self.container_id)
    }

    fn str_field(&self, range: Option<(usize, usize)>) -> Option<&str> {
        let (o, l) = range?;
        let bytes = &self.raw[o..o + l];
        let bytes = match bytes.iter().position(|&b| b == 0) {
            Some(nul) => &bytes[..nul],
            None => bytes,
        };
        std::str::from_utf8(bytes).ok()
    }
}

/// Read and parse a single configuration message from `fd`.
///
/// Takes ownership of `fd` (wraps it via `from_raw_fd`) for the duration
/// of the read, matching spec §4.1's "Input: an open readable FD
/// positioned at the start of a single message."
pub fn parse(fd: RawFd) -> Result<Config> {
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|e| Error::MalformedHeader(format!("short header read: {e}")))?;

    let length = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let msg_type = u16::from_le_bytes(header[4..6].try_into().unwrap());
    // flags (header[6..8]), seq (header[8..12]), pid (header[12..16]) are
    // currently ignored, per spec §6.

    if msg_type != INIT_MSG {
        return Err(Error::WrongMessageType(msg_type, INIT_MSG));
    }

    if length < HEADER_LEN {
        return Err(Error::MalformedHeader(format!(
            "declared length {length} shorter than header"
        )));
    }

    let payload_len = length - HEADER_LEN;
    if payload_len == 0 {
        // Empty message is valid (spec §9): return a zero-initialized Config.
        return Ok(Config::default());
    }

    let mut raw = vec![0u8; payload_len];
    file.read_exact(&mut raw).map_err(|e| {
        Error::MalformedAttribute(format!("failed to read {payload_len}-byte payload: {e}"))
    })?;

    parse_attributes(raw)
}

fn parse_attributes(raw: Vec<u8>) -> Result<Config> {
    let mut config = Config {
        raw,
        ..Default::default()
    };

    let len = config.raw.len();
    let mut offset = 0usize;

    while offset < len {
        if len - offset < ATTR_HEADER_LEN {
            return Err(Error::MalformedAttribute(format!(
                "truncated attribute header at offset {offset}"
            )));
        }

        let nla_len =
            u16::from_le_bytes(config.raw[offset..offset + 2].try_into().unwrap()) as usize;
        let nla_type = u16::from_le_bytes(config.raw[offset + 2..offset + 4].try_into().unwrap());

        if nla_len < ATTR_HEADER_LEN || offset + nla_len > len {
            return Err(Error::MalformedAttribute(format!(
                "attribute length {nla_len} at offset {offset} overruns payload of {len} bytes"
            )));
        }

        let payload_start = offset + ATTR_HEADER_LEN;
        let payload_end = offset + nla_len;
        let payload_range = (payload_start, payload_end - payload_start);

        match nla_type {
            CLONE_FLAGS_ATTR => {
                config.clone_flags = read_u32(&config.raw, payload_range).unwrap_or(0);
            }
            UIDMAP_ATTR => config.uidmap = Some(payload_range),
            GIDMAP_ATTR => config.gidmap = Some(payload_range),
            ROOTFS_PATH_ATTR => config.rootfs_path = Some(payload_range),
            BUNDLE_PATH_ATTR => config.bundle_path = Some(payload_range),
            CONTAINER_ID_ATTR => config.container_id = Some(payload_range),
            USER_NS_ATTR => {
                config.user_ns_enabled = read_u32(&config.raw, payload_range).unwrap_or(0) != 0;
            }
            other => {
                warn!(attr_type = other, "skipping unknown attribute type");
            }
        }

        offset += align4(nla_len);
    }

    Ok(config)
}

fn read_u32(raw: &[u8], (offset, len): (usize, usize)) -> Option<u32> {
    if len < 4 {
        return None;
    }
    Some(u32::from_le_bytes(
        raw[offset..offset + 4].try_into().unwrap(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn attr(ty: u16, payload: &[u8]) -> Vec<u8> {
        let nla_len = (ATTR_HEADER_LEN + payload.len()) as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&nla_len.to_le_bytes());
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(payload);
        while out.len() % ATTR_ALIGN != 0 {
            out.push(0);
        }
        out
    }

    fn message(msg_type: u16, attrs: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let total_len = (HEADER_LEN + attrs.len()) as u32;
        out.extend_from_slice(&total_len.to_le_bytes());
        out.extend_from_slice(&msg_type.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u32.to_le_bytes()); // seq
        out.extend_from_slice(&0u32.to_le_bytes()); // pid
        out.extend_from_slice(attrs);
        out
    }

    fn parse_bytes(bytes: &[u8]) -> Result<Config> {
        let (r, w) = nix::unistd::pipe().unwrap();
        let mut wf = unsafe { std::fs::File::from_raw_fd(w) };
        wf.write_all(bytes).unwrap();
        drop(wf);
        parse(r)
    }

    #[test]
    fn parses_full_config() {
        let mut attrs = Vec::new();
        attrs.extend(attr(CLONE_FLAGS_ATTR, &0x2fu32.to_le_bytes()));
        attrs.extend(attr(UIDMAP_ATTR, b"0 1000 1\n"));
        attrs.extend(attr(GIDMAP_ATTR, b"0 1000 1\n"));
        attrs.extend(attr(ROOTFS_PATH_ATTR, b"/rootfs\0"));
        attrs.extend(attr(BUNDLE_PATH_ATTR, b"/bundle\0"));
        attrs.extend(attr(CONTAINER_ID_ATTR, b"abc123\0"));
        attrs.extend(attr(USER_NS_ATTR, &1u32.to_le_bytes()));

        let msg = message(INIT_MSG, &attrs);
        let config = parse_bytes(&msg).unwrap();

        assert_eq!(config.clone_flags().0, 0x2f);
        assert!(config.user_ns_enabled());
        assert_eq!(config.uidmap(), Some(&b"0 1000 1\n"[..]));
        assert_eq!(config.gidmap(), Some(&b"0 1000 1\n"[..]));
        assert_eq!(config.rootfs_path(), Some("/rootfs"));
        assert_eq!(config.bundle_path(), Some("/bundle"));
        assert_eq!(config.container_id(), Some("abc123"));
    }

    #[test]
    fn unknown_attribute_is_skipped_not_fatal() {
        let mut attrs = Vec::new();
        attrs.extend(attr(CLONE_FLAGS_ATTR, &1u32.to_le_bytes()));
        attrs.extend(attr(0xFFFF, b"mystery"));
        let msg = message(INIT_MSG, &attrs);
        let config = parse_bytes(&msg).unwrap();
        assert_eq!(config.clone_flags().0, 1);
    }

    #[test]
    fn zero_payload_message_is_valid() {
        let msg = message(INIT_MSG, &[]);
        let config = parse_bytes(&msg).unwrap();
        assert_eq!(config.clone_flags().0, 0);
        assert!(config.uidmap().is_none());
    }

    #[test]
    fn wrong_message_type_is_rejected() {
        let msg = message(0, &[]);
        let err = parse_bytes(&msg).unwrap_err();
        assert!(matches!(err, Error::WrongMessageType(0, INIT_MSG)));
    }

    #[test]
    fn malformed_attribute_length_is_rejected() {
        // nla_len claims 100 bytes but the payload only has 4.
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&100u16.to_le_bytes());
        attrs.extend_from_slice(&CLONE_FLAGS_ATTR.to_le_bytes());
        let msg = message(INIT_MSG, &attrs);
        let err = parse_bytes(&msg).unwrap_err();
        assert!(matches!(err, Error::MalformedAttribute(_)));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = parse_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }
}
