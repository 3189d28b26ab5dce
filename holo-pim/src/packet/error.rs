//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// PIM message decode errors.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    InvalidLength(usize),
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidChecksum,
    InvalidReservedField(u8),
    InvalidAddressFamily(u8),
    InvalidAddressEncoding(u8),
    InvalidMaskLength(u8),
    InvalidHelloOption(u16),
    InvalidRegisterPayload,
}

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidLength(length) => {
                write!(f, "invalid message length: {}", length)
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid PIM version: {}", version)
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown message type: {}", pkt_type)
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::InvalidReservedField(value) => {
                write!(f, "non-zero reserved field: {}", value)
            }
            DecodeError::InvalidAddressFamily(af) => {
                write!(f, "invalid address family: {}", af)
            }
            DecodeError::InvalidAddressEncoding(enc) => {
                write!(f, "invalid address encoding type: {}", enc)
            }
            DecodeError::InvalidMaskLength(mask_len) => {
                write!(f, "invalid mask length: {}", mask_len)
            }
            DecodeError::InvalidHelloOption(option) => {
                write!(f, "malformed hello option: {}", option)
            }
            DecodeError::InvalidRegisterPayload => {
                write!(f, "malformed register inner packet")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
