//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{warn, warn_span};

use crate::bsr::{self, PimScopeZoneId};
use crate::collections::InterfaceId;
use crate::mrt::MreKey;
use crate::mrt::{downstream, register, upstream};
use crate::packet::error::DecodeError;

// PIM errors.
#[derive(Debug)]
pub enum Error {
    // Inter-task communication
    InterfaceIdNotFound(InterfaceId),
    VifIndexNotFound(u16),
    MreNotFound(MreKey),
    ZoneNotFound(PimScopeZoneId),
    // Packet input
    PacketDecodeError(u16, DecodeError),
    InvalidSrcAddr(IpAddr),
    InvalidDstAddr(IpAddr),
    UnknownNeighbor(u16, IpAddr),
    RegisterVifMissing,
    RegisterInnerSrcNotUnicast(IpAddr),
    RegisterInnerDstNotMulticast(IpAddr),
    RegisterCannotFragment(IpAddr),
    RegisterMalformedInner,
    // MRIB
    MribUnknownTransaction(u32),
    MribTransactionLimit(u32),
    // FSMs
    UpstreamUnexpectedEvent(MreKey, upstream::State, upstream::Event),
    DownstreamUnexpectedEvent(MreKey, u16, downstream::State, downstream::Event),
    RegisterUnexpectedEvent(register::State, register::Event),
    BsrUnexpectedEvent(PimScopeZoneId, bsr::State, bsr::Event),
    // Forwarding engine
    FeaRequestRejected(IpAddr, IpAddr),
    FeaRegistrationFailed(u16),
    // Other
    InterfaceStartError(String, Box<Error>),
}

// PIM configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    VifNameNotKnown(String),
    VifAlreadyEnabled(String),
    ScopeZoneOverlap(ipnetwork::IpNetwork),
    PriorityOutOfRange(u32),
    IntervalOutOfRange(u32),
    HoldtimeTooShort(u16),
    MaskLengthOutOfRange(u8),
    AddressFamilyMismatch(IpAddr),
    PrefixNotMulticast(ipnetwork::IpNetwork),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self);
            }
            Error::VifIndexNotFound(vif_index) => {
                warn!(%vif_index, "{}", self);
            }
            Error::MreNotFound(key) => {
                warn!(?key, "{}", self);
            }
            Error::ZoneNotFound(zone_id) => {
                warn!(?zone_id, "{}", self);
            }
            Error::PacketDecodeError(vif_index, error) => {
                warn!(%vif_index, %error, "{}", self);
            }
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UnknownNeighbor(vif_index, addr) => {
                warn!(%vif_index, source = %addr, "{}", self);
            }
            Error::RegisterVifMissing => {
                warn!("{}", self);
            }
            Error::RegisterInnerSrcNotUnicast(addr)
            | Error::RegisterInnerDstNotMulticast(addr)
            | Error::RegisterCannotFragment(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::RegisterMalformedInner => {
                warn!("{}", self);
            }
            Error::MribUnknownTransaction(tid)
            | Error::MribTransactionLimit(tid) => {
                warn!(%tid, "{}", self);
            }
            Error::UpstreamUnexpectedEvent(key, state, event) => {
                warn_span!("fsm", kind = "upstream").in_scope(|| {
                    warn!(?key, ?state, ?event, "{}", self);
                })
            }
            Error::DownstreamUnexpectedEvent(key, vif_index, state, event) => {
                warn_span!("fsm", kind = "downstream").in_scope(|| {
                    warn!(?key, %vif_index, ?state, ?event, "{}", self);
                })
            }
            Error::RegisterUnexpectedEvent(state, event) => {
                warn_span!("fsm", kind = "register").in_scope(|| {
                    warn!(?state, ?event, "{}", self);
                })
            }
            Error::BsrUnexpectedEvent(zone_id, state, event) => {
                warn_span!("fsm", kind = "bsr").in_scope(|| {
                    warn!(?zone_id, ?state, ?event, "{}", self);
                })
            }
            Error::FeaRequestRejected(source, group) => {
                warn!(%source, %group, "{}", self);
            }
            Error::FeaRegistrationFailed(vif_index) => {
                warn!(%vif_index, "{}", self);
            }
            Error::InterfaceStartError(name, error) => {
                warn!(%name, %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::VifIndexNotFound(..) => {
                write!(f, "vif index not found")
            }
            Error::MreNotFound(..) => {
                write!(f, "multicast routing entry not found")
            }
            Error::ZoneNotFound(..) => {
                write!(f, "BSR zone not found")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "join/prune from unknown neighbor")
            }
            Error::RegisterVifMissing => {
                write!(f, "no register vif is configured")
            }
            Error::RegisterInnerSrcNotUnicast(..) => {
                write!(f, "register inner source address must be unicast")
            }
            Error::RegisterInnerDstNotMulticast(..) => {
                write!(
                    f,
                    "register inner destination address must be a routable \
                     multicast group"
                )
            }
            Error::RegisterCannotFragment(..) => {
                write!(f, "cannot fragment encapsulated packet")
            }
            Error::RegisterMalformedInner => {
                write!(f, "malformed encapsulated packet")
            }
            Error::MribUnknownTransaction(..) => {
                write!(f, "unknown MRIB transaction")
            }
            Error::MribTransactionLimit(..) => {
                write!(f, "too many in-progress MRIB transactions")
            }
            Error::UpstreamUnexpectedEvent(..)
            | Error::DownstreamUnexpectedEvent(..)
            | Error::RegisterUnexpectedEvent(..)
            | Error::BsrUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::FeaRequestRejected(..) => {
                write!(f, "forwarding engine rejected request")
            }
            Error::FeaRegistrationFailed(..) => {
                write!(f, "forwarding engine rejected protocol registration")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InterfaceStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::VifNameNotKnown(name) => {
                write!(f, "vif name not known: {}", name)
            }
            ConfigError::VifAlreadyEnabled(name) => {
                write!(f, "vif already enabled: {}", name)
            }
            ConfigError::ScopeZoneOverlap(prefix) => {
                write!(f, "scope zone overlaps existing scope zone: {}", prefix)
            }
            ConfigError::PriorityOutOfRange(priority) => {
                write!(f, "priority out of range: {}", priority)
            }
            ConfigError::IntervalOutOfRange(interval) => {
                write!(f, "interval out of range: {}", interval)
            }
            ConfigError::HoldtimeTooShort(holdtime) => {
                write!(f, "holdtime too short: {}", holdtime)
            }
            ConfigError::MaskLengthOutOfRange(mask_len) => {
                write!(f, "mask length out of range: {}", mask_len)
            }
            ConfigError::AddressFamilyMismatch(addr) => {
                write!(f, "address family mismatch: {}", addr)
            }
            ConfigError::PrefixNotMulticast(prefix) => {
                write!(f, "prefix is not a multicast prefix: {}", prefix)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
