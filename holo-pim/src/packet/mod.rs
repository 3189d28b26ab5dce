//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod assert;
pub mod bootstrap;
pub mod error;
pub mod hello;
pub mod join_prune;
pub mod register;

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use holo_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use holo_utils::ip::{AddressFamily, IpAddrExt};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::assert::AssertMsg;
use crate::packet::bootstrap::{BootstrapMsg, CandRpAdvMsg};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::hello::HelloMsg;
use crate::packet::join_prune::JoinPruneMsg;
use crate::packet::register::{RegisterMsg, RegisterStopMsg};

// PIM protocol version implemented by this message codec.
pub const PIM_VERSION: u8 = 2;

//
// All PIM control messages share a common header:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |PIM Ver| Type  |   Reserved    |           Checksum            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 0,
    Register = 1,
    RegisterStop = 2,
    JoinPrune = 3,
    Bootstrap = 4,
    Assert = 5,
    Graft = 6,
    GraftAck = 7,
    CandRpAdv = 8,
}

// PIM message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(HelloMsg),
    Register(RegisterMsg),
    RegisterStop(RegisterStopMsg),
    JoinPrune(JoinPruneMsg),
    Bootstrap(BootstrapMsg),
    Assert(AssertMsg),
    // Dense-mode messages are recognized on the wire but carry no
    // sparse-mode semantics.
    Graft(JoinPruneMsg),
    GraftAck(JoinPruneMsg),
    CandRpAdv(CandRpAdvMsg),
}

//
// Encoded-Group address format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Addr Family  | Encoding Type |B| Reserved  |Z|  Mask Len     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Group multicast Address
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+...
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EncodedGroup {
    pub group: IpAddr,
    pub mask_len: u8,
    pub bidir: bool,
    pub zone: bool,
}

//
// Encoded-Source address format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Addr Family  | Encoding Type | Rsrvd   |S|W|R|  Mask Len     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Source Address
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+...
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EncodedSource {
    pub source: IpAddr,
    pub mask_len: u8,
    pub sparse: bool,
    pub wildcard: bool,
    pub rpt: bool,
}

// Native address encoding type.
const ENCODING_TYPE_NATIVE: u8 = 0;

// ===== impl PacketType =====

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Hello => write!(f, "Hello"),
            PacketType::Register => write!(f, "Register"),
            PacketType::RegisterStop => write!(f, "Register-Stop"),
            PacketType::JoinPrune => write!(f, "Join/Prune"),
            PacketType::Bootstrap => write!(f, "Bootstrap"),
            PacketType::Assert => write!(f, "Assert"),
            PacketType::Graft => write!(f, "Graft"),
            PacketType::GraftAck => write!(f, "Graft-Ack"),
            PacketType::CandRpAdv => write!(f, "Candidate-RP-Advertisement"),
        }
    }
}

// ===== impl Packet =====

impl Packet {
    pub const HDR_LENGTH: usize = 4;

    pub fn pkt_type(&self) -> PacketType {
        match self {
            Packet::Hello(_) => PacketType::Hello,
            Packet::Register(_) => PacketType::Register,
            Packet::RegisterStop(_) => PacketType::RegisterStop,
            Packet::JoinPrune(_) => PacketType::JoinPrune,
            Packet::Bootstrap(_) => PacketType::Bootstrap,
            Packet::Assert(_) => PacketType::Assert,
            Packet::Graft(_) => PacketType::Graft,
            Packet::GraftAck(_) => PacketType::GraftAck,
            Packet::CandRpAdv(_) => PacketType::CandRpAdv,
        }
    }

    // Encodes the message into its wire format.
    //
    // For IPv4 the PIM checksum is filled in here. For IPv6 the checksum
    // uses a pseudo-header and is computed by the forwarding engine at
    // transmission time (IPV6_CHECKSUM equivalent), so the field is left
    // as zero.
    pub fn encode(&self, af: AddressFamily) -> BytesMut {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Encode message header.
            buf.put_u8((PIM_VERSION << 4) | self.pkt_type() as u8);
            buf.put_u8(0);
            // The checksum will be computed later.
            buf.put_u16(0);

            // Encode message body.
            match self {
                Packet::Hello(msg) => msg.encode(&mut buf),
                Packet::Register(msg) => msg.encode(&mut buf),
                Packet::RegisterStop(msg) => msg.encode(&mut buf),
                Packet::JoinPrune(msg)
                | Packet::Graft(msg)
                | Packet::GraftAck(msg) => msg.encode(&mut buf),
                Packet::Bootstrap(msg) => msg.encode(&mut buf),
                Packet::Assert(msg) => msg.encode(&mut buf),
                Packet::CandRpAdv(msg) => msg.encode(&mut buf),
            }

            if af == AddressFamily::Ipv4 {
                update_cksum(&mut buf, self.pkt_type());
            }

            buf.clone()
        })
    }

    // Decodes the message from its wire format.
    pub fn decode(data: &[u8], af: AddressFamily) -> DecodeResult<Packet> {
        let mut buf = Bytes::copy_from_slice(data);

        if data.len() < Self::HDR_LENGTH {
            return Err(DecodeError::InvalidLength(data.len()));
        }

        // Parse and validate the PIM version and message type.
        let ver_type = buf.try_get_u8()?;
        let version = ver_type >> 4;
        if version != PIM_VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let pkt_type = ver_type & 0x0f;
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;

        // Validate the reserved field.
        let reserved = buf.try_get_u8()?;
        if reserved != 0 {
            return Err(DecodeError::InvalidReservedField(reserved));
        }

        // Validate the checksum.
        let _checksum = buf.try_get_u16()?;
        if af == AddressFamily::Ipv4 {
            verify_cksum(data, pkt_type)?;
        }

        // Decode message body.
        let packet = match pkt_type {
            PacketType::Hello => Packet::Hello(HelloMsg::decode(&mut buf, af)?),
            PacketType::Register => {
                Packet::Register(RegisterMsg::decode(&mut buf, af)?)
            }
            PacketType::RegisterStop => {
                Packet::RegisterStop(RegisterStopMsg::decode(&mut buf, af)?)
            }
            PacketType::JoinPrune => {
                Packet::JoinPrune(JoinPruneMsg::decode(&mut buf, af)?)
            }
            PacketType::Bootstrap => {
                Packet::Bootstrap(BootstrapMsg::decode(&mut buf, af)?)
            }
            PacketType::Assert => {
                Packet::Assert(AssertMsg::decode(&mut buf, af)?)
            }
            PacketType::Graft => {
                Packet::Graft(JoinPruneMsg::decode(&mut buf, af)?)
            }
            PacketType::GraftAck => {
                Packet::GraftAck(JoinPruneMsg::decode(&mut buf, af)?)
            }
            PacketType::CandRpAdv => {
                Packet::CandRpAdv(CandRpAdvMsg::decode(&mut buf, af)?)
            }
        };

        Ok(packet)
    }
}

// ===== impl EncodedGroup =====

impl EncodedGroup {
    const FLAG_BIDIR: u8 = 0x80;
    const FLAG_ZONE: u8 = 0x01;

    pub fn new(group: IpAddr) -> EncodedGroup {
        EncodedGroup {
            group,
            mask_len: match group {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            },
            bidir: false,
            zone: false,
        }
    }

    pub fn length(af: AddressFamily) -> usize {
        4 + af.addr_len()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.group.address_family() as u8);
        buf.put_u8(ENCODING_TYPE_NATIVE);
        let mut flags = 0;
        if self.bidir {
            flags |= Self::FLAG_BIDIR;
        }
        if self.zone {
            flags |= Self::FLAG_ZONE;
        }
        buf.put_u8(flags);
        buf.put_u8(self.mask_len);
        buf.put_ip(&self.group);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<EncodedGroup> {
        decode_addr_header(buf, af)?;
        let flags = buf.try_get_u8()?;
        let mask_len = buf.try_get_u8()?;
        if mask_len > af.max_prefixlen() {
            return Err(DecodeError::InvalidMaskLength(mask_len));
        }
        let group = buf.try_get_ip(af)?;

        Ok(EncodedGroup {
            group,
            mask_len,
            bidir: flags & Self::FLAG_BIDIR != 0,
            zone: flags & Self::FLAG_ZONE != 0,
        })
    }
}

// ===== impl EncodedSource =====

impl EncodedSource {
    const FLAG_SPARSE: u8 = 0x04;
    const FLAG_WILDCARD: u8 = 0x02;
    const FLAG_RPT: u8 = 0x01;

    // (S,G) source entry.
    pub fn new_sg(source: IpAddr) -> EncodedSource {
        EncodedSource {
            source,
            mask_len: source.address_family().max_prefixlen(),
            sparse: true,
            wildcard: false,
            rpt: false,
        }
    }

    // (*,G) source entry, carrying the RP address.
    pub fn new_wc(rp_addr: IpAddr) -> EncodedSource {
        EncodedSource {
            source: rp_addr,
            mask_len: rp_addr.address_family().max_prefixlen(),
            sparse: true,
            wildcard: true,
            rpt: true,
        }
    }

    // (S,G,rpt) source entry.
    pub fn new_sg_rpt(source: IpAddr) -> EncodedSource {
        EncodedSource {
            source,
            mask_len: source.address_family().max_prefixlen(),
            sparse: true,
            wildcard: false,
            rpt: true,
        }
    }

    pub fn length(af: AddressFamily) -> usize {
        4 + af.addr_len()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.source.address_family() as u8);
        buf.put_u8(ENCODING_TYPE_NATIVE);
        let mut flags = 0;
        if self.sparse {
            flags |= Self::FLAG_SPARSE;
        }
        if self.wildcard {
            flags |= Self::FLAG_WILDCARD;
        }
        if self.rpt {
            flags |= Self::FLAG_RPT;
        }
        buf.put_u8(flags);
        buf.put_u8(self.mask_len);
        buf.put_ip(&self.source);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<EncodedSource> {
        decode_addr_header(buf, af)?;
        let flags = buf.try_get_u8()?;
        let mask_len = buf.try_get_u8()?;
        if mask_len > af.max_prefixlen() {
            return Err(DecodeError::InvalidMaskLength(mask_len));
        }
        let source = buf.try_get_ip(af)?;

        Ok(EncodedSource {
            source,
            mask_len,
            sparse: flags & Self::FLAG_SPARSE != 0,
            wildcard: flags & Self::FLAG_WILDCARD != 0,
            rpt: flags & Self::FLAG_RPT != 0,
        })
    }
}

// ===== global functions =====

// Encoded-Unicast address format: no mask or flags, just the address
// preceded by its family and encoding type.
pub(crate) fn encode_unicast_addr(buf: &mut BytesMut, addr: &IpAddr) {
    buf.put_u8(addr.address_family() as u8);
    buf.put_u8(ENCODING_TYPE_NATIVE);
    buf.put_ip(addr);
}

pub(crate) fn decode_unicast_addr(
    buf: &mut Bytes,
    af: AddressFamily,
) -> DecodeResult<IpAddr> {
    decode_addr_header(buf, af)?;
    let addr = buf.try_get_ip(af)?;
    Ok(addr)
}

pub(crate) fn unicast_addr_length(af: AddressFamily) -> usize {
    2 + af.addr_len()
}

fn decode_addr_header(buf: &mut Bytes, af: AddressFamily) -> DecodeResult<()> {
    let addr_family = buf.try_get_u8()?;
    if addr_family != af as u8 {
        return Err(DecodeError::InvalidAddressFamily(addr_family));
    }
    let encoding = buf.try_get_u8()?;
    if encoding != ENCODING_TYPE_NATIVE {
        return Err(DecodeError::InvalidAddressEncoding(encoding));
    }
    Ok(())
}

const CKSUM_RANGE: std::ops::Range<usize> = 2..4;

// For Register messages the checksum covers only the message header and
// the flag word, excluding the encapsulated data packet.
fn cksum_length(data_len: usize, pkt_type: PacketType) -> usize {
    match pkt_type {
        PacketType::Register => {
            std::cmp::min(data_len, Packet::HDR_LENGTH + 4)
        }
        _ => data_len,
    }
}

fn update_cksum(buf: &mut BytesMut, pkt_type: PacketType) {
    let mut cksum = Checksum::new();
    cksum.add_bytes(&buf[..cksum_length(buf.len(), pkt_type)]);
    buf[CKSUM_RANGE].copy_from_slice(&cksum.checksum());
}

fn verify_cksum(data: &[u8], pkt_type: PacketType) -> DecodeResult<()> {
    let mut cksum = Checksum::new();
    cksum.add_bytes(&data[..cksum_length(data.len(), pkt_type)]);
    if cksum.checksum() != [0, 0] {
        return Err(DecodeError::InvalidChecksum);
    }
    Ok(())
}

impl From<TryGetError> for DecodeError {
    fn from(error: TryGetError) -> DecodeError {
        DecodeError::InvalidLength(error.available)
    }
}
