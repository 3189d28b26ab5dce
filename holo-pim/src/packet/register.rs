//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::bytes::BytesExt;
use holo_utils::ip::AddressFamily;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{
    EncodedGroup, decode_unicast_addr, encode_unicast_addr,
};

//
// The Register message body: a flag word followed by the encapsulated
// multicast data packet.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |B|N|                     Reserved2                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// .                     Multicast data packet                     .
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RegisterMsg {
    pub border: bool,
    pub null_register: bool,
    pub inner_packet: Bytes,
}

// The Register-Stop message body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RegisterStopMsg {
    pub group: EncodedGroup,
    pub source: IpAddr,
}

const REGISTER_FLAG_BORDER: u32 = 1 << 31;
const REGISTER_FLAG_NULL: u32 = 1 << 30;

// ===== impl RegisterMsg =====

impl RegisterMsg {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.border {
            flags |= REGISTER_FLAG_BORDER;
        }
        if self.null_register {
            flags |= REGISTER_FLAG_NULL;
        }
        buf.put_u32(flags);
        buf.put_slice(&self.inner_packet);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        _af: AddressFamily,
    ) -> DecodeResult<RegisterMsg> {
        let flags = buf.try_get_u32()?;
        let inner_packet = buf.copy_to_bytes(buf.remaining());

        Ok(RegisterMsg {
            border: flags & REGISTER_FLAG_BORDER != 0,
            null_register: flags & REGISTER_FLAG_NULL != 0,
            inner_packet,
        })
    }

    // Extracts the source and destination addresses of the encapsulated
    // data packet.
    pub fn inner_addresses(
        &self,
        af: AddressFamily,
    ) -> DecodeResult<(IpAddr, IpAddr)> {
        let mut buf = self.inner_packet.clone();

        match af {
            AddressFamily::Ipv4 => {
                // Minimal IPv4 header, no options required.
                if buf.remaining() < 20 {
                    return Err(DecodeError::InvalidRegisterPayload);
                }
                let ver_ihl = buf.get_u8();
                if ver_ihl >> 4 != 4 {
                    return Err(DecodeError::InvalidRegisterPayload);
                }
                buf.advance(11);
                let src = buf.get_ipv4();
                let dst = buf.get_ipv4();
                Ok((IpAddr::V4(src), IpAddr::V4(dst)))
            }
            AddressFamily::Ipv6 => {
                if buf.remaining() < 40 {
                    return Err(DecodeError::InvalidRegisterPayload);
                }
                let ver_class = buf.get_u8();
                if ver_class >> 4 != 6 {
                    return Err(DecodeError::InvalidRegisterPayload);
                }
                buf.advance(7);
                let src = buf.get_ipv6();
                let dst = buf.get_ipv6();
                Ok((IpAddr::V6(src), IpAddr::V6(dst)))
            }
        }
    }
}

// ===== impl RegisterStopMsg =====

impl RegisterStopMsg {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.group.encode(buf);
        encode_unicast_addr(buf, &self.source);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<RegisterStopMsg> {
        let group = EncodedGroup::decode(buf, af)?;
        let source = decode_unicast_addr(buf, af)?;

        Ok(RegisterStopMsg { group, source })
    }
}
