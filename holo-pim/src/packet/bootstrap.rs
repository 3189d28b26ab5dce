//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::ip::AddressFamily;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{
    EncodedGroup, decode_unicast_addr, encode_unicast_addr,
    unicast_addr_length,
};

//
// The Bootstrap message body:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Fragment Tag          | Hash Mask Len | BSR Priority  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             BSR Address (Encoded-Unicast format)              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Group Address 1 (Encoded-Group format)                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | RP Count 1    | Frag RP Cnt 1 |         Reserved              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             RP Address 1 (Encoded-Unicast format)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          RP1 Holdtime         | RP1 Priority  |   Reserved    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                               ...                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BootstrapMsg {
    pub fragment_tag: u16,
    pub hash_mask_len: u8,
    pub bsr_priority: u8,
    pub bsr_addr: IpAddr,
    pub groups: Vec<BootstrapGroup>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BootstrapGroup {
    pub group: EncodedGroup,
    // Total number of RPs for the group prefix across all fragments.
    pub rp_count: u8,
    pub rps: Vec<BootstrapRp>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BootstrapRp {
    pub rp_addr: IpAddr,
    pub holdtime: u16,
    pub priority: u8,
}

//
// The Candidate-RP-Advertisement message body:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Prefix-Cnt    |   Priority    |           Holdtime            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             RP Address (Encoded-Unicast format)               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Group Address 1 (Encoded-Group format)                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                               ...                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct CandRpAdvMsg {
    pub priority: u8,
    pub holdtime: u16,
    pub rp_addr: IpAddr,
    pub groups: Vec<EncodedGroup>,
}

// ===== impl BootstrapMsg =====

impl BootstrapMsg {
    // Fixed part of the message body.
    pub fn base_length(af: AddressFamily) -> usize {
        4 + unicast_addr_length(af)
    }

    // Size of one group header (Encoded-Group + counters).
    pub fn group_length(af: AddressFamily) -> usize {
        EncodedGroup::length(af) + 4
    }

    // Size of one RP entry.
    pub fn rp_length(af: AddressFamily) -> usize {
        unicast_addr_length(af) + 4
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.fragment_tag);
        buf.put_u8(self.hash_mask_len);
        buf.put_u8(self.bsr_priority);
        encode_unicast_addr(buf, &self.bsr_addr);
        for group in &self.groups {
            group.group.encode(buf);
            buf.put_u8(group.rp_count);
            buf.put_u8(group.rps.len() as u8);
            buf.put_u16(0);
            for rp in &group.rps {
                encode_unicast_addr(buf, &rp.rp_addr);
                buf.put_u16(rp.holdtime);
                buf.put_u8(rp.priority);
                buf.put_u8(0);
            }
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<BootstrapMsg> {
        let fragment_tag = buf.try_get_u16()?;
        let hash_mask_len = buf.try_get_u8()?;
        if hash_mask_len > af.max_prefixlen() {
            return Err(DecodeError::InvalidMaskLength(hash_mask_len));
        }
        let bsr_priority = buf.try_get_u8()?;
        let bsr_addr = decode_unicast_addr(buf, af)?;

        let mut groups = vec![];
        while buf.has_remaining() {
            let group = EncodedGroup::decode(buf, af)?;
            let rp_count = buf.try_get_u8()?;
            let frag_rp_count = buf.try_get_u8()?;
            let _reserved = buf.try_get_u16()?;
            let mut rps = Vec::with_capacity(frag_rp_count as usize);
            for _ in 0..frag_rp_count {
                let rp_addr = decode_unicast_addr(buf, af)?;
                let holdtime = buf.try_get_u16()?;
                let priority = buf.try_get_u8()?;
                let _reserved = buf.try_get_u8()?;
                rps.push(BootstrapRp {
                    rp_addr,
                    holdtime,
                    priority,
                });
            }
            groups.push(BootstrapGroup {
                group,
                rp_count,
                rps,
            });
        }

        Ok(BootstrapMsg {
            fragment_tag,
            hash_mask_len,
            bsr_priority,
            bsr_addr,
            groups,
        })
    }
}

// ===== impl CandRpAdvMsg =====

impl CandRpAdvMsg {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.groups.len() as u8);
        buf.put_u8(self.priority);
        buf.put_u16(self.holdtime);
        encode_unicast_addr(buf, &self.rp_addr);
        for group in &self.groups {
            group.encode(buf);
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<CandRpAdvMsg> {
        let prefix_count = buf.try_get_u8()?;
        let priority = buf.try_get_u8()?;
        let holdtime = buf.try_get_u16()?;
        let rp_addr = decode_unicast_addr(buf, af)?;
        let mut groups = Vec::with_capacity(prefix_count as usize);
        for _ in 0..prefix_count {
            groups.push(EncodedGroup::decode(buf, af)?);
        }

        Ok(CandRpAdvMsg {
            priority,
            holdtime,
            rp_addr,
            groups,
        })
    }
}
