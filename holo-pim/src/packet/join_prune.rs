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
    EncodedGroup, EncodedSource, decode_unicast_addr, encode_unicast_addr,
};

//
// The Join/Prune message body:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        Upstream Neighbor Address (Encoded-Unicast format)     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Reserved     | Num groups    |          Holdtime             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Multicast Group Address 1 (Encoded-Group format)      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Number of Joined Sources    |   Number of Pruned Sources    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        Joined Source Address 1 (Encoded-Source format)        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             ...                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct JoinPruneMsg {
    pub upstream_nbr: IpAddr,
    pub holdtime: u16,
    pub groups: Vec<JoinPruneGroup>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct JoinPruneGroup {
    pub group: EncodedGroup,
    pub joins: Vec<EncodedSource>,
    pub prunes: Vec<EncodedSource>,
}

// ===== impl JoinPruneMsg =====

impl JoinPruneMsg {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        encode_unicast_addr(buf, &self.upstream_nbr);
        buf.put_u8(0);
        buf.put_u8(self.groups.len() as u8);
        buf.put_u16(self.holdtime);
        for group in &self.groups {
            group.group.encode(buf);
            buf.put_u16(group.joins.len() as u16);
            buf.put_u16(group.prunes.len() as u16);
            for source in &group.joins {
                source.encode(buf);
            }
            for source in &group.prunes {
                source.encode(buf);
            }
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<JoinPruneMsg> {
        let upstream_nbr = decode_unicast_addr(buf, af)?;
        let reserved = buf.try_get_u8()?;
        if reserved != 0 {
            return Err(DecodeError::InvalidReservedField(reserved));
        }
        let num_groups = buf.try_get_u8()?;
        let holdtime = buf.try_get_u16()?;

        let mut groups = Vec::with_capacity(num_groups as usize);
        for _ in 0..num_groups {
            let group = EncodedGroup::decode(buf, af)?;
            let num_joins = buf.try_get_u16()?;
            let num_prunes = buf.try_get_u16()?;
            let mut joins = Vec::with_capacity(num_joins as usize);
            for _ in 0..num_joins {
                joins.push(EncodedSource::decode(buf, af)?);
            }
            let mut prunes = Vec::with_capacity(num_prunes as usize);
            for _ in 0..num_prunes {
                prunes.push(EncodedSource::decode(buf, af)?);
            }
            groups.push(JoinPruneGroup {
                group,
                joins,
                prunes,
            });
        }

        Ok(JoinPruneMsg {
            upstream_nbr,
            holdtime,
            groups,
        })
    }
}
