//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::ip::AddressFamily;
use serde::{Deserialize, Serialize};

use crate::packet::error::DecodeResult;
use crate::packet::{
    EncodedGroup, decode_unicast_addr, encode_unicast_addr,
};

//
// The Assert message body:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Group Address (Encoded-Group format)                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Source Address (Encoded-Unicast format)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |R|                     Metric Preference                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             Metric                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// For a (*,G) Assert the source address is zero and the R bit is set.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AssertMsg {
    pub group: EncodedGroup,
    pub source: IpAddr,
    pub rpt_bit: bool,
    pub metric_preference: u32,
    pub metric: u32,
}

const RPT_BIT: u32 = 1 << 31;

// ===== impl AssertMsg =====

impl AssertMsg {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.group.encode(buf);
        encode_unicast_addr(buf, &self.source);
        let mut metric_preference = self.metric_preference & !RPT_BIT;
        if self.rpt_bit {
            metric_preference |= RPT_BIT;
        }
        buf.put_u32(metric_preference);
        buf.put_u32(self.metric);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<AssertMsg> {
        let group = EncodedGroup::decode(buf, af)?;
        let source = decode_unicast_addr(buf, af)?;
        let metric_preference = buf.try_get_u32()?;
        let metric = buf.try_get_u32()?;

        Ok(AssertMsg {
            group,
            source,
            rpt_bit: metric_preference & RPT_BIT != 0,
            metric_preference: metric_preference & !RPT_BIT,
            metric,
        })
    }
}
