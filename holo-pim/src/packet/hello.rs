//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::ip::{AddressFamily, IpAddrExt};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{
    decode_unicast_addr, encode_unicast_addr, unicast_addr_length,
};

//
// The Hello message body is a sequence of TLV-encoded options:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          OptionType           |         OptionLength          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          OptionValue                          |
// |                              ...                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HelloMsg {
    pub holdtime: Option<u16>,
    pub lan_prune_delay: Option<LanPruneDelay>,
    pub dr_priority: Option<u32>,
    pub genid: Option<u32>,
    pub addr_list: Vec<IpAddr>,
}

// LAN Prune Delay option value: the T bit advertises join suppression
// (tracking) capability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LanPruneDelay {
    pub tracking: bool,
    pub propagation_delay: u16,
    pub override_interval: u16,
}

// Hello option types.
const OPTION_HOLDTIME: u16 = 1;
const OPTION_LAN_PRUNE_DELAY: u16 = 2;
const OPTION_DR_PRIORITY: u16 = 19;
const OPTION_GENID: u16 = 20;
const OPTION_ADDRESS_LIST: u16 = 24;

// ===== impl HelloMsg =====

impl HelloMsg {
    // Holdtime value signaling that the neighbor must never time out.
    pub const HOLDTIME_FOREVER: u16 = 0xffff;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        if let Some(holdtime) = self.holdtime {
            buf.put_u16(OPTION_HOLDTIME);
            buf.put_u16(2);
            buf.put_u16(holdtime);
        }
        if let Some(lan_prune_delay) = &self.lan_prune_delay {
            buf.put_u16(OPTION_LAN_PRUNE_DELAY);
            buf.put_u16(4);
            let mut propagation_delay = lan_prune_delay.propagation_delay;
            if lan_prune_delay.tracking {
                propagation_delay |= 0x8000;
            }
            buf.put_u16(propagation_delay);
            buf.put_u16(lan_prune_delay.override_interval);
        }
        if let Some(dr_priority) = self.dr_priority {
            buf.put_u16(OPTION_DR_PRIORITY);
            buf.put_u16(4);
            buf.put_u32(dr_priority);
        }
        if let Some(genid) = self.genid {
            buf.put_u16(OPTION_GENID);
            buf.put_u16(4);
            buf.put_u32(genid);
        }
        if !self.addr_list.is_empty() {
            buf.put_u16(OPTION_ADDRESS_LIST);
            let af = self.addr_list[0].address_family();
            let length = self.addr_list.len() * unicast_addr_length(af);
            buf.put_u16(length as u16);
            for addr in &self.addr_list {
                encode_unicast_addr(buf, addr);
            }
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
    ) -> DecodeResult<HelloMsg> {
        let mut hello = HelloMsg::default();

        while buf.remaining() >= 4 {
            let option_type = buf.get_u16();
            let option_len = buf.get_u16() as usize;
            if buf.remaining() < option_len {
                return Err(DecodeError::InvalidHelloOption(option_type));
            }
            let mut value = buf.split_to(option_len);

            match option_type {
                OPTION_HOLDTIME => {
                    if option_len != 2 {
                        return Err(DecodeError::InvalidHelloOption(
                            option_type,
                        ));
                    }
                    hello.holdtime = Some(value.get_u16());
                }
                OPTION_LAN_PRUNE_DELAY => {
                    if option_len != 4 {
                        return Err(DecodeError::InvalidHelloOption(
                            option_type,
                        ));
                    }
                    let propagation_delay = value.get_u16();
                    let override_interval = value.get_u16();
                    hello.lan_prune_delay = Some(LanPruneDelay {
                        tracking: propagation_delay & 0x8000 != 0,
                        propagation_delay: propagation_delay & 0x7fff,
                        override_interval,
                    });
                }
                OPTION_DR_PRIORITY => {
                    if option_len != 4 {
                        return Err(DecodeError::InvalidHelloOption(
                            option_type,
                        ));
                    }
                    hello.dr_priority = Some(value.get_u32());
                }
                OPTION_GENID => {
                    if option_len != 4 {
                        return Err(DecodeError::InvalidHelloOption(
                            option_type,
                        ));
                    }
                    hello.genid = Some(value.get_u32());
                }
                OPTION_ADDRESS_LIST => {
                    let addr_len = unicast_addr_length(af);
                    if option_len % addr_len != 0 {
                        return Err(DecodeError::InvalidHelloOption(
                            option_type,
                        ));
                    }
                    while value.remaining() >= addr_len {
                        let addr = decode_unicast_addr(&mut value, af)?;
                        hello.addr_list.push(addr);
                    }
                }
                _ => {
                    // Unknown options are ignored.
                }
            }
        }

        // Trailing bytes that do not form a whole option header.
        if buf.has_remaining() {
            return Err(DecodeError::InvalidLength(buf.remaining()));
        }

        Ok(hello)
    }
}
