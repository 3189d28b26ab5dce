//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use const_addrs::ip;
use holo_pim::packet::assert::AssertMsg;
use holo_pim::packet::bootstrap::{
    BootstrapGroup, BootstrapMsg, BootstrapRp, CandRpAdvMsg,
};
use holo_pim::packet::error::DecodeError;
use holo_pim::packet::hello::{HelloMsg, LanPruneDelay};
use holo_pim::packet::join_prune::{JoinPruneGroup, JoinPruneMsg};
use holo_pim::packet::register::{RegisterMsg, RegisterStopMsg};
use holo_pim::packet::{EncodedGroup, EncodedSource, Packet};
use holo_utils::ip::AddressFamily;

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x20, 0x00, 0xea, 0xf8, 0x00, 0x01, 0x00, 0x02, 0x00, 0x69,
            0x00, 0x02, 0x00, 0x04, 0x81, 0xf4, 0x09, 0xc4, 0x00, 0x13,
            0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00, 0x14, 0x00, 0x04,
            0x12, 0x34, 0x56, 0x78,
        ],
        Packet::Hello(HelloMsg {
            holdtime: Some(105),
            lan_prune_delay: Some(LanPruneDelay {
                tracking: true,
                propagation_delay: 500,
                override_interval: 2500,
            }),
            dr_priority: Some(1),
            genid: Some(0x12345678),
            addr_list: vec![],
        }),
    )
});

static JOINPRUNE1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x23, 0x00, 0xd0, 0xe2, 0x01, 0x00, 0x0a, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0xd2, 0x01, 0x00, 0x00, 0x20, 0xef, 0x01,
            0x01, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x04, 0x20,
            0x0a, 0x00, 0x00, 0x05,
        ],
        Packet::JoinPrune(JoinPruneMsg {
            upstream_nbr: ip!("10.0.0.1"),
            holdtime: 210,
            groups: vec![JoinPruneGroup {
                group: EncodedGroup::new(ip!("239.1.1.1")),
                joins: vec![EncodedSource {
                    source: ip!("10.0.0.5"),
                    mask_len: 32,
                    sparse: true,
                    wildcard: false,
                    rpt: false,
                }],
                prunes: vec![],
            }],
        }),
    )
});

static REGISTERSTOP1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x22, 0x00, 0xe1, 0xd7, 0x01, 0x00, 0x00, 0x20, 0xef, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x0a, 0x00, 0x00, 0x05,
        ],
        Packet::RegisterStop(RegisterStopMsg {
            group: EncodedGroup::new(ip!("239.1.1.1")),
            source: ip!("10.0.0.5"),
        }),
    )
});

static ASSERT1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x25, 0x00, 0xde, 0x69, 0x01, 0x00, 0x00, 0x20, 0xef, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x0a, 0x00, 0x00, 0x05, 0x00, 0x00,
            0x00, 0x64, 0x00, 0x00, 0x00, 0x0a,
        ],
        Packet::Assert(AssertMsg {
            group: EncodedGroup::new(ip!("239.1.1.1")),
            source: ip!("10.0.0.5"),
            rpt_bit: false,
            metric_preference: 100,
            metric: 10,
        }),
    )
});

static NULLREGISTER1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x21, 0x00, 0x9e, 0xff, 0x40, 0x00, 0x00, 0x00, 0x45, 0x00,
            0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0xe3,
            0x0a, 0x00, 0x00, 0x05, 0xef, 0x01, 0x01, 0x01,
        ],
        Packet::Register(RegisterMsg {
            border: false,
            null_register: true,
            inner_packet: Bytes::from_static(&[
                0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0xc0, 0xe3, 0x0a, 0x00, 0x00, 0x05, 0xef, 0x01,
                0x01, 0x01,
            ]),
        }),
    )
});

static BOOTSTRAP1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x24, 0x00, 0xa1, 0xc7, 0x12, 0x34, 0x1e, 0x64, 0x01, 0x00,
            0x0a, 0x00, 0x00, 0xfe, 0x01, 0x00, 0x00, 0x08, 0xef, 0x00,
            0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x0a, 0x01,
            0x00, 0x01, 0x00, 0x96, 0x01, 0x00,
        ],
        Packet::Bootstrap(BootstrapMsg {
            fragment_tag: 0x1234,
            hash_mask_len: 30,
            bsr_priority: 100,
            bsr_addr: ip!("10.0.0.254"),
            groups: vec![BootstrapGroup {
                group: EncodedGroup {
                    group: ip!("239.0.0.0"),
                    mask_len: 8,
                    bidir: false,
                    zone: false,
                },
                rp_count: 1,
                rps: vec![BootstrapRp {
                    rp_addr: ip!("10.1.0.1"),
                    holdtime: 150,
                    priority: 1,
                }],
            }],
        }),
    )
});

static CANDRPADV1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x28, 0x00, 0xdb, 0x5d, 0x01, 0x01, 0x00, 0x96, 0x01, 0x00,
            0x0a, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x08, 0xef, 0x00,
            0x00, 0x00,
        ],
        Packet::CandRpAdv(CandRpAdvMsg {
            priority: 1,
            holdtime: 150,
            rp_addr: ip!("10.1.0.1"),
            groups: vec![EncodedGroup {
                group: ip!("239.0.0.0"),
                mask_len: 8,
                bidir: false,
                zone: false,
            }],
        }),
    )
});

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode(AddressFamily::Ipv4);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let packet_actual = Packet::decode(bytes, AddressFamily::Ipv4).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

#[test]
fn test_encode_hello() {
    let (ref bytes, ref packet) = *HELLO1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_hello() {
    let (ref bytes, ref packet) = *HELLO1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_join_prune() {
    let (ref bytes, ref packet) = *JOINPRUNE1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_join_prune() {
    let (ref bytes, ref packet) = *JOINPRUNE1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_register_stop() {
    let (ref bytes, ref packet) = *REGISTERSTOP1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_register_stop() {
    let (ref bytes, ref packet) = *REGISTERSTOP1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_assert() {
    let (ref bytes, ref packet) = *ASSERT1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_assert() {
    let (ref bytes, ref packet) = *ASSERT1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_null_register() {
    let (ref bytes, ref packet) = *NULLREGISTER1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_null_register() {
    let (ref bytes, ref packet) = *NULLREGISTER1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_decode_register_inner_addresses() {
    let (_, ref packet) = *NULLREGISTER1;
    let Packet::Register(msg) = packet else {
        unreachable!();
    };
    let (src, dst) = msg.inner_addresses(AddressFamily::Ipv4).unwrap();
    assert_eq!(src, ip!("10.0.0.5"));
    assert_eq!(dst, ip!("239.1.1.1"));
}

#[test]
fn test_encode_bootstrap() {
    let (ref bytes, ref packet) = *BOOTSTRAP1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_bootstrap() {
    let (ref bytes, ref packet) = *BOOTSTRAP1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_cand_rp_adv() {
    let (ref bytes, ref packet) = *CANDRPADV1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_cand_rp_adv() {
    let (ref bytes, ref packet) = *CANDRPADV1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_decode_bad_checksum() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[2] ^= 0xff;
    assert_eq!(
        Packet::decode(&bytes, AddressFamily::Ipv4),
        Err(DecodeError::InvalidChecksum)
    );
}

#[test]
fn test_decode_bad_version() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[0] = 0x10 | (bytes[0] & 0x0f);
    assert_eq!(
        Packet::decode(&bytes, AddressFamily::Ipv4),
        Err(DecodeError::InvalidVersion(1))
    );
}

#[test]
fn test_decode_unknown_type() {
    // Type 9 is not assigned.
    let bytes = [0x29, 0x00, 0xd6, 0xff];
    assert_eq!(
        Packet::decode(&bytes, AddressFamily::Ipv4),
        Err(DecodeError::UnknownPacketType(9))
    );
}

#[test]
fn test_decode_nonzero_reserved() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    // Flip the reserved byte and fix the checksum accordingly so only
    // the reserved-field check can fail.
    bytes[1] = 0x01;
    let mut cksum = internet_checksum::Checksum::new();
    bytes[2] = 0;
    bytes[3] = 0;
    cksum.add_bytes(&bytes);
    bytes[2..4].copy_from_slice(&cksum.checksum());
    assert_eq!(
        Packet::decode(&bytes, AddressFamily::Ipv4),
        Err(DecodeError::InvalidReservedField(1))
    );
}

#[test]
fn test_decode_truncated() {
    let (ref bytes, _) = *JOINPRUNE1;
    let result = Packet::decode(&bytes[..bytes.len() - 4], AddressFamily::Ipv4);
    assert!(result.is_err());
}

#[test]
fn test_decode_wrong_address_family() {
    let (ref bytes, _) = *JOINPRUNE1;
    // The same bytes parsed as IPv6 must be rejected at the first
    // encoded address (checksum verification is delegated for IPv6).
    assert_eq!(
        Packet::decode(bytes, AddressFamily::Ipv6),
        Err(DecodeError::InvalidAddressFamily(1))
    );
}
