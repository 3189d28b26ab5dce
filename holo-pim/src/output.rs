//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::Bytes;
use holo_utils::ip::{AddressFamily, IpAddrExt};
use holo_utils::southbound::PacketSendMsg;
use internet_checksum::Checksum;

use crate::collections::Interfaces;
use crate::consts::*;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::mrt::assert::AssertMetric;
use crate::mrt::{self, MreKey, upstream};
use crate::packet::assert::AssertMsg;
use crate::packet::bootstrap::{BootstrapMsg, CandRpAdvMsg};
use crate::packet::hello::{HelloMsg, LanPruneDelay};
use crate::packet::join_prune::{JoinPruneGroup, JoinPruneMsg};
use crate::packet::register::{RegisterMsg, RegisterStopMsg};
use crate::packet::{EncodedGroup, EncodedSource, Packet};
use crate::southbound::tx as southbound;

// Encodes and transmits one multicast PIM packet on a vif.
pub(crate) fn send_packet(
    instance: &mut InstanceUpView<'_>,
    iface: &Interface,
    dst: IpAddr,
    packet: Packet,
) {
    let Some(src) = iface.primary_addr() else {
        return;
    };
    let Some(vif_index) = iface.state.vif_index else {
        return;
    };

    Debug::PacketTx(vif_index, &dst, &packet).log();
    instance.state.statistics.msgs_sent.update(packet.pkt_type());

    let payload = Bytes::from(packet.encode(instance.af).to_vec());
    southbound::packet_send(
        instance,
        PacketSendMsg {
            vif_index,
            src,
            dst,
            ttl: PIM_TTL,
            tos: 0,
            router_alert: true,
            internet_control: true,
            payload,
        },
    );
}

// Encodes and transmits one unicast PIM packet toward the given
// destination, using the RPF vif.
pub(crate) fn send_packet_unicast(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    dst: IpAddr,
    packet: Packet,
) {
    let Some(rpf) = mrt::rpf_lookup(instance.state, interfaces, dst) else {
        return;
    };
    let Ok((_, iface)) = interfaces.get_by_vif_index(rpf.vif_index) else {
        return;
    };
    let Some(src) = iface.primary_addr() else {
        return;
    };

    Debug::PacketTx(rpf.vif_index, &dst, &packet).log();
    instance.state.statistics.msgs_sent.update(packet.pkt_type());

    let payload = Bytes::from(packet.encode(instance.af).to_vec());
    southbound::packet_send(
        instance,
        PacketSendMsg {
            vif_index: rpf.vif_index,
            src,
            dst,
            ttl: PIM_UNICAST_TTL,
            tos: 0,
            router_alert: false,
            internet_control: true,
            payload,
        },
    );
}

// Composes and broadcasts a Hello on one interface.
pub(crate) fn send_hello(
    instance: &mut InstanceUpView<'_>,
    iface: &Interface,
) {
    let hello = HelloMsg {
        holdtime: Some(iface.config.hello_holdtime),
        lan_prune_delay: Some(LanPruneDelay {
            tracking: !iface.config.is_tracking_support_disabled,
            propagation_delay: iface.config.propagation_delay,
            override_interval: iface.config.override_interval,
        }),
        dr_priority: Some(iface.config.dr_priority),
        genid: Some(iface.state.genid),
        addr_list: iface.secondary_addrs(),
    };

    send_packet(
        instance,
        iface,
        all_pim_routers(instance.af),
        Packet::Hello(hello),
    );
}

// Sends a Join or Prune for one entry toward the given upstream
// neighbor.
pub(crate) fn send_join_prune(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
    nbr_addr: IpAddr,
    join: bool,
) {
    let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index) else {
        return;
    };
    let holdtime = iface.config.join_prune_holdtime;

    let group = match key {
        MreKey::Rp(rp_addr) => {
            let prefix = instance.af.multicast_prefix();
            let mut group = EncodedGroup::new(prefix.ip());
            group.mask_len = prefix.prefix();
            let source = EncodedSource::new_wc(rp_addr);
            join_prune_group(group, source, join, vec![])
        }
        MreKey::Wc(group_addr) => {
            let Some(rp_addr) = instance
                .state
                .rp_set
                .rp_lookup(&group_addr)
                .map(|rp| rp.rp_addr)
            else {
                return;
            };
            let group = EncodedGroup::new(group_addr);
            let source = EncodedSource::new_wc(rp_addr);

            // A Join(*,G) must carry the Prune(S,G,rpt)s still desired,
            // or the upstream router would clear them.
            let mut rpt_prunes = vec![];
            if join {
                for source in
                    instance.state.mrt.sg_rpt_sources(group_addr).collect::<Vec<_>>()
                {
                    let pruned = instance
                        .state
                        .mrt
                        .sg_rpt
                        .get(&(group_addr, source))
                        .is_some_and(|mre| {
                            mre.upstream.state == upstream::RptState::Pruned
                        });
                    if pruned {
                        rpt_prunes.push(EncodedSource::new_sg_rpt(source));
                    }
                }
            }
            join_prune_group(group, source, join, rpt_prunes)
        }
        MreKey::Sg(group_addr, source_addr) => {
            let group = EncodedGroup::new(group_addr);
            let source = EncodedSource::new_sg(source_addr);
            join_prune_group(group, source, join, vec![])
        }
        MreKey::SgRpt(group_addr, source_addr) => {
            let group = EncodedGroup::new(group_addr);
            let source = EncodedSource::new_sg_rpt(source_addr);
            join_prune_group(group, source, join, vec![])
        }
    };

    let msg = JoinPruneMsg {
        upstream_nbr: nbr_addr,
        holdtime,
        groups: vec![group],
    };

    send_packet(
        instance,
        iface,
        all_pim_routers(instance.af),
        Packet::JoinPrune(msg),
    );
}

fn join_prune_group(
    group: EncodedGroup,
    source: EncodedSource,
    join: bool,
    extra_prunes: Vec<EncodedSource>,
) -> JoinPruneGroup {
    let mut joins = vec![];
    let mut prunes = extra_prunes;
    if join {
        joins.push(source);
    } else {
        prunes.push(source);
    }
    JoinPruneGroup {
        group,
        joins,
        prunes,
    }
}

// Sends a PruneEcho: a Prune with this router as the upstream neighbor,
// so that other downstream routers on the LAN can override it.
pub(crate) fn send_prune_echo(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
) {
    let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index) else {
        return;
    };
    let Some(own_addr) = iface.primary_addr() else {
        return;
    };
    send_join_prune(instance, interfaces, key, vif_index, own_addr, false);
}

// Sends an Assert for one entry on one vif.
pub(crate) fn send_assert(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
    metric: AssertMetric,
) {
    let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index) else {
        return;
    };

    let (group, source, rpt_bit) = match key {
        MreKey::Sg(group, source) => (group, source, false),
        MreKey::Wc(group) => {
            (group, IpAddr::unspecified(instance.af), true)
        }
        _ => return,
    };

    let msg = AssertMsg {
        group: EncodedGroup::new(group),
        source,
        rpt_bit,
        metric_preference: metric.metric_preference,
        metric: metric.metric,
    };

    send_packet(
        instance,
        iface,
        all_pim_routers(instance.af),
        Packet::Assert(msg),
    );
}

// Encapsulates one data packet in a Register and unicasts it to the RP,
// fragmenting the inner IPv4 datagram when it does not fit.
pub(crate) fn send_register(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    rp_addr: IpAddr,
    inner_packet: Bytes,
) {
    // Maximum inner datagram size that still fits one Register within
    // the maximum IP packet, accounting for the outer header, the PIM
    // header and the Register flag word.
    let mtu = 0xffff - 60 - Packet::HDR_LENGTH - 4;

    if inner_packet.len() <= mtu {
        let msg = RegisterMsg {
            border: false,
            null_register: false,
            inner_packet,
        };
        send_packet_unicast(
            instance,
            interfaces,
            rp_addr,
            Packet::Register(msg),
        );
        return;
    }

    match instance.af {
        AddressFamily::Ipv4 => {
            // The DR fragments the inner datagram itself before
            // encapsulation.
            match ipv4_fragment(&inner_packet, mtu) {
                Ok(fragments) => {
                    for fragment in fragments {
                        let msg = RegisterMsg {
                            border: false,
                            null_register: false,
                            inner_packet: Bytes::from(fragment),
                        };
                        send_packet_unicast(
                            instance,
                            interfaces,
                            rp_addr,
                            Packet::Register(msg),
                        );
                    }
                }
                Err(error) => error.log(),
            }
        }
        AddressFamily::Ipv6 => {
            // IPv6 routers never fragment in transit; the oversized
            // datagram is dropped.
            instance.state.statistics.errors.register += 1;
        }
    }
}

// Sends a Null Register probe to refresh (S,G) state at the RP.
pub(crate) fn send_null_register(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    rp_addr: IpAddr,
    source: IpAddr,
    group: IpAddr,
) {
    let msg = RegisterMsg {
        border: false,
        null_register: true,
        inner_packet: Bytes::from(null_register_header(source, group)),
    };
    send_packet_unicast(instance, interfaces, rp_addr, Packet::Register(msg));
}

// Sends a Register-Stop for (S,G) to the originating DR.
pub(crate) fn send_register_stop(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    dst: IpAddr,
    source: IpAddr,
    group: IpAddr,
) {
    let msg = RegisterStopMsg {
        group: EncodedGroup::new(group),
        source,
    };
    send_packet_unicast(
        instance,
        interfaces,
        dst,
        Packet::RegisterStop(msg),
    );
}

// Floods one Bootstrap fragment on every PIM interface of the zone.
pub(crate) fn send_bootstrap(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_indexes: &[u16],
    msg: BootstrapMsg,
) {
    for vif_index in vif_indexes {
        let Ok((_, iface)) = interfaces.get_by_vif_index(*vif_index) else {
            continue;
        };
        send_packet(
            instance,
            iface,
            all_pim_routers(instance.af),
            Packet::Bootstrap(msg.clone()),
        );
    }
}

// Unicasts a Candidate-RP-Advertisement to the elected BSR.
pub(crate) fn send_cand_rp_adv(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    bsr_addr: IpAddr,
    msg: CandRpAdvMsg,
) {
    send_packet_unicast(
        instance,
        interfaces,
        bsr_addr,
        Packet::CandRpAdv(msg),
    );
}

// ===== helper functions =====

// Builds the dummy inner IP header carried by Null Registers.
fn null_register_header(source: IpAddr, group: IpAddr) -> Vec<u8> {
    match (source, group) {
        (IpAddr::V4(source), IpAddr::V4(group)) => {
            let mut hdr = vec![0u8; 20];
            hdr[0] = 0x45;
            hdr[2..4].copy_from_slice(&20u16.to_be_bytes());
            hdr[12..16].copy_from_slice(&source.octets());
            hdr[16..20].copy_from_slice(&group.octets());
            let mut cksum = Checksum::new();
            cksum.add_bytes(&hdr);
            let digest = cksum.checksum();
            hdr[10..12].copy_from_slice(&digest);
            hdr
        }
        (IpAddr::V6(source), IpAddr::V6(group)) => {
            let mut hdr = vec![0u8; 40];
            hdr[0] = 0x60;
            // No next header.
            hdr[6] = 59;
            hdr[8..24].copy_from_slice(&source.octets());
            hdr[24..40].copy_from_slice(&group.octets());
            hdr
        }
        _ => Vec::new(),
    }
}

// Fragments an IPv4 datagram so that every fragment fits the given MTU.
//
// Only options flagged "copy on fragment" are carried into the
// non-initial fragments, and the More-Fragments chain of the original
// datagram is preserved.
fn ipv4_fragment(packet: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, Error> {
    if packet.len() < 20 {
        return Err(Error::RegisterMalformedInner);
    }

    let ihl = ((packet[0] & 0x0f) as usize) << 2;
    let frag_field = u16::from_be_bytes([packet[6], packet[7]]);
    let dst =
        IpAddr::from([packet[16], packet[17], packet[18], packet[19]]);

    // ICMP errors are not sent for multicast destinations, so a DF-set
    // oversized datagram is silently dropped.
    const IP_DF: u16 = 0x4000;
    const IP_MF: u16 = 0x2000;
    const IP_OFFMASK: u16 = 0x1fff;
    if frag_field & IP_DF != 0 {
        return Err(Error::RegisterCannotFragment(dst));
    }

    // Fragmentation is possible only if at least 8 octets of payload fit
    // into each fragment.
    if ((mtu - ihl) & !7) < 8 {
        return Err(Error::RegisterCannotFragment(dst));
    }

    // Build the header used by the non-initial fragments: the base
    // header plus the options flagged for copying.
    let mut frag_hdr = packet[..20].to_vec();
    let mut options = &packet[20..ihl];
    while !options.is_empty() {
        let opt = options[0];
        // End of options.
        if opt == 0 {
            break;
        }
        // No-operation, preserved for alignment.
        if opt == 1 {
            frag_hdr.push(1);
            options = &options[1..];
            continue;
        }
        if options.len() < 2 {
            return Err(Error::RegisterMalformedInner);
        }
        let optlen = options[1] as usize;
        if optlen < 2 || optlen > options.len() {
            return Err(Error::RegisterMalformedInner);
        }
        // Copy-on-fragment flag.
        if opt & 0x80 != 0 {
            frag_hdr.extend_from_slice(&options[..optlen]);
        }
        options = &options[optlen..];
    }
    while (frag_hdr.len() - 20) & 0x3 != 0 {
        frag_hdr.push(0);
    }
    let frag_ihl = frag_hdr.len();
    frag_hdr[0] = 0x40 | (frag_ihl >> 2) as u8;

    let orig_offset = frag_field & IP_OFFMASK;
    let orig_mf = frag_field & IP_MF != 0;

    let mut fragments = vec![];
    let data_end = packet.len();

    // The first fragment keeps the full original header and options.
    let mut data_start;
    {
        let nfb = (mtu - ihl) / 8;
        let frag_len = ihl + nfb * 8;
        let mut first = packet[..frag_len].to_vec();
        let frag_field = (frag_field & !IP_OFFMASK | orig_offset) | IP_MF;
        first[6..8].copy_from_slice(&frag_field.to_be_bytes());
        first[2..4].copy_from_slice(&(frag_len as u16).to_be_bytes());
        update_ipv4_cksum(&mut first, ihl);
        fragments.push(first);
        data_start = frag_len;
    }

    // The remaining fragments use the trimmed header.
    while data_start < data_end {
        let nfb = (mtu - frag_ihl) / 8;
        let mut frag_data_len = nfb * 8;
        let mut is_last_fragment = false;
        if data_end - data_start <= frag_data_len {
            frag_data_len = data_end - data_start;
            is_last_fragment = true;
        }
        let frag_len = frag_ihl + frag_data_len;

        let mut fragment = frag_hdr.clone();
        fragment
            .extend_from_slice(&packet[data_start..data_start + frag_data_len]);

        let mut frag_field =
            orig_offset + ((data_start - ihl) / 8) as u16;
        if !is_last_fragment || orig_mf {
            frag_field |= IP_MF;
        }
        fragment[6..8].copy_from_slice(&frag_field.to_be_bytes());
        fragment[2..4].copy_from_slice(&(frag_len as u16).to_be_bytes());
        update_ipv4_cksum(&mut fragment, frag_ihl);
        fragments.push(fragment);

        data_start += frag_data_len;
    }

    Ok(fragments)
}

fn update_ipv4_cksum(packet: &mut [u8], ihl: usize) {
    packet[10] = 0;
    packet[11] = 0;
    let mut cksum = Checksum::new();
    cksum.add_bytes(&packet[..ihl]);
    let digest = cksum.checksum();
    packet[10..12].copy_from_slice(&digest);
}
