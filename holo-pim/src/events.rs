//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use holo_utils::ibus::IbusMsg;
use holo_utils::ip::IpAddrExt;
use holo_utils::southbound::{FeaUpdate, PacketRecvMsg};

use crate::collections::{InterfaceIndex, Interfaces};
use crate::debug::{Debug, NeighborDeleteReason};
use crate::error::Error;
use crate::instance::{Instance, InstanceUpView};
use crate::interface::Interface;
use crate::mrt::assert::{self, AssertMetric};
use crate::mrt::{self, MreKey, downstream, register, upstream};
use crate::neighbor::Neighbor;
use crate::packet::assert::AssertMsg;
use crate::packet::hello::HelloMsg;
use crate::packet::join_prune::JoinPruneMsg;
use crate::packet::{EncodedSource, Packet};
use crate::tasks::messages::ProtocolInputMsg;
use crate::{bsr, ibus, output, southbound, tasks};

// ===== message dispatch =====

pub(crate) fn process_ibus_msg(
    instance: &mut Instance,
    msg: IbusMsg,
) -> Result<(), Error> {
    ibus::rx::process_msg(instance, msg)
}

pub(crate) fn process_fea_update(
    instance: &mut Instance,
    msg: FeaUpdate,
) -> Result<(), Error> {
    southbound::rx::process_update(instance, msg)
}

pub(crate) fn process_protocol_msg(
    instance: &mut Instance,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    let Some((mut instance, arenas)) = instance.as_up() else {
        return Ok(());
    };
    let interfaces = &mut arenas.interfaces;

    match msg {
        // Periodic or triggered Hello.
        ProtocolInputMsg::HelloInterval(msg) => {
            let (_, iface) = interfaces.get_by_key(&msg.iface_key)?;
            if iface.state.active && !iface.is_register_vif {
                output::send_hello(&mut instance, iface);
            }
        }
        // Neighbor liveness timeout.
        ProtocolInputMsg::NeighborTimeout(msg) => {
            let (_, iface) = interfaces.get_mut_by_key(&msg.iface_key)?;
            let vif_index = iface.state.vif_index.unwrap();
            neighbor_delete(
                iface,
                msg.addr,
                NeighborDeleteReason::LivenessTimeout,
            );
            mrt::neighbor_down(&mut instance, interfaces, vif_index, msg.addr);
            mrt::full_recompute(&mut instance, interfaces);
        }
        // Upstream join timer.
        ProtocolInputMsg::JoinTimer(msg) => {
            upstream::run_fsm(
                &mut instance,
                interfaces,
                msg.key,
                upstream::Event::JoinTimerExpiry,
            );
        }
        // Upstream override timer.
        ProtocolInputMsg::OverrideTimer(msg) => match msg.key {
            MreKey::SgRpt(group, source) => {
                upstream::run_rpt_fsm(
                    &mut instance,
                    interfaces,
                    group,
                    source,
                    upstream::RptEvent::OverrideTimerExpiry,
                );
            }
            key => {
                upstream::run_fsm(
                    &mut instance,
                    interfaces,
                    key,
                    upstream::Event::OverrideTimerExpiry,
                );
            }
        },
        // (S,G) keepalive timer.
        ProtocolInputMsg::KeepaliveTimer(msg) => {
            mrt::keepalive_expired(
                &mut instance,
                interfaces,
                msg.group,
                msg.source,
            );
        }
        // Register-Stop timer.
        ProtocolInputMsg::RegisterStopTimer(msg) => {
            register::run_fsm(
                &mut instance,
                interfaces,
                msg.group,
                msg.source,
                register::Event::RegisterStopTimerExpiry,
            );
        }
        // Assert timer.
        ProtocolInputMsg::AssertTimer(msg) => {
            let changed = assert::run_fsm(
                &mut instance,
                interfaces,
                msg.key,
                msg.vif_index,
                assert::Event::TimerExpiry,
            );
            if changed && let Some(group) = msg.key.group() {
                mrt::group_state_changed(&mut instance, interfaces, group);
            }
        }
        // Downstream expiry timer.
        ProtocolInputMsg::DownstreamExpiry(msg) => {
            downstream_fsm_event(
                &mut instance,
                interfaces,
                msg.key,
                msg.vif_index,
                downstream::Event::ExpiryTimerExpiry,
                None,
            );
            if let Some(group) = msg.key.group() {
                mrt::group_state_changed(&mut instance, interfaces, group);
            }
        }
        // Downstream prune-pending timer.
        ProtocolInputMsg::PrunePending(msg) => {
            downstream_fsm_event(
                &mut instance,
                interfaces,
                msg.key,
                msg.vif_index,
                downstream::Event::PrunePendingTimerExpiry,
                None,
            );
            if let Some(group) = msg.key.group() {
                mrt::group_state_changed(&mut instance, interfaces, group);
            }
        }
        // Bootstrap protocol timers.
        ProtocolInputMsg::BsrTimer(msg) => {
            bsr::bsr_timer_expiry(&mut instance, interfaces, msg.zone_id)?;
        }
        ProtocolInputMsg::ZoneExpiry(msg) => {
            bsr::zone_expiry(&mut instance, interfaces, msg.zone_id)?;
        }
        ProtocolInputMsg::RpExpiry(msg) => {
            bsr::rp_expiry(
                &mut instance,
                interfaces,
                msg.zone_id,
                msg.group_prefix,
                msg.rp_addr,
            )?;
        }
        ProtocolInputMsg::CrpAdvTick(_) => {
            bsr::cand_rp_adv_tick(&mut instance, interfaces);
        }
    }

    Ok(())
}

// ===== packet receive path =====

pub(crate) fn process_packet(
    instance: &mut Instance,
    msg: PacketRecvMsg,
) -> Result<(), Error> {
    let Some((mut instance, arenas)) = instance.as_up() else {
        return Ok(());
    };
    let interfaces = &mut arenas.interfaces;

    let Ok((iface_idx, iface)) = interfaces.get_by_vif_index(msg.vif_index)
    else {
        return Err(Error::VifIndexNotFound(msg.vif_index));
    };
    if !iface.state.active || iface.is_register_vif {
        return Ok(());
    }

    // Packets sourced by this router come back on multicast loops.
    if iface.primary_addr() == Some(msg.src) {
        return Ok(());
    }

    // Decode the message. Any validation failure is counted against the
    // receiving vif and the message is discarded with no state change.
    let packet = match Packet::decode(&msg.payload, instance.af) {
        Ok(packet) => packet,
        Err(error) => {
            let iface = &mut interfaces[iface_idx];
            iface.state.statistics.rx_errors += 1;
            instance.state.statistics.errors.total += 1;
            instance.state.statistics.errors.decode += 1;
            return Err(Error::PacketDecodeError(msg.vif_index, error));
        }
    };

    Debug::PacketRx(&interfaces[iface_idx].name, &msg.src, &packet).log();
    let iface = &mut interfaces[iface_idx];
    iface.state.statistics.msgs_rcvd.update(packet.pkt_type());
    instance
        .state
        .statistics
        .msgs_rcvd
        .update(packet.pkt_type());

    match packet {
        Packet::Hello(hello) => {
            process_hello(&mut instance, interfaces, iface_idx, msg.src, hello)?;
        }
        Packet::JoinPrune(jp) => {
            process_join_prune(
                &mut instance,
                interfaces,
                msg.vif_index,
                msg.src,
                jp,
            )?;
        }
        Packet::Assert(assert_msg) => {
            process_assert(
                &mut instance,
                interfaces,
                msg.vif_index,
                msg.src,
                assert_msg,
            )?;
        }
        Packet::Register(register_msg) => {
            register::process_register_rp(
                &mut instance,
                interfaces,
                msg.src,
                msg.dst,
                &register_msg,
            )?;
        }
        Packet::RegisterStop(stop) => {
            register::process_register_stop(
                &mut instance,
                interfaces,
                stop.source,
                stop.group.group,
            );
        }
        Packet::Bootstrap(bootstrap) => {
            bsr::process_bootstrap(
                &mut instance,
                interfaces,
                msg.vif_index,
                msg.src,
                bootstrap,
            )?;
        }
        Packet::CandRpAdv(adv) => {
            bsr::process_cand_rp_adv(&mut instance, interfaces, adv)?;
        }
        // Dense-mode operation is not implemented; the messages are
        // recognized and counted only.
        Packet::Graft(_) | Packet::GraftAck(_) => (),
    }

    Ok(())
}

// ===== Hello processing =====

fn process_hello(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    iface_idx: InterfaceIndex,
    src: IpAddr,
    hello: HelloMsg,
) -> Result<(), Error> {
    let iface = &mut interfaces[iface_idx];

    if !src.is_usable() {
        instance.state.statistics.errors.invalid_src_addr += 1;
        return Err(Error::InvalidSrcAddr(src));
    }

    // A zero holdtime asks for the neighbor to be removed at once.
    if hello.holdtime == Some(0) {
        let vif_index = iface.state.vif_index.unwrap();
        neighbor_delete(iface, src, NeighborDeleteReason::ZeroHoldtime);
        mrt::neighbor_down(instance, interfaces, vif_index, src);
        mrt::full_recompute(instance, interfaces);
        return Ok(());
    }

    let default_holdtime = iface.config.hello_holdtime;
    let is_new = !iface.state.neighbors.contains_key(&src);
    let nbr = iface
        .state
        .neighbors
        .entry(src)
        .or_insert_with(|| Neighbor::new(src, 2));
    let result = nbr.hello_update(&hello, default_holdtime);
    let holdtime = nbr.holdtime;

    let vif_index = iface.state.vif_index.unwrap();
    let genid_changed = result.genid_changed;
    let dr_election_affected = result.dr_election_affected || is_new;

    // Restart the liveness timer. A holdtime of 0xffff means the
    // neighbor never times out.
    if holdtime != HelloMsg::HOLDTIME_FOREVER {
        let timer = tasks::nbr_liveness_timer(
            iface,
            src,
            Duration::from_secs(holdtime.into()),
            instance,
        );
        iface.state.neighbors.get_mut(&src).unwrap().liveness_timer =
            Some(timer);
    } else {
        iface.state.neighbors.get_mut(&src).unwrap().liveness_timer = None;
    }

    // A new neighbor or a restarted one warrants a triggered Hello so it
    // learns about this router quickly.
    if is_new || genid_changed {
        let delay = rand::random_range(0..=iface.config.hello_triggered_delay);
        iface.state.tasks.hello_triggered = Some(tasks::hello_triggered(
            Duration::from_secs(delay.into()),
            iface.id,
            instance,
        ));
    }

    // Re-run the DR election when any of its inputs changed.
    let mut recompute = false;
    if dr_election_affected && iface.dr_update() {
        recompute = true;
    }

    if genid_changed {
        // The neighbor restarted: re-send Joins so it relearns them.
        mrt::neighbor_down(instance, interfaces, vif_index, src);
    }
    if recompute {
        mrt::full_recompute(instance, interfaces);
    }

    Ok(())
}

fn neighbor_delete(
    iface: &mut Interface,
    addr: IpAddr,
    reason: NeighborDeleteReason,
) {
    if let Some(nbr) = iface.state.neighbors.remove(&addr) {
        nbr.delete(reason);
        iface.dr_update();
    }
}

// ===== Join/Prune processing =====

fn process_join_prune(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    src: IpAddr,
    msg: JoinPruneMsg,
) -> Result<(), Error> {
    let (_, iface) = interfaces.get_by_vif_index(vif_index)?;

    // Join/Prune messages are only accepted from known neighbors unless
    // configured otherwise.
    if !iface.config.accept_nohello_neighbors
        && !iface.state.neighbors.contains_key(&src)
    {
        instance.state.statistics.errors.unknown_neighbor += 1;
        return Err(Error::UnknownNeighbor(vif_index, src));
    }

    let targets_me = iface.primary_addr() == Some(msg.upstream_nbr);

    if targets_me {
        process_join_prune_downstream(instance, interfaces, vif_index, &msg);
    } else {
        process_join_prune_overheard(instance, interfaces, vif_index, &msg);
    }

    Ok(())
}

// Downstream processing: this router is the message's upstream
// neighbor.
fn process_join_prune_downstream(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    msg: &JoinPruneMsg,
) {
    let holdtime = msg.holdtime;

    for group in &msg.groups {
        let group_addr = group.group.group;
        let mut saw_wc_join = false;

        for join in &group.joins {
            let Some(key) = source_key(&group.group, join) else {
                continue;
            };
            if matches!(key, MreKey::Wc(_) | MreKey::Rp(_)) {
                saw_wc_join = true;
            }
            downstream_entry_create(instance, key);
            downstream_fsm_event(
                instance,
                interfaces,
                key,
                vif_index,
                downstream::Event::JoinRcvd,
                Some(holdtime),
            );
        }

        // A Join(*,G) places the (S,G,rpt) prunes of the group into
        // their temporary states; prunes in the same message re-arm
        // them, the end of the message clears the rest.
        if saw_wc_join {
            let sources: Vec<_> =
                instance.state.mrt.sg_rpt_sources(group_addr).collect();
            for source in sources {
                downstream_fsm_event(
                    instance,
                    interfaces,
                    MreKey::SgRpt(group_addr, source),
                    vif_index,
                    downstream::Event::SeeJoinWc,
                    None,
                );
            }
        }

        for prune in &group.prunes {
            let Some(key) = source_key(&group.group, prune) else {
                continue;
            };
            if matches!(key, MreKey::SgRpt(..)) {
                downstream_entry_create(instance, key);
            }
            downstream_fsm_event(
                instance,
                interfaces,
                key,
                vif_index,
                downstream::Event::PruneRcvd,
                Some(holdtime),
            );
        }

        if saw_wc_join {
            let sources: Vec<_> =
                instance.state.mrt.sg_rpt_sources(group_addr).collect();
            for source in sources {
                downstream_fsm_event(
                    instance,
                    interfaces,
                    MreKey::SgRpt(group_addr, source),
                    vif_index,
                    downstream::Event::EndOfMessage,
                    None,
                );
            }
        }

        mrt::group_state_changed(instance, interfaces, group_addr);
    }
}

// Overheard processing: another downstream router on the LAN sent a
// Join/Prune toward the upstream neighbor this router also uses.
fn process_join_prune_overheard(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    msg: &JoinPruneMsg,
) {
    let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index) else {
        return;
    };
    let suppression = iface.is_join_suppression_enabled();
    let target = Some((vif_index, msg.upstream_nbr));

    for group in &msg.groups {
        let group_addr = group.group.group;

        for join in &group.joins {
            let Some(key) = source_key(&group.group, join) else {
                continue;
            };
            // A Join addressed to RPF' suppresses our own periodic
            // Join.
            if suppression
                && upstream_rpf_nbr(instance, key) == target
                && !matches!(key, MreKey::SgRpt(..))
            {
                upstream::run_fsm(
                    instance,
                    interfaces,
                    key,
                    upstream::Event::SeeJoinToRpfNbr,
                );
            }
        }

        for prune in &group.prunes {
            let Some(key) = source_key(&group.group, prune) else {
                continue;
            };
            if upstream_rpf_nbr(instance, key) != target {
                continue;
            }
            // A Prune addressed to RPF' starts the override timer so
            // that interested routers rejoin before the upstream state
            // expires.
            match key {
                MreKey::SgRpt(group, source) => {
                    upstream::run_rpt_fsm(
                        instance,
                        interfaces,
                        group,
                        source,
                        upstream::RptEvent::SeePruneSgRpt,
                    );
                }
                key => {
                    upstream::run_fsm(
                        instance,
                        interfaces,
                        key,
                        upstream::Event::SeePruneToRpfNbr,
                    );
                }
            }
        }
    }
}

// The RPF' neighbor an entry last joined toward.
fn upstream_rpf_nbr(
    instance: &InstanceUpView<'_>,
    key: MreKey,
) -> Option<(u16, IpAddr)> {
    match key {
        MreKey::Rp(rp_addr) => instance
            .state
            .mrt
            .rp
            .get(&rp_addr)
            .and_then(|mre| mre.upstream.rpf_nbr),
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get(&group)
            .and_then(|mre| mre.upstream.rpf_nbr),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get(&(group, source))
            .and_then(|mre| mre.upstream.rpf_nbr),
        MreKey::SgRpt(group, _) => instance
            .state
            .mrt
            .wc
            .get(&group)
            .and_then(|mre| mre.upstream.rpf_nbr),
    }
}

// Maps one encoded source of a Join/Prune group to the entry it
// addresses.
fn source_key(
    group: &crate::packet::EncodedGroup,
    source: &EncodedSource,
) -> Option<MreKey> {
    if !source.sparse {
        return None;
    }
    let group_addr = group.group;
    match (source.wildcard, source.rpt) {
        // With both bits set the source field carries an RP address: a
        // (*,*,RP) entry when the group covers the whole multicast
        // range, a (*,G) entry otherwise.
        (true, true) => {
            let range = group_addr.address_family().multicast_prefix();
            if group_addr == range.ip() && group.mask_len == range.prefix() {
                Some(MreKey::Rp(source.source))
            } else if group_addr.is_multicast()
                && !group_addr.is_linklocal_multicast()
            {
                Some(MreKey::Wc(group_addr))
            } else {
                None
            }
        }
        (false, true) => Some(MreKey::SgRpt(group_addr, source.source)),
        (false, false) => Some(MreKey::Sg(group_addr, source.source)),
        (true, false) => None,
    }
}

// Creates the entry a downstream Join/Prune refers to, if missing.
fn downstream_entry_create(instance: &mut InstanceUpView<'_>, key: MreKey) {
    match key {
        MreKey::Rp(rp_addr) => {
            instance.state.mrt.rp_entry_mut(rp_addr);
        }
        MreKey::Wc(group) => {
            let rp_addr = instance
                .state
                .rp_set
                .rp_lookup(&group)
                .map(|rp| rp.rp_addr);
            instance.state.mrt.wc_entry_mut(group, rp_addr);
        }
        MreKey::Sg(group, source) => {
            let rp_addr = instance
                .state
                .rp_set
                .rp_lookup(&group)
                .map(|rp| rp.rp_addr);
            instance.state.mrt.sg_entry_mut(group, source, rp_addr);
        }
        MreKey::SgRpt(group, source) => {
            instance.state.mrt.sg_rpt_entry_mut(group, source);
        }
    }
}

// Feeds one event into the downstream FSM of the given entry/vif and
// dispatches the resulting actions.
pub(crate) fn downstream_fsm_event(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
    event: downstream::Event,
    holdtime: Option<u16>,
) {
    let Some(vif) = downstream_vif_mut(instance, key, vif_index, &event)
    else {
        return;
    };

    let Some((new_state, actions)) =
        downstream::transition(vif.state, event)
    else {
        return;
    };
    if new_state != vif.state {
        Debug::DownstreamTransition(&key, vif_index, vif.state, new_state)
            .log();
    }
    vif.state = new_state;

    for action in actions {
        match action {
            downstream::Action::StartExpiryTimer => {
                let holdtime = holdtime.unwrap_or(0);
                if holdtime == 0 {
                    // A zero holdtime expires the state at once.
                    downstream_fsm_event(
                        instance,
                        interfaces,
                        key,
                        vif_index,
                        downstream::Event::ExpiryTimerExpiry,
                        None,
                    );
                    return;
                }
                let timer = tasks::downstream_expiry_timer(
                    key,
                    vif_index,
                    Duration::from_secs(holdtime.into()),
                    instance,
                );
                if let Some(vif) =
                    downstream_vif_mut(instance, key, vif_index, &event)
                {
                    vif.expiry_timer = Some(timer);
                }
            }
            downstream::Action::StartPrunePendingTimer => {
                // The prune-pending period is the LAN's override
                // interval; with a single neighbor on the LAN there is
                // nobody to override and the prune takes effect at
                // once.
                let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index)
                else {
                    continue;
                };
                if iface.state.neighbors.len() <= 1 {
                    downstream_fsm_event(
                        instance,
                        interfaces,
                        key,
                        vif_index,
                        downstream::Event::PrunePendingTimerExpiry,
                        None,
                    );
                    return;
                }
                let delay = Duration::from_millis(
                    iface.effective_propagation_delay() as u64
                        + iface.effective_override_interval() as u64,
                );
                let timer = tasks::prune_pending_timer(
                    key, vif_index, delay, instance,
                );
                if let Some(vif) =
                    downstream_vif_mut(instance, key, vif_index, &event)
                {
                    vif.prune_pending_timer = Some(timer);
                }
            }
            downstream::Action::CancelPrunePendingTimer => {
                if let Some(vif) =
                    downstream_vif_mut(instance, key, vif_index, &event)
                {
                    vif.prune_pending_timer = None;
                }
            }
            downstream::Action::CancelTimers => {
                if let Some(vif) =
                    downstream_vif_mut(instance, key, vif_index, &event)
                {
                    vif.expiry_timer = None;
                    vif.prune_pending_timer = None;
                }
            }
            downstream::Action::SendPruneEcho => {
                let Ok((_, iface)) = interfaces.get_by_vif_index(vif_index)
                else {
                    continue;
                };
                if iface.lan_needs_prune_echo() {
                    output::send_prune_echo(
                        instance, interfaces, key, vif_index,
                    );
                }
            }
        }
    }

    // Downstream state in NoInfo carries no information.
    if new_state == downstream::State::NoInfo {
        downstream_vif_remove(instance, key, vif_index);
        instance.state.mrt.entry_try_remove(key);
    }
}

fn downstream_vif_mut<'a>(
    instance: &'a mut InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
    event: &downstream::Event,
) -> Option<&'a mut downstream::DownstreamVif> {
    // Only a received Join or Prune creates per-vif state.
    let create = matches!(
        event,
        downstream::Event::JoinRcvd | downstream::Event::PruneRcvd
    );

    let downstream = match key {
        MreKey::Rp(rp_addr) => instance
            .state
            .mrt
            .rp
            .get_mut(&rp_addr)
            .map(|mre| &mut mre.downstream),
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get_mut(&group)
            .map(|mre| &mut mre.downstream),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get_mut(&(group, source))
            .map(|mre| &mut mre.downstream),
        MreKey::SgRpt(group, source) => instance
            .state
            .mrt
            .sg_rpt
            .get_mut(&(group, source))
            .map(|mre| &mut mre.downstream),
    }?;

    if create {
        Some(downstream.entry(vif_index).or_default())
    } else {
        downstream.get_mut(&vif_index)
    }
}

fn downstream_vif_remove(
    instance: &mut InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
) {
    let downstream = match key {
        MreKey::Rp(rp_addr) => instance
            .state
            .mrt
            .rp
            .get_mut(&rp_addr)
            .map(|mre| &mut mre.downstream),
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get_mut(&group)
            .map(|mre| &mut mre.downstream),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get_mut(&(group, source))
            .map(|mre| &mut mre.downstream),
        MreKey::SgRpt(group, source) => instance
            .state
            .mrt
            .sg_rpt
            .get_mut(&(group, source))
            .map(|mre| &mut mre.downstream),
    };
    if let Some(downstream) = downstream {
        downstream.remove(&vif_index);
    }
}

// ===== Assert processing =====

fn process_assert(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    src: IpAddr,
    msg: AssertMsg,
) -> Result<(), Error> {
    let group = msg.group.group;

    // A (*,G) assert has the RPT bit set and no source.
    let key = if msg.rpt_bit && msg.source.is_unspecified() {
        MreKey::Wc(group)
    } else {
        MreKey::Sg(group, msg.source)
    };

    let received = AssertMetric {
        rpt_bit: msg.rpt_bit,
        metric_preference: msg.metric_preference,
        metric: msg.metric,
        addr: src,
    };

    let Some(mine) =
        assert::my_assert_metric(instance, interfaces, key, vif_index)
    else {
        return Ok(());
    };

    let current = assert_state(instance, key, vif_index);

    let event = if received.is_preferred_over(&mine) {
        assert::Event::RecvPreferred(received)
    } else if current == assert::State::Loser
        && assert_winner_addr(instance, key, vif_index) == Some(src)
    {
        // The recorded winner downgraded itself.
        assert::Event::RecvInferiorFromWinner
    } else if current == assert::State::Winner {
        assert::Event::RecvInferior
    } else if current == assert::State::NoInfo
        && could_assert(instance, interfaces, key, vif_index)
    {
        // An inferior assert on a vif this router forwards on makes it
        // respond as the winner.
        assert::Event::MyMetricWins
    } else {
        return Ok(());
    };

    // Entries are created on demand so the assert state has somewhere to
    // live.
    downstream_entry_create(instance, key);
    let changed =
        assert::run_fsm(instance, interfaces, key, vif_index, event);
    if changed {
        mrt::group_state_changed(instance, interfaces, group);
    }

    Ok(())
}

fn assert_state(
    instance: &InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
) -> assert::State {
    let av = match key {
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get(&group)
            .and_then(|mre| mre.asserts.get(&vif_index)),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get(&(group, source))
            .and_then(|mre| mre.asserts.get(&vif_index)),
        _ => None,
    };
    av.map(|av| av.state).unwrap_or_default()
}

fn assert_winner_addr(
    instance: &InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
) -> Option<IpAddr> {
    let av = match key {
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get(&group)
            .and_then(|mre| mre.asserts.get(&vif_index)),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get(&(group, source))
            .and_then(|mre| mre.asserts.get(&vif_index)),
        _ => None,
    }?;
    av.winner.as_ref().map(|winner| winner.addr)
}

// CouldAssert: this router would forward traffic of the entry onto the
// vif.
fn could_assert(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
) -> bool {
    match key {
        MreKey::Wc(group) => {
            upstream::immediate_olist_wc(&instance.state.mrt, interfaces, group)
                .test(vif_index)
        }
        MreKey::Sg(group, source) => upstream::inherited_olist_sg(
            instance.state,
            interfaces,
            group,
            source,
        )
        .test(vif_index),
        _ => false,
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use holo_utils::ibus::ibus_channels;
    use holo_utils::ip::AddressFamily;
    use holo_utils::southbound::{
        AddressFlags, AddressMsg, DataflowSignalMsg, FeaRequest, FeaUpdate,
        InterfaceFlags, InterfaceUpdateMsg, KernelSignalMsg,
        KernelSignalType, PacketRecvMsg,
    };
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::consts::KEEPALIVE_PERIOD;
    use crate::instance::InstanceChannelsTx;
    use crate::mrt::register;
    use crate::packet::register::RegisterStopMsg;
    use crate::packet::EncodedGroup;

    const SRC: &str = "10.0.0.5";
    const GRP: &str = "239.1.1.1";
    const RP: &str = "10.0.0.254";

    fn test_instance() -> (Instance, UnboundedReceiver<FeaRequest>) {
        let (ibus_tx, _ibus_rx) = ibus_channels();
        let (fea_tx, fea_rx) = mpsc::unbounded_channel();
        let (proto_tx, _proto_rx) = Instance::protocol_input_channels();

        let mut instance = Instance::new(
            "test".to_owned(),
            AddressFamily::Ipv4,
            InstanceChannelsTx::new(ibus_tx, fea_tx, proto_tx),
        );
        instance
            .config
            .add_static_rp(
                "239.0.0.0/8".parse().unwrap(),
                RP.parse().unwrap(),
                1,
                30,
            )
            .unwrap();
        instance.update();

        // Bring up one LAN interface; with no neighbors this router is
        // the DR.
        process_ibus_msg(
            &mut instance,
            IbusMsg::InterfaceUpd(InterfaceUpdateMsg {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                mtu: 1500,
                flags: InterfaceFlags::OPERATIVE
                    | InterfaceFlags::BROADCAST
                    | InterfaceFlags::MULTICAST,
            }),
        )
        .unwrap();
        crate::configuration::enable_vif(&mut instance, "eth0").unwrap();
        process_ibus_msg(
            &mut instance,
            IbusMsg::InterfaceAddressAdd(AddressMsg {
                ifname: "eth0".to_owned(),
                addr: "10.0.0.1/24".parse().unwrap(),
                flags: AddressFlags::empty(),
            }),
        )
        .unwrap();

        let (_, iface) =
            instance.arenas.interfaces.get_by_name("eth0").unwrap();
        assert!(iface.state.active);
        assert!(iface.is_dr());

        (instance, fea_rx)
    }

    fn drain(fea_rx: &mut UnboundedReceiver<FeaRequest>) -> Vec<FeaRequest> {
        let mut requests = vec![];
        while let Ok(request) = fea_rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    fn source_burst(instance: &mut Instance) {
        let (_, iface) =
            instance.arenas.interfaces.get_by_name("eth0").unwrap();
        let vif_index = iface.state.vif_index.unwrap();

        process_fea_update(
            instance,
            FeaUpdate::KernelSignal(KernelSignalMsg {
                signal_type: KernelSignalType::NoCache,
                vif_index,
                src: SRC.parse().unwrap(),
                dst: GRP.parse().unwrap(),
                payload: Bytes::new(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn dr_register_on_first_packet() {
        let (mut instance, mut fea_rx) = test_instance();
        drain(&mut fea_rx);

        source_burst(&mut instance);

        let source: std::net::IpAddr = SRC.parse().unwrap();
        let group: std::net::IpAddr = GRP.parse().unwrap();
        let register_vif_index = instance
            .state
            .as_ref()
            .unwrap()
            .register_vif_index
            .unwrap();

        // (S,G) state exists, directly connected, with the keepalive
        // timer running and the Register state joined.
        let state = instance.state.as_ref().unwrap();
        let mre = state.mrt.sg.get(&(group, source)).unwrap();
        assert!(mre.is_directly_connected);
        assert!(mre.keepalive_timer.is_some());
        assert_eq!(mre.register.state, register::State::Join);

        // The forwarding entry receives on the LAN vif and feeds the
        // Register tunnel.
        let mfc = state.mrt.mfc.get(&(group, source)).unwrap();
        let iif = mfc.iif_vif_index.unwrap();
        assert_ne!(iif, register_vif_index);
        assert!(mfc.olist.test(register_vif_index));
        assert!(!mfc.olist.test(iif));

        // The install and the idle monitor went to the forwarding
        // engine.
        let requests = drain(&mut fea_rx);
        assert!(requests
            .iter()
            .any(|request| matches!(request, FeaRequest::MfcAdd(_))));
        assert!(requests.iter().any(|request| matches!(
            request,
            FeaRequest::DataflowMonitorAdd(msg)
                if msg.is_leq_upcall
                    && msg.threshold_interval_sec == KEEPALIVE_PERIOD
        )));

        // A whole-packet upcall produces a Register unicast to the RP.
        let inner = {
            let mut hdr = vec![0u8; 20];
            hdr[0] = 0x45;
            hdr[12..16].copy_from_slice(&[10, 0, 0, 5]);
            hdr[16..20].copy_from_slice(&[239, 1, 1, 1]);
            Bytes::from(hdr)
        };
        process_fea_update(
            &mut instance,
            FeaUpdate::KernelSignal(KernelSignalMsg {
                signal_type: KernelSignalType::WholePacket,
                vif_index: iif,
                src: source,
                dst: group,
                payload: inner,
            }),
        )
        .unwrap();

        let requests = drain(&mut fea_rx);
        let register_pkt = requests
            .iter()
            .find_map(|request| match request {
                FeaRequest::PacketSend(msg) => Some(msg),
                _ => None,
            })
            .expect("no Register was sent");
        assert_eq!(register_pkt.dst, RP.parse::<std::net::IpAddr>().unwrap());
        let packet =
            Packet::decode(&register_pkt.payload, AddressFamily::Ipv4)
                .unwrap();
        let Packet::Register(register_msg) = packet else {
            panic!("expected a Register message");
        };
        assert!(!register_msg.border);
        assert!(!register_msg.null_register);
    }

    #[test]
    fn register_stop_suppresses_registers() {
        let (mut instance, mut fea_rx) = test_instance();
        source_burst(&mut instance);
        drain(&mut fea_rx);

        let source: std::net::IpAddr = SRC.parse().unwrap();
        let group: std::net::IpAddr = GRP.parse().unwrap();
        let (_, iface) =
            instance.arenas.interfaces.get_by_name("eth0").unwrap();
        let vif_index = iface.state.vif_index.unwrap();

        // The RP answers the Register with a Register-Stop.
        let stop = Packet::RegisterStop(RegisterStopMsg {
            group: EncodedGroup::new(group),
            source,
        });
        let payload = Bytes::from(stop.encode(AddressFamily::Ipv4).to_vec());
        process_fea_update(
            &mut instance,
            FeaUpdate::PacketRecv(PacketRecvMsg {
                vif_index,
                src: RP.parse().unwrap(),
                dst: "10.0.0.1".parse().unwrap(),
                ttl: 64,
                payload,
            }),
        )
        .unwrap();

        let state = instance.state.as_ref().unwrap();
        let mre = state.mrt.sg.get(&(group, source)).unwrap();
        assert_eq!(mre.register.state, register::State::Prune);
        assert!(mre.register.register_stop_timer.is_some());
    }

    #[test]
    fn idle_monitor_ages_out_flow() {
        let (mut instance, mut fea_rx) = test_instance();
        source_burst(&mut instance);
        drain(&mut fea_rx);

        let source: std::net::IpAddr = SRC.parse().unwrap();
        let group: std::net::IpAddr = GRP.parse().unwrap();

        // The idle monitor fires with zero packets measured over the
        // full keepalive period.
        process_fea_update(
            &mut instance,
            FeaUpdate::DataflowSignal(DataflowSignalMsg {
                source,
                group,
                threshold_interval_sec: KEEPALIVE_PERIOD,
                threshold_packets: 0,
                threshold_bytes: 0,
                measured_interval_sec: KEEPALIVE_PERIOD,
                measured_packets: 0,
                measured_bytes: 0,
                is_threshold_in_packets: true,
                is_threshold_in_bytes: false,
                is_geq_upcall: false,
                is_leq_upcall: true,
            }),
        )
        .unwrap();

        // The forwarding entry is gone, and with it every bit of (S,G)
        // state, exactly as if the keepalive timer had expired.
        let state = instance.state.as_ref().unwrap();
        assert!(!state.mrt.mfc.contains_key(&(group, source)));
        assert!(!state.mrt.sg.contains_key(&(group, source)));

        let requests = drain(&mut fea_rx);
        assert!(requests.iter().any(|request| matches!(
            request,
            FeaRequest::MfcDelete { .. }
        )));
    }
}
