//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use bitflags::bitflags;
use holo_utils::ip::IpAddrExt;
use holo_utils::mifset::Mifset;
use holo_utils::southbound::DataflowSignalMsg;
use serde::{Deserialize, Serialize};

use crate::collections::Interfaces;
use crate::consts::KEEPALIVE_PERIOD;
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::mrt::assert;
use crate::mrt::{self, MreKey, register, upstream};
use crate::southbound;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct MfcFlags: u8 {
        // Entry is pending deletion.
        const TASK_DELETE_PENDING = 0x01;
        // Entry is ready to be deleted.
        const TASK_DELETE_DONE = 0x02;
        const HAS_IDLE_DATAFLOW_MONITOR = 0x04;
        const HAS_SPT_SWITCH_DATAFLOW_MONITOR = 0x08;
        const HAS_FORCED_DELETION = 0x10;
    }
}

// Multicast Forwarding Cache entry: the (iif, olist) pair programmed
// into the data plane for one (S,G) flow.
#[derive(Debug)]
pub struct PimMfc {
    pub rp_addr: Option<IpAddr>,
    pub iif_vif_index: Option<u16>,
    pub olist: Mifset,
    // Outgoing vifs for which the WRONGVIF kernel signal is disabled.
    pub olist_disable_wrongvif: Mifset,
    pub flags: MfcFlags,
}

// ===== global functions =====

// Handles a NOCACHE or WRONGVIF kernel upcall: data for (S,G) reached
// the control plane and the forwarding cache must be (re)computed.
pub(crate) fn receive_data(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    iif_vif_index: u16,
    source: IpAddr,
    group: IpAddr,
) {
    let Ok((_, iface)) = interfaces.get_by_vif_index(iif_vif_index) else {
        return;
    };
    if !iface.state.active {
        return;
    }

    let mut keepalive_restarted = false;

    // A packet from a directly connected source makes this router a
    // candidate DR for it.
    let is_directly_connected = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .map(|mre| mre.is_directly_connected)
        .unwrap_or(false)
        || crate::interface::find_directly_connected(interfaces, source)
            .is_some();

    if is_directly_connected {
        let rp_addr = instance
            .state
            .rp_set
            .rp_lookup(&group)
            .map(|rp| rp.rp_addr);
        let mre = instance.state.mrt.sg_entry_mut(group, source, rp_addr);
        mre.is_directly_connected = true;

        mrt::keepalive_start(
            instance,
            interfaces,
            group,
            source,
            Duration::from_secs(KEEPALIVE_PERIOD.into()),
        );
        keepalive_restarted = true;
    }

    let sg_exists = instance.state.mrt.sg.contains_key(&(group, source));
    let wc_exists = instance.state.mrt.wc.contains_key(&group);
    let sg_rpt_exists =
        instance.state.mrt.sg_rpt.contains_key(&(group, source));

    if !sg_exists && !wc_exists && !sg_rpt_exists {
        // No routing entry matches: install a negative-cache entry so
        // the kernel stops raising upcalls for the flow, and age it out.
        install(instance, group, source, iif_vif_index, Mifset::new());
        idle_monitor_install(instance, group, source, KEEPALIVE_PERIOD);
        return;
    }

    // Update the SPT bit now that data arrived on this vif.
    mrt::update_sptbit_sg(instance, interfaces, group, source, iif_vif_index);
    let spt_bit = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.spt_bit);

    let sg_rpf_iface = mrt::rpf_interface(instance.state, interfaces, source);
    let rp_rpf_iface = instance
        .state
        .rp_set
        .rp_lookup(&group)
        .map(|rp| rp.rp_addr)
        .and_then(|rp_addr| {
            mrt::rpf_interface(instance.state, interfaces, rp_addr)
        });

    let sg_joined = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| {
            mre.upstream.state == upstream::State::Joined
                || mre.is_directly_connected
        });

    let mut olist;
    if sg_exists && Some(iif_vif_index) == sg_rpf_iface && sg_joined {
        // Data arrived on the shortest-path tree.
        olist =
            upstream::inherited_olist_sg(instance.state, interfaces, group, source);
        if olist.any() && !keepalive_restarted {
            mrt::keepalive_start(
                instance,
                interfaces,
                group,
                source,
                Duration::from_secs(KEEPALIVE_PERIOD.into()),
            );
            keepalive_restarted = true;
        }
    } else if Some(iif_vif_index) == rp_rpf_iface && !spt_bit {
        // Data arrived on the shared tree.
        olist = upstream::inherited_olist_sg_rpt(
            instance.state,
            interfaces,
            group,
            source,
        );
        if check_switch_to_spt(instance, interfaces, group, source, 0) {
            keepalive_restarted = true;
        }
    } else {
        // RPF check failed: data arrived on a vif this router would
        // itself forward on, which calls for an Assert.
        if spt_bit
            && upstream::inherited_olist_sg(
                instance.state,
                interfaces,
                group,
                source,
            )
            .test(iif_vif_index)
        {
            data_arrived_assert(
                instance,
                interfaces,
                MreKey::Sg(group, source),
                iif_vif_index,
            );
        } else if !spt_bit
            && upstream::inherited_olist_sg_rpt(
                instance.state,
                interfaces,
                group,
                source,
            )
            .test(iif_vif_index)
        {
            let is_new_entry = !wc_exists;
            if is_new_entry {
                let rp_addr = instance
                    .state
                    .rp_set
                    .rp_lookup(&group)
                    .map(|rp| rp.rp_addr);
                instance.state.mrt.wc_entry_mut(group, rp_addr);
            }
            data_arrived_assert(
                instance,
                interfaces,
                MreKey::Wc(group),
                iif_vif_index,
            );
            if is_new_entry {
                instance.state.mrt.entry_try_remove(MreKey::Wc(group));
            }
        }
        return;
    }

    olist.reset(iif_vif_index);

    // At the DR the Register pseudo-vif joins the olist, so that the
    // kernel raises WHOLEPKT upcalls for the packets to encapsulate.
    if instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.register.sends_data_registers())
        && let Some(register_vif_index) = instance.state.register_vif_index
    {
        olist.set(register_vif_index);
    }

    install(instance, group, source, iif_vif_index, olist);

    if keepalive_restarted
        || !instance
            .state
            .mrt
            .mfc
            .get(&(group, source))
            .is_some_and(|mfc| {
                mfc.flags.contains(MfcFlags::HAS_IDLE_DATAFLOW_MONITOR)
            })
    {
        // The entry at the RP that terminates the Register tunnel uses
        // the longer RP keepalive period.
        let mut period = KEEPALIVE_PERIOD;
        if keepalive_restarted
            && Some(iif_vif_index) == instance.state.register_vif_index
            && i_am_rp(instance, interfaces, group)
        {
            period = register::rp_keepalive_period();
        }
        idle_monitor_install(instance, group, source, period);
    }

    // Arm the SPT-switch monitor on last-hop routers still on the
    // shared tree.
    if wc_exists
        && !sg_exists
        && instance.config.spt_threshold.enabled
        && !instance
            .state
            .mrt
            .mfc
            .get(&(group, source))
            .is_some_and(|mfc| {
                mfc.flags
                    .contains(MfcFlags::HAS_SPT_SWITCH_DATAFLOW_MONITOR)
            })
    {
        spt_monitor_install(instance, group, source);
    }
}

// Handles a WHOLEPKT upcall: encapsulate the data packet toward the RP.
pub(crate) fn wholepkt_signal(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    source: IpAddr,
    group: IpAddr,
    payload: bytes::Bytes,
) {
    // To receive a WHOLEPKT signal the (S,G) MFC must have been
    // installed first, which implies matching (S,G) state.
    if !instance.state.mrt.sg.contains_key(&(group, source)) {
        return;
    }

    register::send_data_register(instance, interfaces, source, group, payload);
}

// Handles a fired dataflow monitor.
pub(crate) fn dataflow_signal(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    msg: DataflowSignalMsg,
) {
    let source = msg.source;
    let group = msg.group;

    if !instance.state.mrt.mfc.contains_key(&(group, source)) {
        southbound::tx::dataflow_monitor_delete_all(instance, source, group);
        return;
    }

    if msg.is_geq_upcall {
        // SPT-switch threshold exceeded.
        let wanted = monitoring_switch_to_spt_desired(
            instance, interfaces, group, source,
        ) && instance.config.spt_threshold.enabled
            && msg.is_threshold_in_bytes
            && msg.threshold_interval_sec
                == instance.config.spt_threshold.interval_sec
            && msg.threshold_bytes == instance.config.spt_threshold.bytes;
        if !wanted
            || check_switch_to_spt(
                instance,
                interfaces,
                group,
                source,
                msg.measured_bytes,
            )
        {
            southbound::tx::dataflow_monitor_delete(instance, &msg);
            if let Some(mfc) =
                instance.state.mrt.mfc.get_mut(&(group, source))
            {
                mfc.flags
                    .remove(MfcFlags::HAS_SPT_SWITCH_DATAFLOW_MONITOR);
            }
        }
    } else {
        // Idle flow.
        let mut expected = KEEPALIVE_PERIOD;
        let iif_vif_index = instance
            .state
            .mrt
            .mfc
            .get(&(group, source))
            .and_then(|mfc| mfc.iif_vif_index);
        if iif_vif_index == instance.state.register_vif_index
            && i_am_rp(instance, interfaces, group)
        {
            expected = register::rp_keepalive_period();
        }

        if msg.measured_packets == 0 {
            if msg.threshold_interval_sec >= expected {
                // Idle source: remove the forwarding entry and expire
                // the (S,G) keepalive.
                delete(instance, group, source);
                mrt::keepalive_expired(instance, interfaces, group, source);
                return;
            }

            // The monitor fired prematurely; reinstall it with the
            // correct interval.
            southbound::tx::dataflow_monitor_delete(instance, &msg);
            idle_monitor_install(instance, group, source, expected);
        }
    }
}

// Recomputes (iif, olist) of one flow after a routing state change.
//
// The entry is removed when no routing state matches it anymore or its
// incoming interface became invalid.
pub(crate) fn recompute(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    if !instance.state.mrt.mfc.contains_key(&(group, source)) {
        return;
    }

    let sg_exists = instance.state.mrt.sg.contains_key(&(group, source));
    let wc_exists = instance.state.mrt.wc.contains_key(&group);
    let spt_bit = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.spt_bit);

    // Keep the Register vif as the incoming interface while this router
    // is the RP terminating the tunnel for the flow.
    let current_iif = instance
        .state
        .mrt
        .mfc
        .get(&(group, source))
        .and_then(|mfc| mfc.iif_vif_index);
    let register_iif = current_iif.is_some()
        && current_iif == instance.state.register_vif_index
        && !spt_bit;

    let iif = if register_iif {
        current_iif
    } else if sg_exists && spt_bit {
        mrt::rpf_interface(instance.state, interfaces, source)
    } else if wc_exists || sg_exists {
        instance
            .state
            .rp_set
            .rp_lookup(&group)
            .map(|rp| rp.rp_addr)
            .and_then(|rp_addr| {
                mrt::rpf_interface(instance.state, interfaces, rp_addr)
            })
    } else {
        None
    };

    let Some(iif) = iif else {
        delete(instance, group, source);
        return;
    };

    let mut olist =
        upstream::inherited_olist_sg(instance.state, interfaces, group, source);
    olist.reset(iif);

    // See receive_data: the Register pseudo-vif carries the encapsulation
    // path at the DR.
    if instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.register.sends_data_registers())
        && let Some(register_vif_index) = instance.state.register_vif_index
    {
        olist.set(register_vif_index);
    }

    let changed = {
        let mfc = &instance.state.mrt.mfc[&(group, source)];
        mfc.iif_vif_index != Some(iif) || mfc.olist != olist
    };
    if changed {
        install(instance, group, source, iif, olist);
    }
}

// Installs or updates the forwarding entry in the data plane.
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    group: IpAddr,
    source: IpAddr,
    iif_vif_index: u16,
    mut olist: Mifset,
) {
    // An entry must never forward back onto its incoming interface.
    olist.reset(iif_vif_index);

    let rp_addr = instance
        .state
        .rp_set
        .rp_lookup(&group)
        .map(|rp| rp.rp_addr);
    let distance = instance
        .state
        .mrib
        .lookup(&source)
        .map(|entry| entry.metric_preference)
        .unwrap_or(0);

    // The WRONGVIF signal is needed only on vifs where this router may
    // have to assert, i.e. the downstream vifs of the entry.
    let olist_disable_wrongvif = !olist;

    let mfc = instance
        .state
        .mrt
        .mfc
        .entry((group, source))
        .or_insert_with(|| PimMfc {
            rp_addr,
            iif_vif_index: None,
            olist: Mifset::new(),
            olist_disable_wrongvif: Mifset::new(),
            flags: MfcFlags::default(),
        });
    mfc.rp_addr = rp_addr;
    mfc.iif_vif_index = Some(iif_vif_index);
    mfc.olist = olist;
    mfc.olist_disable_wrongvif = olist_disable_wrongvif;

    Debug::MfcInstall(&source, &group, iif_vif_index, &olist).log();
    southbound::tx::mfc_add(
        instance,
        source,
        group,
        iif_vif_index,
        olist,
        olist_disable_wrongvif,
        rp_addr.unwrap_or(IpAddr::unspecified(instance.af)),
        distance,
    );
}

// Removes the forwarding entry from the data plane and the table.
pub(crate) fn delete(
    instance: &mut InstanceUpView<'_>,
    group: IpAddr,
    source: IpAddr,
) {
    let Some(mfc) = instance.state.mrt.mfc.remove(&(group, source)) else {
        return;
    };

    Debug::MfcDelete(&source, &group).log();
    if mfc
        .flags
        .intersects(
            MfcFlags::HAS_IDLE_DATAFLOW_MONITOR
                | MfcFlags::HAS_SPT_SWITCH_DATAFLOW_MONITOR,
        )
    {
        southbound::tx::dataflow_monitor_delete_all(instance, source, group);
    }
    southbound::tx::mfc_delete(instance, source, group);
}

// Removes every forwarding entry, used at instance shutdown.
pub(crate) fn delete_all(instance: &mut InstanceUpView<'_>) {
    let keys: Vec<_> = instance.state.mrt.mfc.keys().copied().collect();
    for (group, source) in keys {
        delete(instance, group, source);
    }
}

// Installs the idle (`<=`) dataflow monitor that ages the entry out.
pub(crate) fn idle_monitor_install(
    instance: &mut InstanceUpView<'_>,
    group: IpAddr,
    source: IpAddr,
    interval_sec: u32,
) {
    let Some(mfc) = instance.state.mrt.mfc.get_mut(&(group, source)) else {
        return;
    };
    mfc.flags.insert(MfcFlags::HAS_IDLE_DATAFLOW_MONITOR);

    Debug::DataflowMonitorInstall(&source, &group, interval_sec).log();
    southbound::tx::dataflow_monitor_add(
        instance,
        source,
        group,
        interval_sec,
        0,
        0,
        true,
        false,
        false,
        true,
    );
}

// Installs the SPT-switch (`>=`) dataflow monitor.
pub(crate) fn spt_monitor_install(
    instance: &mut InstanceUpView<'_>,
    group: IpAddr,
    source: IpAddr,
) {
    let interval_sec = instance.config.spt_threshold.interval_sec;
    let bytes = instance.config.spt_threshold.bytes;
    let Some(mfc) = instance.state.mrt.mfc.get_mut(&(group, source)) else {
        return;
    };
    mfc.flags.insert(MfcFlags::HAS_SPT_SWITCH_DATAFLOW_MONITOR);

    Debug::DataflowMonitorInstall(&source, &group, interval_sec).log();
    southbound::tx::dataflow_monitor_add(
        instance,
        source,
        group,
        interval_sec,
        0,
        bytes,
        false,
        true,
        true,
        false,
    );
}

// ===== helper functions =====

// Whether the (S,G) flow still needs an SPT-switch monitor.
fn monitoring_switch_to_spt_desired(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> bool {
    let keepalive_running = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.keepalive_timer.is_some());
    upstream::switch_to_spt_desired(instance, interfaces, group, source)
        && !keepalive_running
}

// Initiates the switch to the shortest-path tree when desired.
//
// Returns whether the switch was initiated (which restarts the
// keepalive timer).
fn check_switch_to_spt(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
    measured_bytes: u32,
) -> bool {
    if !upstream::switch_to_spt_desired(instance, interfaces, group, source) {
        return false;
    }
    if measured_bytes < instance.config.spt_threshold.bytes {
        return false;
    }

    Debug::SptSwitch(&source, &group).log();

    // Create (S,G) state and send a Join toward the source.
    mrt::keepalive_start(
        instance,
        interfaces,
        group,
        source,
        Duration::from_secs(KEEPALIVE_PERIOD.into()),
    );
    mrt::sg_state_changed(instance, interfaces, group, source);

    true
}

// Whether this router is the RP for the group.
pub(crate) fn i_am_rp(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
) -> bool {
    let Some(rp_addr) =
        instance.state.rp_set.rp_lookup(&group).map(|rp| rp.rp_addr)
    else {
        return false;
    };
    interfaces.iter().any(|iface| {
        iface
            .system
            .addr_list
            .iter()
            .any(|addr| addr.ip() == rp_addr)
    })
}

// Feeds a wrong-iif data arrival into the assert machinery.
fn data_arrived_assert(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
) {
    let changed = assert::run_fsm(
        instance,
        interfaces,
        key,
        vif_index,
        assert::Event::MyMetricWins,
    );
    if changed && let Some(group) = key.group() {
        mrt::group_state_changed(instance, interfaces, group);
    }
}
