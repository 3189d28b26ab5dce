//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::ibus::{
    IbusMsg, MembershipFilter, MembershipMsg, RouteMsg,
};
use holo_utils::ip::IpAddrExt;
use holo_utils::southbound::{AddressMsg, InterfaceUpdateMsg};

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Instance;
use crate::mrib::MribEntry;
use crate::{interface, mrt};

// Processes one message from the inter-component bus.
pub(crate) fn process_msg(
    instance: &mut Instance,
    msg: IbusMsg,
) -> Result<(), Error> {
    match msg {
        // Interface update notification.
        IbusMsg::InterfaceUpd(msg) => {
            process_iface_update(instance, msg);
        }
        // Interface delete notification.
        IbusMsg::InterfaceDel(ifname) => {
            process_iface_delete(instance, &ifname);
        }
        // Interface address notifications.
        IbusMsg::InterfaceAddressAdd(msg) => {
            process_addr_add(instance, msg);
        }
        IbusMsg::InterfaceAddressDel(msg) => {
            process_addr_del(instance, msg);
        }
        // MRIB transaction feed from the RIB.
        IbusMsg::RouteTransactionStart { tid } => {
            if let Some((instance, _)) = instance.as_up() {
                instance.state.mrib.begin_tx(tid)?;
            }
        }
        IbusMsg::RouteTransactionAdd { tid, route } => {
            if let Some((instance, _)) = instance.as_up() {
                instance.state.mrib.insert(tid, mrib_entry(route))?;
            }
        }
        IbusMsg::RouteTransactionDel { tid, prefix } => {
            if let Some((instance, _)) = instance.as_up() {
                instance.state.mrib.remove(tid, prefix)?;
            }
        }
        IbusMsg::RouteTransactionDelAll { tid } => {
            if let Some((instance, _)) = instance.as_up() {
                instance.state.mrib.remove_all(tid)?;
            }
        }
        IbusMsg::RouteTransactionCommit { tid } => {
            if let Some((mut instance, arenas)) = instance.as_up() {
                // Upstream-neighbor and RPF-interface computations depend
                // on the MRIB contents, so a commit cascades into the
                // routing entry state machines.
                let changed = instance.state.mrib.commit(tid)?;
                Debug::MribCommit(tid).log();
                if changed {
                    mrt::full_recompute(&mut instance, &arenas.interfaces);
                }
            }
        }
        IbusMsg::RouteTransactionAbort { tid } => {
            if let Some((instance, _)) = instance.as_up() {
                instance.state.mrib.abort(tid)?;
            }
        }
        // Local membership notifications from MLD/IGMP.
        IbusMsg::MembershipAdd(msg) => {
            process_membership(instance, msg, true);
        }
        IbusMsg::MembershipDel(msg) => {
            process_membership(instance, msg, false);
        }
        // Ignore other events.
        _ => (),
    }

    Ok(())
}

// ===== helper functions =====

fn process_iface_update(instance: &mut Instance, msg: InterfaceUpdateMsg) {
    let iface_idx = match instance.arenas.interfaces.get_by_name(&msg.ifname)
    {
        Some((iface_idx, _)) => iface_idx,
        None => instance.arenas.interfaces.insert(&msg.ifname).0,
    };

    instance
        .arenas
        .interfaces
        .update_ifindex(iface_idx, Some(msg.ifindex));
    let iface = &mut instance.arenas.interfaces[iface_idx];
    iface.system.mtu = Some(msg.mtu);
    iface.system.flags = msg.flags;

    let was_active = iface.state.active;
    let vif_index = iface.state.vif_index;
    let Some((mut instance, arenas)) = instance.as_up() else {
        return;
    };
    interface::update(&mut instance, &mut arenas.interfaces, iface_idx);

    // A vif that went down takes its per-vif state with it.
    let iface = &arenas.interfaces[iface_idx];
    if was_active
        && !iface.state.active
        && let Some(vif_index) = vif_index
    {
        mrt::vif_down(&mut instance, &arenas.interfaces, vif_index);
    }
}

fn process_iface_delete(instance: &mut Instance, ifname: &str) {
    let Some((iface_idx, iface)) =
        instance.arenas.interfaces.get_mut_by_name(ifname)
    else {
        return;
    };
    let vif_index = iface.state.vif_index;

    if let Some((mut instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.stop(
            &mut instance,
            crate::debug::InterfaceInactiveReason::OperationalDown,
        );
        if let Some(vif_index) = vif_index {
            mrt::vif_down(&mut instance, &arenas.interfaces, vif_index);
        }
    }

    instance.arenas.interfaces.delete(iface_idx);
}

fn process_addr_add(instance: &mut Instance, msg: AddressMsg) {
    let Some((iface_idx, iface)) =
        instance.arenas.interfaces.get_mut_by_name(&msg.ifname)
    else {
        return;
    };
    if !iface.system.addr_list.contains(&msg.addr) {
        iface.system.addr_list.push(msg.addr);
    }
    iface_reconcile(instance, iface_idx);
}

fn process_addr_del(instance: &mut Instance, msg: AddressMsg) {
    let Some((iface_idx, iface)) =
        instance.arenas.interfaces.get_mut_by_name(&msg.ifname)
    else {
        return;
    };
    iface.system.addr_list.retain(|addr| *addr != msg.addr);
    iface_reconcile(instance, iface_idx);
}

// Addresses feed the primary address, the DR election and the RPF
// computations.
fn iface_reconcile(
    instance: &mut Instance,
    iface_idx: crate::collections::InterfaceIndex,
) {
    let Some((mut instance, arenas)) = instance.as_up() else {
        return;
    };
    interface::update(&mut instance, &mut arenas.interfaces, iface_idx);

    let iface = &mut arenas.interfaces[iface_idx];
    if iface.state.active && iface.dr_update() {
        mrt::full_recompute(&mut instance, &arenas.interfaces);
    }
}

fn process_membership(
    instance: &mut Instance,
    msg: MembershipMsg,
    join: bool,
) {
    let af = instance.af;
    let Some((mut instance, arenas)) = instance.as_up() else {
        return;
    };
    let interfaces = &arenas.interfaces;
    let Some((_, iface)) = interfaces.get_by_name(&msg.ifname) else {
        return;
    };
    let Some(vif_index) = iface.state.vif_index else {
        return;
    };
    if !msg.group.is_multicast() || msg.group.is_linklocal_multicast() {
        return;
    }

    let group = msg.group;
    let wildcard = msg.source == std::net::IpAddr::unspecified(af);
    let rp_addr = instance
        .state
        .rp_set
        .rp_lookup(&group)
        .map(|rp| rp.rp_addr);

    if wildcard {
        // (*,G) membership.
        let mre = instance.state.mrt.wc_entry_mut(group, rp_addr);
        if join {
            mre.local_receiver_include.set(vif_index);
        } else {
            mre.local_receiver_include.reset(vif_index);
        }
    } else {
        // Source-specific membership.
        let mre = instance.state.mrt.sg_entry_mut(group, msg.source, rp_addr);
        match msg.filter_mode {
            MembershipFilter::Include => {
                if join {
                    mre.local_receiver_include.set(vif_index);
                } else {
                    mre.local_receiver_include.reset(vif_index);
                }
            }
            MembershipFilter::Exclude => {
                if join {
                    mre.local_receiver_exclude.set(vif_index);
                } else {
                    mre.local_receiver_exclude.reset(vif_index);
                }
            }
        }
    }

    mrt::group_state_changed(&mut instance, interfaces, group);

    // Membership withdrawal may leave an entry with no state at all.
    if !join {
        if wildcard {
            instance
                .state
                .mrt
                .entry_try_remove(mrt::MreKey::Wc(group));
        } else {
            instance
                .state
                .mrt
                .entry_try_remove(mrt::MreKey::Sg(group, msg.source));
        }
    }
}

fn mrib_entry(route: RouteMsg) -> MribEntry {
    MribEntry {
        prefix: route.prefix,
        nexthop_addr: route.nexthop_addr,
        nexthop_vif_index: route.nexthop_vif_index,
        metric_preference: route.metric_preference,
        metric: route.metric,
    }
}
