//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod assert;
pub mod downstream;
pub mod register;
pub mod upstream;

use std::collections::BTreeMap;
use std::net::IpAddr;

use holo_utils::mifset::Mifset;
use holo_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::collections::Interfaces;
use crate::debug::Debug;
use crate::instance::{InstanceState, InstanceUpView};
use crate::interface;
use crate::mfc::PimMfc;
use crate::mrt::assert::AssertVif;
use crate::mrt::downstream::DownstreamVif;

// Key identifying a multicast routing entry of any variant.
//
// (S,G)-keyed variants order by (group, source) so that all state for a
// group is contiguous in the table.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MreKey {
    // (*,*,RP), keyed by RP address.
    Rp(IpAddr),
    // (*,G), keyed by group.
    Wc(IpAddr),
    // (S,G), keyed by (group, source).
    Sg(IpAddr, IpAddr),
    // (S,G,rpt), keyed by (group, source).
    SgRpt(IpAddr, IpAddr),
}

// The multicast routing table: one keyed sub-table per entry variant,
// plus the derived forwarding cache.
//
// The table is the sole owner of its entries; everything else refers to
// them through their keys.
#[derive(Debug, Default)]
pub struct Mrt {
    pub rp: BTreeMap<IpAddr, RpMre>,
    pub wc: BTreeMap<IpAddr, WcMre>,
    pub sg: BTreeMap<(IpAddr, IpAddr), SgMre>,
    pub sg_rpt: BTreeMap<(IpAddr, IpAddr), SgRptMre>,
    pub mfc: BTreeMap<(IpAddr, IpAddr), PimMfc>,
}

// (*,*,RP) multicast routing entry.
#[derive(Debug)]
pub struct RpMre {
    pub rp_addr: IpAddr,
    pub upstream: upstream::UpstreamSm,
    pub downstream: BTreeMap<u16, DownstreamVif>,
}

// (*,G) multicast routing entry.
#[derive(Debug)]
pub struct WcMre {
    pub group: IpAddr,
    // RP the entry is currently bound to. Recorded so that RP-set
    // changes can recompute state by diffing old against new.
    pub rp_addr: Option<IpAddr>,
    pub upstream: upstream::UpstreamSm,
    pub downstream: BTreeMap<u16, DownstreamVif>,
    pub asserts: BTreeMap<u16, AssertVif>,
    // Vifs with local (*,G) receivers.
    pub local_receiver_include: Mifset,
}

// (S,G) multicast routing entry.
#[derive(Debug)]
pub struct SgMre {
    pub source: IpAddr,
    pub group: IpAddr,
    pub rp_addr: Option<IpAddr>,
    pub upstream: upstream::UpstreamSm,
    pub downstream: BTreeMap<u16, DownstreamVif>,
    pub asserts: BTreeMap<u16, AssertVif>,
    // Vifs with local (S,G) receivers.
    pub local_receiver_include: Mifset,
    // Vifs with local receivers excluding this source.
    pub local_receiver_exclude: Mifset,
    // Set once (S,G) data is forwarded along the shortest-path tree.
    pub spt_bit: bool,
    pub is_directly_connected: bool,
    pub keepalive_timer: Option<TimeoutTask>,
    pub register: register::RegisterSm,
}

// (S,G,rpt) multicast routing entry.
#[derive(Debug)]
pub struct SgRptMre {
    pub source: IpAddr,
    pub group: IpAddr,
    pub upstream: upstream::RptUpstreamSm,
    pub downstream: BTreeMap<u16, DownstreamVif>,
}

// Result of an RPF lookup toward a source or RP.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RpfInfo {
    pub vif_index: u16,
    // Upstream router, absent when the destination is directly
    // connected.
    pub nbr_addr: Option<IpAddr>,
    pub metric_preference: u32,
    pub metric: u32,
}

// ===== impl MreKey =====

impl MreKey {
    // Returns the group address of the entry, if any.
    pub(crate) fn group(&self) -> Option<IpAddr> {
        match self {
            MreKey::Rp(_) => None,
            MreKey::Wc(group)
            | MreKey::Sg(group, _)
            | MreKey::SgRpt(group, _) => Some(*group),
        }
    }
}

// ===== impl Mrt =====

impl Mrt {
    // Returns the (*,G) entry for a group, creating it if missing.
    pub(crate) fn wc_entry_mut(
        &mut self,
        group: IpAddr,
        rp_addr: Option<IpAddr>,
    ) -> &mut WcMre {
        self.wc.entry(group).or_insert_with(|| {
            Debug::MreCreate(&MreKey::Wc(group)).log();
            WcMre {
                group,
                rp_addr,
                upstream: Default::default(),
                downstream: Default::default(),
                asserts: Default::default(),
                local_receiver_include: Default::default(),
            }
        })
    }

    // Returns the (S,G) entry for a flow, creating it if missing.
    pub(crate) fn sg_entry_mut(
        &mut self,
        group: IpAddr,
        source: IpAddr,
        rp_addr: Option<IpAddr>,
    ) -> &mut SgMre {
        self.sg.entry((group, source)).or_insert_with(|| {
            Debug::MreCreate(&MreKey::Sg(group, source)).log();
            SgMre {
                source,
                group,
                rp_addr,
                upstream: Default::default(),
                downstream: Default::default(),
                asserts: Default::default(),
                local_receiver_include: Default::default(),
                local_receiver_exclude: Default::default(),
                spt_bit: false,
                is_directly_connected: false,
                keepalive_timer: None,
                register: Default::default(),
            }
        })
    }

    // Returns the (S,G,rpt) entry for a flow, creating it if missing.
    pub(crate) fn sg_rpt_entry_mut(
        &mut self,
        group: IpAddr,
        source: IpAddr,
    ) -> &mut SgRptMre {
        self.sg_rpt.entry((group, source)).or_insert_with(|| {
            Debug::MreCreate(&MreKey::SgRpt(group, source)).log();
            SgRptMre {
                source,
                group,
                upstream: Default::default(),
                downstream: Default::default(),
            }
        })
    }

    // Returns the (*,*,RP) entry for an RP, creating it if missing.
    pub(crate) fn rp_entry_mut(&mut self, rp_addr: IpAddr) -> &mut RpMre {
        self.rp.entry(rp_addr).or_insert_with(|| {
            Debug::MreCreate(&MreKey::Rp(rp_addr)).log();
            RpMre {
                rp_addr,
                upstream: Default::default(),
                downstream: Default::default(),
            }
        })
    }

    // Returns an iterator over the sources of a group that have (S,G)
    // state.
    pub(crate) fn sg_sources(
        &self,
        group: IpAddr,
    ) -> impl Iterator<Item = IpAddr> + '_ {
        self.sg
            .range((group, unspecified(group))..)
            .take_while(move |((entry_group, _), _)| *entry_group == group)
            .map(|((_, source), _)| *source)
    }

    // Returns an iterator over the sources of a group that have
    // (S,G,rpt) state.
    pub(crate) fn sg_rpt_sources(
        &self,
        group: IpAddr,
    ) -> impl Iterator<Item = IpAddr> + '_ {
        self.sg_rpt
            .range((group, unspecified(group))..)
            .take_while(move |((entry_group, _), _)| *entry_group == group)
            .map(|((_, source), _)| *source)
    }

    // Removes entries whose state has become NoInfo everywhere and that
    // have no timer scheduled.
    pub(crate) fn entry_try_remove(&mut self, key: MreKey) {
        let removable = match key {
            MreKey::Rp(rp_addr) => self
                .rp
                .get(&rp_addr)
                .is_some_and(|mre| {
                    mre.upstream.is_idle() && mre.downstream.is_empty()
                }),
            MreKey::Wc(group) => self.wc.get(&group).is_some_and(|mre| {
                mre.upstream.is_idle()
                    && mre.downstream.is_empty()
                    && mre.asserts.is_empty()
                    && mre.local_receiver_include.none()
            }),
            MreKey::Sg(group, source) => {
                self.sg.get(&(group, source)).is_some_and(|mre| {
                    mre.upstream.is_idle()
                        && mre.downstream.is_empty()
                        && mre.asserts.is_empty()
                        && mre.local_receiver_include.none()
                        && mre.local_receiver_exclude.none()
                        && mre.keepalive_timer.is_none()
                        && mre.register.is_idle()
                        && !mre.spt_bit
                })
            }
            MreKey::SgRpt(group, source) => self
                .sg_rpt
                .get(&(group, source))
                .is_some_and(|mre| {
                    mre.upstream.is_idle() && mre.downstream.is_empty()
                }),
        };

        if removable {
            Debug::MreDelete(&key).log();
            match key {
                MreKey::Rp(rp_addr) => {
                    self.rp.remove(&rp_addr);
                }
                MreKey::Wc(group) => {
                    self.wc.remove(&group);
                }
                MreKey::Sg(group, source) => {
                    self.sg.remove(&(group, source));
                }
                MreKey::SgRpt(group, source) => {
                    self.sg_rpt.remove(&(group, source));
                }
            }
        }
    }
}

// ===== global functions =====

// RPF lookup toward an arbitrary destination.
//
// Directly connected destinations resolve to the connected vif with no
// upstream neighbor.
pub(crate) fn rpf_lookup(
    state: &InstanceState,
    interfaces: &Interfaces,
    addr: IpAddr,
) -> Option<RpfInfo> {
    if let Some(iface) = interface::find_directly_connected(interfaces, addr)
    {
        return Some(RpfInfo {
            vif_index: iface.state.vif_index?,
            nbr_addr: None,
            metric_preference: 0,
            metric: 0,
        });
    }

    let entry = state.mrib.lookup(&addr)?;
    Some(RpfInfo {
        vif_index: entry.nexthop_vif_index,
        nbr_addr: Some(entry.nexthop_addr),
        metric_preference: entry.metric_preference,
        metric: entry.metric,
    })
}

// RPF neighbor toward the RP of a group: RPF'(*,G).
//
// An Assert loss on the RPF interface overrides the MRIB next hop with
// the Assert winner.
pub(crate) fn rpf_nbr_wc(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
) -> Option<(u16, IpAddr)> {
    let rp_addr = state.rp_set.rp_lookup(&group)?.rp_addr;
    let rpf = rpf_lookup(state, interfaces, rp_addr)?;

    if let Some(mre) = state.mrt.wc.get(&group)
        && let Some(winner) = mre
            .asserts
            .get(&rpf.vif_index)
            .and_then(|av| av.lost_to())
    {
        return Some((rpf.vif_index, winner.addr));
    }

    rpf.nbr_addr.map(|nbr_addr| (rpf.vif_index, nbr_addr))
}

// RPF neighbor toward a source: RPF'(S,G).
pub(crate) fn rpf_nbr_sg(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Option<(u16, IpAddr)> {
    let rpf = rpf_lookup(state, interfaces, source)?;

    if let Some(mre) = state.mrt.sg.get(&(group, source))
        && let Some(winner) = mre
            .asserts
            .get(&rpf.vif_index)
            .and_then(|av| av.lost_to())
    {
        return Some((rpf.vif_index, winner.addr));
    }

    rpf.nbr_addr.map(|nbr_addr| (rpf.vif_index, nbr_addr))
}

// Returns the RPF interface toward a source, disregarding asserts.
pub(crate) fn rpf_interface(
    state: &InstanceState,
    interfaces: &Interfaces,
    addr: IpAddr,
) -> Option<u16> {
    rpf_lookup(state, interfaces, addr).map(|rpf| rpf.vif_index)
}

fn unspecified(addr: IpAddr) -> IpAddr {
    use holo_utils::ip::IpAddrExt;
    IpAddr::unspecified(addr.address_family())
}

// Starts or restarts KeepaliveTimer(S,G), creating the (S,G) entry if
// needed.
//
// A register state transition may happen as a result of restarting the
// timer, so CouldRegister and JoinDesired are re-evaluated here.
pub(crate) fn keepalive_start(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
    period: std::time::Duration,
) {
    let rp_addr = instance
        .state
        .rp_set
        .rp_lookup(&group)
        .map(|rp| rp.rp_addr);
    let timer = crate::tasks::keepalive_timer(source, group, period, instance);
    let mre = instance.state.mrt.sg_entry_mut(group, source, rp_addr);
    mre.keepalive_timer = Some(timer);

    register::update_could_register(instance, interfaces, group, source);
    upstream::update_sg(instance, interfaces, group, source);
}

// Expires KeepaliveTimer(S,G); all dependent state transitions as if
// the timer had fired naturally.
pub(crate) fn keepalive_expired(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    let Some(mre) = instance.state.mrt.sg.get_mut(&(group, source)) else {
        return;
    };
    mre.keepalive_timer = None;
    mre.spt_bit = false;

    sg_state_changed(instance, interfaces, group, source);
    register::update_could_register(instance, interfaces, group, source);
    instance
        .state
        .mrt
        .entry_try_remove(MreKey::Sg(group, source));
}

// Update_SPTbit(S,G,iif): the SPT bit is set once (S,G) data arrives on
// the shortest-path tree toward the source.
pub(crate) fn update_sptbit_sg(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
    iif_vif_index: u16,
) {
    let rpf_iface = rpf_interface(instance.state, interfaces, source);
    let Some(mre) = instance.state.mrt.sg.get_mut(&(group, source)) else {
        return;
    };
    if Some(iif_vif_index) == rpf_iface
        && (mre.upstream.state == upstream::State::Joined
            || mre.is_directly_connected)
    {
        mre.spt_bit = true;
    }
}

// Re-evaluates all derived state of one (S,G) flow.
pub(crate) fn sg_state_changed(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    upstream::update_sg(instance, interfaces, group, source);
    upstream::update_sg_rpt(instance, interfaces, group, source);
    register::update_could_register(instance, interfaces, group, source);
    crate::mfc::recompute(instance, interfaces, group, source);
}

// Re-evaluates all derived state of a group: its (*,G) entry, every
// source-specific entry and every forwarding cache entry.
pub(crate) fn group_state_changed(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
) {
    upstream::update_wc(instance, interfaces, group);

    let mut sources: Vec<_> =
        instance.state.mrt.sg_sources(group).collect();
    sources.extend(instance.state.mrt.sg_rpt_sources(group));
    sources.extend(
        instance
            .state
            .mrt
            .mfc
            .range((group, unspecified(group))..)
            .take_while(|((entry_group, _), _)| *entry_group == group)
            .map(|((_, source), _)| *source),
    );
    sources.sort();
    sources.dedup();

    for source in sources {
        sg_state_changed(instance, interfaces, group, source);
    }
}

// Re-evaluates every entry in the table. Used after MRIB commits and
// RP-set changes, both of which may move RPF interfaces and upstream
// neighbors under arbitrary subsets of the table.
pub(crate) fn full_recompute(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let rp_addrs: Vec<_> = instance.state.mrt.rp.keys().copied().collect();
    for rp_addr in rp_addrs {
        upstream::update_rp(instance, interfaces, rp_addr);
    }

    let mut groups: Vec<_> = instance.state.mrt.wc.keys().copied().collect();
    groups.extend(instance.state.mrt.sg.keys().map(|(group, _)| *group));
    groups
        .extend(instance.state.mrt.sg_rpt.keys().map(|(group, _)| *group));
    groups.extend(instance.state.mrt.mfc.keys().map(|(group, _)| *group));
    groups.sort();
    groups.dedup();

    for group in groups {
        group_state_changed(instance, interfaces, group);
    }
}

// Re-binds every RP-referencing entry after an RP-set change.
pub(crate) fn rp_set_changed(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    // Diff the recorded RP of each entry against the new mapping.
    let mut changed = false;
    let groups: Vec<_> = instance.state.mrt.wc.keys().copied().collect();
    for group in groups {
        let new_rp = instance
            .state
            .rp_set
            .rp_lookup(&group)
            .map(|rp| rp.rp_addr);
        let mre = instance.state.mrt.wc.get_mut(&group).unwrap();
        if mre.rp_addr != new_rp {
            mre.rp_addr = new_rp;
            changed = true;
        }
    }
    let keys: Vec<_> = instance.state.mrt.sg.keys().copied().collect();
    for (group, source) in keys {
        let new_rp = instance
            .state
            .rp_set
            .rp_lookup(&group)
            .map(|rp| rp.rp_addr);
        let mre = instance.state.mrt.sg.get_mut(&(group, source)).unwrap();
        if mre.rp_addr != new_rp {
            mre.rp_addr = new_rp;
            changed = true;
        }
        let mfc = instance.state.mrt.mfc.get_mut(&(group, source));
        if let Some(mfc) = mfc
            && let Some(new_rp) = new_rp
            && mfc.rp_addr != Some(new_rp)
        {
            mfc.rp_addr = Some(new_rp);
            changed = true;
        }
    }

    if changed {
        full_recompute(instance, interfaces);
    }
}

// Clears all per-vif state referring to a vif that went down.
pub(crate) fn vif_down(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
) {
    let mrt = &mut instance.state.mrt;
    for mre in mrt.rp.values_mut() {
        mre.downstream.remove(&vif_index);
    }
    for mre in mrt.wc.values_mut() {
        mre.downstream.remove(&vif_index);
        mre.asserts.remove(&vif_index);
        mre.local_receiver_include.reset(vif_index);
    }
    for mre in mrt.sg.values_mut() {
        mre.downstream.remove(&vif_index);
        mre.asserts.remove(&vif_index);
        mre.local_receiver_include.reset(vif_index);
        mre.local_receiver_exclude.reset(vif_index);
    }
    for mre in mrt.sg_rpt.values_mut() {
        mre.downstream.remove(&vif_index);
    }

    full_recompute(instance, interfaces);
}

// Handles a neighbor that restarted (GenID change) or expired.
//
// Downstream state on a LAN is per-vif rather than per-neighbor, so the
// expiry timers age out whatever the remaining neighbors no longer
// refresh. The upstream side reacts immediately: entries joined toward
// the affected neighbor re-send their Join so the restarted neighbor
// relearns it.
pub(crate) fn neighbor_down(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    nbr_addr: IpAddr,
) {
    let nbr = Some((vif_index, nbr_addr));

    let rp_addrs: Vec<_> = instance
        .state
        .mrt
        .rp
        .iter()
        .filter(|(_, mre)| mre.upstream.rpf_nbr == nbr)
        .map(|(rp_addr, _)| *rp_addr)
        .collect();
    for rp_addr in rp_addrs {
        upstream::run_fsm(
            instance,
            interfaces,
            MreKey::Rp(rp_addr),
            upstream::Event::RpfNbrChanged,
        );
    }

    let groups: Vec<_> = instance
        .state
        .mrt
        .wc
        .iter()
        .filter(|(_, mre)| mre.upstream.rpf_nbr == nbr)
        .map(|(group, _)| *group)
        .collect();
    for group in groups {
        upstream::run_fsm(
            instance,
            interfaces,
            MreKey::Wc(group),
            upstream::Event::RpfNbrChanged,
        );
    }

    let keys: Vec<_> = instance
        .state
        .mrt
        .sg
        .iter()
        .filter(|(_, mre)| mre.upstream.rpf_nbr == nbr)
        .map(|(key, _)| *key)
        .collect();
    for (group, source) in keys {
        upstream::run_fsm(
            instance,
            interfaces,
            MreKey::Sg(group, source),
            upstream::Event::RpfNbrChanged,
        );
    }
}
