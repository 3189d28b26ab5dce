//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use holo_utils::mifset::Mifset;
use holo_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::collections::Interfaces;
use crate::debug::Debug;
use crate::instance::{InstanceState, InstanceUpView};
use crate::mrt::downstream::DownstreamVif;
use crate::mrt::{self, MreKey, Mrt};
use crate::{output, tasks};

// Upstream state of (*,*,RP), (*,G) and (S,G) entries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    NotJoined,
    Joined,
}

// Upstream state of (S,G,rpt) entries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RptState {
    #[default]
    RptNotJoined,
    Pruned,
    NotPruned,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    JoinDesiredTrue,
    JoinDesiredFalse,
    JoinTimerExpiry,
    // A Join addressed to RPF' was seen on the upstream interface.
    SeeJoinToRpfNbr,
    // A Prune addressed to RPF' was seen on the upstream interface.
    SeePruneToRpfNbr,
    OverrideTimerExpiry,
    RpfNbrChanged,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RptEvent {
    PruneDesiredTrue,
    PruneDesiredFalse,
    RptJoinDesiredFalse,
    SeePruneSgRpt,
    OverrideTimerExpiry,
}

// Actions produced by an upstream transition, dispatched after the
// transition commits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    SendJoin,
    SendPrune,
    StartJoinTimer,
    SuppressJoinTimer,
    CancelJoinTimer,
    StartOverrideTimer,
    CancelOverrideTimer,
}

// Upstream state machine of (*,*,RP), (*,G) and (S,G) entries.
#[derive(Debug, Default)]
pub struct UpstreamSm {
    pub state: State,
    pub join_timer: Option<TimeoutTask>,
    pub override_timer: Option<TimeoutTask>,
    // RPF' neighbor the last Join was sent to.
    pub rpf_nbr: Option<(u16, IpAddr)>,
}

// Upstream state machine of (S,G,rpt) entries.
#[derive(Debug, Default)]
pub struct RptUpstreamSm {
    pub state: RptState,
    pub override_timer: Option<TimeoutTask>,
}

// ===== impl UpstreamSm =====

impl UpstreamSm {
    pub(crate) fn is_idle(&self) -> bool {
        self.state == State::NotJoined
            && self.join_timer.is_none()
            && self.override_timer.is_none()
    }
}

// ===== impl RptUpstreamSm =====

impl RptUpstreamSm {
    pub(crate) fn is_idle(&self) -> bool {
        self.state == RptState::RptNotJoined && self.override_timer.is_none()
    }
}

// ===== global functions =====

// Upstream state machine transition function for the Joined/NotJoined
// variants.
pub(crate) fn transition(
    state: State,
    event: Event,
) -> Option<(State, SmallVec<[Action; 3]>)> {
    let result = match (state, event) {
        (State::NotJoined, Event::JoinDesiredTrue) => (
            State::Joined,
            smallvec![Action::SendJoin, Action::StartJoinTimer],
        ),
        (State::Joined, Event::JoinDesiredFalse) => (
            State::NotJoined,
            smallvec![
                Action::SendPrune,
                Action::CancelJoinTimer,
                Action::CancelOverrideTimer
            ],
        ),
        (State::Joined, Event::JoinTimerExpiry) => (
            State::Joined,
            smallvec![Action::SendJoin, Action::StartJoinTimer],
        ),
        (State::Joined, Event::SeeJoinToRpfNbr) => {
            (State::Joined, smallvec![Action::SuppressJoinTimer])
        }
        (State::Joined, Event::SeePruneToRpfNbr) => {
            (State::Joined, smallvec![Action::StartOverrideTimer])
        }
        (State::Joined, Event::OverrideTimerExpiry) => {
            (State::Joined, smallvec![Action::SendJoin])
        }
        (State::Joined, Event::RpfNbrChanged) => (
            State::Joined,
            smallvec![Action::SendJoin, Action::StartJoinTimer],
        ),
        _ => return None,
    };

    Some(result)
}

// Upstream state machine transition function for (S,G,rpt) entries.
pub(crate) fn rpt_transition(
    state: RptState,
    event: RptEvent,
) -> Option<(RptState, SmallVec<[Action; 2]>)> {
    let result = match (state, event) {
        (RptState::RptNotJoined, RptEvent::PruneDesiredTrue) => {
            (RptState::Pruned, smallvec![])
        }
        (RptState::RptNotJoined, RptEvent::PruneDesiredFalse) => {
            (RptState::NotPruned, smallvec![])
        }
        (RptState::NotPruned, RptEvent::PruneDesiredTrue) => (
            RptState::Pruned,
            smallvec![Action::SendPrune, Action::CancelOverrideTimer],
        ),
        (RptState::Pruned, RptEvent::PruneDesiredFalse) => {
            (RptState::NotPruned, smallvec![Action::SendJoin])
        }
        (
            RptState::Pruned | RptState::NotPruned,
            RptEvent::RptJoinDesiredFalse,
        ) => (
            RptState::RptNotJoined,
            smallvec![Action::CancelOverrideTimer],
        ),
        (RptState::NotPruned, RptEvent::SeePruneSgRpt) => {
            (RptState::NotPruned, smallvec![Action::StartOverrideTimer])
        }
        (RptState::NotPruned, RptEvent::OverrideTimerExpiry) => {
            (RptState::NotPruned, smallvec![Action::SendJoin])
        }
        _ => return None,
    };

    Some(result)
}

// ===== olist computations =====

fn downstream_joins(downstream: &BTreeMap<u16, DownstreamVif>) -> Mifset {
    downstream
        .iter()
        .filter(|(_, vif)| vif.is_joined())
        .map(|(vif_index, _)| *vif_index)
        .collect()
}

fn downstream_prunes(downstream: &BTreeMap<u16, DownstreamVif>) -> Mifset {
    downstream
        .iter()
        .filter(|(_, vif)| vif.is_pruned())
        .map(|(vif_index, _)| *vif_index)
        .collect()
}

// joins(*,*,RP(G)).
pub(crate) fn joins_rp(mrt: &Mrt, rp_addr: Option<IpAddr>) -> Mifset {
    rp_addr
        .and_then(|rp_addr| mrt.rp.get(&rp_addr))
        .map(|mre| downstream_joins(&mre.downstream))
        .unwrap_or_default()
}

// joins(*,G).
pub(crate) fn joins_wc(mrt: &Mrt, group: IpAddr) -> Mifset {
    mrt.wc
        .get(&group)
        .map(|mre| downstream_joins(&mre.downstream))
        .unwrap_or_default()
}

// joins(S,G).
pub(crate) fn joins_sg(mrt: &Mrt, group: IpAddr, source: IpAddr) -> Mifset {
    mrt.sg
        .get(&(group, source))
        .map(|mre| downstream_joins(&mre.downstream))
        .unwrap_or_default()
}

// prunes(S,G,rpt).
pub(crate) fn prunes_sg_rpt(
    mrt: &Mrt,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    mrt.sg_rpt
        .get(&(group, source))
        .map(|mre| downstream_prunes(&mre.downstream))
        .unwrap_or_default()
}

// Vifs where this router lost a (*,G) assert.
pub(crate) fn lost_assert_wc(mrt: &Mrt, group: IpAddr) -> Mifset {
    mrt.wc
        .get(&group)
        .map(|mre| {
            mre.asserts
                .iter()
                .filter(|(_, av)| av.is_loser())
                .map(|(vif_index, _)| *vif_index)
                .collect()
        })
        .unwrap_or_default()
}

// Vifs where this router lost an (S,G) assert.
pub(crate) fn lost_assert_sg(
    mrt: &Mrt,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    mrt.sg
        .get(&(group, source))
        .map(|mre| {
            mre.asserts
                .iter()
                .filter(|(_, av)| av.is_loser())
                .map(|(vif_index, _)| *vif_index)
                .collect()
        })
        .unwrap_or_default()
}

// pim_include(*,G): vifs with local (*,G) receivers where this router
// is either the DR or the assert winner.
pub(crate) fn pim_include_wc(
    mrt: &Mrt,
    interfaces: &Interfaces,
    group: IpAddr,
) -> Mifset {
    let Some(mre) = mrt.wc.get(&group) else {
        return Mifset::new();
    };
    mre.local_receiver_include
        .iter()
        .filter(|vif_index| {
            forwards_on_vif(interfaces, &mre.asserts, *vif_index)
        })
        .collect()
}

// pim_include(S,G).
pub(crate) fn pim_include_sg(
    mrt: &Mrt,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    let Some(mre) = mrt.sg.get(&(group, source)) else {
        return Mifset::new();
    };
    mre.local_receiver_include
        .iter()
        .filter(|vif_index| {
            forwards_on_vif(interfaces, &mre.asserts, *vif_index)
        })
        .collect()
}

// pim_exclude(S,G): vifs with local receivers that excluded this source.
pub(crate) fn pim_exclude_sg(
    mrt: &Mrt,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    let Some(mre) = mrt.sg.get(&(group, source)) else {
        return Mifset::new();
    };
    mre.local_receiver_exclude
        .iter()
        .filter(|vif_index| {
            forwards_on_vif(interfaces, &mre.asserts, *vif_index)
        })
        .collect()
}

// Local membership counts only when this router forwards on the vif,
// either as DR or as assert winner.
fn forwards_on_vif(
    interfaces: &Interfaces,
    asserts: &BTreeMap<u16, super::assert::AssertVif>,
    vif_index: u16,
) -> bool {
    if asserts
        .get(&vif_index)
        .is_some_and(|av| av.is_winner())
    {
        return true;
    }
    interfaces
        .get_by_vif_index(vif_index)
        .map(|(_, iface)| iface.is_dr())
        .unwrap_or(false)
}

// immediate_olist(*,*,RP).
pub(crate) fn immediate_olist_rp(mrt: &Mrt, rp_addr: IpAddr) -> Mifset {
    joins_rp(mrt, Some(rp_addr))
}

// immediate_olist(*,G).
pub(crate) fn immediate_olist_wc(
    mrt: &Mrt,
    interfaces: &Interfaces,
    group: IpAddr,
) -> Mifset {
    (joins_wc(mrt, group) | pim_include_wc(mrt, interfaces, group))
        - lost_assert_wc(mrt, group)
}

// immediate_olist(S,G).
pub(crate) fn immediate_olist_sg(
    mrt: &Mrt,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    (joins_sg(mrt, group, source)
        | pim_include_sg(mrt, interfaces, group, source))
        - lost_assert_sg(mrt, group, source)
}

// inherited_olist(S,G,rpt): the outgoing interface list the flow would
// use when forwarded along the shared tree.
pub(crate) fn inherited_olist_sg_rpt(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    let mrt = &state.mrt;
    let rp_addr = state.rp_set.rp_lookup(&group).map(|rp| rp.rp_addr);

    let rpt_joins = (joins_rp(mrt, rp_addr) | joins_wc(mrt, group))
        - prunes_sg_rpt(mrt, group, source);
    let include = pim_include_wc(mrt, interfaces, group)
        - pim_exclude_sg(mrt, interfaces, group, source);

    (rpt_joins | include)
        - lost_assert_wc(mrt, group)
        - lost_assert_sg(mrt, group, source)
}

// inherited_olist(S,G).
pub(crate) fn inherited_olist_sg(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> Mifset {
    inherited_olist_sg_rpt(state, interfaces, group, source)
        | immediate_olist_sg(&state.mrt, interfaces, group, source)
}

// ===== derived predicates =====

// JoinDesired(*,*,RP).
pub(crate) fn join_desired_rp(state: &InstanceState, rp_addr: IpAddr) -> bool {
    immediate_olist_rp(&state.mrt, rp_addr).any()
}

// JoinDesired(*,G).
pub(crate) fn join_desired_wc(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
) -> bool {
    immediate_olist_wc(&state.mrt, interfaces, group).any()
}

// JoinDesired(S,G).
pub(crate) fn join_desired_sg(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> bool {
    if immediate_olist_sg(&state.mrt, interfaces, group, source).any() {
        return true;
    }
    let keepalive_running = state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.keepalive_timer.is_some());
    keepalive_running
        && inherited_olist_sg(state, interfaces, group, source).any()
}

// RPTJoinDesired(G).
pub(crate) fn rpt_join_desired(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
) -> bool {
    if join_desired_wc(state, interfaces, group) {
        return true;
    }
    state
        .rp_set
        .rp_lookup(&group)
        .is_some_and(|rp| join_desired_rp(state, rp.rp_addr))
}

// PruneDesired(S,G,rpt).
pub(crate) fn prune_desired_sg_rpt(
    state: &InstanceState,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> bool {
    if rpt_join_desired(state, interfaces, group)
        && inherited_olist_sg_rpt(state, interfaces, group, source).none()
    {
        return true;
    }

    // The flow switched to the shortest-path tree and the shared tree
    // diverges from it.
    let spt_bit = state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.spt_bit);
    spt_bit
        && mrt::rpf_nbr_wc(state, interfaces, group)
            != mrt::rpf_nbr_sg(state, interfaces, group, source)
}

// SwitchToSptDesired(S,G): the last-hop router policy for joining the
// shortest-path tree.
pub(crate) fn switch_to_spt_desired(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> bool {
    instance.config.spt_threshold.enabled
        && (pim_include_wc(&instance.state.mrt, interfaces, group)
            | pim_include_sg(&instance.state.mrt, interfaces, group, source))
        .any()
}

// ===== upstream FSM drivers =====

// Re-evaluates JoinDesired(*,*,RP) and drives the upstream FSM.
pub(crate) fn update_rp(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    rp_addr: IpAddr,
) {
    if !instance.state.mrt.rp.contains_key(&rp_addr) {
        return;
    }
    let desired = join_desired_rp(instance.state, rp_addr);
    let event = desired_event(instance.state.mrt.rp[&rp_addr].upstream.state, desired);
    if let Some(event) = event {
        run_fsm(instance, interfaces, MreKey::Rp(rp_addr), event);
    }
}

// Re-evaluates JoinDesired(*,G) and drives the upstream FSM.
pub(crate) fn update_wc(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
) {
    if !instance.state.mrt.wc.contains_key(&group) {
        return;
    }
    let desired = join_desired_wc(instance.state, interfaces, group);
    let state = instance.state.mrt.wc[&group].upstream.state;
    if let Some(event) = desired_event(state, desired) {
        run_fsm(instance, interfaces, MreKey::Wc(group), event);
    }
}

// Re-evaluates JoinDesired(S,G) and drives the upstream FSM.
pub(crate) fn update_sg(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    if !instance.state.mrt.sg.contains_key(&(group, source)) {
        return;
    }
    let desired = join_desired_sg(instance.state, interfaces, group, source);
    let state = instance.state.mrt.sg[&(group, source)].upstream.state;
    if let Some(event) = desired_event(state, desired) {
        run_fsm(instance, interfaces, MreKey::Sg(group, source), event);
    }
}

// Re-evaluates PruneDesired(S,G,rpt) and drives the (S,G,rpt) upstream
// FSM.
pub(crate) fn update_sg_rpt(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    if !instance.state.mrt.sg_rpt.contains_key(&(group, source)) {
        return;
    }

    let event = if !rpt_join_desired(instance.state, interfaces, group) {
        RptEvent::RptJoinDesiredFalse
    } else if prune_desired_sg_rpt(instance.state, interfaces, group, source)
    {
        RptEvent::PruneDesiredTrue
    } else {
        RptEvent::PruneDesiredFalse
    };

    run_rpt_fsm(instance, interfaces, group, source, event);
}

fn desired_event(state: State, desired: bool) -> Option<Event> {
    match (state, desired) {
        (State::NotJoined, true) => Some(Event::JoinDesiredTrue),
        (State::Joined, false) => Some(Event::JoinDesiredFalse),
        _ => None,
    }
}

// Feeds one event into the upstream FSM of the given entry and
// dispatches the resulting actions.
pub(crate) fn run_fsm(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    event: Event,
) {
    // Resolve the current RPF' neighbor of the entry.
    let rpf_nbr = match key {
        MreKey::Rp(rp_addr) => mrt::rpf_lookup(
            instance.state,
            interfaces,
            rp_addr,
        )
        .and_then(|rpf| {
            rpf.nbr_addr.map(|nbr_addr| (rpf.vif_index, nbr_addr))
        }),
        MreKey::Wc(group) => {
            mrt::rpf_nbr_wc(instance.state, interfaces, group)
        }
        MreKey::Sg(group, source) => {
            mrt::rpf_nbr_sg(instance.state, interfaces, group, source)
        }
        MreKey::SgRpt(..) => unreachable!(),
    };

    let sm = match key {
        MreKey::Rp(rp_addr) => instance
            .state
            .mrt
            .rp
            .get_mut(&rp_addr)
            .map(|mre| &mut mre.upstream),
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get_mut(&group)
            .map(|mre| &mut mre.upstream),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get_mut(&(group, source))
            .map(|mre| &mut mre.upstream),
        MreKey::SgRpt(..) => unreachable!(),
    };
    // The entry may be gone by the time a stale timer message arrives.
    let Some(sm) = sm else {
        return;
    };

    let Some((new_state, actions)) = transition(sm.state, event) else {
        return;
    };
    if new_state != sm.state {
        Debug::UpstreamTransition(&key, sm.state, new_state).log();
    }
    sm.state = new_state;

    // The Join/Prune pair addresses whichever neighbor the entry was
    // last joined toward; new Joins go to the current RPF' neighbor.
    let old_nbr = sm.rpf_nbr;
    sm.rpf_nbr = rpf_nbr;

    for action in actions {
        dispatch(instance, interfaces, key, action, rpf_nbr, old_nbr);
    }
}

// Feeds one event into the (S,G,rpt) upstream FSM and dispatches the
// resulting actions.
pub(crate) fn run_rpt_fsm(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
    event: RptEvent,
) {
    let key = MreKey::SgRpt(group, source);
    let rpf_nbr = mrt::rpf_nbr_wc(instance.state, interfaces, group);

    let Some(mre) = instance.state.mrt.sg_rpt.get_mut(&(group, source))
    else {
        return;
    };
    let Some((new_state, actions)) = rpt_transition(mre.upstream.state, event)
    else {
        return;
    };
    if new_state != mre.upstream.state {
        Debug::SgRptUpstreamTransition(&key, mre.upstream.state, new_state)
            .log();
    }
    mre.upstream.state = new_state;

    for action in actions {
        dispatch(instance, interfaces, key, action, rpf_nbr, rpf_nbr);
    }
}

// Executes one upstream action.
fn dispatch(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    action: Action,
    rpf_nbr: Option<(u16, IpAddr)>,
    old_nbr: Option<(u16, IpAddr)>,
) {
    match action {
        Action::SendJoin => {
            if let Some((vif_index, nbr_addr)) = rpf_nbr {
                output::send_join_prune(
                    instance,
                    interfaces,
                    key,
                    vif_index,
                    nbr_addr,
                    true,
                );
            }
        }
        Action::SendPrune => {
            if let Some((vif_index, nbr_addr)) = old_nbr {
                output::send_join_prune(
                    instance,
                    interfaces,
                    key,
                    vif_index,
                    nbr_addr,
                    false,
                );
            }
        }
        Action::StartJoinTimer => {
            let period = join_prune_period(interfaces, rpf_nbr);
            let timeout = tasks::jittered(period);
            let timer = tasks::join_timer(key, timeout, instance);
            set_join_timer(instance.state, key, Some(timer));
        }
        Action::SuppressJoinTimer => {
            // Join suppression: push the periodic Join out by a random
            // amount beyond the normal period.
            let period = join_prune_period(interfaces, rpf_nbr);
            let timeout = period + tasks::jittered(period / 4);
            let timer = tasks::join_timer(key, timeout, instance);
            set_join_timer(instance.state, key, Some(timer));
        }
        Action::CancelJoinTimer => {
            set_join_timer(instance.state, key, None);
        }
        Action::StartOverrideTimer => {
            let delay = override_delay(interfaces, rpf_nbr);
            let timer = tasks::override_timer(key, delay, instance);
            set_override_timer(instance.state, key, Some(timer));
        }
        Action::CancelOverrideTimer => {
            set_override_timer(instance.state, key, None);
        }
    }
}

fn join_prune_period(
    interfaces: &Interfaces,
    rpf_nbr: Option<(u16, IpAddr)>,
) -> Duration {
    let period = rpf_nbr
        .and_then(|(vif_index, _)| {
            interfaces
                .get_by_vif_index(vif_index)
                .ok()
                .map(|(_, iface)| iface.config.join_prune_period)
        })
        .unwrap_or(crate::consts::JOIN_PRUNE_PERIOD);
    Duration::from_secs(period.into())
}

fn override_delay(
    interfaces: &Interfaces,
    rpf_nbr: Option<(u16, IpAddr)>,
) -> Duration {
    let interval = rpf_nbr
        .and_then(|(vif_index, _)| {
            interfaces
                .get_by_vif_index(vif_index)
                .ok()
                .map(|(_, iface)| iface.effective_override_interval())
        })
        .unwrap_or(crate::consts::OVERRIDE_INTERVAL_MSEC);
    let delay = rand::random_range(0..=interval);
    Duration::from_millis(delay.into())
}

fn set_join_timer(
    state: &mut InstanceState,
    key: MreKey,
    timer: Option<TimeoutTask>,
) {
    match key {
        MreKey::Rp(rp_addr) => {
            if let Some(mre) = state.mrt.rp.get_mut(&rp_addr) {
                mre.upstream.join_timer = timer;
            }
        }
        MreKey::Wc(group) => {
            if let Some(mre) = state.mrt.wc.get_mut(&group) {
                mre.upstream.join_timer = timer;
            }
        }
        MreKey::Sg(group, source) => {
            if let Some(mre) = state.mrt.sg.get_mut(&(group, source)) {
                mre.upstream.join_timer = timer;
            }
        }
        MreKey::SgRpt(..) => (),
    }
}

fn set_override_timer(
    state: &mut InstanceState,
    key: MreKey,
    timer: Option<TimeoutTask>,
) {
    match key {
        MreKey::Rp(rp_addr) => {
            if let Some(mre) = state.mrt.rp.get_mut(&rp_addr) {
                mre.upstream.override_timer = timer;
            }
        }
        MreKey::Wc(group) => {
            if let Some(mre) = state.mrt.wc.get_mut(&group) {
                mre.upstream.override_timer = timer;
            }
        }
        MreKey::Sg(group, source) => {
            if let Some(mre) = state.mrt.sg.get_mut(&(group, source)) {
                mre.upstream.override_timer = timer;
            }
        }
        MreKey::SgRpt(group, source) => {
            if let Some(mre) = state.mrt.sg_rpt.get_mut(&(group, source)) {
                mre.upstream.override_timer = timer;
            }
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_not_joined_cycle() {
        let (state, actions) =
            transition(State::NotJoined, Event::JoinDesiredTrue).unwrap();
        assert_eq!(state, State::Joined);
        assert_eq!(
            actions.as_slice(),
            [Action::SendJoin, Action::StartJoinTimer]
        );

        let (state, actions) =
            transition(state, Event::JoinDesiredFalse).unwrap();
        assert_eq!(state, State::NotJoined);
        assert!(actions.contains(&Action::SendPrune));
        assert!(actions.contains(&Action::CancelJoinTimer));
    }

    #[test]
    fn periodic_join_refresh() {
        let (state, actions) =
            transition(State::Joined, Event::JoinTimerExpiry).unwrap();
        assert_eq!(state, State::Joined);
        assert_eq!(
            actions.as_slice(),
            [Action::SendJoin, Action::StartJoinTimer]
        );
    }

    #[test]
    fn prune_override() {
        let (state, actions) =
            transition(State::Joined, Event::SeePruneToRpfNbr).unwrap();
        assert_eq!(state, State::Joined);
        assert_eq!(actions.as_slice(), [Action::StartOverrideTimer]);

        let (_, actions) =
            transition(state, Event::OverrideTimerExpiry).unwrap();
        assert_eq!(actions.as_slice(), [Action::SendJoin]);
    }

    #[test]
    fn not_joined_ignores_timer_events() {
        assert!(transition(State::NotJoined, Event::JoinTimerExpiry).is_none());
        assert!(
            transition(State::NotJoined, Event::OverrideTimerExpiry).is_none()
        );
    }

    #[test]
    fn rpt_prune_cycle() {
        let (state, actions) =
            rpt_transition(RptState::RptNotJoined, RptEvent::PruneDesiredTrue)
                .unwrap();
        assert_eq!(state, RptState::Pruned);
        assert!(actions.is_empty());

        let (state, actions) =
            rpt_transition(state, RptEvent::PruneDesiredFalse).unwrap();
        assert_eq!(state, RptState::NotPruned);
        assert_eq!(actions.as_slice(), [Action::SendJoin]);

        let (state, actions) =
            rpt_transition(state, RptEvent::PruneDesiredTrue).unwrap();
        assert_eq!(state, RptState::Pruned);
        assert!(actions.contains(&Action::SendPrune));

        let (state, _) =
            rpt_transition(state, RptEvent::RptJoinDesiredFalse).unwrap();
        assert_eq!(state, RptState::RptNotJoined);
    }
}
