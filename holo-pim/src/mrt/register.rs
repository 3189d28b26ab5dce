//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use holo_utils::ip::IpAddrExt;
use holo_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::collections::Interfaces;
use crate::consts::*;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::mrt::{self, upstream};
use crate::packet::register::RegisterMsg;
use crate::{mfc, output, tasks};

// Per-(S,G) Register state at the DR.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    NoInfo,
    Join,
    JoinPending,
    Prune,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    CouldRegisterTrue,
    CouldRegisterFalse,
    RegisterStopRcvd,
    RegisterStopTimerExpiry,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    // Schedule the Register-Stop timer to the suppression time (minus
    // the probe time, with a small jitter).
    StartSuppressionTimer,
    // Schedule the Register-Stop timer to the probe time.
    StartProbeTimer,
    CancelTimer,
    SendNullRegister,
}

// Register state machine of one (S,G) entry.
#[derive(Debug, Default)]
pub struct RegisterSm {
    pub state: State,
    pub register_stop_timer: Option<TimeoutTask>,
}

// ===== impl RegisterSm =====

impl RegisterSm {
    pub(crate) fn is_idle(&self) -> bool {
        self.state == State::NoInfo && self.register_stop_timer.is_none()
    }

    // Returns whether data packets from the source are to be
    // encapsulated toward the RP.
    pub(crate) fn sends_data_registers(&self) -> bool {
        self.state == State::Join
    }
}

// ===== global functions =====

// Register state machine transition function.
pub(crate) fn transition(
    state: State,
    event: Event,
) -> Option<(State, SmallVec<[Action; 2]>)> {
    let result = match (state, event) {
        (State::NoInfo, Event::CouldRegisterTrue) => {
            (State::Join, smallvec![])
        }
        (State::Join, Event::CouldRegisterFalse) => {
            (State::NoInfo, smallvec![Action::CancelTimer])
        }
        (State::Join, Event::RegisterStopRcvd) => {
            (State::Prune, smallvec![Action::StartSuppressionTimer])
        }
        (State::Prune, Event::RegisterStopTimerExpiry) => (
            State::JoinPending,
            smallvec![Action::StartProbeTimer, Action::SendNullRegister],
        ),
        (State::JoinPending, Event::RegisterStopTimerExpiry) => {
            (State::Join, smallvec![Action::CancelTimer])
        }
        (State::JoinPending, Event::RegisterStopRcvd) => {
            (State::Prune, smallvec![Action::StartSuppressionTimer])
        }
        (
            State::Prune | State::JoinPending,
            Event::CouldRegisterFalse,
        ) => (State::NoInfo, smallvec![Action::CancelTimer]),
        _ => return None,
    };

    Some(result)
}

// CouldRegister(S,G): this router encapsulates Registers for the source
// when the source is directly connected, this router is the DR on the
// source's subnet, and (S,G) state is alive.
pub(crate) fn could_register(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) -> bool {
    let Some(mre) = instance.state.mrt.sg.get(&(group, source)) else {
        return false;
    };
    if !mre.is_directly_connected || mre.keepalive_timer.is_none() {
        return false;
    }
    crate::interface::find_directly_connected(interfaces, source)
        .is_some_and(|iface| iface.is_dr())
}

// Re-evaluates CouldRegister(S,G) and drives the Register FSM.
pub(crate) fn update_could_register(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
) {
    let could = could_register(instance, interfaces, group, source);
    let Some(mre) = instance.state.mrt.sg.get(&(group, source)) else {
        return;
    };
    let event = match (mre.register.state, could) {
        (State::NoInfo, true) => Event::CouldRegisterTrue,
        (State::NoInfo, false) => return,
        (_, false) => Event::CouldRegisterFalse,
        (_, true) => return,
    };
    run_fsm(instance, interfaces, group, source, event);
}

// Feeds one event into the Register FSM of an (S,G) entry and
// dispatches the resulting actions.
pub(crate) fn run_fsm(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    group: IpAddr,
    source: IpAddr,
    event: Event,
) {
    let Some(mre) = instance.state.mrt.sg.get_mut(&(group, source)) else {
        return;
    };

    let Some((new_state, actions)) = transition(mre.register.state, event)
    else {
        return;
    };
    let changed = new_state != mre.register.state;
    if changed {
        Debug::RegisterTransition(&source, &group, mre.register.state, new_state)
            .log();
    }
    mre.register.state = new_state;

    for action in actions {
        match action {
            Action::StartSuppressionTimer => {
                let timeout = register_suppression_timeout();
                let timer =
                    tasks::register_stop_timer(source, group, timeout, instance);
                let mre =
                    instance.state.mrt.sg.get_mut(&(group, source)).unwrap();
                mre.register.register_stop_timer = Some(timer);
            }
            Action::StartProbeTimer => {
                let timeout = Duration::from_secs(REGISTER_PROBE_TIME.into());
                let timer =
                    tasks::register_stop_timer(source, group, timeout, instance);
                let mre =
                    instance.state.mrt.sg.get_mut(&(group, source)).unwrap();
                mre.register.register_stop_timer = Some(timer);
            }
            Action::CancelTimer => {
                let mre =
                    instance.state.mrt.sg.get_mut(&(group, source)).unwrap();
                mre.register.register_stop_timer = None;
            }
            Action::SendNullRegister => {
                if let Some(rp_addr) = rp_of(instance, group, source) {
                    output::send_null_register(
                        instance, interfaces, rp_addr, source, group,
                    );
                }
            }
        }
    }

    // Whether the Register tunnel carries data is reflected in the
    // forwarding entry's olist.
    if changed {
        mfc::recompute(instance, interfaces, group, source);
    }
}

// The Register-Stop timer runs for the suppression time minus the probe
// time, jittered downward so that a burst of DRs does not probe in
// lockstep.
fn register_suppression_timeout() -> Duration {
    let base = REGISTER_SUPPRESSION_TIME - REGISTER_PROBE_TIME;
    tasks::jittered(Duration::from_secs(base.into()))
}

fn rp_of(
    instance: &InstanceUpView<'_>,
    group: IpAddr,
    source: IpAddr,
) -> Option<IpAddr> {
    instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .and_then(|mre| mre.rp_addr)
        .or_else(|| {
            instance
                .state
                .rp_set
                .rp_lookup(&group)
                .map(|rp| rp.rp_addr)
        })
}

// Handles a whole data packet from a directly connected source,
// encapsulating it toward the RP when the Register state allows it.
pub(crate) fn send_data_register(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    source: IpAddr,
    group: IpAddr,
    inner_packet: Bytes,
) {
    let Some(mre) = instance.state.mrt.sg.get(&(group, source)) else {
        return;
    };
    if !mre.register.sends_data_registers() {
        return;
    }
    let Some(rp_addr) = rp_of(instance, group, source) else {
        return;
    };

    output::send_register(instance, interfaces, rp_addr, inner_packet);
}

// Handles a Register-Stop received from the RP.
pub(crate) fn process_register_stop(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    source: IpAddr,
    group: IpAddr,
) {
    run_fsm(instance, interfaces, group, source, Event::RegisterStopRcvd);
}

// Handles a Register received on the RP side.
//
// This is `packet_arrives_on_rp_tunnel` with the Keepalive timer
// unconditionally restarted in both the "SPT bit set" and "empty olist"
// branches.
pub(crate) fn process_register_rp(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    outer_src: IpAddr,
    outer_dst: IpAddr,
    msg: &RegisterMsg,
) -> Result<(), Error> {
    let (inner_src, inner_dst) = msg
        .inner_addresses(instance.af)
        .map_err(|error| Error::PacketDecodeError(0, error))?;

    // Validate the addresses of the encapsulated packet.
    if !inner_src.is_usable() {
        instance.state.statistics.errors.register += 1;
        return Err(Error::RegisterInnerSrcNotUnicast(inner_src));
    }
    if !inner_dst.is_multicast() || inner_dst.is_linklocal_multicast() {
        instance.state.statistics.errors.register += 1;
        return Err(Error::RegisterInnerDstNotMulticast(inner_dst));
    }

    let source = inner_src;
    let group = inner_dst;

    // Without a Register vif this router cannot possibly be the RP.
    let Some(register_vif_index) = instance.state.register_vif_index else {
        output::send_register_stop(
            instance, interfaces, outer_src, source, group,
        );
        return Err(Error::RegisterVifMissing);
    };

    // This router must be the RP for the group, addressed as such.
    let rp_addr = instance
        .state
        .rp_set
        .rp_lookup(&group)
        .map(|rp| rp.rp_addr);
    let i_am_rp = rp_addr == Some(outer_dst)
        && interfaces.iter().any(|iface| {
            iface.system.addr_list.iter().any(|addr| addr.ip() == outer_dst)
        });
    if !i_am_rp {
        output::send_register_stop(
            instance, interfaces, outer_src, source, group,
        );
        return Ok(());
    }

    let olist =
        upstream::inherited_olist_sg(instance.state, interfaces, group, source);
    let spt_bit = instance
        .state
        .mrt
        .sg
        .get(&(group, source))
        .is_some_and(|mre| mre.spt_bit);

    // Create or refresh (S,G) state even with no downstream members, so
    // that a later join can immediately pull the source without waiting
    // for the DR's Register-Stop timer to expire.
    mrt::keepalive_start(
        instance,
        interfaces,
        group,
        source,
        Duration::from_secs(rp_keepalive_period().into()),
    );

    if olist.none() || spt_bit {
        output::send_register_stop(
            instance, interfaces, outer_src, source, group,
        );
    }
    // Otherwise the data plane decapsulates non-Null Registers and
    // forwards the payload along the shared tree once the MFC below is
    // installed.

    // Install the (S,G) forwarding entry with the Register vif as its
    // incoming interface, so that further Registers are decapsulated in
    // the data plane.
    if !instance.state.mrt.mfc.contains_key(&(group, source)) {
        mfc::install(instance, group, source, register_vif_index, olist);
    }
    mfc::idle_monitor_install(
        instance,
        group,
        source,
        rp_keepalive_period(),
    );

    Ok(())
}

// Keepalive period used at the RP.
pub(crate) fn rp_keepalive_period() -> u32 {
    std::cmp::max(KEEPALIVE_PERIOD, RP_KEEPALIVE_PERIOD)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dr_register_cycle() {
        // A directly connected source shows up and this router is the
        // DR: registers flow.
        let (state, actions) =
            transition(State::NoInfo, Event::CouldRegisterTrue).unwrap();
        assert_eq!(state, State::Join);
        assert!(actions.is_empty());
        assert!(RegisterSm {
            state,
            register_stop_timer: None
        }
        .sends_data_registers());

        // The RP answers with a Register-Stop: suppression starts.
        let (state, actions) =
            transition(state, Event::RegisterStopRcvd).unwrap();
        assert_eq!(state, State::Prune);
        assert_eq!(actions.as_slice(), [Action::StartSuppressionTimer]);

        // Just before suppression ends, a Null Register probes the RP.
        let (state, actions) =
            transition(state, Event::RegisterStopTimerExpiry).unwrap();
        assert_eq!(state, State::JoinPending);
        assert_eq!(
            actions.as_slice(),
            [Action::StartProbeTimer, Action::SendNullRegister]
        );

        // No further Register-Stop: back to sending data registers.
        let (state, actions) =
            transition(state, Event::RegisterStopTimerExpiry).unwrap();
        assert_eq!(state, State::Join);
        assert_eq!(actions.as_slice(), [Action::CancelTimer]);
    }

    #[test]
    fn probe_answered_stays_suppressed() {
        let (state, _) =
            transition(State::JoinPending, Event::RegisterStopRcvd).unwrap();
        assert_eq!(state, State::Prune);
    }

    #[test]
    fn could_register_false_clears_state() {
        for state in [State::Join, State::JoinPending, State::Prune] {
            let (state, actions) =
                transition(state, Event::CouldRegisterFalse).unwrap();
            assert_eq!(state, State::NoInfo);
            assert!(actions.contains(&Action::CancelTimer));
        }
    }

    #[test]
    fn rp_uses_longer_keepalive() {
        assert!(rp_keepalive_period() >= KEEPALIVE_PERIOD);
    }
}
