//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use holo_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::collections::Interfaces;
use crate::consts::ASSERT_TIME;
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::mrt::{self, MreKey};
use crate::{output, tasks};

// Per-vif assert state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    NoInfo,
    Winner,
    Loser,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    // An assert preferred over this router's metric was received.
    RecvPreferred(AssertMetric),
    // An inferior assert was received.
    RecvInferior,
    // An inferior assert was received from the recorded winner.
    RecvInferiorFromWinner,
    // Data (or an inferior assert) arrived and this router's metric
    // wins.
    MyMetricWins,
    TimerExpiry,
    CouldAssertFalse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    SendAssert,
    SendAssertCancel,
    RecordWinner,
    ClearWinner,
    StartWinnerTimer,
    StartLoserTimer,
    CancelTimer,
}

// Metric triple carried by Assert messages, compared lexicographically
// with the address breaking exact ties.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AssertMetric {
    pub rpt_bit: bool,
    pub metric_preference: u32,
    pub metric: u32,
    pub addr: IpAddr,
}

// Per-vif assert state machine instance.
#[derive(Debug, Default)]
pub struct AssertVif {
    pub state: State,
    // Metric of the current assert winner, recorded while in Loser
    // state.
    pub winner: Option<AssertMetric>,
    pub timer: Option<TimeoutTask>,
}

// ===== impl AssertMetric =====

impl AssertMetric {
    pub(crate) fn new(
        rpt_bit: bool,
        metric_preference: u32,
        metric: u32,
        addr: IpAddr,
    ) -> AssertMetric {
        AssertMetric {
            rpt_bit,
            metric_preference,
            metric,
            addr,
        }
    }

    // Assert metric advertised when this router stops being able to
    // assert (AssertCancel).
    pub(crate) fn infinite(rpt_bit: bool, addr: IpAddr) -> AssertMetric {
        AssertMetric {
            rpt_bit,
            metric_preference: u32::MAX,
            metric: u32::MAX,
            addr,
        }
    }

    // Returns whether this metric is preferred over the other one.
    //
    // Lower (RPT bit, preference, metric) wins; an exact tie is broken
    // by the higher address.
    pub(crate) fn is_preferred_over(&self, other: &AssertMetric) -> bool {
        (self.rpt_bit, self.metric_preference, self.metric)
            .cmp(&(other.rpt_bit, other.metric_preference, other.metric))
            .then_with(|| other.addr.cmp(&self.addr))
            .is_lt()
    }
}

// ===== impl AssertVif =====

impl AssertVif {
    pub(crate) fn is_winner(&self) -> bool {
        self.state == State::Winner
    }

    pub(crate) fn is_loser(&self) -> bool {
        self.state == State::Loser
    }

    // Returns the metric of the assert winner this router lost to.
    pub(crate) fn lost_to(&self) -> Option<&AssertMetric> {
        if self.is_loser() {
            self.winner.as_ref()
        } else {
            None
        }
    }
}

// ===== global functions =====

// Assert state machine transition function.
pub(crate) fn transition(
    state: State,
    event: &Event,
) -> Option<(State, SmallVec<[Action; 3]>)> {
    let result = match (state, event) {
        (State::NoInfo, Event::MyMetricWins) => (
            State::Winner,
            smallvec![Action::SendAssert, Action::StartWinnerTimer],
        ),
        (State::NoInfo, Event::RecvPreferred(_)) => (
            State::Loser,
            smallvec![Action::RecordWinner, Action::StartLoserTimer],
        ),
        (State::Winner, Event::RecvPreferred(_)) => (
            State::Loser,
            smallvec![Action::RecordWinner, Action::StartLoserTimer],
        ),
        (State::Winner, Event::RecvInferior | Event::MyMetricWins) => (
            State::Winner,
            smallvec![Action::SendAssert, Action::StartWinnerTimer],
        ),
        // The winner refreshes its assert before the neighbors time it
        // out.
        (State::Winner, Event::TimerExpiry) => (
            State::Winner,
            smallvec![Action::SendAssert, Action::StartWinnerTimer],
        ),
        (State::Loser, Event::RecvPreferred(_)) => (
            State::Loser,
            smallvec![Action::RecordWinner, Action::StartLoserTimer],
        ),
        (State::Loser, Event::RecvInferiorFromWinner) => (
            State::NoInfo,
            smallvec![Action::ClearWinner, Action::CancelTimer],
        ),
        (State::Loser, Event::TimerExpiry) => (
            State::NoInfo,
            smallvec![Action::ClearWinner, Action::CancelTimer],
        ),
        (State::Winner, Event::CouldAssertFalse) => (
            State::NoInfo,
            smallvec![
                Action::SendAssertCancel,
                Action::ClearWinner,
                Action::CancelTimer
            ],
        ),
        (State::Loser, Event::CouldAssertFalse) => (
            State::NoInfo,
            smallvec![Action::ClearWinner, Action::CancelTimer],
        ),
        _ => return None,
    };

    Some(result)
}

// Feeds one event into the assert state machine of the given entry/vif
// and dispatches the resulting actions.
//
// Returns whether the assert state changed, in which case the caller
// must recompute the affected outgoing interface lists.
pub(crate) fn run_fsm(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
    event: Event,
) -> bool {
    let Some(av) = assert_vif_mut(instance, key, vif_index) else {
        return false;
    };

    let Some((new_state, actions)) = transition(av.state, &event) else {
        return false;
    };
    let changed = new_state != av.state;
    if changed {
        Debug::AssertTransition(&key, vif_index, av.state, new_state).log();
    }
    av.state = new_state;

    for action in actions {
        match action {
            Action::RecordWinner => {
                if let Event::RecvPreferred(winner) = &event {
                    let av = assert_vif_mut(instance, key, vif_index).unwrap();
                    av.winner = Some(*winner);
                }
            }
            Action::ClearWinner => {
                let av = assert_vif_mut(instance, key, vif_index).unwrap();
                av.winner = None;
            }
            Action::StartWinnerTimer => {
                let timeout =
                    Duration::from_secs(ASSERT_TIME as u64 * 3 / 4);
                let timer =
                    tasks::assert_timer(key, vif_index, timeout, instance);
                let av = assert_vif_mut(instance, key, vif_index).unwrap();
                av.timer = Some(timer);
            }
            Action::StartLoserTimer => {
                let timeout = Duration::from_secs(ASSERT_TIME.into());
                let timer =
                    tasks::assert_timer(key, vif_index, timeout, instance);
                let av = assert_vif_mut(instance, key, vif_index).unwrap();
                av.timer = Some(timer);
            }
            Action::CancelTimer => {
                let av = assert_vif_mut(instance, key, vif_index).unwrap();
                av.timer = None;
            }
            Action::SendAssert => {
                if let Some(metric) =
                    my_assert_metric(instance, interfaces, key, vif_index)
                {
                    output::send_assert(
                        instance, interfaces, key, vif_index, metric,
                    );
                }
            }
            Action::SendAssertCancel => {
                if let Some(addr) = vif_addr(interfaces, vif_index) {
                    let rpt_bit = matches!(key, MreKey::Wc(_));
                    let metric = AssertMetric::infinite(rpt_bit, addr);
                    output::send_assert(
                        instance, interfaces, key, vif_index, metric,
                    );
                }
            }
        }
    }

    // Entries in NoInfo state carry no information.
    if new_state == State::NoInfo {
        clear_assert_vif(instance, key, vif_index);
    }

    changed
}

// This router's assert metric for the given entry on the given vif.
pub(crate) fn my_assert_metric(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    key: MreKey,
    vif_index: u16,
) -> Option<AssertMetric> {
    let addr = vif_addr(interfaces, vif_index)?;
    match key {
        MreKey::Sg(_, source) => {
            let rpf =
                mrt::rpf_lookup(instance.state, interfaces, source)?;
            Some(AssertMetric::new(
                false,
                rpf.metric_preference,
                rpf.metric,
                addr,
            ))
        }
        MreKey::Wc(group) => {
            let rp_addr =
                instance.state.rp_set.rp_lookup(&group)?.rp_addr;
            let rpf = mrt::rpf_lookup(instance.state, interfaces, rp_addr)?;
            Some(AssertMetric::new(
                true,
                rpf.metric_preference,
                rpf.metric,
                addr,
            ))
        }
        _ => None,
    }
}

fn vif_addr(interfaces: &Interfaces, vif_index: u16) -> Option<IpAddr> {
    interfaces
        .get_by_vif_index(vif_index)
        .ok()
        .and_then(|(_, iface)| iface.primary_addr())
}

fn assert_vif_mut<'a>(
    instance: &'a mut InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
) -> Option<&'a mut AssertVif> {
    match key {
        MreKey::Wc(group) => instance
            .state
            .mrt
            .wc
            .get_mut(&group)
            .map(|mre| mre.asserts.entry(vif_index).or_default()),
        MreKey::Sg(group, source) => instance
            .state
            .mrt
            .sg
            .get_mut(&(group, source))
            .map(|mre| mre.asserts.entry(vif_index).or_default()),
        _ => None,
    }
}

fn clear_assert_vif(
    instance: &mut InstanceUpView<'_>,
    key: MreKey,
    vif_index: u16,
) {
    match key {
        MreKey::Wc(group) => {
            if let Some(mre) = instance.state.mrt.wc.get_mut(&group) {
                mre.asserts.remove(&vif_index);
            }
        }
        MreKey::Sg(group, source) => {
            if let Some(mre) = instance.state.mrt.sg.get_mut(&(group, source))
            {
                mre.asserts.remove(&vif_index);
            }
        }
        _ => (),
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(preference: u32, metric: u32, addr: &str) -> AssertMetric {
        AssertMetric::new(false, preference, metric, addr.parse().unwrap())
    }

    #[test]
    fn metric_ordering() {
        // Lower preference wins regardless of the metric.
        let x = metric(110, 5, "10.0.0.1");
        let y = metric(100, 10, "10.0.0.2");
        assert!(y.is_preferred_over(&x));
        assert!(!x.is_preferred_over(&y));

        // Same preference, lower metric wins.
        let a = metric(100, 5, "10.0.0.1");
        let b = metric(100, 10, "10.0.0.2");
        assert!(a.is_preferred_over(&b));

        // Exact tie, higher address wins.
        let a = metric(100, 5, "10.0.0.1");
        let b = metric(100, 5, "10.0.0.2");
        assert!(b.is_preferred_over(&a));
        assert!(!a.is_preferred_over(&b));
    }

    #[test]
    fn infinite_metric_always_loses() {
        let inf = AssertMetric::infinite(false, "10.0.0.9".parse().unwrap());
        let m = metric(100, 10, "10.0.0.1");
        assert!(m.is_preferred_over(&inf));
        assert!(!inf.is_preferred_over(&m));
    }

    #[test]
    fn winner_loser_transitions() {
        let winner_metric = metric(90, 1, "10.0.0.2");

        // Data arrival with a winning metric makes this router the
        // winner.
        let (state, actions) =
            transition(State::NoInfo, &Event::MyMetricWins).unwrap();
        assert_eq!(state, State::Winner);
        assert!(actions.contains(&Action::SendAssert));

        // A preferred assert demotes the winner to loser.
        let (state, actions) =
            transition(state, &Event::RecvPreferred(winner_metric)).unwrap();
        assert_eq!(state, State::Loser);
        assert!(actions.contains(&Action::RecordWinner));

        // Assert timer expiry returns the loser to NoInfo.
        let (state, actions) =
            transition(state, &Event::TimerExpiry).unwrap();
        assert_eq!(state, State::NoInfo);
        assert!(actions.contains(&Action::ClearWinner));
    }

    #[test]
    fn winner_refresh_on_timer() {
        let (state, actions) =
            transition(State::Winner, &Event::TimerExpiry).unwrap();
        assert_eq!(state, State::Winner);
        assert_eq!(
            actions.as_slice(),
            [Action::SendAssert, Action::StartWinnerTimer]
        );
    }
}
