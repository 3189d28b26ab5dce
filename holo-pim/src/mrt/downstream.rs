//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

// Per-vif downstream Join/Prune state.
//
// The temporary states are only entered by (S,G,rpt) entries while a
// compound Join/Prune message is being processed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    NoInfo,
    Join,
    PrunePending,
    Prune,
    PruneTmp,
    PrunePendingTmp,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    JoinRcvd,
    PruneRcvd,
    PrunePendingTimerExpiry,
    ExpiryTimerExpiry,
    // A Join(*,G) was seen in the compound message (S,G,rpt only).
    SeeJoinWc,
    // The enclosing compound message was fully processed (S,G,rpt only).
    EndOfMessage,
}

// Actions produced by a state transition, dispatched after the
// transition commits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    StartExpiryTimer,
    StartPrunePendingTimer,
    CancelPrunePendingTimer,
    CancelTimers,
    SendPruneEcho,
}

// Per-vif downstream state machine instance.
#[derive(Debug, Default)]
pub struct DownstreamVif {
    pub state: State,
    pub expiry_timer: Option<TimeoutTask>,
    pub prune_pending_timer: Option<TimeoutTask>,
}

// ===== impl DownstreamVif =====

impl DownstreamVif {
    // Returns whether the vif contributes to the joins() set.
    pub(crate) fn is_joined(&self) -> bool {
        matches!(self.state, State::Join | State::PrunePending)
    }

    // Returns whether the vif contributes to the prunes() set.
    pub(crate) fn is_pruned(&self) -> bool {
        matches!(self.state, State::Prune | State::PruneTmp)
    }
}

// ===== global functions =====

// Downstream state machine transition function.
//
// Returns the new state and the actions to dispatch, or `None` when the
// event does not apply to the current state.
pub(crate) fn transition(
    state: State,
    event: Event,
) -> Option<(State, SmallVec<[Action; 2]>)> {
    let result = match (state, event) {
        (State::NoInfo, Event::JoinRcvd) => {
            (State::Join, smallvec![Action::StartExpiryTimer])
        }
        (State::Join, Event::JoinRcvd) => {
            (State::Join, smallvec![Action::StartExpiryTimer])
        }
        (State::PrunePending, Event::JoinRcvd) => (
            State::Join,
            smallvec![
                Action::CancelPrunePendingTimer,
                Action::StartExpiryTimer
            ],
        ),
        (State::Join, Event::PruneRcvd) => {
            (State::PrunePending, smallvec![Action::StartPrunePendingTimer])
        }
        (State::Prune, Event::PruneRcvd) => {
            (State::Prune, smallvec![Action::StartExpiryTimer])
        }
        (State::PrunePending, Event::PrunePendingTimerExpiry) => {
            (State::Prune, smallvec![Action::SendPruneEcho])
        }
        (State::Join | State::Prune, Event::ExpiryTimerExpiry) => {
            (State::NoInfo, smallvec![Action::CancelTimers])
        }
        // (S,G,rpt) temporary states.
        (State::Prune, Event::SeeJoinWc) => (State::PruneTmp, smallvec![]),
        (State::PrunePending, Event::SeeJoinWc) => {
            (State::PrunePendingTmp, smallvec![])
        }
        (State::PruneTmp, Event::PruneRcvd) => {
            (State::Prune, smallvec![Action::StartExpiryTimer])
        }
        (State::PrunePendingTmp, Event::PruneRcvd) => {
            (State::PrunePending, smallvec![])
        }
        (State::PruneTmp | State::PrunePendingTmp, Event::EndOfMessage) => {
            (State::NoInfo, smallvec![Action::CancelTimers])
        }
        (State::PruneTmp | State::PrunePendingTmp, Event::ExpiryTimerExpiry) => {
            (State::NoInfo, smallvec![Action::CancelTimers])
        }
        // A Prune in NoInfo carries no state change; it is only counted
        // when neighbor tracking is in use.
        (State::NoInfo, Event::PruneRcvd) => return None,
        _ => return None,
    };

    Some(result)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_prune_cycle() {
        let (state, actions) =
            transition(State::NoInfo, Event::JoinRcvd).unwrap();
        assert_eq!(state, State::Join);
        assert_eq!(actions.as_slice(), [Action::StartExpiryTimer]);

        let (state, actions) =
            transition(state, Event::PruneRcvd).unwrap();
        assert_eq!(state, State::PrunePending);
        assert_eq!(actions.as_slice(), [Action::StartPrunePendingTimer]);

        let (state, actions) =
            transition(state, Event::PrunePendingTimerExpiry).unwrap();
        assert_eq!(state, State::Prune);
        assert_eq!(actions.as_slice(), [Action::SendPruneEcho]);

        let (state, _) =
            transition(state, Event::ExpiryTimerExpiry).unwrap();
        assert_eq!(state, State::NoInfo);
    }

    #[test]
    fn join_overrides_prune_pending() {
        let (state, _) = transition(State::NoInfo, Event::JoinRcvd).unwrap();
        let (state, _) = transition(state, Event::PruneRcvd).unwrap();
        let (state, actions) = transition(state, Event::JoinRcvd).unwrap();
        assert_eq!(state, State::Join);
        assert!(actions.contains(&Action::CancelPrunePendingTimer));
    }

    #[test]
    fn prune_in_noinfo_ignored() {
        assert!(transition(State::NoInfo, Event::PruneRcvd).is_none());
    }

    #[test]
    fn sg_rpt_temporary_states() {
        // A Join(*,G) in the compound message moves Prune to PruneTmp.
        let (state, _) =
            transition(State::Prune, Event::SeeJoinWc).unwrap();
        assert_eq!(state, State::PruneTmp);

        // A Prune(S,G,rpt) in the same message re-arms the state.
        let (state, actions) =
            transition(state, Event::PruneRcvd).unwrap();
        assert_eq!(state, State::Prune);
        assert_eq!(actions.as_slice(), [Action::StartExpiryTimer]);

        // Without one, the end of the message clears it.
        let (state, _) =
            transition(State::PruneTmp, Event::EndOfMessage).unwrap();
        assert_eq!(state, State::NoInfo);
    }
}
