//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use holo_utils::task::{IntervalTask, TimeoutTask};

use crate::bsr::PimScopeZoneId;
use crate::collections::InterfaceId;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::mrt::MreKey;

//
// PIM tasks diagram:
//                                    +--------------+
//                       ibus_rx ->   |              |   -> ibus_tx
//                        fea_rx ->   |              |   -> fea_tx
//                                    |              |
//           hello_interval (Nx) ->   |              |
//              nbr_timeout (Nx) ->   |              |
//               join_timer (Nx) ->   |              |
//           override_timer (Nx) ->   |   instance   |
//          keepalive_timer (Nx) ->   |              |
//      register_stop_timer (Nx) ->   |              |
//             assert_timer (Nx) ->   |              |
//        downstream_expiry (Nx) ->   |              |
//            prune_pending (Nx) ->   |              |
//                bsr_timer (Nx) ->   |              |
//              zone_expiry (Nx) ->   |              |
//                rp_expiry (Nx) ->   |              |
//             crp_adv_tick (1x) ->   |              |
//                                    +--------------+
//

// PIM inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::collections::InterfaceKey;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ProtocolMsg {
            HelloInterval(HelloIntervalMsg),
            NeighborTimeout(NeighborTimeoutMsg),
            JoinTimer(JoinTimerMsg),
            OverrideTimer(OverrideTimerMsg),
            KeepaliveTimer(KeepaliveTimerMsg),
            RegisterStopTimer(RegisterStopTimerMsg),
            AssertTimer(AssertTimerMsg),
            DownstreamExpiry(DownstreamExpiryMsg),
            PrunePending(PrunePendingMsg),
            BsrTimer(BsrTimerMsg),
            ZoneExpiry(ScopeZoneExpiryMsg),
            RpExpiry(RpExpiryMsg),
            CrpAdvTick(CrpAdvTickMsg),
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct HelloIntervalMsg {
            pub iface_key: InterfaceKey,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct NeighborTimeoutMsg {
            pub iface_key: InterfaceKey,
            pub addr: IpAddr,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct JoinTimerMsg {
            pub key: MreKey,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct OverrideTimerMsg {
            pub key: MreKey,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct KeepaliveTimerMsg {
            pub source: IpAddr,
            pub group: IpAddr,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct RegisterStopTimerMsg {
            pub source: IpAddr,
            pub group: IpAddr,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct AssertTimerMsg {
            pub key: MreKey,
            pub vif_index: u16,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct DownstreamExpiryMsg {
            pub key: MreKey,
            pub vif_index: u16,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct PrunePendingMsg {
            pub key: MreKey,
            pub vif_index: u16,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct BsrTimerMsg {
            pub zone_id: PimScopeZoneId,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct ScopeZoneExpiryMsg {
            pub zone_id: PimScopeZoneId,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct RpExpiryMsg {
            pub zone_id: PimScopeZoneId,
            pub group_prefix: ipnetwork::IpNetwork,
            pub rp_addr: IpAddr,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct CrpAdvTickMsg {}
    }
}

// ===== PIM tasks =====

// Applies a small negative jitter so that periodic timers across
// entries do not synchronize.
pub(crate) fn jittered(duration: Duration) -> Duration {
    let millis = duration.as_millis() as u64;
    let jitter = millis / 10;
    if jitter == 0 {
        return duration;
    }
    Duration::from_millis(
        millis - rand::random_range(0..=jitter),
    )
}

// Periodic Hello tick for one interface.
pub(crate) fn hello_interval(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let iface_id = iface.id;
        let interval =
            Duration::from_secs(iface.config.hello_period.into());
        let hello_intervalp =
            instance.tx.protocol_input.hello_interval.clone();

        IntervalTask::new(interval, true, move || {
            let hello_intervalp = hello_intervalp.clone();
            async move {
                let msg = messages::input::HelloIntervalMsg {
                    iface_key: iface_id.into(),
                };
                let _ = hello_intervalp.send(msg);
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// One-shot triggered Hello, used on startup and on triggered events so
// that Hellos on a LAN do not synchronize.
pub(crate) fn hello_triggered(
    delay: Duration,
    iface_id: InterfaceId,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let hello_intervalp =
            instance.tx.protocol_input.hello_interval.clone();

        TimeoutTask::new(delay, move || async move {
            let msg = messages::input::HelloIntervalMsg {
                iface_key: iface_id.into(),
            };
            let _ = hello_intervalp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Neighbor liveness timer.
pub(crate) fn nbr_liveness_timer(
    iface: &Interface,
    addr: IpAddr,
    holdtime: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let iface_id = iface.id;
        let nbr_timeoutp = instance.tx.protocol_input.nbr_timeout.clone();

        TimeoutTask::new(holdtime, move || async move {
            let msg = messages::input::NeighborTimeoutMsg {
                iface_key: iface_id.into(),
                addr,
            };
            let _ = nbr_timeoutp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Upstream join timer.
pub(crate) fn join_timer(
    key: MreKey,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let join_timerp = instance.tx.protocol_input.join_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::JoinTimerMsg { key };
            let _ = join_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Upstream override timer.
pub(crate) fn override_timer(
    key: MreKey,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let override_timerp =
            instance.tx.protocol_input.override_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::OverrideTimerMsg { key };
            let _ = override_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// (S,G) keepalive timer.
pub(crate) fn keepalive_timer(
    source: IpAddr,
    group: IpAddr,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let keepalive_timerp =
            instance.tx.protocol_input.keepalive_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::KeepaliveTimerMsg { source, group };
            let _ = keepalive_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Register-Stop timer at the DR.
pub(crate) fn register_stop_timer(
    source: IpAddr,
    group: IpAddr,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let register_stop_timerp =
            instance.tx.protocol_input.register_stop_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg =
                messages::input::RegisterStopTimerMsg { source, group };
            let _ = register_stop_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Per-vif assert timer.
pub(crate) fn assert_timer(
    key: MreKey,
    vif_index: u16,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let assert_timerp = instance.tx.protocol_input.assert_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::AssertTimerMsg { key, vif_index };
            let _ = assert_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Downstream per-vif expiry timer.
pub(crate) fn downstream_expiry_timer(
    key: MreKey,
    vif_index: u16,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let downstream_expiryp =
            instance.tx.protocol_input.downstream_expiry.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::DownstreamExpiryMsg { key, vif_index };
            let _ = downstream_expiryp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Downstream per-vif prune-pending timer.
pub(crate) fn prune_pending_timer(
    key: MreKey,
    vif_index: u16,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let prune_pendingp =
            instance.tx.protocol_input.prune_pending.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::PrunePendingMsg { key, vif_index };
            let _ = prune_pendingp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Per-zone bootstrap timer.
pub(crate) fn bsr_timer(
    zone_id: PimScopeZoneId,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let bsr_timerp = instance.tx.protocol_input.bsr_timer.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::BsrTimerMsg { zone_id };
            let _ = bsr_timerp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Scope zone expiry timer.
pub(crate) fn scope_zone_expiry_timer(
    zone_id: PimScopeZoneId,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let zone_expiryp = instance.tx.protocol_input.zone_expiry.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::ScopeZoneExpiryMsg { zone_id };
            let _ = zone_expiryp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Learned RP expiry timer.
pub(crate) fn rp_expiry_timer(
    zone_id: PimScopeZoneId,
    group_prefix: ipnetwork::IpNetwork,
    rp_addr: IpAddr,
    timeout: Duration,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let rp_expiryp = instance.tx.protocol_input.rp_expiry.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::RpExpiryMsg {
                zone_id,
                group_prefix,
                rp_addr,
            };
            let _ = rp_expiryp.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Periodic Candidate-RP advertisement tick.
pub(crate) fn cand_rp_adv_interval(
    instance: &InstanceUpView<'_>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let interval =
            Duration::from_secs(crate::consts::CAND_RP_ADV_PERIOD.into());
        let crp_adv_tickp = instance.tx.protocol_input.crp_adv_tick.clone();

        IntervalTask::new(interval, true, move || {
            let crp_adv_tickp = crp_adv_tickp.clone();
            async move {
                let msg = messages::input::CrpAdvTickMsg {};
                let _ = crp_adv_tickp.send(msg);
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}
