//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use holo_utils::ibus::{IbusChannelsTx, IbusMsg, IbusReceiver};
use holo_utils::ip::AddressFamily;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{
    FeaRequestSender, FeaUpdate, FeaUpdateReceiver,
};
use holo_utils::task::{IntervalTask, Task};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::bsr::{BsrZone, PimScopeZoneId};
use crate::collections::Interfaces;
use crate::configuration::InstanceCfg;
use crate::debug::{Debug, InstanceInactiveReason, InterfaceInactiveReason};
use crate::mrib::Mrib;
use crate::mrt::Mrt;
use crate::packet::PacketType;
use crate::rp::RpSet;
use crate::tasks::messages::input::*;
use crate::tasks::messages::ProtocolInputMsg;
use crate::{bsr, events, mfc, rp};

pub struct Instance {
    // Instance name.
    pub name: String,
    // Instance address family.
    pub af: AddressFamily,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance arenas.
    pub arenas: InstanceArenas,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
}

#[derive(Debug)]
pub struct InstanceState {
    // Multicast RIB used for RPF lookups.
    pub mrib: Mrib,
    // Multicast routing table (MREs and MFCs).
    pub mrt: Mrt,
    // Effective RP-set (static plus Bootstrap-learned).
    pub rp_set: RpSet,
    // BSR zones, keyed by scope zone ID.
    pub bsr_zones: BTreeMap<PimScopeZoneId, BsrZone>,
    // Vif index of the Register pseudo-interface.
    pub register_vif_index: Option<u16>,
    // Candidate-RP advertisement task.
    pub cand_rp_adv_interval: Option<IntervalTask>,
    // Service state.
    pub service: ServiceState,
    pub startup_requests: u32,
    pub shutdown_requests: u32,
    // Statistics.
    pub statistics: Statistics,
}

#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub interfaces: Interfaces,
}

// Externally visible service state of the instance.
//
// The transition to Running happens only once all startup requests have
// completed, and to Stopped only once all shutdown requests have
// completed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceState {
    Startup,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Default)]
pub struct Statistics {
    pub discontinuity_time: DateTime<Utc>,
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
    pub errors: ErrorStatistics,
}

#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub total: u64,
    pub hello: u64,
    pub register: u64,
    pub register_stop: u64,
    pub join_prune: u64,
    pub bootstrap: u64,
    pub assert: u64,
    pub graft: u64,
    pub graft_ack: u64,
    pub cand_rp_adv: u64,
}

#[derive(Debug, Default)]
pub struct ErrorStatistics {
    pub total: u64,
    pub decode: u64,
    pub invalid_src_addr: u64,
    pub invalid_dst_addr: u64,
    pub unknown_neighbor: u64,
    pub register: u64,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    // Inter-component message bus.
    pub ibus: IbusChannelsTx,
    // Forwarding engine request channel.
    pub fea: FeaRequestSender,
    // Protocol input channels.
    pub protocol_input: ProtocolInputChannelsTx,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Hello interval tick.
    pub hello_interval: UnboundedSender<HelloIntervalMsg>,
    // Neighbor liveness timeout.
    pub nbr_timeout: UnboundedSender<NeighborTimeoutMsg>,
    // Upstream join timer.
    pub join_timer: UnboundedSender<JoinTimerMsg>,
    // Upstream override timer.
    pub override_timer: UnboundedSender<OverrideTimerMsg>,
    // (S,G) keepalive timer.
    pub keepalive_timer: UnboundedSender<KeepaliveTimerMsg>,
    // Register-Stop timer at the DR.
    pub register_stop_timer: UnboundedSender<RegisterStopTimerMsg>,
    // Per-vif assert timer.
    pub assert_timer: UnboundedSender<AssertTimerMsg>,
    // Downstream expiry timer.
    pub downstream_expiry: UnboundedSender<DownstreamExpiryMsg>,
    // Downstream prune-pending timer.
    pub prune_pending: UnboundedSender<PrunePendingMsg>,
    // Per-zone bootstrap timer.
    pub bsr_timer: UnboundedSender<BsrTimerMsg>,
    // Scope zone expiry timer.
    pub zone_expiry: UnboundedSender<ScopeZoneExpiryMsg>,
    // Learned RP expiry timer.
    pub rp_expiry: UnboundedSender<RpExpiryMsg>,
    // Candidate-RP advertisement tick.
    pub crp_adv_tick: UnboundedSender<CrpAdvTickMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub hello_interval: UnboundedReceiver<HelloIntervalMsg>,
    pub nbr_timeout: UnboundedReceiver<NeighborTimeoutMsg>,
    pub join_timer: UnboundedReceiver<JoinTimerMsg>,
    pub override_timer: UnboundedReceiver<OverrideTimerMsg>,
    pub keepalive_timer: UnboundedReceiver<KeepaliveTimerMsg>,
    pub register_stop_timer: UnboundedReceiver<RegisterStopTimerMsg>,
    pub assert_timer: UnboundedReceiver<AssertTimerMsg>,
    pub downstream_expiry: UnboundedReceiver<DownstreamExpiryMsg>,
    pub prune_pending: UnboundedReceiver<PrunePendingMsg>,
    pub bsr_timer: UnboundedReceiver<BsrTimerMsg>,
    pub zone_expiry: UnboundedReceiver<ScopeZoneExpiryMsg>,
    pub rp_expiry: UnboundedReceiver<RpExpiryMsg>,
    pub crp_adv_tick: UnboundedReceiver<CrpAdvTickMsg>,
}

pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub af: AddressFamily,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
}

// Instance input message.
#[derive(Debug)]
pub enum InstanceMsg {
    Ibus(IbusMsg),
    Fea(FeaUpdate),
    Protocol(ProtocolInputMsg),
}

// ===== impl Instance =====

impl Instance {
    pub const PROTOCOL: Protocol = Protocol::PIMSM;

    pub fn new(
        name: String,
        af: AddressFamily,
        tx: InstanceChannelsTx,
    ) -> Instance {
        Debug::InstanceCreate.log();

        Instance {
            name,
            af,
            config: Default::default(),
            state: None,
            arenas: Default::default(),
            tx,
        }
    }

    // Checks if the instance needs to be started or stopped in response to
    // a configuration or state change.
    pub fn update(&mut self) {
        match self.is_ready() {
            true if self.state.is_none() => {
                self.start();
            }
            false if self.state.is_some() => {
                self.stop(InstanceInactiveReason::AdminDown);
            }
            _ => (),
        }
    }

    fn start(&mut self) {
        Debug::InstanceStart.log();

        // Subscribe to the collaborating components.
        self.tx.ibus.interface_sub(Some(self.af));
        self.tx.ibus.route_redistribute_sub(Self::PROTOCOL, Some(self.af));

        self.state = Some(InstanceState::new());

        // Create the Register pseudo-vif, build the initial RP-set from
        // the static configuration and start the configured BSR zones.
        let (mut instance, arenas) = self.as_up().unwrap();
        crate::interface::register_vif_create(
            &mut instance,
            &mut arenas.interfaces,
        );
        rp::rp_set_rebuild(&mut instance, &arenas.interfaces);
        bsr::zones_config_apply(&mut instance, &arenas.interfaces);

        // With no registration outstanding the service is up already.
        if instance.state.startup_requests == 0 {
            instance.state.service = ServiceState::Running;
        }
    }

    fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };

        Debug::InstanceStop(reason).log();

        // Stop all interfaces.
        for iface_idx in arenas.interfaces.indexes().collect::<Vec<_>>() {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.stop(&mut instance, InterfaceInactiveReason::InstanceDown);
        }

        // Remove all installed forwarding state.
        mfc::delete_all(&mut instance);

        self.state = None;
    }

    fn is_ready(&self) -> bool {
        self.config.enabled
    }

    pub fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                af: self.af,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        if let Err(error) = events::process_ibus_msg(self, msg) {
            error.log();
        }
    }

    fn process_fea_update(&mut self, msg: FeaUpdate) {
        if let Err(error) = events::process_fea_update(self, msg) {
            error.log();
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        if let Err(error) = events::process_protocol_msg(self, msg) {
            error.log();
        }
    }

    pub fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (hello_intervalp, hello_intervalc) = mpsc::unbounded_channel();
        let (nbr_timeoutp, nbr_timeoutc) = mpsc::unbounded_channel();
        let (join_timerp, join_timerc) = mpsc::unbounded_channel();
        let (override_timerp, override_timerc) = mpsc::unbounded_channel();
        let (keepalive_timerp, keepalive_timerc) = mpsc::unbounded_channel();
        let (register_stop_timerp, register_stop_timerc) =
            mpsc::unbounded_channel();
        let (assert_timerp, assert_timerc) = mpsc::unbounded_channel();
        let (downstream_expiryp, downstream_expiryc) =
            mpsc::unbounded_channel();
        let (prune_pendingp, prune_pendingc) = mpsc::unbounded_channel();
        let (bsr_timerp, bsr_timerc) = mpsc::unbounded_channel();
        let (zone_expiryp, zone_expiryc) = mpsc::unbounded_channel();
        let (rp_expiryp, rp_expiryc) = mpsc::unbounded_channel();
        let (crp_adv_tickp, crp_adv_tickc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            hello_interval: hello_intervalp,
            nbr_timeout: nbr_timeoutp,
            join_timer: join_timerp,
            override_timer: override_timerp,
            keepalive_timer: keepalive_timerp,
            register_stop_timer: register_stop_timerp,
            assert_timer: assert_timerp,
            downstream_expiry: downstream_expiryp,
            prune_pending: prune_pendingp,
            bsr_timer: bsr_timerp,
            zone_expiry: zone_expiryp,
            rp_expiry: rp_expiryp,
            crp_adv_tick: crp_adv_tickp,
        };
        let rx = ProtocolInputChannelsRx {
            hello_interval: hello_intervalc,
            nbr_timeout: nbr_timeoutc,
            join_timer: join_timerc,
            override_timer: override_timerc,
            keepalive_timer: keepalive_timerc,
            register_stop_timer: register_stop_timerc,
            assert_timer: assert_timerc,
            downstream_expiry: downstream_expiryc,
            prune_pending: prune_pendingc,
            bsr_timer: bsr_timerc,
            zone_expiry: zone_expiryc,
            rp_expiry: rp_expiryc,
            crp_adv_tick: crp_adv_tickc,
        };

        (tx, rx)
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new() -> InstanceState {
        InstanceState {
            mrib: Default::default(),
            mrt: Default::default(),
            rp_set: Default::default(),
            bsr_zones: Default::default(),
            register_vif_index: None,
            cand_rp_adv_interval: None,
            service: ServiceState::Startup,
            startup_requests: 0,
            shutdown_requests: 0,
            statistics: Default::default(),
        }
    }

    // Accounts for an issued startup request.
    pub(crate) fn startup_request_sent(&mut self) {
        self.startup_requests += 1;
    }

    // Accounts for a completed startup request, transitioning the service
    // to Running once no request remains outstanding.
    pub(crate) fn startup_request_completed(&mut self) {
        self.startup_requests = self.startup_requests.saturating_sub(1);
        if self.startup_requests == 0
            && self.service == ServiceState::Startup
        {
            self.service = ServiceState::Running;
        }
    }

    pub(crate) fn shutdown_request_sent(&mut self) {
        self.shutdown_requests += 1;
        self.service = ServiceState::ShuttingDown;
    }

    pub(crate) fn shutdown_request_completed(&mut self) {
        self.shutdown_requests = self.shutdown_requests.saturating_sub(1);
        if self.shutdown_requests == 0
            && self.service == ServiceState::ShuttingDown
        {
            self.service = ServiceState::Stopped;
        }
    }
}

// ===== impl Statistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, pkt_type: PacketType) {
        self.total += 1;
        match pkt_type {
            PacketType::Hello => self.hello += 1,
            PacketType::Register => self.register += 1,
            PacketType::RegisterStop => self.register_stop += 1,
            PacketType::JoinPrune => self.join_prune += 1,
            PacketType::Bootstrap => self.bootstrap += 1,
            PacketType::Assert => self.assert += 1,
            PacketType::Graft => self.graft += 1,
            PacketType::GraftAck => self.graft_ack += 1,
            PacketType::CandRpAdv => self.cand_rp_adv += 1,
        }
    }
}

// ===== impl InstanceChannelsTx =====

impl InstanceChannelsTx {
    pub fn new(
        ibus: IbusChannelsTx,
        fea: FeaRequestSender,
        protocol_input: ProtocolInputChannelsTx,
    ) -> InstanceChannelsTx {
        InstanceChannelsTx {
            ibus,
            fea,
            protocol_input,
        }
    }
}

// ===== helper functions =====

// Instance input-event aggregator.
fn event_aggregator(
    mut ibus_rx: IbusReceiver,
    mut fea_rx: FeaUpdateReceiver,
    mut protocol_input_rx: ProtocolInputChannelsRx,
    agg_tx: mpsc::Sender<InstanceMsg>,
) -> Task<()> {
    Task::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                Some(msg) = ibus_rx.recv() => {
                    InstanceMsg::Ibus(msg)
                }
                Some(msg) = fea_rx.recv() => {
                    InstanceMsg::Fea(msg)
                }
                Some(msg) = protocol_input_rx.recv() => {
                    InstanceMsg::Protocol(msg)
                }
            };

            let _ = agg_tx.send(msg).await;
        }
    })
}

impl ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.hello_interval.recv() => {
                msg.map(ProtocolInputMsg::HelloInterval)
            }
            msg = self.nbr_timeout.recv() => {
                msg.map(ProtocolInputMsg::NeighborTimeout)
            }
            msg = self.join_timer.recv() => {
                msg.map(ProtocolInputMsg::JoinTimer)
            }
            msg = self.override_timer.recv() => {
                msg.map(ProtocolInputMsg::OverrideTimer)
            }
            msg = self.keepalive_timer.recv() => {
                msg.map(ProtocolInputMsg::KeepaliveTimer)
            }
            msg = self.register_stop_timer.recv() => {
                msg.map(ProtocolInputMsg::RegisterStopTimer)
            }
            msg = self.assert_timer.recv() => {
                msg.map(ProtocolInputMsg::AssertTimer)
            }
            msg = self.downstream_expiry.recv() => {
                msg.map(ProtocolInputMsg::DownstreamExpiry)
            }
            msg = self.prune_pending.recv() => {
                msg.map(ProtocolInputMsg::PrunePending)
            }
            msg = self.bsr_timer.recv() => {
                msg.map(ProtocolInputMsg::BsrTimer)
            }
            msg = self.zone_expiry.recv() => {
                msg.map(ProtocolInputMsg::ZoneExpiry)
            }
            msg = self.rp_expiry.recv() => {
                msg.map(ProtocolInputMsg::RpExpiry)
            }
            msg = self.crp_adv_tick.recv() => {
                msg.map(ProtocolInputMsg::CrpAdvTick)
            }
        }
    }
}

// Runs the instance event loop until the ibus channel closes.
//
// All event handlers run to completion; the only suspension points are
// between event-loop turns.
pub async fn run(
    mut instance: Instance,
    ibus_rx: IbusReceiver,
    fea_rx: FeaUpdateReceiver,
    protocol_input_rx: ProtocolInputChannelsRx,
) {
    let (agg_tx, mut agg_rx) = mpsc::channel(4);

    // Spawn event aggregator task.
    let _event_aggregator =
        event_aggregator(ibus_rx, fea_rx, protocol_input_rx, agg_tx);

    instance.update();

    // Main event loop.
    while let Some(msg) = agg_rx.recv().await {
        match msg {
            InstanceMsg::Ibus(msg) => {
                instance.process_ibus_msg(msg);
            }
            InstanceMsg::Fea(msg) => {
                instance.process_fea_update(msg);
            }
            InstanceMsg::Protocol(msg) => {
                instance.process_protocol_msg(msg);
            }
        }
    }

    instance.stop(InstanceInactiveReason::AdminDown);
}
