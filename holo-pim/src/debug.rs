//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use holo_utils::mifset::Mifset;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::bsr::{self, PimScopeZoneId};
use crate::mrt::MreKey;
use crate::mrt::{assert, downstream, register, upstream};
use crate::packet::Packet;

// PIM debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceCreate,
    InstanceStart,
    InstanceStop(InstanceInactiveReason),
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceDelete(&'a str),
    InterfaceStart(&'a str, u16),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    InterfaceDrChange(&'a str, Option<&'a IpAddr>),
    // Neighbors
    NeighborCreate(&'a IpAddr),
    NeighborDelete(&'a IpAddr, NeighborDeleteReason),
    NeighborRestart(&'a IpAddr),
    // Network
    PacketRx(&'a str, &'a IpAddr, &'a Packet),
    PacketTx(u16, &'a IpAddr, &'a Packet),
    // Multicast routing entries
    MreCreate(&'a MreKey),
    MreDelete(&'a MreKey),
    UpstreamTransition(&'a MreKey, upstream::State, upstream::State),
    SgRptUpstreamTransition(&'a MreKey, upstream::RptState, upstream::RptState),
    DownstreamTransition(
        &'a MreKey,
        u16,
        downstream::State,
        downstream::State,
    ),
    AssertTransition(&'a MreKey, u16, assert::State, assert::State),
    RegisterTransition(&'a IpAddr, &'a IpAddr, register::State, register::State),
    // Forwarding cache
    MfcInstall(&'a IpAddr, &'a IpAddr, u16, &'a Mifset),
    MfcDelete(&'a IpAddr, &'a IpAddr),
    DataflowMonitorInstall(&'a IpAddr, &'a IpAddr, u32),
    SptSwitch(&'a IpAddr, &'a IpAddr),
    // Bootstrap and RP-set
    BsrTransition(&'a PimScopeZoneId, bsr::State, bsr::State),
    BsrElected(&'a PimScopeZoneId, &'a IpAddr),
    RpSetChange(&'a PimScopeZoneId),
    // MRIB
    MribCommit(u32),
}

// Reason why a PIM instance is inactive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceInactiveReason {
    AdminDown,
    Resetting,
}

// Reason why PIM is inactive on an interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingPrimaryAddress,
    MulticastIncapable,
}

// Reason why a neighbor is being deleted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NeighborDeleteReason {
    LivenessTimeout,
    ZeroHoldtime,
    InterfaceDown,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate | Debug::InstanceStart => {
                // Parent span(s): pim-instance
                debug!("{}", self);
            }
            Debug::InstanceStop(reason) => {
                // Parent span(s): pim-instance
                debug!(?reason, "{}", self);
            }
            Debug::InterfaceCreate(name) | Debug::InterfaceDelete(name) => {
                // Parent span(s): pim-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::InterfaceStart(name, vif_index) => {
                // Parent span(s): pim-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%vif_index, "{}", self);
                })
            }
            Debug::InterfaceStop(name, reason) => {
                // Parent span(s): pim-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?reason, "{}", self);
                })
            }
            Debug::InterfaceDrChange(name, dr) => {
                // Parent span(s): pim-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?dr, "{}", self);
                })
            }
            Debug::NeighborCreate(addr) | Debug::NeighborRestart(addr) => {
                // Parent span(s): pim-instance
                debug_span!("neighbor", address = %addr).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NeighborDelete(addr, reason) => {
                // Parent span(s): pim-instance
                debug_span!("neighbor", address = %addr).in_scope(|| {
                    debug!(?reason, "{}", self);
                })
            }
            Debug::PacketRx(ifname, src, packet) => {
                // Parent span(s): pim-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&packet).unwrap();
                        debug!(%ifname, source = %src, %data, "{}", self);
                    })
                })
            }
            Debug::PacketTx(vif_index, dst, packet) => {
                // Parent span(s): pim-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&packet).unwrap();
                        debug!(%vif_index, destination = %dst, %data, "{}", self);
                    })
                })
            }
            Debug::MreCreate(key) | Debug::MreDelete(key) => {
                // Parent span(s): pim-instance
                debug!(?key, "{}", self);
            }
            Debug::UpstreamTransition(key, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "upstream").in_scope(|| {
                    debug!(?key, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::SgRptUpstreamTransition(key, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "upstream-rpt").in_scope(|| {
                    debug!(?key, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::DownstreamTransition(key, vif_index, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "downstream").in_scope(|| {
                    debug!(?key, %vif_index, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::AssertTransition(key, vif_index, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "assert").in_scope(|| {
                    debug!(?key, %vif_index, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::RegisterTransition(source, group, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "register").in_scope(|| {
                    debug!(%source, %group, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::MfcInstall(source, group, iif_vif_index, olist) => {
                // Parent span(s): pim-instance
                debug!(%source, %group, %iif_vif_index, ?olist, "{}", self);
            }
            Debug::MfcDelete(source, group) => {
                // Parent span(s): pim-instance
                debug!(%source, %group, "{}", self);
            }
            Debug::DataflowMonitorInstall(source, group, interval) => {
                // Parent span(s): pim-instance
                debug!(%source, %group, %interval, "{}", self);
            }
            Debug::SptSwitch(source, group) => {
                // Parent span(s): pim-instance
                debug!(%source, %group, "{}", self);
            }
            Debug::BsrTransition(zone_id, old_state, new_state) => {
                // Parent span(s): pim-instance
                debug_span!("fsm", kind = "bsr").in_scope(|| {
                    debug!(?zone_id, ?old_state, ?new_state, "{}", self);
                })
            }
            Debug::BsrElected(zone_id, bsr_addr) => {
                // Parent span(s): pim-instance
                debug!(?zone_id, %bsr_addr, "{}", self);
            }
            Debug::RpSetChange(zone_id) => {
                // Parent span(s): pim-instance
                debug!(?zone_id, "{}", self);
            }
            Debug::MribCommit(tid) => {
                // Parent span(s): pim-instance
                debug!(%tid, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop(..) => {
                write!(f, "stopping instance")
            }
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceDelete(..) => {
                write!(f, "interface deleted")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::InterfaceDrChange(..) => {
                write!(f, "designated router changed")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NeighborRestart(..) => {
                write!(f, "neighbor restarted (GenID change)")
            }
            Debug::PacketRx(..) => {
                write!(f, "packet received")
            }
            Debug::PacketTx(..) => {
                write!(f, "packet sent")
            }
            Debug::MreCreate(..) => {
                write!(f, "routing entry created")
            }
            Debug::MreDelete(..) => {
                write!(f, "routing entry deleted")
            }
            Debug::UpstreamTransition(..)
            | Debug::SgRptUpstreamTransition(..)
            | Debug::DownstreamTransition(..)
            | Debug::AssertTransition(..)
            | Debug::RegisterTransition(..)
            | Debug::BsrTransition(..) => {
                write!(f, "state transition")
            }
            Debug::MfcInstall(..) => {
                write!(f, "installing forwarding cache entry")
            }
            Debug::MfcDelete(..) => {
                write!(f, "deleting forwarding cache entry")
            }
            Debug::DataflowMonitorInstall(..) => {
                write!(f, "installing dataflow monitor")
            }
            Debug::SptSwitch(..) => {
                write!(f, "initiating switch to the shortest-path tree")
            }
            Debug::BsrElected(..) => {
                write!(f, "bootstrap router elected")
            }
            Debug::RpSetChange(..) => {
                write!(f, "RP-set changed")
            }
            Debug::MribCommit(..) => {
                write!(f, "MRIB transaction committed")
            }
        }
    }
}
