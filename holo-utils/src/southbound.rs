//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bitflags::bitflags;
use bytes::Bytes;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::mifset::Mifset;
use crate::protocol::Protocol;

// Useful type definition(s).
pub type FeaRequestSender = UnboundedSender<FeaRequest>;
pub type FeaRequestReceiver = UnboundedReceiver<FeaRequest>;
pub type FeaUpdateSender = UnboundedSender<FeaUpdate>;
pub type FeaUpdateReceiver = UnboundedReceiver<FeaUpdate>;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct InterfaceFlags: u8 {
        const LOOPBACK = 0x01;
        const OPERATIVE = 0x02;
        const BROADCAST = 0x04;
        const POINTOPOINT = 0x08;
        const MULTICAST = 0x10;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AddressFlags: u8 {
        const UNNUMBERED = 0x01;
    }
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceUpdateMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub flags: InterfaceFlags,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub ifname: String,
    pub addr: IpNetwork,
    pub flags: AddressFlags,
}

/// Request sent by the multicast control plane to the forwarding engine.
///
/// All requests for a given (source, group) travel over a single ordered
/// channel, so an MFC delete can never overtake the install that preceded
/// it.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum FeaRequest {
    /// Request delivery of the protocol's packets arriving on a vif.
    ProtocolRegister { protocol: Protocol, vif_index: u16 },
    /// Stop delivery of the protocol's packets arriving on a vif.
    ProtocolUnregister { protocol: Protocol, vif_index: u16 },
    /// Transmit a protocol packet.
    PacketSend(PacketSendMsg),
    /// Join a multicast group on a vif at the link layer.
    JoinMulticastGroup { vif_index: u16, group: IpAddr },
    /// Leave a multicast group on a vif at the link layer.
    LeaveMulticastGroup { vif_index: u16, group: IpAddr },
    /// Install or update a multicast forwarding cache entry.
    MfcAdd(MfcAddMsg),
    /// Remove a multicast forwarding cache entry.
    MfcDelete { source: IpAddr, group: IpAddr },
    /// Install a dataflow monitor for a (source, group) flow.
    DataflowMonitorAdd(DataflowMonitorMsg),
    /// Remove a previously installed dataflow monitor.
    DataflowMonitorDelete(DataflowMonitorMsg),
    /// Remove all dataflow monitors for a (source, group) flow.
    DataflowMonitorDeleteAll { source: IpAddr, group: IpAddr },
}

/// Update delivered by the forwarding engine to the multicast control
/// plane.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum FeaUpdate {
    /// Inbound protocol packet.
    PacketRecv(PacketRecvMsg),
    /// Kernel upcall (NOCACHE/WRONGVIF/WHOLEPKT).
    KernelSignal(KernelSignalMsg),
    /// A dataflow monitor has fired.
    DataflowSignal(DataflowSignalMsg),
    /// Completion of a protocol (un)registration request.
    ProtocolRegistrationResult {
        protocol: Protocol,
        vif_index: u16,
        unregister: bool,
        result: FeaResult,
    },
    /// Completion of an MFC or dataflow monitor request.
    MfcResult {
        source: IpAddr,
        group: IpAddr,
        result: FeaResult,
    },
}

/// Outcome of a forwarding-engine request.
///
/// Transient errors are retried by the caller with back-off; permanent
/// failures are logged and the request is not retried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FeaResult {
    Success,
    Transient,
    CommandFailed,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct PacketSendMsg {
    pub vif_index: u16,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub ttl: u8,
    pub tos: u8,
    pub router_alert: bool,
    pub internet_control: bool,
    pub payload: Bytes,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct PacketRecvMsg {
    pub vif_index: u16,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub ttl: u8,
    pub payload: Bytes,
}

/// Kernel signal raised by the forwarding plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum KernelSignalType {
    /// No forwarding cache entry exists for an arriving flow.
    NoCache,
    /// A packet for a known flow arrived on an unexpected vif.
    WrongVif,
    /// Whole-packet upcall used for PIM Register encapsulation.
    WholePacket,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct KernelSignalMsg {
    pub signal_type: KernelSignalType,
    pub vif_index: u16,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub payload: Bytes,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct MfcAddMsg {
    pub source: IpAddr,
    pub group: IpAddr,
    pub iif_vif_index: u16,
    pub olist: Mifset,
    pub olist_disable_wrongvif: Mifset,
    pub rp_addr: IpAddr,
    pub distance: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DataflowMonitorMsg {
    pub source: IpAddr,
    pub group: IpAddr,
    pub threshold_interval_sec: u32,
    pub threshold_packets: u32,
    pub threshold_bytes: u32,
    pub is_threshold_in_packets: bool,
    pub is_threshold_in_bytes: bool,
    pub is_geq_upcall: bool,
    pub is_leq_upcall: bool,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct DataflowSignalMsg {
    pub source: IpAddr,
    pub group: IpAddr,
    pub threshold_interval_sec: u32,
    pub threshold_packets: u32,
    pub threshold_bytes: u32,
    pub measured_interval_sec: u32,
    pub measured_packets: u32,
    pub measured_bytes: u32,
    pub is_threshold_in_packets: bool,
    pub is_threshold_in_bytes: bool,
    pub is_geq_upcall: bool,
    pub is_leq_upcall: bool,
}
