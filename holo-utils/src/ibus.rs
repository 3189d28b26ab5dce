//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::ip::AddressFamily;
use crate::protocol::Protocol;
use crate::southbound::{AddressMsg, InterfaceUpdateMsg};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

/// Transmit channels for sending [`IbusMsg`] messages to each base component.
#[derive(Clone, Debug)]
pub struct IbusChannelsTx {
    pub interface: UnboundedSender<IbusMsg>,
    pub rib: UnboundedSender<IbusMsg>,
    pub mld: UnboundedSender<IbusMsg>,
}

/// Receive channels for receiving [`IbusMsg`] messages from each base
/// component.
#[derive(Debug)]
pub struct IbusChannelsRx {
    pub interface: UnboundedReceiver<IbusMsg>,
    pub rib: UnboundedReceiver<IbusMsg>,
    pub mld: UnboundedReceiver<IbusMsg>,
}

/// Ibus message for communication among the multicast control-plane
/// components.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// Request a subscription to interface update notifications.
    InterfaceSub { af: Option<AddressFamily> },
    /// Interface update notification.
    InterfaceUpd(InterfaceUpdateMsg),
    /// Interface delete notification.
    InterfaceDel(String),
    /// Interface address addition notification.
    InterfaceAddressAdd(AddressMsg),
    /// Interface address delete notification.
    InterfaceAddressDel(AddressMsg),
    /// Request a subscription to unicast route redistribution used to
    /// maintain the MRIB.
    RouteRedistributeSub {
        protocol: Protocol,
        af: Option<AddressFamily>,
    },
    /// Start of a route redistribution transaction.
    RouteTransactionStart { tid: u32 },
    /// Route addition within a redistribution transaction.
    RouteTransactionAdd { tid: u32, route: RouteMsg },
    /// Route removal within a redistribution transaction.
    RouteTransactionDel { tid: u32, prefix: IpNetwork },
    /// Removal of all routes within a redistribution transaction.
    RouteTransactionDelAll { tid: u32 },
    /// Commit of a route redistribution transaction.
    RouteTransactionCommit { tid: u32 },
    /// Abort of a route redistribution transaction.
    RouteTransactionAbort { tid: u32 },
    /// Local membership addition reported by the group membership
    /// protocol (MLD/IGMP).
    MembershipAdd(MembershipMsg),
    /// Local membership removal reported by the group membership
    /// protocol (MLD/IGMP).
    MembershipDel(MembershipMsg),
    /// Cancel all previously requested subscriptions.
    Disconnect,
}

/// Unicast route used to populate the MRIB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub prefix: IpNetwork,
    pub nexthop_addr: IpAddr,
    pub nexthop_vif_index: u16,
    pub metric_preference: u32,
    pub metric: u32,
}

/// Local group membership reported by MLD/IGMP.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MembershipMsg {
    pub ifname: String,
    // Unspecified source stands for (*,G) membership.
    pub source: IpAddr,
    pub group: IpAddr,
    pub filter_mode: MembershipFilter,
}

/// Source filtering mode of a group membership.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MembershipFilter {
    Include,
    Exclude,
}

// ===== impl IbusChannelsTx =====

impl IbusChannelsTx {
    /// Sends an [`IbusMsg::InterfaceSub`] message to the interface
    /// component.
    pub fn interface_sub(&self, af: Option<AddressFamily>) {
        let msg = IbusMsg::InterfaceSub { af };
        let _ = self.interface.send(msg);
    }

    /// Sends an [`IbusMsg::RouteRedistributeSub`] message to the RIB
    /// component.
    pub fn route_redistribute_sub(
        &self,
        protocol: Protocol,
        af: Option<AddressFamily>,
    ) {
        let msg = IbusMsg::RouteRedistributeSub { protocol, af };
        let _ = self.rib.send(msg);
    }

    /// Sends an [`IbusMsg::Disconnect`] message to all base components.
    pub fn disconnect(&self) {
        for tx in [&self.interface, &self.rib, &self.mld] {
            let _ = tx.send(IbusMsg::Disconnect);
        }
    }
}

// ===== global functions =====

/// Creates a set of Ibus communication channels for inter-component
/// messaging.
///
/// Returns a tuple containing:
/// - An [`IbusChannelsTx`] instance, owned by the protocol engine.
/// - An [`IbusChannelsRx`] instance, where each receiver should be owned
///   by the corresponding base component.
pub fn ibus_channels() -> (IbusChannelsTx, IbusChannelsRx) {
    let (interface_tx, interface_rx) = mpsc::unbounded_channel();
    let (rib_tx, rib_rx) = mpsc::unbounded_channel();
    let (mld_tx, mld_rx) = mpsc::unbounded_channel();

    let tx = IbusChannelsTx {
        interface: interface_tx,
        rib: rib_tx,
        mld: mld_tx,
    };
    let rx = IbusChannelsRx {
        interface: interface_rx,
        rib: rib_rx,
        mld: mld_rx,
    };

    (tx, rx)
}
