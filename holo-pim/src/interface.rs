//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use holo_utils::ip::IpAddrExt;
use holo_utils::southbound::InterfaceFlags;
use holo_utils::task::{IntervalTask, TimeoutTask};
use ipnetwork::IpNetwork;
use rand::Rng;

use crate::collections::{InterfaceId, InterfaceIndex, Interfaces};
use crate::configuration::InterfaceCfg;
use crate::consts::*;
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::instance::{InstanceUpView, MessageStatistics};
use crate::neighbor::Neighbor;
use crate::{southbound, tasks};

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    // Encapsulation-only pseudo-interface used for PIM Registers.
    pub is_register_vif: bool,
    pub system: InterfaceSys,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

#[derive(Debug, Default)]
pub struct InterfaceSys {
    pub flags: InterfaceFlags,
    pub ifindex: Option<u32>,
    pub mtu: Option<u32>,
    // Addresses configured on the interface, the first usable one being
    // the primary address.
    pub addr_list: Vec<IpNetwork>,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    pub active: bool,
    // Index identifying this vif in every bitset.
    pub vif_index: Option<u16>,
    // Generation ID advertised in Hello messages.
    pub genid: u32,
    // Address of the elected Designated Router.
    pub dr_addr: Option<IpAddr>,
    // Neighbors, keyed by primary address.
    pub neighbors: BTreeMap<IpAddr, Neighbor>,
    pub tasks: InterfaceTasks,
    pub statistics: VifStatistics,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<IntervalTask>,
    pub hello_triggered: Option<TimeoutTask>,
}

#[derive(Debug, Default)]
pub struct VifStatistics {
    pub msgs_rcvd: MessageStatistics,
    pub rx_errors: u64,
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, name: String) -> Interface {
        Debug::InterfaceCreate(&name).log();

        Interface {
            id,
            name,
            is_register_vif: false,
            system: InterfaceSys::default(),
            config: InterfaceCfg::default(),
            state: InterfaceState::default(),
        }
    }

    fn start(&mut self, instance: &mut InstanceUpView<'_>) {
        let vif_index = self.state.vif_index.unwrap();

        Debug::InterfaceStart(&self.name, vif_index).log();

        // A new Generation ID tells the neighbors this is a fresh
        // incarnation of the router on this link.
        self.state.genid = rand::rng().random();

        if !self.is_register_vif {
            // Ask the forwarding engine to deliver PIM packets arriving
            // on this vif.
            southbound::tx::protocol_register(instance, vif_index);
            southbound::tx::join_multicast_group(
                instance,
                vif_index,
                all_pim_routers(instance.af),
            );

            // Until a Hello is heard from somebody else, this router is
            // the DR.
            self.state.dr_addr = self.primary_addr();

            // Schedule the first (triggered) Hello and the periodic ones.
            let delay = rand::rng()
                .random_range(0..=self.config.hello_triggered_delay);
            self.state.tasks.hello_triggered =
                Some(tasks::hello_triggered(
                    Duration::from_secs(delay.into()),
                    self.id,
                    instance,
                ));
            self.state.tasks.hello_interval =
                Some(tasks::hello_interval(self, instance));
        }

        self.state.active = true;
    }

    pub(crate) fn stop(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        reason: InterfaceInactiveReason,
    ) {
        if !self.state.active {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        let vif_index = self.state.vif_index.unwrap();

        if !self.is_register_vif {
            southbound::tx::leave_multicast_group(
                instance,
                vif_index,
                all_pim_routers(instance.af),
            );
            southbound::tx::protocol_unregister(instance, vif_index);
        }

        // Drop all neighbors and cancel the Hello tasks.
        self.state.neighbors.clear();
        self.state.tasks = InterfaceTasks::default();
        self.state.dr_addr = None;
        self.state.active = false;
    }

    pub(crate) fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.config.enabled {
            return Err(InterfaceInactiveReason::AdminDown);
        }
        if self.is_register_vif {
            return Ok(());
        }
        if !self.system.flags.contains(InterfaceFlags::OPERATIVE) {
            return Err(InterfaceInactiveReason::OperationalDown);
        }
        if !self.system.flags.contains(InterfaceFlags::MULTICAST) {
            return Err(InterfaceInactiveReason::MulticastIncapable);
        }
        if self.system.ifindex.is_none() {
            return Err(InterfaceInactiveReason::MissingIfindex);
        }
        if self.primary_addr().is_none() {
            return Err(InterfaceInactiveReason::MissingPrimaryAddress);
        }
        Ok(())
    }

    // Returns the primary address used to source PIM messages on this
    // interface.
    pub(crate) fn primary_addr(&self) -> Option<IpAddr> {
        self.system
            .addr_list
            .iter()
            .map(|addr| addr.ip())
            .find(|addr| addr.is_usable())
    }

    // Returns the secondary addresses advertised in the Hello address
    // list.
    pub(crate) fn secondary_addrs(&self) -> Vec<IpAddr> {
        let primary = self.primary_addr();
        self.system
            .addr_list
            .iter()
            .map(|addr| addr.ip())
            .filter(|addr| addr.is_usable() && Some(*addr) != primary)
            .collect()
    }

    // Returns whether the given address lies on a directly connected
    // subnet (including configured alternative subnets).
    pub(crate) fn is_directly_connected(&self, addr: IpAddr) -> bool {
        if self.is_register_vif {
            return false;
        }
        self.system
            .addr_list
            .iter()
            .chain(self.config.alternative_subnets.iter())
            .any(|subnet| subnet.contains(addr))
    }

    // Runs the DR election for this interface.
    //
    // When every participant advertised a DR priority the highest
    // priority wins, with the higher address breaking ties. As soon as a
    // single participant omitted the option the election degrades to
    // highest address only.
    pub(crate) fn dr_election(&self) -> Option<IpAddr> {
        let local_addr = self.primary_addr()?;

        let use_priority = self
            .state
            .neighbors
            .values()
            .all(|nbr| nbr.dr_priority.is_some());

        let dr = if use_priority {
            self.state
                .neighbors
                .values()
                .map(|nbr| (nbr.dr_priority.unwrap(), nbr.addr))
                .chain(std::iter::once((
                    self.config.dr_priority,
                    local_addr,
                )))
                .max()
                .map(|(_, addr)| addr)
        } else {
            self.state
                .neighbors
                .keys()
                .copied()
                .chain(std::iter::once(local_addr))
                .max()
        };

        dr
    }

    // Re-runs the DR election, returning whether the result changed.
    pub(crate) fn dr_update(&mut self) -> bool {
        let dr = self.dr_election();
        if dr != self.state.dr_addr {
            Debug::InterfaceDrChange(&self.name, dr.as_ref()).log();
            self.state.dr_addr = dr;
            return true;
        }
        false
    }

    // Returns whether this router is the DR on this interface.
    pub(crate) fn is_dr(&self) -> bool {
        self.state.active
            && self.state.dr_addr.is_some()
            && self.state.dr_addr == self.primary_addr()
    }

    // Returns whether the LAN has enough neighbors for a PruneEcho to be
    // useful.
    pub(crate) fn lan_needs_prune_echo(&self) -> bool {
        self.state.neighbors.len() > 1
    }

    // Returns whether join suppression is enabled on the interface.
    //
    // Suppression stays on unless every neighbor advertised the LAN
    // Prune Delay option with the tracking bit set and local tracking
    // support was not administratively disabled.
    pub(crate) fn is_join_suppression_enabled(&self) -> bool {
        if self.config.is_tracking_support_disabled {
            return true;
        }
        !self
            .state
            .neighbors
            .values()
            .all(|nbr| nbr.tracking_support())
    }

    // Effective override interval of the LAN, in milliseconds.
    pub(crate) fn effective_override_interval(&self) -> u16 {
        self.state
            .neighbors
            .values()
            .filter_map(|nbr| nbr.lan_prune_delay.as_ref())
            .map(|lpd| lpd.override_interval)
            .chain(std::iter::once(self.config.override_interval))
            .max()
            .unwrap()
    }

    // Effective propagation delay of the LAN, in milliseconds.
    pub(crate) fn effective_propagation_delay(&self) -> u16 {
        self.state
            .neighbors
            .values()
            .filter_map(|nbr| nbr.lan_prune_delay.as_ref())
            .map(|lpd| lpd.propagation_delay)
            .chain(std::iter::once(self.config.propagation_delay))
            .max()
            .unwrap()
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        Debug::InterfaceDelete(&self.name).log();
    }
}

// ===== global functions =====

// Checks if the interface needs to be started or stopped in response to
// a configuration or system change.
pub(crate) fn update(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    iface_idx: InterfaceIndex,
) {
    let iface = &mut interfaces[iface_idx];

    match iface.is_ready() {
        Ok(()) if !iface.state.active => {
            // A vif index is assigned once and stays stable for the
            // lifetime of the interface.
            if iface.state.vif_index.is_none() {
                let vif_index = interfaces.next_free_vif_index();
                interfaces.update_vif_index(iface_idx, Some(vif_index));
            }
            let iface = &mut interfaces[iface_idx];
            iface.start(instance);
        }
        Err(reason) if iface.state.active => {
            iface.stop(instance, reason);
        }
        _ => (),
    }
}

// Creates the Register pseudo-vif used to encapsulate data packets
// toward the RP.
pub(crate) fn register_vif_create(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
) {
    let (iface_idx, iface) = interfaces.insert("pimreg");
    iface.is_register_vif = true;
    iface.config.enabled = true;

    let vif_index = interfaces.next_free_vif_index();
    interfaces.update_vif_index(iface_idx, Some(vif_index));
    instance.state.register_vif_index = Some(vif_index);

    let iface = &mut interfaces[iface_idx];
    iface.start(instance);
}

// Returns the vif whose subnet contains the given source address, if
// any.
pub(crate) fn find_directly_connected(
    interfaces: &Interfaces,
    addr: IpAddr,
) -> Option<&Interface> {
    interfaces
        .iter()
        .filter(|iface| iface.state.active && !iface.is_register_vif)
        .find(|iface| iface.is_directly_connected(addr))
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::Neighbor;

    fn test_iface() -> Interface {
        let mut iface = Interface::new(1, "eth0".to_owned());
        iface.system.addr_list.push("10.0.0.1/24".parse().unwrap());
        iface.config.dr_priority = 1;
        iface.state.active = true;
        iface
    }

    fn nbr(addr: &str, dr_priority: Option<u32>) -> Neighbor {
        let mut nbr = Neighbor::new(addr.parse().unwrap(), 2);
        nbr.dr_priority = dr_priority;
        nbr
    }

    #[test]
    fn dr_election_by_priority() {
        let mut iface = test_iface();
        iface
            .state
            .neighbors
            .insert("10.0.0.10".parse().unwrap(), nbr("10.0.0.10", Some(10)));
        iface
            .state
            .neighbors
            .insert("10.0.0.20".parse().unwrap(), nbr("10.0.0.20", Some(5)));

        // Highest priority wins even against a higher address.
        assert_eq!(
            iface.dr_election(),
            Some("10.0.0.10".parse().unwrap())
        );
    }

    #[test]
    fn dr_election_priority_tie_breaks_on_address() {
        let mut iface = test_iface();
        iface
            .state
            .neighbors
            .insert("10.0.0.10".parse().unwrap(), nbr("10.0.0.10", Some(1)));

        assert_eq!(
            iface.dr_election(),
            Some("10.0.0.10".parse().unwrap())
        );
    }

    #[test]
    fn dr_election_degrades_without_priority() {
        // One neighbor did not advertise a DR priority, so the election
        // uses the addresses only.
        let mut iface = test_iface();
        iface
            .state
            .neighbors
            .insert("10.0.0.10".parse().unwrap(), nbr("10.0.0.10", Some(1)));
        iface
            .state
            .neighbors
            .insert("10.0.0.20".parse().unwrap(), nbr("10.0.0.20", None));

        assert_eq!(
            iface.dr_election(),
            Some("10.0.0.20".parse().unwrap())
        );
    }

    #[test]
    fn dr_election_alone() {
        let iface = test_iface();
        assert_eq!(iface.dr_election(), Some("10.0.0.1".parse().unwrap()));
        assert!(iface.is_dr());
    }
}
