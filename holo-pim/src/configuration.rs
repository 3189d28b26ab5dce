//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use holo_utils::ip::IpAddrExt;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::debug::InterfaceInactiveReason;
use crate::error::ConfigError;
use crate::instance::Instance;
use crate::{interface, mrt};

// PIM instance configuration.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    pub enabled: bool,
    pub spt_threshold: SptThresholdCfg,
    pub static_rps: Vec<StaticRpCfg>,
    pub candidate_bsrs: Vec<CandidateBsrCfg>,
    pub candidate_rps: Vec<CandidateRpCfg>,
    pub scope_zones: Vec<ScopeZoneCfg>,
}

// Shortest-path-tree switchover policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SptThresholdCfg {
    pub enabled: bool,
    pub interval_sec: u32,
    pub bytes: u32,
}

// Statically configured RP for a group prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct StaticRpCfg {
    pub group_prefix: IpNetwork,
    pub rp_addr: IpAddr,
    pub priority: u8,
    pub hash_mask_len: u8,
}

// Candidate-BSR configuration for a scope zone.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct CandidateBsrCfg {
    pub scope_zone: IpNetwork,
    pub is_scope_zone: bool,
    pub ifname: String,
    pub priority: u8,
    pub hash_mask_len: u8,
}

// Candidate-RP configuration for a group prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct CandidateRpCfg {
    pub group_prefix: IpNetwork,
    pub is_scope_zone: bool,
    pub ifname: String,
    pub priority: u8,
    pub holdtime: u16,
}

// Administratively scoped zone boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ScopeZoneCfg {
    pub prefix: IpNetwork,
    pub ifnames: Vec<String>,
}

// PIM interface configuration.
#[derive(Clone, Debug)]
pub struct InterfaceCfg {
    pub enabled: bool,
    pub proto_version: u8,
    pub hello_period: u16,
    pub hello_holdtime: u16,
    pub hello_triggered_delay: u16,
    pub dr_priority: u32,
    pub propagation_delay: u16,
    pub override_interval: u16,
    pub join_prune_period: u16,
    pub join_prune_holdtime: u16,
    pub accept_nohello_neighbors: bool,
    pub is_tracking_support_disabled: bool,
    // Prefixes whose sources are treated as directly connected.
    pub alternative_subnets: Vec<IpNetwork>,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    // Adds a static RP for a group prefix.
    pub fn add_static_rp(
        &mut self,
        group_prefix: IpNetwork,
        rp_addr: IpAddr,
        priority: u8,
        hash_mask_len: u8,
    ) -> Result<(), ConfigError> {
        if !group_prefix.ip().is_multicast() {
            return Err(ConfigError::PrefixNotMulticast(group_prefix));
        }
        if !rp_addr.is_usable() {
            return Err(ConfigError::AddressFamilyMismatch(rp_addr));
        }
        if hash_mask_len > rp_addr.address_family().max_prefixlen() {
            return Err(ConfigError::MaskLengthOutOfRange(hash_mask_len));
        }

        let cfg = StaticRpCfg {
            group_prefix,
            rp_addr,
            priority,
            hash_mask_len,
        };
        self.static_rps
            .retain(|rp| {
                rp.group_prefix != group_prefix || rp.rp_addr != rp_addr
            });
        self.static_rps.push(cfg);
        Ok(())
    }

    // Removes a static RP from a group prefix.
    pub fn remove_static_rp(
        &mut self,
        group_prefix: &IpNetwork,
        rp_addr: &IpAddr,
    ) {
        self.static_rps.retain(|rp| {
            rp.group_prefix != *group_prefix || rp.rp_addr != *rp_addr
        });
    }

    // Adds an administratively scoped zone.
    //
    // Scope zones must not overlap each other.
    pub fn add_scope_zone(
        &mut self,
        prefix: IpNetwork,
        ifnames: Vec<String>,
    ) -> Result<(), ConfigError> {
        if !prefix.ip().is_multicast() {
            return Err(ConfigError::PrefixNotMulticast(prefix));
        }
        for zone in &self.scope_zones {
            if zone.prefix.contains(prefix.ip())
                || prefix.contains(zone.prefix.ip())
            {
                return Err(ConfigError::ScopeZoneOverlap(prefix));
            }
        }
        self.scope_zones.push(ScopeZoneCfg { prefix, ifnames });
        Ok(())
    }

    // Configures this router as a Candidate-BSR for a scope zone.
    pub fn add_candidate_bsr(
        &mut self,
        cfg: CandidateBsrCfg,
    ) -> Result<(), ConfigError> {
        if cfg.hash_mask_len > cfg.scope_zone.ip().address_family().max_prefixlen()
        {
            return Err(ConfigError::MaskLengthOutOfRange(cfg.hash_mask_len));
        }
        self.candidate_bsrs
            .retain(|bsr| bsr.scope_zone != cfg.scope_zone);
        self.candidate_bsrs.push(cfg);
        Ok(())
    }

    // Configures this router as a Candidate-RP for a group prefix.
    pub fn add_candidate_rp(
        &mut self,
        cfg: CandidateRpCfg,
    ) -> Result<(), ConfigError> {
        if !cfg.group_prefix.ip().is_multicast() {
            return Err(ConfigError::PrefixNotMulticast(cfg.group_prefix));
        }
        self.candidate_rps
            .retain(|rp| rp.group_prefix != cfg.group_prefix);
        self.candidate_rps.push(cfg);
        Ok(())
    }

    // Updates the SPT switchover policy.
    pub fn set_spt_threshold(
        &mut self,
        enabled: bool,
        interval_sec: u32,
        bytes: u32,
    ) -> Result<(), ConfigError> {
        if enabled && interval_sec == 0 {
            return Err(ConfigError::IntervalOutOfRange(interval_sec));
        }
        self.spt_threshold = SptThresholdCfg {
            enabled,
            interval_sec,
            bytes,
        };
        Ok(())
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            enabled: true,
            spt_threshold: SptThresholdCfg {
                enabled: false,
                interval_sec: 100,
                bytes: 0,
            },
            static_rps: Vec::new(),
            candidate_bsrs: Vec::new(),
            candidate_rps: Vec::new(),
            scope_zones: Vec::new(),
        }
    }
}

// ===== impl InterfaceCfg =====

impl InterfaceCfg {
    // Updates the Hello period, deriving the holdtime when the operator
    // did not pin it explicitly.
    pub fn set_hello_period(
        &mut self,
        hello_period: u16,
    ) -> Result<(), ConfigError> {
        if hello_period == 0 {
            return Err(ConfigError::IntervalOutOfRange(hello_period as u32));
        }
        self.hello_period = hello_period;
        self.hello_holdtime = hello_period.saturating_mul(7) / 2;
        Ok(())
    }

    pub fn set_hello_holdtime(
        &mut self,
        hello_holdtime: u16,
    ) -> Result<(), ConfigError> {
        if hello_holdtime != 0 && hello_holdtime <= self.hello_period {
            return Err(ConfigError::HoldtimeTooShort(hello_holdtime));
        }
        self.hello_holdtime = hello_holdtime;
        Ok(())
    }

    pub fn set_join_prune_period(
        &mut self,
        join_prune_period: u16,
    ) -> Result<(), ConfigError> {
        if join_prune_period == 0 {
            return Err(ConfigError::IntervalOutOfRange(
                join_prune_period as u32,
            ));
        }
        self.join_prune_period = join_prune_period;
        self.join_prune_holdtime = join_prune_period.saturating_mul(7) / 2;
        Ok(())
    }
}

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            enabled: false,
            proto_version: 2,
            hello_period: HELLO_PERIOD,
            hello_holdtime: HELLO_HOLDTIME,
            hello_triggered_delay: HELLO_TRIGGERED_DELAY,
            dr_priority: DR_PRIORITY,
            propagation_delay: PROPAGATION_DELAY_MSEC,
            override_interval: OVERRIDE_INTERVAL_MSEC,
            join_prune_period: JOIN_PRUNE_PERIOD,
            join_prune_holdtime: JOIN_PRUNE_HOLDTIME,
            accept_nohello_neighbors: false,
            is_tracking_support_disabled: false,
            alternative_subnets: Vec::new(),
        }
    }
}

// ===== global functions =====

// Enables PIM on a vif; the vif starts as soon as it is operationally
// ready.
pub fn enable_vif(
    instance: &mut Instance,
    ifname: &str,
) -> Result<(), ConfigError> {
    let (_, iface) = instance
        .arenas
        .interfaces
        .get_mut_by_name(ifname)
        .ok_or_else(|| ConfigError::VifNameNotKnown(ifname.to_owned()))?;
    if iface.config.enabled {
        return Err(ConfigError::VifAlreadyEnabled(ifname.to_owned()));
    }
    iface.config.enabled = true;
    start_vif(instance, ifname)
}

// Starts a vif if it is ready.
pub fn start_vif(
    instance: &mut Instance,
    ifname: &str,
) -> Result<(), ConfigError> {
    let (iface_idx, _) = instance
        .arenas
        .interfaces
        .get_by_name(ifname)
        .ok_or_else(|| ConfigError::VifNameNotKnown(ifname.to_owned()))?;
    if let Some((mut instance, arenas)) = instance.as_up() {
        interface::update(&mut instance, &mut arenas.interfaces, iface_idx);
    }
    Ok(())
}

// Stops and disables PIM on a vif.
pub fn stop_vif(
    instance: &mut Instance,
    ifname: &str,
) -> Result<(), ConfigError> {
    let (iface_idx, iface) = instance
        .arenas
        .interfaces
        .get_mut_by_name(ifname)
        .ok_or_else(|| ConfigError::VifNameNotKnown(ifname.to_owned()))?;
    iface.config.enabled = false;
    let vif_index = iface.state.vif_index;

    if let Some((mut instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.stop(&mut instance, InterfaceInactiveReason::AdminDown);
        if let Some(vif_index) = vif_index {
            mrt::vif_down(&mut instance, &arenas.interfaces, vif_index);
        }
    }
    Ok(())
}
