//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use holo_utils::ip::{AddressFamily, IpAddrExt};
use holo_utils::task::TimeoutTask;
use ipnetwork::IpNetwork;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::collections::Interfaces;
use crate::configuration::CandidateBsrCfg;
use crate::consts::*;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::bootstrap::{
    BootstrapGroup, BootstrapMsg, BootstrapRp, CandRpAdvMsg,
};
use crate::packet::EncodedGroup;
use crate::{mrt, output, rp, tasks};

// Identifier of a BSR scope zone.
//
// Two zones are equal only when both the prefix and the scope flag
// match.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PimScopeZoneId {
    pub prefix: IpNetwork,
    pub is_scope_zone: bool,
}

// Per-zone BSR election state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    NoInfo,
    // This router is a candidate and somebody else is the BSR.
    Candidate,
    // This router is a candidate waiting out the election.
    Pending,
    // This router is the elected BSR.
    Elected,
    // Not a candidate; accept any bootstrap.
    AcceptAny,
    // Not a candidate; a BSR is known and only preferred bootstraps are
    // accepted.
    AcceptPreferred,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    BsrTimerExpiry,
    RecvPreferredBsm,
    RecvNonPreferredBsm,
    ZoneExpiry,
}

// One BSR scope zone.
#[derive(Debug)]
pub struct BsrZone {
    pub zone_id: PimScopeZoneId,
    pub state: State,
    // The BSR currently accepted in this zone.
    pub bsr_addr: Option<IpAddr>,
    pub bsr_priority: u8,
    pub hash_mask_len: u8,
    // Tag of the bootstrap burst currently being received or sent.
    pub fragment_tag: u16,
    // Candidate-BSR configuration, when this router competes in the
    // zone.
    pub local: Option<CandidateBsrCfg>,
    // Group prefixes and their candidate RPs, as collected from
    // Candidate-RP advertisements (elected BSR) or learned from
    // bootstrap messages (other routers).
    pub prefixes: BTreeMap<IpNetwork, BsrGroupPrefix>,
    pub bsr_timer: Option<TimeoutTask>,
    pub expiry_timer: Option<TimeoutTask>,
}

#[derive(Debug, Default)]
pub struct BsrGroupPrefix {
    // Number of RPs expected across all fragments of the burst.
    pub expected_rp_count: u8,
    pub rps: Vec<BsrRp>,
}

#[derive(Debug)]
pub struct BsrRp {
    pub rp_addr: IpAddr,
    pub priority: u8,
    pub holdtime: u16,
    pub expiry_timer: Option<TimeoutTask>,
}

// ===== impl PimScopeZoneId =====

impl PimScopeZoneId {
    pub(crate) fn global(af: AddressFamily) -> PimScopeZoneId {
        PimScopeZoneId {
            prefix: af.multicast_prefix(),
            is_scope_zone: false,
        }
    }
}

// ===== impl BsrZone =====

impl BsrZone {
    fn new(zone_id: PimScopeZoneId) -> BsrZone {
        BsrZone {
            zone_id,
            state: State::default(),
            bsr_addr: None,
            bsr_priority: 0,
            hash_mask_len: zone_id.prefix.ip().address_family().max_prefixlen()
                - 2,
            fragment_tag: 0,
            local: None,
            prefixes: Default::default(),
            bsr_timer: None,
            expiry_timer: None,
        }
    }

    // The (priority, address) pair this zone's current BSR wins with.
    fn current_weight(&self) -> Option<(u8, IpAddr)> {
        self.bsr_addr.map(|addr| (self.bsr_priority, addr))
    }

    fn transition(&mut self, new_state: State) {
        if new_state != self.state {
            Debug::BsrTransition(&self.zone_id, self.state, new_state).log();
            self.state = new_state;
        }
    }
}

// ===== global functions =====

// Creates the zones found in the instance configuration: one per
// Candidate-BSR plus the always-present global zone.
pub(crate) fn zones_config_apply(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let global_zone_id = PimScopeZoneId::global(instance.af);
    instance
        .state
        .bsr_zones
        .entry(global_zone_id)
        .or_insert_with(|| {
            let mut zone = BsrZone::new(global_zone_id);
            zone.state = State::AcceptAny;
            zone
        });

    let candidate_bsrs = instance.config.candidate_bsrs.clone();
    for cfg in candidate_bsrs {
        let zone_id = PimScopeZoneId {
            prefix: cfg.scope_zone,
            is_scope_zone: cfg.is_scope_zone,
        };
        let hash_mask_len = cfg.hash_mask_len;
        let timeout = bootstrap_rand_override(&cfg);
        let timer = tasks::bsr_timer(zone_id, timeout, instance);

        let zone = instance
            .state
            .bsr_zones
            .entry(zone_id)
            .or_insert_with(|| BsrZone::new(zone_id));
        zone.local = Some(cfg);
        zone.hash_mask_len = hash_mask_len;
        zone.transition(State::Pending);
        zone.bsr_timer = Some(timer);
    }

    // Candidate-RPs advertise periodically toward the elected BSR.
    if !instance.config.candidate_rps.is_empty() {
        instance.state.cand_rp_adv_interval =
            Some(tasks::cand_rp_adv_interval(instance));
    }
}

// Processes a received Bootstrap message.
pub(crate) fn process_bootstrap(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    vif_index: u16,
    src: IpAddr,
    msg: BootstrapMsg,
) -> Result<(), Error> {
    let zone_id = message_zone_id(instance.af, &msg);

    // Bootstrap messages for a scope zone never cross interfaces not
    // bound to the zone.
    if zone_id.is_scope_zone
        && !zone_vifs(instance, interfaces, &zone_id).contains(&vif_index)
    {
        return Ok(());
    }

    // The message must arrive on the RPF interface toward the claimed
    // BSR, from a directly reachable neighbor.
    let rpf_vif =
        mrt::rpf_interface(instance.state, interfaces, msg.bsr_addr);
    if rpf_vif != Some(vif_index) {
        return Err(Error::InvalidSrcAddr(src));
    }

    let zone = instance
        .state
        .bsr_zones
        .entry(zone_id)
        .or_insert_with(|| BsrZone::new(zone_id));

    // Compare the claimed BSR against the current one; higher
    // (priority, address) wins.
    let msg_weight = (msg.bsr_priority, msg.bsr_addr);
    let preferred = match zone.state {
        State::AcceptAny | State::NoInfo => true,
        _ if zone.bsr_addr == Some(msg.bsr_addr) => true,
        _ => Some(msg_weight) > zone.current_weight(),
    };
    let is_candidate = zone.local.is_some();
    let local_better = zone
        .local
        .as_ref()
        .and_then(|local| {
            cand_bsr_addr(interfaces, local)
                .map(|addr| (local.priority, addr))
        })
        .is_some_and(|weight| weight > msg_weight);
    let is_elected = zone.state == State::Elected;

    // A candidate with a better claim of its own discards the message.
    if local_better {
        if is_elected {
            // Defend the election by re-originating our own bootstrap.
            originate_bootstrap(instance, interfaces, zone_id);
        }
        return Ok(());
    }

    if !preferred {
        return Ok(());
    }

    // Adopt the BSR. A receiver accepts fragments only with a matching
    // tag within a burst; a new tag starts a new burst.
    let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
    let new_burst = zone.fragment_tag != msg.fragment_tag;
    zone.bsr_addr = Some(msg.bsr_addr);
    zone.bsr_priority = msg.bsr_priority;
    zone.hash_mask_len = msg.hash_mask_len;
    zone.fragment_tag = msg.fragment_tag;
    zone.transition(if is_candidate {
        State::Candidate
    } else {
        State::AcceptPreferred
    });

    for group in &msg.groups {
        let Ok(prefix) =
            IpNetwork::new(group.group.group, group.group.mask_len)
        else {
            continue;
        };

        let mut new_rps = vec![];
        for rp in &group.rps {
            let expiry_timer = (rp.holdtime != 0).then(|| {
                tasks::rp_expiry_timer(
                    zone_id,
                    prefix,
                    rp.rp_addr,
                    Duration::from_secs(rp.holdtime.into()),
                    instance,
                )
            });
            new_rps.push(BsrRp {
                rp_addr: rp.rp_addr,
                priority: rp.priority,
                holdtime: rp.holdtime,
                expiry_timer,
            });
        }

        let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
        let entry = zone.prefixes.entry(prefix).or_default();
        entry.expected_rp_count = group.rp_count;
        if new_burst {
            entry.rps.clear();
        }
        for new_rp in new_rps {
            entry.rps.retain(|existing| existing.rp_addr != new_rp.rp_addr);
            entry.rps.push(new_rp);
        }
    }

    // Restart the zone timers.
    let bsr_timer = tasks::bsr_timer(
        zone_id,
        Duration::from_secs(BOOTSTRAP_TIMEOUT.into()),
        instance,
    );
    let expiry_timer = zone_id.is_scope_zone.then(|| {
        tasks::scope_zone_expiry_timer(
            zone_id,
            Duration::from_secs(SCOPE_ZONE_TIMEOUT.into()),
            instance,
        )
    });
    let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
    zone.bsr_timer = Some(bsr_timer);
    zone.expiry_timer = expiry_timer;

    // Fold the learned RP-set into the effective one.
    Debug::RpSetChange(&zone_id).log();
    rp::rp_set_rebuild(instance, interfaces);

    // Re-flood the accepted bootstrap on the other zone interfaces.
    let flood_vifs: Vec<_> = zone_vifs(instance, interfaces, &zone_id)
        .into_iter()
        .filter(|flood_vif| *flood_vif != vif_index)
        .collect();
    output::send_bootstrap(instance, interfaces, &flood_vifs, msg);

    Ok(())
}

// Handles the per-zone bootstrap timer.
pub(crate) fn bsr_timer_expiry(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    zone_id: PimScopeZoneId,
) -> Result<(), Error> {
    let zone = instance
        .state
        .bsr_zones
        .get_mut(&zone_id)
        .ok_or(Error::ZoneNotFound(zone_id))?;

    match zone.state {
        // The current BSR went silent: candidates re-enter the election,
        // everyone else falls back to accepting any bootstrap.
        State::Candidate => {
            zone.transition(State::Pending);
            let cfg = zone.local.clone().unwrap();
            let timeout = bootstrap_rand_override(&cfg);
            let timer = tasks::bsr_timer(zone_id, timeout, instance);
            let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
            zone.bsr_timer = Some(timer);
        }
        // The election wait passed with no preferred bootstrap: this
        // candidate wins.
        State::Pending => {
            let local = zone.local.clone().unwrap();
            let Some(local_addr) = cand_bsr_addr(interfaces, &local) else {
                return Ok(());
            };
            zone.bsr_addr = Some(local_addr);
            zone.bsr_priority = local.priority;
            zone.hash_mask_len = local.hash_mask_len;
            zone.transition(State::Elected);
            Debug::BsrElected(&zone_id, &local_addr).log();

            originate_bootstrap(instance, interfaces, zone_id);
        }
        // Periodic re-origination.
        State::Elected => {
            originate_bootstrap(instance, interfaces, zone_id);
        }
        State::AcceptPreferred => {
            zone.bsr_addr = None;
            zone.transition(State::AcceptAny);
            zone.bsr_timer = None;
        }
        State::AcceptAny | State::NoInfo => (),
    }

    Ok(())
}

// Handles the expiry of a learned scope zone.
pub(crate) fn zone_expiry(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    zone_id: PimScopeZoneId,
) -> Result<(), Error> {
    let zone = instance
        .state
        .bsr_zones
        .get(&zone_id)
        .ok_or(Error::ZoneNotFound(zone_id))?;

    // Configured zones live as long as their configuration.
    if zone.local.is_some() {
        return Ok(());
    }

    instance.state.bsr_zones.remove(&zone_id);
    rp::rp_set_rebuild(instance, interfaces);
    Ok(())
}

// Handles the expiry of one learned candidate RP.
pub(crate) fn rp_expiry(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    zone_id: PimScopeZoneId,
    group_prefix: IpNetwork,
    rp_addr: IpAddr,
) -> Result<(), Error> {
    let zone = instance
        .state
        .bsr_zones
        .get_mut(&zone_id)
        .ok_or(Error::ZoneNotFound(zone_id))?;

    if let Some(entry) = zone.prefixes.get_mut(&group_prefix) {
        entry.rps.retain(|rp| rp.rp_addr != rp_addr);
        if entry.rps.is_empty() {
            zone.prefixes.remove(&group_prefix);
        }
    }

    rp::rp_set_rebuild(instance, interfaces);
    Ok(())
}

// Processes a received Candidate-RP-Advertisement (elected BSR only).
pub(crate) fn process_cand_rp_adv(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    msg: CandRpAdvMsg,
) -> Result<(), Error> {
    for group in &msg.groups {
        let Ok(prefix) = IpNetwork::new(group.group, group.mask_len) else {
            continue;
        };
        let zone_id = zone_for_prefix(instance, prefix);

        let Some(zone) = instance.state.bsr_zones.get(&zone_id) else {
            continue;
        };
        if zone.state != State::Elected {
            continue;
        }

        // Deduplicate by (group prefix, RP address).
        let expiry_timer = (msg.holdtime != 0).then(|| {
            tasks::rp_expiry_timer(
                zone_id,
                prefix,
                msg.rp_addr,
                Duration::from_secs(msg.holdtime.into()),
                instance,
            )
        });
        let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
        let entry = zone.prefixes.entry(prefix).or_default();
        entry.rps.retain(|rp| rp.rp_addr != msg.rp_addr);
        entry.rps.push(BsrRp {
            rp_addr: msg.rp_addr,
            priority: msg.priority,
            holdtime: msg.holdtime,
            expiry_timer,
        });
        entry.expected_rp_count = entry.rps.len() as u8;
    }

    rp::rp_set_rebuild(instance, interfaces);
    Ok(())
}

// Periodic Candidate-RP advertisement toward the elected BSRs.
pub(crate) fn cand_rp_adv_tick(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let candidate_rps = instance.config.candidate_rps.clone();
    for cfg in candidate_rps {
        let zone_id = PimScopeZoneId {
            prefix: if cfg.is_scope_zone {
                cfg.group_prefix
            } else {
                instance.af.multicast_prefix()
            },
            is_scope_zone: cfg.is_scope_zone,
        };
        let Some(zone) = instance.state.bsr_zones.get(&zone_id) else {
            continue;
        };
        let Some(bsr_addr) = zone.bsr_addr else {
            continue;
        };
        let Some((_, iface)) = interfaces.get_by_name(&cfg.ifname) else {
            continue;
        };
        let Some(rp_addr) = iface.primary_addr() else {
            continue;
        };

        let mut group = EncodedGroup::new(cfg.group_prefix.ip());
        group.mask_len = cfg.group_prefix.prefix();
        let msg = CandRpAdvMsg {
            priority: cfg.priority,
            holdtime: cfg.holdtime,
            rp_addr,
            groups: vec![group],
        };

        // The elected BSR collects its own advertisements directly.
        if zone.state == State::Elected {
            let _ = process_cand_rp_adv(instance, interfaces, msg);
        } else {
            output::send_cand_rp_adv(instance, interfaces, bsr_addr, msg);
        }
    }
}

// Builds and floods the bootstrap burst for a zone this router is the
// elected BSR of, fragmenting by group prefix so that each fragment
// fits one PIM message.
pub(crate) fn originate_bootstrap(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    zone_id: PimScopeZoneId,
) {
    let af = instance.af;
    let Some(zone) = instance.state.bsr_zones.get_mut(&zone_id) else {
        return;
    };
    let Some(bsr_addr) = zone.bsr_addr else {
        return;
    };

    // The fragment tag identifies the burst.
    zone.fragment_tag = rand::rng().random();
    let fragment_tag = zone.fragment_tag;
    let hash_mask_len = zone.hash_mask_len;
    let bsr_priority = zone.bsr_priority;

    // Budget each fragment against the maximum PIM message this zone's
    // interfaces can carry.
    let max_size = 1400usize;
    let mut room = max_size - BootstrapMsg::base_length(af);
    let mut fragments: Vec<Vec<BootstrapGroup>> = vec![];
    let mut current: Vec<BootstrapGroup> = vec![];

    for (prefix, entry) in &zone.prefixes {
        let mut group = EncodedGroup::new(prefix.ip());
        group.mask_len = prefix.prefix();
        if zone_id.is_scope_zone && *prefix == zone_id.prefix {
            group.zone = true;
        }

        let group_size = BootstrapMsg::group_length(af)
            + entry.rps.len() * BootstrapMsg::rp_length(af);
        if group_size > room && !current.is_empty() {
            fragments.push(std::mem::take(&mut current));
            room = max_size - BootstrapMsg::base_length(af);
        }
        room = room.saturating_sub(group_size);

        current.push(BootstrapGroup {
            group,
            rp_count: entry.rps.len() as u8,
            rps: entry
                .rps
                .iter()
                .map(|rp| BootstrapRp {
                    rp_addr: rp.rp_addr,
                    holdtime: rp.holdtime,
                    priority: rp.priority,
                })
                .collect(),
        });
    }
    fragments.push(current);

    // Schedule the next periodic origination.
    let timer = tasks::bsr_timer(
        zone_id,
        Duration::from_secs(BOOTSTRAP_PERIOD.into()),
        instance,
    );
    let zone = instance.state.bsr_zones.get_mut(&zone_id).unwrap();
    zone.bsr_timer = Some(timer);

    let vifs = zone_vifs(instance, interfaces, &zone_id);
    for groups in fragments {
        let msg = BootstrapMsg {
            fragment_tag,
            hash_mask_len,
            bsr_priority,
            bsr_addr,
            groups,
        };
        output::send_bootstrap(instance, interfaces, &vifs, msg);
    }
}

// ===== helper functions =====

// Determines which zone a bootstrap message belongs to: scoped bursts
// lead with their scope zone prefix marked by the zone bit.
fn message_zone_id(af: AddressFamily, msg: &BootstrapMsg) -> PimScopeZoneId {
    if let Some(first) = msg.groups.first()
        && first.group.zone
        && let Ok(prefix) =
            IpNetwork::new(first.group.group, first.group.mask_len)
    {
        return PimScopeZoneId {
            prefix,
            is_scope_zone: true,
        };
    }
    PimScopeZoneId::global(af)
}

// The scope zone a group prefix belongs to.
fn zone_for_prefix(
    instance: &InstanceUpView<'_>,
    prefix: IpNetwork,
) -> PimScopeZoneId {
    instance
        .state
        .bsr_zones
        .keys()
        .filter(|zone_id| {
            zone_id.is_scope_zone && zone_id.prefix.contains(prefix.ip())
        })
        .copied()
        .next()
        .unwrap_or_else(|| PimScopeZoneId::global(prefix.ip().address_family()))
}

// The vifs bound to a zone: all active PIM vifs for the global zone,
// the administratively configured subset for scoped zones.
pub(crate) fn zone_vifs(
    instance: &InstanceUpView<'_>,
    interfaces: &Interfaces,
    zone_id: &PimScopeZoneId,
) -> Vec<u16> {
    if !zone_id.is_scope_zone {
        return interfaces
            .iter()
            .filter(|iface| iface.state.active && !iface.is_register_vif)
            .filter_map(|iface| iface.state.vif_index)
            .collect();
    }

    instance
        .config
        .scope_zones
        .iter()
        .filter(|zone| zone.prefix == zone_id.prefix)
        .flat_map(|zone| zone.ifnames.iter())
        .filter_map(|ifname| interfaces.get_by_name(ifname))
        .filter(|(_, iface)| iface.state.active)
        .filter_map(|(_, iface)| iface.state.vif_index)
        .collect()
}

fn cand_bsr_addr(
    interfaces: &Interfaces,
    cfg: &CandidateBsrCfg,
) -> Option<IpAddr> {
    interfaces
        .get_by_name(&cfg.ifname)
        .and_then(|(_, iface)| iface.primary_addr())
}

// Randomized wait before a candidate declares itself the BSR: better
// candidates wait less.
fn bootstrap_rand_override(cfg: &CandidateBsrCfg) -> Duration {
    let delay = 5 + 2 * (255 - cfg.priority as u64) / 255;
    let jitter = rand::rng().random_range(0..1000);
    Duration::from_millis(delay * 1000 + jitter)
}
