//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use holo_utils::task::TimeoutTask;

use crate::debug::{Debug, NeighborDeleteReason};
use crate::packet::hello::{HelloMsg, LanPruneDelay};

#[derive(Debug)]
pub struct Neighbor {
    // Primary address of the neighbor.
    pub addr: IpAddr,
    // Secondary addresses from the Hello address list.
    pub secondary_addrs: Vec<IpAddr>,
    pub proto_version: u8,
    // Present only if the neighbor advertised the Generation ID option.
    pub genid: Option<u32>,
    // Present only if the neighbor advertised the DR Priority option.
    pub dr_priority: Option<u32>,
    pub holdtime: u16,
    pub lan_prune_delay: Option<LanPruneDelay>,
    pub startup_time: DateTime<Utc>,
    // Liveness timer. Absent when the advertised holdtime is 0xffff, in
    // which case the neighbor never times out.
    pub liveness_timer: Option<TimeoutTask>,
}

// Outcome of refreshing a neighbor from a received Hello.
#[derive(Debug, Default)]
pub struct NeighborHelloResult {
    // The neighbor restarted (its Generation ID changed).
    pub genid_changed: bool,
    // Fields feeding the DR election changed.
    pub dr_election_affected: bool,
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(addr: IpAddr, proto_version: u8) -> Neighbor {
        Debug::NeighborCreate(&addr).log();

        Neighbor {
            addr,
            secondary_addrs: Vec::new(),
            proto_version,
            genid: None,
            dr_priority: None,
            holdtime: 0,
            lan_prune_delay: None,
            startup_time: Utc::now(),
            liveness_timer: None,
        }
    }

    // Refreshes the neighbor from a received Hello message.
    //
    // The caller restarts the liveness timer according to the returned
    // holdtime.
    pub(crate) fn hello_update(
        &mut self,
        hello: &HelloMsg,
        default_holdtime: u16,
    ) -> NeighborHelloResult {
        let mut result = NeighborHelloResult::default();

        // A changed Generation ID means the neighbor lost all state.
        if let Some(genid) = hello.genid
            && self.genid.is_some()
            && self.genid != Some(genid)
        {
            Debug::NeighborRestart(&self.addr).log();
            result.genid_changed = true;
        }
        self.genid = hello.genid;

        if self.dr_priority != hello.dr_priority {
            self.dr_priority = hello.dr_priority;
            result.dr_election_affected = true;
        }

        self.lan_prune_delay = hello.lan_prune_delay;
        self.secondary_addrs = hello.addr_list.clone();
        self.holdtime = hello.holdtime.unwrap_or(default_holdtime);

        result
    }

    // Returns whether the neighbor advertised join/prune tracking
    // support.
    pub(crate) fn tracking_support(&self) -> bool {
        self.lan_prune_delay
            .as_ref()
            .is_some_and(|lpd| lpd.tracking)
    }

    pub(crate) fn delete(self, reason: NeighborDeleteReason) {
        Debug::NeighborDelete(&self.addr, reason).log();
    }
}
