//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::collections::Interfaces;
use crate::instance::InstanceUpView;
use crate::mrt;

// Where an RP-set entry was learned from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RpOrigin {
    // Administratively configured.
    Static,
    // Learned from the Bootstrap protocol.
    Bootstrap,
}

// Candidate RP for a group prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RpEntry {
    pub rp_addr: IpAddr,
    // Lower values are preferred.
    pub priority: u8,
    pub holdtime: u16,
    pub hash_mask_len: u8,
    pub origin: RpOrigin,
}

// The RP-set: candidate RPs grouped by the group prefix they serve.
//
// `rp_lookup` is a pure function of the current contents: every router
// with the same RP-set and hash mask length maps each group to the same
// RP.
#[derive(Debug, Default)]
pub struct RpSet {
    entries: BTreeMap<IpNetwork, Vec<RpEntry>>,
}

// ===== impl RpSet =====

impl RpSet {
    // Adds or updates a candidate RP for a group prefix.
    //
    // Returns whether the RP-set changed.
    pub(crate) fn add(
        &mut self,
        group_prefix: IpNetwork,
        entry: RpEntry,
    ) -> bool {
        let rps = self.entries.entry(group_prefix).or_default();
        match rps.iter_mut().find(|rp| rp.rp_addr == entry.rp_addr) {
            Some(rp) => {
                if *rp == entry {
                    return false;
                }
                *rp = entry;
            }
            None => rps.push(entry),
        }
        true
    }

    // Removes a candidate RP from a group prefix.
    //
    // Returns whether the RP-set changed.
    pub(crate) fn remove(
        &mut self,
        group_prefix: &IpNetwork,
        rp_addr: &IpAddr,
    ) -> bool {
        let Some(rps) = self.entries.get_mut(group_prefix) else {
            return false;
        };
        let orig_len = rps.len();
        rps.retain(|rp| rp.rp_addr != *rp_addr);
        let changed = rps.len() != orig_len;
        if rps.is_empty() {
            self.entries.remove(group_prefix);
        }
        changed
    }

    // Removes all candidate RPs learned from the given origin.
    //
    // Returns whether the RP-set changed.
    pub(crate) fn remove_origin(&mut self, origin: RpOrigin) -> bool {
        let mut changed = false;
        self.entries.retain(|_, rps| {
            let orig_len = rps.len();
            rps.retain(|rp| rp.origin != origin);
            changed |= rps.len() != orig_len;
            !rps.is_empty()
        });
        changed
    }

    // Maps a multicast group to its RP.
    //
    // The RP-set is first restricted to the longest group prefix
    // containing the group; within that prefix the RP with the largest
    // hash wins, with ties broken by better (numerically lower) priority
    // and then by highest RP address.
    pub(crate) fn rp_lookup(&self, group: &IpAddr) -> Option<&RpEntry> {
        let rps = self
            .entries
            .iter()
            .filter(|(prefix, _)| prefix.contains(*group))
            .max_by_key(|(prefix, _)| prefix.prefix())
            .map(|(_, rps)| rps)?;

        rps.iter().max_by(|a, b| {
            let hash_a = hash_value(group, a.hash_mask_len, &a.rp_addr);
            let hash_b = hash_value(group, b.hash_mask_len, &b.rp_addr);
            hash_a
                .cmp(&hash_b)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.rp_addr.cmp(&b.rp_addr))
        })
    }

    // Returns an iterator over all (group prefix, RP list) pairs.
    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (&IpNetwork, &Vec<RpEntry>)> {
        self.entries.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ===== global functions =====

// Rebuilds the effective RP-set from the static configuration and the
// Bootstrap-learned zone contents, then re-binds every RP-referencing
// routing entry.
pub(crate) fn rp_set_rebuild(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let mut rp_set = RpSet::default();

    for cfg in &instance.config.static_rps {
        rp_set.add(
            cfg.group_prefix,
            RpEntry {
                rp_addr: cfg.rp_addr,
                priority: cfg.priority,
                holdtime: 0,
                hash_mask_len: cfg.hash_mask_len,
                origin: RpOrigin::Static,
            },
        );
    }

    for zone in instance.state.bsr_zones.values() {
        for (prefix, entry) in &zone.prefixes {
            for rp in &entry.rps {
                rp_set.add(
                    *prefix,
                    RpEntry {
                        rp_addr: rp.rp_addr,
                        priority: rp.priority,
                        holdtime: rp.holdtime,
                        hash_mask_len: zone.hash_mask_len,
                        origin: RpOrigin::Bootstrap,
                    },
                );
            }
        }
    }

    instance.state.rp_set = rp_set;
    mrt::rp_set_changed(instance, interfaces);
}

// The RP hash function.
//
// The masked group address and the RP address fold to 32 bits (for IPv6
// by XOR of the four big-endian words), and the result is reduced
// modulo 2^31 with 32-bit wrapping arithmetic throughout.
pub(crate) fn hash_value(
    group: &IpAddr,
    hash_mask_len: u8,
    rp_addr: &IpAddr,
) -> u32 {
    let group = fold_addr_masked(group, hash_mask_len);
    let rp = fold_addr_masked(rp_addr, 128);

    1103515245u32
        .wrapping_mul(
            1103515245u32.wrapping_mul(group).wrapping_add(12345) ^ rp,
        )
        .wrapping_add(12345)
        & 0x7fff_ffff
}

// Applies a mask of the given length and folds the result to 32 bits.
fn fold_addr_masked(addr: &IpAddr, mask_len: u8) -> u32 {
    match addr {
        IpAddr::V4(addr) => {
            let value = u32::from(*addr);
            let mask_len = std::cmp::min(mask_len, 32);
            match mask_len {
                0 => 0,
                _ => value & (u32::MAX << (32 - mask_len as u32)),
            }
        }
        IpAddr::V6(addr) => {
            let value = u128::from(*addr);
            let mask_len = std::cmp::min(mask_len, 128);
            let masked = match mask_len {
                0 => 0,
                _ => value & (u128::MAX << (128 - mask_len as u32)),
            };
            (masked as u32)
                ^ ((masked >> 32) as u32)
                ^ ((masked >> 64) as u32)
                ^ ((masked >> 96) as u32)
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn rp(addr: &str, priority: u8, hash_mask_len: u8) -> RpEntry {
        RpEntry {
            rp_addr: addr.parse().unwrap(),
            priority,
            holdtime: 150,
            hash_mask_len,
            origin: RpOrigin::Static,
        }
    }

    #[test]
    fn hash_determinism() {
        let group: IpAddr = "239.2.2.2".parse().unwrap();
        let rp_addr: IpAddr = "10.1.0.1".parse().unwrap();
        let first = hash_value(&group, 30, &rp_addr);
        for _ in 0..10 {
            assert_eq!(first, hash_value(&group, 30, &rp_addr));
        }
    }

    #[test]
    fn lookup_stable_under_permutation() {
        let group: IpAddr = "239.2.2.2".parse().unwrap();

        let mut a = RpSet::default();
        a.add("239.0.0.0/8".parse().unwrap(), rp("10.1.0.1", 1, 30));
        a.add("239.0.0.0/8".parse().unwrap(), rp("10.1.0.2", 1, 30));

        let mut b = RpSet::default();
        b.add("239.0.0.0/8".parse().unwrap(), rp("10.1.0.2", 1, 30));
        b.add("239.0.0.0/8".parse().unwrap(), rp("10.1.0.1", 1, 30));

        let rp_a = a.rp_lookup(&group).unwrap().rp_addr;
        let rp_b = b.rp_lookup(&group).unwrap().rp_addr;
        assert_eq!(rp_a, rp_b);
    }

    #[test]
    fn longest_prefix_wins() {
        let group: IpAddr = "239.2.2.2".parse().unwrap();

        let mut rp_set = RpSet::default();
        rp_set.add("224.0.0.0/4".parse().unwrap(), rp("10.0.0.1", 1, 30));
        rp_set.add("239.2.0.0/16".parse().unwrap(), rp("10.0.0.2", 1, 30));

        assert_eq!(
            rp_set.rp_lookup(&group).unwrap().rp_addr,
            "10.0.0.2".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn zero_mask_collapses_selection() {
        // With a zero hash mask length the chosen RP no longer depends on
        // the group.
        let mut rp_set = RpSet::default();
        rp_set.add("224.0.0.0/4".parse().unwrap(), rp("10.0.0.1", 1, 0));
        rp_set.add("224.0.0.0/4".parse().unwrap(), rp("10.0.0.2", 1, 0));

        let first = rp_set
            .rp_lookup(&"239.0.0.1".parse().unwrap())
            .unwrap()
            .rp_addr;
        for group in ["225.1.2.3", "232.9.9.9", "239.255.255.255"] {
            let chosen =
                rp_set.rp_lookup(&group.parse().unwrap()).unwrap().rp_addr;
            assert_eq!(first, chosen);
        }
    }

    #[test]
    fn full_mask_selects_per_group() {
        // With a full-length hash mask different groups spread across the
        // candidate RPs.
        let mut rp_set = RpSet::default();
        for i in 1..=8u8 {
            rp_set.add(
                "224.0.0.0/4".parse().unwrap(),
                rp(&format!("10.0.0.{}", i), 1, 32),
            );
        }

        let mut seen = std::collections::BTreeSet::new();
        for i in 0..64u32 {
            let group: IpAddr =
                format!("239.1.{}.{}", i / 256, i % 256).parse().unwrap();
            seen.insert(rp_set.rp_lookup(&group).unwrap().rp_addr);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn priority_breaks_hash_ties() {
        // The 128-to-32-bit fold XORs the four address words, so two IPv6
        // RP addresses with permuted words hash identically and the tie
        // falls through to the priority comparison.
        let group: IpAddr = "ff0e::1".parse().unwrap();
        let a = rp("2001:db8::1", 10, 16);
        let b = rp("0:1::2001:db8", 1, 16);
        assert_eq!(
            hash_value(&group, 16, &a.rp_addr),
            hash_value(&group, 16, &b.rp_addr)
        );

        let mut rp_set = RpSet::default();
        rp_set.add("ff0e::/16".parse().unwrap(), a);
        rp_set.add("ff0e::/16".parse().unwrap(), b.clone());
        assert_eq!(rp_set.rp_lookup(&group).unwrap().rp_addr, b.rp_addr);
    }

    #[test]
    fn add_remove_leaves_selection_unchanged() {
        let group: IpAddr = "239.2.2.2".parse().unwrap();
        let prefix: IpNetwork = "239.0.0.0/8".parse().unwrap();

        let mut rp_set = RpSet::default();
        rp_set.add(prefix, rp("10.1.0.1", 1, 30));
        rp_set.add(prefix, rp("10.1.0.2", 1, 30));
        let before = rp_set.rp_lookup(&group).unwrap().rp_addr;

        rp_set.add(prefix, rp("10.9.9.9", 200, 30));
        rp_set.remove(&prefix, &"10.9.9.9".parse().unwrap());

        let after = rp_set.rp_lookup(&group).unwrap().rp_addr;
        assert_eq!(before, after);
    }
}
