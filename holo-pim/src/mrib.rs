//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use holo_utils::ip::IpAddrExt;
use ipnetwork::IpNetwork;
use prefix_trie::joint::map::JointPrefixMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// Maximum number of in-progress MRIB transactions.
const MAX_TRANSACTIONS: usize = 16;

// MRIB entry, as learned from the unicast RIB.
//
// The MRIB is used exclusively for RPF lookups: given a source or RP
// address, it answers which vif and which upstream router lead toward it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MribEntry {
    pub prefix: IpNetwork,
    pub nexthop_addr: IpAddr,
    pub nexthop_vif_index: u16,
    pub metric_preference: u32,
    pub metric: u32,
}

#[derive(Clone, Debug)]
enum MribOp {
    Insert(MribEntry),
    Remove(IpNetwork),
    RemoveAll,
}

// Longest-prefix-match table from destination IP address to MRIB entry.
//
// Updates are applied through transactions: operations staged under a
// transaction ID are invisible to lookups until the transaction commits,
// and commit applies them in insertion order.
#[derive(Debug, Default)]
pub struct Mrib {
    table: JointPrefixMap<IpNetwork, MribEntry>,
    transactions: BTreeMap<u32, Vec<MribOp>>,
}

// ===== impl Mrib =====

impl Mrib {
    // Starts a new transaction.
    pub(crate) fn begin_tx(&mut self, tid: u32) -> Result<(), Error> {
        if self.transactions.len() >= MAX_TRANSACTIONS {
            return Err(Error::MribTransactionLimit(tid));
        }
        self.transactions.entry(tid).or_default();
        Ok(())
    }

    // Stages an entry insertion.
    pub(crate) fn insert(
        &mut self,
        tid: u32,
        entry: MribEntry,
    ) -> Result<(), Error> {
        self.transactions
            .get_mut(&tid)
            .ok_or(Error::MribUnknownTransaction(tid))?
            .push(MribOp::Insert(entry));
        Ok(())
    }

    // Stages an entry removal.
    pub(crate) fn remove(
        &mut self,
        tid: u32,
        prefix: IpNetwork,
    ) -> Result<(), Error> {
        self.transactions
            .get_mut(&tid)
            .ok_or(Error::MribUnknownTransaction(tid))?
            .push(MribOp::Remove(prefix));
        Ok(())
    }

    // Stages removal of all entries.
    pub(crate) fn remove_all(&mut self, tid: u32) -> Result<(), Error> {
        self.transactions
            .get_mut(&tid)
            .ok_or(Error::MribUnknownTransaction(tid))?
            .push(MribOp::RemoveAll);
        Ok(())
    }

    // Applies all staged operations in insertion order.
    //
    // Returns whether the table contents changed, in which case the RPF
    // state of every multicast routing entry needs to be re-evaluated.
    pub(crate) fn commit(&mut self, tid: u32) -> Result<bool, Error> {
        let ops = self
            .transactions
            .remove(&tid)
            .ok_or(Error::MribUnknownTransaction(tid))?;

        let mut changed = false;
        for op in ops {
            match op {
                MribOp::Insert(entry) => {
                    let old = self.table.insert(entry.prefix, entry.clone());
                    changed |= old.as_ref() != Some(&entry);
                }
                MribOp::Remove(prefix) => {
                    changed |= self.table.remove(&prefix).is_some();
                }
                MribOp::RemoveAll => {
                    if self.iter().next().is_some() {
                        self.table = Default::default();
                        changed = true;
                    }
                }
            }
        }

        Ok(changed)
    }

    // Discards all staged operations.
    pub(crate) fn abort(&mut self, tid: u32) -> Result<(), Error> {
        self.transactions
            .remove(&tid)
            .map(|_| ())
            .ok_or(Error::MribUnknownTransaction(tid))
    }

    // Returns the longest-match entry for the given address.
    pub(crate) fn lookup(&self, addr: &IpAddr) -> Option<&MribEntry> {
        let (_, entry) = self.table.get_lpm(&addr.to_host_prefix())?;
        Some(entry)
    }

    // Returns an iterator over all committed entries.
    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (IpNetwork, &MribEntry)> {
        (&self.table).into_iter()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prefix: &str, nexthop: &str, vif: u16) -> MribEntry {
        MribEntry {
            prefix: prefix.parse().unwrap(),
            nexthop_addr: nexthop.parse().unwrap(),
            nexthop_vif_index: vif,
            metric_preference: 100,
            metric: 10,
        }
    }

    #[test]
    fn longest_prefix_match() {
        let mut mrib = Mrib::default();
        mrib.begin_tx(1).unwrap();
        mrib.insert(1, entry("10.0.0.0/8", "192.0.2.1", 1)).unwrap();
        mrib.insert(1, entry("10.1.0.0/16", "192.0.2.2", 2)).unwrap();
        assert!(mrib.commit(1).unwrap());

        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(mrib.lookup(&addr).unwrap().nexthop_vif_index, 2);
        let addr: IpAddr = "10.2.0.1".parse().unwrap();
        assert_eq!(mrib.lookup(&addr).unwrap().nexthop_vif_index, 1);
        let addr: IpAddr = "172.16.0.1".parse().unwrap();
        assert!(mrib.lookup(&addr).is_none());
    }

    #[test]
    fn transaction_isolation() {
        let mut mrib = Mrib::default();
        mrib.begin_tx(1).unwrap();
        mrib.insert(1, entry("10.0.0.0/8", "192.0.2.1", 1)).unwrap();

        // Not visible before commit.
        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert!(mrib.lookup(&addr).is_none());

        assert!(mrib.commit(1).unwrap());
        assert!(mrib.lookup(&addr).is_some());
    }

    #[test]
    fn abort_replay_idempotence() {
        let mut mrib = Mrib::default();
        mrib.begin_tx(1).unwrap();
        mrib.insert(1, entry("10.0.0.0/8", "192.0.2.1", 1)).unwrap();
        mrib.commit(1).unwrap();

        // Stage and abort.
        mrib.begin_tx(2).unwrap();
        mrib.insert(2, entry("10.1.0.0/16", "192.0.2.2", 2)).unwrap();
        mrib.remove(2, "10.0.0.0/8".parse().unwrap()).unwrap();
        mrib.abort(2).unwrap();

        // Replay the same transaction and commit.
        mrib.begin_tx(2).unwrap();
        mrib.insert(2, entry("10.1.0.0/16", "192.0.2.2", 2)).unwrap();
        mrib.remove(2, "10.0.0.0/8".parse().unwrap()).unwrap();
        mrib.commit(2).unwrap();

        let contents: Vec<_> = mrib.iter().map(|(p, _)| p).collect();
        assert_eq!(contents, vec!["10.1.0.0/16".parse().unwrap()]);
    }

    #[test]
    fn unknown_transaction() {
        let mut mrib = Mrib::default();
        assert!(matches!(
            mrib.commit(42),
            Err(Error::MribUnknownTransaction(42))
        ));
        assert!(matches!(
            mrib.abort(42),
            Err(Error::MribUnknownTransaction(42))
        ));
    }

    #[test]
    fn transaction_limit() {
        let mut mrib = Mrib::default();
        for tid in 0..MAX_TRANSACTIONS as u32 {
            mrib.begin_tx(tid).unwrap();
        }
        assert!(matches!(
            mrib.begin_tx(1000),
            Err(Error::MribTransactionLimit(1000))
        ));
    }
}
