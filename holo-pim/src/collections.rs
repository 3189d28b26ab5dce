//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};

use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::interface::Interface;

pub type ObjectId = u32;

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ObjectKey<T> {
    Id(ObjectId),
    Value(T),
}

pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type InterfaceKey = ObjectKey<String>;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Interfaces {
    arena: Arena<Interface>,
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    ifindex_tree: HashMap<u32, InterfaceIndex>,
    vif_index_tree: BTreeMap<u16, InterfaceIndex>,
    next_id: InterfaceId,
}

// ===== impl ObjectKey =====

impl<T> From<ObjectId> for ObjectKey<T> {
    fn from(id: ObjectId) -> ObjectKey<T> {
        ObjectKey::Id(id)
    }
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.0.iter_mut()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert(
        &mut self,
        ifname: &str,
    ) -> (InterfaceIndex, &mut Interface) {
        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface = Interface::new(self.next_id, ifname.to_owned());
        let iface_idx = self.arena.0.insert(iface);

        // Link interface to different collections.
        let iface = &mut self.arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        if self
            .name_tree
            .insert(iface.name.clone(), iface_idx)
            .is_some()
        {
            panic!("interface name={} already exists", iface.name);
        }

        (iface_idx, iface)
    }

    pub(crate) fn delete(&mut self, iface_idx: InterfaceIndex) {
        let iface = &mut self.arena[iface_idx];

        // Unlink interface from different collections.
        self.id_tree.remove(&iface.id);
        self.name_tree.remove(&iface.name);
        if let Some(ifindex) = iface.system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }
        if let Some(vif_index) = iface.state.vif_index {
            self.vif_index_tree.remove(&vif_index);
        }

        // Remove interface from the arena.
        self.arena.0.remove(iface_idx);
    }

    // Update interface ifindex.
    pub(crate) fn update_ifindex(
        &mut self,
        iface_idx: InterfaceIndex,
        ifindex: Option<u32>,
    ) {
        let iface = &mut self.arena[iface_idx];
        if let Some(ifindex) = iface.system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }
        iface.system.ifindex = ifindex;
        if let Some(ifindex) = ifindex {
            self.ifindex_tree.insert(ifindex, iface_idx);
        }
    }

    // Update interface vif index.
    pub(crate) fn update_vif_index(
        &mut self,
        iface_idx: InterfaceIndex,
        vif_index: Option<u16>,
    ) {
        let iface = &mut self.arena[iface_idx];
        if let Some(vif_index) = iface.state.vif_index {
            self.vif_index_tree.remove(&vif_index);
        }
        iface.state.vif_index = vif_index;
        if let Some(vif_index) = vif_index {
            self.vif_index_tree.insert(vif_index, iface_idx);
        }
    }

    // Returns the lowest vif index not yet assigned to any interface.
    //
    // Vif indexes are stable for the lifetime of the interface and
    // identify it in every bitset.
    pub(crate) fn next_free_vif_index(&self) -> u16 {
        let mut vif_index = 0;
        for used in self.vif_index_tree.keys() {
            if *used != vif_index {
                break;
            }
            vif_index += 1;
        }
        vif_index
    }

    // Returns a reference to the interface corresponding to the given ID.
    pub(crate) fn get_by_id(
        &self,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a mutable reference to the interface corresponding to the
    // given ID.
    pub(crate) fn get_mut_by_id(
        &mut self,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &mut Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a reference to the interface corresponding to the given name.
    pub(crate) fn get_by_name(
        &self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
    }

    // Returns a mutable reference to the interface corresponding to the
    // given name.
    pub(crate) fn get_mut_by_name(
        &mut self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &mut Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
    }

    // Returns a reference to the interface corresponding to the given
    // system ifindex.
    pub(crate) fn get_by_ifindex(
        &self,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &Interface)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
    }

    // Returns a reference to the interface corresponding to the given vif
    // index.
    pub(crate) fn get_by_vif_index(
        &self,
        vif_index: u16,
    ) -> Result<(InterfaceIndex, &Interface), Error> {
        self.vif_index_tree
            .get(&vif_index)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
            .ok_or(Error::VifIndexNotFound(vif_index))
    }

    // Returns a mutable reference to the interface corresponding to the
    // given vif index.
    pub(crate) fn get_mut_by_vif_index(
        &mut self,
        vif_index: u16,
    ) -> Result<(InterfaceIndex, &mut Interface), Error> {
        self.vif_index_tree
            .get(&vif_index)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
            .ok_or(Error::VifIndexNotFound(vif_index))
    }

    // Returns a reference to the interface corresponding to the given
    // object key.
    pub(crate) fn get_by_key(
        &self,
        key: &InterfaceKey,
    ) -> Result<(InterfaceIndex, &Interface), Error> {
        match key {
            InterfaceKey::Id(id) => self.get_by_id(*id),
            InterfaceKey::Value(ifname) => {
                Ok(self.get_by_name(ifname).unwrap())
            }
        }
    }

    // Returns a mutable reference to the interface corresponding to the
    // given object key.
    pub(crate) fn get_mut_by_key(
        &mut self,
        key: &InterfaceKey,
    ) -> Result<(InterfaceIndex, &mut Interface), Error> {
        match key {
            InterfaceKey::Id(id) => self.get_mut_by_id(*id),
            InterfaceKey::Value(ifname) => {
                Ok(self.get_mut_by_name(ifname).unwrap())
            }
        }
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.name_tree
            .values()
            .map(|iface_idx| &self.arena[*iface_idx])
    }

    // Returns an iterator visiting all interfaces with mutable references.
    //
    // Order of iteration is not defined.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Interface> {
        self.arena.0.iter_mut().map(|(_, iface)| iface)
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().copied()
    }
}

impl std::ops::Index<InterfaceIndex> for Interfaces {
    type Output = Interface;

    fn index(&self, index: InterfaceIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<InterfaceIndex> for Interfaces {
    fn index_mut(&mut self, index: InterfaceIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}
