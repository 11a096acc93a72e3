// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The bounded database of known peers. Records are indexed by their
//! address; lookups fall back to the LE pseudo address and finally to
//! resolving the address against each stored IRK.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::core::{
    address::{AddressType, AddressWithType, RawAddress},
    hci::{DeviceClass, DeviceType, LinkKeyType, Octet16},
};

use super::record::{BondType, DeviceRecord, RecordId, RecordState, SecurityFlags};

/// Owns every DeviceRecord. Only the stack thread touches it.
#[derive(Debug)]
pub struct DeviceRecordStore {
    records: HashMap<RecordId, DeviceRecord>,
    by_address: HashMap<RawAddress, RecordId>,
    capacity: usize,
    next_id: u64,
    dev_rec_count: u64,
}

impl DeviceRecordStore {
    /// Constructor
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "device record store must hold at least one record");
        Self {
            records: HashMap::new(),
            by_address: HashMap::new(),
            capacity,
            next_id: 0,
            dev_rec_count: 0,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no record is stored
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All records, in no particular order
    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    fn next_timestamp(&mut self) -> u64 {
        let ts = self.dev_rec_count;
        self.dev_rec_count += 1;
        ts
    }

    /// Look up the record for `address`: first by exact address, then by LE
    /// pseudo address, then by resolving `address` as an RPA against each IRK.
    pub fn find_id(&self, address: RawAddress) -> Option<RecordId> {
        if let Some(id) = self.by_address.get(&address) {
            return Some(*id);
        }
        if let Some(record) = self.records.values().find(|r| r.ble.pseudo_addr == address) {
            return Some(record.id);
        }
        let candidate = AddressWithType::new(address, AddressType::Random);
        if !candidate.is_rpa() {
            return None;
        }
        self.records
            .values()
            .find(|r| r.irk().map(|irk| irk.resolves(&candidate)).unwrap_or(false))
            .map(|r| r.id)
    }

    /// Look up a record without refreshing its access time
    pub fn find(&self, address: RawAddress) -> Option<&DeviceRecord> {
        self.find_id(address).and_then(|id| self.records.get(&id))
    }

    /// Look up a record for modification, refreshing its access time
    pub fn find_mut(&mut self, address: RawAddress) -> Option<&mut DeviceRecord> {
        let id = self.find_id(address)?;
        let ts = self.next_timestamp();
        let record = self.records.get_mut(&id)?;
        record.timestamp = ts;
        Some(record)
    }

    /// Access a record by id
    pub fn get(&self, id: RecordId) -> Option<&DeviceRecord> {
        self.records.get(&id)
    }

    /// Return the existing record for `address`, or allocate one, evicting the
    /// oldest record first if the store is full.
    pub fn allocate_or_find(&mut self, address: RawAddress) -> &mut DeviceRecord {
        let id = match self.find_id(address) {
            Some(id) => id,
            None => self.allocate(address),
        };
        let ts = self.next_timestamp();
        let record = self.records.get_mut(&id).expect("record index out of sync");
        record.timestamp = ts;
        record
    }

    fn allocate(&mut self, address: RawAddress) -> RecordId {
        if self.records.len() >= self.capacity {
            if let Some(oldest) = self.find_oldest() {
                let evicted = self.records[&oldest].bd_addr;
                info!("Device record store full, evicting {evicted}");
                self.remove_by_id(oldest);
            }
        }
        let id = RecordId(self.next_id);
        self.next_id += 1;
        let ts = self.next_timestamp();
        self.records.insert(id, DeviceRecord::new(id, address, ts));
        self.by_address.insert(address, id);
        debug!("Allocated device record bd_addr:{address}");
        id
    }

    /// The oldest unpaired record, or if every record is paired, the oldest paired one
    fn find_oldest(&self) -> Option<RecordId> {
        let oldest_unpaired =
            self.records.values().filter(|r| !r.is_paired()).min_by_key(|r| r.timestamp);
        oldest_unpaired
            .or_else(|| self.records.values().min_by_key(|r| r.timestamp))
            .map(|r| r.id)
    }

    fn remove_by_id(&mut self, id: RecordId) -> Option<RawAddress> {
        let mut record = self.records.remove(&id)?;
        if self.by_address.get(&record.bd_addr) == Some(&id) {
            self.by_address.remove(&record.bd_addr);
        }
        record.wipe_secrets();
        Some(record.bd_addr)
    }

    /// Erase the record, zeroing its key material. Returns false if there was none.
    pub fn remove(&mut self, address: RawAddress) -> bool {
        match self.find_id(address) {
            Some(id) => {
                self.remove_by_id(id);
                info!("Removed device record {address}");
                true
            }
            None => {
                debug!("No device record to remove for {address}");
                false
            }
        }
    }

    /// Merge `duplicate` into `target` and drop `duplicate`. Fields already
    /// present on the target win; missing ones are filled from the duplicate.
    /// A duplicate that is merely an RPA of the target only contributes its
    /// address type and device type.
    pub fn consolidate(&mut self, target: RawAddress, duplicate: RawAddress) -> bool {
        let Some(target_id) = self.by_address.get(&target).copied() else {
            warn!("Cannot consolidate into unknown record {target}");
            return false;
        };
        let Some(duplicate_id) = self.by_address.get(&duplicate).copied() else {
            warn!("Cannot consolidate unknown record {duplicate}");
            return false;
        };
        if target_id == duplicate_id {
            return false;
        }
        let Some(mut dup) = self.records.remove(&duplicate_id) else {
            return false;
        };
        self.by_address.remove(&dup.bd_addr);

        let rec = self.records.get_mut(&target_id).expect("record index out of sync");
        let dup_as_rpa = AddressWithType::new(dup.bd_addr, AddressType::Random);
        let is_rpa_of_target = rec.irk().map(|irk| irk.resolves(&dup_as_rpa)).unwrap_or(false);

        rec.device_type |= dup.device_type;
        if is_rpa_of_target {
            info!("Consolidating RPA record {} into {}", dup.bd_addr, rec.bd_addr);
            rec.ble.addr_type = dup.ble.addr_type;
        } else {
            info!("Consolidating record {} into {}", dup.bd_addr, rec.bd_addr);
            merge_into(rec, &dup);
        }
        dup.wipe_secrets();
        true
    }

    /// Record that the peer paired on `pairing_address` has the given identity
    /// address. The record is re-keyed on the identity address and keeps
    /// answering for the pairing address; an existing record for the identity
    /// is merged into it.
    pub fn update_identity(&mut self, pairing_address: RawAddress, identity: AddressWithType) {
        let Some(id) = self.find_id(pairing_address) else {
            warn!("No record for {pairing_address} to associate with {identity}");
            return;
        };
        let previous = match self.by_address.get(&identity.address) {
            Some(other) if *other != id => Some(identity.address),
            _ => None,
        };

        let record = self.records.get_mut(&id).expect("record index out of sync");
        let old_address = record.bd_addr;
        record.ble.pseudo_addr = pairing_address;
        record.ble.identity_address = Some(identity);

        if old_address == identity.address {
            return;
        }

        // hold the existing identity record aside while re-keying
        let existing = previous.and_then(|address| self.by_address.remove(&address));
        if self.by_address.get(&old_address) == Some(&id) {
            self.by_address.remove(&old_address);
        }
        let record = self.records.get_mut(&id).expect("record index out of sync");
        record.bd_addr = identity.address;
        self.by_address.insert(identity.address, id);
        info!("Device record {old_address} is identity {identity}");

        if let Some(existing_id) = existing {
            if let Some(mut dup) = self.records.remove(&existing_id) {
                let rec = self.records.get_mut(&id).expect("record index out of sync");
                rec.device_type |= dup.device_type;
                merge_into(rec, &dup);
                dup.wipe_secrets();
            }
        }
    }

    /// Defer removal of the record until its links go down
    pub fn set_pending_removal(&mut self, address: RawAddress) -> bool {
        self.set_state(address, RecordState::PendingRemoval)
    }

    /// Cancel a deferred removal
    pub fn clear_pending_removal(&mut self, address: RawAddress) -> bool {
        self.set_state(address, RecordState::Active)
    }

    fn set_state(&mut self, address: RawAddress, state: RecordState) -> bool {
        match self.find_mut(address) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    /// Forget every security flag of the peer, so it no longer appears bonded
    pub fn clear_security_flags(&mut self, address: RawAddress) {
        if let Some(record) = self.find_mut(address) {
            record.sec_flags = SecurityFlags::empty();
        }
    }

    /// Bonded on either transport
    pub fn is_bonded(&self, address: RawAddress) -> bool {
        self.find(address).map(DeviceRecord::is_bonded).unwrap_or(false)
    }

    /// Bond type of the peer, `Unknown` if the peer is unknown
    pub fn bond_type(&self, address: RawAddress) -> BondType {
        self.find(address).map(|r| r.bond_type).unwrap_or_default()
    }

    /// Set the bond type of a known peer
    pub fn set_bond_type(&mut self, address: RawAddress, bond_type: BondType) -> bool {
        match self.find_mut(address) {
            Some(record) => {
                record.bond_type = bond_type;
                true
            }
            None => false,
        }
    }

    /// Remember the remote name of a known peer
    pub fn set_name(&mut self, address: RawAddress, name: &str) {
        if let Some(record) = self.find_mut(address) {
            record.name = Some(name.to_owned());
            record.sec_flags |= SecurityFlags::NAME_KNOWN;
        }
    }

    /// Restore a paired classic device, typically from persistent storage at startup
    pub fn add_device_from_storage(
        &mut self,
        address: RawAddress,
        dev_class: Option<DeviceClass>,
        link_key: Octet16,
        key_type: LinkKeyType,
        pin_length: u8,
    ) -> &mut DeviceRecord {
        let record = self.allocate_or_find(address);
        info!("Adding device {address} from storage, key type {key_type:?}");
        if let Some(dev_class) = dev_class {
            record.dev_class = dev_class;
        }
        record.device_type |= DeviceType::BREDR;
        record.link_key = link_key;
        record.link_key_type = Some(key_type);
        record.pin_code_length = pin_length;
        record.bond_type = BondType::Persistent;
        record.sec_flags |= SecurityFlags::LINK_KEY_KNOWN;
        if pin_length >= 16 || key_type.is_authenticated() {
            record.sec_flags |=
                SecurityFlags::SIXTEEN_DIGIT_PIN_AUTHED | SecurityFlags::LINK_KEY_AUTHED;
        }
        record
    }
}

/// Fill fields missing on `rec` from `dup`; flags accumulate
fn merge_into(rec: &mut DeviceRecord, dup: &DeviceRecord) {
    rec.sec_flags |= dup.sec_flags;
    if rec.link_key_type.is_none() {
        rec.link_key = dup.link_key;
        rec.link_key_type = dup.link_key_type;
        rec.pin_code_length = dup.pin_code_length;
        rec.is_ctkd = dup.is_ctkd;
    }
    if rec.dev_class == [0; 3] {
        rec.dev_class = dup.dev_class;
    }
    if rec.name.is_none() {
        rec.name = dup.name.clone();
    }
    if rec.ble_keys.key_type.is_empty() {
        rec.ble_keys = dup.ble_keys.clone();
    }
    if rec.ble.identity_address.is_none() {
        rec.ble.identity_address = dup.ble.identity_address;
    }
    if rec.ble.pseudo_addr.is_empty() {
        rec.ble.pseudo_addr = dup.ble.pseudo_addr;
        rec.ble.addr_type = dup.ble.addr_type;
    }
    if rec.ble.conn_params.is_none() {
        rec.ble.conn_params = dup.ble.conn_params;
    }
    if rec.enc_key_size == 0 {
        rec.enc_key_size = dup.enc_key_size;
    }
    if rec.bond_type == BondType::Unknown {
        rec.bond_type = dup.bond_type;
    }
}

#[cfg(test)]
mod test {
    use crate::{
        core::irk::Irk,
        security::record::{BleKey, BleKeyMask},
    };

    use super::*;

    const ADDRESS_1: RawAddress = RawAddress([1, 2, 3, 4, 5, 6]);
    const ADDRESS_2: RawAddress = RawAddress([1, 2, 3, 4, 5, 7]);
    const ADDRESS_3: RawAddress = RawAddress([1, 2, 3, 4, 5, 8]);
    const ADDRESS_4: RawAddress = RawAddress([1, 2, 3, 4, 5, 9]);

    const IRK: Irk = Irk([
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10,
    ]);
    // 5B:89:68:1E:4E:19, resolvable with IRK
    const RPA: RawAddress = RawAddress([0x19, 0x4e, 0x1e, 0x68, 0x89, 0x5b]);

    fn with_irk(store: &mut DeviceRecordStore, address: RawAddress) {
        store.allocate_or_find(address).set_ble_key(&BleKey::PeerIdentity {
            irk: IRK,
            identity_address: AddressWithType::new(address, AddressType::Public),
        });
    }

    #[test]
    fn test_find_after_allocate_is_same_record() {
        let mut store = DeviceRecordStore::new(4);

        let id = store.allocate_or_find(ADDRESS_1).id();

        assert_eq!(store.find(ADDRESS_1).map(DeviceRecord::id), Some(id));
        assert_eq!(store.allocate_or_find(ADDRESS_1).id(), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_find_unknown() {
        let store = DeviceRecordStore::new(4);
        assert!(store.find(ADDRESS_1).is_none());
    }

    #[test]
    fn test_remove() {
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(ADDRESS_1);

        assert!(store.remove(ADDRESS_1));

        assert!(store.find(ADDRESS_1).is_none());
        assert!(!store.remove(ADDRESS_1));
    }

    #[test]
    fn test_find_by_pseudo_address() {
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(ADDRESS_1).ble.pseudo_addr = ADDRESS_2;

        assert_eq!(store.find(ADDRESS_2).map(|r| r.bd_addr), Some(ADDRESS_1));
    }

    #[test]
    fn test_find_by_rpa_resolution() {
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(ADDRESS_2);
        with_irk(&mut store, ADDRESS_1);

        assert_eq!(store.find(RPA).map(|r| r.bd_addr), Some(ADDRESS_1));
        // allocating for the RPA must not duplicate the identity
        assert_eq!(store.allocate_or_find(RPA).bd_addr, ADDRESS_1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_eviction_prefers_oldest_unpaired() {
        // arrange: three records, the oldest of which is paired
        let mut store = DeviceRecordStore::new(3);
        store.allocate_or_find(ADDRESS_1).set_link_key([1; 16], LinkKeyType::Combination, false);
        store.allocate_or_find(ADDRESS_2);
        store.allocate_or_find(ADDRESS_3);

        // act
        store.allocate_or_find(ADDRESS_4);

        // assert: the oldest unpaired record was evicted
        assert_eq!(store.len(), 3);
        assert!(store.find(ADDRESS_1).is_some());
        assert!(store.find(ADDRESS_2).is_none());
        assert!(store.find(ADDRESS_3).is_some());
        assert!(store.find(ADDRESS_4).is_some());
    }

    #[test]
    fn test_eviction_respects_last_access() {
        let mut store = DeviceRecordStore::new(3);
        store.allocate_or_find(ADDRESS_1);
        store.allocate_or_find(ADDRESS_2);
        store.allocate_or_find(ADDRESS_3);
        store.find_mut(ADDRESS_1);

        store.allocate_or_find(ADDRESS_4);

        assert!(store.find(ADDRESS_1).is_some());
        assert!(store.find(ADDRESS_2).is_none());
    }

    #[test]
    fn test_eviction_when_all_paired() {
        let mut store = DeviceRecordStore::new(2);
        store.allocate_or_find(ADDRESS_1).set_link_key([1; 16], LinkKeyType::Combination, false);
        store.allocate_or_find(ADDRESS_2).set_link_key([2; 16], LinkKeyType::Combination, false);

        store.allocate_or_find(ADDRESS_3);

        assert_eq!(store.len(), 2);
        assert!(store.find(ADDRESS_1).is_none());
        assert!(store.find(ADDRESS_2).is_some());
    }

    #[test]
    fn test_consolidate_keeps_target_fields() {
        // arrange: an LE record with keys and a classic record with a link key
        let mut store = DeviceRecordStore::new(4);
        with_irk(&mut store, ADDRESS_1);
        store.allocate_or_find(ADDRESS_1).dev_class = [1, 1, 1];
        let classic = store.allocate_or_find(ADDRESS_2);
        classic.set_link_key([9; 16], LinkKeyType::AuthCombination, false);
        classic.dev_class = [2, 2, 2];
        classic.name = Some("Widget".into());

        // act
        assert!(store.consolidate(ADDRESS_1, ADDRESS_2));

        // assert
        assert_eq!(store.len(), 1);
        assert!(store.find(ADDRESS_2).is_none());
        let record = store.find(ADDRESS_1).unwrap();
        assert!(record.is_link_key_known());
        assert_eq!(record.link_key, [9; 16]);
        assert_eq!(record.dev_class, [1, 1, 1]);
        assert_eq!(record.name.as_deref(), Some("Widget"));
        assert_eq!(record.ble_keys.key_type, BleKeyMask::PID);
        assert_eq!(record.device_type, DeviceType::DUMO);
    }

    #[test]
    fn test_consolidate_rpa_duplicate_merges_address_type_only() {
        // arrange: a record created for an RPA before the IRK was known
        let mut store = DeviceRecordStore::new(4);
        let rpa_record = store.allocate_or_find(RPA);
        rpa_record.ble.addr_type = AddressType::Random;
        rpa_record.device_type = DeviceType::BLE;
        rpa_record.name = Some("Stale".into());
        store.allocate_or_find(ADDRESS_1).device_type = DeviceType::BREDR;
        with_irk(&mut store, ADDRESS_1);

        // act
        assert!(store.consolidate(ADDRESS_1, RPA));

        // assert
        assert_eq!(store.len(), 1);
        let record = store.find(ADDRESS_1).unwrap();
        assert_eq!(record.ble.addr_type, AddressType::Random);
        assert_eq!(record.device_type, DeviceType::DUMO);
        assert!(record.name.is_none());
    }

    #[test]
    fn test_update_identity_rekeys_and_merges() {
        // arrange: a record created while pairing over an RPA, and a classic record
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(RPA).device_type = DeviceType::BLE;
        store.allocate_or_find(ADDRESS_1).set_link_key([3; 16], LinkKeyType::Combination, false);

        // act
        store.update_identity(RPA, AddressWithType::new(ADDRESS_1, AddressType::Public));

        // assert
        assert_eq!(store.len(), 1);
        let record = store.find(RPA).unwrap();
        assert_eq!(record.bd_addr, ADDRESS_1);
        assert_eq!(record.ble.pseudo_addr, RPA);
        assert!(record.is_link_key_known());
        assert_eq!(record.device_type, DeviceType::DUMO);
        assert_eq!(store.find(ADDRESS_1).map(DeviceRecord::id), Some(record.id()));
    }

    #[test]
    fn test_pending_removal() {
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(ADDRESS_1);

        assert!(store.set_pending_removal(ADDRESS_1));
        assert!(store.find(ADDRESS_1).unwrap().is_pending_removal());
        assert!(store.clear_pending_removal(ADDRESS_1));
        assert!(!store.find(ADDRESS_1).unwrap().is_pending_removal());
        assert!(!store.set_pending_removal(ADDRESS_2));
    }

    #[test]
    fn test_add_device_from_storage() {
        let mut store = DeviceRecordStore::new(4);

        store.add_device_from_storage(ADDRESS_1, None, [5; 16], LinkKeyType::UnauthCombination, 4);
        store.add_device_from_storage(ADDRESS_2, None, [6; 16], LinkKeyType::Combination, 16);

        let record = store.find(ADDRESS_1).unwrap();
        assert!(record.is_link_key_known());
        assert_eq!(record.link_key, [5; 16]);
        assert_eq!(record.bond_type, BondType::Persistent);
        assert!(!record.sec_flags.contains(SecurityFlags::LINK_KEY_AUTHED));
        let record = store.find(ADDRESS_2).unwrap();
        assert!(record.sec_flags.contains(SecurityFlags::SIXTEEN_DIGIT_PIN_AUTHED));
        assert!(record.sec_flags.contains(SecurityFlags::LINK_KEY_AUTHED));
    }

    #[test]
    fn test_clear_security_flags() {
        let mut store = DeviceRecordStore::new(4);
        store.allocate_or_find(ADDRESS_1).set_link_key([1; 16], LinkKeyType::Combination, false);

        store.clear_security_flags(ADDRESS_1);

        assert!(!store.is_bonded(ADDRESS_1));
    }
}
