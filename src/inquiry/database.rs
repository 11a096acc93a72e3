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

//! The inquiry database holds the latest result per discovered address,
//! across inquiry rounds. The per-round filter remembers which addresses
//! already answered in the current round.

use std::collections::HashSet;

use log::debug;
use tokio::time::Instant;

use crate::core::{
    address::{AddressType, RawAddress},
    hci::{DeviceClass, DeviceType},
};

/// What is known about a discovered device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InquiryResults {
    /// Device address
    pub bd_addr: RawAddress,
    /// Class of device
    pub dev_class: DeviceClass,
    /// Last RSSI reported, 0 if unknown
    pub rssi: i8,
    /// Clock offset, with the valid bit set once reported
    pub clock_offset: u16,
    /// Page scan repetition mode
    pub page_scan_rep_mode: u8,
    /// Extended inquiry response or LE advertising data
    pub eir: Vec<u8>,
    /// Transports the device was discovered on
    pub device_type: DeviceType,
    /// LE address type, for devices discovered over LE
    pub ble_addr_type: AddressType,
}

impl InquiryResults {
    fn new(bd_addr: RawAddress) -> Self {
        Self {
            bd_addr,
            dev_class: [0; 3],
            rssi: 0,
            clock_offset: 0,
            page_scan_rep_mode: 0,
            eir: vec![],
            device_type: DeviceType::empty(),
            ble_addr_type: AddressType::Public,
        }
    }
}

/// One database entry
#[derive(Clone, Debug)]
pub struct InquiryDbEntry {
    /// The results
    pub results: InquiryResults,
    /// The inquiry round that last updated this entry. 0 for a fresh entry.
    pub inq_count: u32,
    /// Time of the last response
    pub time_of_resp: Instant,
}

/// Bounded inquiry database. When full, the entry with the oldest response
/// is reused.
pub struct InquiryDatabase {
    entries: Vec<InquiryDbEntry>,
    capacity: usize,
}

impl InquiryDatabase {
    /// Constructor
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "inquiry database needs room for at least one entry");
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    /// Find the entry for an address
    pub fn find(&self, address: RawAddress) -> Option<&InquiryDbEntry> {
        self.entries.iter().find(|entry| entry.results.bd_addr == address)
    }

    /// Find the entry for an address, to update it
    pub fn find_mut(&mut self, address: RawAddress) -> Option<&mut InquiryDbEntry> {
        self.entries.iter_mut().find(|entry| entry.results.bd_addr == address)
    }

    /// Find the entry for an address, or start a fresh one
    pub fn find_or_allocate(&mut self, address: RawAddress) -> &mut InquiryDbEntry {
        let index = match self.entries.iter().position(|entry| entry.results.bd_addr == address)
        {
            Some(index) => index,
            None => self.allocate(address),
        };
        &mut self.entries[index]
    }

    fn allocate(&mut self, address: RawAddress) -> usize {
        let fresh = InquiryDbEntry {
            results: InquiryResults::new(address),
            inq_count: 0,
            time_of_resp: Instant::now(),
        };
        if self.entries.len() < self.capacity {
            self.entries.push(fresh);
            return self.entries.len() - 1;
        }
        let (oldest, _) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.time_of_resp)
            .expect("database is full, so not empty");
        debug!(
            "Inquiry database full, reusing the entry of {}",
            self.entries[oldest].results.bd_addr.to_loggable_string()
        );
        self.entries[oldest] = fresh;
        oldest
    }

    /// Remove the entry for an address
    pub fn remove(&mut self, address: RawAddress) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.results.bd_addr != address);
        self.entries.len() != before
    }

    /// Remove every entry for which `keep` is false
    pub fn retain(&mut self, keep: impl FnMut(&InquiryDbEntry) -> bool) {
        self.entries.retain(keep);
    }

    /// Strongest signal first. Entries with no RSSI keep their relative order.
    pub fn sort_by_rssi(&mut self) {
        self.entries.sort_by(|a, b| b.results.rssi.cmp(&a.results.rssi));
    }

    /// Entries in database order
    pub fn iter(&self) -> impl Iterator<Item = &InquiryDbEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the database is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Addresses that already answered in the current round. Once full, new
/// addresses are no longer remembered and always look unseen.
pub struct ResultFilter {
    seen: HashSet<RawAddress>,
    capacity: usize,
}

impl ResultFilter {
    /// Constructor
    pub fn new(capacity: usize) -> Self {
        Self { seen: HashSet::new(), capacity }
    }

    /// True if the address already answered in this round. Otherwise it is
    /// remembered, if there is room.
    pub fn check_and_insert(&mut self, address: RawAddress) -> bool {
        if self.seen.contains(&address) {
            return true;
        }
        if self.seen.len() < self.capacity {
            self.seen.insert(address);
        }
        false
    }

    /// Forget the round
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    const ADDRESS_1: RawAddress = RawAddress([1, 0, 0, 0, 0, 0]);
    const ADDRESS_2: RawAddress = RawAddress([2, 0, 0, 0, 0, 0]);
    const ADDRESS_3: RawAddress = RawAddress([3, 0, 0, 0, 0, 0]);

    #[test]
    fn test_find_or_allocate_reuses_entry() {
        let mut db = InquiryDatabase::new(4);

        db.find_or_allocate(ADDRESS_1).results.rssi = -40;
        let entry = db.find_or_allocate(ADDRESS_1);

        assert_eq!(entry.results.rssi, -40);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_full_database_reuses_oldest() {
        // arrange
        let mut db = InquiryDatabase::new(2);
        let now = Instant::now();
        db.find_or_allocate(ADDRESS_1).time_of_resp = now + Duration::from_secs(5);
        db.find_or_allocate(ADDRESS_2).time_of_resp = now;

        // act
        db.find_or_allocate(ADDRESS_3);

        // assert
        assert_eq!(db.len(), 2);
        assert!(db.find(ADDRESS_1).is_some());
        assert!(db.find(ADDRESS_2).is_none());
        assert_eq!(db.find(ADDRESS_3).unwrap().inq_count, 0);
    }

    #[test]
    fn test_sort_by_rssi() {
        let mut db = InquiryDatabase::new(4);
        db.find_or_allocate(ADDRESS_1).results.rssi = -70;
        db.find_or_allocate(ADDRESS_2).results.rssi = -30;
        db.find_or_allocate(ADDRESS_3).results.rssi = -50;

        db.sort_by_rssi();

        let order: Vec<_> = db.iter().map(|entry| entry.results.bd_addr).collect();
        assert_eq!(order, vec![ADDRESS_2, ADDRESS_3, ADDRESS_1]);
    }

    #[test]
    fn test_remove() {
        let mut db = InquiryDatabase::new(4);
        db.find_or_allocate(ADDRESS_1);

        assert!(db.remove(ADDRESS_1));
        assert!(!db.remove(ADDRESS_1));
        assert!(db.is_empty());
    }

    #[test]
    fn test_filter() {
        let mut filter = ResultFilter::new(1);

        assert!(!filter.check_and_insert(ADDRESS_1));
        assert!(filter.check_and_insert(ADDRESS_1));
        // full: not remembered
        assert!(!filter.check_and_insert(ADDRESS_2));
        assert!(!filter.check_and_insert(ADDRESS_2));

        filter.clear();
        assert!(!filter.check_and_insert(ADDRESS_1));
    }
}
