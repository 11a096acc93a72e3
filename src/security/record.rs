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

//! The per-peer security record

use std::sync::atomic::{compiler_fence, Ordering};

use bitflags::bitflags;

use crate::core::{
    address::{AddressType, AddressWithType, RawAddress},
    hci::{DeviceClass, DeviceType, LinkKeyType, Octet16},
    irk::Irk,
};

/// Identifies a record for as long as it lives in the store. Never reused.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordId(pub(crate) u64);

bitflags! {
    /// Security state of a peer, for both transports
    #[derive(Default)]
    pub struct SecurityFlags: u16 {
        /// Classic link is authenticated
        const AUTHENTICATED = 0x0002;
        /// Classic link is encrypted
        const ENCRYPTED = 0x0004;
        /// The remote name has been read
        const NAME_KNOWN = 0x0008;
        /// A classic link key is stored
        const LINK_KEY_KNOWN = 0x0010;
        /// The classic link key is MITM protected
        const LINK_KEY_AUTHED = 0x0020;
        /// LE link is authenticated
        const LE_AUTHENTICATED = 0x0200;
        /// LE link is encrypted
        const LE_ENCRYPTED = 0x0400;
        /// An LE long term key is stored
        const LE_LINK_KEY_KNOWN = 0x1000;
        /// The LE key is MITM protected
        const LE_LINK_KEY_AUTHED = 0x2000;
        /// Paired with a 16 digit PIN
        const SIXTEEN_DIGIT_PIN_AUTHED = 0x4000;
    }
}

bitflags! {
    /// Which BLE keys of the bundle are valid
    #[derive(Default)]
    pub struct BleKeyMask: u8 {
        /// Peer encryption key (LTK)
        const PENC = 0x01;
        /// Peer identity key (IRK)
        const PID = 0x02;
        /// Peer signature key (CSRK)
        const PCSRK = 0x04;
        /// Local encryption key
        const LENC = 0x08;
        /// Local identity key
        const LID = 0x10;
        /// Local signature key
        const LCSRK = 0x20;
    }
}

/// How long a bond should be kept
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BondType {
    /// No bonding has been requested yet
    #[default]
    Unknown,
    /// Keys are discarded when the link goes down
    Temporary,
    /// Keys are persisted
    Persistent,
}

/// Lifecycle of a record
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordState {
    /// Normal
    #[default]
    Active,
    /// Deletion was requested while a link was up; removed on link-down
    PendingRemoval,
}

/// The BLE key bundle
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BleKeys {
    /// Peer identity resolving key
    pub irk: Irk,
    /// Peer long term key
    pub pltk: Octet16,
    /// Peer signature key
    pub pcsrk: Octet16,
    /// Local long term key
    pub lltk: Octet16,
    /// Local signature key
    pub lcsrk: Octet16,
    /// Random number of the peer LTK (legacy pairing)
    pub rand: [u8; 8],
    /// Encrypted diversifier of the peer LTK
    pub ediv: u16,
    /// Local key diversifier
    pub div: u16,
    /// Security level of the keys
    pub sec_level: u8,
    /// Encryption key size
    pub key_size: u8,
    /// Peer sign counter
    pub counter: u32,
    /// Local sign counter
    pub local_counter: u32,
    /// Which of the above are valid
    pub key_type: BleKeyMask,
}

impl std::fmt::Debug for BleKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleKeys")
            .field("key_type", &self.key_type)
            .field("sec_level", &self.sec_level)
            .field("key_size", &self.key_size)
            .finish_non_exhaustive()
    }
}

/// One key delivered by SMP. Keys arrive independently and are stored as they arrive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BleKey {
    /// Peer LTK
    PeerEncryption {
        /// Long term key
        ltk: Octet16,
        /// Random number
        rand: [u8; 8],
        /// Encrypted diversifier
        ediv: u16,
        /// Security level
        sec_level: u8,
        /// Key size
        key_size: u8,
    },
    /// Peer IRK and identity address
    PeerIdentity {
        /// Identity resolving key
        irk: Irk,
        /// Identity address distributed with the key
        identity_address: AddressWithType,
    },
    /// Peer CSRK
    PeerSignature {
        /// Signature key
        csrk: Octet16,
        /// Sign counter
        counter: u32,
        /// Security level
        sec_level: u8,
    },
    /// Local LTK (derived from the diversifier)
    LocalEncryption {
        /// Long term key
        ltk: Octet16,
        /// Diversifier
        div: u16,
        /// Key size
        key_size: u8,
        /// Security level
        sec_level: u8,
    },
    /// Local identity key was distributed
    LocalIdentity,
    /// Local CSRK
    LocalSignature {
        /// Signature key
        csrk: Octet16,
        /// Diversifier
        div: u16,
        /// Sign counter
        counter: u32,
        /// Security level
        sec_level: u8,
    },
}

impl BleKey {
    /// The mask bit for this key
    pub fn mask(&self) -> BleKeyMask {
        match self {
            BleKey::PeerEncryption { .. } => BleKeyMask::PENC,
            BleKey::PeerIdentity { .. } => BleKeyMask::PID,
            BleKey::PeerSignature { .. } => BleKeyMask::PCSRK,
            BleKey::LocalEncryption { .. } => BleKeyMask::LENC,
            BleKey::LocalIdentity => BleKeyMask::LID,
            BleKey::LocalSignature { .. } => BleKeyMask::LCSRK,
        }
    }
}

/// Preferred LE connection parameters for a peer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeConnectionParameters {
    /// Minimum connection interval
    pub min_conn_int: u16,
    /// Maximum connection interval
    pub max_conn_int: u16,
    /// Peripheral latency
    pub peripheral_latency: u16,
    /// Supervision timeout
    pub supervision_tout: u16,
}

/// LE addressing state of a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BleInfo {
    /// The address the peer is currently known by on LE (may be an RPA)
    pub pseudo_addr: RawAddress,
    /// Type of `pseudo_addr`
    pub addr_type: AddressType,
    /// Identity address, once distributed over SMP
    pub identity_address: Option<AddressWithType>,
    /// Most recent random address seen from the peer
    pub cur_rand_addr: Option<RawAddress>,
    /// Preferred connection parameters, if the peer requested any
    pub conn_params: Option<LeConnectionParameters>,
}

impl Default for BleInfo {
    fn default() -> Self {
        Self {
            pseudo_addr: RawAddress::EMPTY,
            addr_type: AddressType::Public,
            identity_address: None,
            cur_rand_addr: None,
            conn_params: None,
        }
    }
}

/// A known peer device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub(crate) id: RecordId,
    /// The identity (or only known) address
    pub bd_addr: RawAddress,
    /// Transports the peer is known to support
    pub device_type: DeviceType,
    /// Class of device
    pub dev_class: DeviceClass,
    /// Remote name, once read
    pub name: Option<String>,
    /// Security state
    pub sec_flags: SecurityFlags,
    /// Classic link key, valid if LINK_KEY_KNOWN
    pub link_key: Octet16,
    /// Type of `link_key`
    pub link_key_type: Option<LinkKeyType>,
    /// Length of the PIN used for legacy pairing
    pub pin_code_length: u8,
    /// The link key was derived across transports
    pub is_ctkd: bool,
    /// LE addressing
    pub ble: BleInfo,
    /// LE keys
    pub ble_keys: BleKeys,
    /// Negotiated encryption key size
    pub enc_key_size: u8,
    /// Bond lifetime
    pub bond_type: BondType,
    pub(crate) state: RecordState,
    pub(crate) timestamp: u64,
}

impl DeviceRecord {
    pub(crate) fn new(id: RecordId, bd_addr: RawAddress, timestamp: u64) -> Self {
        Self {
            id,
            bd_addr,
            device_type: DeviceType::empty(),
            dev_class: [0; 3],
            name: None,
            sec_flags: SecurityFlags::empty(),
            link_key: [0; 16],
            link_key_type: None,
            pin_code_length: 0,
            is_ctkd: false,
            ble: BleInfo::default(),
            ble_keys: BleKeys::default(),
            enc_key_size: 0,
            bond_type: BondType::Unknown,
            state: RecordState::Active,
            timestamp,
        }
    }

    /// Stable identifier of this record
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Lifecycle state
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// True if deletion is deferred until link-down
    pub fn is_pending_removal(&self) -> bool {
        self.state == RecordState::PendingRemoval
    }

    /// Monotonic last-access stamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// A classic link key is stored
    pub fn is_link_key_known(&self) -> bool {
        self.sec_flags.contains(SecurityFlags::LINK_KEY_KNOWN)
    }

    /// An LE long term key is stored
    pub fn is_le_link_key_known(&self) -> bool {
        self.sec_flags.contains(SecurityFlags::LE_LINK_KEY_KNOWN)
    }

    /// Paired on either transport
    pub fn is_paired(&self) -> bool {
        self.sec_flags.intersects(SecurityFlags::LINK_KEY_KNOWN | SecurityFlags::LE_LINK_KEY_KNOWN)
    }

    /// Bonded on classic, or on LE with at least one key stored
    pub fn is_bonded(&self) -> bool {
        self.is_link_key_known()
            || (!self.ble_keys.key_type.is_empty() && self.is_le_link_key_known())
    }

    /// The link is protected against MITM on either transport
    pub fn is_mitm_protected(&self) -> bool {
        self.sec_flags
            .intersects(SecurityFlags::LINK_KEY_AUTHED | SecurityFlags::LE_LINK_KEY_AUTHED)
    }

    /// The peer's identity resolving key, if distributed
    pub fn irk(&self) -> Option<&Irk> {
        self.ble_keys.key_type.contains(BleKeyMask::PID).then_some(&self.ble_keys.irk)
    }

    /// The LE address this peer should be reached on
    pub fn le_address(&self) -> AddressWithType {
        match self.ble.identity_address {
            Some(identity) => identity,
            None => AddressWithType::new(self.bd_addr, self.ble.addr_type),
        }
    }

    /// Store a freshly created classic link key
    pub fn set_link_key(&mut self, key: Octet16, key_type: LinkKeyType, is_ctkd: bool) {
        self.link_key = key;
        self.link_key_type = Some(key_type);
        self.is_ctkd = is_ctkd;
        self.sec_flags |= SecurityFlags::LINK_KEY_KNOWN;
        if key_type.is_authenticated() {
            self.sec_flags |= SecurityFlags::LINK_KEY_AUTHED;
        } else {
            self.sec_flags -= SecurityFlags::LINK_KEY_AUTHED;
        }
        self.device_type |= DeviceType::BREDR;
    }

    /// Store one BLE key of the bundle
    pub fn set_ble_key(&mut self, key: &BleKey) {
        let keys = &mut self.ble_keys;
        match *key {
            BleKey::PeerEncryption { ltk, rand, ediv, sec_level, key_size } => {
                keys.pltk = ltk;
                keys.rand = rand;
                keys.ediv = ediv;
                keys.sec_level = sec_level;
                keys.key_size = key_size;
                self.sec_flags |= SecurityFlags::LE_LINK_KEY_KNOWN;
                if sec_level >= SEC_LEVEL_AUTHENTICATED {
                    self.sec_flags |= SecurityFlags::LE_LINK_KEY_AUTHED;
                }
            }
            BleKey::PeerIdentity { irk, identity_address } => {
                keys.irk = irk;
                self.ble.identity_address = Some(identity_address);
            }
            BleKey::PeerSignature { csrk, counter, sec_level } => {
                keys.pcsrk = csrk;
                keys.counter = counter;
                keys.sec_level = keys.sec_level.max(sec_level);
            }
            BleKey::LocalEncryption { ltk, div, key_size, sec_level } => {
                keys.lltk = ltk;
                keys.div = div;
                keys.key_size = key_size;
                keys.sec_level = keys.sec_level.max(sec_level);
            }
            BleKey::LocalIdentity => {}
            BleKey::LocalSignature { csrk, div, counter, sec_level } => {
                keys.lcsrk = csrk;
                keys.div = div;
                keys.local_counter = counter;
                keys.sec_level = keys.sec_level.max(sec_level);
            }
        }
        keys.key_type |= key.mask();
        self.device_type |= DeviceType::BLE;
    }

    /// Overwrite all key material with zeroes
    pub(crate) fn wipe_secrets(&mut self) {
        self.link_key.fill(0);
        let keys = &mut self.ble_keys;
        keys.irk.0.fill(0);
        keys.pltk.fill(0);
        keys.pcsrk.fill(0);
        keys.lltk.fill(0);
        keys.lcsrk.fill(0);
        keys.rand.fill(0);
        keys.ediv = 0;
        keys.div = 0;
        keys.key_type = BleKeyMask::empty();
        // keep the stores from being elided before the record is freed
        compiler_fence(Ordering::SeqCst);
    }
}

/// SMP security level reached with MITM protection
pub const SEC_LEVEL_AUTHENTICATED: u8 = 4;

#[cfg(test)]
mod test {
    use super::*;

    const ADDRESS: RawAddress = RawAddress([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_authenticated_link_key_sets_mitm() {
        let mut record = DeviceRecord::new(RecordId(0), ADDRESS, 0);

        record.set_link_key([7; 16], LinkKeyType::AuthCombinationP256, false);

        assert!(record.is_link_key_known());
        assert!(record.is_mitm_protected());
        assert!(record.is_bonded());
        assert!(record.device_type.contains(DeviceType::BREDR));
    }

    #[test]
    fn test_ble_keys_accumulate() {
        let mut record = DeviceRecord::new(RecordId(0), ADDRESS, 0);

        record.set_ble_key(&BleKey::PeerEncryption {
            ltk: [1; 16],
            rand: [2; 8],
            ediv: 3,
            sec_level: 1,
            key_size: 16,
        });
        record.set_ble_key(&BleKey::PeerIdentity {
            irk: Irk([4; 16]),
            identity_address: AddressWithType::new(ADDRESS, AddressType::Public),
        });

        assert!(record.is_le_link_key_known());
        assert!(!record.is_mitm_protected());
        assert_eq!(record.ble_keys.key_type, BleKeyMask::PENC | BleKeyMask::PID);
        assert_eq!(record.irk(), Some(&Irk([4; 16])));
    }

    #[test]
    fn test_wipe_secrets() {
        let mut record = DeviceRecord::new(RecordId(0), ADDRESS, 0);
        record.set_link_key([7; 16], LinkKeyType::Combination, false);
        record.set_ble_key(&BleKey::LocalSignature {
            csrk: [9; 16],
            div: 1,
            counter: 2,
            sec_level: 1,
        });

        record.wipe_secrets();

        assert_eq!(record.link_key, [0; 16]);
        assert_eq!(record.ble_keys.lcsrk, [0; 16]);
        assert!(record.irk().is_none());
    }
}
