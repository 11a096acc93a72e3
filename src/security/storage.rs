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

//! Persisting device records through the key-value config store. Each
//! paired device owns one section named after its address, and every field
//! is written individually (there is no transaction across fields).

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::core::{
    address::{AddressType, AddressWithType, RawAddress},
    hci::LinkKeyType,
    irk::Irk,
};

use super::{
    record::{BleKey, BondType, DeviceRecord},
    store::DeviceRecordStore,
};

/// The persistent key-value store holding paired device information
pub trait ConfigStore {
    /// Read a value
    fn get(&self, section: &str, key: &str) -> Option<String>;
    /// Write a value, creating the section if needed
    fn set(&mut self, section: &str, key: &str, value: String);
    /// Remove a value. Returns false if it did not exist.
    fn remove(&mut self, section: &str, key: &str) -> bool;
    /// True if the value exists
    fn exists(&self, section: &str, key: &str) -> bool;
    /// Sections of devices holding a classic or LE key
    fn paired_device_sections(&self) -> Vec<String>;
}

/// Config key names
pub mod keys {
    /// Classic link key, 32 hex digits
    pub const LINK_KEY: &str = "LinkKey";
    /// Classic link key type, decimal
    pub const LINK_KEY_TYPE: &str = "LinkKeyType";
    /// Legacy PIN length, decimal
    pub const PIN_LENGTH: &str = "PinLength";
    /// Class of device, decimal
    pub const DEV_CLASS: &str = "DevClass";
    /// Remote name
    pub const NAME: &str = "Name";
    /// Peer LTK bundle
    pub const LE_KEY_PENC: &str = "LE_KEY_PENC";
    /// Peer IRK and identity address
    pub const LE_KEY_PID: &str = "LE_KEY_PID";
    /// Peer CSRK
    pub const LE_KEY_PCSRK: &str = "LE_KEY_PCSRK";
    /// Local LTK
    pub const LE_KEY_LENC: &str = "LE_KEY_LENC";
    /// Local CSRK
    pub const LE_KEY_LCSRK: &str = "LE_KEY_LCSRK";
    /// Local identity key distributed
    pub const LE_KEY_LID: &str = "LE_KEY_LID";

    /// Every key a device section may hold
    pub const ALL: [&str; 11] = [
        LINK_KEY,
        LINK_KEY_TYPE,
        PIN_LENGTH,
        DEV_CLASS,
        NAME,
        LE_KEY_PENC,
        LE_KEY_PID,
        LE_KEY_PCSRK,
        LE_KEY_LENC,
        LE_KEY_LCSRK,
        LE_KEY_LID,
    ];
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        bail!("malformed hex string");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| anyhow!(e)))
        .collect()
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| anyhow!("expected {N} bytes, got {}", bytes.len()))
}

fn encode_ble_key(key: &BleKey) -> (&'static str, Vec<u8>) {
    let mut out = vec![];
    let name = match key {
        BleKey::PeerEncryption { ltk, rand, ediv, sec_level, key_size } => {
            out.extend_from_slice(ltk);
            out.extend_from_slice(rand);
            out.extend_from_slice(&ediv.to_le_bytes());
            out.extend_from_slice(&[*sec_level, *key_size]);
            keys::LE_KEY_PENC
        }
        BleKey::PeerIdentity { irk, identity_address } => {
            out.extend_from_slice(&irk.0);
            out.push(identity_address.address_type as u8);
            out.extend_from_slice(&identity_address.address.0);
            keys::LE_KEY_PID
        }
        BleKey::PeerSignature { csrk, counter, sec_level } => {
            out.extend_from_slice(csrk);
            out.extend_from_slice(&counter.to_le_bytes());
            out.push(*sec_level);
            keys::LE_KEY_PCSRK
        }
        BleKey::LocalEncryption { ltk, div, key_size, sec_level } => {
            out.extend_from_slice(ltk);
            out.extend_from_slice(&div.to_le_bytes());
            out.extend_from_slice(&[*key_size, *sec_level]);
            keys::LE_KEY_LENC
        }
        BleKey::LocalIdentity => keys::LE_KEY_LID,
        BleKey::LocalSignature { csrk, div, counter, sec_level } => {
            out.extend_from_slice(csrk);
            out.extend_from_slice(&div.to_le_bytes());
            out.extend_from_slice(&counter.to_le_bytes());
            out.push(*sec_level);
            keys::LE_KEY_LCSRK
        }
    };
    (name, out)
}

fn decode_ble_key(name: &str, b: &[u8]) -> Result<BleKey> {
    let key = match name {
        keys::LE_KEY_PENC if b.len() == 28 => BleKey::PeerEncryption {
            ltk: array(&b[..16])?,
            rand: array(&b[16..24])?,
            ediv: u16::from_le_bytes(array(&b[24..26])?),
            sec_level: b[26],
            key_size: b[27],
        },
        keys::LE_KEY_PID if b.len() == 23 => BleKey::PeerIdentity {
            irk: Irk(array(&b[..16])?),
            identity_address: AddressWithType::new(
                RawAddress(array(&b[17..23])?),
                if b[16] == 0 { AddressType::Public } else { AddressType::Random },
            ),
        },
        keys::LE_KEY_PCSRK if b.len() == 21 => BleKey::PeerSignature {
            csrk: array(&b[..16])?,
            counter: u32::from_le_bytes(array(&b[16..20])?),
            sec_level: b[20],
        },
        keys::LE_KEY_LENC if b.len() == 20 => BleKey::LocalEncryption {
            ltk: array(&b[..16])?,
            div: u16::from_le_bytes(array(&b[16..18])?),
            key_size: b[18],
            sec_level: b[19],
        },
        keys::LE_KEY_LID => BleKey::LocalIdentity,
        keys::LE_KEY_LCSRK if b.len() == 23 => BleKey::LocalSignature {
            csrk: array(&b[..16])?,
            div: u16::from_le_bytes(array(&b[16..18])?),
            counter: u32::from_le_bytes(array(&b[18..22])?),
            sec_level: b[22],
        },
        _ => bail!("malformed {name} of {} bytes", b.len()),
    };
    Ok(key)
}

/// Persist the classic link key (and the fields needed to restore it) of a record
pub fn save_link_key(config: &mut dyn ConfigStore, record: &DeviceRecord) {
    let Some(key_type) = record.link_key_type.and_then(|t| t.to_u8()) else {
        warn!("Not saving {}: no link key", record.bd_addr);
        return;
    };
    let section = record.bd_addr.to_string();
    config.set(&section, keys::LINK_KEY, to_hex(&record.link_key));
    config.set(&section, keys::LINK_KEY_TYPE, key_type.to_string());
    config.set(&section, keys::PIN_LENGTH, record.pin_code_length.to_string());
    let [a, b, c] = record.dev_class;
    config.set(&section, keys::DEV_CLASS, u32::from_be_bytes([0, a, b, c]).to_string());
    if let Some(name) = &record.name {
        config.set(&section, keys::NAME, name.clone());
    }
}

/// Persist one BLE key of a device
pub fn save_ble_key(config: &mut dyn ConfigStore, address: RawAddress, key: &BleKey) {
    let (name, bytes) = encode_ble_key(key);
    config.set(&address.to_string(), name, to_hex(&bytes));
}

/// Forget everything persisted about a device
pub fn remove_device_config(config: &mut dyn ConfigStore, address: RawAddress) {
    let section = address.to_string();
    for key in keys::ALL {
        config.remove(&section, key);
    }
}

/// Move everything persisted about a device to a new section, once its
/// identity address is known
pub fn move_device_config(config: &mut dyn ConfigStore, from: RawAddress, to: RawAddress) {
    let (from, to) = (from.to_string(), to.to_string());
    for key in keys::ALL {
        if let Some(value) = config.get(&from, key) {
            config.set(&to, key, value);
            config.remove(&from, key);
        }
    }
}

fn restore_device(
    config: &dyn ConfigStore,
    section: &str,
    store: &mut DeviceRecordStore,
) -> Result<()> {
    let address: RawAddress =
        section.parse().map_err(|_| anyhow!("section {section} is not an address"))?;

    if let Some(link_key) = config.get(section, keys::LINK_KEY) {
        let link_key = array(&from_hex(&link_key).context("bad link key")?)?;
        let key_type = config
            .get(section, keys::LINK_KEY_TYPE)
            .and_then(|t| t.parse::<u8>().ok())
            .and_then(LinkKeyType::from_u8)
            .context("missing or invalid link key type")?;
        let pin_length =
            config.get(section, keys::PIN_LENGTH).and_then(|p| p.parse().ok()).unwrap_or(0);
        let dev_class = config
            .get(section, keys::DEV_CLASS)
            .and_then(|c| c.parse::<u32>().ok())
            .map(|c| {
                let [_, a, b, c] = c.to_be_bytes();
                [a, b, c]
            });
        store.add_device_from_storage(address, dev_class, link_key, key_type, pin_length);
    }

    for name in [
        keys::LE_KEY_PENC,
        keys::LE_KEY_PID,
        keys::LE_KEY_PCSRK,
        keys::LE_KEY_LENC,
        keys::LE_KEY_LCSRK,
        keys::LE_KEY_LID,
    ] {
        let Some(value) = config.get(section, name) else {
            continue;
        };
        let key = decode_ble_key(name, &from_hex(&value)?)?;
        let record = store.allocate_or_find(address);
        record.set_ble_key(&key);
        record.bond_type = BondType::Persistent;
    }

    if let Some(name) = config.get(section, keys::NAME) {
        store.set_name(address, &name);
    }
    Ok(())
}

/// Load every paired device from the config store. Malformed sections are
/// skipped. Returns the number of devices restored.
pub fn restore_paired_devices(config: &dyn ConfigStore, store: &mut DeviceRecordStore) -> usize {
    let mut restored = 0;
    for section in config.paired_device_sections() {
        match restore_device(config, &section, store) {
            Ok(()) => restored += 1,
            Err(e) => warn!("Skipping paired device {section}: {e:#}"),
        }
    }
    info!("Restored {restored} paired devices");
    restored
}
