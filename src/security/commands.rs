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

//! The operations the pairing engine consumes from the layers around it.
//!
//! Requests that complete asynchronously return `BtmStatus::CmdStarted`; the
//! owner of the engine routes their completion back in (for example
//! `SecurityPairingEngine::on_remote_name_complete`). None of these calls may
//! re-enter the engine.

use crate::core::{
    address::{AddressWithType, RawAddress},
    hci::{BtmStatus, DeviceType, Octet16, Transport},
};

/// Security commands issued to the link manager / SMP below us
pub trait SecurityCommands {
    /// Start bonding with a peer
    fn bond(
        &mut self,
        address: AddressWithType,
        transport: Transport,
        device_type: DeviceType,
    ) -> BtmStatus;
    /// Cancel an ongoing bonding attempt
    fn cancel_bond(&mut self, address: RawAddress) -> BtmStatus;
    /// Answer a legacy PIN request. An empty PIN with a failure status rejects it.
    fn pin_reply(&mut self, address: RawAddress, status: BtmStatus, pin: &[u8]);
    /// Answer a numeric comparison on either transport
    fn confirm_reply(&mut self, address: RawAddress, transport: Transport, status: BtmStatus);
    /// Answer a classic passkey request
    fn passkey_reply(&mut self, address: RawAddress, status: BtmStatus, passkey: u32);
    /// Answer a remote OOB data request with the commitment and randomizer
    fn remote_oob_reply(&mut self, address: RawAddress, status: BtmStatus, c: Octet16, r: Octet16);
    /// Ask the controller for fresh local P-192 OOB data
    fn read_local_oob_data(&mut self) -> BtmStatus;
    /// Grant or refuse an LE pairing consent / security request
    fn ble_security_grant(&mut self, address: RawAddress, status: BtmStatus);
    /// Answer an LE passkey request
    fn ble_passkey_reply(&mut self, address: RawAddress, status: BtmStatus, passkey: u32);
    /// Encrypt the link to a peer
    fn set_encryption(&mut self, address: RawAddress, transport: Transport) -> BtmStatus;
}

/// Reads remote device names
pub trait RemoteNameService {
    /// Start a remote name request. The result is routed back through the
    /// engine owner once the controller answers.
    fn request_remote_name(&mut self, address: RawAddress, transport: Transport) -> BtmStatus;
}

/// Remote OOB data received by the application over another channel
pub trait OobDataSource {
    /// True if OOB data is held for the peer
    fn has_oob_data(&self, address: RawAddress) -> bool;
    /// The commitment and randomizer for the peer, if any
    fn remote_oob_data(&mut self, address: RawAddress) -> Option<(Octet16, Octet16)>;
}

/// Tracks which bonded clients must be told about GATT database changes
pub trait ServiceChangeTracker {
    /// Enable (or disable) the Service Changed indication for a peer
    fn configure_service_change_ccc(
        &mut self,
        address: RawAddress,
        enable: bool,
        transport: Transport,
    );
}
