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

//! Records every request the pairing engine makes of the layers around it.
//! Clones share state, so a test keeps one handle and gives the other away.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use crate::{
    core::{
        address::{AddressWithType, RawAddress},
        hci::{BtmStatus, DeviceType, Octet16, Transport},
    },
    security::commands::{
        OobDataSource, RemoteNameService, SecurityCommands, ServiceChangeTracker,
    },
};

/// A request observed by one of the mocks
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityRequest {
    Bond(AddressWithType, Transport),
    CancelBond(RawAddress),
    PinReply(RawAddress, BtmStatus, Vec<u8>),
    ConfirmReply(RawAddress, Transport, BtmStatus),
    PasskeyReply(RawAddress, BtmStatus, u32),
    RemoteOobReply(RawAddress, BtmStatus),
    ReadLocalOobData,
    BleSecurityGrant(RawAddress, BtmStatus),
    BlePasskeyReply(RawAddress, BtmStatus, u32),
    SetEncryption(RawAddress, Transport),
    RemoteName(RawAddress, Transport),
    ServiceChangeCcc(RawAddress, bool, Transport),
}

#[derive(Debug)]
struct MockState {
    requests: VecDeque<SecurityRequest>,
    bond_status: BtmStatus,
    cancel_bond_status: BtmStatus,
    encryption_status: BtmStatus,
    name_status: BtmStatus,
    oob_data: HashMap<RawAddress, (Octet16, Octet16)>,
}

/// Implements every security collaborator over one shared request log
#[derive(Clone, Debug)]
pub struct MockSecurityLayers {
    state: Rc<RefCell<MockState>>,
}

impl MockSecurityLayers {
    /// Constructor. Asynchronous requests answer `CmdStarted` by default.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                requests: VecDeque::new(),
                bond_status: BtmStatus::CmdStarted,
                cancel_bond_status: BtmStatus::CmdStarted,
                encryption_status: BtmStatus::CmdStarted,
                name_status: BtmStatus::CmdStarted,
                oob_data: HashMap::new(),
            })),
        }
    }

    /// Status returned by `bond`
    pub fn set_bond_status(&self, status: BtmStatus) {
        self.state.borrow_mut().bond_status = status;
    }

    /// Status returned by `cancel_bond`
    pub fn set_cancel_bond_status(&self, status: BtmStatus) {
        self.state.borrow_mut().cancel_bond_status = status;
    }

    /// Status returned by `set_encryption`
    pub fn set_encryption_status(&self, status: BtmStatus) {
        self.state.borrow_mut().encryption_status = status;
    }

    /// Status returned by `request_remote_name`
    pub fn set_name_status(&self, status: BtmStatus) {
        self.state.borrow_mut().name_status = status;
    }

    /// Hold remote OOB data for a peer
    pub fn add_oob_data(&self, address: RawAddress, c: Octet16, r: Octet16) {
        self.state.borrow_mut().oob_data.insert(address, (c, r));
    }

    /// Pop the oldest request not yet inspected
    pub fn next_request(&self) -> Option<SecurityRequest> {
        self.state.borrow_mut().requests.pop_front()
    }

    /// Drain all requests not yet inspected
    pub fn take_requests(&self) -> Vec<SecurityRequest> {
        self.state.borrow_mut().requests.drain(..).collect()
    }

    fn record(&self, request: SecurityRequest) {
        self.state.borrow_mut().requests.push_back(request);
    }
}

impl Default for MockSecurityLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityCommands for MockSecurityLayers {
    fn bond(
        &mut self,
        address: AddressWithType,
        transport: Transport,
        _device_type: DeviceType,
    ) -> BtmStatus {
        self.record(SecurityRequest::Bond(address, transport));
        self.state.borrow().bond_status
    }

    fn cancel_bond(&mut self, address: RawAddress) -> BtmStatus {
        self.record(SecurityRequest::CancelBond(address));
        self.state.borrow().cancel_bond_status
    }

    fn pin_reply(&mut self, address: RawAddress, status: BtmStatus, pin: &[u8]) {
        self.record(SecurityRequest::PinReply(address, status, pin.to_vec()));
    }

    fn confirm_reply(&mut self, address: RawAddress, transport: Transport, status: BtmStatus) {
        self.record(SecurityRequest::ConfirmReply(address, transport, status));
    }

    fn passkey_reply(&mut self, address: RawAddress, status: BtmStatus, passkey: u32) {
        self.record(SecurityRequest::PasskeyReply(address, status, passkey));
    }

    fn remote_oob_reply(
        &mut self,
        address: RawAddress,
        status: BtmStatus,
        _c: Octet16,
        _r: Octet16,
    ) {
        self.record(SecurityRequest::RemoteOobReply(address, status));
    }

    fn read_local_oob_data(&mut self) -> BtmStatus {
        self.record(SecurityRequest::ReadLocalOobData);
        BtmStatus::CmdStarted
    }

    fn ble_security_grant(&mut self, address: RawAddress, status: BtmStatus) {
        self.record(SecurityRequest::BleSecurityGrant(address, status));
    }

    fn ble_passkey_reply(&mut self, address: RawAddress, status: BtmStatus, passkey: u32) {
        self.record(SecurityRequest::BlePasskeyReply(address, status, passkey));
    }

    fn set_encryption(&mut self, address: RawAddress, transport: Transport) -> BtmStatus {
        self.record(SecurityRequest::SetEncryption(address, transport));
        self.state.borrow().encryption_status
    }
}

impl RemoteNameService for MockSecurityLayers {
    fn request_remote_name(&mut self, address: RawAddress, transport: Transport) -> BtmStatus {
        self.record(SecurityRequest::RemoteName(address, transport));
        self.state.borrow().name_status
    }
}

impl OobDataSource for MockSecurityLayers {
    fn has_oob_data(&self, address: RawAddress) -> bool {
        self.state.borrow().oob_data.contains_key(&address)
    }

    fn remote_oob_data(&mut self, address: RawAddress) -> Option<(Octet16, Octet16)> {
        self.state.borrow().oob_data.get(&address).copied()
    }
}

impl ServiceChangeTracker for MockSecurityLayers {
    fn configure_service_change_ccc(
        &mut self,
        address: RawAddress,
        enable: bool,
        transport: Transport,
    ) {
        self.record(SecurityRequest::ServiceChangeCcc(address, enable, transport));
    }
}
