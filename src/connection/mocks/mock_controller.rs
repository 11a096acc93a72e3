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

//! This module mocks the controller below the connection layer. It records
//! every command, tracks the controller-side accept list and outbound
//! registrations, and asserts on violations of the contracts documented in
//! controller.rs.

use std::{
    cell::RefCell,
    collections::{HashSet, VecDeque},
    rc::Rc,
};

use crate::{
    connection::controller::{AcceptlistController, AclController, OutboundTransport},
    core::{
        address::{AddressWithType, RawAddress},
        hci::{ConnectionHandle, ErrorCode, Transport},
        irk::Irk,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerCommand {
    CreateConnection(AddressWithType, Transport),
    CancelCreateConnection(AddressWithType, Transport),
    AcceptConnectionRequest(RawAddress),
    RejectConnectionRequest(RawAddress, ErrorCode),
    Disconnect(ConnectionHandle, ErrorCode),
    AddToAcceptlist(AddressWithType),
    RemoveFromAcceptlist(AddressWithType),
    ClearAcceptlist,
    AddToResolvingList(AddressWithType),
    RemoveFromResolvingList(AddressWithType),
}

#[derive(Debug, Default)]
struct MockControllerState {
    commands: VecDeque<ControllerCommand>,
    acceptlist: HashSet<AddressWithType>,
    resolving_list: HashSet<AddressWithType>,
    registered: HashSet<ConnectionHandle>,
}

#[derive(Clone, Debug, Default)]
pub struct MockController {
    state: Rc<RefCell<MockControllerState>>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_command(&self) -> Option<ControllerCommand> {
        self.state.borrow_mut().commands.pop_front()
    }

    pub fn take_commands(&self) -> Vec<ControllerCommand> {
        self.state.borrow_mut().commands.drain(..).collect()
    }

    pub fn current_acceptlist(&self) -> HashSet<AddressWithType> {
        self.state.borrow().acceptlist.clone()
    }

    pub fn current_resolving_list(&self) -> HashSet<AddressWithType> {
        self.state.borrow().resolving_list.clone()
    }

    pub fn is_registered(&self, handle: ConnectionHandle) -> bool {
        self.state.borrow().registered.contains(&handle)
    }

    fn record(&self, command: ControllerCommand) {
        self.state.borrow_mut().commands.push_back(command);
    }
}

impl AclController for MockController {
    fn create_connection(&mut self, address: AddressWithType, transport: Transport) {
        self.record(ControllerCommand::CreateConnection(address, transport));
    }

    fn cancel_create_connection(&mut self, address: AddressWithType, transport: Transport) {
        self.record(ControllerCommand::CancelCreateConnection(address, transport));
    }

    fn accept_connection_request(&mut self, address: RawAddress) {
        self.record(ControllerCommand::AcceptConnectionRequest(address));
    }

    fn reject_connection_request(&mut self, address: RawAddress, reason: ErrorCode) {
        self.record(ControllerCommand::RejectConnectionRequest(address, reason));
    }

    fn disconnect(&mut self, handle: ConnectionHandle, reason: ErrorCode) {
        self.record(ControllerCommand::Disconnect(handle, reason));
    }
}

impl AcceptlistController for MockController {
    fn add_to_acceptlist(&mut self, address: AddressWithType) {
        let ok = self.state.borrow_mut().acceptlist.insert(address);
        assert!(ok, "Already on the controller accept list");
        self.record(ControllerCommand::AddToAcceptlist(address));
    }

    fn remove_from_acceptlist(&mut self, address: AddressWithType) {
        let ok = self.state.borrow_mut().acceptlist.remove(&address);
        assert!(ok, "Not on the controller accept list");
        self.record(ControllerCommand::RemoveFromAcceptlist(address));
    }

    fn clear_acceptlist(&mut self) {
        self.state.borrow_mut().acceptlist.clear();
        self.record(ControllerCommand::ClearAcceptlist);
    }

    fn add_to_resolving_list(&mut self, identity: AddressWithType, _irk: Irk) {
        let ok = self.state.borrow_mut().resolving_list.insert(identity);
        assert!(ok, "Already on the controller resolving list");
        self.record(ControllerCommand::AddToResolvingList(identity));
    }

    fn remove_from_resolving_list(&mut self, identity: AddressWithType) {
        let ok = self.state.borrow_mut().resolving_list.remove(&identity);
        assert!(ok, "Not on the controller resolving list");
        self.record(ControllerCommand::RemoveFromResolvingList(identity));
    }
}

impl OutboundTransport for MockController {
    fn register(&mut self, handle: ConnectionHandle) {
        let ok = self.state.borrow_mut().registered.insert(handle);
        assert!(ok, "Connection already registered for outbound data");
    }

    fn unregister(&mut self, handle: ConnectionHandle) {
        let ok = self.state.borrow_mut().registered.remove(&handle);
        assert!(ok, "Connection not registered for outbound data");
    }
}
