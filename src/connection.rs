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

//! This module manages the lifecycle of ACL connections, classic and LE.
//! It accepts or rejects incoming connections, tracks outgoing attempts,
//! keeps the ConnectionTable in step with controller events, routes link
//! events to the SecurityPairingEngine and notifies upper-layer subscribers.

use std::collections::HashSet;

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::{
    core::{
        address::{AddressType, AddressWithType, RawAddress},
        hci::{BtmStatus, ConnectionHandle, DeviceClass, DeviceType, ErrorCode, Role, Transport},
    },
    security::{
        pairing::{LinkState, SecurityPairingEngine, SmpEvent},
        record::BondType,
    },
};

use self::{
    acceptlist_manager::{AcceptlistError, AcceptlistManager},
    controller::AclController,
    table::{
        ConnectionEntry, ConnectionTable, EncryptionCallback, EncryptionStatus, LeConnectionData,
    },
};

pub mod acceptlist_manager;
pub mod controller;
pub mod mocks;
pub mod table;

/// Possible errors returned when making a connection attempt
#[derive(Debug, PartialEq, Eq)]
pub enum CreateConnectionFailure {
    /// A connection attempt of the same transport to the same address is
    /// already running
    ConnectionAlreadyPending,
    /// The peer is already connected on this transport
    AlreadyConnected,
}

/// Errors returned if the client fails to cancel their connection attempt
#[derive(Debug, PartialEq, Eq)]
pub enum CancelConnectFailure {
    /// The connection attempt does not exist
    ConnectionNotPending,
}

/// A live connection, as seen by subscribers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AclConnection {
    /// Connection handle
    pub handle: ConnectionHandle,
    /// Transport of the link
    pub transport: Transport,
    /// The peer, by identity address when known
    pub peer: AddressWithType,
    /// Our role
    pub role: Role,
    /// We initiated the connection
    pub locally_initiated: bool,
}

impl From<&ConnectionEntry> for AclConnection {
    fn from(entry: &ConnectionEntry) -> Self {
        Self {
            handle: entry.handle,
            transport: entry.transport,
            peer: entry.peer,
            role: entry.role,
            locally_initiated: entry.locally_initiated,
        }
    }
}

/// Upper layers (GATT, profiles) interested in links coming and going
pub trait AclSubscriber {
    /// A link is up
    fn on_connected(&self, connection: &AclConnection);
    /// A connection attempt failed
    fn on_connect_failed(&self, peer: AddressWithType, transport: Transport, status: ErrorCode);
    /// A link went down
    fn on_disconnected(&self, connection: &AclConnection, reason: ErrorCode);
    /// A link was torn down because the system is suspending. No
    /// `on_disconnected` follows.
    fn on_suspend_initiated_disconnect(&self, connection: &AclConnection, reason: ErrorCode);
}

/// An LE Connection Complete event (legacy or enhanced)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeConnectionComplete {
    /// HCI status
    pub status: ErrorCode,
    /// Connection handle
    pub handle: ConnectionHandle,
    /// Our role
    pub role: Role,
    /// The peer address. If the controller resolved it, the identity address.
    pub peer: AddressWithType,
    /// Our address on this link
    pub local_address: AddressWithType,
    /// The RPA the peer used, when the controller resolved it
    pub peer_rpa: Option<AddressWithType>,
    /// Connection interval, in 1.25ms units
    pub conn_interval: u16,
    /// Peripheral latency, in connection events
    pub conn_latency: u16,
    /// Supervision timeout, in 10ms units
    pub supervision_timeout: u16,
    /// The advertising set that accepted the connection (peripheral role)
    pub advertising_set_id: Option<u8>,
}

/// What the pairing engine sees of the links: the table for link-up checks
/// and the accept list for removals
struct Links<'a> {
    table: &'a ConnectionTable,
    acceptlist: &'a mut AcceptlistManager,
}

impl LinkState for Links<'_> {
    fn is_acl_up(&self, address: RawAddress) -> bool {
        self.table.is_acl_up(address)
    }

    fn remove_from_acceptlist(&mut self, address: AddressWithType) {
        self.acceptlist.remove_address(address.address);
    }
}

/// Owns the connection table, the accept list and the pairing engine, and
/// drives them from controller events
pub struct AclLifecycleManager {
    table: ConnectionTable,
    acceptlist: AcceptlistManager,
    security: SecurityPairingEngine,
    controller: Box<dyn AclController>,
    subscribers: Vec<Box<dyn AclSubscriber>>,
    /// Outgoing attempts, by the address they were made to
    pending: HashSet<(RawAddress, Transport)>,
    /// Handles whose disconnection was already reported, or never exposed
    silent_disconnects: HashSet<ConnectionHandle>,
    accept_all: bool,
    suspended: bool,
}

impl AclLifecycleManager {
    /// Constructor
    pub fn new(
        table: ConnectionTable,
        acceptlist: AcceptlistManager,
        security: SecurityPairingEngine,
        controller: Box<dyn AclController>,
    ) -> Self {
        Self {
            table,
            acceptlist,
            security,
            controller,
            subscribers: vec![],
            pending: HashSet::new(),
            silent_disconnects: HashSet::new(),
            accept_all: false,
            suspended: false,
        }
    }

    /// Register an upper-layer subscriber
    pub fn add_subscriber(&mut self, subscriber: Box<dyn AclSubscriber>) {
        self.subscribers.push(subscriber);
    }

    fn notify(&self, f: impl Fn(&dyn AclSubscriber)) {
        for subscriber in &self.subscribers {
            f(subscriber.as_ref());
        }
    }

    /// Live connections
    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    /// The accept list shadow
    pub fn acceptlist(&self) -> &AcceptlistManager {
        &self.acceptlist
    }

    /// The accept list shadow, for controller size updates
    pub fn acceptlist_mut(&mut self) -> &mut AcceptlistManager {
        &mut self.acceptlist
    }

    /// The pairing engine
    pub fn security(&self) -> &SecurityPairingEngine {
        &self.security
    }

    /// The pairing engine, for events and replies that need no link state
    pub fn security_mut(&mut self) -> &mut SecurityPairingEngine {
        &mut self.security
    }

    /// Accept incoming classic connections from unknown devices too
    pub fn set_accept_all_connections(&mut self, accept_all: bool) {
        self.accept_all = accept_all;
    }

    /// While suspended, incoming connections are still handled; they are
    /// logged as the reason the host woke up
    pub fn set_system_suspend_state(&mut self, suspended: bool) {
        info!("System suspend state: {suspended}");
        self.suspended = suspended;
    }

    /// True if the system is suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn links(&mut self) -> (&mut SecurityPairingEngine, Links<'_>) {
        (&mut self.security, Links { table: &self.table, acceptlist: &mut self.acceptlist })
    }

    /// Incoming classic connection request. Returns true if it was accepted.
    pub fn on_connection_request(&mut self, address: RawAddress, dev_class: DeviceClass) -> bool {
        if self.suspended {
            info!("Connection request from {} while suspended", address.to_loggable_string());
        }
        let known = match self.security.store_mut().find_mut(address) {
            Some(record) => {
                record.dev_class = dev_class;
                true
            }
            None => false,
        };
        if !self.accept_all && !known {
            info!("Rejecting connection from unknown device {}", address.to_loggable_string());
            self.controller
                .reject_connection_request(address, ErrorCode::REJECTED_UNACCEPTABLE_BD_ADDR);
            return false;
        }
        debug!("Accepting connection from {}", address.to_loggable_string());
        self.controller.accept_connection_request(address);
        true
    }

    /// Classic Connection Complete
    pub fn on_connection_complete(
        &mut self,
        status: ErrorCode,
        handle: ConnectionHandle,
        address: RawAddress,
    ) {
        let locally_initiated = self.pending.remove(&(address, Transport::BrEdr));
        let peer = AddressWithType::new(address, AddressType::Public);
        if status != ErrorCode::SUCCESS {
            info!(
                "Classic connection to {} failed, status {status:?}",
                address.to_loggable_string()
            );
            self.notify(|s| s.on_connect_failed(peer, Transport::BrEdr, status));
            return;
        }

        self.security.store_mut().allocate_or_find(address).device_type |= DeviceType::BREDR;
        let role = if locally_initiated { Role::Central } else { Role::Peripheral };
        let entry = ConnectionEntry::new(handle, Transport::BrEdr, peer, role, locally_initiated);
        self.add_connection(entry);
    }

    /// LE Connection Complete
    pub fn on_le_connection_complete(&mut self, event: LeConnectionComplete) {
        let identity = self.resolve_identity(event.peer, event.peer_rpa);
        let to_identity = self.pending.remove(&(identity.address, Transport::Le));
        let to_peer = self.pending.remove(&(event.peer.address, Transport::Le));
        let locally_initiated = to_identity || to_peer;

        if event.status != ErrorCode::SUCCESS {
            info!("LE connection to {identity} failed, status {:?}", event.status);
            if self.acceptlist.contains(&identity) {
                self.acceptlist.remove(identity);
            }
            self.notify(|s| s.on_connect_failed(identity, Transport::Le, event.status));
            return;
        }

        // the controller resolved the RPA itself, so the identity is what sits on the list
        let in_filter_accept_list = self.acceptlist.contains(&identity);
        if in_filter_accept_list {
            self.acceptlist.remove(identity);
        }

        // a background connection cancelled just before it completed
        if event.role == Role::Central && !in_filter_accept_list && !locally_initiated {
            warn!(
                "Connection to {identity} completed as central with no attempt pending, \
                 disconnecting {:?}",
                event.handle
            );
            self.controller.disconnect(event.handle, ErrorCode::REMOTE_USER_TERMINATED);
            self.silent_disconnects.insert(event.handle);
            return;
        }

        let peer_rpa = event.peer_rpa.or_else(|| (identity != event.peer).then_some(event.peer));
        let record = self.security.store_mut().allocate_or_find(identity.address);
        record.device_type |= DeviceType::BLE;
        if let Some(rpa) = peer_rpa {
            record.ble.cur_rand_addr = Some(rpa.address);
        }

        let le = LeConnectionData {
            local_address: event.local_address,
            peer_rpa,
            conn_interval: event.conn_interval,
            conn_latency: event.conn_latency,
            supervision_timeout: event.supervision_timeout,
            advertising_set_id: event.advertising_set_id,
            in_filter_accept_list,
        };
        let entry = ConnectionEntry::new(
            event.handle,
            Transport::Le,
            identity,
            event.role,
            locally_initiated,
        )
        .with_le_data(le);
        self.add_connection(entry);
    }

    /// The identity of an LE peer: as reported if the controller resolved
    /// it, otherwise looked up through the stored IRKs
    fn resolve_identity(
        &self,
        peer: AddressWithType,
        peer_rpa: Option<AddressWithType>,
    ) -> AddressWithType {
        if peer_rpa.is_some() || !peer.is_rpa() {
            return peer;
        }
        self.security
            .store()
            .find(peer.address)
            .and_then(|record| record.ble.identity_address)
            .unwrap_or(peer)
    }

    fn add_connection(&mut self, entry: ConnectionEntry) {
        let connection = AclConnection::from(&entry);
        // a new link on the handle means the old one is gone, reported or not
        if self.silent_disconnects.remove(&connection.handle) {
            debug!("{:?} reused before its disconnection was reported", connection.handle);
        }
        if self.table.insert(entry).is_err() {
            self.controller.disconnect(connection.handle, ErrorCode::REJECTED_LIMITED_RESOURCES);
            self.silent_disconnects.insert(connection.handle);
            self.notify(|s| {
                s.on_connect_failed(
                    connection.peer,
                    connection.transport,
                    ErrorCode::REJECTED_LIMITED_RESOURCES,
                )
            });
            return;
        }
        self.notify(|s| s.on_connected(&connection));
    }

    /// Disconnection Complete, for either transport. A disconnection we
    /// already reported (suspend, torn down race) is expected and ignored.
    pub fn on_disconnection_complete(
        &mut self,
        handle: ConnectionHandle,
        reason: ErrorCode,
    ) -> Result<()> {
        if self.silent_disconnects.remove(&handle) {
            debug!("Disconnection of {handle:?} already handled");
            return Ok(());
        }
        let Some(entry) = self.table.remove(handle, reason) else {
            bail!("disconnection complete for unknown connection {handle:?}");
        };
        let connection = AclConnection::from(&entry);
        self.notify(|s| s.on_disconnected(&connection, reason));
        self.on_link_down(connection.peer.address);
        Ok(())
    }

    fn on_link_down(&mut self, address: RawAddress) {
        if self.table.is_acl_up(address) {
            return;
        }
        if self.security.complete_pending_removal(address) {
            return;
        }
        if self.security.store().bond_type(address) == BondType::Temporary {
            info!("Discarding temporary bond with {address}");
            self.security.store_mut().clear_security_flags(address);
        }
    }

    /// Encryption Change
    pub fn on_encryption_change(
        &mut self,
        handle: ConnectionHandle,
        status: ErrorCode,
        enabled: bool,
    ) {
        let Some(entry) = self.table.find(handle) else {
            warn!("Encryption change on unknown connection {handle:?}");
            return;
        };
        let (address, transport) = (entry.peer.address, entry.transport);
        self.table.on_encryption_complete(handle, EncryptionStatus::from_hci(status, enabled));
        self.security.on_encryption_change(address, transport, status, enabled);
    }

    /// Role Change
    pub fn on_role_change(&mut self, status: ErrorCode, handle: ConnectionHandle, role: Role) {
        if status != ErrorCode::SUCCESS {
            debug!("Role change on {handle:?} failed, status {status:?}");
            return;
        }
        match self.table.find_mut(handle) {
            Some(entry) => {
                info!("Role of {handle:?} is now {role:?}");
                entry.role = role;
            }
            None => warn!("Role change on unknown connection {handle:?}"),
        }
    }

    /// Encrypt a link. At most one request is in flight per link; a second
    /// one fails right away with `Busy`.
    pub fn set_encryption(
        &mut self,
        handle: ConnectionHandle,
        callback: EncryptionCallback,
    ) -> EncryptionStatus {
        let security = &mut self.security;
        self.table.start_encryption(handle, callback, |entry| {
            security.request_encryption(entry.peer.address, entry.transport)
        })
    }

    /// Start a direct connection
    pub fn create_connection(
        &mut self,
        peer: AddressWithType,
        transport: Transport,
    ) -> Result<(), CreateConnectionFailure> {
        if self.table.find_by_address(peer.address, transport).is_some() {
            return Err(CreateConnectionFailure::AlreadyConnected);
        }
        if !self.pending.insert((peer.address, transport)) {
            return Err(CreateConnectionFailure::ConnectionAlreadyPending);
        }
        info!("Connecting to {} over {transport:?}", peer.address.to_loggable_string());
        self.controller.create_connection(peer, transport);
        Ok(())
    }

    /// Cancel a direct connection. If the connection completed first, this
    /// is not an error.
    pub fn cancel_connection(
        &mut self,
        peer: AddressWithType,
        transport: Transport,
    ) -> Result<(), CancelConnectFailure> {
        if self.pending.remove(&(peer.address, transport)) {
            info!("Cancelling connection to {peer} over {transport:?}");
            self.controller.cancel_create_connection(peer, transport);
            return Ok(());
        }
        if self.table.find_by_address(peer.address, transport).is_some() {
            debug!("Cancel arrived after {peer} connected");
            return Ok(());
        }
        Err(CancelConnectFailure::ConnectionNotPending)
    }

    /// Connect to the peer in the background whenever it advertises. A peer
    /// that is already connected is left off the list.
    pub fn accept_le_connection_from(
        &mut self,
        address: AddressWithType,
    ) -> Result<(), AcceptlistError> {
        if self.table.find_by_address(address.address, Transport::Le).is_some() {
            info!("{address} is already connected");
            return Ok(());
        }
        let resolvable = self
            .security
            .store()
            .find(address.address)
            .and_then(|record| Some((record.le_address(), *record.irk()?)));
        if let Some((identity, irk)) = resolvable {
            if let Err(e) = self.acceptlist.add_to_resolving_list(identity, irk) {
                debug!("{identity} not added to the resolving list: {e:?}");
            }
        }
        self.acceptlist.add(address)
    }

    /// Stop connecting to the peer in the background
    pub fn ignore_le_connection_from(&mut self, address: AddressWithType) -> bool {
        self.acceptlist.remove(address)
    }

    /// Ask the controller to disconnect a link
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: ErrorCode) -> bool {
        if !self.table.set_disconnecting(handle) {
            return false;
        }
        info!("Disconnecting {handle:?}, reason {reason:?}");
        self.controller.disconnect(handle, reason);
        true
    }

    /// Tear down every link before the system suspends. Subscribers are told
    /// right away; the controller's own disconnection events are ignored
    /// when they arrive. Returns the number of links torn down.
    pub fn disconnect_all_for_suspend(&mut self) -> usize {
        let handles = self.table.handles();
        for handle in &handles {
            self.controller.disconnect(*handle, ErrorCode::REMOTE_POWER_OFF);
            let reason = ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST;
            let Some(entry) = self.table.remove(*handle, reason) else {
                continue;
            };
            let connection = AclConnection::from(&entry);
            self.notify(|s| s.on_suspend_initiated_disconnect(&connection, reason));
            self.silent_disconnects.insert(*handle);
            self.on_link_down(connection.peer.address);
        }
        info!("Disconnected {} links for suspend", handles.len());
        handles.len()
    }

    /// Our address on an LE link
    pub fn get_local_address(&self, handle: ConnectionHandle) -> Option<AddressWithType> {
        self.table.find(handle).and_then(|entry| entry.le).map(|le| le.local_address)
    }

    /// Queue an outbound packet
    pub fn send(&mut self, handle: ConnectionHandle, packet: Vec<u8>) -> bool {
        self.table.enqueue_outbound(handle, packet)
    }

    /// Packets the transport may now send on a link
    pub fn take_outbound(&mut self, handle: ConnectionHandle, max: usize) -> Vec<Vec<u8>> {
        self.table.take_outbound(handle, max)
    }

    /// Forget a device, now or once its links are down
    pub fn delete_device(&mut self, address: RawAddress) -> bool {
        let (security, mut links) = self.links();
        security.delete_device(address, &mut links)
    }

    /// Start bonding with a peer
    pub fn bond(&mut self, address: AddressWithType, transport: Transport) -> BtmStatus {
        let device_type = match transport {
            Transport::BrEdr => DeviceType::BREDR,
            Transport::Le => DeviceType::BLE,
        };
        let (security, mut links) = self.links();
        security.bond(address, transport, device_type, &mut links)
    }

    /// An SMP event for an LE peer
    pub fn on_smp_event(&mut self, address: RawAddress, event: SmpEvent) -> BtmStatus {
        let (security, mut links) = self.links();
        security.on_smp_event(address, event, &mut links)
    }

    /// Remote Name Request Complete
    pub fn on_remote_name_complete(&mut self, address: RawAddress, status: ErrorCode, name: &str) {
        self.security.on_remote_name_complete(address, status, name);
    }
}
