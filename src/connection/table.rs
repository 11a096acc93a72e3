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

//! Live ACL connections, keyed by handle, plus a short history of the ones
//! that went away.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::{
    core::{
        address::{AddressWithType, RawAddress},
        hci::{BtmStatus, ConnectionHandle, ErrorCode, Role, Transport},
    },
    utils::fixed_queue::FixedQueue,
};

use super::controller::OutboundTransport;

/// Outcome of an encryption request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncryptionStatus {
    /// The link is encrypted
    Success,
    /// The link cannot be encrypted in its current state
    WrongMode,
    /// Out of resources
    NoResources,
    /// Another encryption request is in flight on this link
    Busy,
    /// Any other failure
    Failure,
}

impl EncryptionStatus {
    /// Map the synchronous answer of the lower layer
    pub fn from_btm(status: BtmStatus) -> Self {
        match status {
            BtmStatus::Success => Self::Success,
            BtmStatus::Busy => Self::Busy,
            BtmStatus::NoResources => Self::NoResources,
            BtmStatus::WrongMode => Self::WrongMode,
            _ => Self::Failure,
        }
    }

    /// Map an HCI Encryption Change event
    pub fn from_hci(status: ErrorCode, enabled: bool) -> Self {
        match status {
            ErrorCode::SUCCESS if enabled => Self::Success,
            ErrorCode::ENCRYPTION_MODE_NOT_ACCEPTABLE => Self::WrongMode,
            ErrorCode::MEMORY_FULL => Self::NoResources,
            _ => Self::Failure,
        }
    }
}

/// Invoked once when an encryption request completes
pub type EncryptionCallback = Box<dyn FnOnce(RawAddress, Transport, EncryptionStatus)>;

/// Where a live connection is in its lifecycle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Up
    Connected,
    /// Up, with an encryption request in flight
    Encrypting,
    /// We asked the controller to disconnect
    Disconnecting,
}

/// LE specific data of a connection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeConnectionData {
    /// Our address on this link
    pub local_address: AddressWithType,
    /// The resolvable private address the peer connected with, if any
    pub peer_rpa: Option<AddressWithType>,
    /// Connection interval, in 1.25ms units
    pub conn_interval: u16,
    /// Peripheral latency, in connection events
    pub conn_latency: u16,
    /// Supervision timeout, in 10ms units
    pub supervision_timeout: u16,
    /// The advertising set that accepted the connection (peripheral role)
    pub advertising_set_id: Option<u8>,
    /// The peer was on the filter accept list when the connection completed
    pub in_filter_accept_list: bool,
}

/// A live ACL connection
pub struct ConnectionEntry {
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
    /// When the connection completed
    pub created_at: Instant,
    /// Lifecycle state
    pub state: ConnectionState,
    /// LE only
    pub le: Option<LeConnectionData>,
    outbound: VecDeque<Vec<u8>>,
    encryption_callback: Option<EncryptionCallback>,
}

impl ConnectionEntry {
    /// Constructor
    pub fn new(
        handle: ConnectionHandle,
        transport: Transport,
        peer: AddressWithType,
        role: Role,
        locally_initiated: bool,
    ) -> Self {
        Self {
            handle,
            transport,
            peer,
            role,
            locally_initiated,
            created_at: Instant::now(),
            state: ConnectionState::Connected,
            le: None,
            outbound: VecDeque::new(),
            encryption_callback: None,
        }
    }

    /// Attach the LE data
    pub fn with_le_data(mut self, le: LeConnectionData) -> Self {
        self.le = Some(le);
        self
    }

    /// Packets waiting to be sent
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// True if an encryption request is in flight
    pub fn is_encryption_pending(&self) -> bool {
        self.encryption_callback.is_some()
    }

    fn matches(&self, address: RawAddress) -> bool {
        self.peer.address == address
            || self.le.and_then(|le| le.peer_rpa).map(|rpa| rpa.address == address).unwrap_or(false)
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("handle", &self.handle)
            .field("transport", &self.transport)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// What is kept of a connection once it is gone
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Connection handle
    pub handle: ConnectionHandle,
    /// Transport of the link
    pub transport: Transport,
    /// The peer
    pub peer: AddressWithType,
    /// Our role when the link went down
    pub role: Role,
    /// We initiated the connection
    pub locally_initiated: bool,
    /// How long the link was up
    pub duration: Duration,
    /// Disconnection reason
    pub reason: ErrorCode,
}

/// Errors returned when a connection cannot be added
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionTableError {
    /// No room for another connection
    TableFull,
}

/// Owns every live connection. Only the stack thread touches it.
pub struct ConnectionTable {
    entries: HashMap<ConnectionHandle, ConnectionEntry>,
    history: FixedQueue<ConnectionSummary>,
    max_connections: Option<usize>,
    transport: Box<dyn OutboundTransport>,
}

impl ConnectionTable {
    /// Constructor
    pub fn new(
        history_size: usize,
        max_connections: Option<usize>,
        transport: Box<dyn OutboundTransport>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            history: FixedQueue::new(history_size),
            max_connections,
            transport,
        }
    }

    /// Add a connection that just completed. A duplicate handle means the
    /// lower layer lost track of a disconnection, which we cannot recover from.
    pub fn insert(&mut self, entry: ConnectionEntry) -> Result<(), ConnectionTableError> {
        assert!(
            !self.entries.contains_key(&entry.handle),
            "duplicate connection handle {:?}",
            entry.handle
        );
        if let Some(max) = self.max_connections {
            if self.entries.len() >= max {
                warn!("Connection table full, cannot add {:?} to {}", entry.handle, entry.peer);
                return Err(ConnectionTableError::TableFull);
            }
        }
        info!("Connection {:?} up to {} over {:?}", entry.handle, entry.peer, entry.transport);
        self.entries.insert(entry.handle, entry);
        Ok(())
    }

    /// Look up a connection
    pub fn find(&self, handle: ConnectionHandle) -> Option<&ConnectionEntry> {
        self.entries.get(&handle)
    }

    /// Look up a connection for modification
    pub fn find_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(&handle)
    }

    /// Look up the connection to a peer, by identity address or by the RPA
    /// it connected with
    pub fn find_by_address(
        &self,
        address: RawAddress,
        transport: Transport,
    ) -> Option<&ConnectionEntry> {
        self.entries.values().find(|e| e.transport == transport && e.matches(address))
    }

    /// True if a link to the peer is up on either transport
    pub fn is_acl_up(&self, address: RawAddress) -> bool {
        self.entries.values().any(|e| e.matches(address))
    }

    /// Handles of every live connection
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<_> = self.entries.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no connection is up
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recently closed connections, oldest first
    pub fn history(&self) -> impl Iterator<Item = &ConnectionSummary> {
        self.history.iter()
    }

    /// Drop a connection that went down and record it in the history. An
    /// encryption request still in flight fails.
    pub fn remove(
        &mut self,
        handle: ConnectionHandle,
        reason: ErrorCode,
    ) -> Option<ConnectionEntry> {
        let Some(mut entry) = self.entries.remove(&handle) else {
            debug!("No connection to remove for {handle:?}");
            return None;
        };
        if !entry.outbound.is_empty() {
            debug!("Dropping {} queued packets of {handle:?}", entry.outbound.len());
            entry.outbound.clear();
            self.transport.unregister(handle);
        }
        if let Some(callback) = entry.encryption_callback.take() {
            callback(entry.peer.address, entry.transport, EncryptionStatus::Failure);
        }
        self.history.push(ConnectionSummary {
            handle,
            transport: entry.transport,
            peer: entry.peer,
            role: entry.role,
            locally_initiated: entry.locally_initiated,
            duration: entry.created_at.elapsed(),
            reason,
        });
        info!("Connection {handle:?} to {} down, reason {reason:?}", entry.peer);
        Some(entry)
    }

    /// Queue a packet. The connection is registered with the transport while
    /// its queue is non-empty.
    pub fn enqueue_outbound(&mut self, handle: ConnectionHandle, packet: Vec<u8>) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            warn!("Dropping packet for unknown connection {handle:?}");
            return false;
        };
        if entry.outbound.is_empty() {
            self.transport.register(handle);
        }
        entry.outbound.push_back(packet);
        true
    }

    /// Dequeue up to `max` packets for the transport, unregistering the
    /// connection once its queue is drained
    pub fn take_outbound(&mut self, handle: ConnectionHandle, max: usize) -> Vec<Vec<u8>> {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return vec![];
        };
        if entry.outbound.is_empty() {
            return vec![];
        }
        let count = max.min(entry.outbound.len());
        let packets: Vec<_> = entry.outbound.drain(..count).collect();
        if entry.outbound.is_empty() {
            self.transport.unregister(handle);
        }
        packets
    }

    /// Start encrypting a link. `forward` issues the request to the lower
    /// layer; if another request is in flight, `callback` is failed with
    /// `Busy` right away and the first request is left alone.
    pub fn start_encryption(
        &mut self,
        handle: ConnectionHandle,
        callback: EncryptionCallback,
        forward: impl FnOnce(&ConnectionEntry) -> BtmStatus,
    ) -> EncryptionStatus {
        let Some(entry) = self.entries.get_mut(&handle) else {
            warn!("Encryption requested on unknown connection {handle:?}");
            callback(RawAddress::EMPTY, Transport::BrEdr, EncryptionStatus::WrongMode);
            return EncryptionStatus::WrongMode;
        };
        if entry.encryption_callback.is_some() {
            warn!("Encryption already pending on {handle:?}");
            callback(entry.peer.address, entry.transport, EncryptionStatus::Busy);
            return EncryptionStatus::Busy;
        }

        match forward(entry) {
            BtmStatus::CmdStarted => {
                debug!("Encrypting {handle:?}");
                entry.encryption_callback = Some(callback);
                entry.state = ConnectionState::Encrypting;
                EncryptionStatus::Success
            }
            status => {
                let status = EncryptionStatus::from_btm(status);
                callback(entry.peer.address, entry.transport, status);
                status
            }
        }
    }

    /// The controller reported an encryption change on the link
    pub fn on_encryption_complete(&mut self, handle: ConnectionHandle, status: EncryptionStatus) {
        let Some(entry) = self.entries.get_mut(&handle) else {
            debug!("Encryption change on unknown connection {handle:?}");
            return;
        };
        if entry.state == ConnectionState::Encrypting {
            entry.state = ConnectionState::Connected;
        }
        if let Some(callback) = entry.encryption_callback.take() {
            callback(entry.peer.address, entry.transport, status);
        }
    }

    /// Mark a connection as going down. Returns false if it is unknown or
    /// already disconnecting.
    pub fn set_disconnecting(&mut self, handle: ConnectionHandle) -> bool {
        match self.entries.get_mut(&handle) {
            Some(entry) if entry.state != ConnectionState::Disconnecting => {
                entry.state = ConnectionState::Disconnecting;
                true
            }
            Some(_) => {
                debug!("{handle:?} is already disconnecting");
                false
            }
            None => {
                warn!("Cannot disconnect unknown connection {handle:?}");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use crate::{
        connection::mocks::mock_controller::MockController, core::address::AddressType,
    };

    use super::*;

    const HANDLE: ConnectionHandle = ConnectionHandle(3);
    const ANOTHER_HANDLE: ConnectionHandle = ConnectionHandle(4);
    const PEER: AddressWithType = AddressWithType {
        address: RawAddress([1, 2, 3, 4, 5, 6]),
        address_type: AddressType::Public,
    };
    const RPA: AddressWithType = AddressWithType {
        address: RawAddress([1, 2, 3, 4, 5, 0x45]),
        address_type: AddressType::Random,
    };

    fn create_table() -> (ConnectionTable, MockController) {
        let controller = MockController::new();
        (ConnectionTable::new(2, None, Box::new(controller.clone())), controller)
    }

    fn classic_entry(handle: ConnectionHandle) -> ConnectionEntry {
        ConnectionEntry::new(handle, Transport::BrEdr, PEER, Role::Central, true)
    }

    fn recording_callback() -> (EncryptionCallback, Rc<RefCell<Vec<EncryptionStatus>>>) {
        let results = Rc::new(RefCell::new(vec![]));
        let sink = results.clone();
        (Box::new(move |_, _, status| sink.borrow_mut().push(status)), results)
    }

    #[test]
    fn test_insert_and_find() {
        let (mut table, _) = create_table();

        table.insert(classic_entry(HANDLE)).unwrap();

        assert_eq!(table.find(HANDLE).unwrap().peer, PEER);
        assert!(table.find_by_address(PEER.address, Transport::BrEdr).is_some());
        assert!(table.find_by_address(PEER.address, Transport::Le).is_none());
        assert!(table.is_acl_up(PEER.address));
    }

    #[test]
    fn test_find_le_connection_by_rpa() {
        let (mut table, _) = create_table();
        let le = LeConnectionData {
            local_address: AddressWithType::EMPTY,
            peer_rpa: Some(RPA),
            conn_interval: 24,
            conn_latency: 0,
            supervision_timeout: 500,
            advertising_set_id: None,
            in_filter_accept_list: false,
        };

        table
            .insert(
                ConnectionEntry::new(HANDLE, Transport::Le, PEER, Role::Peripheral, false)
                    .with_le_data(le),
            )
            .unwrap();

        assert_eq!(table.find_by_address(RPA.address, Transport::Le).unwrap().handle, HANDLE);
    }

    #[test]
    #[should_panic]
    fn test_duplicate_handle_is_fatal() {
        let (mut table, _) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();

        let _ = table.insert(classic_entry(HANDLE));
    }

    #[test]
    fn test_table_full() {
        let controller = MockController::new();
        let mut table = ConnectionTable::new(2, Some(1), Box::new(controller));
        table.insert(classic_entry(HANDLE)).unwrap();

        let result = table.insert(classic_entry(ANOTHER_HANDLE));

        assert_eq!(result, Err(ConnectionTableError::TableFull));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_records_history() {
        // arrange
        let (mut table, _) = create_table();
        for handle in [1, 2, 3] {
            table.insert(classic_entry(ConnectionHandle(handle))).unwrap();
        }

        // act
        for handle in [1, 2, 3] {
            table.remove(ConnectionHandle(handle), ErrorCode::REMOTE_USER_TERMINATED);
        }

        // assert: history is bounded to the last two
        let history: Vec<_> = table.history().map(|s| s.handle).collect();
        assert_eq!(history, vec![ConnectionHandle(2), ConnectionHandle(3)]);
        assert!(table.is_empty());
        assert!(table.remove(HANDLE, ErrorCode::SUCCESS).is_none());
    }

    #[test]
    fn test_outbound_registration_follows_queue() {
        // arrange
        let (mut table, controller) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();

        // act: two packets queued
        table.enqueue_outbound(HANDLE, vec![1]);
        table.enqueue_outbound(HANDLE, vec![2]);

        // assert: registered once
        assert!(controller.is_registered(HANDLE));

        // act: partially drained
        assert_eq!(table.take_outbound(HANDLE, 1), vec![vec![1]]);
        assert!(controller.is_registered(HANDLE));

        // act: fully drained
        assert_eq!(table.take_outbound(HANDLE, 5), vec![vec![2]]);
        assert!(!controller.is_registered(HANDLE));
        assert!(table.take_outbound(HANDLE, 5).is_empty());
    }

    #[test]
    fn test_remove_unregisters_pending_outbound() {
        let (mut table, controller) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();
        table.enqueue_outbound(HANDLE, vec![1]);

        table.remove(HANDLE, ErrorCode::CONNECTION_TIMEOUT);

        assert!(!controller.is_registered(HANDLE));
    }

    #[test]
    fn test_enqueue_to_unknown_handle() {
        let (mut table, controller) = create_table();

        assert!(!table.enqueue_outbound(HANDLE, vec![1]));
        assert!(!controller.is_registered(HANDLE));
    }

    #[test]
    fn test_second_encryption_request_is_busy() {
        // arrange: one request in flight
        let (mut table, _) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();
        let (first, first_results) = recording_callback();
        let (second, second_results) = recording_callback();
        table.start_encryption(HANDLE, first, |_| BtmStatus::CmdStarted);

        // act
        let status = table.start_encryption(HANDLE, second, |_| panic!("must not be forwarded"));

        // assert: second fails right away, first still pending
        assert_eq!(status, EncryptionStatus::Busy);
        assert_eq!(*second_results.borrow(), vec![EncryptionStatus::Busy]);
        assert!(first_results.borrow().is_empty());
        assert!(table.find(HANDLE).unwrap().is_encryption_pending());

        // act: completion reaches the first callback
        table.on_encryption_complete(HANDLE, EncryptionStatus::Success);

        // assert
        assert_eq!(*first_results.borrow(), vec![EncryptionStatus::Success]);
        assert_eq!(table.find(HANDLE).unwrap().state, ConnectionState::Connected);
    }

    #[test]
    fn test_encryption_refused_by_lower_layer() {
        let (mut table, _) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();
        let (callback, results) = recording_callback();

        table.start_encryption(HANDLE, callback, |_| BtmStatus::NoResources);

        assert_eq!(*results.borrow(), vec![EncryptionStatus::NoResources]);
        assert!(!table.find(HANDLE).unwrap().is_encryption_pending());
    }

    #[test]
    fn test_encryption_on_unknown_handle() {
        let (mut table, _) = create_table();
        let (callback, results) = recording_callback();

        table.start_encryption(HANDLE, callback, |_| BtmStatus::CmdStarted);

        assert_eq!(*results.borrow(), vec![EncryptionStatus::WrongMode]);
    }

    #[test]
    fn test_disconnect_fails_pending_encryption() {
        let (mut table, _) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();
        let (callback, results) = recording_callback();
        table.start_encryption(HANDLE, callback, |_| BtmStatus::CmdStarted);

        table.remove(HANDLE, ErrorCode::CONNECTION_TIMEOUT);

        assert_eq!(*results.borrow(), vec![EncryptionStatus::Failure]);
    }

    #[test]
    fn test_set_disconnecting_once() {
        let (mut table, _) = create_table();
        table.insert(classic_entry(HANDLE)).unwrap();

        assert!(table.set_disconnecting(HANDLE));
        assert!(!table.set_disconnecting(HANDLE));
        assert!(!table.set_disconnecting(ANOTHER_HANDLE));
    }

    #[test]
    fn test_hci_status_mapping() {
        assert_eq!(EncryptionStatus::from_hci(ErrorCode::SUCCESS, true), EncryptionStatus::Success);
        assert_eq!(
            EncryptionStatus::from_hci(ErrorCode::SUCCESS, false),
            EncryptionStatus::Failure
        );
        assert_eq!(
            EncryptionStatus::from_hci(ErrorCode::ENCRYPTION_MODE_NOT_ACCEPTABLE, false),
            EncryptionStatus::WrongMode
        );
        assert_eq!(
            EncryptionStatus::from_hci(ErrorCode::MEMORY_FULL, false),
            EncryptionStatus::NoResources
        );
    }
}
