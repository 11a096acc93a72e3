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

//! The lower-level operations made available to the connection layer.
//!
//! Commands are fire-and-forget: completion arrives later as an event routed
//! to the AclLifecycleManager on the stack thread. Wire encoding is handled
//! below these traits.

use crate::core::{
    address::{AddressWithType, RawAddress},
    hci::{ConnectionHandle, ErrorCode, Transport},
    irk::Irk,
};

/// ACL commands issued to the controller
pub trait AclController {
    /// Start a direct connection to the peer
    fn create_connection(&mut self, address: AddressWithType, transport: Transport);
    /// Cancel an outstanding direct connection. Due to races, the connection
    /// may still complete after this is called.
    fn cancel_create_connection(&mut self, address: AddressWithType, transport: Transport);
    /// Accept an incoming classic connection request
    fn accept_connection_request(&mut self, address: RawAddress);
    /// Reject an incoming classic connection request
    fn reject_connection_request(&mut self, address: RawAddress, reason: ErrorCode);
    /// Disconnect a live link
    fn disconnect(&mut self, handle: ConnectionHandle, reason: ErrorCode);
}

/// The filter accept list and resolving list in the controller. While a
/// peer is on the accept list, the controller connects to it in the
/// background whenever it advertises.
pub trait AcceptlistController {
    /// Add to the filter accept list
    fn add_to_acceptlist(&mut self, address: AddressWithType);
    /// Remove from the filter accept list
    fn remove_from_acceptlist(&mut self, address: AddressWithType);
    /// Empty the filter accept list
    fn clear_acceptlist(&mut self);
    /// Let the controller resolve RPAs of this identity
    fn add_to_resolving_list(&mut self, identity: AddressWithType, irk: Irk);
    /// Stop resolving RPAs of this identity
    fn remove_from_resolving_list(&mut self, identity: AddressWithType);
}

/// The lower transport polling connections for outbound data
pub trait OutboundTransport {
    /// The connection has queued data
    fn register(&mut self, handle: ConnectionHandle);
    /// The connection queue is drained or the connection is gone
    fn unregister(&mut self, handle: ConnectionHandle);
}
