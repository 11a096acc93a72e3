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

//! Records every notification delivered to an upper-layer subscriber

use std::{cell::RefCell, rc::Rc};

use crate::{
    connection::{AclConnection, AclSubscriber},
    core::{
        address::AddressWithType,
        hci::{ConnectionHandle, ErrorCode, Transport},
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclNotification {
    Connected(AclConnection),
    ConnectFailed(AddressWithType, Transport, ErrorCode),
    Disconnected(ConnectionHandle, ErrorCode),
    SuspendInitiatedDisconnect(ConnectionHandle, ErrorCode),
}

#[derive(Clone, Debug, Default)]
pub struct MockSubscriber {
    notifications: Rc<RefCell<Vec<AclNotification>>>,
}

impl MockSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_notifications(&self) -> Vec<AclNotification> {
        self.notifications.borrow_mut().drain(..).collect()
    }

    fn record(&self, notification: AclNotification) {
        self.notifications.borrow_mut().push(notification);
    }
}

impl AclSubscriber for MockSubscriber {
    fn on_connected(&self, connection: &AclConnection) {
        self.record(AclNotification::Connected(*connection));
    }

    fn on_connect_failed(&self, peer: AddressWithType, transport: Transport, status: ErrorCode) {
        self.record(AclNotification::ConnectFailed(peer, transport, status));
    }

    fn on_disconnected(&self, connection: &AclConnection, reason: ErrorCode) {
        self.record(AclNotification::Disconnected(connection.handle, reason));
    }

    fn on_suspend_initiated_disconnect(&self, connection: &AclConnection, reason: ErrorCode) {
        self.record(AclNotification::SuspendInitiatedDisconnect(connection.handle, reason));
    }
}
