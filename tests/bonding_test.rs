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

use std::{cell::RefCell, rc::Rc};

use bt_stack_core::{
    connection::{
        mocks::{
            mock_controller::ControllerCommand,
            mock_subscriber::{AclNotification, MockSubscriber},
        },
        LeConnectionComplete,
    },
    core::{
        address::{AddressType, AddressWithType, RawAddress},
        hci::{ConnectionHandle, ErrorCode, LinkKeyType, Role, SmpStatus, Transport},
        irk::Irk,
    },
    security::{
        events::SecurityEvent,
        mocks::mock_security_layers::SecurityRequest,
        pairing::SmpEvent,
        record::BleKey,
        storage::{keys, ConfigStore},
    },
    StackModules,
};
use tokio::sync::mpsc;

mod utils;
use utils::{start_test, MockLayers};

const CLASSIC_PEER: RawAddress = RawAddress([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13]);
const IDENTITY: AddressWithType = AddressWithType {
    address: RawAddress([0xc0, 0x11, 0x22, 0x33, 0x44, 0x55]),
    address_type: AddressType::Random,
};
const IRK: Irk = Irk([0x5a; 16]);
const LOCAL: AddressWithType = AddressWithType {
    address: RawAddress([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]),
    address_type: AddressType::Public,
};
const HANDLE: ConnectionHandle = ConnectionHandle(0x40);

fn new_modules(layers: &MockLayers) -> (StackModules, Rc<RefCell<Vec<SecurityEvent>>>) {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut modules = StackModules::new(layers.collaborators(), tx);
    let events = Rc::new(RefCell::new(vec![]));
    let sink = events.clone();
    modules.acl.security_mut().set_security_callback(Box::new(move |event| {
        sink.borrow_mut().push(event);
    }));
    (modules, events)
}

fn le_connection_from(peer: AddressWithType) -> LeConnectionComplete {
    LeConnectionComplete {
        status: ErrorCode::SUCCESS,
        handle: HANDLE,
        role: Role::Peripheral,
        peer,
        local_address: LOCAL,
        peer_rpa: None,
        conn_interval: 24,
        conn_latency: 0,
        supervision_timeout: 500,
        advertising_set_id: Some(0),
    }
}

#[test]
fn test_classic_bond_survives_restart() {
    start_test(async {
        // arrange
        let layers = MockLayers::new();
        let (mut modules, events) = new_modules(&layers);
        assert!(!modules.acl.on_connection_request(CLASSIC_PEER, [0x24, 0x04, 0x04]));

        // act
        modules.acl.security_mut().on_link_key_notification(
            CLASSIC_PEER,
            [0x77; 16],
            LinkKeyType::AuthCombinationP256,
            false,
        );
        let (mut restarted, _) = new_modules(&layers);

        // assert
        assert!(matches!(
            events.borrow().as_slice(),
            [SecurityEvent::AuthComplete(complete)] if complete.success
        ));
        let record = restarted.acl.security().store().find(CLASSIC_PEER).unwrap();
        assert!(record.is_link_key_known());
        assert_eq!(record.link_key_type, Some(LinkKeyType::AuthCombinationP256));
        assert!(restarted.acl.on_connection_request(CLASSIC_PEER, [0x24, 0x04, 0x04]));
        assert_eq!(
            layers.controller.take_commands().last(),
            Some(&ControllerCommand::AcceptConnectionRequest(CLASSIC_PEER))
        );
    });
}

#[test]
fn test_le_bond_is_recognized_behind_new_rpa() {
    start_test(async {
        // arrange: an unknown peer connects to us from an RPA and pairs
        let layers = MockLayers::new();
        let (mut modules, events) = new_modules(&layers);
        let first_rpa = IRK.generate_rpa();
        modules.acl.on_le_connection_complete(le_connection_from(first_rpa));

        // act
        for event in [
            SmpEvent::ConsentRequest,
            SmpEvent::Key(BleKey::PeerEncryption {
                ltk: [0x11; 16],
                rand: [0x22; 8],
                ediv: 0x3344,
                sec_level: 4,
                key_size: 16,
            }),
            SmpEvent::Key(BleKey::PeerIdentity { irk: IRK, identity_address: IDENTITY }),
            SmpEvent::AddressAssociation(IDENTITY),
            SmpEvent::Complete { reason: SmpStatus::Success, smp_over_br: false },
        ] {
            modules.acl.on_smp_event(first_rpa.address, event);
        }

        // assert: the keys live under the identity address
        assert!(matches!(
            events.borrow().last(),
            Some(SecurityEvent::BleAuthComplete(complete)) if complete.success
        ));
        let ccc = SecurityRequest::ServiceChangeCcc(first_rpa.address, true, Transport::Le);
        assert!(layers.security.take_requests().contains(&ccc));
        let section = IDENTITY.address.to_string();
        assert!(layers.config.exists(&section, keys::LE_KEY_PENC));
        assert!(layers.config.exists(&section, keys::LE_KEY_PID));
        assert!(!layers.config.exists(&first_rpa.address.to_string(), keys::LE_KEY_PENC));

        // act: restart, and the peer comes back with a fresh RPA
        let (mut restarted, _) = new_modules(&layers);
        let second_rpa = IRK.generate_rpa();
        let subscriber = MockSubscriber::new();
        restarted.acl.add_subscriber(Box::new(subscriber.clone()));
        restarted.acl.on_le_connection_complete(le_connection_from(second_rpa));

        // assert
        let record = restarted.acl.security().store().find(IDENTITY.address).unwrap();
        assert!(record.is_le_link_key_known());
        assert_eq!(record.ble.identity_address, Some(IDENTITY));
        let entry = restarted.acl.connections().find(HANDLE).unwrap();
        assert_eq!(entry.peer, IDENTITY);
        assert_eq!(entry.le.unwrap().peer_rpa, Some(second_rpa));
        assert!(matches!(
            subscriber.take_notifications().as_slice(),
            [AclNotification::Connected(connection)] if connection.peer == IDENTITY
        ));
    });
}

#[test]
fn test_suspend_tears_down_links_and_bonded_peer_can_reconnect() {
    start_test(async {
        // arrange
        let layers = MockLayers::new();
        let (mut modules, _) = new_modules(&layers);
        let subscriber = MockSubscriber::new();
        modules.acl.add_subscriber(Box::new(subscriber.clone()));
        modules.acl.security_mut().on_link_key_notification(
            CLASSIC_PEER,
            [0x77; 16],
            LinkKeyType::AuthCombinationP256,
            false,
        );
        modules.acl.on_connection_complete(ErrorCode::SUCCESS, HANDLE, CLASSIC_PEER);
        subscriber.take_notifications();
        layers.controller.take_commands();

        // act
        modules.acl.set_system_suspend_state(true);
        let torn_down = modules.acl.disconnect_all_for_suspend();
        let accepted = modules.acl.on_connection_request(CLASSIC_PEER, [0; 3]);
        modules.acl.on_disconnection_complete(HANDLE, ErrorCode::REMOTE_POWER_OFF).unwrap();

        // assert
        assert_eq!(torn_down, 1);
        assert!(accepted);
        assert!(modules.acl.connections().is_empty());
        assert_eq!(
            subscriber.take_notifications(),
            vec![AclNotification::SuspendInitiatedDisconnect(
                HANDLE,
                ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST
            )]
        );
        assert_eq!(
            layers.controller.take_commands(),
            vec![
                ControllerCommand::Disconnect(HANDLE, ErrorCode::REMOTE_POWER_OFF),
                ControllerCommand::AcceptConnectionRequest(CLASSIC_PEER),
            ]
        );
    });
}
