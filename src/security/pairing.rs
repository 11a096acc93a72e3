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

//! The pairing / bonding state machine.
//!
//! Events from the link manager (classic Simple Pairing) and from SMP (LE)
//! arrive on the stack thread, update the DeviceRecordStore, and are turned
//! into at most one SecurityEvent for the registered application callback.
//!
//! When a classic prompt needs the peer's name and we don't have it, the
//! prompt is parked in a PairingContext while a remote name request runs.
//! There is only one such context: a second prompt replaces the first.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::core::{
    address::{AddressType, AddressWithType, RawAddress},
    hci::{
        AuthRequirements, BtmStatus, DeviceClass, DeviceType, ErrorCode, IoCapability,
        LinkKeyType, Octet16, SmpStatus, Transport, PIN_CODE_LEN,
    },
};

use super::{
    commands::{OobDataSource, RemoteNameService, SecurityCommands, ServiceChangeTracker},
    events::{
        AuthComplete, BleAuthComplete, BleKeyDistributed, BondCancelComplete, ConfirmRequest,
        EncryptionChange, LeAddressAssociation, LocalOobData, PasskeyNotification, PeerRequest,
        PinRequest, SecurityCallback, SecurityEvent,
    },
    record::{BleKey, BondType, DeviceRecord, RecordState, SecurityFlags},
    storage::{self, ConfigStore},
    store::DeviceRecordStore,
};

/// The view of the link layer the engine needs to decide whether a record
/// can be dropped right away
pub trait LinkState {
    /// True if an ACL is up to the peer on either transport
    fn is_acl_up(&self, address: RawAddress) -> bool;
    /// Stop accepting background LE connections from the peer
    fn remove_from_acceptlist(&mut self, address: AddressWithType);
}

/// The layers the engine drives
pub struct SecurityCollaborators {
    /// Persistent storage of bonded devices
    pub config: Box<dyn ConfigStore>,
    /// Link manager / SMP commands
    pub commands: Box<dyn SecurityCommands>,
    /// Remote name requests
    pub name_service: Box<dyn RemoteNameService>,
    /// Remote OOB data held by the application
    pub oob: Box<dyn OobDataSource>,
    /// GATT Service Changed bookkeeping
    pub service_change: Box<dyn ServiceChangeTracker>,
}

/// Our answer to a classic IO capability request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoCapabilityReply {
    /// Local IO capability
    pub io_cap: IoCapability,
    /// We hold OOB data for the peer
    pub oob_data_present: bool,
    /// Local authentication requirements
    pub auth_req: AuthRequirements,
}

/// What the peer announced in its IO capability response
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeerIoCapabilities {
    /// Peer IO capability
    pub io_cap: IoCapability,
    /// Peer holds OOB data for us
    pub oob_data_present: bool,
    /// Peer authentication requirements
    pub auth_req: AuthRequirements,
}

/// The LE pairing parameters SMP proposes; filled in by `on_smp_io_request`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmpIoRequest {
    /// Local IO capability
    pub io_cap: IoCapability,
    /// OOB data is available for the peer
    pub oob_data: bool,
    /// SMP AuthReq octet
    pub auth_req: u8,
    /// Largest encryption key size we accept
    pub max_key_size: u8,
    /// Keys the initiator distributes
    pub init_keys: u8,
    /// Keys the responder distributes
    pub resp_keys: u8,
}

/// Device-wide LE pairing preferences applied to every SMP IO request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmpConfig {
    /// SMP AuthReq octet, 0 to keep what SMP proposes
    pub auth_req: u8,
    /// Local IO capability
    pub io_cap: IoCapability,
    /// Keys the initiator distributes
    pub init_keys: u8,
    /// Keys the responder distributes
    pub resp_keys: u8,
    /// Largest encryption key size we accept
    pub max_key_size: u8,
}

/// Secure connections bit of the SMP AuthReq octet
const SMP_AUTH_SC: u8 = 0x08;
/// All four SMP key distribution bits
const SMP_ALL_KEYS: u8 = 0x0f;

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            // bonding + MITM + secure connections
            auth_req: 0x0d,
            io_cap: IoCapability::KeyboardDisplay,
            init_keys: SMP_ALL_KEYS,
            resp_keys: SMP_ALL_KEYS,
            max_key_size: 16,
        }
    }
}

/// Events reported by SMP for an LE peer. The IO request is handled by
/// `on_smp_io_request` since it is answered in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmpEvent {
    /// Peripheral role: the central wants to pair, consent is needed
    ConsentRequest,
    /// The peer sent a security request
    SecurityRequest,
    /// Display this passkey
    PasskeyNotification(u32),
    /// Ask the user for a passkey
    PasskeyRequest,
    /// Legacy OOB data is needed
    OobRequest,
    /// Numeric comparison value
    NumericComparison(u32),
    /// Secure connections OOB data is needed
    ScOobRequest,
    /// Secure connections local OOB data was generated
    ScLocalOobData {
        /// Commitment
        c: Octet16,
        /// Randomizer
        r: Octet16,
    },
    /// A key was distributed
    Key(BleKey),
    /// Pairing finished
    Complete {
        /// SMP status
        reason: SmpStatus,
        /// Pairing ran over the BR/EDR SMP channel (cross transport)
        smp_over_br: bool,
    },
    /// The peer distributed its identity address
    AddressAssociation(AddressWithType),
}

/// A user-facing prompt waiting for the peer name
#[derive(Clone, Debug, PartialEq, Eq)]
enum PendingPrompt {
    Pin { min_16_digit: bool },
    Confirm(ConfirmRequest),
    PasskeyNotification { passkey: u32 },
    PasskeyRequest,
}

/// One in-flight classic pairing prompt whose delivery is deferred
#[derive(Clone, Debug, PartialEq, Eq)]
struct PairingContext {
    bd_addr: RawAddress,
    dev_class: DeviceClass,
    prompt: PendingPrompt,
}

impl PairingContext {
    fn into_event(self, bd_name: String) -> SecurityEvent {
        let PairingContext { bd_addr, dev_class, prompt } = self;
        match prompt {
            PendingPrompt::Pin { min_16_digit } => {
                SecurityEvent::PinRequest(PinRequest { bd_addr, dev_class, bd_name, min_16_digit })
            }
            PendingPrompt::Confirm(request) => {
                SecurityEvent::ConfirmRequest(ConfirmRequest { bd_name, dev_class, ..request })
            }
            PendingPrompt::PasskeyNotification { passkey } => {
                SecurityEvent::PasskeyNotification(PasskeyNotification {
                    bd_addr,
                    dev_class,
                    bd_name,
                    passkey,
                })
            }
            PendingPrompt::PasskeyRequest => {
                SecurityEvent::PasskeyRequest(PeerRequest { bd_addr, dev_class, bd_name })
            }
        }
    }
}

/// Drives classic and LE pairing, owns the device records
pub struct SecurityPairingEngine {
    store: DeviceRecordStore,
    config: Box<dyn ConfigStore>,
    commands: Box<dyn SecurityCommands>,
    name_service: Box<dyn RemoteNameService>,
    oob: Box<dyn OobDataSource>,
    service_change: Box<dyn ServiceChangeTracker>,
    callback: Option<SecurityCallback>,
    pairing_context: Option<PairingContext>,
    peer_io_caps: HashMap<RawAddress, PeerIoCapabilities>,
    local_io_cap: IoCapability,
    local_auth_req: AuthRequirements,
    smp_config: SmpConfig,
}

impl SecurityPairingEngine {
    /// Constructor
    pub fn new(store: DeviceRecordStore, collaborators: SecurityCollaborators) -> Self {
        let SecurityCollaborators { config, commands, name_service, oob, service_change } =
            collaborators;
        Self {
            store,
            config,
            commands,
            name_service,
            oob,
            service_change,
            callback: None,
            pairing_context: None,
            peer_io_caps: HashMap::new(),
            local_io_cap: IoCapability::DisplayYesNo,
            local_auth_req: AuthRequirements(0x03),
            smp_config: SmpConfig::default(),
        }
    }

    /// Load paired devices from the config store into the record store
    pub fn restore_paired_devices(&mut self) -> usize {
        storage::restore_paired_devices(self.config.as_ref(), &mut self.store)
    }

    /// The device records
    pub fn store(&self) -> &DeviceRecordStore {
        &self.store
    }

    /// The device records, for modification
    pub fn store_mut(&mut self) -> &mut DeviceRecordStore {
        &mut self.store
    }

    /// The config store holding bonded devices
    pub fn config(&self) -> &dyn ConfigStore {
        self.config.as_ref()
    }

    /// Replace the application callback. Events raised with no callback
    /// registered are dropped.
    pub fn set_security_callback(&mut self, callback: SecurityCallback) {
        self.callback = Some(callback);
    }

    /// Set the local classic IO capability and authentication requirements
    pub fn set_local_io_capabilities(&mut self, io_cap: IoCapability, auth_req: AuthRequirements) {
        self.local_io_cap = io_cap;
        self.local_auth_req = auth_req;
    }

    /// Set the LE pairing preferences
    pub fn set_smp_config(&mut self, config: SmpConfig) {
        self.smp_config = config;
    }

    /// The peer capabilities seen in the last IO capability response
    pub fn peer_io_capabilities(&self, address: RawAddress) -> Option<PeerIoCapabilities> {
        self.peer_io_caps.get(&address).copied()
    }

    /// True if a prompt is waiting for a remote name
    pub fn has_pending_prompt(&self) -> bool {
        self.pairing_context.is_some()
    }

    fn notify(&mut self, event: SecurityEvent) {
        match self.callback.as_mut() {
            Some(callback) => callback(event),
            None => warn!("No security callback registered, dropping {event:?}"),
        }
    }

    /// The name of the peer as reported by the event, or as stored
    fn peer_name(&self, address: RawAddress, reported: &str) -> String {
        if !reported.is_empty() {
            return reported.to_owned();
        }
        self.store.find(address).and_then(|r| r.name.clone()).unwrap_or_default()
    }

    /// Deliver the prompt now if the name is known, otherwise park it until
    /// the remote name request completes
    fn deliver_or_defer(&mut self, context: PairingContext, bd_name: String) -> BtmStatus {
        if bd_name.is_empty() {
            let address = context.bd_addr;
            match self.name_service.request_remote_name(address, Transport::BrEdr) {
                BtmStatus::CmdStarted => {
                    debug!("Deferring {:?} for {address} until its name is read", context.prompt);
                    if let Some(previous) = self.pairing_context.replace(context) {
                        info!("Dropping pending prompt for {}, superseded", previous.bd_addr);
                    }
                    return BtmStatus::CmdStarted;
                }
                status => {
                    warn!("Failed to start Remote Name Request, addr:{address} status:{status:?}")
                }
            }
        }
        self.notify(context.into_event(bd_name));
        BtmStatus::CmdStarted
    }

    /// The remote name request started by a deferred prompt finished. A
    /// failed request delivers the prompt with an empty name.
    pub fn on_remote_name_complete(&mut self, address: RawAddress, status: ErrorCode, name: &str) {
        let name = if status == ErrorCode::SUCCESS { name } else { "" };
        if !name.is_empty() {
            self.store.set_name(address, name);
        }

        match self.pairing_context.take() {
            Some(context) if context.bd_addr == address => {
                debug!("Remote name of {address} read, status:{status:?}");
                self.notify(context.into_event(name.to_owned()));
            }
            other => {
                self.pairing_context = other;
                debug!("Remote name of {address} is not awaited by a prompt");
            }
        }
    }

    /// Classic IO capability request: answer with our capabilities
    pub fn on_io_capability_request(&mut self, address: RawAddress) -> IoCapabilityReply {
        let oob_data_present = self.oob.has_oob_data(address);
        let mut auth_req = self.local_auth_req;
        // keep MITM protection if the existing key has it
        if self.store.find(address).map(DeviceRecord::is_mitm_protected).unwrap_or(false) {
            auth_req.0 |= AuthRequirements::MITM;
        }
        debug!(
            "io req addr:{address} mitm:{} oob_data:{oob_data_present}",
            auth_req.mitm_required()
        );
        IoCapabilityReply { io_cap: self.local_io_cap, oob_data_present, auth_req }
    }

    /// Classic IO capability response: remember the peer capabilities
    pub fn on_io_capability_response(&mut self, address: RawAddress, peer: PeerIoCapabilities) {
        debug!("io rsp addr:{address} {peer:?}");
        self.store.allocate_or_find(address).device_type |= DeviceType::BREDR;
        self.peer_io_caps.insert(address, peer);
    }

    /// Legacy PIN request
    pub fn on_pin_request(
        &mut self,
        address: RawAddress,
        dev_class: DeviceClass,
        bd_name: &str,
        min_16_digit: bool,
    ) -> BtmStatus {
        if self.callback.is_none() {
            return BtmStatus::NotAuthorized;
        }
        let bd_name = self.peer_name(address, bd_name);
        let context = PairingContext {
            bd_addr: address,
            dev_class,
            prompt: PendingPrompt::Pin { min_16_digit },
        };
        self.deliver_or_defer(context, bd_name)
    }

    /// Numeric comparison / just works confirmation. An empty name in the
    /// request means the link manager doesn't know it.
    pub fn on_user_confirmation_request(&mut self, request: ConfirmRequest) -> BtmStatus {
        if self.callback.is_none() {
            return BtmStatus::NotAuthorized;
        }
        let bd_name = self.peer_name(request.bd_addr, &request.bd_name);
        let context = PairingContext {
            bd_addr: request.bd_addr,
            dev_class: request.dev_class,
            prompt: PendingPrompt::Confirm(request),
        };
        self.deliver_or_defer(context, bd_name)
    }

    /// The peer displays a passkey
    pub fn on_passkey_notification(
        &mut self,
        address: RawAddress,
        dev_class: DeviceClass,
        bd_name: &str,
        passkey: u32,
    ) -> BtmStatus {
        if self.callback.is_none() {
            return BtmStatus::NotAuthorized;
        }
        let bd_name = self.peer_name(address, bd_name);
        let context = PairingContext {
            bd_addr: address,
            dev_class,
            prompt: PendingPrompt::PasskeyNotification { passkey },
        };
        self.deliver_or_defer(context, bd_name)
    }

    /// The user must enter the passkey shown by the peer
    pub fn on_passkey_request(
        &mut self,
        address: RawAddress,
        dev_class: DeviceClass,
        bd_name: &str,
    ) -> BtmStatus {
        if self.callback.is_none() {
            return BtmStatus::NotAuthorized;
        }
        let bd_name = self.peer_name(address, bd_name);
        let context =
            PairingContext { bd_addr: address, dev_class, prompt: PendingPrompt::PasskeyRequest };
        self.deliver_or_defer(context, bd_name)
    }

    /// The link manager asks for the remote OOB data; answered immediately
    pub fn on_remote_oob_request(&mut self, address: RawAddress) {
        match self.oob.remote_oob_data(address) {
            Some((c, r)) => {
                debug!("Replying with OOB data for {address}");
                self.commands.remote_oob_reply(address, BtmStatus::Success, c, r);
            }
            None => {
                info!("No OOB data for {address}");
                self.commands.remote_oob_reply(address, BtmStatus::NotAuthorized, [0; 16], [0; 16]);
            }
        }
    }

    /// Ask the controller for local OOB data. Only the P-192 values are
    /// produced on BR/EDR.
    pub fn read_local_oob_data(&mut self) -> BtmStatus {
        self.commands.read_local_oob_data()
    }

    /// Local OOB data read from the controller
    pub fn on_local_oob_data(&mut self, status: ErrorCode, c: Octet16, r: Octet16) {
        let valid = status == ErrorCode::SUCCESS;
        if !valid {
            warn!("Failed to read local OOB data, status:{status:?}");
        }
        self.notify(SecurityEvent::LocalOobData(LocalOobData { valid, c, r }));
    }

    /// A classic link key was created: store it and report bonding success
    pub fn on_link_key_notification(
        &mut self,
        address: RawAddress,
        key: Octet16,
        key_type: LinkKeyType,
        is_ctkd: bool,
    ) {
        let record = self.store.allocate_or_find(address);
        record.set_link_key(key, key_type, is_ctkd);
        if record.bond_type == BondType::Unknown {
            record.bond_type = BondType::Persistent;
        }
        if record.is_pending_removal() {
            info!("Clearing remove_dev_pending for {address}");
            record.state = RecordState::Active;
        }
        if record.bond_type == BondType::Persistent {
            storage::save_link_key(self.config.as_mut(), record);
        }
        info!("New link key for {address}, type {key_type:?} ctkd:{is_ctkd}");

        let event = AuthComplete {
            bd_addr: address,
            bd_name: record.name.clone().unwrap_or_default(),
            key: Some((key, key_type)),
            success: true,
            fail_reason: ErrorCode::SUCCESS,
            is_ctkd,
            addr_type: record.ble.addr_type,
            dev_type: record.device_type,
        };
        self.notify(SecurityEvent::AuthComplete(event));
    }

    /// Classic authentication finished. Success was already reported with
    /// the link key; only failures produce an event here.
    pub fn on_authentication_complete(&mut self, address: RawAddress, reason: ErrorCode) {
        self.peer_io_caps.remove(&address);
        if reason == ErrorCode::SUCCESS {
            debug!("Authentication complete for {address}");
            return;
        }

        match reason {
            ErrorCode::AUTH_FAILURE
            | ErrorCode::KEY_MISSING
            | ErrorCode::HOST_REJECT_SECURITY
            | ErrorCode::ENCRYPTION_MODE_NOT_ACCEPTABLE => {
                warn!("authentication failed entry:{address}, reason:{reason:?}")
            }
            _ => info!("authentication aborted entry:{address}, reason:{reason:?}"),
        }
        let event = self.failed_auth_complete(address, reason);
        self.notify(SecurityEvent::AuthComplete(event));
    }

    fn failed_auth_complete(&self, address: RawAddress, reason: ErrorCode) -> AuthComplete {
        let record = self.store.find(address);
        AuthComplete {
            bd_addr: address,
            bd_name: record.and_then(|r| r.name.clone()).unwrap_or_default(),
            key: None,
            success: false,
            fail_reason: reason,
            is_ctkd: false,
            addr_type: record.map(|r| r.ble.addr_type).unwrap_or(AddressType::Public),
            dev_type: record.map(|r| r.device_type).unwrap_or_default(),
        }
    }

    /// SMP asks for the local pairing parameters; they are set in place
    pub fn on_smp_io_request(&mut self, address: RawAddress, request: &mut SmpIoRequest) {
        let config = self.smp_config;
        if config.auth_req != 0 {
            request.auth_req = config.auth_req | (request.auth_req & SMP_AUTH_SC);
        }
        if self.oob.has_oob_data(address) {
            request.oob_data = true;
        }
        request.io_cap = config.io_cap;
        if config.init_keys <= SMP_ALL_KEYS {
            request.init_keys = config.init_keys;
        }
        if config.resp_keys <= SMP_ALL_KEYS {
            request.resp_keys = config.resp_keys;
        }
        if (8..=16).contains(&config.max_key_size) {
            request.max_key_size = config.max_key_size;
        }
        info!("io mitm:{} oob_data:{}", request.auth_req, request.oob_data);
    }

    /// An SMP event for an LE peer
    pub fn on_smp_event(
        &mut self,
        address: RawAddress,
        event: SmpEvent,
        links: &mut dyn LinkState,
    ) -> BtmStatus {
        debug!("addr:{address}, event:{event:?}");
        if self.callback.is_none() {
            return BtmStatus::NotAuthorized;
        }

        let peer = |engine: &Self| {
            let record = engine.store.find(address);
            PeerRequest {
                bd_addr: address,
                dev_class: record.map(|r| r.dev_class).unwrap_or_default(),
                bd_name: record.and_then(|r| r.name.clone()).unwrap_or_default(),
            }
        };
        let passkey = |engine: &Self, passkey: u32| {
            let PeerRequest { bd_addr, dev_class, bd_name } = peer(engine);
            PasskeyNotification { bd_addr, dev_class, bd_name, passkey }
        };

        let event = match event {
            SmpEvent::ConsentRequest => SecurityEvent::BleConsentRequest(peer(self)),
            SmpEvent::SecurityRequest => SecurityEvent::BleSecurityRequest(peer(self)),
            SmpEvent::PasskeyNotification(value) => {
                SecurityEvent::BlePasskeyNotification(passkey(self, value))
            }
            SmpEvent::PasskeyRequest => SecurityEvent::BlePasskeyRequest(peer(self)),
            SmpEvent::OobRequest => SecurityEvent::BleOobRequest(peer(self)),
            SmpEvent::NumericComparison(value) => {
                SecurityEvent::BleNumericComparison(passkey(self, value))
            }
            SmpEvent::ScOobRequest => SecurityEvent::BleScOobRequest(address),
            SmpEvent::ScLocalOobData { c, r } => {
                SecurityEvent::BleScLocalOobData(LocalOobData { valid: true, c, r })
            }
            SmpEvent::Key(key) => {
                self.store_ble_key(address, &key);
                SecurityEvent::BleKey(BleKeyDistributed { bd_addr: address, key })
            }
            SmpEvent::Complete { reason, smp_over_br } => {
                let complete = self.on_smp_complete(address, reason, smp_over_br, links);
                SecurityEvent::BleAuthComplete(complete)
            }
            SmpEvent::AddressAssociation(identity) => {
                self.store.update_identity(address, identity);
                let persistent = self
                    .store
                    .find(identity.address)
                    .map(|record| record.bond_type == BondType::Persistent)
                    .unwrap_or(false);
                if persistent && address != identity.address {
                    storage::move_device_config(self.config.as_mut(), address, identity.address);
                }
                SecurityEvent::LeAddressAssociation(LeAddressAssociation {
                    pairing_addr: address,
                    identity,
                })
            }
        };
        self.notify(event);
        BtmStatus::Success
    }

    /// Keys arrive one at a time and each is stored as it comes
    fn store_ble_key(&mut self, address: RawAddress, key: &BleKey) {
        let record = self.store.allocate_or_find(address);
        record.set_ble_key(key);
        if record.bond_type == BondType::Unknown {
            record.bond_type = BondType::Persistent;
        }
        if record.bond_type == BondType::Persistent {
            storage::save_ble_key(self.config.as_mut(), record.bd_addr, key);
        }
        debug!("Stored {:?} for {address}", key.mask());
    }

    fn on_smp_complete(
        &mut self,
        address: RawAddress,
        reason: SmpStatus,
        smp_over_br: bool,
        links: &mut dyn LinkState,
    ) -> BleAuthComplete {
        let record = self.store.find(address);
        let event = BleAuthComplete {
            bd_addr: address,
            bd_name: record.and_then(|r| r.name.clone()).unwrap_or_default(),
            success: reason == SmpStatus::Success,
            fail_reason: reason,
            addr_type: record.map(|r| r.ble.addr_type).unwrap_or(AddressType::Public),
            dev_type: record.map(|r| r.device_type).unwrap_or_default(),
        };

        if reason != SmpStatus::Success {
            let bonded = self.store.is_bonded(address);
            if bonded && reason == SmpStatus::ConnectionTimeout && !smp_over_br {
                // the link dropped while re-encrypting; the keys are still good
                warn!("bonded device disconnected when encrypting - no reason to unbond");
            } else {
                self.remove_sec_dev_entry(address, links);
            }
        } else if !smp_over_br {
            self.service_change.configure_service_change_ccc(address, true, Transport::Le);
        }
        event
    }

    /// Start bonding. If the lower layer does not start the procedure, the
    /// outcome is reported immediately and a failed attempt drops the record.
    pub fn bond(
        &mut self,
        address: AddressWithType,
        transport: Transport,
        device_type: DeviceType,
        links: &mut dyn LinkState,
    ) -> BtmStatus {
        info!("Bonding with peer device:{address} transport:{transport:?} type:{device_type:?}");
        let record = self.store.allocate_or_find(address.address);
        record.device_type |= device_type;
        if transport == Transport::Le {
            record.ble.addr_type = address.address_type;
        }

        let status = self.commands.bond(address, transport, device_type);
        if status != BtmStatus::CmdStarted {
            let mut event = self.failed_auth_complete(address.address, ErrorCode::ILLEGAL_COMMAND);
            event.success = status == BtmStatus::Success;
            if !event.success {
                warn!("Bond with {address} failed to start, status:{status:?}");
                self.remove_sec_dev_entry(address.address, links);
            }
            self.notify(SecurityEvent::AuthComplete(event));
        }
        status
    }

    /// Cancel bonding. A failure is reported here only if the lower layer
    /// neither started the cancellation nor finished it already.
    pub fn cancel_bond(&mut self, address: RawAddress) -> BtmStatus {
        debug!("Cancel bond addr:{address}");
        let status = self.commands.cancel_bond(address);
        if status != BtmStatus::CmdStarted && status != BtmStatus::Success {
            self.notify(SecurityEvent::BondCancelComplete(BondCancelComplete { success: false }));
        }
        status
    }

    /// The lower layer finished a bond cancellation
    pub fn on_bond_cancel_complete(&mut self, status: BtmStatus) {
        let success = status == BtmStatus::Success;
        self.notify(SecurityEvent::BondCancelComplete(BondCancelComplete { success }));
    }

    /// Ask the lower layer to encrypt the link to a peer
    pub fn request_encryption(&mut self, address: RawAddress, transport: Transport) -> BtmStatus {
        self.commands.set_encryption(address, transport)
    }

    /// Encryption changed on a link to the peer
    pub fn on_encryption_change(
        &mut self,
        address: RawAddress,
        transport: Transport,
        status: ErrorCode,
        enabled: bool,
    ) {
        if let Some(record) = self.store.find_mut(address) {
            let flag = match transport {
                Transport::BrEdr => SecurityFlags::ENCRYPTED,
                Transport::Le => SecurityFlags::LE_ENCRYPTED,
            };
            record.sec_flags.set(flag, status == ErrorCode::SUCCESS && enabled);
        }
        self.notify(SecurityEvent::EncryptionChange(EncryptionChange {
            bd_addr: address,
            transport,
            status,
            enabled,
        }));
        if status == ErrorCode::KEY_MISSING {
            self.notify(SecurityEvent::KeyMissing(address));
        }
    }

    /// Drop the record of a peer whose pairing failed: right away if no link
    /// is up, otherwise once the last link goes down
    pub fn remove_sec_dev_entry(&mut self, address: RawAddress, links: &mut dyn LinkState) {
        if links.is_acl_up(address) {
            debug!("ACL is not down. Schedule for Dev Removal when ACL closes:{address}");
            self.store.clear_security_flags(address);
            if self.store.set_pending_removal(address) {
                info!("Setting remove_dev_pending for {address}");
            }
        } else {
            self.purge(address);
        }
    }

    /// Forget a device. Its security flags are cleared first; if a link is up
    /// the record lingers, marked for removal, until link-down, and the peer
    /// is taken off the accept list so it cannot reconnect meanwhile.
    pub fn delete_device(&mut self, address: RawAddress, links: &mut dyn LinkState) -> bool {
        let Some(le_address) = self.store.find(address).map(DeviceRecord::le_address) else {
            warn!("Cannot delete unknown device {address}");
            return false;
        };
        self.store.clear_security_flags(address);
        if links.is_acl_up(address) {
            info!("Deleting {address} once its links are down");
            self.store.set_pending_removal(address);
            links.remove_from_acceptlist(le_address);
        } else {
            self.purge(address);
        }
        true
    }

    /// Finish a deferred removal. Called when the last link to the peer is down.
    pub fn complete_pending_removal(&mut self, address: RawAddress) -> bool {
        if !self.store.find(address).map(DeviceRecord::is_pending_removal).unwrap_or(false) {
            return false;
        }
        info!("Removing {address}, its last link is down");
        self.purge(address);
        true
    }

    fn purge(&mut self, address: RawAddress) {
        // the section is named after the address the record is stored under
        let stored_as = self.store.find(address).map(|r| r.bd_addr).unwrap_or(address);
        self.store.remove(address);
        storage::remove_device_config(self.config.as_mut(), stored_as);
        self.peer_io_caps.remove(&address);
    }

    /// Answer a PIN request
    pub fn pin_reply(&mut self, address: RawAddress, accept: bool, pin: &[u8]) {
        if !accept {
            self.commands.pin_reply(address, BtmStatus::NotAuthorized, &[]);
            return;
        }
        if pin.is_empty() || pin.len() > PIN_CODE_LEN {
            warn!("Refusing PIN of {} bytes for {address}", pin.len());
            self.commands.pin_reply(address, BtmStatus::NotAuthorized, &[]);
            return;
        }
        if let Some(record) = self.store.find_mut(address) {
            record.pin_code_length = pin.len() as u8;
        }
        self.commands.pin_reply(address, BtmStatus::Success, pin);
    }

    /// Answer a classic numeric comparison
    pub fn confirm_reply(&mut self, address: RawAddress, accept: bool) {
        self.commands.confirm_reply(address, Transport::BrEdr, reply_status(accept));
    }

    /// Answer a classic passkey request
    pub fn passkey_reply(&mut self, address: RawAddress, accept: bool, passkey: u32) {
        self.commands.passkey_reply(address, reply_status(accept), passkey);
    }

    /// Answer an LE consent or security request
    pub fn ble_consent_reply(&mut self, address: RawAddress, accept: bool) {
        self.commands.ble_security_grant(address, reply_status(accept));
    }

    /// Answer an LE passkey request
    pub fn ble_passkey_reply(&mut self, address: RawAddress, accept: bool, passkey: u32) {
        self.commands.ble_passkey_reply(address, reply_status(accept), passkey);
    }

    /// Answer an LE numeric comparison
    pub fn ble_confirm_reply(&mut self, address: RawAddress, accept: bool) {
        self.commands.confirm_reply(address, Transport::Le, reply_status(accept));
    }
}

fn reply_status(accept: bool) -> BtmStatus {
    if accept {
        BtmStatus::Success
    } else {
        BtmStatus::NotAuthorized
    }
}
