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

//! Notifications delivered to the application security callback. Each kind
//! of event carries only the fields that are meaningful for it.

use crate::core::{
    address::{AddressType, AddressWithType, RawAddress},
    hci::{
        AuthRequirements, DeviceClass, DeviceType, ErrorCode, IoCapability, LinkKeyType, Octet16,
        SmpStatus, Transport,
    },
};

use super::record::BleKey;

/// The application security callback
pub type SecurityCallback = Box<dyn FnMut(SecurityEvent)>;

/// Every event the pairing engine reports upward
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A legacy PIN is needed
    PinRequest(PinRequest),
    /// Numeric comparison (or "just works") confirmation is needed
    ConfirmRequest(ConfirmRequest),
    /// The passkey to show to the user (classic)
    PasskeyNotification(PasskeyNotification),
    /// The user must enter the passkey shown on the peer (classic)
    PasskeyRequest(PeerRequest),
    /// Local OOB data was read from the controller
    LocalOobData(LocalOobData),
    /// Classic bonding finished
    AuthComplete(AuthComplete),
    /// A bond cancellation finished
    BondCancelComplete(BondCancelComplete),
    /// The peer asks for consent to pair over LE
    BleConsentRequest(PeerRequest),
    /// The peer sent an SMP security request
    BleSecurityRequest(PeerRequest),
    /// The passkey to show to the user (LE)
    BlePasskeyNotification(PasskeyNotification),
    /// The user must enter a passkey (LE)
    BlePasskeyRequest(PeerRequest),
    /// Legacy OOB data is needed (LE)
    BleOobRequest(PeerRequest),
    /// LE secure connections numeric comparison
    BleNumericComparison(PasskeyNotification),
    /// LE secure connections OOB data is needed
    BleScOobRequest(RawAddress),
    /// LE secure connections local OOB data was generated
    BleScLocalOobData(LocalOobData),
    /// One LE key was distributed
    BleKey(BleKeyDistributed),
    /// LE pairing finished
    BleAuthComplete(BleAuthComplete),
    /// The identity address of a peer paired on a private address was learned
    LeAddressAssociation(LeAddressAssociation),
    /// Encryption was turned on or off on a link
    EncryptionChange(EncryptionChange),
    /// The peer lost its copy of our link key
    KeyMissing(RawAddress),
}

/// Payload of a request that only identifies the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRequest {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer class of device
    pub dev_class: DeviceClass,
    /// Peer name, empty if unknown
    pub bd_name: String,
}

/// Payload of `PinRequest`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinRequest {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer class of device
    pub dev_class: DeviceClass,
    /// Peer name, empty if unknown
    pub bd_name: String,
    /// A 16 digit PIN is required
    pub min_16_digit: bool,
}

/// Payload of `ConfirmRequest`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmRequest {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer class of device
    pub dev_class: DeviceClass,
    /// Peer name, empty if unknown
    pub bd_name: String,
    /// Value to compare
    pub num_val: u32,
    /// No user interaction is needed to accept
    pub just_works: bool,
    /// Our authentication requirements
    pub loc_auth_req: AuthRequirements,
    /// Peer authentication requirements
    pub rmt_auth_req: AuthRequirements,
    /// Our IO capability
    pub loc_io_caps: IoCapability,
    /// Peer IO capability
    pub rmt_io_caps: IoCapability,
}

/// Payload of passkey display and numeric comparison events
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasskeyNotification {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer class of device
    pub dev_class: DeviceClass,
    /// Peer name, empty if unknown
    pub bd_name: String,
    /// The passkey or comparison value
    pub passkey: u32,
}

/// Payload of the local OOB data events
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalOobData {
    /// False if the controller failed to produce data
    pub valid: bool,
    /// Commitment
    pub c: Octet16,
    /// Randomizer
    pub r: Octet16,
}

/// Payload of `AuthComplete`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthComplete {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer name, empty if unknown
    pub bd_name: String,
    /// The new link key, present on success
    pub key: Option<(Octet16, LinkKeyType)>,
    /// True if bonding succeeded
    pub success: bool,
    /// HCI reason on failure
    pub fail_reason: ErrorCode,
    /// The key was derived from the LE key
    pub is_ctkd: bool,
    /// Peer address type
    pub addr_type: AddressType,
    /// Known transports of the peer
    pub dev_type: DeviceType,
}

/// Payload of `BondCancelComplete`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BondCancelComplete {
    /// True if the bond was cancelled
    pub success: bool,
}

/// Payload of `BleKey`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BleKeyDistributed {
    /// Peer address
    pub bd_addr: RawAddress,
    /// The key
    pub key: BleKey,
}

/// Payload of `BleAuthComplete`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BleAuthComplete {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Peer name, empty if unknown
    pub bd_name: String,
    /// True if pairing succeeded
    pub success: bool,
    /// SMP status on failure
    pub fail_reason: SmpStatus,
    /// Peer address type
    pub addr_type: AddressType,
    /// Known transports of the peer
    pub dev_type: DeviceType,
}

/// Payload of `LeAddressAssociation`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeAddressAssociation {
    /// The address pairing happened on
    pub pairing_addr: RawAddress,
    /// The identity address distributed by the peer
    pub identity: AddressWithType,
}

/// Payload of `EncryptionChange`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionChange {
    /// Peer address
    pub bd_addr: RawAddress,
    /// Transport of the link
    pub transport: Transport,
    /// HCI status of the change
    pub status: ErrorCode,
    /// True if the link is now encrypted
    pub enabled: bool,
}
