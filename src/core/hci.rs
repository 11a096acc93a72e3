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

//! Values exchanged with the controller and the lower stack layers. Wire
//! encoding is handled below us, so these are plain Rust types.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};

/// An HCI Error Code from the controller
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ErrorCode(pub u8);

impl ErrorCode {
    /// Operation completed successfully
    pub const SUCCESS: Self = ErrorCode(0x00);
    /// Unknown HCI command
    pub const ILLEGAL_COMMAND: Self = ErrorCode(0x01);
    /// Unknown connection identifier
    pub const UNKNOWN_CONNECTION_ID: Self = ErrorCode(0x02);
    /// Authentication failure
    pub const AUTH_FAILURE: Self = ErrorCode(0x05);
    /// PIN or key missing
    pub const KEY_MISSING: Self = ErrorCode(0x06);
    /// Memory capacity exceeded
    pub const MEMORY_FULL: Self = ErrorCode(0x07);
    /// Connection timeout (supervision timeout)
    pub const CONNECTION_TIMEOUT: Self = ErrorCode(0x08);
    /// Command disallowed
    pub const COMMAND_DISALLOWED: Self = ErrorCode(0x0c);
    /// Connection rejected due to security reasons
    pub const HOST_REJECT_SECURITY: Self = ErrorCode(0x0e);
    /// Connection rejected due to limited resources
    pub const REJECTED_LIMITED_RESOURCES: Self = ErrorCode(0x0d);
    /// Connection rejected due to unacceptable BD_ADDR
    pub const REJECTED_UNACCEPTABLE_BD_ADDR: Self = ErrorCode(0x0f);
    /// Remote user terminated connection
    pub const REMOTE_USER_TERMINATED: Self = ErrorCode(0x13);
    /// Remote device terminated connection due to power off
    pub const REMOTE_POWER_OFF: Self = ErrorCode(0x15);
    /// Connection terminated by local host
    pub const CONNECTION_TERMINATED_BY_LOCAL_HOST: Self = ErrorCode(0x16);
    /// Pairing not allowed
    pub const PAIRING_NOT_ALLOWED: Self = ErrorCode(0x18);
    /// Unspecified error
    pub const UNSPECIFIED: Self = ErrorCode(0x1f);
    /// LMP response timeout
    pub const LMP_RESPONSE_TIMEOUT: Self = ErrorCode(0x22);
    /// Encryption mode not acceptable
    pub const ENCRYPTION_MODE_NOT_ACCEPTABLE: Self = ErrorCode(0x25);
    /// Connection failed to be established
    pub const CONNECTION_FAILED_ESTABLISHMENT: Self = ErrorCode(0x3e);
}

/// An ACL connection handle
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u16);

/// Which physical transport a link runs over
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Transport {
    /// Classic BR/EDR
    BrEdr,
    /// Low Energy
    Le,
}

/// Our role on a link
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Role {
    /// We initiated the link layer connection (or took over via role switch)
    Central,
    /// The peer is the central
    Peripheral,
}

bitflags! {
    /// The transports a peer device is known to support
    #[derive(Default)]
    pub struct DeviceType: u8 {
        /// BR/EDR
        const BREDR = 0x01;
        /// Low Energy
        const BLE = 0x02;
        /// Dual mode
        const DUMO = Self::BREDR.bits | Self::BLE.bits;
    }
}

/// Class of Device, as the three octets reported by the controller
pub type DeviceClass = [u8; 3];

/// A 128-bit key or OOB value
pub type Octet16 = [u8; 16];

/// Longest PIN code a classic link accepts, in bytes
pub const PIN_CODE_LEN: usize = 16;

/// Classic link key types (see: 5.3 Vol 4E 7.7.24 Link Key Notification)
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum LinkKeyType {
    /// Combination key
    Combination = 0x00,
    /// Debug combination key
    DebugCombination = 0x03,
    /// Unauthenticated combination key generated from P-192
    UnauthCombination = 0x04,
    /// Authenticated combination key generated from P-192
    AuthCombination = 0x05,
    /// Changed combination key
    ChangedCombination = 0x06,
    /// Unauthenticated combination key generated from P-256
    UnauthCombinationP256 = 0x07,
    /// Authenticated combination key generated from P-256
    AuthCombinationP256 = 0x08,
}

impl LinkKeyType {
    /// True if the key was produced with MITM protection
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LinkKeyType::AuthCombination | LinkKeyType::AuthCombinationP256)
    }
}

/// Local or remote I/O capability
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum IoCapability {
    /// Display only
    DisplayOnly = 0,
    /// Display with yes/no input
    DisplayYesNo = 1,
    /// Keyboard only
    KeyboardOnly = 2,
    /// Neither input nor output
    NoInputNoOutput = 3,
    /// Keyboard and display (LE only)
    KeyboardDisplay = 4,
}

/// Authentication requirements, as exchanged during IO capability negotiation
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct AuthRequirements(pub u8);

impl AuthRequirements {
    /// MITM protection bit
    pub const MITM: u8 = 0x01;

    /// True if the MITM bit is set
    pub fn mitm_required(&self) -> bool {
        self.0 & Self::MITM != 0
    }
}

/// SMP pairing status codes (see: 5.3 Vol 3H 3.5.5), followed by the
/// host-internal codes used by the stack
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SmpStatus {
    Success = 0x00,
    PasskeyEntryFail = 0x01,
    OobFail = 0x02,
    PairAuthFail = 0x03,
    ConfirmValueError = 0x04,
    PairNotSupported = 0x05,
    EncKeySize = 0x06,
    InvalidCommand = 0x07,
    PairFailUnknown = 0x08,
    RepeatedAttempts = 0x09,
    InvalidParameters = 0x0a,
    DhKeyCheckFail = 0x0b,
    NumericComparisonFail = 0x0c,
    BrPairingInProgress = 0x0d,
    CrossTransportDeriveNotAllowed = 0x0e,
    PairInternalError = 0x0f,
    UnknownIoCap = 0x10,
    Busy = 0x13,
    EncFail = 0x14,
    Started = 0x15,
    ResponseTimeout = 0x16,
    Fail = 0x18,
    ConnectionTimeout = 0x19,
}

/// Results of requests made to the lower security and link layers
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum BtmStatus {
    /// Completed synchronously with success
    Success,
    /// Accepted; the result arrives asynchronously
    CmdStarted,
    /// Another operation is in progress
    Busy,
    /// Out of resources
    NoResources,
    /// The link is not in a state that allows the request
    WrongMode,
    /// A parameter was invalid
    IllegalValue,
    /// The request was refused
    NotAuthorized,
    /// The request is not supported in the current mode
    ModeUnsupported,
    /// Generic failure
    Failure,
}
