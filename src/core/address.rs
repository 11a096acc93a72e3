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

//! Device addresses, with and without an LE address type

use std::{fmt, str::FromStr};

use crate::init_flags::redact_log_is_enabled;

/// A 48-bit device address (BD_ADDR)
#[derive(Copy, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawAddress(
    /// The 6 address bytes stored in little-endian format
    pub [u8; 6],
);

impl RawAddress {
    /// An empty/invalid address
    pub const EMPTY: Self = Self([0; 6]);

    /// True if this is the all-zero address
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// The address bytes, most significant first (the order used for display)
    pub fn to_msb_bytes(self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// The address as printed in logs: only the last two octets are shown
    /// while `redact_log` is set
    pub fn to_loggable_string(&self) -> String {
        if !redact_log_is_enabled() {
            return self.to_string();
        }
        let [.., e, g] = self.to_msb_bytes();
        format!("xx:xx:xx:xx:{e:02X}:{g:02X}")
    }
}

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.to_msb_bytes();
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Returned when a string is not of the form `XX:XX:XX:XX:XX:XX`
#[derive(Debug, PartialEq, Eq)]
pub struct ParseAddressError;

impl FromStr for RawAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        // display order is MSB first, storage is little-endian
        for slot in bytes.iter_mut().rev() {
            let part = parts.next().ok_or(ParseAddressError)?;
            if part.len() != 2 {
                return Err(ParseAddressError);
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| ParseAddressError)?;
        }
        if parts.next().is_some() {
            return Err(ParseAddressError);
        }
        Ok(Self(bytes))
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[repr(C)]
/// The type of an LE address (see: 5.3 Vol 6B 1.3 Device Address)
pub enum AddressType {
    /// A public address
    Public = 0x0,
    /// A random address (either random static or private)
    Random = 0x1,
}

/// An LE address
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct AddressWithType {
    /// The device address
    pub address: RawAddress,
    /// The address type, either public or random
    pub address_type: AddressType,
}

impl AddressWithType {
    /// An empty/invalid address
    pub const EMPTY: Self = Self { address: RawAddress::EMPTY, address_type: AddressType::Public };

    /// Constructor
    pub fn new(address: RawAddress, address_type: AddressType) -> Self {
        Self { address, address_type }
    }

    /// A resolvable private address is random, with the two most significant
    /// bits set to 0b01
    pub fn is_rpa(&self) -> bool {
        self.address_type == AddressType::Random && (self.address.0[5] & 0xc0) == 0x40
    }
}

impl fmt::Display for AddressWithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.address_type {
            AddressType::Public => "public",
            AddressType::Random => "random",
        };
        write!(f, "{}[{kind}]", self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_is_msb_first() {
        let address = RawAddress([0x19, 0x4e, 0x1e, 0x68, 0x89, 0x5b]);
        assert_eq!(address.to_string(), "5B:89:68:1E:4E:19");
    }

    #[test]
    fn test_loggable_string_hides_leading_octets() {
        let address = RawAddress([0x19, 0x4e, 0x1e, 0x68, 0x89, 0x5b]);
        let loggable = address.to_loggable_string();
        assert!(loggable == "xx:xx:xx:xx:4E:19" || loggable == "5B:89:68:1E:4E:19");
        assert!(loggable.ends_with("4E:19"));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "5B:89:68:1E:4E:19".parse::<RawAddress>(),
            Ok(RawAddress([0x19, 0x4e, 0x1e, 0x68, 0x89, 0x5b]))
        );
        assert_eq!("5B:89:68:1E:4E".parse::<RawAddress>(), Err(ParseAddressError));
        assert_eq!("5B:89:68:1E:4E:19:00".parse::<RawAddress>(), Err(ParseAddressError));
        assert_eq!("ZX:89:68:1E:4E:19".parse::<RawAddress>(), Err(ParseAddressError));
    }

    #[test]
    fn test_is_rpa() {
        let rpa = AddressWithType::new(
            "5B:89:68:1E:4E:19".parse().unwrap(),
            AddressType::Random,
        );
        let static_random = AddressWithType::new(
            "CB:89:68:1E:4E:19".parse().unwrap(),
            AddressType::Random,
        );
        let public = AddressWithType::new(
            "5B:89:68:1E:4E:19".parse().unwrap(),
            AddressType::Public,
        );

        assert!(rpa.is_rpa());
        assert!(!static_random.is_rpa());
        assert!(!public.is_rpa());
    }
}
