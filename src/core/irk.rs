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

//! Identity Resolving Keys and resolvable private address matching
//! (see: 5.3 Vol 3H 2.2.2 Random Address Hash function ah)

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::Rng;

use super::address::{AddressType, AddressWithType, RawAddress};

/// A 128-bit Identity Resolving Key, stored little-endian as received over SMP
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Irk(pub [u8; 16]);

impl std::fmt::Debug for Irk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material is never logged
        write!(f, "Irk(..)")
    }
}

/// Security function e: AES-128 with the key given least significant octet first
fn e(key: [u8; 16], plaintext: [u8; 16]) -> [u8; 16] {
    let mut key_reversed = key;
    key_reversed.reverse();
    let cipher = Aes128::new(&GenericArray::from(key_reversed));
    let mut block = GenericArray::from(plaintext);
    cipher.encrypt_block(&mut block);
    let mut ret = [0u8; 16];
    ret.copy_from_slice(block.as_slice());
    ret
}

/// ah(k, r) = e(k, padding || r) mod 2^24, with r and the result most significant first
fn ah(k: [u8; 16], r: [u8; 3]) -> [u8; 3] {
    let mut padded_r = [0u8; 16];
    padded_r[13..].copy_from_slice(&r);
    let encrypted = e(k, padded_r);
    [encrypted[13], encrypted[14], encrypted[15]]
}

impl Irk {
    /// True if the key has never been set
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Check whether `address` is a resolvable private address generated from this key
    pub fn resolves(&self, address: &AddressWithType) -> bool {
        if !address.is_rpa() || self.is_empty() {
            return false;
        }
        let a = address.address.0;
        let prand = [a[5], a[4], a[3]];
        let hash = [a[2], a[1], a[0]];
        ah(self.0, prand) == hash
    }

    /// Generate a fresh resolvable private address from this key
    pub fn generate_rpa(&self) -> AddressWithType {
        let mut prand = rand::thread_rng().gen::<[u8; 3]>();
        prand[0] = (prand[0] & 0x3f) | 0x40;
        let hash = ah(self.0, prand);
        AddressWithType::new(
            RawAddress([hash[2], hash[1], hash[0], prand[2], prand[1], prand[0]]),
            AddressType::Random,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const IRK: Irk = Irk([
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10,
    ]);

    fn random(address: &str) -> AddressWithType {
        AddressWithType::new(address.parse().unwrap(), AddressType::Random)
    }

    #[test]
    fn test_resolves_matching_addresses() {
        assert!(IRK.resolves(&random("5B:89:68:1E:4E:19")));
        assert!(IRK.resolves(&random("79:CB:92:70:BE:B3")));
        assert!(IRK.resolves(&random("5D:EC:DA:8C:33:AE")));
    }

    #[test]
    fn test_rejects_wrong_hash() {
        assert!(!IRK.resolves(&random("60:89:68:1E:4E:19")));
    }

    #[test]
    fn test_rejects_public_address() {
        let public =
            AddressWithType::new("5B:89:68:1E:4E:19".parse().unwrap(), AddressType::Public);
        assert!(!IRK.resolves(&public));
    }

    #[test]
    fn test_empty_key_resolves_nothing() {
        assert!(!Irk::default().resolves(&random("5B:89:68:1E:4E:19")));
    }

    #[test]
    fn test_generated_rpa_resolves() {
        let rpa = IRK.generate_rpa();
        assert!(rpa.is_rpa());
        assert!(IRK.resolves(&rpa));
    }
}
