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

//! A LinkState with links that the test brings up and down by hand

use std::collections::HashSet;

use crate::{
    core::address::{AddressWithType, RawAddress},
    security::pairing::LinkState,
};

#[derive(Debug, Default)]
pub struct MockLinkState {
    pub connected: HashSet<RawAddress>,
    pub removed_from_acceptlist: Vec<AddressWithType>,
}

impl MockLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_to(address: RawAddress) -> Self {
        Self { connected: HashSet::from([address]), ..Default::default() }
    }
}

impl LinkState for MockLinkState {
    fn is_acl_up(&self, address: RawAddress) -> bool {
        self.connected.contains(&address)
    }

    fn remove_from_acceptlist(&mut self, address: AddressWithType) {
        self.removed_from_acceptlist.push(address);
    }
}
