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

//! This module keeps a shadow of the controller's filter accept list and
//! resolving list. Every change is applied to the shadow and issued to the
//! controller in the same call, so commands reach the controller in the order
//! they were requested. The shadow never grows past the capacity the
//! controller reported.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::core::{
    address::{AddressWithType, RawAddress},
    irk::Irk,
};

use super::controller::AcceptlistController;

/// Errors returned when an entry cannot be added
#[derive(Debug, PartialEq, Eq)]
pub enum AcceptlistError {
    /// The list is at capacity
    Full,
    /// The entry is already on the list
    AlreadyPresent,
}

/// Mirrors the LE filter accept list and resolving list in the controller
pub struct AcceptlistManager {
    acceptlist: HashSet<AddressWithType>,
    max_size: usize,
    resolving_list: HashMap<AddressWithType, Irk>,
    resolving_list_max_size: usize,
    controller: Box<dyn AcceptlistController>,
}

impl AcceptlistManager {
    /// Constructor. The sizes are used until the controller reports its own.
    pub fn new(
        max_size: usize,
        resolving_list_max_size: usize,
        controller: Box<dyn AcceptlistController>,
    ) -> Self {
        Self {
            acceptlist: HashSet::new(),
            max_size,
            resolving_list: HashMap::new(),
            resolving_list_max_size,
            controller,
        }
    }

    /// Add a peer to the accept list. Nothing is evicted to make room.
    pub fn add(&mut self, address: AddressWithType) -> Result<(), AcceptlistError> {
        if self.acceptlist.contains(&address) {
            debug!("{address} is already on the accept list");
            return Err(AcceptlistError::AlreadyPresent);
        }
        if self.acceptlist.len() >= self.max_size {
            warn!("Accept list full ({}), cannot add {address}", self.max_size);
            return Err(AcceptlistError::Full);
        }
        info!("Adding {address} to the accept list");
        self.acceptlist.insert(address);
        self.controller.add_to_acceptlist(address);
        Ok(())
    }

    /// Remove a peer from the accept list. Returns false (and warns) if it
    /// was not there.
    pub fn remove(&mut self, address: AddressWithType) -> bool {
        if !self.acceptlist.remove(&address) {
            warn!("{address} is not on the accept list");
            return false;
        }
        info!("Removing {address} from the accept list");
        self.controller.remove_from_acceptlist(address);
        true
    }

    /// Remove the peer under any address type
    pub fn remove_address(&mut self, address: RawAddress) -> bool {
        let matching: Vec<_> =
            self.acceptlist.iter().filter(|entry| entry.address == address).copied().collect();
        for entry in &matching {
            self.remove(*entry);
        }
        !matching.is_empty()
    }

    /// True if the peer is on the accept list
    pub fn contains(&self, address: &AddressWithType) -> bool {
        self.acceptlist.contains(address)
    }

    /// Number of entries on the accept list
    pub fn len(&self) -> usize {
        self.acceptlist.len()
    }

    /// True if the accept list is empty
    pub fn is_empty(&self) -> bool {
        self.acceptlist.is_empty()
    }

    /// Capacity of the accept list
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The controller reported the size of its accept list, which starts
    /// over empty
    pub fn set_max_size(&mut self, max_size: usize) {
        info!("Controller accept list holds {max_size} entries");
        self.max_size = max_size;
        self.clear();
    }

    /// Empty the accept list
    pub fn clear(&mut self) {
        self.acceptlist.clear();
        self.controller.clear_acceptlist();
    }

    /// Let the controller resolve RPAs of this identity
    pub fn add_to_resolving_list(
        &mut self,
        identity: AddressWithType,
        irk: Irk,
    ) -> Result<(), AcceptlistError> {
        if self.resolving_list.contains_key(&identity) {
            return Err(AcceptlistError::AlreadyPresent);
        }
        if self.resolving_list.len() >= self.resolving_list_max_size {
            warn!("Resolving list full ({}), cannot add {identity}", self.resolving_list_max_size);
            return Err(AcceptlistError::Full);
        }
        self.resolving_list.insert(identity, irk);
        self.controller.add_to_resolving_list(identity, irk);
        Ok(())
    }

    /// Stop resolving RPAs of this identity
    pub fn remove_from_resolving_list(&mut self, identity: AddressWithType) -> bool {
        if self.resolving_list.remove(&identity).is_none() {
            warn!("{identity} is not on the resolving list");
            return false;
        }
        self.controller.remove_from_resolving_list(identity);
        true
    }

    /// Number of entries on the resolving list
    pub fn resolving_list_len(&self) -> usize {
        self.resolving_list.len()
    }

    /// The controller reported the size of its resolving list, which starts
    /// over empty
    pub fn set_resolving_list_max_size(&mut self, max_size: usize) {
        self.resolving_list_max_size = max_size;
        for (identity, _) in self.resolving_list.drain() {
            self.controller.remove_from_resolving_list(identity);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        connection::mocks::mock_controller::{ControllerCommand, MockController},
        core::address::AddressType,
    };

    use super::*;

    const ADDRESS_1: AddressWithType = AddressWithType {
        address: RawAddress([1, 2, 3, 4, 5, 6]),
        address_type: AddressType::Public,
    };
    const ADDRESS_2: AddressWithType = AddressWithType {
        address: RawAddress([1, 2, 3, 4, 5, 6]),
        address_type: AddressType::Random,
    };
    const ADDRESS_3: AddressWithType = AddressWithType {
        address: RawAddress([1, 2, 3, 4, 5, 7]),
        address_type: AddressType::Random,
    };

    fn create_manager(max_size: usize) -> (AcceptlistManager, MockController) {
        let controller = MockController::new();
        (AcceptlistManager::new(max_size, 2, Box::new(controller.clone())), controller)
    }

    #[test]
    fn test_add_issues_command() {
        // arrange
        let (mut manager, controller) = create_manager(4);

        // act
        manager.add(ADDRESS_1).unwrap();

        // assert
        assert!(manager.contains(&ADDRESS_1));
        assert_eq!(controller.current_acceptlist(), [ADDRESS_1].into());
    }

    #[test]
    fn test_add_when_full_is_rejected() {
        // arrange: fill to capacity
        let (mut manager, controller) = create_manager(2);
        manager.add(ADDRESS_1).unwrap();
        manager.add(ADDRESS_2).unwrap();

        // act
        let result = manager.add(ADDRESS_3);

        // assert: nothing evicted, nothing sent
        assert_eq!(result, Err(AcceptlistError::Full));
        assert_eq!(manager.len(), 2);
        assert_eq!(controller.current_acceptlist(), [ADDRESS_1, ADDRESS_2].into());
    }

    #[test]
    fn test_add_twice() {
        let (mut manager, _) = create_manager(4);
        manager.add(ADDRESS_1).unwrap();

        assert_eq!(manager.add(ADDRESS_1), Err(AcceptlistError::AlreadyPresent));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_twice_is_safe() {
        // arrange
        let (mut manager, controller) = create_manager(4);
        manager.add(ADDRESS_1).unwrap();

        // act
        assert!(manager.remove(ADDRESS_1));
        assert!(!manager.remove(ADDRESS_1));

        // assert
        assert_eq!(manager.len(), 0);
        assert!(controller.current_acceptlist().is_empty());
    }

    #[test]
    fn test_commands_issued_in_order() {
        let (mut manager, controller) = create_manager(4);

        manager.add(ADDRESS_1).unwrap();
        manager.add(ADDRESS_3).unwrap();
        manager.remove(ADDRESS_1);

        assert_eq!(
            controller.take_commands(),
            vec![
                ControllerCommand::AddToAcceptlist(ADDRESS_1),
                ControllerCommand::AddToAcceptlist(ADDRESS_3),
                ControllerCommand::RemoveFromAcceptlist(ADDRESS_1),
            ]
        );
    }

    #[test]
    fn test_remove_address_of_any_type() {
        let (mut manager, _) = create_manager(4);
        manager.add(ADDRESS_1).unwrap();
        manager.add(ADDRESS_2).unwrap();
        manager.add(ADDRESS_3).unwrap();

        assert!(manager.remove_address(ADDRESS_1.address));

        assert_eq!(manager.len(), 1);
        assert!(manager.contains(&ADDRESS_3));
    }

    #[test]
    fn test_controller_reported_size() {
        let (mut manager, _) = create_manager(1);
        manager.add(ADDRESS_1).unwrap();

        manager.set_max_size(3);
        manager.add(ADDRESS_1).unwrap();
        manager.add(ADDRESS_2).unwrap();

        assert_eq!(manager.max_size(), 3);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_resolving_list_capacity() {
        let (mut manager, controller) = create_manager(4);

        manager.add_to_resolving_list(ADDRESS_1, Irk([1; 16])).unwrap();
        manager.add_to_resolving_list(ADDRESS_3, Irk([3; 16])).unwrap();
        let result = manager.add_to_resolving_list(ADDRESS_2, Irk([2; 16]));

        assert_eq!(result, Err(AcceptlistError::Full));
        assert_eq!(controller.current_resolving_list(), [ADDRESS_1, ADDRESS_3].into());
        assert!(manager.remove_from_resolving_list(ADDRESS_1));
        assert!(!manager.remove_from_resolving_list(ADDRESS_1));
        assert_eq!(manager.resolving_list_len(), 1);
    }
}
