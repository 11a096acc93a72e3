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

#![allow(dead_code)]

use std::future::Future;

use bt_stack_core::{
    connection::mocks::mock_controller::MockController,
    inquiry::mocks::MockInquiryController,
    logging::init_logging,
    security::{
        mocks::{mock_config_store::MockConfigStore, mock_security_layers::MockSecurityLayers},
        pairing::SecurityCollaborators,
    },
    StackCollaborators,
};
use tokio::task::LocalSet;

pub fn start_test(f: impl Future<Output = ()>) {
    tokio_test::block_on(async move {
        init_logging();
        LocalSet::new().run_until(f).await;
    });
}

/// Handles on every mock below the stack, kept by the test while the stack
/// owns the boxed clones
#[derive(Clone)]
pub struct MockLayers {
    pub controller: MockController,
    pub inquiry: MockInquiryController,
    pub security: MockSecurityLayers,
    pub config: MockConfigStore,
}

impl MockLayers {
    pub fn new() -> Self {
        Self {
            controller: MockController::new(),
            inquiry: MockInquiryController::new(),
            security: MockSecurityLayers::new(),
            config: MockConfigStore::new(),
        }
    }

    pub fn collaborators(&self) -> StackCollaborators {
        StackCollaborators {
            acl_controller: Box::new(self.controller.clone()),
            acceptlist_controller: Box::new(self.controller.clone()),
            outbound: Box::new(self.controller.clone()),
            inquiry_controller: Box::new(self.inquiry.clone()),
            security: SecurityCollaborators {
                config: Box::new(self.config.clone()),
                commands: Box::new(self.security.clone()),
                name_service: Box::new(self.security.clone()),
                oob: Box::new(self.security.clone()),
                service_change: Box::new(self.security.clone()),
            },
        }
    }
}
