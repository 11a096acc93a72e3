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

//! This module mocks the controller's discovery procedures

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::inquiry::InquiryController;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InquiryCommand {
    StartInquiry(u8),
    CancelInquiry,
    StartLeScan,
    StopLeScan,
}

#[derive(Clone, Debug, Default)]
pub struct MockInquiryController {
    commands: Rc<RefCell<VecDeque<InquiryCommand>>>,
}

impl MockInquiryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_commands(&self) -> Vec<InquiryCommand> {
        self.commands.borrow_mut().drain(..).collect()
    }
}

impl InquiryController for MockInquiryController {
    fn start_inquiry(&mut self, duration: u8) {
        self.commands.borrow_mut().push_back(InquiryCommand::StartInquiry(duration));
    }

    fn cancel_inquiry(&mut self) {
        self.commands.borrow_mut().push_back(InquiryCommand::CancelInquiry);
    }

    fn start_le_scan(&mut self) {
        self.commands.borrow_mut().push_back(InquiryCommand::StartLeScan);
    }

    fn stop_le_scan(&mut self) {
        self.commands.borrow_mut().push_back(InquiryCommand::StopLeScan);
    }
}
