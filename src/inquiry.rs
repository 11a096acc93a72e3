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

//! Device discovery: a classic inquiry and an LE scan run as one round.
//! Results are deduplicated per round, and the round ends with exactly one
//! completion callback whether it finished, timed out or was cancelled.

use std::time::Duration;

use bitflags::bitflags;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::{
    core::{
        address::{AddressWithType, RawAddress},
        hci::{DeviceClass, DeviceType, ErrorCode},
    },
    utils::fixed_queue::FixedQueue,
};

use self::database::{InquiryDatabase, InquiryResults, ResultFilter};

pub mod database;
pub mod mocks;

bitflags! {
    /// The discovery procedures making up a round
    pub struct InquiryMode: u8 {
        /// Classic general inquiry
        const GENERAL = 0x01;
        /// LE general discovery
        const BLE_GENERAL = 0x10;
    }
}

/// Clock offset bit marking the value as reported by the controller
pub const CLOCK_OFFSET_VALID: u16 = 0x8000;

/// Length of one inquiry duration unit
pub const INQUIRY_LENGTH_UNIT: Duration = Duration::from_millis(1280);

/// The inquiry result event a classic result arrived in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InquiryResultKind {
    /// Inquiry Result
    Standard = 0,
    /// Inquiry Result with RSSI
    WithRssi = 1,
    /// Extended Inquiry Result
    Extended = 2,
}

/// One classic inquiry response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InquiryResponse {
    /// Device address
    pub address: RawAddress,
    /// Page scan repetition mode
    pub page_scan_rep_mode: u8,
    /// Class of device
    pub dev_class: DeviceClass,
    /// Clock offset
    pub clock_offset: u16,
    /// RSSI, 0 for a standard result
    pub rssi: i8,
    /// Extended inquiry response data, empty unless extended
    pub eir: Vec<u8>,
}

/// How a round ended
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InquiryStatus {
    /// The controller completed the round
    Success,
    /// The round was cancelled
    Canceled,
    /// The round ran out of time
    TimerPopped,
}

/// Reported once per round
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InquiryCompleteInfo {
    /// How the round ended
    pub status: InquiryStatus,
    /// Last HCI status of the round
    pub hci_status: ErrorCode,
    /// Distinct devices that answered
    pub num_resp: u32,
    /// Responses per result kind: standard, with RSSI, extended
    pub resp_type: [u32; 3],
    /// When the round started
    pub start_time: Instant,
}

/// Called for every new or improved result
pub type InquiryResultsCallback = Box<dyn FnMut(&InquiryResults)>;

/// Called once when the round ends
pub type InquiryCompleteCallback = Box<dyn FnOnce(InquiryCompleteInfo)>;

/// Errors returned when a round cannot start
#[derive(Debug, PartialEq, Eq)]
pub enum InquiryError {
    /// A round is already running
    Busy,
}

/// Discovery commands issued to the controller
pub trait InquiryController {
    /// Start a classic inquiry of `duration` units
    fn start_inquiry(&mut self, duration: u8);
    /// Cancel the classic inquiry
    fn cancel_inquiry(&mut self);
    /// Start LE discovery scanning
    fn start_le_scan(&mut self);
    /// Stop LE discovery scanning
    fn stop_le_scan(&mut self);
}

struct InquiryRound {
    modes: InquiryMode,
    start_time: Instant,
    hci_status: ErrorCode,
    num_resp: u32,
    resp_type: [u32; 3],
    results_callback: Option<InquiryResultsCallback>,
    complete_callback: Option<InquiryCompleteCallback>,
}

impl InquiryRound {
    fn report(&mut self, results: &InquiryResults) {
        match self.results_callback.as_mut() {
            Some(callback) => callback(results),
            None => warn!("No callback is registered for inquiry results"),
        }
    }
}

/// Runs discovery rounds and owns the inquiry database
pub struct InquiryCoordinator {
    controller: Box<dyn InquiryController>,
    db: InquiryDatabase,
    filter: ResultFilter,
    round: Option<InquiryRound>,
    counter: u32,
    history: FixedQueue<InquiryCompleteInfo>,
}

impl InquiryCoordinator {
    /// Constructor
    pub fn new(
        db_size: usize,
        filter_size: usize,
        history_size: usize,
        controller: Box<dyn InquiryController>,
    ) -> Self {
        Self {
            controller,
            db: InquiryDatabase::new(db_size),
            filter: ResultFilter::new(filter_size),
            round: None,
            counter: 1,
            history: FixedQueue::new(history_size),
        }
    }

    /// True while a round is running
    pub fn is_active(&self) -> bool {
        self.round.is_some()
    }

    /// Start a round of classic inquiry and LE scanning. Returns the round
    /// number, to be handed back to `on_inquiry_timeout`.
    pub fn start_inquiry(
        &mut self,
        duration: u8,
        results_callback: InquiryResultsCallback,
        complete_callback: InquiryCompleteCallback,
    ) -> Result<u32, InquiryError> {
        if let Some(round) = &self.round {
            warn!(
                "Device discovery already in progress modes:{:?} counter:{}",
                round.modes, self.counter
            );
            return Err(InquiryError::Busy);
        }

        self.round = Some(InquiryRound {
            modes: InquiryMode::GENERAL | InquiryMode::BLE_GENERAL,
            start_time: Instant::now(),
            hci_status: ErrorCode::SUCCESS,
            num_resp: 0,
            resp_type: [0; 3],
            results_callback: Some(results_callback),
            complete_callback: Some(complete_callback),
        });
        self.filter.clear();
        info!("Starting device discovery, round {}", self.counter);
        self.controller.start_le_scan();
        self.controller.start_inquiry(duration);
        Ok(self.counter)
    }

    /// Cancel the running round. The completion callback fires right away
    /// with `Canceled`; late completion events are ignored.
    pub fn cancel_inquiry(&mut self) -> bool {
        if self.round.is_none() {
            debug!("No inquiry to cancel");
            return false;
        }
        self.cancel_procedures();
        self.finish_round(InquiryStatus::Canceled);
        true
    }

    /// The round's time ran out. Ignored if `round` already ended.
    pub fn on_inquiry_timeout(&mut self, round: u32) {
        if round != self.counter || self.round.is_none() {
            debug!("Timeout of finished round {round} ignored");
            return;
        }
        info!("Device discovery round {round} timed out");
        self.cancel_procedures();
        self.finish_round(InquiryStatus::TimerPopped);
    }

    fn cancel_procedures(&mut self) {
        let Some(round) = &self.round else {
            return;
        };
        if round.modes.contains(InquiryMode::GENERAL) {
            self.controller.cancel_inquiry();
        }
        if round.modes.contains(InquiryMode::BLE_GENERAL) {
            self.controller.stop_le_scan();
        }
    }

    /// A classic inquiry result. A device reports once per round, unless a
    /// later response brings a better RSSI or extended data.
    pub fn on_inquiry_result(&mut self, kind: InquiryResultKind, response: InquiryResponse) {
        let counter = self.counter;
        let round = match self.round.as_mut() {
            Some(round) if round.modes.contains(InquiryMode::GENERAL) => round,
            _ => {
                debug!("Inquiry result outside of an inquiry dropped");
                return;
            }
        };
        let address = response.address;

        let mut update = false;
        if self.filter.check_and_insert(address) {
            let Some(entry) = self.db.find_mut(address) else {
                return;
            };
            let stored = entry.results.rssi;
            if response.rssi != 0
                && (response.rssi > stored
                    || stored == 0
                    || entry.results.device_type.contains(DeviceType::BREDR))
            {
                debug!("Update RSSI new:{}, old:{stored}", response.rssi);
                update = true;
            } else if kind == InquiryResultKind::Extended {
                // the first response of this device carried no EIR
                update = true;
            } else {
                return;
            }
        }

        let entry = self.db.find_or_allocate(address);
        let new_in_round = entry.inq_count != counter;
        let is_new = new_in_round || entry.results.device_type != DeviceType::BREDR;
        entry.results.rssi = response.rssi;

        if is_new {
            let results = &mut entry.results;
            results.page_scan_rep_mode = response.page_scan_rep_mode;
            results.dev_class = response.dev_class;
            results.clock_offset = response.clock_offset | CLOCK_OFFSET_VALID;
            entry.time_of_resp = Instant::now();
            if new_in_round {
                round.num_resp += 1;
                round.resp_type[kind as usize] += 1;
                entry.results.device_type = DeviceType::BREDR;
            } else {
                entry.results.device_type |= DeviceType::BREDR;
            }
            entry.inq_count = counter;
        }
        if kind == InquiryResultKind::Extended && (is_new || update) {
            entry.results.eir = response.eir;
        }

        if is_new || update {
            round.report(&entry.results);
        }
    }

    /// An advertising report received while discovering over LE. Reported
    /// when first seen in the round and whenever its data changes.
    pub fn on_le_scan_result(&mut self, address: AddressWithType, rssi: i8, data: &[u8]) {
        let counter = self.counter;
        let round = match self.round.as_mut() {
            Some(round) if round.modes.contains(InquiryMode::BLE_GENERAL) => round,
            _ => return,
        };

        let entry = self.db.find_or_allocate(address.address);
        let new_in_round = entry.inq_count != counter;
        let changed = entry.results.eir != data;
        if new_in_round {
            round.num_resp += 1;
            entry.results.device_type = DeviceType::BLE;
        } else {
            entry.results.device_type |= DeviceType::BLE;
        }
        entry.results.ble_addr_type = address.address_type;
        entry.results.rssi = rssi;
        entry.results.eir = data.to_vec();
        entry.time_of_resp = Instant::now();
        entry.inq_count = counter;

        if new_in_round || changed {
            round.report(&entry.results);
        }
    }

    /// Inquiry Complete (or the completion of an inquiry cancel)
    pub fn on_inquiry_complete(&mut self, status: ErrorCode) {
        self.on_procedure_complete(status, InquiryMode::GENERAL);
    }

    /// LE discovery scanning stopped
    pub fn on_le_scan_complete(&mut self) {
        self.on_procedure_complete(ErrorCode::SUCCESS, InquiryMode::BLE_GENERAL);
    }

    fn on_procedure_complete(&mut self, status: ErrorCode, mode: InquiryMode) {
        if status != ErrorCode::SUCCESS {
            warn!("Discovery procedure {mode:?} ended with status {status:?}");
        }
        let Some(round) = self.round.as_mut() else {
            error!("Discovery complete when no discovery was active");
            return;
        };
        round.modes.remove(mode);
        round.hci_status = status;
        if !round.modes.is_empty() {
            info!("Discovery still running: {:?}", round.modes);
            return;
        }
        self.finish_round(InquiryStatus::Success);
    }

    fn finish_round(&mut self, status: InquiryStatus) {
        let Some(round) = self.round.take() else {
            return;
        };
        self.counter = self.counter.wrapping_add(1).max(1);
        self.filter.clear();
        if status == InquiryStatus::Success && round.hci_status == ErrorCode::SUCCESS {
            self.db.sort_by_rssi();
        }

        let info = InquiryCompleteInfo {
            status,
            hci_status: round.hci_status,
            num_resp: round.num_resp,
            resp_type: round.resp_type,
            start_time: round.start_time,
        };
        info!(
            "Device discovery {status:?} after {:?}, results:{} std:{} rssi:{} ext:{}",
            round.start_time.elapsed(),
            info.num_resp,
            info.resp_type[0],
            info.resp_type[1],
            info.resp_type[2]
        );
        self.history.push(info.clone());
        match round.complete_callback {
            Some(callback) => callback(info),
            None => warn!("No callback to return inquiry result"),
        }
    }

    /// What is known about a discovered device
    pub fn read_inquiry_db(&self, address: RawAddress) -> Option<&InquiryResults> {
        self.db.find(address).map(|entry| &entry.results)
    }

    /// Discovered devices, strongest first after a completed round
    pub fn inquiry_results(&self) -> impl Iterator<Item = &InquiryResults> {
        self.db.iter().map(|entry| &entry.results)
    }

    /// Forget one discovered device, or all of them. Entries of a running
    /// round are kept.
    pub fn clear_inquiry_db(&mut self, address: Option<RawAddress>) {
        let counter = self.counter;
        let active = self.round.is_some();
        self.db.retain(|entry| {
            let in_running_round = active && entry.inq_count == counter;
            let targeted = address.map_or(true, |address| entry.results.bd_addr == address);
            in_running_round || !targeted
        });
    }

    /// Completed rounds, oldest first
    pub fn inquiry_history(&self) -> impl Iterator<Item = &InquiryCompleteInfo> {
        self.history.iter()
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use crate::{
        core::address::AddressType,
        inquiry::mocks::{InquiryCommand, MockInquiryController},
    };

    use super::*;

    const ADDRESS: RawAddress = RawAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const ANOTHER_ADDRESS: RawAddress = RawAddress([0x12, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const LE_ADDRESS: AddressWithType = AddressWithType {
        address: RawAddress([0x13, 0x22, 0x33, 0x44, 0x55, 0xc6]),
        address_type: AddressType::Random,
    };

    type Log<T> = Rc<RefCell<Vec<T>>>;

    struct Harness {
        coordinator: InquiryCoordinator,
        controller: MockInquiryController,
        results: Log<InquiryResults>,
        completions: Log<InquiryCompleteInfo>,
    }

    fn start_round() -> Harness {
        let controller = MockInquiryController::new();
        let mut coordinator = InquiryCoordinator::new(8, 16, 4, Box::new(controller.clone()));
        let (results, completions): (Log<_>, Log<_>) = Default::default();
        let (r, c) = (results.clone(), completions.clone());
        coordinator
            .start_inquiry(
                10,
                Box::new(move |result| r.borrow_mut().push(result.clone())),
                Box::new(move |info| c.borrow_mut().push(info)),
            )
            .unwrap();
        Harness { coordinator, controller, results, completions }
    }

    fn response(address: RawAddress, rssi: i8) -> InquiryResponse {
        InquiryResponse {
            address,
            page_scan_rep_mode: 1,
            dev_class: [0x0c, 0x02, 0x5a],
            clock_offset: 0x1234,
            rssi,
            eir: vec![],
        }
    }

    #[test]
    fn test_start_issues_commands() {
        let Harness { controller, .. } = start_round();

        assert_eq!(
            controller.take_commands(),
            vec![InquiryCommand::StartLeScan, InquiryCommand::StartInquiry(10)]
        );
    }

    #[test]
    fn test_second_start_is_busy() {
        let Harness { mut coordinator, .. } = start_round();

        let result = coordinator.start_inquiry(10, Box::new(|_| {}), Box::new(|_| {}));

        assert_eq!(result, Err(InquiryError::Busy));
    }

    #[test]
    fn test_better_rssi_supersedes_missing_rssi() {
        // arrange
        let Harness { mut coordinator, results, completions, .. } = start_round();

        // act
        coordinator.on_inquiry_result(InquiryResultKind::WithRssi, response(ADDRESS, 0));
        coordinator.on_inquiry_result(InquiryResultKind::WithRssi, response(ADDRESS, -40));
        coordinator.on_inquiry_complete(ErrorCode::SUCCESS);
        coordinator.on_le_scan_complete();

        // assert
        assert_eq!(results.borrow().len(), 2);
        assert_eq!(results.borrow()[1].rssi, -40);
        let completions = completions.borrow();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].num_resp, 1);
        assert_eq!(completions[0].resp_type, [0, 1, 0]);
        assert_eq!(completions[0].status, InquiryStatus::Success);
    }

    #[test]
    fn test_duplicate_standard_result_dropped() {
        let Harness { mut coordinator, results, .. } = start_round();

        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));

        assert_eq!(results.borrow().len(), 1);
        let stored = coordinator.read_inquiry_db(ADDRESS).unwrap();
        assert_eq!(stored.clock_offset, 0x1234 | CLOCK_OFFSET_VALID);
        assert_eq!(stored.device_type, DeviceType::BREDR);
    }

    #[test]
    fn test_extended_result_supersedes() {
        let Harness { mut coordinator, results, .. } = start_round();
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));

        coordinator.on_inquiry_result(
            InquiryResultKind::Extended,
            InquiryResponse {
                eir: vec![0x05, 0x09, b'W', b'i', b'd', b'g'],
                ..response(ADDRESS, 0)
            },
        );

        assert_eq!(results.borrow().len(), 2);
        assert_eq!(results.borrow()[1].eir.len(), 6);
    }

    #[test]
    fn test_completion_waits_for_both_procedures() {
        let Harness { mut coordinator, completions, .. } = start_round();

        coordinator.on_inquiry_complete(ErrorCode::SUCCESS);
        assert!(completions.borrow().is_empty());
        assert!(coordinator.is_active());

        coordinator.on_le_scan_complete();
        assert_eq!(completions.borrow().len(), 1);
        assert!(!coordinator.is_active());
    }

    #[test]
    fn test_cancel_completes_once() {
        // arrange
        let Harness { mut coordinator, controller, completions, .. } = start_round();
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));
        controller.take_commands();

        // act
        assert!(coordinator.cancel_inquiry());
        coordinator.on_inquiry_complete(ErrorCode::SUCCESS);

        // assert
        assert_eq!(
            controller.take_commands(),
            vec![InquiryCommand::CancelInquiry, InquiryCommand::StopLeScan]
        );
        let completions = completions.borrow();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].status, InquiryStatus::Canceled);
        assert_eq!(completions[0].num_resp, 1);
        assert!(!coordinator.cancel_inquiry());
    }

    #[test]
    fn test_timeout_of_current_round() {
        let Harness { mut coordinator, completions, .. } = start_round();

        coordinator.on_inquiry_timeout(1);

        assert_eq!(completions.borrow()[0].status, InquiryStatus::TimerPopped);
        assert_eq!(coordinator.inquiry_history().count(), 1);
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let Harness { mut coordinator, completions, .. } = start_round();
        coordinator.cancel_inquiry();
        coordinator.start_inquiry(10, Box::new(|_| {}), Box::new(|_| {})).unwrap();

        coordinator.on_inquiry_timeout(1);

        assert!(coordinator.is_active());
        assert_eq!(completions.borrow().len(), 1);
    }

    #[test]
    fn test_device_reported_again_in_next_round() {
        // arrange
        let Harness { mut coordinator, .. } = start_round();
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));
        coordinator.cancel_inquiry();
        let count = Rc::new(RefCell::new(0));
        let seen = count.clone();
        coordinator
            .start_inquiry(10, Box::new(move |_| *seen.borrow_mut() += 1), Box::new(|_| {}))
            .unwrap();

        // act
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));

        // assert
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_results_sorted_at_completion() {
        let Harness { mut coordinator, .. } = start_round();
        coordinator.on_inquiry_result(InquiryResultKind::WithRssi, response(ADDRESS, -80));
        coordinator.on_inquiry_result(InquiryResultKind::WithRssi, response(ANOTHER_ADDRESS, -20));

        coordinator.on_inquiry_complete(ErrorCode::SUCCESS);
        coordinator.on_le_scan_complete();

        let order: Vec<_> = coordinator.inquiry_results().map(|r| r.bd_addr).collect();
        assert_eq!(order, vec![ANOTHER_ADDRESS, ADDRESS]);
    }

    #[test]
    fn test_le_results() {
        let Harness { mut coordinator, results, completions, .. } = start_round();

        coordinator.on_le_scan_result(LE_ADDRESS, -60, &[0x02, 0x01, 0x06]);
        coordinator.on_le_scan_result(LE_ADDRESS, -58, &[0x02, 0x01, 0x06]);
        coordinator.on_le_scan_result(LE_ADDRESS, -58, &[0x02, 0x01, 0x06, 0x03, 0x03, 0x0f]);
        coordinator.cancel_inquiry();

        assert_eq!(results.borrow().len(), 2);
        let stored = coordinator.read_inquiry_db(LE_ADDRESS.address).unwrap();
        assert_eq!(stored.device_type, DeviceType::BLE);
        assert_eq!(stored.ble_addr_type, AddressType::Random);
        assert_eq!(completions.borrow()[0].num_resp, 1);
    }

    #[test]
    fn test_clear_keeps_running_round() {
        let Harness { mut coordinator, .. } = start_round();
        coordinator.on_inquiry_result(InquiryResultKind::Standard, response(ADDRESS, 0));

        coordinator.clear_inquiry_db(None);
        assert!(coordinator.read_inquiry_db(ADDRESS).is_some());

        coordinator.cancel_inquiry();
        coordinator.clear_inquiry_db(Some(ADDRESS));
        assert!(coordinator.read_inquiry_db(ADDRESS).is_none());
    }

    #[test]
    fn test_stray_completion_ignored() {
        let controller = MockInquiryController::new();
        let mut coordinator = InquiryCoordinator::new(8, 16, 4, Box::new(controller));

        coordinator.on_inquiry_complete(ErrorCode::SUCCESS);

        assert_eq!(coordinator.inquiry_history().count(), 0);
    }
}
