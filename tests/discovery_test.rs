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

use std::{cell::RefCell, rc::Rc};

use bt_stack_core::{
    core::address::RawAddress,
    inquiry::{
        database::InquiryResults, mocks::InquiryCommand, InquiryCompleteInfo, InquiryResponse,
        InquiryResultKind, InquiryStatus,
    },
    utils::task::{block_on_locally, try_await},
    BoxedStackThreadCallback, StackModules,
};
use tokio::sync::{mpsc, oneshot};

mod utils;
use utils::MockLayers;

const PEER: RawAddress = RawAddress([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13]);

fn response() -> InquiryResponse {
    InquiryResponse {
        address: PEER,
        page_scan_rep_mode: 1,
        dev_class: [0x24, 0x04, 0x04],
        clock_offset: 0x1234,
        rssi: -60,
        eir: vec![],
    }
}

#[test]
fn test_discovery_times_out_without_controller_completion() {
    block_on_locally(async {
        // arrange
        let layers = MockLayers::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedStackThreadCallback>();
        let mut modules = StackModules::new(layers.collaborators(), tx);
        let results = Rc::new(RefCell::new(vec![]));
        let sink = results.clone();
        let (done_tx, done_rx) = oneshot::channel::<InquiryCompleteInfo>();

        // act
        let round = modules
            .start_discovery(
                2,
                Box::new(move |result: &InquiryResults| sink.borrow_mut().push(result.bd_addr)),
                Box::new(move |info| {
                    done_tx.send(info).ok();
                }),
            )
            .unwrap();
        modules.inquiry.on_inquiry_result(InquiryResultKind::WithRssi, response());

        // the controller never completes, so the stack timer fires
        let timeout_task = rx.recv().await.unwrap();
        timeout_task(&mut modules);

        // assert
        let info = try_await(done_rx).await.ok().unwrap().unwrap();
        assert_eq!(info.status, InquiryStatus::TimerPopped);
        assert_eq!(info.num_resp, 1);
        assert_eq!(info.resp_type[InquiryResultKind::WithRssi as usize], 1);
        assert_eq!(results.borrow().as_slice(), [PEER]);
        assert!(!modules.inquiry.is_active());
        assert_eq!(
            layers.inquiry.take_commands(),
            vec![
                InquiryCommand::StartLeScan,
                InquiryCommand::StartInquiry(2),
                InquiryCommand::CancelInquiry,
                InquiryCommand::StopLeScan,
            ]
        );
        assert!(modules.inquiry.inquiry_history().any(|past| past.num_resp == 1));
        assert_ne!(round, 0);
    });
}

#[test]
fn test_stale_discovery_timeout_is_ignored() {
    block_on_locally(async {
        // arrange
        let layers = MockLayers::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedStackThreadCallback>();
        let mut modules = StackModules::new(layers.collaborators(), tx);
        let statuses = Rc::new(RefCell::new(vec![]));
        let first = statuses.clone();
        let second = statuses.clone();

        modules
            .start_discovery(
                1,
                Box::new(|_| {}),
                Box::new(move |info| first.borrow_mut().push(info.status)),
            )
            .unwrap();
        assert!(modules.inquiry.cancel_inquiry());
        modules
            .start_discovery(
                4,
                Box::new(|_| {}),
                Box::new(move |info| second.borrow_mut().push(info.status)),
            )
            .unwrap();

        // act: the first round's timer fires while the second round runs
        let stale_timeout = rx.recv().await.unwrap();
        stale_timeout(&mut modules);

        // assert
        assert!(modules.inquiry.is_active());
        assert_eq!(statuses.borrow().as_slice(), [InquiryStatus::Canceled]);
    });
}
