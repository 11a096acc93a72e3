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

//! Helpers for driving single-threaded async code in tests, with time paused
//! so stack timers fire as soon as nothing else can run.

use std::{future::Future, time::Duration};

use tokio::{
    runtime::Builder,
    select,
    task::{spawn_local, LocalSet},
};

/// Longer than any timer the stack arms
const STUCK_TEST_TIMEOUT: Duration = Duration::from_secs(100000);

/// Shorter than any timer the stack arms
const IMMEDIATE_TIMEOUT: Duration = Duration::from_millis(10);

/// Run the future to completion on a paused, single-threaded runtime with a
/// `LocalSet`, so it may spawn `!Send` tasks such as the discovery timer
pub fn block_on_locally<T>(f: impl Future<Output = T>) -> T {
    let rt = Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build test runtime");
    LocalSet::new().block_on(&rt, async move {
        select! {
            t = f => t,
            _ = tokio::time::sleep(STUCK_TEST_TIMEOUT) => {
                panic!("test appears to be stuck");
            },
        }
    })
}

/// Spawn the future and report whether it resolves before any stack timer
/// could fire. Returns Ok(T) if it did, otherwise a future for the rest of
/// its run; dropping that future does not cancel the task.
///
/// Only meaningful while time is paused.
pub async fn try_await<T: 'static>(
    f: impl Future<Output = T> + 'static,
) -> Result<T, impl Future<Output = T>> {
    let mut handle = spawn_local(f);

    select! {
        t = &mut handle => Ok(t.expect("task panicked")),
        _ = tokio::time::sleep(IMMEDIATE_TIMEOUT) => {
            Err(async { handle.await.expect("task panicked") })
        },
    }
}
