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

//! The core event loop of the stack. All modules are owned by one thread,
//! and every HCI event and API call is serialized onto it.

use std::sync::Mutex;

use log::{debug, info, warn};
use tokio::{
    runtime::Builder,
    sync::{mpsc, oneshot},
    task::{spawn_local, LocalSet},
    time::sleep,
};

use crate::{
    connection::{
        acceptlist_manager::AcceptlistManager,
        controller::{AcceptlistController, AclController, OutboundTransport},
        table::ConnectionTable,
        AclLifecycleManager,
    },
    core::{address::AddressWithType, hci::ConnectionHandle},
    init_flags::{
        get_acceptlist_default_size, get_connection_history_size, get_device_record_capacity,
        get_inquiry_db_size, get_inquiry_filter_size, get_inquiry_history_size,
        get_resolving_list_default_size, stack_event_loop_is_enabled,
    },
    inquiry::{
        InquiryCompleteCallback, InquiryController, InquiryCoordinator, InquiryError,
        InquiryResultsCallback, INQUIRY_LENGTH_UNIT,
    },
    security::{
        pairing::{SecurityCollaborators, SecurityPairingEngine},
        store::DeviceRecordStore,
    },
};

pub mod connection;
pub mod core;
pub mod init_flags;
pub mod inquiry;
pub mod logging;
pub mod security;
pub mod utils;

/// Everything below and beside the stack core
pub struct StackCollaborators {
    /// ACL commands
    pub acl_controller: Box<dyn AclController>,
    /// The controller's filter accept list and resolving list
    pub acceptlist_controller: Box<dyn AcceptlistController>,
    /// Polls connections for outbound data
    pub outbound: Box<dyn OutboundTransport>,
    /// Discovery commands
    pub inquiry_controller: Box<dyn InquiryController>,
    /// Collaborators of the pairing engine
    pub security: SecurityCollaborators,
}

/// The modules living on the stack thread
pub struct StackModules {
    /// Connections, accept list and security
    pub acl: AclLifecycleManager,
    /// Device discovery
    pub inquiry: InquiryCoordinator,
    task_tx: StackThreadTx,
}

impl StackModules {
    /// Build the modules, sized from the runtime flags, and restore the
    /// bonded devices. `task_tx` posts back into the stack thread.
    pub fn new(collaborators: StackCollaborators, task_tx: StackThreadTx) -> Self {
        let StackCollaborators {
            acl_controller,
            acceptlist_controller,
            outbound,
            inquiry_controller,
            security,
        } = collaborators;

        let store = DeviceRecordStore::new(get_device_record_capacity());
        let mut security = SecurityPairingEngine::new(store, security);
        let restored = security.restore_paired_devices();
        info!("Restored {restored} bonded devices");

        let acl = AclLifecycleManager::new(
            ConnectionTable::new(get_connection_history_size(), None, outbound),
            AcceptlistManager::new(
                get_acceptlist_default_size(),
                get_resolving_list_default_size(),
                acceptlist_controller,
            ),
            security,
            acl_controller,
        );
        let inquiry = InquiryCoordinator::new(
            get_inquiry_db_size(),
            get_inquiry_filter_size(),
            get_inquiry_history_size(),
            inquiry_controller,
        );
        Self { acl, inquiry, task_tx }
    }

    /// Start device discovery. If the controller has not completed the
    /// round one inquiry unit after `duration`, it ends as `TimerPopped`.
    /// Must be called from within the stack thread's `LocalSet`.
    pub fn start_discovery(
        &mut self,
        duration: u8,
        results_callback: InquiryResultsCallback,
        complete_callback: InquiryCompleteCallback,
    ) -> Result<u32, InquiryError> {
        let round = self.inquiry.start_inquiry(duration, results_callback, complete_callback)?;
        let tx = self.task_tx.clone();
        let timeout = INQUIRY_LENGTH_UNIT * (u32::from(duration) + 1);
        spawn_local(async move {
            sleep(timeout).await;
            let timeout_task: BoxedStackThreadCallback =
                Box::new(move |modules| modules.inquiry.on_inquiry_timeout(round));
            if tx.send(timeout_task).is_err() {
                debug!("Stack thread stopped before discovery round {round} timed out");
            }
        });
        Ok(round)
    }
}

/// The owner of the stack thread
pub struct StackRegistry {
    task_tx: StackThreadTx,
}

static STACK_REGISTRY: Mutex<Option<StackRegistry>> = Mutex::new(None);

impl StackRegistry {
    /// Start the stack modules and run the event loop on the calling thread,
    /// which becomes the stack thread for the lifetime of the process.
    pub fn start(collaborators: StackCollaborators) {
        info!("Starting stack modules");
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start tokio runtime");
        let local = LocalSet::new();

        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedStackThreadCallback>();
        let prev_registry =
            STACK_REGISTRY.lock().unwrap().replace(Self { task_tx: tx.clone() });

        // initialization should only happen once
        assert!(prev_registry.is_none());

        local.block_on(&rt, async move {
            let mut modules = StackModules::new(collaborators, tx);

            info!("Starting stack event loop");
            while let Some(f) = rx.recv().await {
                f(&mut modules)
            }
        });
        warn!("Stack thread queue has stopped, shutting down executor thread");
    }

    /// True once `start` has been called
    pub fn is_started() -> bool {
        STACK_REGISTRY.lock().unwrap().is_some()
    }
}

/// Work posted into the stack thread
pub type BoxedStackThreadCallback = Box<dyn FnOnce(&mut StackModules) + Send + 'static>;

/// Posts work into the stack thread
pub type StackThreadTx = mpsc::UnboundedSender<BoxedStackThreadCallback>;

thread_local! {
    /// The TX end of a channel into the stack thread, lazily cloned on first
    /// use from each client thread
    static STACK_THREAD_TX: StackThreadTx =
        STACK_REGISTRY.lock().unwrap().as_ref().expect("stack not initialized").task_tx.clone();
}

/// Posts a callback to the stack thread and gives it access to the modules.
///
/// Do not call this from the stack thread itself: modules receive what they
/// depend on at startup.
pub fn do_in_stack_thread<F>(f: F)
where
    F: FnOnce(&mut StackModules) + Send + 'static,
{
    if !stack_event_loop_is_enabled() {
        warn!("ignoring do_in_stack_thread() invocation since the stack loop is inactive");
        return;
    }
    let ret = STACK_THREAD_TX.with(|tx| tx.send(Box::new(f)));
    if ret.is_err() {
        panic!("Stack thread call failed");
    }
}

/// Runs `f` on the stack thread and blocks the caller until it returns.
/// For low-frequency control-plane queries only. Returns None if the stack
/// loop is inactive.
pub fn query_stack_thread<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&mut StackModules) -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    do_in_stack_thread(move |modules| {
        tx.send(f(modules)).ok();
    });
    rx.blocking_recv().ok()
}

/// Async variant of `query_stack_thread`, for callers running their own
/// runtime
pub async fn query_stack_thread_async<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&mut StackModules) -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    do_in_stack_thread(move |modules| {
        tx.send(f(modules)).ok();
    });
    rx.await.ok()
}

/// Our address on an LE link, queried from any thread but the stack thread
pub fn get_local_address(handle: ConnectionHandle) -> Option<AddressWithType> {
    query_stack_thread(move |modules| modules.acl.get_local_address(handle)).flatten()
}
