// Shared test fixtures
//
// FakeVirtualMachine stands in for a debuggee: it hands out native ids,
// remembers request properties and echoes them on the events it builds.

#![allow(dead_code)]

use async_trait::async_trait;
use jdi_profiles::events::{EventDetails, NativeEvent};
use jdi_profiles::types::{ClassInfo, NativeRequestId, ThreadInfo, ThreadStatus};
use jdi_profiles::{RequestArgument, RequestTarget, VirtualMachine, VmError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub native_id: NativeRequestId,
    pub target: RequestTarget,
    pub properties: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeVirtualMachine {
    next_id: AtomicI32,
    pub threads: Vec<ThreadInfo>,
    pub classes: Vec<ClassInfo>,
    submissions: Mutex<Vec<Submission>>,
    deleted: Mutex<Vec<NativeRequestId>>,
    /// Requests carrying one of these property values are rejected
    rejected_values: Mutex<Vec<String>>,
}

impl FakeVirtualMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(threads: &[(u64, &str)]) -> Self {
        Self {
            threads: threads
                .iter()
                .map(|(id, name)| ThreadInfo {
                    thread_id: *id,
                    name: name.to_string(),
                    status: ThreadStatus::Running,
                    suspended: false,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_classes(classes: Vec<ClassInfo>) -> Self {
        Self {
            classes,
            ..Default::default()
        }
    }

    pub fn reject_property_value(&self, value: &str) {
        self.rejected_values.lock().unwrap().push(value.to_string());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<NativeRequestId> {
        self.deleted.lock().unwrap().clone()
    }

    /// Event produced by the request with `native_id`
    pub fn event(&self, native_id: NativeRequestId, details: EventDetails) -> NativeEvent {
        let properties = self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.native_id == native_id)
            .map(|s| s.properties.clone())
            .unwrap_or_default();

        NativeEvent {
            request_id: Some(native_id),
            request_properties: properties,
            details,
        }
    }
}

#[async_trait]
impl VirtualMachine for FakeVirtualMachine {
    async fn all_threads(&self) -> Result<Vec<ThreadInfo>, VmError> {
        Ok(self.threads.clone())
    }

    async fn all_classes(&self) -> Result<Vec<ClassInfo>, VmError> {
        Ok(self.classes.clone())
    }

    async fn create_event_request(
        &self,
        target: &RequestTarget,
        arguments: &[RequestArgument],
    ) -> Result<NativeRequestId, VmError> {
        // Let concurrent callers interleave
        tokio::task::yield_now().await;

        let properties: BTreeMap<String, String> = arguments
            .iter()
            .filter_map(RequestArgument::as_property)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let rejected = self.rejected_values.lock().unwrap();
        if properties.values().any(|v| rejected.contains(v)) {
            return Err(VmError::Rejected(format!("{} not allowed", target)));
        }
        drop(rejected);

        let native_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.submissions.lock().unwrap().push(Submission {
            native_id,
            target: target.clone(),
            properties,
        });
        Ok(native_id)
    }

    async fn delete_event_request(&self, native_id: NativeRequestId) -> Result<(), VmError> {
        self.deleted.lock().unwrap().push(native_id);
        Ok(())
    }

    async fn resume(&self) -> Result<(), VmError> {
        Ok(())
    }
}

/// Holds every `create_event_request` until released, so tests can detach
/// or attach while a submission is in flight
pub struct GatedVirtualMachine {
    pub inner: Arc<FakeVirtualMachine>,
    entered: Notify,
    release: Notify,
}

impl GatedVirtualMachine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeVirtualMachine::new()),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until a submission is blocked in the virtual machine
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one blocked submission through
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl VirtualMachine for GatedVirtualMachine {
    async fn all_threads(&self) -> Result<Vec<ThreadInfo>, VmError> {
        self.inner.all_threads().await
    }

    async fn all_classes(&self) -> Result<Vec<ClassInfo>, VmError> {
        self.inner.all_classes().await
    }

    async fn create_event_request(
        &self,
        target: &RequestTarget,
        arguments: &[RequestArgument],
    ) -> Result<NativeRequestId, VmError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_event_request(target, arguments).await
    }

    async fn delete_event_request(&self, native_id: NativeRequestId) -> Result<(), VmError> {
        self.inner.delete_event_request(native_id).await
    }

    async fn resume(&self) -> Result<(), VmError> {
        self.inner.resume().await
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
