// Pending requests
//
// Requests made while no virtual machine is attached wait here and are
// replayed, oldest first, when one attaches.

use crate::arguments::RequestArgumentSet;
use crate::error::{JdiError, JdiResult};
use crate::types::RequestId;
use crate::vm::VirtualMachineSlot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub arguments: RequestArgumentSet,
}

#[derive(Debug, Default)]
pub struct PendingRequestSupport {
    queue: Mutex<VecDeque<PendingRequest>>,
}

impl PendingRequestSupport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            warn!("pending request queue mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Queued requests in replay order
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.queue().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Queue `request` unless a virtual machine is attached, in which case
    /// it is handed back. Attachment is checked under the queue lock so a
    /// request cannot be queued after the replay drained the queue.
    pub fn enqueue_if_detached(
        &self,
        slot: &VirtualMachineSlot,
        request: PendingRequest,
    ) -> Result<(), PendingRequest> {
        let mut queue = self.queue();
        if slot.is_attached() {
            return Err(request);
        }

        info!(
            "Queued pending request {} for {}",
            request.request_id, request.arguments.target
        );
        queue.push_back(request);
        Ok(())
    }

    pub fn remove(&self, request_id: &RequestId) -> bool {
        let mut queue = self.queue();
        let before = queue.len();
        queue.retain(|p| &p.request_id != request_id);
        queue.len() != before
    }

    /// Drain the queue and submit every entry in order. A failing entry is
    /// reported as `PendingReplay` and does not stop the others. Entries the
    /// submitter skips (`Ok(None)`) are left out of the results.
    pub async fn process_all_pending_requests<F, Fut>(&self, mut submit: F) -> Vec<JdiResult<RequestId>>
    where
        F: FnMut(PendingRequest) -> Fut,
        Fut: Future<Output = JdiResult<Option<RequestId>>>,
    {
        let drained: Vec<PendingRequest> = self.queue().drain(..).collect();
        if !drained.is_empty() {
            info!("Replaying {} pending request(s)", drained.len());
        }

        let mut results = Vec::with_capacity(drained.len());
        for request in drained {
            let request_id = request.request_id.clone();
            match submit(request).await {
                Ok(Some(activated)) => results.push(Ok(activated)),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Pending request {} failed on replay (retryable={}): {}",
                        request_id,
                        e.is_retryable(),
                        e
                    );
                    results.push(Err(JdiError::PendingReplay {
                        request_id,
                        source: Box::new(e),
                    }));
                }
            }
        }

        results
    }
}
