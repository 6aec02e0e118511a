// Event dispatch task
//
// Native event sets arrive on a bounded channel and are handed to the event
// manager one at a time. Consumers run on this task.

use crate::event_manager::EventManager;
use crate::events::EventSet;
use crate::vm::VirtualMachineSlot;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle for feeding the dispatch task
#[derive(Debug)]
pub struct EventDispatchHandle {
    event_tx: mpsc::Sender<EventSet>,
    task: JoinHandle<()>,
}

impl EventDispatchHandle {
    /// Queue an event set without waiting. Returns false if it was dropped.
    pub fn submit(&self, event_set: EventSet) -> bool {
        match self.event_tx.try_send(event_set) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event_set)) => {
                error!(
                    "Event channel full! Dropping event set with {} events",
                    event_set.events.len()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Event dispatch stopped, discarding event set");
                false
            }
        }
    }

    /// Queue an event set, waiting for room in the channel
    pub async fn send(&self, event_set: EventSet) -> bool {
        self.event_tx.send(event_set).await.is_ok()
    }

    /// Extra sender for a native event source
    pub fn sender(&self) -> mpsc::Sender<EventSet> {
        self.event_tx.clone()
    }

    /// Stop accepting events and wait until everything queued was dispatched.
    /// Senders handed out by `sender` keep the task alive until dropped.
    pub async fn shutdown(self) {
        drop(self.event_tx);
        if let Err(e) = self.task.await {
            error!("Event dispatch task failed: {}", e);
        }
    }
}

/// Start the dispatch task
pub fn spawn_event_dispatch(
    manager: Arc<dyn EventManager>,
    slot: Arc<VirtualMachineSlot>,
    buffer: usize,
) -> EventDispatchHandle {
    let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
    let task = tokio::spawn(event_dispatch_task(manager, slot, event_rx));

    EventDispatchHandle { event_tx, task }
}

async fn event_dispatch_task(
    manager: Arc<dyn EventManager>,
    slot: Arc<VirtualMachineSlot>,
    mut event_rx: mpsc::Receiver<EventSet>,
) {
    info!("Event dispatch started");

    while let Some(event_set) = event_rx.recv().await {
        debug!(
            "Dispatching event set: {} events, suspend_policy={:?}",
            event_set.events.len(),
            event_set.suspend_policy
        );

        let resume = manager.process_event_set(&event_set);
        if !resume || !event_set.suspends() {
            continue;
        }

        // Detached while dispatching (e.g. on disconnect): nothing to resume
        let Some(vm) = slot.get() else {
            continue;
        };
        if let Err(e) = vm.resume().await {
            warn!("Failed to resume virtual machine: {}", e);
        }
    }

    info!("Event dispatch shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::{RequestArgument, RequestTarget};
    use crate::error::VmError;
    use crate::event_manager::StandardEventManager;
    use crate::events::{EventData, EventDetails, EventType, NativeEvent};
    use crate::types::{ClassInfo, NativeRequestId, SuspendPolicy, ThreadInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ResumeCounter {
        resumes: AtomicUsize,
    }

    #[async_trait]
    impl crate::vm::VirtualMachine for ResumeCounter {
        async fn all_threads(&self) -> Result<Vec<ThreadInfo>, VmError> {
            Ok(vec![])
        }

        async fn all_classes(&self) -> Result<Vec<ClassInfo>, VmError> {
            Ok(vec![])
        }

        async fn create_event_request(
            &self,
            _target: &RequestTarget,
            _arguments: &[RequestArgument],
        ) -> Result<NativeRequestId, VmError> {
            Ok(1)
        }

        async fn delete_event_request(&self, _native_id: NativeRequestId) -> Result<(), VmError> {
            Ok(())
        }

        async fn resume(&self) -> Result<(), VmError> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn thread_start(policy: SuspendPolicy, thread: u64) -> EventSet {
        EventSet::new(
            policy,
            vec![NativeEvent::unrequested(EventDetails::ThreadStart { thread })],
        )
    }

    #[tokio::test]
    async fn test_dispatches_and_resumes_suspended_sets() {
        let manager = Arc::new(StandardEventManager::new());
        let stream = manager.add_event_data_stream(EventType::ThreadStart, vec![]);
        let mut rx = stream.subscribe();

        let vm = Arc::new(ResumeCounter::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm.clone());

        let handle = spawn_event_dispatch(manager, slot, 8);
        assert!(handle.submit(thread_start(SuspendPolicy::EventThread, 1)));
        assert!(handle.send(thread_start(SuspendPolicy::None, 2)).await);
        handle.shutdown().await;

        assert_eq!(rx.recv().await.unwrap().0.details.thread(), Some(1));
        assert_eq!(rx.recv().await.unwrap().0.details.thread(), Some(2));
        assert_eq!(vm.resumes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_veto_keeps_vm_suspended() {
        let manager = Arc::new(StandardEventManager::new());
        manager.add_event_handler(
            EventType::ThreadStart,
            Arc::new(|_: &NativeEvent, _: &[EventData]| false),
            vec![],
        );

        let vm = Arc::new(ResumeCounter::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm.clone());

        let handle = spawn_event_dispatch(manager, slot, 8);
        assert!(handle.submit(thread_start(SuspendPolicy::All, 1)));
        handle.shutdown().await;

        assert_eq!(vm.resumes.load(Ordering::SeqCst), 0);
    }
}
