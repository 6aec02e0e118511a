// Request helper
//
// Creates native event requests at most once per cache key and hands out
// event pipelines scoped to the resulting request.
//
// Per cache key a request moves through Absent -> Pending -> Active -> Removed.
// Pending only exists when pending support was enabled at construction and
// no virtual machine is attached.

use crate::arguments::{split_arguments, EventArgument, JdiArgument, RequestArgument, RequestArgumentSet, RequestTarget};
use crate::error::{JdiError, JdiResult};
use crate::event_manager::{EventHandlerInfo, EventManager};
use crate::events::EventType;
use crate::info::EventInfoFn;
use crate::pending::{PendingRequest, PendingRequestSupport};
use crate::pipeline_factory::{EventInfoPipeline, EventPipelineFactory};
use crate::store::{RequestRecord, RequestStore};
use crate::types::{NativeRequestId, RequestId};
use crate::unique_id;
use crate::vm::{AttachedVm, VirtualMachine, VirtualMachineSlot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct RequestHelper<I> {
    event_type: EventType,
    store: Arc<RequestStore>,
    slot: Arc<VirtualMachineSlot>,
    event_manager: Arc<dyn EventManager>,
    pipelines: EventPipelineFactory<I>,
    pending: Option<PendingRequestSupport>,
    open_pipelines: Mutex<HashMap<RequestId, Vec<EventInfoPipeline<I>>>>,
}

impl<I> std::fmt::Debug for RequestHelper<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHelper")
            .field("event_type", &self.event_type)
            .field("requests", &self.store.len())
            .field("pending_support", &self.pending.is_some())
            .finish()
    }
}

impl<I: Send + Sync + 'static> RequestHelper<I> {
    pub fn new(
        event_type: EventType,
        store: Arc<RequestStore>,
        slot: Arc<VirtualMachineSlot>,
        event_manager: Arc<dyn EventManager>,
        new_event_info: EventInfoFn<I>,
    ) -> Self {
        Self {
            event_type,
            store,
            slot,
            pipelines: EventPipelineFactory::new(event_type, event_manager.clone(), new_event_info),
            event_manager,
            pending: None,
            open_pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Queue requests made while detached instead of failing them
    pub fn with_pending_requests(mut self) -> Self {
        self.pending = Some(PendingRequestSupport::new());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn supports_pending_requests(&self) -> bool {
        self.pending.is_some()
    }

    pub fn new_request_id(&self) -> RequestId {
        RequestId::new_random()
    }

    fn open_pipelines(&self) -> MutexGuard<'_, HashMap<RequestId, Vec<EventInfoPipeline<I>>>> {
        self.open_pipelines.lock().unwrap_or_else(|poisoned| {
            warn!("open pipelines mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Return the id of the live request for these arguments, creating the
    /// native request only if no request with the same cache key exists.
    pub async fn get_or_create_request(
        &self,
        target: RequestTarget,
        arguments: Vec<RequestArgument>,
    ) -> JdiResult<RequestId> {
        let arguments = RequestArgumentSet::new(target, arguments);
        let key = arguments.cache_key();
        let _guard = self.store.lock_key(&key).await;

        if let Some(request_id) = self.store.request_id_for(&key) {
            debug!("Reusing request {} for {}", request_id, key.target);
            return Ok(request_id);
        }

        let request_id = self.new_request_id();
        loop {
            let created = match self.slot.current() {
                Some(attached) => self.submit(&attached, &request_id, &arguments).await?,
                None => self.enqueue_pending(&request_id, &arguments)?,
            };
            if created {
                return Ok(request_id);
            }
            debug!("Attachment changed while creating {}, retrying", request_id);
        }
    }

    /// Create or reuse the request and open a pipeline of its events
    pub async fn get_or_create_request_with_data(
        &self,
        target: RequestTarget,
        arguments: Vec<JdiArgument>,
    ) -> JdiResult<EventInfoPipeline<I>> {
        let (request_arguments, event_arguments) = split_arguments(&arguments);
        let request_id = self.get_or_create_request(target, request_arguments).await?;
        Ok(self.new_event_pipeline(&request_id, event_arguments, arguments))
    }

    /// Open a pipeline of events produced by `request_id`. The pipeline is
    /// closed when the request is removed.
    pub fn new_event_pipeline(
        &self,
        request_id: &RequestId,
        event_arguments: Vec<EventArgument>,
        full_arguments: Vec<JdiArgument>,
    ) -> EventInfoPipeline<I> {
        let pipeline = self
            .pipelines
            .new_event_pipeline(request_id, event_arguments, full_arguments);

        let mut open = self.open_pipelines();
        let entry = open.entry(request_id.clone()).or_default();
        entry.retain(|p| !p.is_closed());
        entry.push(pipeline.clone());

        pipeline
    }

    // Caller holds the cache key lock. Returns false, leaving nothing
    // behind, if the virtual machine was detached or replaced meanwhile.
    async fn submit(
        &self,
        attached: &AttachedVm,
        request_id: &RequestId,
        arguments: &RequestArgumentSet,
    ) -> JdiResult<bool> {
        let tagged = unique_id::tag(request_id, arguments.clone());

        let native_id = attached
            .vm
            .create_event_request(&tagged.target, &tagged.arguments)
            .await
            .map_err(|e| {
                warn!("Failed to create {} request: {}", tagged.target, e);
                JdiError::NativeSubmission(e)
            })?;

        let target = tagged.target.clone();
        if let Err(e) = self
            .store
            .new_request(RequestRecord::active(request_id.clone(), tagged, native_id))
        {
            retract(attached, native_id).await;
            return Err(e);
        }

        if !self.slot.is_current(attached.generation) {
            // Detach may already have dropped and closed it
            if self.store.take_request(request_id).is_some() {
                self.close_pipelines(request_id);
            }
            retract(attached, native_id).await;
            return Ok(false);
        }

        info!(
            "Created {} request {} (native id {})",
            target, request_id, native_id
        );
        Ok(true)
    }

    // Caller holds the cache key lock. Returns false, leaving nothing
    // behind, if a virtual machine attached meanwhile.
    fn enqueue_pending(&self, request_id: &RequestId, arguments: &RequestArgumentSet) -> JdiResult<bool> {
        let Some(pending) = &self.pending else {
            return Err(JdiError::VmNotAttached);
        };

        let tagged = unique_id::tag(request_id, arguments.clone());
        self.store
            .new_request(RequestRecord::pending(request_id.clone(), tagged.clone()))?;

        let request = PendingRequest {
            request_id: request_id.clone(),
            arguments: tagged,
        };
        match pending.enqueue_if_detached(&self.slot, request) {
            Ok(()) => Ok(true),
            Err(_) => {
                self.store.remove_request_by_id(request_id);
                Ok(false)
            }
        }
    }

    /// Submit one queued request. Returns `Ok(None)` if the request was
    /// removed while it waited. If no virtual machine is attached, or the
    /// one used goes away before the request is recorded active, the
    /// request goes back on the queue and `VmNotAttached` is returned.
    async fn activate_pending(&self, request: PendingRequest) -> JdiResult<Option<RequestId>> {
        let _guard = self.store.lock_key(&request.arguments.cache_key()).await;
        let request_id = request.request_id.clone();

        let Some(record) = self.store.retrieve_request_info(&request_id) else {
            debug!("Pending request {} was removed before replay", request_id);
            return Ok(None);
        };
        if !record.is_pending {
            return Ok(Some(request_id));
        }

        let tagged = unique_id::tag(&request_id, request.arguments.clone());
        loop {
            let Some(attached) = self.slot.current() else {
                if self.requeue(request.clone()) {
                    return Err(JdiError::VmNotAttached);
                }
                continue;
            };

            let native_id = match attached
                .vm
                .create_event_request(&tagged.target, &tagged.arguments)
                .await
            {
                Ok(native_id) => native_id,
                Err(e) => {
                    // Back to absent; subscribers of this id will never see events
                    self.store.take_request(&request_id);
                    self.close_pipelines(&request_id);
                    return Err(JdiError::NativeSubmission(e));
                }
            };

            self.store.mark_active(&request_id, native_id);
            if self.slot.is_current(attached.generation) {
                info!(
                    "Activated pending {} request {} (native id {})",
                    tagged.target, request_id, native_id
                );
                return Ok(Some(request_id));
            }

            retract(&attached, native_id).await;
            if !self.store.mark_pending(&request_id) {
                // Dropped along with the other active requests on detach
                return Err(JdiError::VmNotAttached);
            }
            debug!("Attachment changed while activating {}, retrying", request_id);
        }
    }

    // Returns false if a virtual machine attached before the request
    // could be queued
    fn requeue(&self, request: PendingRequest) -> bool {
        match &self.pending {
            Some(pending) => pending.enqueue_if_detached(&self.slot, request).is_ok(),
            None => true,
        }
    }

    /// Replay every queued request, oldest first. Called once a virtual
    /// machine attaches.
    pub async fn process_all_pending_requests(&self) -> Vec<JdiResult<RequestId>> {
        match &self.pending {
            Some(pending) => {
                pending
                    .process_all_pending_requests(|request| self.activate_pending(request))
                    .await
            }
            None => Vec::new(),
        }
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.pending
            .as_ref()
            .map(PendingRequestSupport::pending_requests)
            .unwrap_or_default()
    }

    pub fn has_request(&self, target: RequestTarget, arguments: Vec<RequestArgument>) -> bool {
        self.store
            .has_request(&RequestArgumentSet::new(target, arguments))
    }

    pub fn request_info(&self, request_id: &RequestId) -> Option<RequestRecord> {
        self.store.retrieve_request_info(request_id)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.store.records()
    }

    /// Handlers registered on the event manager for this helper's event type
    pub fn event_handlers(&self) -> Vec<EventHandlerInfo> {
        self.event_manager
            .get_handler_info_for_event_type(self.event_type)
    }

    fn close_pipelines(&self, request_id: &RequestId) {
        let pipelines = self.open_pipelines().remove(request_id).unwrap_or_default();
        for pipeline in pipelines {
            pipeline.close();
        }
    }

    /// Remove the request, retract its native counterpart and close its
    /// pipelines. Returns false if no such request exists.
    pub async fn remove_request_by_id(&self, request_id: &RequestId) -> JdiResult<bool> {
        let Some(record) = self.store.retrieve_request_info(request_id) else {
            return Ok(false);
        };

        let _guard = self.store.lock_key(&record.cache_key).await;
        let Some(record) = self.store.take_request(request_id) else {
            return Ok(false);
        };

        if let Some(pending) = &self.pending {
            pending.remove(request_id);
        }
        self.close_pipelines(request_id);

        if let (Some(native_id), Some(vm)) = (record.native_id, self.slot.get()) {
            vm.delete_event_request(native_id).await?;
        }

        info!("Removed {} request {}", record.cache_key.target, request_id);
        Ok(true)
    }

    pub async fn remove_request(&self, target: RequestTarget, arguments: Vec<RequestArgument>) -> JdiResult<bool> {
        let key = RequestArgumentSet::new(target, arguments).cache_key();
        match self.store.request_id_for(&key) {
            Some(request_id) => self.remove_request_by_id(&request_id).await,
            None => Ok(false),
        }
    }

    /// Remove every request. All removals are attempted; the first error is
    /// reported.
    pub async fn remove_all_requests(&self) -> JdiResult<usize> {
        let mut removed = 0;
        let mut first_error = None;

        for record in self.store.records() {
            match self.remove_request_by_id(&record.request_id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// The virtual machine went away: drop active requests and close their
    /// pipelines. Pending requests stay queued.
    pub fn detach(&self) -> Vec<RequestRecord> {
        let removed = self.store.remove_active();
        for record in &removed {
            self.close_pipelines(&record.request_id);
        }
        if !removed.is_empty() {
            info!("Dropped {} active {} request(s) on detach", removed.len(), self.event_type);
        }
        removed
    }
}

/// Best effort: the virtual machine may already be gone
async fn retract(attached: &AttachedVm, native_id: NativeRequestId) {
    if let Err(e) = attached.vm.delete_event_request(native_id).await {
        warn!("Failed to retract native request {}: {}", native_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmError;
    use crate::event_manager::StandardEventManager;
    use crate::events::{EventDetails, EventSet, NativeEvent};
    use crate::info::{EventInfoProducer, StandardEventInfoProducer, ThreadStartEventInfo};
    use crate::types::{ClassInfo, NativeRequestId, SuspendPolicy, ThreadInfo};
    use crate::vm::VirtualMachine;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicI32, Ordering};

    /// Records submissions and echoes request properties on emitted events
    #[derive(Default)]
    struct RecordingVm {
        next_id: AtomicI32,
        created: Mutex<BTreeMap<NativeRequestId, BTreeMap<String, String>>>,
        deleted: Mutex<Vec<NativeRequestId>>,
        reject: bool,
    }

    impl RecordingVm {
        fn thread_start(&self, native_id: NativeRequestId, thread: u64) -> NativeEvent {
            NativeEvent {
                request_id: Some(native_id),
                request_properties: self.created.lock().unwrap()[&native_id].clone(),
                details: EventDetails::ThreadStart { thread },
            }
        }
    }

    #[async_trait]
    impl VirtualMachine for RecordingVm {
        async fn all_threads(&self) -> Result<Vec<ThreadInfo>, VmError> {
            Ok(vec![])
        }

        async fn all_classes(&self) -> Result<Vec<ClassInfo>, VmError> {
            Ok(vec![])
        }

        async fn create_event_request(
            &self,
            _target: &RequestTarget,
            arguments: &[RequestArgument],
        ) -> Result<NativeRequestId, VmError> {
            if self.reject {
                return Err(VmError::Rejected("unsupported".to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let properties = arguments
                .iter()
                .filter_map(RequestArgument::as_property)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.created.lock().unwrap().insert(id, properties);
            Ok(id)
        }

        async fn delete_event_request(&self, native_id: NativeRequestId) -> Result<(), VmError> {
            self.deleted.lock().unwrap().push(native_id);
            Ok(())
        }

        async fn resume(&self) -> Result<(), VmError> {
            Ok(())
        }
    }

    fn helper(manager: Arc<StandardEventManager>, slot: Arc<VirtualMachineSlot>) -> RequestHelper<ThreadStartEventInfo> {
        RequestHelper::new(
            EventType::ThreadStart,
            Arc::new(RequestStore::new()),
            slot,
            manager,
            Arc::new(|event: &NativeEvent, args: &[JdiArgument]| {
                StandardEventInfoProducer.new_thread_start_event_info(event, args)
            }),
        )
    }

    #[tokio::test]
    async fn test_memoizes_by_cache_key() {
        let vm = Arc::new(RecordingVm::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm.clone());
        let helper = helper(Arc::new(StandardEventManager::new()), slot);

        let first = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![RequestArgument::CountFilter(1)])
            .await
            .unwrap();
        let second = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![RequestArgument::CountFilter(1)])
            .await
            .unwrap();
        let other = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![RequestArgument::CountFilter(2)])
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(vm.created.lock().unwrap().len(), 2);
        assert_eq!(helper.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_submission_failure_leaves_request_absent() {
        let vm = Arc::new(RecordingVm {
            reject: true,
            ..Default::default()
        });
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm);
        let helper = helper(Arc::new(StandardEventManager::new()), slot);

        let result = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![])
            .await;

        assert!(matches!(
            result,
            Err(JdiError::NativeSubmission(VmError::Rejected(_)))
        ));
        assert!(!helper.has_request(RequestTarget::ThreadStart, vec![]));
        assert!(helper.requests().is_empty());
    }

    #[tokio::test]
    async fn test_without_pending_support_requires_vm() {
        let helper = helper(
            Arc::new(StandardEventManager::new()),
            Arc::new(VirtualMachineSlot::new()),
        );
        assert!(!helper.supports_pending_requests());

        let result = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![])
            .await;
        assert!(matches!(result, Err(JdiError::VmNotAttached)));
        assert!(helper.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_receives_only_its_own_events() {
        let vm = Arc::new(RecordingVm::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm.clone());
        let manager = Arc::new(StandardEventManager::new());
        let helper = helper(manager.clone(), slot);

        let pipeline = helper
            .get_or_create_request_with_data(RequestTarget::ThreadStart, vec![])
            .await
            .unwrap();
        let mut rx = pipeline.subscribe();
        let request_id = helper.requests()[0].request_id.clone();

        // A second, unrelated thread start request
        helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![RequestArgument::ThreadFilter(9)])
            .await
            .unwrap();

        manager.process_event_set(&EventSet::new(
            SuspendPolicy::None,
            vec![vm.thread_start(1, 100), vm.thread_start(2, 200)],
        ));

        let (info, data) = rx.try_recv().unwrap();
        assert_eq!(info.thread_id, 100);
        assert_eq!(info.request_id, Some(request_id));
        assert!(data.is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(helper.event_handlers().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_retracts_native_request_and_closes_pipelines() {
        let vm = Arc::new(RecordingVm::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm.clone());
        let manager = Arc::new(StandardEventManager::new());
        let helper = helper(manager.clone(), slot);

        let pipeline = helper
            .get_or_create_request_with_data(RequestTarget::ThreadStart, vec![])
            .await
            .unwrap();
        let request_id = helper.requests()[0].request_id.clone();

        assert!(helper.remove_request_by_id(&request_id).await.unwrap());
        assert!(pipeline.is_closed());
        assert!(manager.get_all_event_handler_info().is_empty());
        assert_eq!(*vm.deleted.lock().unwrap(), vec![1]);
        assert!(!helper.remove_request_by_id(&request_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_detach_drops_active_requests() {
        let vm = Arc::new(RecordingVm::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm);
        let helper = helper(Arc::new(StandardEventManager::new()), slot.clone());

        let pipeline = helper
            .get_or_create_request_with_data(RequestTarget::ThreadStart, vec![])
            .await
            .unwrap();

        slot.detach();
        let dropped = helper.detach();

        assert_eq!(dropped.len(), 1);
        assert!(pipeline.is_closed());
        assert!(helper.requests().is_empty());
    }

    #[tokio::test]
    async fn test_request_removed_while_queued_is_skipped() {
        let slot = Arc::new(VirtualMachineSlot::new());
        let helper = helper(Arc::new(StandardEventManager::new()), slot.clone()).with_pending_requests();

        let request_id = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![])
            .await
            .unwrap();
        let queued = helper.pending_requests()[0].clone();
        assert!(helper.remove_request_by_id(&request_id).await.unwrap());

        let vm = Arc::new(RecordingVm::default());
        slot.attach(vm.clone());

        // An entry taken off the queue before its removal landed
        assert!(helper.activate_pending(queued).await.unwrap().is_none());
        assert!(vm.created.lock().unwrap().is_empty());
        assert!(helper.process_all_pending_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_replay_while_detached_keeps_request_queued() {
        let slot = Arc::new(VirtualMachineSlot::new());
        let helper = helper(Arc::new(StandardEventManager::new()), slot.clone()).with_pending_requests();

        let request_id = helper
            .get_or_create_request(RequestTarget::ThreadStart, vec![])
            .await
            .unwrap();

        let results = helper.process_all_pending_requests().await;
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(JdiError::PendingReplay { source, .. }) => {
                assert!(matches!(**source, JdiError::VmNotAttached));
            }
            other => panic!("expected replay failure, got {:?}", other),
        }
        assert_eq!(helper.pending_requests().len(), 1);
        assert!(helper.request_info(&request_id).unwrap().is_pending);

        let vm = Arc::new(RecordingVm::default());
        slot.attach(vm.clone());
        let results = helper.process_all_pending_requests().await;

        assert_eq!(results[0].as_ref().unwrap(), &request_id);
        assert!(!helper.request_info(&request_id).unwrap().is_pending);
        assert!(helper.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_key_locks_do_not_accumulate() {
        let vm = Arc::new(RecordingVm::default());
        let slot = Arc::new(VirtualMachineSlot::new());
        slot.attach(vm);
        let store = Arc::new(RequestStore::new());
        let helper = RequestHelper::new(
            EventType::ThreadStart,
            store.clone(),
            slot,
            Arc::new(StandardEventManager::new()),
            Arc::new(|event: &NativeEvent, args: &[JdiArgument]| {
                StandardEventInfoProducer.new_thread_start_event_info(event, args)
            }),
        );

        for count in 0..50 {
            let arguments = vec![RequestArgument::CountFilter(count)];
            helper
                .get_or_create_request(RequestTarget::ThreadStart, arguments.clone())
                .await
                .unwrap();
            helper
                .remove_request(RequestTarget::ThreadStart, arguments)
                .await
                .unwrap();
        }

        assert!(store.is_empty());
        assert_eq!(store.key_lock_count(), 0);
    }
}
