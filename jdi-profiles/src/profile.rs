// Debug profiles
//
// A profile is the user-facing entry point: one request helper per event
// kind, lookups against the attached virtual machine and the attach/detach
// hooks that drive pending replay.

use crate::arguments::{split_arguments, JdiArgument, RequestTarget};
use crate::config::ProfileConfig;
use crate::error::{JdiError, JdiResult};
use crate::event_manager::{EventHandlerInfo, EventManager};
use crate::events::{EventData, EventType, NativeEvent};
use crate::helper::RequestHelper;
use crate::info::{
    BreakpointEventInfo, EventInfoFn, EventInfoProducer, StandardEventInfoProducer, ThreadDeathEventInfo,
    ThreadStartEventInfo, VmDeathEventInfo, VmDisconnectEventInfo,
};
use crate::pipeline_factory::EventInfoPipeline;
use crate::store::{RequestRecord, RequestStore};
use crate::types::{ClassInfo, RequestId, ThreadId, ThreadInfo};
use crate::vm::{VirtualMachine, VirtualMachineSlot};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

#[async_trait]
pub trait DebugProfile: Send + Sync {
    fn name(&self) -> &str;

    fn thread_start_requests(&self) -> Arc<RequestHelper<ThreadStartEventInfo>>;

    fn thread_death_requests(&self) -> Arc<RequestHelper<ThreadDeathEventInfo>>;

    fn breakpoint_requests(&self) -> Arc<RequestHelper<BreakpointEventInfo>>;

    fn vm_death_requests(&self) -> Arc<RequestHelper<VmDeathEventInfo>>;

    /// Disconnect events need no request; this only opens a stream
    fn on_vm_disconnect(&self, arguments: Vec<JdiArgument>) -> EventInfoPipeline<VmDisconnectEventInfo>;

    async fn threads(&self) -> JdiResult<Vec<ThreadInfo>>;

    async fn classes(&self) -> JdiResult<Vec<ClassInfo>>;

    fn event_handlers(&self) -> Vec<EventHandlerInfo>;

    async fn thread(&self, thread_id: ThreadId) -> JdiResult<ThreadInfo> {
        self.threads()
            .await?
            .into_iter()
            .find(|t| t.thread_id == thread_id)
            .ok_or_else(|| JdiError::NotFound(format!("thread {:x}", thread_id)))
    }

    /// Look up a loaded class by dotted name, e.g. "com.example.MyClass"
    async fn class(&self, name: &str) -> JdiResult<ClassInfo> {
        self.classes()
            .await?
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| JdiError::NotFound(format!("class {}", name)))
    }

    async fn on_thread_start(
        &self,
        arguments: Vec<JdiArgument>,
    ) -> JdiResult<EventInfoPipeline<ThreadStartEventInfo>> {
        let helper = self.thread_start_requests();
        helper
            .get_or_create_request_with_data(RequestTarget::ThreadStart, arguments)
            .await
    }

    async fn on_thread_death(
        &self,
        arguments: Vec<JdiArgument>,
    ) -> JdiResult<EventInfoPipeline<ThreadDeathEventInfo>> {
        let helper = self.thread_death_requests();
        helper
            .get_or_create_request_with_data(RequestTarget::ThreadDeath, arguments)
            .await
    }

    async fn on_breakpoint(
        &self,
        file: &str,
        line: u32,
        arguments: Vec<JdiArgument>,
    ) -> JdiResult<EventInfoPipeline<BreakpointEventInfo>> {
        let helper = self.breakpoint_requests();
        let target = RequestTarget::Breakpoint {
            file: file.to_string(),
            line,
        };
        helper.get_or_create_request_with_data(target, arguments).await
    }

    async fn on_vm_death(&self, arguments: Vec<JdiArgument>) -> JdiResult<EventInfoPipeline<VmDeathEventInfo>> {
        let helper = self.vm_death_requests();
        helper
            .get_or_create_request_with_data(RequestTarget::VmDeath, arguments)
            .await
    }
}

/// Profile issuing requests straight to the attached virtual machine
pub struct PureDebugProfile {
    name: String,
    slot: Arc<VirtualMachineSlot>,
    event_manager: Arc<dyn EventManager>,
    info_producer: Arc<dyn EventInfoProducer>,
    thread_start: Arc<RequestHelper<ThreadStartEventInfo>>,
    thread_death: Arc<RequestHelper<ThreadDeathEventInfo>>,
    breakpoint: Arc<RequestHelper<BreakpointEventInfo>>,
    vm_death: Arc<RequestHelper<VmDeathEventInfo>>,
}

impl std::fmt::Debug for PureDebugProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PureDebugProfile")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .finish()
    }
}

fn new_helper<I: Send + Sync + 'static>(
    config: &ProfileConfig,
    event_type: EventType,
    slot: &Arc<VirtualMachineSlot>,
    event_manager: &Arc<dyn EventManager>,
    new_event_info: EventInfoFn<I>,
) -> Arc<RequestHelper<I>> {
    let helper = RequestHelper::new(
        event_type,
        Arc::new(RequestStore::new()),
        slot.clone(),
        event_manager.clone(),
        new_event_info,
    );

    if config.pending_requests {
        Arc::new(helper.with_pending_requests())
    } else {
        Arc::new(helper)
    }
}

impl PureDebugProfile {
    pub fn new(event_manager: Arc<dyn EventManager>) -> Self {
        Self::with_config(
            &ProfileConfig::default(),
            event_manager,
            Arc::new(StandardEventInfoProducer),
        )
    }

    pub fn with_config(
        config: &ProfileConfig,
        event_manager: Arc<dyn EventManager>,
        info_producer: Arc<dyn EventInfoProducer>,
    ) -> Self {
        let slot = Arc::new(VirtualMachineSlot::new());

        let producer = info_producer.clone();
        let thread_start = new_helper(
            config,
            EventType::ThreadStart,
            &slot,
            &event_manager,
            Arc::new(move |e: &NativeEvent, a: &[JdiArgument]| producer.new_thread_start_event_info(e, a)),
        );

        let producer = info_producer.clone();
        let thread_death = new_helper(
            config,
            EventType::ThreadDeath,
            &slot,
            &event_manager,
            Arc::new(move |e: &NativeEvent, a: &[JdiArgument]| producer.new_thread_death_event_info(e, a)),
        );

        let producer = info_producer.clone();
        let breakpoint = new_helper(
            config,
            EventType::Breakpoint,
            &slot,
            &event_manager,
            Arc::new(move |e: &NativeEvent, a: &[JdiArgument]| producer.new_breakpoint_event_info(e, a)),
        );

        let producer = info_producer.clone();
        let vm_death = new_helper(
            config,
            EventType::VmDeath,
            &slot,
            &event_manager,
            Arc::new(move |e: &NativeEvent, a: &[JdiArgument]| producer.new_vm_death_event_info(e, a)),
        );

        let profile = Self {
            name: config.name.clone(),
            slot,
            event_manager,
            info_producer,
            thread_start,
            thread_death,
            breakpoint,
            vm_death,
        };
        profile.detach_on_disconnect();
        profile
    }

    /// Drop active requests when the virtual machine reports a disconnect
    fn detach_on_disconnect(&self) {
        let slot = Arc::downgrade(&self.slot);
        let thread_start = Arc::downgrade(&self.thread_start);
        let thread_death = Arc::downgrade(&self.thread_death);
        let breakpoint = Arc::downgrade(&self.breakpoint);
        let vm_death = Arc::downgrade(&self.vm_death);

        self.event_manager.add_resuming_event_handler(
            EventType::VmDisconnect,
            Arc::new(move |_: &NativeEvent, _: &[EventData]| {
                if let Some(slot) = slot.upgrade() {
                    slot.detach();
                }
                detach_helper(&thread_start);
                detach_helper(&thread_death);
                detach_helper(&breakpoint);
                detach_helper(&vm_death);
            }),
            vec![],
        );
    }

    pub fn virtual_machine_slot(&self) -> Arc<VirtualMachineSlot> {
        self.slot.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.is_attached()
    }

    /// Attach a virtual machine and replay every pending request. Results
    /// come back per request; one failure does not stop the rest.
    pub async fn attach(&self, vm: Arc<dyn VirtualMachine>) -> Vec<JdiResult<RequestId>> {
        self.slot.attach(vm);

        let mut results = Vec::new();
        results.extend(self.thread_start.process_all_pending_requests().await);
        results.extend(self.thread_death.process_all_pending_requests().await);
        results.extend(self.breakpoint.process_all_pending_requests().await);
        results.extend(self.vm_death.process_all_pending_requests().await);

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Profile '{}' attached; replayed {} pending request(s), {} failed",
            self.name,
            results.len(),
            failed
        );
        results
    }

    /// Forget the virtual machine and every active request
    pub fn detach(&self) -> Vec<RequestRecord> {
        self.slot.detach();

        let mut removed = self.thread_start.detach();
        removed.extend(self.thread_death.detach());
        removed.extend(self.breakpoint.detach());
        removed.extend(self.vm_death.detach());
        removed
    }
}

fn detach_helper<I: Send + Sync + 'static>(helper: &Weak<RequestHelper<I>>) {
    if let Some(helper) = helper.upgrade() {
        helper.detach();
    }
}

#[async_trait]
impl DebugProfile for PureDebugProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn thread_start_requests(&self) -> Arc<RequestHelper<ThreadStartEventInfo>> {
        self.thread_start.clone()
    }

    fn thread_death_requests(&self) -> Arc<RequestHelper<ThreadDeathEventInfo>> {
        self.thread_death.clone()
    }

    fn breakpoint_requests(&self) -> Arc<RequestHelper<BreakpointEventInfo>> {
        self.breakpoint.clone()
    }

    fn vm_death_requests(&self) -> Arc<RequestHelper<VmDeathEventInfo>> {
        self.vm_death.clone()
    }

    fn on_vm_disconnect(&self, arguments: Vec<JdiArgument>) -> EventInfoPipeline<VmDisconnectEventInfo> {
        let (_, event_arguments) = split_arguments(&arguments);
        debug!("Opening vm_disconnect stream");

        let producer = self.info_producer.clone();
        self.event_manager
            .add_event_data_stream(EventType::VmDisconnect, event_arguments)
            .filter_map(move |(event, data)| {
                producer
                    .new_vm_disconnect_event_info(event, &arguments)
                    .map(|info| (info, data.clone()))
            })
    }

    async fn threads(&self) -> JdiResult<Vec<ThreadInfo>> {
        let vm = self.slot.get().ok_or(JdiError::VmNotAttached)?;
        Ok(vm.all_threads().await?)
    }

    async fn classes(&self) -> JdiResult<Vec<ClassInfo>> {
        let vm = self.slot.get().ok_or(JdiError::VmNotAttached)?;
        Ok(vm.all_classes().await?)
    }

    fn event_handlers(&self) -> Vec<EventHandlerInfo> {
        self.event_manager.get_all_event_handler_info()
    }
}
