// Domain event infos
//
// Native events are turned into these by an EventInfoProducer as they flow
// through a pipeline. The producer runs once per delivered event.

use crate::arguments::JdiArgument;
use crate::events::{EventDetails, NativeEvent};
use crate::types::{Location, RequestId, ThreadId};
use crate::unique_id::UNIQUE_ID_PROPERTY_KEY;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Conversion from a native event to a domain info, as used by pipelines
pub type EventInfoFn<I> = Arc<dyn Fn(&NativeEvent, &[JdiArgument]) -> Option<I> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStartEventInfo {
    pub thread_id: ThreadId,
    pub request_id: Option<RequestId>,
    pub arguments: Vec<JdiArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDeathEventInfo {
    pub thread_id: ThreadId,
    pub request_id: Option<RequestId>,
    pub arguments: Vec<JdiArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointEventInfo {
    pub thread_id: ThreadId,
    pub location: Location,
    pub request_id: Option<RequestId>,
    pub arguments: Vec<JdiArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDeathEventInfo {
    pub request_id: Option<RequestId>,
    pub arguments: Vec<JdiArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDisconnectEventInfo {
    pub arguments: Vec<JdiArgument>,
}

/// Builds domain infos from native events. Each method returns None when
/// the event is not of the expected kind.
pub trait EventInfoProducer: Send + Sync {
    fn new_thread_start_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<ThreadStartEventInfo>;

    fn new_thread_death_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<ThreadDeathEventInfo>;

    fn new_breakpoint_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<BreakpointEventInfo>;

    fn new_vm_death_event_info(&self, event: &NativeEvent, arguments: &[JdiArgument]) -> Option<VmDeathEventInfo>;

    fn new_vm_disconnect_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<VmDisconnectEventInfo>;
}

fn correlation_id(event: &NativeEvent) -> Option<RequestId> {
    event.property(UNIQUE_ID_PROPERTY_KEY).map(RequestId::from)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEventInfoProducer;

impl EventInfoProducer for StandardEventInfoProducer {
    fn new_thread_start_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<ThreadStartEventInfo> {
        match event.details {
            EventDetails::ThreadStart { thread } => Some(ThreadStartEventInfo {
                thread_id: thread,
                request_id: correlation_id(event),
                arguments: arguments.to_vec(),
            }),
            _ => None,
        }
    }

    fn new_thread_death_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<ThreadDeathEventInfo> {
        match event.details {
            EventDetails::ThreadDeath { thread } => Some(ThreadDeathEventInfo {
                thread_id: thread,
                request_id: correlation_id(event),
                arguments: arguments.to_vec(),
            }),
            _ => None,
        }
    }

    fn new_breakpoint_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<BreakpointEventInfo> {
        match &event.details {
            EventDetails::Breakpoint { thread, location } => Some(BreakpointEventInfo {
                thread_id: *thread,
                location: location.clone(),
                request_id: correlation_id(event),
                arguments: arguments.to_vec(),
            }),
            _ => None,
        }
    }

    fn new_vm_death_event_info(&self, event: &NativeEvent, arguments: &[JdiArgument]) -> Option<VmDeathEventInfo> {
        match event.details {
            EventDetails::VmDeath => Some(VmDeathEventInfo {
                request_id: correlation_id(event),
                arguments: arguments.to_vec(),
            }),
            _ => None,
        }
    }

    fn new_vm_disconnect_event_info(
        &self,
        event: &NativeEvent,
        arguments: &[JdiArgument],
    ) -> Option<VmDisconnectEventInfo> {
        match event.details {
            EventDetails::VmDisconnect => Some(VmDisconnectEventInfo {
                arguments: arguments.to_vec(),
            }),
            _ => None,
        }
    }
}
