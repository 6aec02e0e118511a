// Native event model
//
// Events arrive from the virtual machine in sets. Each event carries the
// properties of the request that produced it so handlers can correlate it.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of events a handler or stream can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    Breakpoint,
    ThreadStart,
    ThreadDeath,
    ClassPrepare,
    VmStart,
    VmDeath,
    VmDisconnect,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Breakpoint => "breakpoint",
            EventType::ThreadStart => "thread_start",
            EventType::ThreadDeath => "thread_death",
            EventType::ClassPrepare => "class_prepare",
            EventType::VmStart => "vm_start",
            EventType::VmDeath => "vm_death",
            EventType::VmDisconnect => "vm_disconnect",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventDetails {
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type: ReferenceTypeId,
        signature: String,
    },
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    VmDisconnect,
}

impl EventDetails {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDetails::Breakpoint { .. } => EventType::Breakpoint,
            EventDetails::ThreadStart { .. } => EventType::ThreadStart,
            EventDetails::ThreadDeath { .. } => EventType::ThreadDeath,
            EventDetails::ClassPrepare { .. } => EventType::ClassPrepare,
            EventDetails::VmStart { .. } => EventType::VmStart,
            EventDetails::VmDeath => EventType::VmDeath,
            EventDetails::VmDisconnect => EventType::VmDisconnect,
        }
    }

    /// Thread the event happened on, if it has one
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventDetails::Breakpoint { thread, .. }
            | EventDetails::ThreadStart { thread }
            | EventDetails::ThreadDeath { thread }
            | EventDetails::ClassPrepare { thread, .. }
            | EventDetails::VmStart { thread } => Some(*thread),
            EventDetails::VmDeath | EventDetails::VmDisconnect => None,
        }
    }
}

/// Single event as delivered by the virtual machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEvent {
    /// Id of the native request that produced this event, if any
    pub request_id: Option<NativeRequestId>,
    /// Properties attached to that request at creation time
    pub request_properties: BTreeMap<String, String>,
    pub details: EventDetails,
}

impl NativeEvent {
    /// Event not tied to any request (VM start, disconnect, ...)
    pub fn unrequested(details: EventDetails) -> Self {
        Self {
            request_id: None,
            request_properties: BTreeMap::new(),
            details,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.details.event_type()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.request_properties.get(key).map(String::as_str)
    }
}

/// Auxiliary data collected alongside a delivered event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    CustomProperty { key: String, value: String },
}

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    pub events: Vec<NativeEvent>,
}

impl EventSet {
    pub fn new(suspend_policy: SuspendPolicy, events: Vec<NativeEvent>) -> Self {
        Self {
            suspend_policy,
            events,
        }
    }

    /// True if delivering this set suspended anything in the debuggee
    pub fn suspends(&self) -> bool {
        self.suspend_policy != SuspendPolicy::None
    }
}
