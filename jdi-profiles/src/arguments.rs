// Request and event arguments
//
// Request arguments shape the native request itself. Event arguments only
// affect which delivered events reach a stream and what data comes along.

use crate::events::EventType;
use crate::types::{ObjectId, RequestId, SuspendPolicy, ThreadId};
use crate::unique_id::UNIQUE_ID_PROPERTY_KEY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestArgument {
    Property { key: String, value: String },
    UniqueIdProperty(RequestId),
    SuspendPolicy(SuspendPolicy),
    CountFilter(i32),
    ThreadFilter(ThreadId),
    ClassInclusionFilter(String),
    ClassExclusionFilter(String),
    InstanceFilter(ObjectId),
    Enabled(bool),
}

impl RequestArgument {
    pub fn property(key: impl Into<String>, value: impl Into<String>) -> Self {
        RequestArgument::Property {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key/value pair this argument stores on the native request, if any
    pub fn as_property(&self) -> Option<(&str, &str)> {
        match self {
            RequestArgument::Property { key, value } => Some((key, value)),
            RequestArgument::UniqueIdProperty(id) => Some((UNIQUE_ID_PROPERTY_KEY, id.as_str())),
            _ => None,
        }
    }

    pub fn is_unique_id(&self) -> bool {
        matches!(self, RequestArgument::UniqueIdProperty(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventArgument {
    /// Only events whose request carries this correlation id
    UniqueIdPropertyFilter(RequestId),
    /// Only events whose request carries this property
    CustomPropertyFilter { key: String, value: String },
    /// Skip matching events until more than this many have been seen
    MinTriggerFilter(u32),
    /// Stop delivering after this many matching events
    MaxTriggerFilter(u32),
    /// Attach the value of this request property to every delivered event
    CustomPropertyData(String),
}

/// Either kind of argument, as accepted by the profile entry points
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JdiArgument {
    Request(RequestArgument),
    Event(EventArgument),
}

impl From<RequestArgument> for JdiArgument {
    fn from(value: RequestArgument) -> Self {
        JdiArgument::Request(value)
    }
}

impl From<EventArgument> for JdiArgument {
    fn from(value: EventArgument) -> Self {
        JdiArgument::Event(value)
    }
}

/// Separate mixed arguments into request and event arguments, keeping order
pub fn split_arguments(arguments: &[JdiArgument]) -> (Vec<RequestArgument>, Vec<EventArgument>) {
    let mut request_arguments = Vec::new();
    let mut event_arguments = Vec::new();

    for argument in arguments {
        match argument {
            JdiArgument::Request(a) => request_arguments.push(a.clone()),
            JdiArgument::Event(a) => event_arguments.push(a.clone()),
        }
    }

    (request_arguments, event_arguments)
}

/// What a request is for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTarget {
    ThreadStart,
    ThreadDeath,
    VmDeath,
    Breakpoint { file: String, line: u32 },
}

impl RequestTarget {
    pub fn event_type(&self) -> EventType {
        match self {
            RequestTarget::ThreadStart => EventType::ThreadStart,
            RequestTarget::ThreadDeath => EventType::ThreadDeath,
            RequestTarget::VmDeath => EventType::VmDeath,
            RequestTarget::Breakpoint { .. } => EventType::Breakpoint,
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestTarget::Breakpoint { file, line } => write!(f, "breakpoint {}:{}", file, line),
            other => write!(f, "{}", other.event_type()),
        }
    }
}

/// Arguments for one native request, as they will be submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestArgumentSet {
    pub target: RequestTarget,
    pub arguments: Vec<RequestArgument>,
}

/// Deduplication key: the target plus every argument except the correlation id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub target: RequestTarget,
    pub arguments: Vec<RequestArgument>,
}

impl RequestArgumentSet {
    pub fn new(target: RequestTarget, arguments: Vec<RequestArgument>) -> Self {
        Self { target, arguments }
    }

    pub fn cache_key(&self) -> RequestKey {
        RequestKey {
            target: self.target.clone(),
            arguments: self
                .arguments
                .iter()
                .filter(|a| !a.is_unique_id())
                .cloned()
                .collect(),
        }
    }

    /// Correlation id injected into this set, if it has been tagged
    pub fn unique_id(&self) -> Option<&RequestId> {
        self.arguments.iter().find_map(|a| match a {
            RequestArgument::UniqueIdProperty(id) => Some(id),
            _ => None,
        })
    }

    /// Properties to store on the native request
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.arguments
            .iter()
            .filter_map(RequestArgument::as_property)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
