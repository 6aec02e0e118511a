// Event handler registry and dispatch
//
// Handlers are registered per event type with a list of event arguments.
// Dispatch evaluates the filters, collects requested data and calls every
// matching handler in registration order.

use crate::arguments::EventArgument;
use crate::events::{EventData, EventSet, EventType, NativeEvent};
use crate::pipeline::Pipeline;
use crate::unique_id::UNIQUE_ID_PROPERTY_KEY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, trace};

pub type HandlerId = u64;

/// Handler callback; the return value votes on resuming the virtual machine
pub type EventHandler = Arc<dyn Fn(&NativeEvent, &[EventData]) -> bool + Send + Sync>;

/// Raw stream of delivered events with their collected data
pub type EventDataStream = Pipeline<(NativeEvent, Vec<EventData>)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandlerInfo {
    pub handler_id: HandlerId,
    pub event_type: EventType,
    pub arguments: Vec<EventArgument>,
}

pub trait EventManager: Send + Sync {
    fn add_event_handler(
        &self,
        event_type: EventType,
        handler: EventHandler,
        arguments: Vec<EventArgument>,
    ) -> HandlerId;

    /// Register a handler that always lets the virtual machine resume
    fn add_resuming_event_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn Fn(&NativeEvent, &[EventData]) + Send + Sync>,
        arguments: Vec<EventArgument>,
    ) -> HandlerId {
        self.add_event_handler(
            event_type,
            Arc::new(move |event: &NativeEvent, data: &[EventData]| {
                handler(event, data);
                true
            }),
            arguments,
        )
    }

    /// Open a stream backed by one resuming handler; closing the stream
    /// removes the handler
    fn add_event_data_stream(&self, event_type: EventType, arguments: Vec<EventArgument>) -> EventDataStream;

    fn remove_event_handler(&self, handler_id: HandlerId) -> Option<EventHandlerInfo>;

    fn get_all_event_handler_info(&self) -> Vec<EventHandlerInfo>;

    fn get_handler_info_for_event_type(&self, event_type: EventType) -> Vec<EventHandlerInfo> {
        self.get_all_event_handler_info()
            .into_iter()
            .filter(|info| info.event_type == event_type)
            .collect()
    }

    /// Dispatch every event of the set. Returns true if the virtual machine
    /// should be resumed.
    fn process_event_set(&self, event_set: &EventSet) -> bool;
}

struct HandlerEntry {
    info: EventHandlerInfo,
    handler: EventHandler,
    matched: AtomicU64,
}

impl HandlerEntry {
    /// Apply filters and trigger counts; returns the data to deliver, if any
    fn accept(&self, event: &NativeEvent) -> Option<Vec<EventData>> {
        if !self.info.arguments.iter().all(|a| property_filter_matches(a, event)) {
            return None;
        }

        let count = self.matched.fetch_add(1, Ordering::SeqCst) + 1;
        for argument in &self.info.arguments {
            match argument {
                EventArgument::MinTriggerFilter(min) if count <= u64::from(*min) => return None,
                EventArgument::MaxTriggerFilter(max) if count > u64::from(*max) => return None,
                _ => {}
            }
        }

        Some(collect_data(&self.info.arguments, event))
    }
}

fn property_filter_matches(argument: &EventArgument, event: &NativeEvent) -> bool {
    match argument {
        EventArgument::UniqueIdPropertyFilter(id) => {
            event.property(UNIQUE_ID_PROPERTY_KEY) == Some(id.as_str())
        }
        EventArgument::CustomPropertyFilter { key, value } => event.property(key) == Some(value.as_str()),
        _ => true,
    }
}

fn collect_data(arguments: &[EventArgument], event: &NativeEvent) -> Vec<EventData> {
    arguments
        .iter()
        .filter_map(|argument| match argument {
            EventArgument::CustomPropertyData(key) => event.property(key).map(|value| EventData::CustomProperty {
                key: key.clone(),
                value: value.to_string(),
            }),
            _ => None,
        })
        .collect()
}

#[derive(Default)]
struct Handlers {
    entries: RwLock<BTreeMap<HandlerId, Arc<HandlerEntry>>>,
    next_id: AtomicU64,
}

impl Handlers {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<HandlerId, Arc<HandlerEntry>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<HandlerId, Arc<HandlerEntry>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, handler_id: HandlerId) -> Option<EventHandlerInfo> {
        let removed = self.write().remove(&handler_id).map(|entry| entry.info.clone());
        if removed.is_some() {
            debug!("Removed event handler {}", handler_id);
        }
        removed
    }
}

/// In-process event manager fed by the dispatch task
#[derive(Clone, Default)]
pub struct StandardEventManager {
    handlers: Arc<Handlers>,
}

impl StandardEventManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for StandardEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardEventManager")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl EventManager for StandardEventManager {
    fn add_event_handler(
        &self,
        event_type: EventType,
        handler: EventHandler,
        arguments: Vec<EventArgument>,
    ) -> HandlerId {
        let handler_id = self.handlers.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = HandlerEntry {
            info: EventHandlerInfo {
                handler_id,
                event_type,
                arguments,
            },
            handler,
            matched: AtomicU64::new(0),
        };

        debug!("Added {} event handler {}", event_type, handler_id);
        self.handlers.write().insert(handler_id, Arc::new(entry));
        handler_id
    }

    fn add_event_data_stream(&self, event_type: EventType, arguments: Vec<EventArgument>) -> EventDataStream {
        let stream = EventDataStream::new();

        let producer = stream.clone();
        let handler_id = self.add_resuming_event_handler(
            event_type,
            Arc::new(move |event: &NativeEvent, data: &[EventData]| {
                producer.process((event.clone(), data.to_vec()));
            }),
            arguments,
        );

        let handlers: Weak<Handlers> = Arc::downgrade(&self.handlers);
        stream.on_close(move || {
            if let Some(handlers) = handlers.upgrade() {
                handlers.remove(handler_id);
            }
        });

        stream
    }

    fn remove_event_handler(&self, handler_id: HandlerId) -> Option<EventHandlerInfo> {
        self.handlers.remove(handler_id)
    }

    fn get_all_event_handler_info(&self) -> Vec<EventHandlerInfo> {
        self.handlers.read().values().map(|entry| entry.info.clone()).collect()
    }

    fn process_event_set(&self, event_set: &EventSet) -> bool {
        let mut resume = true;

        for event in &event_set.events {
            let event_type = event.event_type();

            // Snapshot so handlers may register or remove handlers themselves
            let entries: Vec<Arc<HandlerEntry>> = self
                .handlers
                .read()
                .values()
                .filter(|entry| entry.info.event_type == event_type)
                .cloned()
                .collect();

            trace!("Dispatching {} event to {} handler(s)", event_type, entries.len());

            for entry in entries {
                if let Some(data) = entry.accept(event) {
                    resume &= (entry.handler)(event, &data);
                }
            }
        }

        resume
    }
}
