// Typed event pipelines for one request kind

use crate::arguments::{EventArgument, JdiArgument};
use crate::event_manager::EventManager;
use crate::events::{EventData, EventType};
use crate::info::EventInfoFn;
use crate::pipeline::Pipeline;
use crate::types::RequestId;
use crate::unique_id;
use std::sync::Arc;
use tracing::debug;

pub type EventInfoPipeline<I> = Pipeline<(I, Vec<EventData>)>;

pub struct EventPipelineFactory<I> {
    event_type: EventType,
    event_manager: Arc<dyn EventManager>,
    new_event_info: EventInfoFn<I>,
}

impl<I: Send + Sync + 'static> EventPipelineFactory<I> {
    pub fn new(event_type: EventType, event_manager: Arc<dyn EventManager>, new_event_info: EventInfoFn<I>) -> Self {
        Self {
            event_type,
            event_manager,
            new_event_info,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Subscribe to events produced by `request_id`. Opens exactly one
    /// stream on the event manager; closing the returned pipeline closes it.
    pub fn new_event_pipeline(
        &self,
        request_id: &RequestId,
        event_arguments: Vec<EventArgument>,
        full_arguments: Vec<JdiArgument>,
    ) -> EventInfoPipeline<I> {
        let mut arguments = event_arguments;
        arguments.push(unique_id::event_filter(request_id));

        debug!("Opening {} pipeline for request {}", self.event_type, request_id);
        let stream = self.event_manager.add_event_data_stream(self.event_type, arguments);

        let new_event_info = self.new_event_info.clone();
        stream.filter_map(move |(event, data)| {
            new_event_info(event, &full_arguments).map(|info| (info, data.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_manager::StandardEventManager;
    use crate::events::{EventSet, NativeEvent, EventDetails};
    use crate::info::{EventInfoProducer, StandardEventInfoProducer, ThreadStartEventInfo};
    use crate::types::SuspendPolicy;
    use crate::unique_id::UNIQUE_ID_PROPERTY_KEY;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn thread_start_event(thread: u64, correlation: &str) -> NativeEvent {
        let mut event = NativeEvent::unrequested(EventDetails::ThreadStart { thread });
        event
            .request_properties
            .insert(UNIQUE_ID_PROPERTY_KEY.to_string(), correlation.to_string());
        event
    }

    #[test]
    fn test_pipeline_maps_only_matching_events_lazily() {
        let manager = Arc::new(StandardEventManager::new());
        let produced = Arc::new(AtomicUsize::new(0));

        let new_event_info: EventInfoFn<ThreadStartEventInfo> = {
            let produced = produced.clone();
            Arc::new(move |event: &NativeEvent, args: &[JdiArgument]| {
                produced.fetch_add(1, Ordering::SeqCst);
                StandardEventInfoProducer.new_thread_start_event_info(event, args)
            })
        };
        let factory = EventPipelineFactory::new(EventType::ThreadStart, manager.clone(), new_event_info);

        let id = RequestId::from("req");
        let pipeline = factory.new_event_pipeline(&id, vec![], vec![]);
        assert_eq!(manager.get_all_event_handler_info().len(), 1);

        // No consumer yet: nothing is materialised
        manager.process_event_set(&EventSet::new(SuspendPolicy::None, vec![thread_start_event(1, "req")]));
        assert_eq!(produced.load(Ordering::SeqCst), 0);

        let mut rx = pipeline.subscribe();
        manager.process_event_set(&EventSet::new(
            SuspendPolicy::None,
            vec![thread_start_event(2, "req"), thread_start_event(3, "unrelated")],
        ));

        assert_eq!(produced.load(Ordering::SeqCst), 1);
        let (info, data) = rx.try_recv().unwrap();
        assert_eq!(info.thread_id, 2);
        assert_eq!(info.request_id, Some(id));
        assert!(data.is_empty());
        assert!(rx.try_recv().is_err());

        pipeline.close();
        assert!(manager.get_all_event_handler_info().is_empty());
    }
}
