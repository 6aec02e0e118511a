// Correlation ids
//
// The same id goes on the native request as a property and on the event
// stream as a filter, so events from unrelated requests of the same kind
// never reach the wrong subscriber.

use crate::arguments::{EventArgument, RequestArgument, RequestArgumentSet};
use crate::types::RequestId;

/// Property key the correlation id is stored under on native requests
pub const UNIQUE_ID_PROPERTY_KEY: &str = "jdi_profiles.unique_id";

/// Prepend the correlation id property to an argument set
pub fn tag(request_id: &RequestId, arguments: RequestArgumentSet) -> RequestArgumentSet {
    let RequestArgumentSet { target, arguments } = arguments;

    let mut tagged = Vec::with_capacity(arguments.len() + 1);
    tagged.push(RequestArgument::UniqueIdProperty(request_id.clone()));
    tagged.extend(arguments.into_iter().filter(|a| !a.is_unique_id()));

    RequestArgumentSet::new(target, tagged)
}

/// Event filter matching the property added by `tag`
pub fn event_filter(request_id: &RequestId) -> EventArgument {
    EventArgument::UniqueIdPropertyFilter(request_id.clone())
}
