// Debug profiles for Java virtual machines
//
// Manages the lifecycle of event requests issued to a debuggee:
// - Request deduplication keyed by argument signature
// - Correlation ids tying native events back to their request
// - Event pipelines that consumers subscribe to
// - Pending requests replayed once a virtual machine attaches

pub mod arguments;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_manager;
pub mod events;
pub mod helper;
pub mod info;
pub mod pending;
pub mod pipeline;
pub mod pipeline_factory;
pub mod profile;
pub mod registry;
pub mod store;
pub mod types;
pub mod unique_id;
pub mod vm;

pub use arguments::{EventArgument, JdiArgument, RequestArgument, RequestArgumentSet, RequestTarget};
pub use config::ProfileConfig;
pub use error::{JdiError, JdiResult, VmError};
pub use event_manager::{EventManager, StandardEventManager};
pub use helper::RequestHelper;
pub use pipeline::Pipeline;
pub use profile::{DebugProfile, PureDebugProfile};
pub use registry::{ProfileRegistry, SwappableDebugProfile};
pub use types::{RequestId, SuspendPolicy};
pub use vm::{AttachedVm, VirtualMachine, VirtualMachineSlot};
