// Profile registry
//
// Named profiles plus a swappable front that delegates to whichever one is
// currently selected.

use crate::arguments::JdiArgument;
use crate::error::{JdiError, JdiResult};
use crate::event_manager::EventHandlerInfo;
use crate::helper::RequestHelper;
use crate::info::{
    BreakpointEventInfo, ThreadDeathEventInfo, ThreadStartEventInfo, VmDeathEventInfo, VmDisconnectEventInfo,
};
use crate::pipeline_factory::EventInfoPipeline;
use crate::profile::DebugProfile;
use crate::types::{ClassInfo, ThreadId, ThreadInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Default)]
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<String, Arc<dyn DebugProfile>>>,
}

impl std::fmt::Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("profiles", &self.names())
            .finish()
    }
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the profile's own name, replacing any previous entry
    pub fn register(&self, profile: Arc<dyn DebugProfile>) -> Option<Arc<dyn DebugProfile>> {
        let name = profile.name().to_string();
        debug!("Registered profile '{}'", name);
        self.profiles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, profile)
    }

    pub fn retrieve(&self, name: &str) -> JdiResult<Arc<dyn DebugProfile>> {
        self.profiles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| JdiError::ProfileNotFound(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn DebugProfile>> {
        self.profiles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .profiles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Profile front whose underlying profile can be switched at runtime.
/// Requests already made stay with the profile that created them.
pub struct SwappableDebugProfile {
    registry: Arc<ProfileRegistry>,
    current: RwLock<Arc<dyn DebugProfile>>,
}

impl std::fmt::Debug for SwappableDebugProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwappableDebugProfile")
            .field("current", &self.current_profile().name())
            .finish()
    }
}

impl SwappableDebugProfile {
    pub fn new(registry: Arc<ProfileRegistry>, name: &str) -> JdiResult<Self> {
        let current = registry.retrieve(name)?;
        Ok(Self {
            registry,
            current: RwLock::new(current),
        })
    }

    /// Switch to the registered profile `name`. On failure the current
    /// profile is kept.
    pub fn use_profile(&self, name: &str) -> JdiResult<()> {
        let profile = self.registry.retrieve(name)?;
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = profile;
        info!("Switched to profile '{}'", name);
        Ok(())
    }

    pub fn current_profile(&self) -> Arc<dyn DebugProfile> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn registry(&self) -> Arc<ProfileRegistry> {
        self.registry.clone()
    }
}

#[async_trait]
impl DebugProfile for SwappableDebugProfile {
    fn name(&self) -> &str {
        "swappable"
    }

    fn thread_start_requests(&self) -> Arc<RequestHelper<ThreadStartEventInfo>> {
        self.current_profile().thread_start_requests()
    }

    fn thread_death_requests(&self) -> Arc<RequestHelper<ThreadDeathEventInfo>> {
        self.current_profile().thread_death_requests()
    }

    fn breakpoint_requests(&self) -> Arc<RequestHelper<BreakpointEventInfo>> {
        self.current_profile().breakpoint_requests()
    }

    fn vm_death_requests(&self) -> Arc<RequestHelper<VmDeathEventInfo>> {
        self.current_profile().vm_death_requests()
    }

    fn on_vm_disconnect(&self, arguments: Vec<JdiArgument>) -> EventInfoPipeline<VmDisconnectEventInfo> {
        self.current_profile().on_vm_disconnect(arguments)
    }

    async fn threads(&self) -> JdiResult<Vec<ThreadInfo>> {
        self.current_profile().threads().await
    }

    async fn classes(&self) -> JdiResult<Vec<ClassInfo>> {
        self.current_profile().classes().await
    }

    fn event_handlers(&self) -> Vec<EventHandlerInfo> {
        self.current_profile().event_handlers()
    }

    async fn thread(&self, thread_id: ThreadId) -> JdiResult<ThreadInfo> {
        self.current_profile().thread(thread_id).await
    }

    async fn class(&self, name: &str) -> JdiResult<ClassInfo> {
        self.current_profile().class(name).await
    }
}
