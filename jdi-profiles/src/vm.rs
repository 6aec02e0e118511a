// Virtual machine boundary
//
// The debuggee is reached through the VirtualMachine trait. A profile sees
// it through a VirtualMachineSlot, which is empty until something attaches.

use crate::arguments::{RequestArgument, RequestTarget};
use crate::error::VmError;
use crate::types::{ClassInfo, NativeRequestId, ThreadInfo};
use async_trait::async_trait;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

#[async_trait]
pub trait VirtualMachine: Send + Sync {
    async fn all_threads(&self) -> Result<Vec<ThreadInfo>, VmError>;

    async fn all_classes(&self) -> Result<Vec<ClassInfo>, VmError>;

    /// Create and enable a native event request. Properties among the
    /// arguments must be echoed back on every event the request produces.
    async fn create_event_request(
        &self,
        target: &RequestTarget,
        arguments: &[RequestArgument],
    ) -> Result<NativeRequestId, VmError>;

    async fn delete_event_request(&self, native_id: NativeRequestId) -> Result<(), VmError>;

    /// Resume all threads
    async fn resume(&self) -> Result<(), VmError>;
}

/// A virtual machine together with the attachment it arrived with
#[derive(Clone)]
pub struct AttachedVm {
    pub generation: u64,
    pub vm: Arc<dyn VirtualMachine>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    vm: Option<Arc<dyn VirtualMachine>>,
}

/// Attachment point shared by every helper of a profile.
///
/// Every attach and detach starts a new generation. Work begun against one
/// attachment can ask `is_current` afterwards to learn whether the virtual
/// machine it used is still the attached one.
#[derive(Default)]
pub struct VirtualMachineSlot {
    state: RwLock<SlotState>,
}

impl std::fmt::Debug for VirtualMachineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("VirtualMachineSlot")
            .field("attached", &state.vm.is_some())
            .field("generation", &state.generation)
            .finish()
    }
}

impl VirtualMachineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Option<Arc<dyn VirtualMachine>> {
        self.read().vm.clone()
    }

    pub fn current(&self) -> Option<AttachedVm> {
        let state = self.read();
        state.vm.as_ref().map(|vm| AttachedVm {
            generation: state.generation,
            vm: vm.clone(),
        })
    }

    /// True while the attachment numbered `generation` is still in place
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.read();
        state.vm.is_some() && state.generation == generation
    }

    pub fn is_attached(&self) -> bool {
        self.read().vm.is_some()
    }

    /// Returns the previously attached virtual machine, if any
    pub fn attach(&self, vm: Arc<dyn VirtualMachine>) -> Option<Arc<dyn VirtualMachine>> {
        let mut state = self.write();
        state.generation += 1;
        info!("Virtual machine attached (generation {})", state.generation);
        state.vm.replace(vm)
    }

    pub fn detach(&self) -> Option<Arc<dyn VirtualMachine>> {
        let mut state = self.write();
        let previous = state.vm.take();
        if previous.is_some() {
            state.generation += 1;
            info!("Virtual machine detached");
        }
        previous
    }
}
