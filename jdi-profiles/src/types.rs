// Common value types
//
// Ids and descriptors shared by the virtual machine, events and requests

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Opaque handles assigned by the virtual machine
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;

/// Id handed out by the virtual machine for a submitted event request
pub type NativeRequestId = i32;

/// Correlation id for a logical request, unique per process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh id
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Suspend policy for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuspendPolicy {
    None,
    EventThread,
    All,
}

// Location identifies a code position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
    pub source_path: Option<String>,
    pub line: Option<u32>,
}

// Thread status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Zombie,
    Running,
    Sleeping,
    Monitor,
    Wait,
}

/// Live thread as reported by the virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub suspended: bool,
}

/// Loaded class as reported by the virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub source_path: Option<String>,
}

impl ClassInfo {
    /// Convert a JVM signature to a dotted class name
    /// e.g., "Lcom/example/MyClass;" -> "com.example.MyClass"
    pub fn name(&self) -> String {
        self.signature
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(&self.signature)
            .replace('/', ".")
    }
}
