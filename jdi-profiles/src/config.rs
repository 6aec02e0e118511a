// Profile configuration
//
// Loaded from JSON; every field has a default so partial documents work.

use crate::error::JdiResult;
use serde::{Deserialize, Serialize};

/// Default capacity of the native event channel. Events are critical
/// (breakpoints) and should not be dropped under load.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Name the profile registers under
    pub name: String,
    /// Queue requests made before a virtual machine attaches
    pub pending_requests: bool,
    /// Capacity of the channel feeding the event dispatch task
    pub event_buffer: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            name: "pure".to_string(),
            pending_requests: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ProfileConfig {
    pub fn from_json(json: &str) -> JdiResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JdiError;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProfileConfig::from_json(r#"{"pending_requests": false}"#).unwrap();
        assert_eq!(config.name, "pure");
        assert!(!config.pending_requests);
        assert_eq!(config.event_buffer, DEFAULT_EVENT_BUFFER);

        assert_eq!(ProfileConfig::from_json("{}").unwrap(), ProfileConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = ProfileConfig::from_json(r#"{"event_buffer": "lots"}"#);
        assert!(matches!(result, Err(JdiError::Config(_))));
    }
}
