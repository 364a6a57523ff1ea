use serde::{Deserialize, Serialize};

/// What bootstrap does when the key receiver fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFailurePolicy {
    /// Abort startup
    #[default]
    Abort,
    /// Continue with an empty key; every seal/open fails until restart
    Degraded,
}

/// Configuration for the master key receiver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Program followed by its fixed argument list
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Upper bound on the receiver's run time (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub on_failure: KeyFailurePolicy,
}

fn default_command() -> Vec<String> {
    ["java", "-cp", "/mattermost/bin/keyReceiver.jar", "App"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            timeout_seconds: default_timeout_seconds(),
            on_failure: KeyFailurePolicy::default(),
        }
    }
}
