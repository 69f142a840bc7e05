use serde::{Deserialize, Serialize};

/// Complete configuration for the trajectory viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HackviewConfig {
    pub server: ServerConfig,
    pub env: EnvSettings,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (default: "0.0.0.0").
    pub host: String,
    /// Port to bind (default: 8000).
    pub port: u16,
    /// Directory holding an `index.html` that replaces the built-in viewer.
    pub assets_dir: Option<String>,
}

/// Where environments come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Environment id used when a request does not name one.
    pub default_env_id: String,
    /// Base URL of the NLE bridge server.
    pub bridge_url: String,
    /// Use the scripted mock dungeon instead of the bridge.
    pub mock: bool,
    /// Timeout for each bridge request, in seconds (default: 30).
    pub request_timeout_secs: u64,
    /// Step limit after which mock episodes are truncated (default: 200).
    pub mock_max_steps: usize,
}

/// Defaults for trajectory generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Steps for `POST /generate` when the form omits them (default: 50).
    pub default_steps: usize,
    /// Seed for `POST /generate` when the form omits it (default: 42).
    pub default_seed: u64,
    /// Steps for `GET /live-generate` (default: 20).
    pub live_default_steps: usize,
    /// Extra steps for a continuation (default: 50).
    pub continue_default_steps: usize,
    /// Fail a continuation when the replayed screen differs from the recording.
    pub strict_replay: bool,
}

/// Flat-file storage for the bootstrap trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub default_trajectory_path: String,
    /// Steps generated when no default trajectory file exists (default: 30).
    pub bootstrap_steps: usize,
    pub bootstrap_seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            assets_dir: None,
        }
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            default_env_id: "NetHackScore-v0".into(),
            bridge_url: "http://localhost:5000".into(),
            mock: false,
            request_timeout_secs: 30,
            mock_max_steps: 200,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_steps: 50,
            default_seed: 42,
            live_default_steps: 20,
            continue_default_steps: 50,
            strict_replay: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_trajectory_path: "game_trajectory.json".into(),
            bootstrap_steps: 30,
            bootstrap_seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: HackviewConfig =
            serde_json::from_str(r#"{"server": {"port": 9000}, "env": {"mock": true}}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.assets_dir, None);
        assert!(config.env.mock);
        assert_eq!(config.env.default_env_id, "NetHackScore-v0");
        assert_eq!(config.generation.default_steps, 50);
        assert_eq!(config.storage.default_trajectory_path, "game_trajectory.json");
    }
}
