use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DownloadConfig {
    /// Bytes requested per ranged request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_chunk_size() -> u64 {
    9 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}
