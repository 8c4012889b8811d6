use std::{path::PathBuf, time::Duration};

pub const DEFAULT_PROCMAP_NAME: &str = "synacor-dbg-procmap.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// How long the machine runs before pending interrupts and packets are
    /// looked at again.
    pub poll_interval: Duration,
    /// Where the synthesized process map is written on every load.
    pub procmap_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            procmap_path: std::env::temp_dir().join(DEFAULT_PROCMAP_NAME),
        }
    }
}
