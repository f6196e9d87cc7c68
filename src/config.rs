use ingot_graphics as gpu;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read the config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse the config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}
fn default_max_meshes() -> usize {
    ingot_render::DEFAULT_MAX_MESHES
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub unified_queues: bool,
    #[serde(default)]
    pub bindless: bool,
    #[serde(default)]
    pub memory_budget: Option<u64>,
}

impl DeviceConfig {
    pub fn desc(&self) -> gpu::DeviceDesc {
        gpu::DeviceDesc {
            name: self.name.clone(),
            features: if self.bindless {
                gpu::DeviceFeatures::BINDLESS
            } else {
                gpu::DeviceFeatures::empty()
            },
            unified_queues: self.unified_queues,
            memory_budget: self.memory_budget,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct Engine {
    /// Number of worker threads, derived from the CPU count if missing.
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default = "default_max_meshes")]
    pub max_meshes: usize,
    /// Directory of `<guid>.mesh` files. Assets are kept in memory without it.
    #[serde(default)]
    pub asset_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub create_primitives: bool,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_meshes: default_max_meshes(),
            asset_path: None,
            create_primitives: true,
            devices: Vec::new(),
        }
    }
}

impl Engine {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == Some(0) {
            return Err(ConfigError::Invalid("worker_count must be positive".to_string()));
        }
        if self.max_meshes == 0 || self.max_meshes > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_meshes of {} is out of range",
                self.max_meshes
            )));
        }
        for (index, device) in self.devices.iter().enumerate() {
            if self.devices[..index]
                .iter()
                .any(|other| other.name == device.name)
            {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' is listed twice",
                    device.name
                )));
            }
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get_physical().max((num_cpus::get() * 3 + 2) / 4))
    }
}
