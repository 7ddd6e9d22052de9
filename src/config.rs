//! Settings document, loading logic and the save-on-change store

use crate::download::ModelTemplate;
use crate::hardware::{ExecutionProvider, HardwareProfile};
use crate::models::{CachePolicy, ModelDescriptor};
use crate::provider::NpuFamilyRule;
use crate::version::DriverVersion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Persisted application settings consumed by every component
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Provider used when a model or component does not override it
    pub default_execution_provider: Option<ExecutionProvider>,
    /// Adapter index used when a model or component does not override it
    pub default_device_id: Option<u32>,
    /// Providers probed against every hardware GPU adapter
    pub probe_providers: Vec<ExecutionProvider>,
    pub hardware_profiles: Vec<HardwareProfile>,
    /// Installed model sets
    pub models: Vec<ModelDescriptor>,
    /// Downloadable model catalog
    pub templates: Vec<ModelTemplate>,
    pub cache_policy: CachePolicy,
    pub directories: Directories,
    pub npu: NpuSettings,
    /// Interval of the live-metrics poller in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_execution_provider: None,
            default_device_id: None,
            probe_providers: ExecutionProvider::gpu_defaults(),
            hardware_profiles: Vec::new(),
            models: Vec::new(),
            templates: Vec::new(),
            cache_policy: CachePolicy::default(),
            directories: Directories::default(),
            npu: NpuSettings::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Directories {
    /// Root under which downloaded models are installed
    pub models: PathBuf,
    /// Provider compilation caches
    pub cache: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            models: default_models_dir(),
            cache: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NpuSettings {
    /// Oldest NPU driver able to run Stable Diffusion pipelines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_stable_diffusion_driver: Option<DriverVersion>,
    /// Dynamic custom-op library loaded into NPU sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_op_library: Option<PathBuf>,
    /// Root of the dynamic dispatch kernels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_directory: Option<PathBuf>,
    /// Extra model-family rules, consulted before the built-in table
    pub family_rules: Vec<NpuFamilyRule>,
}

impl Settings {
    /// Load settings from file with environment variable overrides
    ///
    /// `.toml` files are parsed as TOML, anything else as JSON. Without a
    /// path the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file: {:?}", path))?;
                Self::parse(path, &content)?
            }
            None => Self::default(),
        };

        // Environment variable overrides
        if let Ok(dir) = std::env::var("AMUSE_MODEL_DIRECTORY") {
            settings.directories.models = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AMUSE_CACHE_DIRECTORY") {
            settings.directories.cache = PathBuf::from(dir);
        }
        if let Ok(interval) = std::env::var("AMUSE_POLL_INTERVAL_MS") {
            settings.poll_interval_ms = interval
                .parse()
                .context("Invalid AMUSE_POLL_INTERVAL_MS value")?;
        }

        Ok(settings)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(content).context("Failed to parse TOML settings")
        } else {
            serde_json::from_str(content).context("Failed to parse JSON settings")
        }
    }

    fn render(&self, path: &Path) -> Result<String> {
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::to_string_pretty(self).context("Failed to serialize settings to TOML")
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize settings to JSON")
        }
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }

        let mut keys = HashSet::new();
        for model in &self.models {
            if !keys.insert(model.key()) {
                anyhow::bail!("Duplicate model key: {}", model.key());
            }
        }

        let mut template_ids = HashSet::new();
        for template in &self.templates {
            if !template_ids.insert(template.id) {
                anyhow::bail!("Duplicate template id: {}", template.id);
            }
        }

        for profile in &self.hardware_profiles {
            if profile.name.trim().is_empty() {
                anyhow::bail!("Hardware profile name cannot be empty");
            }
        }

        Ok(())
    }
}

/// Owner of the settings document
///
/// Reads hand out clones or borrow through a closure; every mutation goes
/// through [`SettingsStore::update`], which persists the document when the
/// store is backed by a file.
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Store that never touches disk
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            settings: RwLock::new(settings),
        }
    }

    /// Open a file-backed store; a missing file starts from defaults
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            Settings::load(Some(&path))?
        } else {
            tracing::info!(path = ?path, "Settings file not found, using defaults");
            Settings::load(None)?
        };
        settings.validate()?;

        Ok(Self {
            path: Some(path),
            settings: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of the current document
    pub fn snapshot(&self) -> Settings {
        self.read(Settings::clone)
    }

    /// Borrow the current document
    pub fn read<R>(&self, f: impl FnOnce(&Settings) -> R) -> R {
        let guard = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the document and persist it
    ///
    /// The change is applied to a copy; readers only see it once it has been
    /// written, and a failed save leaves the current document untouched.
    pub fn update<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> crate::Result<R> {
        let mut guard = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = guard.clone();
        let result = f(&mut updated);

        if let Some(path) = &self.path {
            let content = updated
                .render(path)
                .map_err(crate::OrchestratorError::Settings)?;
            write_atomic(path, &content).map_err(crate::OrchestratorError::Settings)?;
            tracing::debug!(path = ?path, "Settings saved");
        }

        *guard = updated;
        Ok(result)
    }
}

/// Atomic write: write to temp file, then rename
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create settings directory: {:?}", parent))?;
    }

    let temp_file = path.with_extension("tmp");
    let mut file =
        std::fs::File::create(&temp_file).context("Failed to create temp settings file")?;
    file.write_all(content.as_bytes())
        .context("Failed to write settings file")?;
    file.sync_all().context("Failed to sync settings file")?;

    std::fs::rename(&temp_file, path).context("Failed to rename temp settings file")?;
    Ok(())
}

// Default functions
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("Amuse").join("Models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("Amuse"))
        .unwrap_or_else(|| PathBuf::from("cache"))
}
