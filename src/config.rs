// VMBENCH CONFIGURATION
// OPTIONAL TOML FILE. EVERY KEY HAS A DEFAULT, SO AN ABSENT FILE OR AN
// EMPTY ONE IS A VALID CONFIG. PER-BACKEND TABLES OVERRIDE THE GLOBALS.
//
//   cadence_secs = 1.0
//   settle_secs = 60.0
//
//   [virtualbox]
//   vm = "Windows11"
//   programs = ['C:\bench\cpu.exe', 'C:\bench\disk.exe']
//   hard_stop = true

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterSettings, Backend};
use crate::error::ConfigError;
use crate::logging::DEFAULT_LOG_FILE;
use crate::orchestrator::RunPlan;

pub const DEFAULT_CONFIG_FILE: &str = "vmbench.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub cadence_secs: f64,
    pub settle_secs: f64,
    pub min_sampling_secs: f64,
    // 0 DISABLES THE JOIN WATCHDOG
    pub sampler_join_timeout_secs: f64,
    pub lifecycle_timeout_secs: f64,
    pub guest_timeout_secs: f64,
    pub esxi: BackendConfig,
    pub virtualbox: BackendConfig,
    pub workstation: BackendConfig,
    pub hyperv: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            cadence_secs: 1.0,
            settle_secs: 60.0,
            min_sampling_secs: 0.0,
            sampler_join_timeout_secs: 30.0,
            lifecycle_timeout_secs: 120.0,
            guest_timeout_secs: 300.0,
            esxi: BackendConfig::default(),
            virtualbox: BackendConfig::default(),
            workstation: BackendConfig::default(),
            hyperv: BackendConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub vm: Option<String>,
    pub programs: Vec<String>,
    pub tool: Option<PathBuf>,
    pub hard_stop: bool,
    pub results: Option<PathBuf>,
    pub settle_secs: Option<f64>,
    pub min_sampling_secs: Option<f64>,
    // esxi: GOVC_URL, e.g. "https://esxi.lab/sdk"
    pub endpoint: Option<String>,
    pub insecure: bool,
}

fn secs(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Invalid {
        reason: format!("{} must be a finite, non-negative number of seconds (got {})", key, value),
    })
}

fn positive_secs(key: &str, value: f64) -> Result<Duration, ConfigError> {
    let d = secs(key, value)?;
    if d.is_zero() {
        return Err(ConfigError::Invalid {
            reason: format!("{} must be greater than zero", key),
        });
    }
    Ok(d)
}

impl Config {
    /// Load `path`. A missing file at the default location yields defaults;
    /// a missing file that was asked for explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_secs("cadence_secs", self.cadence_secs)?;
        secs("settle_secs", self.settle_secs)?;
        secs("min_sampling_secs", self.min_sampling_secs)?;
        secs("sampler_join_timeout_secs", self.sampler_join_timeout_secs)?;
        positive_secs("lifecycle_timeout_secs", self.lifecycle_timeout_secs)?;
        positive_secs("guest_timeout_secs", self.guest_timeout_secs)?;
        for b in Backend::ALL {
            let bc = self.backend(b);
            if let Some(s) = bc.settle_secs {
                secs(&format!("{}.settle_secs", b), s)?;
            }
            if let Some(s) = bc.min_sampling_secs {
                secs(&format!("{}.min_sampling_secs", b), s)?;
            }
            if bc.vm.as_deref().map_or(false, |v| v.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    reason: format!("{}.vm must not be empty", b),
                });
            }
        }
        Ok(())
    }

    pub fn backend(&self, backend: Backend) -> &BackendConfig {
        match backend {
            Backend::Esxi => &self.esxi,
            Backend::Virtualbox => &self.virtualbox,
            Backend::Workstation => &self.workstation,
            Backend::Hyperv => &self.hyperv,
        }
    }

    pub fn backend_mut(&mut self, backend: Backend) -> &mut BackendConfig {
        match backend {
            Backend::Esxi => &mut self.esxi,
            Backend::Virtualbox => &mut self.virtualbox,
            Backend::Workstation => &mut self.workstation,
            Backend::Hyperv => &mut self.hyperv,
        }
    }

    pub fn results_path(&self, backend: Backend) -> PathBuf {
        match &self.backend(backend).results {
            Some(p) => p.clone(),
            None => self.data_dir.join(format!("{}_results.csv", backend.id())),
        }
    }

    pub fn plan(&self, backend: Backend) -> Result<RunPlan, ConfigError> {
        let bc = self.backend(backend);
        let join = secs("sampler_join_timeout_secs", self.sampler_join_timeout_secs)?;
        Ok(RunPlan {
            vm: bc
                .vm
                .clone()
                .unwrap_or_else(|| backend.default_vm().to_string()),
            programs: bc.programs.clone(),
            settle_delay: secs("settle_secs", bc.settle_secs.unwrap_or(self.settle_secs))?,
            cadence: positive_secs("cadence_secs", self.cadence_secs)?,
            min_sampling: secs(
                "min_sampling_secs",
                bc.min_sampling_secs.unwrap_or(self.min_sampling_secs),
            )?,
            sampler_join_timeout: if join.is_zero() { None } else { Some(join) },
            results: self.results_path(backend),
        })
    }

    pub fn adapter_settings(&self, backend: Backend) -> Result<AdapterSettings, ConfigError> {
        let bc = self.backend(backend);
        let mut settings = AdapterSettings::defaults(backend);
        if let Some(tool) = &bc.tool {
            settings.tool = tool.clone();
        }
        settings.lifecycle_timeout = positive_secs("lifecycle_timeout_secs", self.lifecycle_timeout_secs)?;
        settings.guest_timeout = positive_secs("guest_timeout_secs", self.guest_timeout_secs)?;
        settings.hard_stop = bc.hard_stop;
        settings.endpoint = bc.endpoint.clone();
        settings.insecure = bc.insecure;
        Ok(settings)
    }
}
