//! Configuration for prochost
//!
//! A YAML document with one section per concern. Every section has defaults,
//! so an empty file (or no file at all) yields a working configuration.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::host::HostConfig;
use crate::service::LaunchPolicy;
use crate::spare::SpareConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub hosts: HostsConfig,
    pub spare: SpareSection,
    pub launch: LaunchConfig,
    pub policy: PolicyConfig,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    pub max_process_count: usize,
    pub process_per_site: bool,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            max_process_count: crate::host::MAX_PROCESS_COUNT,
            process_per_site: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpareSection {
    pub enabled: bool,
    pub keep_spare_at_all_times: bool,
}

impl Default for SpareSection {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_spare_at_all_times: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub worker_program: PathBuf,
    pub utility_program: Option<PathBuf>,
    pub single_process: bool,
    pub lang: String,
    pub propagate_switches: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("prochost-worker"),
            utility_program: None,
            single_process: false,
            lang: "en-US".to_string(),
            propagate_switches: vec![
                "enable-features".to_string(),
                "disable-features".to_string(),
                "force-fieldtrials".to_string(),
                "v".to_string(),
                "vmodule".to_string(),
            ],
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub disable_kill_after_bad_message: bool,
    pub disable_backgrounding: bool,
}

/// How a configured service is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePolicyKind {
    Embedded,
    #[default]
    Dedicated,
    Shared,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub display_name: Option<String>,
    pub policy: ServicePolicyKind,
    pub process_group: Option<String>,
    pub startup: bool,
}

impl ServiceConfig {
    /// Resolve the declared policy, rejecting a shared service without a group.
    pub fn launch_policy(&self) -> crate::Result<LaunchPolicy> {
        match self.policy {
            ServicePolicyKind::Embedded => Ok(LaunchPolicy::Embedded),
            ServicePolicyKind::Dedicated => Ok(LaunchPolicy::Dedicated),
            ServicePolicyKind::Shared => match &self.process_group {
                Some(group) if !group.is_empty() => Ok(LaunchPolicy::Shared {
                    process_group: group.clone(),
                }),
                _ => Err(crate::HostError::Config(format!(
                    "service '{}' is shared but has no process_group",
                    self.name
                ))),
            },
        }
    }

    /// Name shown for the hosting process.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            hosts: HostsConfig::default(),
            spare: SpareSection::default(),
            launch: LaunchConfig::default(),
            policy: PolicyConfig::default(),
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Per-host settings derived from this document.
    pub fn host_config(&self) -> HostConfig {
        HostConfig::default()
            .with_single_process(self.launch.single_process)
            .with_disable_kill_after_bad_message(self.policy.disable_kill_after_bad_message)
            .with_disable_backgrounding(self.policy.disable_backgrounding)
            .with_worker_program(self.launch.worker_program.clone())
            .with_utility_program(self.launch.utility_program.clone())
            .with_lang(self.launch.lang.clone())
            .with_propagate_switches(self.launch.propagate_switches.clone())
            .with_extra_args(self.launch.extra_args.clone())
            .with_max_process_count(self.hosts.max_process_count)
            .with_process_per_site(self.hosts.process_per_site)
    }

    /// Spare pool settings derived from this document.
    pub fn spare_config(&self) -> SpareConfig {
        SpareConfig::default()
            .with_enabled(self.spare.enabled)
            .with_keep_spare_at_all_times(self.spare.keep_spare_at_all_times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.hosts.max_process_count, crate::host::MAX_PROCESS_COUNT);
        assert!(config.spare.enabled);
        assert!(!config.spare.keep_spare_at_all_times);
        assert!(!config.launch.single_process);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hosts:\n  max_process_count: 5\nspare:\n  keep_spare_at_all_times: true\npolicy:\n  disable_backgrounding: true"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.hosts.max_process_count, 5);
        assert!(config.spare.keep_spare_at_all_times);
        assert!(config.spare.enabled);
        assert!(config.policy.disable_backgrounding);
        assert_eq!(config.launch.lang, "en-US");
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let path = PathBuf::from("/nonexistent/prochost.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_services() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "services:\n  - name: audio\n    policy: shared\n    process_group: media\n    startup: true\n  - name: prefs\n    policy: embedded"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(
            config.services[0].launch_policy().unwrap(),
            LaunchPolicy::Shared {
                process_group: "media".to_string()
            }
        );
        assert!(config.services[0].startup);
        assert_eq!(config.services[1].launch_policy().unwrap(), LaunchPolicy::Embedded);
        assert_eq!(config.services[1].display_name(), "prefs");
    }

    #[test]
    fn test_shared_service_requires_group() {
        let service = ServiceConfig {
            name: "audio".to_string(),
            policy: ServicePolicyKind::Shared,
            ..Default::default()
        };
        assert!(service.launch_policy().is_err());
    }

    #[test]
    fn test_host_config_derivation() {
        let mut config = Config::default();
        config.launch.single_process = true;
        config.policy.disable_kill_after_bad_message = true;
        config.hosts.max_process_count = 1;

        let host = config.host_config();
        assert!(host.single_process);
        assert!(host.disable_kill_after_bad_message);
        // Floor applies
        assert_eq!(host.max_process_count, crate::host::MIN_PROCESS_COUNT);
    }

    #[test]
    fn test_config_serializes_to_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("max_process_count"));
        assert!(yaml.contains("keep_spare_at_all_times"));
    }
}
