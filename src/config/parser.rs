use super::session::{DEFAULT_DB_PORT, DEFAULT_DB_PREFIX, DEFAULT_PORT};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAMES: [&str; 2] = ["comradarr-dev.yaml", "comradarr-dev.yml"];

/// Project-level settings, read from an optional `comradarr-dev.yaml`.
///
/// Every field has a default so an empty (or absent) file describes the
/// standard Bun + Drizzle project layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub dev_command: Vec<String>,
    pub migrate_command: Vec<String>,
    pub seed_command: Vec<String>,
    pub unit_test_command: Vec<String>,
    pub integration_test_command: Vec<String>,
    pub default_port: u16,
    pub db_port: u16,
    pub db_prefix: String,
    pub migration_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    /// Relative to the project root.
    pub credentials_file: PathBuf,
    /// Defaults to `<temp dir>/cr-dev-state.json`.
    pub state_file: Option<PathBuf>,
}

fn words(cmd: &str) -> Vec<String> {
    cmd.split_whitespace().map(String::from).collect()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dev_command: words("bun run dev"),
            migrate_command: words("bunx drizzle-kit migrate"),
            seed_command: words("bun run scripts/create-admin.ts"),
            unit_test_command: words("bun run test:unit"),
            integration_test_command: words("bun test tests/integration"),
            default_port: DEFAULT_PORT,
            db_port: DEFAULT_DB_PORT,
            db_prefix: DEFAULT_DB_PREFIX.to_string(),
            migration_timeout_secs: 300,
            stop_timeout_secs: 10,
            credentials_file: PathBuf::from(".cr-dev-dbs.json"),
            state_file: None,
        }
    }
}

impl ProjectConfig {
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cr-dev-state.json"))
    }

    pub fn credentials_path(&self, project_root: &Path) -> PathBuf {
        if self.credentials_file.is_absolute() {
            self.credentials_file.clone()
        } else {
            project_root.join(&self.credentials_file)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let commands = [
            ("dev_command", &self.dev_command),
            ("migrate_command", &self.migrate_command),
            ("seed_command", &self.seed_command),
            ("unit_test_command", &self.unit_test_command),
            ("integration_test_command", &self.integration_test_command),
        ];
        for (field, cmd) in commands {
            if cmd.is_empty() {
                return Err(Error::Config(format!("'{}' must not be empty", field)));
            }
        }
        if self.default_port == 0 || self.db_port == 0 {
            return Err(Error::Config("ports must be non-zero".to_string()));
        }
        crate::config::validate_db_name(&format!("{}_00000000", self.db_prefix))
            .map_err(|_| Error::Config(format!("invalid db_prefix '{}'", self.db_prefix)))?;
        Ok(())
    }
}

/// The loaded project: its root directory plus settings.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    /// `None` when running on defaults.
    pub config_path: Option<PathBuf>,
}

impl Project {
    /// Load from an explicit root, or discover by walking up from the
    /// working directory. Falls back to defaults rooted at the working
    /// directory when no config file exists.
    pub fn load(explicit_root: Option<&Path>) -> Result<Self> {
        if let Some(root) = explicit_root {
            return Self::load_from_root(root);
        }
        let cwd = std::env::current_dir()?;
        match find_config_in_dir(&cwd) {
            Some(path) => {
                let root = path.parent().map(Path::to_path_buf).unwrap_or(cwd);
                let config = load_config(&path)?;
                Ok(Self {
                    root,
                    config,
                    config_path: Some(path),
                })
            }
            None => {
                tracing::debug!("No comradarr-dev.yaml found, using defaults");
                Ok(Self {
                    root: cwd,
                    config: ProjectConfig::default(),
                    config_path: None,
                })
            }
        }
    }

    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = CONFIG_FILE_NAMES
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.exists());
        let config = match &config_path {
            Some(path) => load_config(path)?,
            None => ProjectConfig::default(),
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            config_path,
        })
    }
}

/// Search `dir` and its ancestors for a config file.
pub fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
    for name in CONFIG_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    dir.parent().and_then(find_config_in_dir)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ProjectConfig> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ProjectConfig> {
    if content.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    let config: ProjectConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}
