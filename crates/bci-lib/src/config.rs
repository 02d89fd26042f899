use anyhow::{Context, Result};
use dirs_next::{config_dir, data_dir};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides every other source of the projects directory.
pub const PROJECTS_DIR_ENV: &str = "BCI_PROJECTS_DIR";
const APP_DIR: &str = "bcilab";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub projects_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    projects_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// `$BCI_PROJECTS_DIR`, else `projects_dir` from `<config_dir>/bcilab/config.toml`,
    /// else `<data_dir>/bcilab/projects`.
    pub fn load() -> Result<Self> {
        if let Ok(dir) = env::var(PROJECTS_DIR_ENV) {
            return Ok(Self::new(dir));
        }
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Some(dir) = read_config(&path)?.projects_dir {
                    return Ok(Self::new(dir));
                }
            }
        }
        let base = data_dir().context("unable to locate data directory")?;
        Ok(Self::new(base.join(APP_DIR).join("projects")))
    }

    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config = read_config(path)?;
        let dir = config
            .projects_dir
            .with_context(|| format!("{} does not set projects_dir", path.display()))?;
        Ok(Self::new(dir))
    }
}

fn read_config(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}
