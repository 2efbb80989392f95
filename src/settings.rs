use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::sheet::{
    CardOptions, DEFAULT_DPI, DEFAULT_MAX_WORKERS, DispatchConfig, ProgressPolicy, RenderConfig,
};

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "rifagen";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no configuration directory on this system")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_dpi")]
    pub dpi: f32,

    /// Fixed number of rendering units; unset means one per core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_true")]
    pub watermark: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,

    #[serde(default = "default_font_family")]
    pub font_family: String,

    #[serde(default)]
    pub progress_policy: ProgressPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_dpi() -> f32 {
    DEFAULT_DPI
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_font_family() -> String {
    "serif".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            dpi: default_dpi(),
            workers: None,
            max_workers: default_max_workers(),
            watermark: true,
            font_path: None,
            font_family: default_font_family(),
            progress_policy: ProgressPolicy::default(),
            unit_timeout_secs: None,
            output_dir: None,
        }
    }
}

impl Settings {
    /// Dispatcher configuration described by these settings, without font data
    #[must_use]
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            max_workers: self.max_workers.max(1),
            progress: self.progress_policy,
            unit_timeout: self.unit_timeout_secs.map(Duration::from_secs),
            render: RenderConfig {
                dpi: self.dpi,
                card: CardOptions {
                    watermark: self.watermark,
                },
                font_family: self.font_family.clone(),
                ..RenderConfig::default()
            },
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the settings file into the global settings.
///
/// With no explicit path the per-user file is used and created with defaults
/// when missing.
pub fn load_settings(explicit: Option<&Path>) -> Result<(), SettingsError> {
    if let Some(path) = explicit {
        return load_settings_from_path(path);
    }

    let path = preferred_config_path().ok_or(SettingsError::NoConfigDir)?;
    if path.exists() {
        load_settings_from_path(&path)
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        save_settings_to_file(&current(), &path)
    }
}

pub fn load_settings_from_path(path: &Path) -> Result<(), SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings =
        serde_yaml::from_str::<Settings>(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        if let Err(e) = save_settings_to_file(&settings, path) {
            warn!("Migrated settings were not saved: {e}");
        }
    }

    replace(settings);
    Ok(())
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        // v1 accepted 0 as "auto"
        if settings.workers == Some(0) {
            settings.workers = None;
        }
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    let write_error = |source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
    }

    fs::write(path, generate_settings_yaml(settings)).map_err(write_error)?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(SETTINGS_HEADER);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("dpi: {}\n", settings.dpi));
    match settings.workers {
        Some(workers) => content.push_str(&format!("workers: {workers}\n")),
        None => content.push_str("# workers: 4\n"),
    }
    content.push_str(&format!("max_workers: {}\n", settings.max_workers));
    content.push_str(&format!("watermark: {}\n", settings.watermark));
    match &settings.font_path {
        Some(path) => content.push_str(&format!("font_path: {path:?}\n")),
        None => content.push_str("# font_path: \"/usr/share/fonts/TTF/DejaVuSerif.ttf\"\n"),
    }
    content.push_str(&format!("font_family: {:?}\n", settings.font_family));
    let policy = match settings.progress_policy {
        ProgressPolicy::TicketCount => "ticket_count",
        ProgressPolicy::WorkerAverage => "worker_average",
    };
    content.push_str(&format!("progress_policy: {policy}\n"));
    match settings.unit_timeout_secs {
        Some(secs) => content.push_str(&format!("unit_timeout_secs: {secs}\n")),
        None => content.push_str("# unit_timeout_secs: 600\n"),
    }
    match &settings.output_dir {
        Some(dir) => content.push_str(&format!("output_dir: {dir:?}\n")),
        None => content.push_str("# output_dir: \"/home/me/Documents\"\n"),
    }

    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# rifagen settings
# ============================================================================
# dpi              raster resolution of every page
# workers          fixed number of rendering units (default: one per core)
# max_workers      cap on the automatic worker count
# watermark        print the ticket number faintly across each card
# font_path        TrueType/OpenType file preferred over system fonts
# font_family      system family used when font_path is unset or lacks a glyph
# progress_policy  ticket_count | worker_average
# unit_timeout_secs  give up on a render after this many seconds
# output_dir       where generated PDFs go (default: current directory)

"#;

// Public API for accessing/modifying settings

/// Snapshot of the global settings
pub fn current() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

pub fn replace(settings: Settings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings;
    }
}
