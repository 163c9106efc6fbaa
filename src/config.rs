//! Daemon configuration and theme files.
//!
//! `config.json` holds the hardware and timing settings; the theme file it
//! points at describes orientation, refresh mode and the rotating screens
//! with their widgets. Both are plain JSON, written by an external
//! configuration layer and only read here.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::led::{LedCommand, LedTheme};
use crate::surface::Rect;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "Config::default_product_id")]
    pub product_id: u16,
    /// Render loop cadence.
    #[serde(default = "Config::default_poll")]
    pub poll_ms: u64,
    /// Post-redraw pacing delay and idle keepalive threshold.
    #[serde(default = "Config::default_refresh")]
    pub refresh_ms: u64,
    /// Maximum time between keepalives while jobs are flowing.
    #[serde(default = "Config::default_heartbeat")]
    pub heartbeat_ms: u64,
    #[serde(default)]
    pub canvas: CanvasConfig,
    /// Theme file path, relative to the config file's directory.
    #[serde(default = "Config::default_theme")]
    pub theme: PathBuf,
    #[serde(default)]
    pub led: LedSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            poll_ms: Self::default_poll(),
            refresh_ms: Self::default_refresh(),
            heartbeat_ms: Self::default_heartbeat(),
            canvas: CanvasConfig::default(),
            theme: Self::default_theme(),
            led: LedSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let default = Config::default();
            default.save(path)?;
            return Ok(default);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    const fn default_vendor_id() -> u16 {
        0x04D9
    }
    const fn default_product_id() -> u16 {
        0xFD01
    }
    const fn default_poll() -> u64 {
        1000
    }
    const fn default_refresh() -> u64 {
        1000
    }
    const fn default_heartbeat() -> u64 {
        5000
    }
    fn default_theme() -> PathBuf {
        PathBuf::from("theme.json")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "CanvasConfig::default_width")]
    pub width: u16,
    #[serde(default = "CanvasConfig::default_height")]
    pub height: u16,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
        }
    }
}

impl CanvasConfig {
    const fn default_width() -> u16 {
        320
    }
    const fn default_height() -> u16 {
        170
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedSettings {
    #[serde(default = "LedSettings::default_device")]
    pub device: String,
    #[serde(default = "LedSettings::default_theme")]
    pub theme: u8,
    #[serde(default = "LedSettings::default_level")]
    pub intensity: u8,
    #[serde(default = "LedSettings::default_level")]
    pub speed: u8,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            device: Self::default_device(),
            theme: Self::default_theme(),
            intensity: Self::default_level(),
            speed: Self::default_level(),
        }
    }
}

impl LedSettings {
    pub fn resolve(&self) -> LedCommand {
        LedCommand {
            theme: LedTheme::from_code(self.theme).unwrap_or(LedTheme::Off),
            intensity: self.intensity,
            speed: self.speed,
        }
    }

    fn default_device() -> String {
        "/dev/ttyUSB0".to_string()
    }
    const fn default_theme() -> u8 {
        0x05
    }
    const fn default_level() -> u8 {
        3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Always stream the whole frame.
    Redraw,
    /// Send only changed regions.
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default = "Theme::default_orientation")]
    pub orientation: Orientation,
    #[serde(default = "Theme::default_refresh")]
    pub refresh: RefreshMode,
    /// `Some(true)` gives every screen the shared rotation interval,
    /// `Some(false)` pins the rotation, `None` keeps per-screen durations.
    #[serde(default)]
    pub rotate: Option<bool>,
    #[serde(default)]
    pub rotation_interval_ms: u64,
    #[serde(default)]
    pub screens: Vec<Screen>,
}

impl Theme {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut theme: Theme = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        theme.normalize();
        Ok(theme)
    }

    /// Sorts screens and widgets into draw order and applies the theme-wide
    /// rotation settings to the per-screen durations.
    pub fn normalize(&mut self) {
        self.screens.sort_by_key(|screen| screen.id);
        for screen in &mut self.screens {
            screen.widgets.sort_by_key(|widget| widget.id);
        }
        match self.rotate {
            Some(true) if self.rotation_interval_ms > 0 => {
                for screen in &mut self.screens {
                    screen.duration_ms = self.rotation_interval_ms;
                }
            }
            Some(false) => {
                for screen in &mut self.screens {
                    screen.duration_ms = 0;
                }
            }
            _ => {}
        }
    }

    const fn default_orientation() -> Orientation {
        Orientation::Landscape
    }
    const fn default_refresh() -> RefreshMode {
        RefreshMode::Update
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screen {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Zero keeps the screen up until an explicit jump.
    #[serde(default = "Screen::default_duration")]
    pub duration_ms: u64,
    #[serde(default = "Screen::default_background")]
    pub background: String,
    #[serde(default)]
    pub wallpaper: Option<PathBuf>,
    /// Strip theme applied whenever rotation enters this screen.
    #[serde(default)]
    pub led: Option<LedOverride>,
    #[serde(default)]
    pub widgets: Vec<WidgetConfig>,
}

impl Screen {
    const fn default_duration() -> u64 {
        60_000
    }
    fn default_background() -> String {
        "#000000".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedOverride {
    #[serde(default)]
    pub theme: Option<u8>,
    #[serde(default)]
    pub intensity: Option<u8>,
    #[serde(default)]
    pub speed: Option<u8>,
}

impl LedOverride {
    pub fn resolve(&self) -> LedCommand {
        LedCommand {
            theme: self
                .theme
                .and_then(LedTheme::from_code)
                .unwrap_or(LedTheme::Off),
            intensity: self.intensity.unwrap_or(3),
            speed: self.speed.unwrap_or(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub id: u32,
    /// Renderer name in the widget registry.
    pub name: String,
    /// Position in the orientation-adjusted widget coordinate space.
    pub rect: Rect,
    #[serde(default)]
    pub sensor: Option<String>,
    /// Sensor sampling rate for this binding.
    #[serde(default = "WidgetConfig::default_refresh")]
    pub refresh_ms: u64,
    /// Formatting hint handed to the sensor (`{value}` placeholder, or a
    /// strftime string for the clock).
    #[serde(default)]
    pub format: String,
    /// Static value used when no sensor is bound.
    #[serde(default)]
    pub value: String,
    #[serde(default = "WidgetConfig::default_color")]
    pub color: String,
    #[serde(default = "WidgetConfig::default_background")]
    pub background_color: String,
    #[serde(default)]
    pub font: String,
    #[serde(default)]
    pub vertical: bool,
}

impl WidgetConfig {
    const fn default_refresh() -> u64 {
        1000
    }
    fn default_color() -> String {
        "#FFFFFF".to_string()
    }
    fn default_background() -> String {
        "#000000".to_string()
    }
}
