//! TOML Configuration File Support
//!
//! Centralized configuration loading for stockvision, from a TOML file at
//! `~/.config/stockvision/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`STOCKVISION_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/stockvision/config.toml` (typically `~/.config/stockvision/config.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [display]
//! tick_rate_hz = 30
//! transition_duration_secs = 2.0
//! output_width = 0          # 0 = follow the terminal
//! output_height = 0
//! background_color = [18, 18, 24]
//! transition_carryover = "discard"
//!
//! [refresh]
//! interval_secs = 900
//! synthesis_enabled = true
//!
//! [stock]
//! symbol = "NVDA"
//! chart_range = "1mo"
//!
//! [chart]
//! width = 512
//! height = 512
//! chart_type = "line"
//!
//! [synthesis]
//! host = "127.0.0.1"
//! port = 7860
//! steps = 30
//! guided_probability = 0.7
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crossfade::BlendCarryover;

/// Largest accepted chart edge, in pixels
const MAX_CHART_EDGE: u32 = 2048;

/// Fastest accepted render loop rate
const MAX_TICK_RATE_HZ: u32 = 240;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::Default
    }
}

/// Chart style of the control visual
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Closing prices as a line with a filled area
    #[default]
    Line,
    /// Daily candlesticks
    Candle,
}

impl std::str::FromStr for ChartType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "candle" | "candlestick" => Ok(Self::Candle),
            other => Err(ConfigError::ValidationError(format!(
                "unknown chart type '{other}' (expected 'line' or 'candle')"
            ))),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Display section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Render loop ticks per second
    pub tick_rate_hz: Option<u32>,

    /// Crossfade length in seconds
    pub transition_duration_secs: Option<f64>,

    /// Output width in pixels (0 = follow the terminal)
    pub output_width: Option<u32>,

    /// Output height in pixels (0 = follow the terminal)
    pub output_height: Option<u32>,

    /// RGB fill behind the loading screen
    pub background_color: Option<[u8; 3]>,

    /// What fades out when an artifact arrives mid-transition
    pub transition_carryover: Option<BlendCarryover>,
}

/// Refresh section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshToml {
    /// Seconds between periodic refreshes
    pub interval_secs: Option<u64>,

    /// Whether cycles run the image synthesizer
    pub synthesis_enabled: Option<bool>,

    /// Directory for debug image dumps
    pub debug_dir: Option<PathBuf>,
}

/// Stock section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StockToml {
    /// Ticker symbol
    pub symbol: Option<String>,

    /// History range (Yahoo notation, e.g. "1mo")
    pub chart_range: Option<String>,

    /// Base URL of the chart API
    pub api_base: Option<String>,

    /// HTTP timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Chart section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartToml {
    /// Render width in pixels
    pub width: Option<u32>,

    /// Render height in pixels
    pub height: Option<u32>,

    /// Line or candle chart
    pub chart_type: Option<ChartType>,
}

/// Synthesis section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisToml {
    /// Synthesis server host
    pub host: Option<String>,

    /// Synthesis server port
    pub port: Option<u16>,

    /// Sampling steps
    pub steps: Option<u32>,

    /// Classifier-free guidance scale
    pub guidance_scale: Option<f64>,

    /// How strongly a guided run follows the chart (img2img denoising)
    pub conditioning_strength: Option<f64>,

    /// Probability of a chart-guided run
    pub guided_probability: Option<f64>,

    /// Negative prompt
    pub negative_prompt: Option<String>,

    /// HTTP timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionToml {
    /// Display configuration section
    pub display: DisplayToml,

    /// Refresh configuration section
    pub refresh: RefreshToml,

    /// Stock configuration section
    pub stock: StockToml,

    /// Chart configuration section
    pub chart: ChartToml,

    /// Synthesis configuration section
    pub synthesis: SynthesisToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Render loop and crossfade settings
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayConfig {
    /// Ticks per second
    pub tick_rate_hz: u32,
    /// Crossfade length
    pub transition_duration: Duration,
    /// Output width in pixels (0 = follow the terminal)
    pub output_width: u32,
    /// Output height in pixels (0 = follow the terminal)
    pub output_height: u32,
    /// Loading screen fill
    pub background_color: [u8; 3],
    /// Mid-transition carryover policy
    pub transition_carryover: BlendCarryover,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            transition_duration: Duration::from_secs(2),
            output_width: 0,
            output_height: 0,
            background_color: [18, 18, 24],
            transition_carryover: BlendCarryover::Discard,
        }
    }
}

impl DisplayConfig {
    /// Time between ticks
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

/// Scheduling settings
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshConfig {
    /// Time between periodic refreshes
    pub interval: Duration,
    /// Whether cycles start with synthesis enabled
    pub synthesis_enabled: bool,
    /// Where to dump debug images
    pub debug_dir: Option<PathBuf>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            synthesis_enabled: true,
            debug_dir: None,
        }
    }
}

/// Market data settings
#[derive(Clone, Debug, PartialEq)]
pub struct StockConfig {
    /// Ticker symbol
    pub symbol: String,
    /// History range
    pub chart_range: String,
    /// Base URL of the chart API
    pub api_base: String,
    /// HTTP timeout
    pub timeout: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            symbol: "NVDA".to_string(),
            chart_range: "1mo".to_string(),
            api_base: "https://query1.finance.yahoo.com".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Control visual settings
#[derive(Clone, Debug, PartialEq)]
pub struct ChartConfig {
    /// Render width in pixels
    pub width: u32,
    /// Render height in pixels
    pub height: u32,
    /// Line or candle chart
    pub chart_type: ChartType,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            chart_type: ChartType::Line,
        }
    }
}

/// Image synthesis settings
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Sampling steps
    pub steps: u32,
    /// Guidance scale
    pub guidance_scale: f64,
    /// img2img denoising strength for guided runs
    pub conditioning_strength: f64,
    /// Probability of a chart-guided run
    pub guided_probability: f64,
    /// Negative prompt
    pub negative_prompt: String,
    /// HTTP timeout
    pub timeout: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
            steps: 30,
            guidance_scale: 7.5,
            conditioning_strength: 0.55,
            guided_probability: 0.7,
            negative_prompt: "text, watermark, signature, lowres, blurry, deformed, chart, graph, numbers"
                .to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl SynthesisConfig {
    /// Base URL of the synthesis server
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Centralized configuration for stockvision
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct VisionConfig {
    /// Display settings
    pub display: DisplayConfig,

    /// Scheduling settings
    pub refresh: RefreshConfig,

    /// Market data settings
    pub stock: StockConfig,

    /// Chart settings
    pub chart: ChartConfig,

    /// Synthesis settings
    pub synthesis: SynthesisConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl VisionConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        let rate = self.display.tick_rate_hz;
        if rate == 0 || rate > MAX_TICK_RATE_HZ {
            return invalid(format!(
                "display.tick_rate_hz must be between 1 and {MAX_TICK_RATE_HZ}, got {rate}"
            ));
        }
        if self.refresh.interval.is_zero() {
            return invalid("refresh.interval_secs must be at least 1".to_string());
        }
        for (name, edge) in [("width", self.chart.width), ("height", self.chart.height)] {
            if edge == 0 || edge > MAX_CHART_EDGE {
                return invalid(format!(
                    "chart.{name} must be between 1 and {MAX_CHART_EDGE}, got {edge}"
                ));
            }
        }
        for (name, value) in [
            ("guided_probability", self.synthesis.guided_probability),
            ("conditioning_strength", self.synthesis.conditioning_strength),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!(
                    "synthesis.{name} must be between 0 and 1, got {value}"
                ));
            }
        }
        if self.stock.symbol.trim().is_empty() {
            return invalid("stock.symbol must not be empty".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stockvision/config.toml` or
/// `~/.config/stockvision/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stockvision").join("config.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged values are out of range. A missing config file is not an error.
pub fn load_config() -> Result<VisionConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged values fail [`VisionConfig::validate`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<VisionConfig, ConfigError> {
    let mut config = VisionConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: VisionToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

fn seconds(value: f64, field: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::ValidationError(format!("{field} must be a non-negative number, got {value}"))
    })
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut VisionConfig, toml: &VisionToml) -> Result<(), ConfigError> {
    // Display settings
    if let Some(rate) = toml.display.tick_rate_hz {
        config.display.tick_rate_hz = rate;
    }
    if let Some(secs) = toml.display.transition_duration_secs {
        config.display.transition_duration = seconds(secs, "display.transition_duration_secs")?;
    }
    if let Some(width) = toml.display.output_width {
        config.display.output_width = width;
    }
    if let Some(height) = toml.display.output_height {
        config.display.output_height = height;
    }
    if let Some(color) = toml.display.background_color {
        config.display.background_color = color;
    }
    if let Some(carryover) = toml.display.transition_carryover {
        config.display.transition_carryover = carryover;
    }

    // Refresh settings
    if let Some(secs) = toml.refresh.interval_secs {
        config.refresh.interval = Duration::from_secs(secs);
    }
    if let Some(enabled) = toml.refresh.synthesis_enabled {
        config.refresh.synthesis_enabled = enabled;
    }
    if toml.refresh.debug_dir.is_some() {
        config.refresh.debug_dir = toml.refresh.debug_dir.clone();
    }

    // Stock settings
    if let Some(ref symbol) = toml.stock.symbol {
        config.stock.symbol = symbol.to_uppercase();
    }
    if let Some(ref range) = toml.stock.chart_range {
        config.stock.chart_range = range.clone();
    }
    if let Some(ref base) = toml.stock.api_base {
        config.stock.api_base = base.trim_end_matches('/').to_string();
    }
    if let Some(secs) = toml.stock.timeout_secs {
        config.stock.timeout = Duration::from_secs(secs);
    }

    // Chart settings
    if let Some(width) = toml.chart.width {
        config.chart.width = width;
    }
    if let Some(height) = toml.chart.height {
        config.chart.height = height;
    }
    if let Some(chart_type) = toml.chart.chart_type {
        config.chart.chart_type = chart_type;
    }

    // Synthesis settings
    if let Some(ref host) = toml.synthesis.host {
        config.synthesis.host = host.clone();
    }
    if let Some(port) = toml.synthesis.port {
        config.synthesis.port = port;
    }
    if let Some(steps) = toml.synthesis.steps {
        config.synthesis.steps = steps;
    }
    if let Some(scale) = toml.synthesis.guidance_scale {
        config.synthesis.guidance_scale = scale;
    }
    if let Some(strength) = toml.synthesis.conditioning_strength {
        config.synthesis.conditioning_strength = strength;
    }
    if let Some(probability) = toml.synthesis.guided_probability {
        config.synthesis.guided_probability = probability;
    }
    if let Some(ref negative) = toml.synthesis.negative_prompt {
        config.synthesis.negative_prompt = negative.clone();
    }
    if let Some(secs) = toml.synthesis.timeout_secs {
        config.synthesis.timeout = Duration::from_secs(secs);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut VisionConfig) {
    apply_env_with(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup
///
/// Unparseable values are logged and ignored.
fn apply_env_with(config: &mut VisionConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let value = raw.trim().parse().ok();
        if value.is_none() {
            tracing::warn!(key, value = raw, "Ignoring unparseable environment variable");
        }
        value
    }

    if let Some(symbol) = lookup("STOCKVISION_SYMBOL") {
        config.stock.symbol = symbol.trim().to_uppercase();
        config.source = ConfigSource::Env;
    }
    if let Some(raw) = lookup("STOCKVISION_TICK_RATE") {
        if let Some(rate) = parsed::<u32>("STOCKVISION_TICK_RATE", &raw) {
            config.display.tick_rate_hz = rate;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("STOCKVISION_REFRESH_INTERVAL") {
        if let Some(secs) = parsed::<u64>("STOCKVISION_REFRESH_INTERVAL", &raw) {
            config.refresh.interval = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("STOCKVISION_TRANSITION_SECS") {
        let duration = parsed::<f64>("STOCKVISION_TRANSITION_SECS", &raw)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        if let Some(duration) = duration {
            config.display.transition_duration = duration;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(host) = lookup("STOCKVISION_SD_HOST") {
        config.synthesis.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(raw) = lookup("STOCKVISION_SD_PORT") {
        if let Some(port) = parsed::<u16>("STOCKVISION_SD_PORT", &raw) {
            config.synthesis.port = port;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("STOCKVISION_NO_SYNTHESIS") {
        let disabled = raw != "0" && raw.to_lowercase() != "false";
        config.refresh.synthesis_enabled = !disabled;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`VisionConfig::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Ticker symbol override
    pub symbol: Option<String>,

    /// Tick rate override
    pub tick_rate_hz: Option<u32>,

    /// Refresh interval override (seconds)
    pub interval_secs: Option<u64>,

    /// Synthesis enabled override
    pub synthesis_enabled: Option<bool>,

    /// Debug image directory override
    pub debug_dir: Option<PathBuf>,

    /// Chart type override
    pub chart_type: Option<ChartType>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set symbol override
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Set tick rate override
    #[must_use]
    pub fn with_tick_rate_hz(mut self, rate: u32) -> Self {
        self.tick_rate_hz = Some(rate);
        self
    }

    /// Set refresh interval override
    #[must_use]
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    /// Set synthesis enabled override
    #[must_use]
    pub fn with_synthesis_enabled(mut self, enabled: bool) -> Self {
        self.synthesis_enabled = Some(enabled);
        self
    }

    /// Set debug directory override
    #[must_use]
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    /// Set chart type override
    #[must_use]
    pub fn with_chart_type(mut self, chart_type: ChartType) -> Self {
        self.chart_type = Some(chart_type);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.tick_rate_hz.is_none()
            && self.interval_secs.is_none()
            && self.synthesis_enabled.is_none()
            && self.debug_dir.is_none()
            && self.chart_type.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut VisionConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref symbol) = self.symbol {
            config.stock.symbol = symbol.to_uppercase();
        }
        if let Some(rate) = self.tick_rate_hz {
            config.display.tick_rate_hz = rate;
        }
        if let Some(secs) = self.interval_secs {
            config.refresh.interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.synthesis_enabled {
            config.refresh.synthesis_enabled = enabled;
        }
        if let Some(ref dir) = self.debug_dir {
            config.refresh.debug_dir = Some(dir.clone());
        }
        if let Some(chart_type) = self.chart_type {
            config.chart.chart_type = chart_type;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
