//! stockvision Entry Point
//!
//! Launches the full-screen display.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/stockvision/config.toml
//! stockvision
//!
//! # Another ticker, chart only, refresh every 5 minutes
//! stockvision --symbol AAPL --no-synthesis --interval 300
//!
//! # Keep every control visual and generated image
//! stockvision --debug-dir /tmp/stockvision-debug
//!
//! # Verbose logging (to the log file, the terminal belongs to the UI)
//! RUST_LOG=debug stockvision
//! ```

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use stockvision_core::{
    default_config_path, load_config_from_path, ChartRenderer, ChartType, Collaborators,
    ConfigOverrides, DiffusionHttpSynthesizer, MoodPromptDeriver, VisionConfig,
    YahooFinanceSource,
};
use stockvision_tui::App;

/// stockvision - market data turned into generated art, in your terminal
#[derive(Parser, Debug)]
#[command(name = "stockvision")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "STOCKVISION_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ticker symbol
    #[arg(short = 's', long)]
    symbol: Option<String>,

    /// Seconds between periodic refreshes
    #[arg(short = 'i', long, value_name = "SECS")]
    interval: Option<u64>,

    /// Render loop tick rate
    #[arg(long, value_name = "HZ")]
    fps: Option<u32>,

    /// Show the chart only, never call the image synthesizer
    #[arg(long)]
    no_synthesis: bool,

    /// Chart style (line or candle)
    #[arg(long, value_name = "TYPE")]
    chart: Option<ChartType>,

    /// Dump control visuals and generated images here
    #[arg(long, value_name = "DIR")]
    debug_dir: Option<PathBuf>,

    /// Log file path
    #[arg(long, env = "STOCKVISION_LOG_FILE", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(symbol) = &self.symbol {
            overrides = overrides.with_symbol(symbol.as_str());
        }
        if let Some(secs) = self.interval {
            overrides = overrides.with_interval_secs(secs);
        }
        if let Some(fps) = self.fps {
            overrides = overrides.with_tick_rate_hz(fps);
        }
        if self.no_synthesis {
            overrides = overrides.with_synthesis_enabled(false);
        }
        if let Some(chart) = self.chart {
            overrides = overrides.with_chart_type(chart);
        }
        if let Some(dir) = &self.debug_dir {
            overrides = overrides.with_debug_dir(dir.clone());
        }
        overrides
    }
}

/// Default log file location
///
/// `$XDG_STATE_HOME/stockvision/stockvision.log`, falling back to the local
/// data directory, then the temp directory.
fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("stockvision")
        .join("stockvision.log")
}

/// Initialize file logging
fn init_logging(path: &Path, debug: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {parent:?}"))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {path:?}"))?;

    let level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "stockvision={level},stockvision_tui={level},stockvision_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(())
}

/// Build the default collaborators from the configuration
fn collaborators(config: &VisionConfig) -> Result<Collaborators> {
    Ok(Collaborators {
        source: Arc::new(YahooFinanceSource::from_config(&config.stock)?),
        renderer: Arc::new(ChartRenderer::from_config(&config.chart)),
        prompts: Arc::new(MoodPromptDeriver::new(
            config.synthesis.negative_prompt.clone(),
        )),
        synthesizer: Arc::new(DiffusionHttpSynthesizer::new(config.synthesis.clone())?),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args.log_file.clone().unwrap_or_else(default_log_path);
    init_logging(&log_path, args.debug)?;

    tracing::info!("stockvision starting");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config_from_path(args.config.clone().or_else(default_config_path))?;
    args.overrides().apply(&mut config);
    config.validate()?;
    tracing::info!(source = %config.source(), symbol = %config.stock.symbol, "Configuration resolved");

    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        eprintln!("Error: stockvision requires a terminal (TTY)");
        eprintln!();
        eprintln!("This usually means stdin/stdout are piped or there is no controlling terminal.");
        std::process::exit(1);
    }

    let collaborators = collaborators(&config)?;

    // Restore the terminal before printing a panic
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(config, collaborators);
    let result = app.run(&mut terminal).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(error) = app.pipeline().stats().last_error() {
        println!("Last refresh error: {error} (log: {})", log_path.display());
    }

    result
}
