//! Stock Overlay
//!
//! Text drawn on top of the crossfaded picture:
//!
//! ```text
//! ┌ NVIDIA Corporation ──────┐
//! │ NVDA                     │        ┌ Details ───────────────┐
//! │ $120.91                  │        │ Market cap   2.97T     │
//! │ ▲ +2.43 (+2.05%)         │        │ ...                    │
//! │ Updated 14:05:09         │        └────────────────────────┘
//! └──────────────────────────┘
//!  Synthesizing image…                     r refresh · f details · n synthesis · q quit
//! ```
//!
//! The main panel is always shown once a snapshot has arrived. The details
//! panel (market data plus pipeline diagnostics) is toggled by the user. The
//! bottom row is the status line: progress while a cycle runs, otherwise the
//! latest notice or abort cause.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Widget};
use stockvision_core::{CycleStage, StockSnapshot, Trend};

use crate::input::KEY_HELP;
use crate::theme::{
    ACCENT_GOLD, DIM_GRAY, ERROR_RED, FALLING_RED, FLAT_GRAY, NOTICE_MAGENTA, PANEL_BG,
    PANEL_BORDER, PROGRESS_BLUE, RISING_GREEN, TEXT_BRIGHT,
};

const MAIN_PANEL_WIDTH: u16 = 30;
const MAIN_PANEL_HEIGHT: u16 = 7;
const DETAILS_PANEL_WIDTH: u16 = 40;

/// Pipeline state the overlay reports, gathered by the render loop each tick
#[derive(Clone, Debug, Default)]
pub struct OverlayStatus {
    /// Stage of the running (or last) cycle
    pub stage: CycleStage,
    /// Whether the next cycle runs the synthesizer
    pub synthesis_enabled: bool,
    /// Transient message (e.g., after a toggle)
    pub notice: Option<String>,
    /// Cause of the most recent aborted cycle
    pub last_error: Option<String>,
    /// Completed cycles
    pub cycles_completed: u64,
    /// Aborted cycles
    pub cycles_aborted: u64,
    /// Time until the next periodic refresh (`None` while one is running)
    pub next_refresh_in: Option<Duration>,
    /// What is on screen (e.g., "synthesized (seed 42)")
    pub showing: Option<String>,
}

/// Progress line for a running stage
#[must_use]
pub fn progress_message(stage: CycleStage) -> Option<&'static str> {
    match stage {
        CycleStage::FetchingData => Some("Fetching stock data…"),
        CycleStage::RenderingVisual => Some("Rendering chart…"),
        CycleStage::GeneratingPrompt => Some("Generating prompt…"),
        CycleStage::SynthesizingImage => Some("Synthesizing image…"),
        CycleStage::Applying => Some("Applying…"),
        CycleStage::Idle | CycleStage::Aborted => None,
    }
}

/// Overlay state, owned by the render loop
#[derive(Debug, Default)]
pub struct StockOverlay {
    snapshot: Option<Arc<StockSnapshot>>,
    updated_at: Option<DateTime<Local>>,
    show_details: bool,
}

impl StockOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the snapshot of the latest cycle
    pub fn update(&mut self, snapshot: Arc<StockSnapshot>) {
        self.updated_at = Some(Local::now());
        self.snapshot = Some(snapshot);
    }

    /// Show or hide the details panel; returns the new visibility
    pub fn toggle_debug(&mut self) -> bool {
        self.show_details = !self.show_details;
        self.show_details
    }

    pub fn details_visible(&self) -> bool {
        self.show_details
    }

    pub fn snapshot(&self) -> Option<&StockSnapshot> {
        self.snapshot.as_deref()
    }

    /// Draw the panels and the status line into `buf`
    pub fn draw(&self, buf: &mut Buffer, area: Rect, status: &OverlayStatus) {
        if area.height == 0 || area.width == 0 {
            return;
        }
        let status_row = Rect::new(area.x, area.bottom() - 1, area.width, 1);
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);

        if let Some(snapshot) = &self.snapshot {
            self.draw_main_panel(buf, body, snapshot);
        }
        if self.show_details {
            self.draw_details_panel(buf, body, status);
        }
        draw_status_line(buf, status_row, status);
    }

    /// Draw the placeholder shown before the first artifact arrives
    pub fn draw_loading(&self, buf: &mut Buffer, area: Rect, symbol: &str, status: &OverlayStatus) {
        let message = progress_message(status.stage).unwrap_or("Waiting for the first refresh…");
        let mut lines = vec![
            Line::from(Span::styled(
                format!("stockvision · {symbol}"),
                Style::default().fg(TEXT_BRIGHT).add_modifier(Modifier::BOLD),
            )),
            Line::default(),
            Line::from(Span::styled(message, Style::default().fg(PROGRESS_BLUE))),
        ];
        if let Some(error) = &status.last_error {
            lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(ERROR_RED))));
        }

        let height = u16::try_from(lines.len()).unwrap_or(u16::MAX).min(area.height);
        let top = area.y + (area.height - height) / 2;
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .render(Rect::new(area.x, top, area.width, height), buf);
    }

    fn draw_main_panel(&self, buf: &mut Buffer, area: Rect, snapshot: &StockSnapshot) {
        let panel = clamp_rect(Rect::new(area.x + 1, area.y, MAIN_PANEL_WIDTH, MAIN_PANEL_HEIGHT), area);
        if panel.width < 4 || panel.height < 3 {
            return;
        }

        let trend_color = match snapshot.trend() {
            Trend::Rising => RISING_GREEN,
            Trend::Falling => FALLING_RED,
            Trend::Flat => FLAT_GRAY,
        };
        let arrow = match snapshot.trend() {
            Trend::Rising => "▲",
            Trend::Falling => "▼",
            Trend::Flat => "■",
        };
        let updated = self
            .updated_at
            .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S").to_string());

        let lines = vec![
            Line::from(Span::styled(snapshot.symbol.clone(), Style::default().fg(DIM_GRAY))),
            Line::from(Span::styled(
                format!("${:.2}", snapshot.current_price),
                Style::default().fg(trend_color).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!(
                    "{arrow} {:+.2} ({:+.2}%)",
                    snapshot.price_change, snapshot.price_change_pct
                ),
                Style::default().fg(trend_color),
            )),
            Line::from(Span::styled(format!("Updated {updated}"), Style::default().fg(DIM_GRAY))),
        ];

        Clear.render(panel, buf);
        Paragraph::new(lines)
            .block(panel_block(&snapshot.company_name))
            .render(panel, buf);
    }

    fn draw_details_panel(&self, buf: &mut Buffer, area: Rect, status: &OverlayStatus) {
        let mut lines = Vec::new();

        if let Some(s) = &self.snapshot {
            lines.push(section("Market"));
            lines.push(row("Market cap", s.market_cap.map_or_else(dash, format_large)));
            lines.push(row("Volume", s.volume.map_or_else(dash, format_count)));
            lines.push(row("Avg volume", s.average_volume.map_or_else(dash, format_count)));
            lines.push(row("Open", format!("{:.2}", s.open_price)));
            lines.push(row("High / Low", format!("{:.2} / {:.2}", s.high_price, s.low_price)));
            lines.push(row(
                "Range",
                s.date_range()
                    .map_or_else(dash, |(from, to)| format!("{from} → {to}")),
            ));
            lines.push(row("Data points", s.history.len().to_string()));
            lines.push(row("Fetched", s.fetched_at.format("%H:%M:%S").to_string()));
            lines.push(Line::default());
        }

        lines.push(section("Pipeline"));
        lines.push(row("Stage", status.stage.to_string()));
        lines.push(row(
            "Synthesis",
            if status.synthesis_enabled { "on" } else { "off" }.to_string(),
        ));
        lines.push(row(
            "Cycles",
            format!("{} ok, {} aborted", status.cycles_completed, status.cycles_aborted),
        ));
        lines.push(row(
            "Next refresh",
            status
                .next_refresh_in
                .map_or_else(|| "running".to_string(), |d| format!("{}s", d.as_secs())),
        ));
        lines.push(row("Showing", status.showing.clone().unwrap_or_else(dash)));
        if let Some(error) = &status.last_error {
            lines.push(Line::from(Span::styled(
                format!("Last error: {error}"),
                Style::default().fg(ERROR_RED),
            )));
        }

        let height = u16::try_from(lines.len() + 2).unwrap_or(u16::MAX);
        let x = area.right().saturating_sub(DETAILS_PANEL_WIDTH + 1);
        let panel = clamp_rect(Rect::new(x, area.y, DETAILS_PANEL_WIDTH, height), area);
        if panel.width < 4 || panel.height < 3 {
            return;
        }

        Clear.render(panel, buf);
        Paragraph::new(lines)
            .block(panel_block("Details"))
            .render(panel, buf);
    }
}

fn draw_status_line(buf: &mut Buffer, area: Rect, status: &OverlayStatus) {
    let (text, color) = if let Some(progress) = progress_message(status.stage) {
        (progress.to_string(), PROGRESS_BLUE)
    } else if let Some(notice) = &status.notice {
        (notice.clone(), NOTICE_MAGENTA)
    } else if let Some(error) = &status.last_error {
        (error.clone(), ERROR_RED)
    } else {
        (String::new(), DIM_GRAY)
    };

    let backing = Style::default().bg(PANEL_BG);
    buf.set_style(area, backing);
    buf.set_stringn(
        area.x + 1,
        area.y,
        &text,
        usize::from(area.width.saturating_sub(1)),
        backing.fg(color),
    );

    let help_width = KEY_HELP.chars().count();
    let text_width = text.chars().count();
    if help_width + text_width + 4 <= usize::from(area.width) {
        let help_x = area.right() - u16::try_from(help_width).unwrap_or(area.width) - 1;
        buf.set_string(
            help_x,
            area.y,
            KEY_HELP,
            backing.fg(DIM_GRAY),
        );
    }
}

fn panel_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(PANEL_BORDER))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(TEXT_BRIGHT).add_modifier(Modifier::BOLD),
        ))
        .style(Style::default().bg(PANEL_BG).fg(TEXT_BRIGHT))
}

fn section(title: &str) -> Line<'static> {
    Line::from(Span::styled(title.to_string(), Style::default().fg(ACCENT_GOLD)))
}

fn row(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<12}"), Style::default().fg(DIM_GRAY)),
        Span::raw(value),
    ])
}

fn dash() -> String {
    "-".to_string()
}

fn clamp_rect(rect: Rect, bounds: Rect) -> Rect {
    rect.intersection(bounds)
}

/// Abbreviate a large amount (e.g., market cap) as `2.97T`
#[must_use]
pub fn format_large(value: f64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
    for (scale, suffix) in UNITS {
        if value.abs() >= scale {
            return format!("{:.2}{suffix}", value / scale);
        }
    }
    format!("{value:.0}")
}

/// Group digits of a count: `1234567` → `1,234,567`
#[must_use]
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
