//! Theme and Colors
//!
//! The overlay sits on top of arbitrary generated art, so every panel gets a
//! dark backing and text colours are picked for contrast against it.

use ratatui::style::Color;

// ============================================================================
// Market Direction
// ============================================================================

/// Price went up
pub const RISING_GREEN: Color = Color::Rgb(46, 204, 113);

/// Price went down
pub const FALLING_RED: Color = Color::Rgb(231, 76, 60);

/// No change
pub const FLAT_GRAY: Color = Color::Rgb(170, 170, 170);

// ============================================================================
// Panels
// ============================================================================

/// Panel backing
pub const PANEL_BG: Color = Color::Rgb(12, 12, 16);

/// Panel border
pub const PANEL_BORDER: Color = Color::Rgb(70, 70, 85);

/// Headline text (company name, price)
pub const TEXT_BRIGHT: Color = Color::Rgb(240, 240, 240);

/// Labels and secondary text
pub const DIM_GRAY: Color = Color::Rgb(120, 120, 130);

/// Section headers in the details panel
pub const ACCENT_GOLD: Color = Color::Rgb(241, 196, 15);

// ============================================================================
// Status Line
// ============================================================================

/// Progress messages while a cycle runs
pub const PROGRESS_BLUE: Color = Color::Rgb(120, 170, 255);

/// Transient notices
pub const NOTICE_MAGENTA: Color = Color::Rgb(220, 120, 220);

/// Last abort cause
pub const ERROR_RED: Color = Color::Rgb(255, 80, 80);

/// Convert a configured RGB triple
#[must_use]
pub fn rgb([r, g, b]: [u8; 3]) -> Color {
    Color::Rgb(r, g, b)
}
