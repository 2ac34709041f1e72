//! Key Bindings
//!
//! Maps terminal key presses onto the core's [`Control`] signals.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use stockvision_core::Control;

/// Help text for the status line
pub const KEY_HELP: &str = "r refresh · f details · n synthesis · q quit";

/// Control signal for a key event, if it is bound
///
/// Only key presses count; repeats and releases are ignored.
#[must_use]
pub fn control_for(key: KeyEvent) -> Option<Control> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Esc | KeyCode::Char('q' | 'Q') => Some(Control::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Control::Quit),
        KeyCode::Char('r' | 'R') => Some(Control::ForceRefresh),
        KeyCode::Char('f' | 'F') => Some(Control::ToggleOverlay),
        KeyCode::Char('n' | 'N') => Some(Control::ToggleSynthesis),
        _ => None,
    }
}
