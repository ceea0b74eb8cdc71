//! Colour theming for CLI output.
//!
//! One semantic palette feeds both `owo_colors` (terminal text) and
//! `comfy_table` (tables). Colours are disabled by `--no-color` or the
//! `NO_COLOR` environment variable; every helper then returns plain text.

use crate::store::JobState;
use owo_colors::{OwoColorize, Style};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colours. Call early in `main`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic colour categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    JobId,
    Pending,
    Locked,
    Completed,
    NotConverged,
    Energy,
    Label,
    Muted,
}

impl Semantic {
    /// Category used to display a job state.
    pub fn for_state(state: JobState, converged: Option<bool>) -> Self {
        match (state, converged) {
            (JobState::Completed, Some(false)) => Self::NotConverged,
            (JobState::Completed, _) => Self::Completed,
            (JobState::Pending, _) => Self::Pending,
            (JobState::Locked, _) => Self::Locked,
            (JobState::Ineligible, _) => Self::Muted,
        }
    }
}

/// Table colour for a category, `None` when colours are off.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    if !colors_enabled() {
        return None;
    }
    Some(match semantic {
        Semantic::JobId => comfy_table::Color::Cyan,
        Semantic::Pending => comfy_table::Color::Yellow,
        Semantic::Locked => comfy_table::Color::Magenta,
        Semantic::Completed => comfy_table::Color::Green,
        Semantic::NotConverged => comfy_table::Color::Red,
        Semantic::Energy => comfy_table::Color::Reset,
        Semantic::Label => comfy_table::Color::Blue,
        Semantic::Muted => comfy_table::Color::DarkGrey,
    })
}

/// Semantic colouring for `comfy_table` cells.
pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

fn paint<T: Display + ?Sized>(value: &T, style: Style) -> String {
    if colors_enabled() {
        value.style(style).to_string()
    } else {
        value.to_string()
    }
}

/// Semantic colouring for terminal text.
pub trait Themed: Display {
    fn job_id(&self) -> String {
        paint(self, Style::new().cyan())
    }

    fn success(&self) -> String {
        paint(self, Style::new().green().bold())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn error_style(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    fn label(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }

    fn section_header(&self) -> String {
        paint(self, Style::new().bold().underline())
    }

    fn count(&self) -> String {
        paint(self, Style::new().cyan())
    }
}

impl<T: Display + ?Sized> Themed for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_colors() {
        COLORS_ENABLED.store(true, Ordering::Relaxed);
        owo_colors::set_override(true);
    }

    #[test]
    #[serial(colors)]
    fn test_themed_with_colors() {
        reset_colors();
        let colored = "17".job_id();
        assert!(colored.contains("\x1b["), "Expected ANSI escape codes");
        assert!(colored.contains("17"));
        assert!(42usize.count().contains("42"));
    }

    #[test]
    #[serial(colors)]
    fn test_themed_without_colors() {
        reset_colors();
        disable_colors();
        assert!(!colors_enabled());

        assert_eq!("x".job_id(), "x");
        assert_eq!("x".success(), "x");
        assert_eq!("x".warning(), "x");
        assert_eq!("x".error_style(), "x");
        assert_eq!("x".section_header(), "x");
        assert_eq!((-3.5f64).muted(), "-3.5");

        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_table_color() {
        reset_colors();
        assert_eq!(
            table_color(Semantic::Completed),
            Some(comfy_table::Color::Green)
        );
        assert_eq!(
            table_color(Semantic::NotConverged),
            Some(comfy_table::Color::Red)
        );

        disable_colors();
        assert_eq!(table_color(Semantic::JobId), None);
        let cell = comfy_table::Cell::new("7").themed(Semantic::JobId);
        assert_eq!(cell.content(), "7");

        reset_colors();
    }

    #[test]
    fn test_semantic_for_state() {
        assert_eq!(
            Semantic::for_state(JobState::Completed, Some(false)),
            Semantic::NotConverged
        );
        assert_eq!(
            Semantic::for_state(JobState::Completed, Some(true)),
            Semantic::Completed
        );
        assert_eq!(Semantic::for_state(JobState::Locked, None), Semantic::Locked);
        assert_eq!(Semantic::for_state(JobState::Ineligible, None), Semantic::Muted);
    }
}
