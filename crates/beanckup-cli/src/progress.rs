use std::io::{self, Write};

const DEFAULT_WIDTH: usize = 80;

/// Single-line progress renderer. Every update repaints one full-width
/// terminal line in place, so leftovers from a longer previous message never
/// linger and no per-draw length bookkeeping is needed.
pub struct ProgressLine {
    active: bool,
}

impl ProgressLine {
    pub fn new() -> Self {
        ProgressLine { active: false }
    }

    pub fn update(&mut self, message: &str) {
        let width = terminal_width();
        let line = clip_line(message, width);
        print!("\r{line:<width$}");
        let _ = io::stdout().flush();
        self.active = true;
    }

    /// Blank the progress line and park the cursor at its start, so the
    /// next regular print takes its place.
    pub fn finish(&mut self) {
        if self.active {
            let width = terminal_width();
            print!("\r{:width$}\r", "");
            let _ = io::stdout().flush();
        }
        self.active = false;
    }
}

impl Default for ProgressLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Usable line width. The last column stays free so a full line never
/// triggers the terminal's own wrapping.
fn terminal_width() -> usize {
    match std::env::var("COLUMNS").ok().and_then(|v| v.parse::<usize>().ok()) {
        Some(w) if w > 1 => w - 1,
        _ => DEFAULT_WIDTH,
    }
}

/// Cut an over-long message at the line width, marking the cut with a
/// trailing ellipsis.
fn clip_line(message: &str, max_width: usize) -> String {
    let len = message.chars().count();
    if len <= max_width {
        return message.to_string();
    }
    if max_width < 4 {
        return message.chars().take(max_width).collect();
    }
    let head: String = message.chars().take(max_width - 3).collect();
    format!("{head}...")
}
