//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use colored::Colorize;
use serde::Serialize;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize source name (cyan)
pub fn colorize_source(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize similarity score (yellow)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.4}", score);
    if use_color {
        text.yellow().to_string()
    } else {
        text
    }
}

/// Colorize facet name (green)
pub fn colorize_facet(text: &str, use_color: bool) -> String {
    if use_color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize headings (bold)
pub fn colorize_heading(text: &str, use_color: bool) -> String {
    if use_color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize secondary text (dimmed)
pub fn colorize_dim(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize failures (red bold)
pub fn colorize_error(text: &str, use_color: bool) -> String {
    if use_color {
        text.red().bold().to_string()
    } else {
        text.to_string()
    }
}

/// Serialize a value as JSON, pretty unless `compact`.
pub fn to_json<T: Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}
