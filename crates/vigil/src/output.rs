//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one line per item.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::Value;
use tabled::{Table, Tabled, settings::Style};

use vigil_core::Reconciliation;

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Display form of a payload: bare strings unquoted, everything else as JSON.
pub fn format_value(value: Option<&Value>) -> String {
    match value {
        None => "-".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Color ON green and OFF dimmed; other values pass through.
pub fn paint_value(text: &str, color: bool) -> String {
    if !color {
        return text.to_owned();
    }
    match text {
        "ON" => text.green().bold().to_string(),
        "OFF" => text.dimmed().to_string(),
        "-" => text.yellow().to_string(),
        _ => text.to_owned(),
    }
}

/// Short label for a reconciliation outcome, colored when enabled.
pub fn paint_outcome(outcome: Option<Reconciliation>, pending: bool, color: bool) -> String {
    let label = if pending {
        "pending".to_owned()
    } else {
        outcome.map_or_else(|| "-".to_owned(), |o| o.to_string())
    };
    if !color {
        return label;
    }
    match (pending, outcome) {
        (true, _) => label.yellow().to_string(),
        (false, Some(Reconciliation::Confirmed)) => label.green().to_string(),
        (false, Some(Reconciliation::Overridden | Reconciliation::TimedOut)) => {
            label.red().to_string()
        }
        _ => label,
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    plain_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => data.iter().map(&plain_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views don't use
/// the `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    plain_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => plain_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// JSON, pretty or compact. Serialization of plain data cannot fail in
/// practice; an error renders as a JSON error object.
pub fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_render_bare_and_others_as_json() {
        assert_eq!(format_value(Some(&json!("ON"))), "ON");
        assert_eq!(format_value(Some(&json!(25))), "25");
        assert_eq!(format_value(None), "-");
    }

    #[test]
    fn uncolored_output_is_unchanged() {
        assert_eq!(paint_value("ON", false), "ON");
        assert_eq!(paint_outcome(Some(Reconciliation::Confirmed), false, false), "confirmed");
        assert_eq!(paint_outcome(Some(Reconciliation::Confirmed), true, false), "pending");
    }
}
