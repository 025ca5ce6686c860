//! Output formatting (JSON/text) for nf_tables objects and events.
//!
//! Text output follows the `nft list` layout; JSON output follows the
//! `nft -j` schema closely enough for the usual consumers (an `"nftables"`
//! array of single-key objects).

pub mod monitor;
mod printable;

pub use monitor::{MonitorConfig, MonitorEvent, print_event, print_monitor_start, write_timestamp};

use std::io::Write;

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Show object handles (`nft -a`).
    pub handles: bool,
    /// Don't translate hook numbers and policies into names.
    pub numeric: bool,
    /// Pretty print (for JSON).
    pub pretty: bool,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// Trait for types that can be printed.
pub trait Printable {
    /// Print as plain text.
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()>;

    /// Convert to JSON value.
    fn to_json(&self) -> serde_json::Value;

    /// Print in the specified format.
    fn print<W: Write>(
        &self,
        w: &mut W,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> std::io::Result<()> {
        match format {
            OutputFormat::Text => self.print_text(w, opts),
            OutputFormat::Json => write_json(w, &self.to_json(), opts),
        }
    }
}

/// Print a list of items to `w`, as text lines or as one JSON document.
pub fn print_all<W: Write, T: Printable>(
    w: &mut W,
    items: &[T],
    format: OutputFormat,
    opts: &OutputOptions,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Text => {
            for item in items {
                item.print_text(w, opts)?;
            }
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "nftables": items.iter().map(Printable::to_json).collect::<Vec<_>>()
            });
            write_json(w, &json, opts)
        }
    }
}

fn write_json<W: Write>(
    w: &mut W,
    json: &serde_json::Value,
    opts: &OutputOptions,
) -> std::io::Result<()> {
    if opts.pretty {
        serde_json::to_writer_pretty(&mut *w, json)?;
    } else {
        serde_json::to_writer(&mut *w, json)?;
    }
    writeln!(w)
}
