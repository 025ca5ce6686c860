//! Command implementations.

pub mod list;
pub mod monitor;
pub mod table;

use nftlink::output::OutputFormat;
use nftlink::{Result, Session};
use std::io::Write;

/// nft probe - report whether batched transactions are supported.
pub async fn probe(session: &mut Session, format: OutputFormat) -> Result<()> {
    let supported = session.batch_supported().await?;
    let mut stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Text => writeln!(
            stdout,
            "batch transactions: {}",
            if supported { "supported" } else { "not supported" }
        )?,
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::json!({ "batch": supported }))?,
    }
    Ok(())
}
