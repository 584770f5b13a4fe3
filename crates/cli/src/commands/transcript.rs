//! `tandem transcript`: print a stored conversation.

use std::path::Path;

use tandem_memory::{load_file, render_transcript};

pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let messages = load_file(path).await?;
    if messages.is_empty() {
        println!("(no messages in {})", path.display());
        return Ok(());
    }

    let turns = messages.iter().filter(|m| m.as_assistant().is_some()).count();
    tracing::debug!(messages = messages.len(), turns, "Loaded conversation");
    println!("{}", render_transcript(&messages));
    Ok(())
}
