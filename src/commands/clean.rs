//! Clean the public directory

use anyhow::{Context, Result};
use std::fs;

use crate::Sitewright;

/// Remove the public directory if it exists
pub fn run(app: &Sitewright) -> Result<()> {
    if app.public_dir.exists() {
        fs::remove_dir_all(&app.public_dir)
            .with_context(|| format!("Failed to delete {:?}", app.public_dir))?;
        tracing::info!("Deleted: {:?}", app.public_dir);
    }

    Ok(())
}
