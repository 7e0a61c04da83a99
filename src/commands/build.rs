//! Build the static site

use anyhow::Result;
use std::path::Path;

use crate::generator::{BuildReport, Generator};
use crate::Sitewright;

/// Full build: copy static files, then render every page into `output`
/// (the configured public directory when `None`)
pub fn run(app: &Sitewright, output: Option<&Path>) -> Result<BuildReport> {
    let start = std::time::Instant::now();
    let output = output.unwrap_or(&app.public_dir);

    tracing::info!("Building {:?} into {:?}", app.base_dir, output);
    let report = Generator::new(app).generate(output)?;

    tracing::info!(
        "Generated {} pages and copied {} static files in {:.2}s",
        report.pages,
        report.static_files,
        start.elapsed().as_secs_f64()
    );

    Ok(report)
}
