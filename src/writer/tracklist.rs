use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::store::TrackingListEntry;

pub const DEFAULT_CSV_NAME: &str = "BAG.tracklist.csv";

/// Dumps tracking list entries as comma-separated text.
#[derive(Debug, Clone, Default)]
pub struct TrackListWriter {
    header: Option<Vec<String>>,
    comment: Option<String>,
}

impl TrackListWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a header line naming each column.
    pub fn with_header(mut self, fields: Vec<String>) -> Self {
        self.header = Some(fields);
        self
    }

    /// Replace the default `# Exported using ...` first line.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Write `entries` to `output` or to [`DEFAULT_CSV_NAME`]. An empty list
    /// produces no file and returns `None`.
    pub fn write(
        &self,
        entries: &[TrackingListEntry],
        output: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        if entries.is_empty() {
            tracing::warn!("nothing to export since the tracking list is empty");
            return Ok(None);
        }

        let output = output.map_or_else(|| PathBuf::from(DEFAULT_CSV_NAME), Path::to_path_buf);
        let file = File::create(&output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        let mut out = BufWriter::new(file);

        match &self.comment {
            Some(comment) => writeln!(out, "{comment}")?,
            None => writeln!(out, "# Exported using BAG tools r{}", env!("CARGO_PKG_VERSION"))?,
        }
        if let Some(fields) = &self.header {
            let names: Vec<_> = fields.iter().map(|f| quote_field(f)).collect();
            writeln!(out, "{}", names.join(","))?;
        }
        // every data column is numeric, so rows need no quoting
        for e in entries {
            writeln!(
                out,
                "{}, {}, {}, {}, {}, {}",
                e.row, e.col, e.depth, e.uncertainty, e.track_code, e.list_series
            )?;
        }
        out.flush()
            .with_context(|| format!("Failed to write {}", output.display()))?;

        tracing::info!("{} entries written to {}", entries.len(), output.display());
        Ok(Some(output))
    }
}

/// Quote a text field if it holds a separator, a quote or a line break.
fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
