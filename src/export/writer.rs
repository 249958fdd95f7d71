//! CSV output sink
//!
//! Writes the header row and one row per source document to a buffered
//! async file. Headers come from the loaded configuration, never from
//! the documents, so excluded fields can never leak into the output.

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{ExportError, Result};

/// CSV row writer over a buffered file.
pub struct CsvSink {
    writer: BufWriter<File>,
    path: String,
    columns: usize,
    rows_written: u64,
}

impl CsvSink {
    /// Create the output file and write the header row.
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `headers` - Column labels, one per configured field
    pub async fn create(path: &str, headers: &[String]) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(ExportError::InvalidPath(path.to_string()).into());
        }
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = File::create(path).await?;
        let mut sink = Self {
            writer: BufWriter::new(file),
            path: path.to_string(),
            columns: headers.len(),
            rows_written: 0,
        };

        let header_line = headers
            .iter()
            .map(|h| escape_cell(h))
            .collect::<Vec<_>>()
            .join(",");
        sink.write_line(&header_line).await?;
        debug!(path, columns = sink.columns, "csv sink created");
        Ok(sink)
    }

    /// Write one data row of pre-formatted cells.
    pub async fn write_row(&mut self, cells: &[String]) -> Result<()> {
        let row = cells
            .iter()
            .map(|cell| escape_cell(cell))
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&row).await?;
        self.rows_written += 1;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ExportError::WriteFailed(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| ExportError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Flush buffered rows to disk. Called after every batch so an
    /// interrupted export leaves complete rows behind.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| ExportError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Flush and report totals.
    pub async fn finalize(&mut self) -> Result<u64> {
        self.flush().await?;
        debug!(path = %self.path, rows = self.rows_written, "csv sink finalized");
        Ok(self.rows_written)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Quote a cell when needed and defuse values a naive reader would
/// misparse. A trailing backslash directly before the closing quote
/// makes some parsers swallow the quote and merge the next field, so
/// such values get a harmless trailing space.
fn escape_cell(value: &str) -> String {
    let needs_quoting = value.contains(',')
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if !needs_quoting {
        if value.ends_with('\\') {
            return format!("\"{value} \"");
        }
        return value.to_string();
    }

    let mut escaped = value.replace('"', "\"\"");
    if escaped.ends_with('\\') {
        escaped.push(' ');
    }
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("simple"), "simple");
        assert_eq!(escape_cell("with,comma"), "\"with,comma\"");
        assert_eq!(escape_cell("with\"quote"), "\"with\"\"quote\"");
        assert_eq!(escape_cell("with\nnewline"), "\"with\nnewline\"");
    }

    #[test]
    fn test_escape_cell_defuses_trailing_backslash() {
        assert_eq!(escape_cell("C:\\path\\"), "\"C:\\path\\ \"");
        assert_eq!(escape_cell("a,b\\"), "\"a,b\\ \"");
        // A backslash elsewhere needs no treatment
        assert_eq!(escape_cell("a\\b"), "a\\b");
    }

    #[tokio::test]
    async fn test_sink_writes_header_and_rows() {
        let path = "test_sink_basic.csv";
        let headers = vec!["Name".to_string(), "City".to_string()];
        let mut sink = CsvSink::create(path, &headers).await.unwrap();

        sink.write_row(&["Ann".to_string(), "Oslo".to_string()])
            .await
            .unwrap();
        sink.write_row(&["Bob".to_string(), String::new()])
            .await
            .unwrap();
        let rows = sink.finalize().await.unwrap();
        assert_eq!(rows, 2);

        let content = fs::read_to_string(path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["Name,City", "Ann,Oslo", "Bob,"]);

        fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_sink_quotes_special_cells() {
        let path = "test_sink_special.csv";
        let headers = vec!["Text".to_string()];
        let mut sink = CsvSink::create(path, &headers).await.unwrap();

        sink.write_row(&["Hello, world!".to_string()]).await.unwrap();
        sink.write_row(&["Quote: \"test\"".to_string()]).await.unwrap();
        sink.finalize().await.unwrap();

        let content = fs::read_to_string(path).await.unwrap();
        assert!(content.contains("\"Hello, world!\""));
        assert!(content.contains("\"Quote: \"\"test\"\"\""));

        fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_sink_rejects_empty_path() {
        let headers = vec!["A".to_string()];
        assert!(CsvSink::create("  ", &headers).await.is_err());
    }
}
