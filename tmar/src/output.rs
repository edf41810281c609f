//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use chrono::DateTime;
use serde::Serialize;
use std::io::{self, Write};
use tmar_core::{ArchiveListing, BlobEntry, ErrorKind, FileRecord, Hash, PackOutcome};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error chain.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

/// Process exit code for a failed command.
///
/// Errors raised by the engine map to a code per kind; anything else is 1.
pub fn result_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<tmar_core::Error>().map(|e| e.kind()) {
        Some(ErrorKind::SourceUnreadable) => 3,
        Some(ErrorKind::DestinationUnwritable) => 4,
        Some(ErrorKind::CorruptArchive) => 5,
        Some(ErrorKind::CodecFailure) => 6,
        Some(ErrorKind::FilesystemError) => 7,
        Some(ErrorKind::InvalidInput) => 8,
        None => 1,
    }
}

/// Render Unix seconds as a UTC timestamp.
pub fn format_mtime(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `pack` command.
#[derive(Debug, Serialize)]
pub struct PackOutput {
    pub success: bool,
    pub result_code: u8,
    pub source: String,
    pub archive: String,
    #[serde(flatten)]
    pub outcome: PackOutcome,
}

/// Output for `unpack` command.
#[derive(Debug, Serialize)]
pub struct UnpackOutput {
    pub success: bool,
    pub result_code: u8,
    pub archive: String,
    pub destination: String,
    pub files: usize,
    pub bytes: u64,
}

/// File entry information for `list` command.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub hash: Hash,
    pub size: u64,
    pub read_only: bool,
    pub modified: u64,
    pub modified_human: String,
}

impl From<FileRecord> for FileInfo {
    fn from(record: FileRecord) -> Self {
        Self {
            modified_human: format_mtime(record.modified),
            path: record.relative_path,
            hash: record.hash,
            size: record.size,
            read_only: record.read_only,
            modified: record.modified,
        }
    }
}

/// Output for `list` command.
#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub success: bool,
    pub result_code: u8,
    pub archive: String,
    pub version: u32,
    pub blobs: Vec<BlobEntry>,
    pub files: Vec<FileInfo>,
}

impl ListOutput {
    pub fn new(archive: String, listing: ArchiveListing) -> Self {
        Self {
            success: true,
            result_code: 0,
            archive,
            version: listing.header.version,
            blobs: listing.blobs,
            files: listing.files.into_iter().map(FileInfo::from).collect(),
        }
    }

    /// One line per file: mode, size, mtime, short hash, path.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let mode = if file.read_only { "r-" } else { "rw" };
            out.push_str(&format!(
                "{} {:>12} {} {} {}\n",
                mode,
                file.size,
                file.modified_human,
                file.hash.short(),
                file.path
            ));
        }
        out.push_str(&format!(
            "{} files, {} blobs\n",
            self.files.len(),
            self.blobs.len()
        ));
        out
    }
}
