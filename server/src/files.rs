//! Local file collaborator: batch output for pull, message input for send.

use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Longest line accepted from a message file.
pub const MAX_LINE_LENGTH: usize = 64 * 5120;

/// Where pulled batches are written.
///
/// Fields are optional so a partial `[output]` config section deserializes.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Output directory (default: `sb-shovel-output`)
    directory: Option<PathBuf>,
    /// File name prefix (default: `sb_output_`)
    prefix: Option<String>,
    /// File extension without the dot (default: `txt`)
    extension: Option<String>,
}

impl OutputSettings {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Self::default()
        }
    }

    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("sb-shovel-output"))
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("sb_output_")
    }

    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or("txt")
    }

    /// `<directory>/<prefix><index:06>.<extension>`
    pub fn batch_path(&self, index: usize) -> PathBuf {
        self.directory().join(format!(
            "{}{:06}.{}",
            self.prefix(),
            index,
            self.extension()
        ))
    }
}

/// Sink for batches of pulled message payloads.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Makes the destination ready. Called once before the first batch.
    async fn prepare(&self) -> ServiceBusResult<()>;

    /// Writes one batch. Indices start at 1 and increase by one per batch.
    async fn write_batch(&self, index: usize, lines: Vec<String>) -> ServiceBusResult<()>;
}

/// Writes each batch to its own newline-delimited file.
///
/// An existing file with the same name is overwritten.
#[derive(Debug, Clone)]
pub struct FileBatchWriter {
    settings: OutputSettings,
}

impl FileBatchWriter {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }
}

#[async_trait]
impl BatchWriter for FileBatchWriter {
    async fn prepare(&self) -> ServiceBusResult<()> {
        let directory = self.settings.directory();
        fs::create_dir_all(&directory).await.map_err(|e| {
            ServiceBusError::Io(format!("cannot create {}: {e}", directory.display()))
        })
    }

    async fn write_batch(&self, index: usize, lines: Vec<String>) -> ServiceBusResult<()> {
        let path = self.settings.batch_path(index);
        log::debug!("Writing {} lines to {}", lines.len(), path.display());

        let file = fs::File::create(&path).await.map_err(|e| {
            ServiceBusError::Io(format!("cannot create {}: {e}", path.display()))
        })?;
        let mut writer = BufWriter::with_capacity(MAX_LINE_LENGTH, file);
        for line in &lines {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Reads a newline-delimited message file. Blank lines are skipped.
pub async fn read_lines(path: &Path) -> ServiceBusResult<Vec<Vec<u8>>> {
    let file = fs::File::open(path).await.map_err(|e| {
        ServiceBusError::Io(format!("no file found at {}: {e}", path.display()))
    })?;

    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buffer = Vec::new();
    let mut line_number = 0usize;

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        line_number += 1;

        while matches!(buffer.last(), Some(b'\n' | b'\r')) {
            buffer.pop();
        }
        if buffer.len() > MAX_LINE_LENGTH {
            return Err(ServiceBusError::Io(format!(
                "line {line_number} of {} exceeds {MAX_LINE_LENGTH} bytes",
                path.display()
            )));
        }
        if !buffer.is_empty() {
            lines.push(buffer.clone());
        }
    }
    Ok(lines)
}
