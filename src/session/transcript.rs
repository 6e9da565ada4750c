use super::*;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only UTF-8 log of what a device sent.
///
/// Incoming bytes are decoded as a stream: invalid sequences are dropped and a
/// character split across two chunks is held back until it completes. The file
/// is created on the first non-empty append, so a node that never answered
/// leaves nothing behind. Every append is flushed before returning.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: Option<File>,
    decoder: Utf8Stream,
    written: u64,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            decoder: Utf8Stream::default(),
            written: 0,
        }
    }

    /// `{output_dir}/{node}_{run_stamp}.txt`
    pub fn for_node(output_dir: &Path, node: &str, run_stamp: &str) -> Self {
        Self::new(output_dir.join(format!("{node}_{run_stamp}.txt")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file exists on disk yet.
    pub fn is_created(&self) -> bool {
        self.file.is_some()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Decodes `data`, writes the text and returns exactly what was written.
    pub async fn append(&mut self, data: &[u8]) -> Result<String, SessionError> {
        let text = self.decoder.decode(data);
        if text.is_empty() {
            return Ok(text);
        }
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            trace!("Transcript created at {}", self.path.display());
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
            self.written += text.len() as u64;
        }
        Ok(text)
    }
}

/// Incremental UTF-8 decoder that skips malformed input.
#[derive(Debug, Default)]
struct Utf8Stream {
    /// Start of a character whose remaining bytes have not arrived yet.
    partial: Vec<u8>,
}

impl Utf8Stream {
    fn decode(&mut self, data: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.partial);
        input.extend_from_slice(data);

        let mut text = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        text.push_str(valid);
                    }
                    match err.error_len() {
                        Some(bad) => rest = &after[bad..],
                        None => {
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}
