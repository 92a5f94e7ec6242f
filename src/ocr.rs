//! Digit recognition for ticket images.
//!
//! Production recognition shells out to the `tesseract` binary with a
//! digits-only whitelist; the trait seam lets the dispatcher tests swap in
//! a mock.

use crate::state_machine::extract_digit_runs;
use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("failed to run OCR engine: {0}")]
    Spawn(std::io::Error),
    #[error("OCR engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR engine exited with {status}: {stderr}")]
    Engine {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Extracts ticket numbers from an image.
#[async_trait]
pub trait OcrAdapter: Send + Sync {
    /// Returns the digit runs found in the image, in reading order, or
    /// `None` when the image contains no recognizable digits.
    async fn recognize_digits(&self, image: &[u8]) -> Result<Option<Vec<String>>, OcrError>;
}

/// Runs the `tesseract` CLI over stdin/stdout.
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl OcrAdapter for TesseractOcr {
    async fn recognize_digits(&self, image: &[u8]) -> Result<Option<Vec<String>>, OcrError> {
        let mut child = Command::new(&self.command)
            .args([
                "stdin",
                "stdout",
                "--psm",
                "6",
                "-c",
                "tessedit_char_whitelist=0123456789",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(OcrError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            // Dropping stdin closes the pipe so tesseract sees EOF.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OcrError::Engine {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let numbers = extract_digit_runs(&text);
        debug!(count = numbers.len(), "OCR pass finished");
        if numbers.is_empty() {
            Ok(None)
        } else {
            Ok(Some(numbers))
        }
    }
}
