use std::io;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Form field the endpoint expects the picture under.
pub const FILE_FIELD_NAME: &str = "files";
pub const PNG_CONTENT_TYPE: &str = "image/png";

const READ_CHUNK_SIZE: usize = 64 * 1024;

pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// The file sent as the single part of a multipart/form-data upload, streamed from disk.
pub struct FilePart {
    file_name: String,
    content_type: String,
    content_length: u64,
    stream: BodyStream,
}

impl FilePart {
    pub async fn open(path: &Path, content_type: &str) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Path has no file name: {}", path.display()))?;

        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let file_len = file
            .metadata()
            .await
            .context("Failed to get file metadata")?
            .len();

        let stream = try_stream! {
            let mut file = file;
            let mut remaining = file_len;
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];

            while remaining > 0 {
                let want = remaining.min(READ_CHUNK_SIZE as u64) as usize;
                let read = file.read(&mut buffer[..want]).await?;
                if read == 0 {
                    Err::<(), _>(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("File ended {remaining} bytes early"),
                    ))?;
                }
                remaining -= read as u64;
                yield Bytes::copy_from_slice(&buffer[..read]);
            }
        };

        Ok(Self::from_stream(file_name, content_type, file_len, Box::pin(stream)))
    }

    /// A part whose bytes come from `stream`, which must yield exactly `content_length` bytes.
    pub fn from_stream(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content_length: u64,
        stream: BodyStream,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content_length,
            stream,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Size of the file itself, excluding the multipart framing.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn map_stream(self, f: impl FnOnce(BodyStream) -> BodyStream) -> Self {
        Self {
            stream: f(self.stream),
            ..self
        }
    }

    pub fn into_stream(self) -> BodyStream {
        self.stream
    }

    /// Builds the form with this file as its only part, stored under `field_name`.
    pub fn into_form(self, field_name: &'static str) -> reqwest::Result<Form> {
        let part = Part::stream_with_length(Body::wrap_stream(self.stream), self.content_length)
            .file_name(self.file_name)
            .mime_str(&self.content_type)?;
        Ok(Form::new().part(field_name, part))
    }
}
