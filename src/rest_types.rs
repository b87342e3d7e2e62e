use serde::Deserialize;

/// Body returned by the upload endpoint on a 2xx response.
///
/// Missing `code` decodes as 0 and missing `message` as empty, matching what the
/// endpoint's other clients assume.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl UploadResponse {
    /// The uploaded file's URL. A non-empty `result` is the only success signal.
    pub fn uploaded_url(&self) -> Option<&str> {
        self.result.as_deref().filter(|url| !url.is_empty())
    }
}
