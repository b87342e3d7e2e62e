use thiserror::Error;

/// The file is missing or is not a regular file.
pub const ERROR_ILLEGAL_PARAMETERS: i32 = -80000;
/// A fault occurred while building or streaming the request body.
pub const ERROR_OCCURS_EXCEPTION: i32 = -80001;
/// The transport failed or the server answered with something we could not decode.
pub const ERROR_SERVER: i32 = -80002;

pub const DEFAULT_ERROR_MESSAGE: &str = "Picture upload failed, please upload it again";

/// The terminal result of one upload. Exactly one is delivered per upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { url: String },
    Failure { code: i32, message: String },
}

impl Outcome {
    pub fn success(url: impl Into<String>) -> Self {
        Outcome::Success { url: url.into() }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Outcome::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Rejections returned directly from `Uploader::upload_picture`.
///
/// Everything else is reported as an [`Outcome::Failure`] through the completion listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("An upload is already in flight")]
    Busy,
}
