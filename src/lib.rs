pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod multipart;
pub mod progress;
pub mod rest_types;
pub mod transport;
pub mod uploader;

pub use dispatch::{ContextReceiver, ContextSender, Dispatcher, Inline, Task, context};

pub use error::{
    DEFAULT_ERROR_MESSAGE, ERROR_ILLEGAL_PARAMETERS, ERROR_OCCURS_EXCEPTION, ERROR_SERVER,
    Outcome, UploadError,
};

pub use listener::{CompletionListener, ProgressListener, completion_fn};

pub use progress::{ProgressEvent, ProgressThrottle};

pub use multipart::FilePart;

pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

pub use uploader::{UploadRequest, Uploader};
