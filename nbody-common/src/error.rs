use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the rendering pipeline.
///
/// Library functions return `anyhow::Result`; the root cause of every
/// pipeline failure is one of these variants, so callers can classify an
/// error with `err.downcast_ref::<VisError>()`.
#[derive(Error, Debug)]
pub enum VisError {
    // Input errors
    #[error("snapshot store not found: {}", .0.display())]
    StoreNotFound(PathBuf),
    #[error("malformed snapshot store: {0}")]
    Schema(String),
    #[error("no frame images in {}", .0.display())]
    EmptyFrameDir(PathBuf),
    #[error("cannot read frame {}: {reason}", .path.display())]
    FrameUnreadable { path: PathBuf, reason: String },
    #[error(
        "frame {} is {}x{} but the video is {}x{}; pass an explicit resolution to resize",
        .path.display(), .found.0, .found.1, .expected.0, .expected.1
    )]
    FrameSizeMismatch {
        path: PathBuf,
        expected: (u32, u32),
        found: (u32, u32),
    },
    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    // Resource errors
    #[error("resource failure: {0}")]
    Resource(String),
}

/// Coarse grouping used when reporting a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Configuration,
    Resource,
}

impl VisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisError::StoreNotFound(_)
            | VisError::Schema(_)
            | VisError::EmptyFrameDir(_)
            | VisError::FrameUnreadable { .. }
            | VisError::FrameSizeMismatch { .. } => ErrorKind::Input,
            VisError::InvalidConfig(_) => ErrorKind::Configuration,
            VisError::Resource(_) => ErrorKind::Resource,
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        VisError::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        VisError::InvalidConfig(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        VisError::Resource(msg.into())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(VisError::StoreNotFound("x.bin".into()).kind(), ErrorKind::Input);
        assert_eq!(VisError::schema("missing N").kind(), ErrorKind::Input);
        assert_eq!(VisError::config("rows must be positive").kind(), ErrorKind::Configuration);
        assert_eq!(VisError::resource("encoder").kind(), ErrorKind::Resource);
    }

    #[test]
    fn survives_anyhow_context() {
        use anyhow::Context;
        let res: Result<(), VisError> = Err(VisError::EmptyFrameDir("frames".into()));
        let err = res.context("assembling video").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VisError>(),
            Some(VisError::EmptyFrameDir(_))
        ));
    }
}
