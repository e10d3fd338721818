use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("forge auth failed: {0}")]
    ForgeAuth(String),

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("install failed with exit code {0}")]
    InstallFailed(i32),

    #[error("build failed with exit code {0}")]
    BuildFailed(i32),

    #[error("no build output found to package")]
    NoOutput,

    #[error("artifact upload failed: {0}")]
    ArtifactUpload(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
