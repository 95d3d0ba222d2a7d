use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No images matched, or the camera could not be opened.
    #[error("no input: {0}")]
    NoInput(String),
    #[error("no qualifying board detection")]
    NoDetection,
    #[error("no image produced a qualifying board detection")]
    InsufficientCalibrationData,
    #[error("pose solve did not converge")]
    PoseSolveFailure,
    #[error("could not decode image {}", .0.display())]
    UnreadableImage(PathBuf),
    #[error("{object} board points but {observed} observed points")]
    PointCountMismatch { object: usize, observed: usize },
    #[error("unknown marker dictionary id {0}")]
    InvalidDictionary(i32),
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
