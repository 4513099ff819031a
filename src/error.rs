use thiserror::Error;


#[derive(Debug, Error)]
pub enum BilinearError {
    #[error("{what} mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("buffer `{buffer}` length mismatch: expected {expected}, got {actual}")]
    BufferLength {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("`{buffer}` element count overflows usize")]
    ElementCountOverflow {
        buffer: &'static str,
    },

    #[error("bilinear interp used before reshape")]
    NotConfigured,

    #[error("unknown operator type `{0}`")]
    UnknownOperator(String),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BilinearError>;
