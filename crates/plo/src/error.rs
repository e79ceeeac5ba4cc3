#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listing parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("malformed instruction '{text}': {message}")]
    Instruction { text: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
