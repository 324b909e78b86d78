//! Code generation error type.

/// Error type for code generation operations.
///
/// Mirrors the crate's other phase-local error types: a logical failure
/// (invalid or unsupported construct reaching codegen, which should have been
/// caught earlier by the analyzer) and a formatting failure from the
/// underlying `Write` sink.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::Format(e) => write!(f, "code generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}

impl From<&str> for CodeGenError {
    fn from(s: &str) -> Self {
        CodeGenError::Logic(s.to_string())
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}
