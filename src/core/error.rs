use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Failures surfaced to the user. Per-line audio failures are not part of this
/// taxonomy; they are reported through `AudioReport::failed`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("API key is missing")]
    MissingCredential,

    #[error("upstream request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("not configured: {0}")]
    Configuration(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// HTTP status used by the API endpoints.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::MissingCredential => 401,
            AppError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Human readable message. Input problems, credential problems and
    /// transient provider problems each get a distinct wording.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::MissingCredential => {
                "Please set your API key before generating dialogues.".to_string()
            }
            AppError::Upstream { status, .. } if *status == 401 || *status == 403 => {
                "The provider rejected the API key. Please check your API key.".to_string()
            }
            AppError::Upstream { .. } | AppError::Http(_) => {
                "The provider request failed. Please try again later.".to_string()
            }
            AppError::ResponseFormat(_) => {
                "The generated dialogue had an unexpected format. Please generate again."
                    .to_string()
            }
            AppError::Configuration(what) => {
                format!("The service is not configured correctly: {}", what)
            }
            AppError::NotFound(what) => format!("{} does not exist.", what),
            AppError::Cancelled => "The operation was cancelled.".to_string(),
            AppError::Storage(e) => format!("Could not access saved data: {:#}", e),
        }
    }
}
