use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{self, Display};

use serde::Serialize;
use warp::http::StatusCode;
use warp::{reject::Rejection, Reply};

#[derive(Debug)]
pub struct QueryError {
    info: String,
    code: Option<String>,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self { info, code: None }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some("23505")
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code.as_deref() == Some("23503")
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Configuration(e) => Self::new(format!("{e}")),
            sqlx::Error::Database(e) => Self {
                code: e.code().map(|c| c.to_string()),
                info: format!("{e}"),
            },
            sqlx::Error::Io(e) => Self::new(format!("{e}")),
            sqlx::Error::Tls(e) => Self::new(format!("{e}")),
            sqlx::Error::Protocol(e) => Self::new(format!("{e}")),
            sqlx::Error::RowNotFound => Self::new(format!("RowNotFound")),
            sqlx::Error::TypeNotFound { type_name } => {
                Self::new(format!("Type not found: {type_name}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                Self::new(format!("Column index out of bounds {index} ({len})"))
            }
            sqlx::Error::ColumnNotFound(e) => Self::new(format!("{e}")),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Decode(e) => Self::new(format!("{e}")),
            sqlx::Error::AnyDriverError(e) => Self::new(format!("{e}")),
            sqlx::Error::PoolTimedOut => Self::new(format!("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(format!("Pool closed")),
            sqlx::Error::WorkerCrashed => Self::new(format!("Worker crashed")),
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            _ => Self::new(format!("Unknown error")),
        }
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info)
    }
}

impl std::error::Error for QueryError {}

/// Field-grouped validation failures. Every violation of a request is
/// collected here before anything is rejected, so a client can fix all
/// fields in one round trip.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationErrors {
    #[serde(flatten)]
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(|messages| messages.as_slice())
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(ValidationErrors),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MissingEntity(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidSession(String),
    #[error("database failure: {0}")]
    Database(#[from] QueryError),
}

impl ApiError {
    /// Single-field validation failure.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        Self::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::AlreadyExists(_) | ApiError::NotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::MissingEntity(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Validation(errors) => {
                serde_json::to_value(errors).unwrap_or_else(|_| serde_json::json!({}))
            }
            ApiError::Database(_) => serde_json::json!({ "detail": "internal server error" }),
            other => serde_json::json!({ "detail": other.to_string() }),
        }
    }
}

impl warp::reject::Reject for ApiError {}

/// Recovery handler for the outer server: renders `ApiError` rejections as
/// JSON with their status code.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(api) = err.find::<ApiError>() {
        let reply = warp::reply::json(&api.body());
        return Ok(warp::reply::with_status(reply, api.status()));
    }

    if err.is_not_found() {
        let reply = warp::reply::json(&serde_json::json!({ "detail": "not found" }));
        return Ok(warp::reply::with_status(reply, StatusCode::NOT_FOUND));
    }

    let reply = warp::reply::json(&serde_json::json!({ "detail": "internal server error" }));
    Ok(warp::reply::with_status(
        reply,
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}
