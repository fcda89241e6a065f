use thiserror::Error;

/// The six error kinds produced by dispatch-core operations (spec §7).
///
/// Upper layers (the HTTP transport) translate these into status codes and a
/// stable `code` string; they never inspect driver error text directly —
/// `sqlx::Error` is classified into one of these kinds at the store
/// boundary (see `store::postgres`).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {entity}: {detail}")]
    Duplicate { entity: &'static str, detail: String },

    #[error("invalid request: {message}")]
    Invalid { code: &'static str, message: String },

    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("transient failure: {0}")]
    Transient(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound { entity, id: id.into() }
    }

    pub fn duplicate(entity: &'static str, detail: impl Into<String>) -> Self {
        CoreError::Duplicate { entity, detail: detail.into() }
    }

    /// `code` is the stable wire-level string (spec §7/§8, e.g.
    /// `non_monotone_progress`, `agent_exists`, `invalid_agent_key`,
    /// `invalid_transition`); `message` is free text for humans.
    pub fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Invalid { code, message: message.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Conflict { code, message: message.into() }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Unauthorized { code, message: message.into() }
    }

    /// Stable machine-readable code, used verbatim in the `{code, message}`
    /// error body shape (spec §7). For `Invalid`/`Conflict`/`Unauthorized`
    /// this is the specific detail code (e.g. `agent_exists`), not the
    /// coarse kind name.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "not_found",
            CoreError::Duplicate { .. } => "duplicate",
            CoreError::Invalid { code, .. } => code,
            CoreError::Conflict { code, .. } => code,
            CoreError::Unauthorized { code, .. } => code,
            CoreError::Transient(_) => "transient",
        }
    }

    /// HTTP status this kind maps onto (spec §7 table). Kept here, not in
    /// `coordinator-api`, so every caller of the core agrees on the mapping.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::NotFound { .. } => 404,
            CoreError::Duplicate { .. } => 409,
            CoreError::Invalid { .. } => 400,
            CoreError::Conflict { .. } => 409,
            CoreError::Unauthorized { .. } => 401,
            CoreError::Transient(_) => 503,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::not_found("row", "unknown"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoreError::duplicate("row", db_err.message().to_string())
            }
            other => CoreError::Transient(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
