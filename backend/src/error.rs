use std::fmt;

use thiserror::Error;

/// Which part of a schedule an id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Schedule,
    Campaign,
    AdSet,
    Creative,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Schedule => "schedule",
            Entity::Campaign => "campaign",
            Entity::AdSet => "ad set",
            Entity::Creative => "creative",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no schedule matches {entity} id {id}")]
    NotFound { entity: Entity, id: i64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Ledger or source of record could not be reached.
    #[error("backing service unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound { entity, .. } => match entity {
                Entity::Schedule => "E40400",
                Entity::Campaign => "E40401",
                Entity::AdSet => "E40402",
                Entity::Creative => "E40403",
            },
            AppError::Validation(_) => "E40000",
            AppError::Conflict(_) => "E40900",
            AppError::Unavailable(_) => "E50300",
        }
    }

    /// HTTP-equivalent status for transports that need one.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::Validation(_) => 400,
            AppError::Conflict(_) => 409,
            AppError::Unavailable(_) => 503,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unavailable(err)
    }
}
