use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    RelationNotFound,
    RelationAlreadyExists,
    SourceNotFound,
    TargetNotFound,
    SelfRelation,
    InvalidRelation,
    CorruptStore,
    StoreFailure,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::RelationNotFound => "E2001",
            Self::RelationAlreadyExists => "E2002",
            Self::SourceNotFound => "E2003",
            Self::TargetNotFound => "E2004",
            Self::SelfRelation => "E2005",
            Self::InvalidRelation => "E2006",
            Self::CorruptStore => "E3001",
            Self::StoreFailure => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::RelationNotFound => "Relation not found",
            Self::RelationAlreadyExists => "Relation already exists",
            Self::SourceNotFound => "Relation source not found",
            Self::TargetNotFound => "Relation target not found",
            Self::SelfRelation => "Relation source equals target",
            Self::InvalidRelation => "Invalid relation",
            Self::CorruptStore => "Corrupt value in relation store",
            Self::StoreFailure => "Relation store failure",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `relgraph init` to create the relation store."),
            Self::ConfigParseError => Some("Fix syntax in .relgraph/config.toml and retry."),
            Self::RelationNotFound => Some("Check the tenant and external id, or create the relation first."),
            Self::RelationAlreadyExists => {
                Some("Use an upsert or update instead of create for existing external ids.")
            }
            Self::SourceNotFound | Self::TargetNotFound => {
                Some("Register the business partner for this tenant before relating it.")
            }
            Self::SelfRelation => Some("Relate two different business partners."),
            Self::InvalidRelation => Some(
                "Provide at most one validity state with validFrom before validTo and type ACTIVE or INACTIVE.",
            ),
            Self::CorruptStore => Some("Inspect the store file; it was modified outside relgraph."),
            Self::StoreFailure => None,
            Self::LockContention => Some("Retry after the other writer releases the store lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures raised by the relation engine.
///
/// Every variant aborts the enclosing transaction. None of them is retried
/// internally.
#[derive(Debug, thiserror::Error)]
pub enum RelationError {
    #[error("relation with external id '{external_id}' already exists")]
    AlreadyExists { external_id: String },

    #[error("relation with external id '{external_id}' not found")]
    NotFound { external_id: String },

    #[error("relation source '{reference}' not found in {scope}")]
    SourceNotFound { reference: String, scope: String },

    #[error("relation target '{reference}' not found in {scope}")]
    TargetNotFound { reference: String, scope: String },

    #[error("source and target '{id}' should not be equal")]
    SelfRelation { id: String },

    #[error("invalid relation: {reason}")]
    InvalidRelation { reason: String },

    #[error("corrupt value in column {column}: '{value}'")]
    Corrupt { column: &'static str, value: String },

    #[error("relation store: {0}")]
    Store(#[from] rusqlite::Error),
}

impl RelationError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRelation {
            reason: reason.into(),
        }
    }

    /// Scope label used by tenant-scoped lookups.
    pub(crate) fn tenant_scope(tenant_id: &str) -> String {
        format!("tenant '{tenant_id}'")
    }

    /// Map the error onto its stable [`ErrorCode`].
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::AlreadyExists { .. } => ErrorCode::RelationAlreadyExists,
            Self::NotFound { .. } => ErrorCode::RelationNotFound,
            Self::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            Self::TargetNotFound { .. } => ErrorCode::TargetNotFound,
            Self::SelfRelation { .. } => ErrorCode::SelfRelation,
            Self::InvalidRelation { .. } => ErrorCode::InvalidRelation,
            Self::Corrupt { .. } => ErrorCode::CorruptStore,
            Self::Store(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::DatabaseBusy
                    || failure.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                ErrorCode::LockContention
            }
            Self::Store(_) => ErrorCode::StoreFailure,
        }
    }

    /// Remediation text for operators; falls back to the code summary.
    #[must_use]
    pub fn suggestion(&self) -> String {
        let code = self.error_code();
        code.hint().unwrap_or_else(|| code.message()).to_string()
    }

    /// Whether the caller may reasonably resubmit the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error_code() == ErrorCode::LockContention
    }
}
