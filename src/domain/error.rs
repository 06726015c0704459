//! Domain error types.

/// A condition-DSL error with the path of the offending node.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("condition error at {path}: {message}")]
pub struct DslError {
    pub path: String,
    pub message: String,
}

impl DslError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Broad error class used for exit codes and run-status decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Config,
    Persistence,
    Definition,
    Data,
    Simulation,
}

/// Top-level error type for stratprobe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    // Data
    #[error("no data for {symbol} ({timeframe})")]
    NoData { symbol: String, timeframe: String },

    #[error("insufficient data for {symbol} ({timeframe}): have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        timeframe: String,
        bars: usize,
        minimum: usize,
    },

    #[error("missing indicator column {column} for {symbol} ({timeframe})")]
    MissingIndicator {
        symbol: String,
        timeframe: String,
        column: String,
    },

    #[error("indicator column {column} for {symbol} ({timeframe}) has no usable values")]
    InsufficientLookback {
        symbol: String,
        timeframe: String,
        column: String,
    },

    #[error("malformed bar series: {reason}")]
    MalformedSeries { reason: String },

    // Definition
    #[error(transparent)]
    Dsl(#[from] DslError),

    #[error("invalid strategy {strategy}: {reason}")]
    DefinitionInvalid { strategy: String, reason: String },

    #[error("unknown strategy id {id}")]
    UnknownStrategy { id: u32 },

    // Simulation
    #[error("simulation failed for {combination}: {reason}")]
    SimulationFailure { combination: String, reason: String },

    #[error("simulation cancelled")]
    Cancelled,

    // Persistence
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("persistence failed after {attempts} attempts: {reason}")]
    PersistenceExhausted { attempts: u32, reason: String },

    // Config
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProbeError::NoData { .. }
            | ProbeError::InsufficientData { .. }
            | ProbeError::MissingIndicator { .. }
            | ProbeError::InsufficientLookback { .. }
            | ProbeError::MalformedSeries { .. } => ErrorCategory::Data,
            ProbeError::Dsl(_)
            | ProbeError::DefinitionInvalid { .. }
            | ProbeError::UnknownStrategy { .. } => ErrorCategory::Definition,
            ProbeError::SimulationFailure { .. } | ProbeError::Cancelled => {
                ErrorCategory::Simulation
            }
            ProbeError::Database { .. }
            | ProbeError::DatabaseQuery { .. }
            | ProbeError::PersistenceExhausted { .. } => ErrorCategory::Persistence,
            ProbeError::ConfigParse { .. }
            | ProbeError::ConfigMissing { .. }
            | ProbeError::ConfigInvalid { .. } => ErrorCategory::Config,
            ProbeError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Only transient persistence failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeError::Database { .. } | ProbeError::DatabaseQuery { .. }
        )
    }
}

impl From<&ProbeError> for std::process::ExitCode {
    fn from(err: &ProbeError) -> Self {
        let code: u8 = match err.category() {
            ErrorCategory::Io => 1,
            ErrorCategory::Config => 2,
            ErrorCategory::Persistence => 3,
            ErrorCategory::Definition => 4,
            ErrorCategory::Data => 5,
            ErrorCategory::Simulation => 6,
        };
        std::process::ExitCode::from(code)
    }
}
