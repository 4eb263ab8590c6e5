use derive_more::Display;

/// Failure classes every subcommand reports through.
///
/// These travel inside [`eyre::Report`]; callers that need to branch on the
/// class use `report.downcast_ref::<DeployError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DeployError {
    /// a required environment variable, argument or input file is absent or unusable
    #[display(fmt = "missing input :: {}", _0)]
    MissingInput(String),
    /// an expected local artifact or remote object does not exist
    #[display(fmt = "not found :: {}", _0)]
    NotFound(String),
    /// more than one local file matched where exactly one was expected
    #[display(fmt = "ambiguous match for [{}] :: {:?}", suffix, candidates)]
    Ambiguous {
        suffix: String,
        candidates: Vec<String>,
    },
    /// the storage or an HTTP api answered with a non-success status
    #[display(fmt = "{} failed [{:?}] :: {}", operation, status, message)]
    RemoteFailure {
        operation: String,
        status: Option<u16>,
        message: String,
    },
}

impl std::error::Error for DeployError {}

impl DeployError {
    pub fn remote(operation: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn is_success_status(status: u16) -> bool {
        (200..300).contains(&status)
    }
}
