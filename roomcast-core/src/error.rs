use thiserror::Error;

/// The engine's error taxonomy.
///
/// Variants are grouped by the kinds described in the design: validation,
/// state, authorization, and external-collaborator failures. Programmer
/// errors (duplicate command registration, a playback built without a
/// timer) are not represented here — they `panic!` at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ---- Validation ----
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("not a valid seek time: {0}")]
    InvalidSeekTime(String),

    #[error("reorder index out of range")]
    ReorderRange,

    #[error("reorder contains a duplicate index")]
    ReorderDuplicate,

    // ---- State ----
    #[error("no stream is currently loaded for your room")]
    NoStreamLoaded,

    #[error("no playback exists for room {0}")]
    NoPlaybackForRoom(String),

    #[error("connection is not in a room")]
    NotInRoom,

    #[error("queue is empty")]
    QueueEmpty,

    #[error("queue is full")]
    QueueFull,

    #[error("item not found")]
    NotFound,

    #[error("a stream already exists for that url")]
    DuplicateStream,

    // ---- Authorization ----
    #[error("authorizer is disabled")]
    AuthorizerDisabled,

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("subject not found")]
    SubjectNotFound,

    #[error("subject is already bound to that role")]
    AlreadyBound,

    #[error("subject is not bound to that role")]
    NotBound,

    #[error("permission denied")]
    PermissionDenied,

    // ---- External ----
    #[error("failed to fetch stream metadata: {0}")]
    MetadataFetchFailed(String),

    #[error("local file is missing: {0}")]
    LocalFileMissing(String),

    #[error("unsupported stream source")]
    UnsupportedSource,

    // ---- Command dispatch ----
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    // ---- Transport ----
    #[error("malformed auth cookie: {0}")]
    Serialization(String),

    // ---- Aggregation ----
    /// Wraps the errors collected from a fan-out operation (merging a queue,
    /// clearing every sub-queue) that must finish the whole pass rather than
    /// stop at the first failure.
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
