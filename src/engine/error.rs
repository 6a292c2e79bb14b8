use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Entity absent, or existing but not visible to the caller.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Caller lacks rights over an existing, visible entity.
    Forbidden(Ulid),
    /// Malformed input or an illegal state transition.
    BadRequest(String),
    /// The requested window interferes with these approved bookings.
    Conflict(Vec<Ulid>),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(id) => write!(f, "forbidden for user: {id}"),
            EngineError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            EngineError::Conflict(ids) => {
                write!(f, "window already booked by: ")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
