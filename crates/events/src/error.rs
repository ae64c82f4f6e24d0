use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("Session {0} already published its terminal event")]
    SessionTerminated(Uuid),
}

pub type Result<T> = std::result::Result<T, EventError>;
