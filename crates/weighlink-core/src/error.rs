use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    #[error("Invalid device id: {reason}")]
    InvalidDeviceId { reason: String },

    // Classification errors
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("Unknown protocol type: {0}")]
    UnknownProtocolType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
