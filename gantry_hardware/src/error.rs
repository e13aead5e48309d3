use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("sensor timeout")]
    Timeout,
    #[error("{0} edge timeout")]
    EdgeTimeout(&'static str),
    #[error("checksum mismatch (got {got:#04x}, expected {expected:#04x})")]
    Checksum { got: u8, expected: u8 },
    #[error("device not ready: {0}")]
    NotReady(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
