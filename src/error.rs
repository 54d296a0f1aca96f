use thiserror::Error;

#[derive(Error, Debug)]
pub enum WitnessError {
    #[error("User input error: {0}")]
    UserInput(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, WitnessError>;
