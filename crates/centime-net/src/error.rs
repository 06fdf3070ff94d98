use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Certificate generation error: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("Rendezvous error: {0}")]
    Rendezvous(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] centime_store::StoreError),

    #[error("Peer state lock poisoned by a panicking task")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, NetError>;
