//! Error types for the EIP offload engine
//!
//! Errors fall into four classes:
//! - resource exhaustion (`Busy`, `NoMemory`): transient, the caller retries
//! - parameter errors: rejected synchronously at record allocation
//! - hardware-reported errors: delivered through the error callback
//! - lifecycle errors (`Inactive`, `Timeout`)

use thiserror::Error;

/// POSIX error numbers the engine's result codes map onto
pub mod errno {
    /// Argument list too long
    pub const E2BIG: i32 = 7;
    /// Invalid argument
    pub const EINVAL: i32 = 22;
    /// Timer expired
    pub const ETIME: i32 = 62;
    /// Value too large for defined data type
    pub const EOVERFLOW: i32 = 75;
    /// Illegal byte sequence
    pub const EILSEQ: i32 = 84;
    /// Operation not supported
    pub const EOPNOTSUPP: i32 = 95;
    /// Operation canceled
    pub const ECANCELED: i32 = 125;
}

/// Semantic kind of a hardware-reported operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwErrorKind {
    /// Malformed packet, token or record
    InvalidInput,
    /// Token type or transform not supported by the engine
    Unsupported,
    /// Input or output length out of range
    SizeOverflow,
    /// ICV, SPI or padding verification failed
    AuthFailure,
    /// Sequence number or anti-replay check failed
    SequenceFailure,
    /// Record or flow lookup failed in the classification engine
    LookupFailure,
    /// Processing timed out inside the engine
    Timeout,
}

/// Hardware-reported failure of a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hardware error {kind:?} (tr={tr_code}, cle={cle_code}, errno={errno})")]
pub struct HwError {
    /// Classified kind
    pub kind: HwErrorKind,
    /// Fine-grained transform error code from the result descriptor
    pub tr_code: u8,
    /// Coarse classification engine error code from the result descriptor
    pub cle_code: u8,
    /// POSIX error number for callers that speak errno
    pub errno: i32,
}

impl HwError {
    /// Classify the two result descriptor codes; `None` means success.
    ///
    /// A non-zero transform code takes precedence over the classification
    /// code.
    pub fn classify(tr_code: u8, cle_code: u8) -> Option<Self> {
        if tr_code == 0 && cle_code == 0 {
            return None;
        }

        let (kind, errno) = match tr_code {
            0 => Self::classify_cle(cle_code),
            1 | 3 | 4 | 5 | 6 | 8 | 12 => (HwErrorKind::InvalidInput, errno::EINVAL),
            2 => (HwErrorKind::SizeOverflow, errno::E2BIG),
            7 => (HwErrorKind::SizeOverflow, errno::EOVERFLOW),
            9 | 11 | 13 => (HwErrorKind::AuthFailure, errno::ECANCELED),
            10 => (HwErrorKind::SequenceFailure, errno::EILSEQ),
            14 => (HwErrorKind::Timeout, errno::ETIME),
            _ => Self::classify_cle(cle_code),
        };

        Some(Self { kind, tr_code, cle_code, errno })
    }

    fn classify_cle(cle_code: u8) -> (HwErrorKind, i32) {
        match cle_code {
            1 | 2 => (HwErrorKind::Unsupported, errno::EOPNOTSUPP),
            3 | 5..=10 | 12..=16 | 18 | 20..=25 => (HwErrorKind::LookupFailure, errno::ECANCELED),
            _ => (HwErrorKind::InvalidInput, errno::EINVAL),
        }
    }
}

/// EIP engine error type
#[derive(Error, Debug)]
pub enum EipError {
    /// Descriptor ring lacks room for the whole operation
    #[error("engine busy")]
    Busy,

    /// Token or descriptor pool exhausted
    #[error("out of memory: {0}")]
    NoMemory(&'static str),

    /// Algorithm name not present in the service table
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Key length not accepted by the algorithm
    #[error("invalid key length {len} for {algo}")]
    InvalidKeyLength {
        /// Algorithm name
        algo: String,
        /// Rejected length in bytes
        len: usize,
    },

    /// Session or request parameter rejected
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Operation not supported by the record's service
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Record no longer accepts new operations
    #[error("transform record inactive")]
    Inactive,

    /// Bounded wait expired
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Hardware reported an error
    #[error(transparent)]
    Hardware(#[from] HwError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// JSON configuration could not be parsed
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EipError {
    /// Resource exhaustion the caller may simply retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::NoMemory(_))
    }
}

/// Result type for the EIP engine
pub type EipResult<T> = Result<T, EipError>;
