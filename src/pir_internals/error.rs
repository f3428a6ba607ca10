use std::{error::Error, fmt::Display};

/// Coarse classification of PIR engine failures.
///
/// Every `PirError` variant falls into exactly one of these categories:
///
/// * `Parameter` - infeasible or insecure parameter combination, fatal at setup.
/// * `State` - an operation was invoked before a prerequisite state transition.
/// * `Protocol` - malformed or mismatched-shape serialized input; the server stays usable.
/// * `Decode` - the reply could not be turned back into the requested record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parameter,
    State,
    Protocol,
    Decode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PirError {
    // Parameter derivation
    UnsupportedRingDegree(usize),
    UnsupportedPlaintextBitWidth { bit_len: usize, min: usize, max: usize },
    NoSuitablePlaintextModulus { bit_len: usize, degree: usize },
    InvalidEncryptionParameters(String),
    InvalidDimensionCount(usize),
    DimensionExtentTooLarge { extent: usize, degree: usize },
    ItemTooLargeForPlaintext { item_byte_len: usize, capacity_byte_len: usize },
    EmptyDatabase,
    InvalidItemByteLength,
    DatabaseShapeMismatch { expected_byte_len: usize, actual_byte_len: usize },
    CoordinateOutOfRange { coordinate: usize, num_plaintexts: usize },

    // Server state machine
    DatabaseNotSet,
    DatabaseNotPreprocessed,
    UnknownClientId(u32),

    // Wire codec
    QueryCiphertextCountMismatch { expected: usize, actual: usize },
    ReplyCiphertextCountMismatch { expected: usize, actual: usize },
    TruncatedStream,
    UnexpectedTrailingBytes(usize),
    MalformedCiphertext(String),

    // Reply decoding
    OffsetOutOfRange { offset: usize, capacity: usize },
    InvalidReplyShape { expected: usize, actual: usize },
    Scheme(String),
}

impl PirError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedRingDegree(_)
            | Self::UnsupportedPlaintextBitWidth { .. }
            | Self::NoSuitablePlaintextModulus { .. }
            | Self::InvalidEncryptionParameters(_)
            | Self::InvalidDimensionCount(_)
            | Self::DimensionExtentTooLarge { .. }
            | Self::ItemTooLargeForPlaintext { .. }
            | Self::EmptyDatabase
            | Self::InvalidItemByteLength
            | Self::DatabaseShapeMismatch { .. }
            | Self::CoordinateOutOfRange { .. } => ErrorKind::Parameter,

            Self::DatabaseNotSet | Self::DatabaseNotPreprocessed | Self::UnknownClientId(_) => ErrorKind::State,

            Self::QueryCiphertextCountMismatch { .. }
            | Self::ReplyCiphertextCountMismatch { .. }
            | Self::TruncatedStream
            | Self::UnexpectedTrailingBytes(_)
            | Self::MalformedCiphertext(_) => ErrorKind::Protocol,

            Self::OffsetOutOfRange { .. } | Self::InvalidReplyShape { .. } | Self::Scheme(_) => ErrorKind::Decode,
        }
    }
}

impl Display for PirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedRingDegree(degree) => write!(f, "No coefficient modulus chain is known for ring degree {}.", degree),
            Self::UnsupportedPlaintextBitWidth { bit_len, min, max } => {
                write!(f, "Plaintext modulus bit-width {} is outside the supported range [{}, {}] for this ring degree.", bit_len, min, max)
            }
            Self::NoSuitablePlaintextModulus { bit_len, degree } => {
                write!(f, "No NTT-friendly prime of exactly {} bits exists for ring degree {}.", bit_len, degree)
            }
            Self::InvalidEncryptionParameters(e) => write!(f, "Encryption parameters failed validation: {}", e),
            Self::InvalidDimensionCount(d) => write!(f, "The database must be arranged along at least one dimension, got {}.", d),
            Self::DimensionExtentTooLarge { extent, degree } => {
                write!(f, "Dimension extent {} exceeds the ring degree {}; use more dimensions or a larger degree.", extent, degree)
            }
            Self::ItemTooLargeForPlaintext { item_byte_len, capacity_byte_len } => {
                write!(f, "An item of {} bytes can not fit in one plaintext, which holds at most {} bytes.", item_byte_len, capacity_byte_len)
            }
            Self::EmptyDatabase => write!(f, "Can not build PIR parameters for an empty database."),
            Self::InvalidItemByteLength => write!(f, "Items must be at least one byte long."),
            Self::DatabaseShapeMismatch { expected_byte_len, actual_byte_len } => {
                write!(f, "Raw database is {} bytes but the PIR parameters describe {} bytes.", actual_byte_len, expected_byte_len)
            }
            Self::CoordinateOutOfRange { coordinate, num_plaintexts } => {
                write!(f, "Plaintext coordinate {} is out of range, the database spans {} plaintexts.", coordinate, num_plaintexts)
            }

            Self::DatabaseNotSet => write!(f, "No database has been installed on this server."),
            Self::DatabaseNotPreprocessed => write!(f, "The database must be preprocessed before replies can be generated."),
            Self::UnknownClientId(id) => write!(f, "No Galois keys are registered for client id {}.", id),

            Self::QueryCiphertextCountMismatch { expected, actual } => {
                write!(f, "Serialized query carries {} ciphertexts, expected one per dimension i.e. {}.", actual, expected)
            }
            Self::ReplyCiphertextCountMismatch { expected, actual } => {
                write!(f, "Serialized reply carries {} ciphertexts, expected {}.", actual, expected)
            }
            Self::TruncatedStream => write!(f, "Serialized input ended before all announced ciphertexts were read."),
            Self::UnexpectedTrailingBytes(n) => write!(f, "Serialized input has {} trailing bytes after the last ciphertext.", n),
            Self::MalformedCiphertext(e) => write!(f, "Ciphertext deserialization failed with: {}", e),

            Self::OffsetOutOfRange { offset, capacity } => {
                write!(f, "Item offset {} is out of range, each plaintext batches {} items.", offset, capacity)
            }
            Self::InvalidReplyShape { expected, actual } => write!(f, "Reply decodes to {} coefficients, expected at least {}.", actual, expected),
            Self::Scheme(e) => write!(f, "Encryption layer reported: {}", e),
        }
    }
}

impl Error for PirError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl From<fhe::Error> for PirError {
    fn from(e: fhe::Error) -> Self {
        Self::Scheme(e.to_string())
    }
}
