use crate::section::Signature;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PhiveError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;
pub type SerializationResult<T> = std::result::Result<T, SerializationError>;

/// Errors raised while turning bytes into a navigable container.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    TruncatedInput {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("invalid {what} magic, expected `{expected:02X?}`, found `{found:02X?}`")]
    InvalidMagic {
        what: &'static str,
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("unexpected file type {found}, expected {expected}")]
    InvalidFileType { found: u8, expected: u8 },

    #[error("unsupported SDK version `{found}`, expected `{expected}`")]
    InvalidVersion {
        found: String,
        expected: &'static str,
    },

    #[error("unknown section signature {signature} at offset {offset}")]
    UnknownSectionSignature { signature: Signature, offset: u64 },

    #[error("section signature {signature} at offset {offset} is not supported")]
    UnsupportedSectionSignature { signature: Signature, offset: u64 },

    #[error("section {signature} at offset {offset} has invalid size {size}")]
    InvalidSectionSize {
        signature: Signature,
        offset: u64,
        size: u32,
    },

    #[error("tag file is missing its {signature} section")]
    MissingSection { signature: &'static str },

    #[error("tag file contains more than one {signature} section (second one at offset {offset})")]
    DuplicateSection { signature: Signature, offset: u64 },

    #[error("patch references type index {type_index} which has no resolved name")]
    UnresolvedTypeName { type_index: u32 },

    #[error("offset {offset} out of range for {what} (len={len})")]
    OffsetOutOfRange {
        what: &'static str,
        offset: i64,
        len: usize,
    },

    #[error("variable-width integer at offset {offset} does not fit in 64 bits")]
    VarUIntOverflow { offset: u64 },

    #[error("invalid string for {what} at offset {offset}")]
    InvalidString { what: &'static str, offset: u64 },
}

/// Errors raised while writing a container (or one of its parts) back to bytes.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("{what} does not fit its size field ({size} bytes)")]
    SizeOverflow { what: &'static str, size: usize },

    #[error(
        "reverse relocation does not reproduce the stored DATA at offset {offset} \
         (expected {expected:#04x}, found {found:#04x})"
    )]
    RoundTripMismatch { offset: usize, expected: u8, found: u8 },

    #[error("offset {offset} out of range for {what} (len={len})")]
    OffsetOutOfRange {
        what: &'static str,
        offset: usize,
        len: usize,
    },

    #[error("stored DATA length {expected} differs from reverse relocation output {found}")]
    RoundTripLengthMismatch { expected: usize, found: usize },

    #[error("An I/O error has occurred while writing {what}")]
    Io {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PhiveError {
    #[error("Failed to read file `{path}`")]
    FailedToRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
