//! Unified error type surfaced by decoding, encoding and interpretation.

use std::fmt;

use crate::varcode::Varcode;

/// Where in a bulletin an error occurred, for user-visible reporting.
///
/// `file_name` is carried verbatim when supplied by the caller; the core
/// itself never opens files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    pub file_name: Option<String>,
    pub section: Option<u8>,
    pub byte_offset: Option<usize>,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(name) = &self.file_name {
            write!(f, "{name}")?;
            wrote = true;
        }
        if let Some(section) = self.section {
            write!(f, "{}section {section}", if wrote { ", " } else { "" })?;
            wrote = true;
        }
        if let Some(offset) = self.byte_offset {
            write!(f, "{}offset {offset}", if wrote { ", " } else { "" })?;
        }
        Ok(())
    }
}

/// The error kinds this crate raises, one [`thiserror`] variant each.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Malformed input: truncated section, wrong magic, impossible length,
    /// disallowed combination.
    #[error("{loc}: parse error: {message}")]
    Parse { loc: ErrorLocation, message: String },

    /// A [`Varcode`] was not present in Table B or Table D.
    #[error("{loc}: not found: {code} not defined")]
    NotFound { loc: ErrorLocation, code: Varcode },

    /// A value is outside its domain, or a string is too long for its field.
    #[error("{loc}: domain error: {message}")]
    Domain { loc: ErrorLocation, message: String },

    /// Internal state violation (bitmap cursor past end, unbalanced stack, ...).
    #[error("{loc}: consistency error: {message}")]
    Consistency { loc: ErrorLocation, message: String },

    /// A valid but unsupported combination.
    #[error("{loc}: unimplemented: {message}")]
    Unimplemented { loc: ErrorLocation, message: String },

    /// Underlying allocation failure or other unrecoverable system error.
    #[error("{loc}: system error: {message}")]
    System { loc: ErrorLocation, message: String },
}

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            loc: ErrorLocation::default(),
            message: message.into(),
        }
    }

    pub fn not_found(code: Varcode) -> Self {
        Error::NotFound {
            loc: ErrorLocation::default(),
            code,
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Error::Domain {
            loc: ErrorLocation::default(),
            message: message.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Error::Consistency {
            loc: ErrorLocation::default(),
            message: message.into(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Error::Unimplemented {
            loc: ErrorLocation::default(),
            message: message.into(),
        }
    }

    /// Attach section/offset/file context to an error that was raised
    /// without it (e.g. bubbled up from a pure bit-level primitive).
    pub fn with_location(mut self, section: u8, byte_offset: usize) -> Self {
        let loc = match &mut self {
            Error::Parse { loc, .. }
            | Error::NotFound { loc, .. }
            | Error::Domain { loc, .. }
            | Error::Consistency { loc, .. }
            | Error::Unimplemented { loc, .. }
            | Error::System { loc, .. } => loc,
        };
        loc.section = Some(section);
        loc.byte_offset = Some(byte_offset);
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;
