//! User-facing operation results and the NAK translation
// (c) 2025 Ross Younger

use derive_more::Constructor;
use tracing::warn;

use crate::protocol::{ERRNO_ENOENT, NakCode, Payload};

/// Outcome of a client operation, as delivered to user callbacks.
///
/// [`ClientResult::Next`] is a progress notification and never terminal;
/// every other value ends its operation. This is a status code rather than a
/// plain error, so it also carries the success values.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, thiserror::Error, strum_macros::Display,
)]
#[allow(missing_docs)]
pub enum ClientResult {
    Unknown,
    Success,
    Next,
    Timeout,
    Busy,
    FileIoError,
    FileExists,
    FileDoesNotExist,
    FileProtected,
    InvalidParameter,
    Unsupported,
    ProtocolError,
    NoSystem,
}

/// Transfer progress, reported alongside [`ClientResult::Next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Constructor)]
pub struct ProgressData {
    /// Bytes moved so far
    pub bytes_transferred: u32,
    /// Total bytes in the transfer
    pub total_bytes: u32,
}

impl ClientResult {
    /// Translates a NAK payload into the result delivered to the user.
    ///
    /// The reference autopilot server reports a missing file as
    /// `FailErrno` + `ENOENT`, which is remapped here; any other errno
    /// variant is a protocol error as far as the user is concerned.
    #[must_use]
    pub(crate) fn from_nak(payload: &Payload) -> Self {
        let Some(&raw) = payload.data.first() else {
            warn!("NAK without an error code");
            return Self::ProtocolError;
        };
        let Ok(mut code) = NakCode::try_from(raw) else {
            warn!("NAK with unknown error code {raw}");
            return Self::ProtocolError;
        };
        if code == NakCode::FailErrno && payload.data.get(1) == Some(&ERRNO_ENOENT) {
            code = NakCode::FileDoesNotExist;
        }
        warn!("server NAK: {code}");
        match code {
            NakCode::FileDoesNotExist => Self::FileDoesNotExist,
            NakCode::FileExists => Self::FileExists,
            NakCode::FileProtected => Self::FileProtected,
            NakCode::FileIoError => Self::FileIoError,
            NakCode::UnknownCommand => Self::Unsupported,
            NakCode::Timeout => Self::Timeout,
            _ => Self::ProtocolError,
        }
    }
}
