//! Request, response and error codes of the file-transfer payload
// (c) 2025 Ross Younger

use int_enum::IntEnum;

/// Errno value the reference server leaks through [`NakCode::FailErrno`] when
/// a file is missing.
pub const ERRNO_ENOENT: u8 = 2;

/// Command and response codes carried in the payload `opcode` and
/// `req_opcode` fields.
///
/// Values 0..=15 are requests sent by this client; [`Opcode::Ack`] and
/// [`Opcode::Nak`] are the only codes a well-behaved server sends back.
/// The ordering and meaning of existing items cannot be changed without
/// breaking wire compatibility.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, IntEnum, strum_macros::Display)]
#[repr(u8)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Opcode {
    #[default]
    None = 0,
    TerminateSession = 1,
    ResetSessions = 2,
    ListDirectory = 3,
    OpenFileRo = 4,
    ReadFile = 5,
    CreateFile = 6,
    WriteFile = 7,
    RemoveFile = 8,
    CreateDirectory = 9,
    RemoveDirectory = 10,
    OpenFileWo = 11,
    TruncateFile = 12,
    Rename = 13,
    CalcFileCrc32 = 14,
    BurstReadFile = 15,
    Ack = 128,
    Nak = 129,
}

/// Machine-readable error codes carried in the first data byte of a NAK.
///
/// [`NakCode::FailErrno`] carries the server's raw errno in a second data
/// byte; see [`crate::ClientResult`] for how that is surfaced.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, IntEnum, thiserror::Error, strum_macros::Display,
)]
#[repr(u8)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum NakCode {
    None = 0,
    Fail = 1,
    FailErrno = 2,
    InvalidDataSize = 3,
    InvalidSession = 4,
    NoSessions = 5,
    Eof = 6,
    UnknownCommand = 7,
    FileExists = 8,
    FileProtected = 9,
    FileDoesNotExist = 10,
    Timeout = 11,
    FileIoError = 12,
}
