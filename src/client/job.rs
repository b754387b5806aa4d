//! Per-request job state
// (c) 2025 Ross Younger

use std::fs::File;
use std::path::PathBuf;

use crate::protocol::{Opcode, Payload};

use super::{
    Crc32Callback, ListDirectoryCallback, ResultCallback, SharedTransferCallback,
};

/// One queued user request: the operation variant plus the bookkeeping the
/// dispatcher needs to drive it through the wire protocol.
///
/// A job is created on the user call, becomes active when it reaches the
/// head of the queue, is mutated only under the queue guard, and is dropped
/// after its terminal callback has been scheduled exactly once.
pub(crate) struct Job {
    /// The operation being performed
    pub item: JobItem,
    /// Set once the dispatcher has kicked the job off
    pub started: bool,
    /// Server-assigned session handle, 0 until an `OpenFile*` ACK
    pub session: u8,
    /// True while the server holds a session open for this job
    pub session_valid: bool,
    /// Remaining re-sends before the job times out
    pub retries_left: u32,
    /// Opcode of the request in flight, for matching `req_opcode` on replies
    pub last_opcode: Opcode,
    /// The request in flight, kept fully formed for byte-identical re-send
    pub payload: Payload,
    /// Sequence number of the last processed response, for duplicate
    /// suppression (the server re-sends an ack if ours got lost)
    pub last_seen_seq: Option<u16>,
}

impl Job {
    pub(crate) fn new(item: JobItem, retries: u32) -> Self {
        Self {
            item,
            started: false,
            session: 0,
            session_valid: false,
            retries_left: retries,
            last_opcode: Opcode::None,
            payload: Payload::default(),
            last_seen_seq: None,
        }
    }
}

/// The operation variants a [`Job`] can carry.
pub(crate) enum JobItem {
    Download(DownloadItem),
    Upload(UploadItem),
    List(ListItem),
    Crc32(Crc32Item),
    CreateDirectory(PathItem),
    RemoveDirectory(PathItem),
    RemoveFile(PathItem),
    Rename(RenameItem),
    Reset(ResetItem),
}

pub(crate) struct DownloadItem {
    pub remote_path: String,
    pub local_folder: PathBuf,
    /// Local destination, opened (truncating) at kickoff
    pub writer: Option<File>,
    pub file_size: u32,
    pub bytes_transferred: u32,
    /// Whole-percent progress throttle; -1 until the first chunk lands
    pub last_percent: i32,
    pub callback: SharedTransferCallback,
}

pub(crate) struct UploadItem {
    pub local_path: PathBuf,
    pub remote_folder: String,
    /// Local source, opened at kickoff
    pub reader: Option<File>,
    pub file_size: u32,
    pub bytes_transferred: u32,
    /// Whole-percent progress throttle; -1 until the first chunk ships
    pub last_percent: i32,
    pub callback: SharedTransferCallback,
}

pub(crate) struct ListItem {
    pub remote_path: String,
    /// Entries received so far, in server order; its length doubles as the
    /// offset of the next batch request
    pub entries: Vec<String>,
    pub callback: Option<ListDirectoryCallback>,
}

pub(crate) struct Crc32Item {
    pub remote_path: String,
    pub callback: Option<Crc32Callback>,
}

/// A single-shot command that carries one remote path.
pub(crate) struct PathItem {
    pub path: String,
    pub callback: Option<ResultCallback>,
}

pub(crate) struct RenameItem {
    pub from: String,
    pub to: String,
    pub callback: Option<ResultCallback>,
}

pub(crate) struct ResetItem {
    pub callback: Option<ResultCallback>,
}
