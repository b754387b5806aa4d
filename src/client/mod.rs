//! The file-transfer client: public surface and shared state
// (c) 2025 Ross Younger

mod dispatcher;
mod job;
mod queue;
mod result;

pub use result::{ClientResult, ProgressData};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU16};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::transport::{DatagramSink, TransferMessage};
use crate::util::executor::CallbackExecutor;
use crate::util::{Cookie, TimeoutHandler};

use job::{Crc32Item, DownloadItem, JobItem, ListItem, PathItem, RenameItem, ResetItem, UploadItem};
use queue::LockedQueue;

/// Environment variable that switches on per-payload debug logging.
const FTP_DEBUGGING_ENV: &str = "MAVSDK_FTP_DEBUGGING";

/// Progress-and-result callback for downloads. Invoked with
/// [`ClientResult::Next`] zero or more times, then exactly once with a
/// terminal result.
pub type DownloadCallback = Box<dyn FnMut(ClientResult, ProgressData) + Send>;
/// Progress-and-result callback for uploads; same contract as
/// [`DownloadCallback`].
pub type UploadCallback = Box<dyn FnMut(ClientResult, ProgressData) + Send>;
/// Completion callback for single-result operations.
pub type ResultCallback = Box<dyn FnOnce(ClientResult) + Send>;
/// Completion callback for directory listings.
pub type ListDirectoryCallback = Box<dyn FnOnce(ClientResult, Vec<String>) + Send>;
/// Completion callback for remote/local file comparison.
pub type AreFilesIdenticalCallback = Box<dyn FnOnce(ClientResult, bool) + Send>;

pub(crate) type Crc32Callback = Box<dyn FnOnce(ClientResult, u32) + Send>;
pub(crate) type SharedTransferCallback =
    Arc<Mutex<Box<dyn FnMut(ClientResult, ProgressData) + Send>>>;

/// Addressing and tuning for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our system id on the bus
    pub own_system_id: u8,
    /// Our component id on the bus
    pub own_component_id: u8,
    /// The remote system we talk to
    pub target_system_id: u8,
    /// The remote component serving files, unless overridden at runtime
    pub target_component_id: u8,
    /// Network id constant carried in the outer message
    pub network_id: u8,
    /// How long to wait for a response before re-sending. Of the order of
    /// 100ms on loopback, seconds over a radio link.
    pub response_timeout: Duration,
    /// Re-sends per request before the operation fails with `Timeout`
    pub retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            own_system_id: 245,
            own_component_id: 190,
            target_system_id: 1,
            target_component_id: 1,
            network_id: 0,
            response_timeout: Duration::from_millis(500),
            retries: 4,
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) debugging: bool,
    pub(crate) queue: LockedQueue<job::Job>,
    pub(crate) seq_number: AtomicU16,
    /// Session handle from the most recent open, for `ResetSessions`
    pub(crate) last_session: AtomicU8,
    pub(crate) sink: Box<dyn DatagramSink>,
    pub(crate) timeouts: TimeoutHandler,
    timeout_cookie: Mutex<Option<Cookie>>,
    pub(crate) executor: CallbackExecutor,
    target_component_override: Mutex<Option<u8>>,
    root_dir: Mutex<Option<PathBuf>>,
    tmp_dir: Mutex<Option<TempDir>>,
    tmp_files: Mutex<HashMap<String, PathBuf>>,
}

impl ClientInner {
    pub(crate) fn current_cookie(&self) -> MutexGuard<'_, Option<Cookie>> {
        self.timeout_cookie
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn target_component_id(&self) -> u8 {
        self.target_component_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(self.config.target_component_id)
    }
}

/// A client for the file-transfer sub-protocol carried over the
/// command/telemetry bus.
///
/// Construction wires up the consumed transport sink; the embedder feeds
/// incoming datagrams to [`FtpClient::process_message`] from its receive
/// thread. User requests are queued and performed strictly in submission
/// order, one at a time; callbacks fire on a dedicated worker thread.
///
/// The handle is cheap to clone; all clones drive the same queue.
#[derive(Clone)]
pub struct FtpClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl FtpClient {
    /// Creates a client sending through `sink`.
    #[must_use]
    pub fn new(config: ClientConfig, sink: Box<dyn DatagramSink>) -> Self {
        let debugging = std::env::var(FTP_DEBUGGING_ENV).is_ok_and(|v| v == "1");
        if debugging {
            debug!("ftp debugging is on");
        }
        Self {
            inner: Arc::new(ClientInner {
                config,
                debugging,
                queue: LockedQueue::new(),
                seq_number: AtomicU16::new(0),
                last_session: AtomicU8::new(0),
                sink,
                timeouts: TimeoutHandler::new(),
                timeout_cookie: Mutex::new(None),
                executor: CallbackExecutor::new(),
                target_component_override: Mutex::new(None),
                root_dir: Mutex::new(None),
                tmp_dir: Mutex::new(None),
                tmp_files: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Receive-thread entry point: feed every file-transfer datagram
    /// addressed to us through here.
    pub fn process_message(&self, message: &TransferMessage) {
        ClientInner::process_message(&self.inner, message);
    }

    /// Fetches `remote_path` into `local_folder`, named after the remote
    /// file's final path component.
    pub fn download(
        &self,
        remote_path: &str,
        local_folder: impl AsRef<Path>,
        callback: DownloadCallback,
    ) {
        self.inner.submit(JobItem::Download(DownloadItem {
            remote_path: remote_path.to_owned(),
            local_folder: local_folder.as_ref().to_path_buf(),
            writer: None,
            file_size: 0,
            bytes_transferred: 0,
            last_percent: -1,
            callback: Arc::new(Mutex::new(callback)),
        }));
    }

    /// Ships `local_path` into the remote `remote_folder`, named after the
    /// local file's final path component.
    pub fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_folder: &str,
        callback: UploadCallback,
    ) {
        self.inner.submit(JobItem::Upload(UploadItem {
            local_path: local_path.as_ref().to_path_buf(),
            remote_folder: remote_folder.to_owned(),
            reader: None,
            file_size: 0,
            bytes_transferred: 0,
            last_percent: -1,
            callback: Arc::new(Mutex::new(callback)),
        }));
    }

    /// Lists a remote directory; entries arrive in server order.
    pub fn list_directory_async(&self, remote_path: &str, callback: ListDirectoryCallback) {
        self.inner.submit(JobItem::List(ListItem {
            remote_path: remote_path.to_owned(),
            entries: Vec::new(),
            callback: Some(callback),
        }));
    }

    /// Blocking form of [`FtpClient::list_directory_async`].
    #[must_use]
    pub fn list_directory(&self, remote_path: &str) -> (ClientResult, Vec<String>) {
        let (tx, rx) = mpsc::channel();
        self.list_directory_async(
            remote_path,
            Box::new(move |result, entries| {
                let _ = tx.send((result, entries));
            }),
        );
        rx.recv().unwrap_or((ClientResult::Unknown, Vec::new()))
    }

    /// Creates a remote directory.
    pub fn create_directory_async(&self, remote_path: &str, callback: ResultCallback) {
        self.inner.submit(JobItem::CreateDirectory(PathItem {
            path: remote_path.to_owned(),
            callback: Some(callback),
        }));
    }

    /// Blocking form of [`FtpClient::create_directory_async`].
    #[must_use]
    pub fn create_directory(&self, remote_path: &str) -> ClientResult {
        self.await_result(|callback| self.create_directory_async(remote_path, callback))
    }

    /// Removes an (empty) remote directory.
    pub fn remove_directory_async(&self, remote_path: &str, callback: ResultCallback) {
        self.inner.submit(JobItem::RemoveDirectory(PathItem {
            path: remote_path.to_owned(),
            callback: Some(callback),
        }));
    }

    /// Blocking form of [`FtpClient::remove_directory_async`].
    #[must_use]
    pub fn remove_directory(&self, remote_path: &str) -> ClientResult {
        self.await_result(|callback| self.remove_directory_async(remote_path, callback))
    }

    /// Removes a remote file.
    pub fn remove_file_async(&self, remote_path: &str, callback: ResultCallback) {
        self.inner.submit(JobItem::RemoveFile(PathItem {
            path: remote_path.to_owned(),
            callback: Some(callback),
        }));
    }

    /// Blocking form of [`FtpClient::remove_file_async`].
    #[must_use]
    pub fn remove_file(&self, remote_path: &str) -> ClientResult {
        self.await_result(|callback| self.remove_file_async(remote_path, callback))
    }

    /// Renames (moves) a remote file or directory.
    pub fn rename_async(&self, from: &str, to: &str, callback: ResultCallback) {
        self.inner.submit(JobItem::Rename(RenameItem {
            from: from.to_owned(),
            to: to.to_owned(),
            callback: Some(callback),
        }));
    }

    /// Blocking form of [`FtpClient::rename_async`].
    #[must_use]
    pub fn rename(&self, from: &str, to: &str) -> ClientResult {
        self.await_result(|callback| self.rename_async(from, to, callback))
    }

    /// Asks the server to drop any open sessions, ours or leaked by an
    /// earlier incarnation of this process.
    pub fn reset(&self, callback: ResultCallback) {
        self.inner.submit(JobItem::Reset(ResetItem {
            callback: Some(callback),
        }));
    }

    /// Compares a local file against a remote one by CRC-32.
    ///
    /// The local checksum is computed on the calling thread; the remote one
    /// is requested from the server. Short-circuits on either failing.
    pub fn are_files_identical_async(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        callback: AreFilesIdenticalCallback,
    ) {
        if !crate::util::fs::exists(&local_path) {
            self.inner
                .executor
                .post(move || callback(ClientResult::FileDoesNotExist, false));
            return;
        }
        let crc_local = match crate::util::crc32_file(&local_path) {
            Ok(crc) => crc,
            Err(e) => {
                warn!("could not checksum {:?}: {e:#}", local_path.as_ref());
                self.inner
                    .executor
                    .post(move || callback(ClientResult::FileIoError, false));
                return;
            }
        };
        self.inner.submit(JobItem::Crc32(Crc32Item {
            remote_path: remote_path.to_owned(),
            callback: Some(Box::new(move |result, crc_remote| {
                if result == ClientResult::Success {
                    callback(ClientResult::Success, crc_local == crc_remote);
                } else {
                    callback(result, false);
                }
            })),
        }));
    }

    /// Blocking form of [`FtpClient::are_files_identical_async`].
    #[must_use]
    pub fn are_files_identical(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> (ClientResult, bool) {
        let (tx, rx) = mpsc::channel();
        self.are_files_identical_async(
            local_path,
            remote_path,
            Box::new(move |result, identical| {
                let _ = tx.send((result, identical));
            }),
        );
        rx.recv().unwrap_or((ClientResult::Unknown, false))
    }

    /// Records the remote-side root directory this client's paths are
    /// relative to. The directory must exist locally only in mirrored
    /// setups; a missing path is reported as `FileDoesNotExist`.
    pub fn set_root_directory(&self, root: impl AsRef<Path>) -> ClientResult {
        match crate::util::fs::canonical(root) {
            Ok(path) => {
                *self
                    .inner
                    .root_dir
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(path);
                ClientResult::Success
            }
            Err(_) => ClientResult::FileDoesNotExist,
        }
    }

    /// The root directory recorded by [`FtpClient::set_root_directory`].
    #[must_use]
    pub fn root_directory(&self) -> Option<PathBuf> {
        self.inner
            .root_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overrides which remote component subsequent requests address.
    pub fn set_target_component_id(&self, component_id: u8) -> ClientResult {
        *self
            .inner
            .target_component_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(component_id);
        ClientResult::Success
    }

    /// Our component id on the bus, as carried in outbound messages.
    #[must_use]
    pub fn own_component_id(&self) -> u8 {
        self.inner.config.own_component_id
    }

    /// Stashes `content` in a file under a client-owned temp directory, for
    /// a later [`FtpClient::upload`]. `name` must be a bare file name.
    /// Returns the path written, or `None` on failure.
    pub fn write_tmp_file(&self, name: &str, content: &str) -> Option<PathBuf> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            warn!("tmp file name {name:?} may not contain path separators");
            return None;
        }
        let mut dir_slot = self
            .inner
            .tmp_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if dir_slot.is_none() {
            match crate::util::fs::create_tmp_directory("mavftp-tmp-files") {
                Ok(dir) => *dir_slot = Some(dir),
                Err(e) => {
                    warn!("could not create temp directory: {e:#}");
                    return None;
                }
            }
        }
        let path = dir_slot.as_ref()?.path().join(name);
        match std::fs::write(&path, content) {
            Ok(()) => {
                self.inner
                    .tmp_files
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_owned(), path.clone());
                Some(path)
            }
            Err(e) => {
                warn!("writing to {path:?} failed: {e}");
                None
            }
        }
    }

    /// The path a given [`FtpClient::write_tmp_file`] name was stashed at.
    #[must_use]
    pub fn tmp_file_path(&self, name: &str) -> Option<PathBuf> {
        self.inner
            .tmp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn await_result<F: FnOnce(ResultCallback)>(&self, start: F) -> ClientResult {
        let (tx, rx) = mpsc::channel();
        start(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.recv().unwrap_or(ClientResult::Unknown)
    }
}
