//! The protocol engine: starts jobs, consumes responses and timeouts
// (c) 2025 Ross Younger

use std::fs::File;
use std::io::{Read as _, Write as _};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::protocol::{MAX_DATA, Opcode, Payload, seq_lt};
use crate::transport::TransferMessage;
use crate::util::Cookie;

use super::job::{Job, JobItem};
use super::queue::Guard;
use super::{ClientInner, ClientResult, ProgressData, SharedTransferCallback};

/// What a per-chunk step decided to do next, computed while the operation
/// item is mutably borrowed and acted on afterwards.
enum Step {
    Fail(ClientResult),
    Read,
    Write { offset: u32, data: Vec<u8> },
    Terminate,
}

fn percent(bytes: u32, total: u32) -> i32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    {
        ((u64::from(bytes) * 100 / u64::from(total)) as u32) as i32
    }
}

impl ClientInner {
    pub(crate) fn next_seq(&self) -> u16 {
        self.seq_number.fetch_add(1, Ordering::Relaxed)
    }

    /// Queues a job and kicks the dispatcher in case it was idle.
    pub(crate) fn submit(self: &Arc<Self>, item: JobItem) {
        self.queue.push_back(Job::new(item, self.config.retries));
        let mut guard = self.queue.guard();
        self.do_work(&mut guard);
    }

    /// Starts the head job if nothing is in flight. Jobs that fail their
    /// kickoff (bad parameter, local I/O) pop immediately and the next in
    /// line gets its chance.
    fn do_work(self: &Arc<Self>, guard: &mut Guard<'_, Job>) {
        loop {
            let started = match guard.front_mut() {
                None => return,
                Some(job) => {
                    if job.started {
                        return;
                    }
                    job.started = true;
                    self.start_job(job)
                }
            };
            if started {
                return;
            }
            let _ = guard.pop_front();
        }
    }

    fn start_job(self: &Arc<Self>, job: &mut Job) -> bool {
        match &job.item {
            JobItem::Download(_) => self.download_start(job),
            JobItem::Upload(_) => self.upload_start(job),
            JobItem::List(_) => self.list_start(job),
            JobItem::Crc32(_) => self.crc32_start(job),
            JobItem::CreateDirectory(_)
            | JobItem::RemoveDirectory(_)
            | JobItem::RemoveFile(_)
            | JobItem::Rename(_)
            | JobItem::Reset(_) => self.command_start(job),
        }
    }

    // ------------------------------------------------------------------
    // Kickoffs

    fn download_start(self: &Arc<Self>, job: &mut Job) -> bool {
        let payload = {
            let JobItem::Download(item) = &mut job.item else {
                return false;
            };
            if item.remote_path.len() + 1 > MAX_DATA {
                self.post_transfer_terminal(&item.callback, ClientResult::InvalidParameter);
                return false;
            }
            let local_path = item
                .local_folder
                .join(crate::util::fs::basename(&item.remote_path));
            debug!("downloading {} to {local_path:?}", item.remote_path);
            match File::create(&local_path) {
                Ok(file) => item.writer = Some(file),
                Err(e) => {
                    warn!("could not open {local_path:?} for writing: {e}");
                    self.post_transfer_terminal(&item.callback, ClientResult::FileIoError);
                    return false;
                }
            }
            item.last_percent = -1;
            self.path_request(Opcode::OpenFileRo, 0, 0, &item.remote_path)
        };
        self.record_and_send(job, payload);
        true
    }

    fn upload_start(self: &Arc<Self>, job: &mut Job) -> bool {
        let payload = {
            let JobItem::Upload(item) = &mut job.item else {
                return false;
            };
            if !crate::util::fs::exists(&item.local_path) {
                self.post_transfer_terminal(&item.callback, ClientResult::FileDoesNotExist);
                return false;
            }
            match File::open(&item.local_path) {
                Ok(file) => item.reader = Some(file),
                Err(e) => {
                    warn!("could not open {:?} for reading: {e}", item.local_path);
                    self.post_transfer_terminal(&item.callback, ClientResult::FileIoError);
                    return false;
                }
            }
            let size = crate::util::fs::file_size(&item.local_path)
                .ok()
                .and_then(|s| u32::try_from(s).ok());
            let Some(size) = size else {
                self.post_transfer_terminal(&item.callback, ClientResult::InvalidParameter);
                return false;
            };
            item.file_size = size;
            let basename = item.local_path.file_name().map(|n| n.to_string_lossy());
            let Some(basename) = basename else {
                self.post_transfer_terminal(&item.callback, ClientResult::InvalidParameter);
                return false;
            };
            let remote_path = format!("{}/{basename}", item.remote_folder);
            if remote_path.len() + 1 > MAX_DATA {
                self.post_transfer_terminal(&item.callback, ClientResult::InvalidParameter);
                return false;
            }
            debug!("uploading {:?} ({size} bytes) to {remote_path}", item.local_path);
            self.path_request(Opcode::OpenFileWo, 0, 0, &remote_path)
        };
        self.record_and_send(job, payload);
        true
    }

    fn list_start(self: &Arc<Self>, job: &mut Job) -> bool {
        let payload = {
            let JobItem::List(item) = &mut job.item else {
                return false;
            };
            if item.remote_path.len() + 1 > MAX_DATA {
                self.post_list(item.callback.take(), ClientResult::InvalidParameter, Vec::new());
                return false;
            }
            item.entries.clear();
            self.path_request(Opcode::ListDirectory, 0, 0, &item.remote_path)
        };
        self.record_and_send(job, payload);
        true
    }

    fn crc32_start(self: &Arc<Self>, job: &mut Job) -> bool {
        let payload = {
            let JobItem::Crc32(item) = &mut job.item else {
                return false;
            };
            if item.remote_path.len() + 1 > MAX_DATA {
                self.post_crc32(item.callback.take(), ClientResult::InvalidParameter, 0);
                return false;
            }
            self.path_request(Opcode::CalcFileCrc32, 0, 0, &item.remote_path)
        };
        self.record_and_send(job, payload);
        true
    }

    fn command_start(self: &Arc<Self>, job: &mut Job) -> bool {
        let payload = match &mut job.item {
            JobItem::CreateDirectory(item) => {
                if item.path.len() + 1 > MAX_DATA {
                    self.post_result(item.callback.take(), ClientResult::InvalidParameter);
                    return false;
                }
                self.path_request(Opcode::CreateDirectory, 0, 0, &item.path)
            }
            JobItem::RemoveDirectory(item) => {
                if item.path.len() + 1 > MAX_DATA {
                    self.post_result(item.callback.take(), ClientResult::InvalidParameter);
                    return false;
                }
                self.path_request(Opcode::RemoveDirectory, 0, 0, &item.path)
            }
            JobItem::RemoveFile(item) => {
                if item.path.len() + 1 > MAX_DATA {
                    self.post_result(item.callback.take(), ClientResult::InvalidParameter);
                    return false;
                }
                self.path_request(Opcode::RemoveFile, 0, 0, &item.path)
            }
            JobItem::Rename(item) => {
                if item.from.len() + 1 + item.to.len() + 1 > MAX_DATA {
                    self.post_result(item.callback.take(), ClientResult::InvalidParameter);
                    return false;
                }
                let mut data = item.from.as_bytes().to_vec();
                data.push(0);
                data.extend_from_slice(item.to.as_bytes());
                data.push(0);
                Payload::request(Opcode::Rename, self.next_seq(), 0, 0).with_data(data)
            }
            JobItem::Reset(_) => Payload::request(
                Opcode::ResetSessions,
                self.next_seq(),
                self.last_session.load(Ordering::Relaxed),
                0,
            ),
            _ => return false,
        };
        self.record_and_send(job, payload);
        true
    }

    // ------------------------------------------------------------------
    // Incoming traffic

    /// Receive-thread entry point: one decoded datagram from the bus.
    pub(crate) fn process_message(self: &Arc<Self>, message: &TransferMessage) {
        if message.target_system != 0 && message.target_system != self.config.own_system_id {
            warn!("received payload with wrong target system id");
            return;
        }
        if message.target_component != 0
            && message.target_component != self.config.own_component_id
        {
            warn!("received payload with wrong target component id");
            return;
        }
        let payload = match message.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping undecodable payload: {e:#}");
                return;
            }
        };
        if self.debugging {
            debug!(
                "FTP: opcode: {}, size: {}, offset: {}, seq: {}",
                payload.opcode, payload.size, payload.offset, payload.seq_number
            );
        }

        let mut guard = self.queue.guard();
        let Some(job) = guard.front_mut() else {
            return;
        };
        if !job.started {
            return;
        }
        if job.last_opcode != payload.req_opcode {
            // Stale or crossed with a retry; not ours to act on.
            return;
        }
        if let Some(last) = job.last_seen_seq {
            if last == payload.seq_number {
                // The server re-sent an ack because ours got lost.
                return;
            }
            if seq_lt(payload.seq_number, last) {
                return;
            }
        }
        job.last_seen_seq = Some(payload.seq_number);

        let done = match payload.opcode {
            Opcode::Ack => {
                job.retries_left = self.config.retries;
                self.handle_ack(job, &payload)
            }
            Opcode::Nak => self.handle_nak(job, &payload),
            other => {
                warn!("unexpected opcode {other} from server");
                false
            }
        };
        if done {
            self.stop_timer();
            let _ = guard.pop_front();
            self.do_work(&mut guard);
        }
    }

    /// Returns true when the job is finished and must pop.
    fn handle_ack(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        match &job.item {
            JobItem::Download(_) => self.download_ack(job, payload),
            JobItem::Upload(_) => self.upload_ack(job, payload),
            JobItem::List(_) => self.list_ack(job, payload),
            JobItem::Crc32(_) => self.crc32_ack(job, payload),
            JobItem::CreateDirectory(_)
            | JobItem::RemoveDirectory(_)
            | JobItem::RemoveFile(_)
            | JobItem::Rename(_)
            | JobItem::Reset(_) => self.command_ack(job),
        }
    }

    fn handle_nak(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        let result = ClientResult::from_nak(payload);
        if payload.req_opcode == Opcode::TerminateSession {
            // The session is gone either way; don't try to close it again.
            job.session_valid = false;
        }
        self.fail_job(job, result);
        true
    }

    fn download_ack(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        match payload.req_opcode {
            Opcode::OpenFileRo => {
                let Some(bytes) = payload.data.get(..4) else {
                    warn!("open-for-read ack without a file size");
                    self.fail_job(job, ClientResult::ProtocolError);
                    return true;
                };
                let file_size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                job.session = payload.session;
                job.session_valid = true;
                self.last_session.store(payload.session, Ordering::Relaxed);
                {
                    let JobItem::Download(item) = &mut job.item else {
                        return true;
                    };
                    item.file_size = file_size;
                    item.bytes_transferred = 0;
                }
                if self.debugging {
                    debug!("download continues, got file size: {file_size}");
                }
                if file_size == 0 {
                    // Nothing to read; close the session and report success.
                    self.send_terminate(job);
                } else {
                    self.send_read(job);
                }
                false
            }
            Opcode::ReadFile => {
                let step = {
                    let JobItem::Download(item) = &mut job.item else {
                        return true;
                    };
                    let Some(writer) = item.writer.as_mut() else {
                        return true;
                    };
                    if let Err(e) = writer.write_all(&payload.data) {
                        warn!("local write failed: {e}");
                        Step::Fail(ClientResult::FileIoError)
                    } else {
                        #[allow(clippy::cast_possible_truncation)]
                        {
                            item.bytes_transferred += payload.data.len() as u32;
                        }
                        if self.debugging {
                            debug!(
                                "written {} of {} bytes",
                                item.bytes_transferred, item.file_size
                            );
                        }
                        if item.bytes_transferred < item.file_size {
                            let percent = percent(item.bytes_transferred, item.file_size);
                            if percent != item.last_percent {
                                item.last_percent = percent;
                                self.post_transfer_next(
                                    &item.callback,
                                    ProgressData::new(item.bytes_transferred, item.file_size),
                                );
                            }
                            Step::Read
                        } else {
                            Step::Terminate
                        }
                    }
                };
                match step {
                    Step::Fail(result) => {
                        self.fail_job(job, result);
                        return true;
                    }
                    Step::Read => self.send_read(job),
                    _ => self.send_terminate(job),
                }
                false
            }
            Opcode::TerminateSession => {
                job.session_valid = false;
                let JobItem::Download(item) = &mut job.item else {
                    return true;
                };
                item.writer = None;
                self.post_transfer_terminal(&item.callback, ClientResult::Success);
                true
            }
            other => {
                warn!("unexpected ack for {other}");
                false
            }
        }
    }

    fn upload_ack(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        match payload.req_opcode {
            Opcode::OpenFileWo => {
                job.session = payload.session;
                job.session_valid = true;
                self.last_session.store(payload.session, Ordering::Relaxed);
                self.upload_continue(job)
            }
            Opcode::WriteFile => self.upload_continue(job),
            Opcode::TerminateSession => {
                job.session_valid = false;
                let JobItem::Upload(item) = &mut job.item else {
                    return true;
                };
                item.reader = None;
                self.post_transfer_terminal(&item.callback, ClientResult::Success);
                true
            }
            other => {
                warn!("unexpected ack for {other}");
                false
            }
        }
    }

    /// Sends the next upload chunk, or the terminating request once the
    /// whole file has been shipped.
    fn upload_continue(self: &Arc<Self>, job: &mut Job) -> bool {
        let step = {
            let JobItem::Upload(item) = &mut job.item else {
                return true;
            };
            if item.bytes_transferred < item.file_size {
                #[allow(clippy::cast_possible_truncation)]
                let want = (item.file_size - item.bytes_transferred).min(MAX_DATA as u32) as usize;
                let offset = item.bytes_transferred;
                let mut data = vec![0u8; want];
                let read = item
                    .reader
                    .as_mut()
                    .map(|reader| reader.read_exact(&mut data));
                match read {
                    Some(Ok(())) => {
                        #[allow(clippy::cast_possible_truncation)]
                        {
                            item.bytes_transferred += want as u32;
                        }
                        let percent = percent(item.bytes_transferred, item.file_size);
                        if percent != item.last_percent {
                            item.last_percent = percent;
                            self.post_transfer_next(
                                &item.callback,
                                ProgressData::new(item.bytes_transferred, item.file_size),
                            );
                        }
                        Step::Write { offset, data }
                    }
                    Some(Err(e)) => {
                        warn!("local read failed: {e}");
                        Step::Fail(ClientResult::FileIoError)
                    }
                    None => Step::Fail(ClientResult::FileIoError),
                }
            } else {
                Step::Terminate
            }
        };
        match step {
            Step::Fail(result) => {
                self.fail_job(job, result);
                return true;
            }
            Step::Write { offset, data } => {
                let payload = Payload::request(Opcode::WriteFile, self.next_seq(), job.session, offset)
                    .with_data(data);
                self.record_and_send(job, payload);
            }
            _ => self.send_terminate(job),
        }
        false
    }

    fn list_ack(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        let next = {
            let JobItem::List(item) = &mut job.item else {
                return true;
            };
            let mut added = false;
            for entry in payload.data.split(|b| *b == 0) {
                if entry.is_empty() {
                    continue;
                }
                item.entries.push(String::from_utf8_lossy(entry).into_owned());
                added = true;
            }
            #[allow(clippy::cast_possible_truncation)]
            let offset = item.entries.len() as u32;
            added.then(|| (item.remote_path.clone(), offset))
        };
        match next {
            Some((path, offset)) => {
                // Ask for the next batch, one past what we have.
                let payload = self.path_request(Opcode::ListDirectory, 0, offset, &path);
                self.record_and_send(job, payload);
                false
            }
            None => {
                let JobItem::List(item) = &mut job.item else {
                    return true;
                };
                let entries = std::mem::take(&mut item.entries);
                debug!("directory listing complete, {} entries", entries.len());
                self.post_list(item.callback.take(), ClientResult::Success, entries);
                true
            }
        }
    }

    fn crc32_ack(self: &Arc<Self>, job: &mut Job, payload: &Payload) -> bool {
        let JobItem::Crc32(item) = &mut job.item else {
            return true;
        };
        let Some(bytes) = payload.data.get(..4) else {
            warn!("checksum ack without a checksum");
            self.post_crc32(item.callback.take(), ClientResult::ProtocolError, 0);
            return true;
        };
        let checksum = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.post_crc32(item.callback.take(), ClientResult::Success, checksum);
        true
    }

    fn command_ack(self: &Arc<Self>, job: &mut Job) -> bool {
        let callback = match &mut job.item {
            JobItem::CreateDirectory(item)
            | JobItem::RemoveDirectory(item)
            | JobItem::RemoveFile(item) => item.callback.take(),
            JobItem::Rename(item) => item.callback.take(),
            JobItem::Reset(item) => item.callback.take(),
            _ => return true,
        };
        self.post_result(callback, ClientResult::Success);
        true
    }

    // ------------------------------------------------------------------
    // Timeouts and retries

    pub(crate) fn on_timeout(self: &Arc<Self>, cookie: Cookie) {
        let mut guard = self.queue.guard();
        {
            let mut current = self.current_cookie();
            if *current != Some(cookie) {
                // Superseded while this fire was in flight.
                return;
            }
            *current = None;
        }
        let Some(job) = guard.front_mut() else {
            return;
        };
        if !job.started {
            return;
        }
        job.retries_left = job.retries_left.saturating_sub(1);
        if job.retries_left == 0 {
            warn!("no response to {} after retries, giving up", job.last_opcode);
            self.fail_job(job, ClientResult::Timeout);
            let _ = guard.pop_front();
            self.do_work(&mut guard);
            return;
        }
        if self.debugging {
            debug!("timeout, retries left: {}", job.retries_left);
        }
        // Re-send the recorded request byte-for-byte; the server suppresses
        // duplicates by sequence number.
        self.start_timer();
        self.send_payload(&job.payload);
    }

    fn start_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let cookie = self.timeouts.register(
            Box::new(move |cookie| {
                if let Some(client) = weak.upgrade() {
                    client.on_timeout(cookie);
                }
            }),
            self.config.response_timeout,
        );
        let mut current = self.current_cookie();
        if let Some(old) = current.replace(cookie) {
            self.timeouts.unregister(old);
        }
    }

    fn stop_timer(&self) {
        let mut current = self.current_cookie();
        if let Some(cookie) = current.take() {
            self.timeouts.unregister(cookie);
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing

    fn path_request(&self, opcode: Opcode, session: u8, offset: u32, path: &str) -> Payload {
        let mut data = path.as_bytes().to_vec();
        data.push(0);
        Payload::request(opcode, self.next_seq(), session, offset).with_data(data)
    }

    /// Records the request for re-send, arms the timer and ships it.
    fn record_and_send(self: &Arc<Self>, job: &mut Job, payload: Payload) {
        job.last_opcode = payload.opcode;
        job.payload = payload;
        self.start_timer();
        self.send_payload(&job.payload);
    }

    fn send_read(self: &Arc<Self>, job: &mut Job) {
        let (offset, want) = {
            let JobItem::Download(item) = &job.item else {
                return;
            };
            let remaining = item.file_size - item.bytes_transferred;
            #[allow(clippy::cast_possible_truncation)]
            (item.bytes_transferred, remaining.min(MAX_DATA as u32) as u8)
        };
        let mut payload = Payload::request(Opcode::ReadFile, self.next_seq(), job.session, offset);
        payload.size = want;
        self.record_and_send(job, payload);
    }

    fn send_terminate(self: &Arc<Self>, job: &mut Job) {
        let payload =
            Payload::request(Opcode::TerminateSession, self.next_seq(), job.session, 0);
        self.record_and_send(job, payload);
    }

    /// Best-effort close of a server session a failing job leaves behind.
    /// One shot, no retries; the server's reset path covers a loss.
    fn abort_session(&self, job: &mut Job) {
        if !job.session_valid {
            return;
        }
        job.session_valid = false;
        let payload =
            Payload::request(Opcode::TerminateSession, self.next_seq(), job.session, 0);
        self.send_payload(&payload);
    }

    /// Delivers a terminal error to whatever operation the job carries and
    /// releases its local resources. The caller pops the job.
    fn fail_job(&self, job: &mut Job, result: ClientResult) {
        match &mut job.item {
            JobItem::Download(item) => {
                item.writer = None;
                self.post_transfer_terminal(&item.callback, result);
            }
            JobItem::Upload(item) => {
                item.reader = None;
                self.post_transfer_terminal(&item.callback, result);
            }
            JobItem::List(item) => {
                let entries = std::mem::take(&mut item.entries);
                self.post_list(item.callback.take(), result, entries);
            }
            JobItem::Crc32(item) => self.post_crc32(item.callback.take(), result, 0),
            JobItem::CreateDirectory(item)
            | JobItem::RemoveDirectory(item)
            | JobItem::RemoveFile(item) => self.post_result(item.callback.take(), result),
            JobItem::Rename(item) => self.post_result(item.callback.take(), result),
            JobItem::Reset(item) => self.post_result(item.callback.take(), result),
        }
        self.abort_session(job);
    }

    fn send_payload(&self, payload: &Payload) {
        let message = TransferMessage::new(
            self.config.own_system_id,
            self.config.own_component_id,
            self.config.network_id,
            self.config.target_system_id,
            self.target_component_id(),
            payload.encode().to_vec(),
        );
        self.sink.send(&message);
    }

    // Callback scheduling: user code always runs on the executor thread,
    // never under the queue guard.

    fn post_transfer_next(&self, callback: &SharedTransferCallback, progress: ProgressData) {
        let callback = Arc::clone(callback);
        self.executor.post(move || {
            let mut callback = callback
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (*callback)(ClientResult::Next, progress);
        });
    }

    fn post_transfer_terminal(&self, callback: &SharedTransferCallback, result: ClientResult) {
        let callback = Arc::clone(callback);
        self.executor.post(move || {
            let mut callback = callback
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (*callback)(result, ProgressData::default());
        });
    }

    fn post_result(&self, callback: Option<super::ResultCallback>, result: ClientResult) {
        if let Some(callback) = callback {
            self.executor.post(move || callback(result));
        }
    }

    fn post_list(
        &self,
        callback: Option<super::ListDirectoryCallback>,
        result: ClientResult,
        entries: Vec<String>,
    ) {
        if let Some(callback) = callback {
            self.executor.post(move || callback(result, entries));
        }
    }

    fn post_crc32(&self, callback: Option<super::Crc32Callback>, result: ClientResult, crc: u32) {
        if let Some(callback) = callback {
            self.executor.post(move || callback(result, crc));
        }
    }
}
