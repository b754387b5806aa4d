//! End-to-end exercises against an in-process fake server
// (c) 2025 Ross Younger
//!
//! The fake server implements the remote side of the protocol against a real
//! directory, on its own thread, talking to the client over channels. This
//! mirrors how the client sits on a receive thread in production, and lets
//! the tests assert both the user-visible callbacks and the wire traffic.

use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mavftp::protocol::{MAX_DATA, NakCode, Opcode, Payload};
use mavftp::transport::TransferMessage;
use mavftp::util::crc32_file;
use mavftp::{ClientConfig, ClientResult, FtpClient, ProgressData};
use pretty_assertions::assert_eq;

const RECV: Duration = Duration::from_secs(10);

struct ServerOptions {
    /// Upper bound on bytes returned per read, regardless of the request
    read_cap: usize,
    /// Upper bound on entries returned per listing batch
    list_cap: usize,
    /// Number of open-for-read responses to swallow (ack loss injection)
    drop_open_ro_acks: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_cap: MAX_DATA,
            list_cap: usize::MAX,
            drop_open_ro_acks: 0,
        }
    }
}

struct Session {
    file: File,
    size: u32,
}

struct ServerState {
    root: PathBuf,
    options: ServerOptions,
    session: Option<Session>,
    dropped: u32,
}

impl ServerState {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn path_arg(data: &[u8]) -> String {
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        String::from_utf8_lossy(&data[..end]).into_owned()
    }

    fn ack(req: &Payload, session: u8, data: Vec<u8>) -> Payload {
        Payload {
            seq_number: req.seq_number.wrapping_add(1),
            session,
            opcode: Opcode::Ack,
            req_opcode: req.opcode,
            ..Payload::default()
        }
        .with_data(data)
    }

    fn nak(req: &Payload, codes: Vec<u8>) -> Payload {
        Payload {
            seq_number: req.seq_number.wrapping_add(1),
            session: req.session,
            opcode: Opcode::Nak,
            req_opcode: req.opcode,
            ..Payload::default()
        }
        .with_data(codes)
    }

    fn handle(&mut self, req: &Payload) -> Option<Payload> {
        let reply = match req.opcode {
            Opcode::OpenFileRo => self.open_ro(req),
            Opcode::ReadFile => self.read(req),
            Opcode::OpenFileWo => self.open_wo(req),
            Opcode::WriteFile => self.write(req),
            Opcode::TerminateSession | Opcode::ResetSessions => {
                self.session = None;
                Self::ack(req, 0, vec![])
            }
            Opcode::ListDirectory => self.list(req),
            Opcode::CreateDirectory => self.create_directory(req),
            Opcode::RemoveDirectory => self.remove_directory(req),
            Opcode::RemoveFile => self.remove_file(req),
            Opcode::Rename => self.rename(req),
            Opcode::CalcFileCrc32 => self.crc32(req),
            _ => Self::nak(req, vec![NakCode::UnknownCommand.into()]),
        };
        if req.opcode == Opcode::OpenFileRo && self.dropped < self.options.drop_open_ro_acks {
            // the command was executed, but its ack gets lost in transit
            self.dropped += 1;
            return None;
        }
        Some(reply)
    }

    fn open_ro(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        if !path.exists() {
            // the reference autopilot reports a missing file via errno
            return Self::nak(req, vec![NakCode::FailErrno.into(), 2]);
        }
        let Ok(file) = File::open(&path) else {
            return Self::nak(req, vec![NakCode::Fail.into()]);
        };
        let size = u32::try_from(file.metadata().map(|m| m.len()).unwrap_or(0)).unwrap();
        self.session = Some(Session { file, size });
        Self::ack(req, 1, size.to_le_bytes().to_vec())
    }

    fn read(&mut self, req: &Payload) -> Payload {
        let Some(session) = self.session.as_mut() else {
            return Self::nak(req, vec![NakCode::InvalidSession.into()]);
        };
        if req.offset >= session.size {
            return Self::nak(req, vec![NakCode::Eof.into()]);
        }
        let want = usize::from(req.size).min(self.options.read_cap);
        let mut data = vec![0u8; want];
        let read = session
            .file
            .seek(SeekFrom::Start(u64::from(req.offset)))
            .and_then(|_| session.file.read(&mut data));
        match read {
            Ok(n) => {
                data.truncate(n);
                Self::ack(req, 1, data)
            }
            Err(_) => Self::nak(req, vec![NakCode::FileIoError.into()]),
        }
    }

    fn open_wo(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        match File::create(&path) {
            Ok(file) => {
                self.session = Some(Session { file, size: 0 });
                Self::ack(req, 1, vec![])
            }
            Err(_) => Self::nak(req, vec![NakCode::FileIoError.into()]),
        }
    }

    fn write(&mut self, req: &Payload) -> Payload {
        let Some(session) = self.session.as_mut() else {
            return Self::nak(req, vec![NakCode::InvalidSession.into()]);
        };
        let write = session
            .file
            .seek(SeekFrom::Start(u64::from(req.offset)))
            .and_then(|_| session.file.write_all(&req.data));
        match write {
            Ok(()) => Self::ack(req, 1, vec![]),
            Err(_) => Self::nak(req, vec![NakCode::FileIoError.into()]),
        }
    }

    fn list(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        let Ok(dir) = std::fs::read_dir(&path) else {
            return Self::nak(req, vec![NakCode::FileDoesNotExist.into()]);
        };
        let mut entries: Vec<String> = dir
            .filter_map(Result::ok)
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if e.path().is_dir() {
                    format!("D{name}")
                } else {
                    let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                    format!("F{name}\t{size}")
                }
            })
            .collect();
        entries.sort();
        let mut data = Vec::new();
        let mut sent = 0;
        for entry in entries.iter().skip(req.offset as usize) {
            if sent == self.options.list_cap || data.len() + entry.len() + 1 > MAX_DATA {
                break;
            }
            data.extend_from_slice(entry.as_bytes());
            data.push(0);
            sent += 1;
        }
        Self::ack(req, 0, data)
    }

    fn create_directory(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        if path.exists() {
            return Self::nak(req, vec![NakCode::FileExists.into()]);
        }
        match std::fs::create_dir(&path) {
            Ok(()) => Self::ack(req, 0, vec![]),
            Err(_) => Self::nak(req, vec![NakCode::Fail.into()]),
        }
    }

    fn remove_directory(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        if !path.exists() {
            return Self::nak(req, vec![NakCode::FileDoesNotExist.into()]);
        }
        match std::fs::remove_dir(&path) {
            Ok(()) => Self::ack(req, 0, vec![]),
            Err(_) => Self::nak(req, vec![NakCode::Fail.into()]),
        }
    }

    fn remove_file(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        if !path.exists() {
            return Self::nak(req, vec![NakCode::FileDoesNotExist.into()]);
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Self::ack(req, 0, vec![]),
            Err(_) => Self::nak(req, vec![NakCode::Fail.into()]),
        }
    }

    fn rename(&mut self, req: &Payload) -> Payload {
        let text = &req.data;
        let mut parts = text.split(|b| *b == 0).filter(|s| !s.is_empty());
        let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
            return Self::nak(req, vec![NakCode::InvalidDataSize.into()]);
        };
        let from = self.resolve(&String::from_utf8_lossy(from));
        let to = self.resolve(&String::from_utf8_lossy(to));
        if !from.exists() {
            return Self::nak(req, vec![NakCode::FileDoesNotExist.into()]);
        }
        match std::fs::rename(&from, &to) {
            Ok(()) => Self::ack(req, 0, vec![]),
            Err(_) => Self::nak(req, vec![NakCode::Fail.into()]),
        }
    }

    fn crc32(&mut self, req: &Payload) -> Payload {
        let path = self.resolve(&Self::path_arg(&req.data));
        if !path.exists() {
            return Self::nak(req, vec![NakCode::FailErrno.into(), 2]);
        }
        match crc32_file(&path) {
            Ok(crc) => Self::ack(req, 0, crc.to_le_bytes().to_vec()),
            Err(_) => Self::nak(req, vec![NakCode::FileIoError.into()]),
        }
    }
}

/// Spins up a client wired to a fake server over the given root directory.
/// Returns the client and a log of every request the server saw.
fn start(root: PathBuf, options: ServerOptions, config: ClientConfig) -> (FtpClient, Arc<Mutex<Vec<Payload>>>) {
    let (tx, rx) = mpsc::channel::<TransferMessage>();
    let client = FtpClient::new(
        config,
        Box::new(move |message: &TransferMessage| {
            let _ = tx.send(message.clone());
        }),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let server_client = client.clone();
    let server_log = Arc::clone(&log);
    let _ = thread::Builder::new().name("fake-server".into()).spawn(move || {
        let mut state = ServerState {
            root,
            options,
            session: None,
            dropped: 0,
        };
        while let Ok(message) = rx.recv() {
            let Ok(request) = message.payload() else {
                continue;
            };
            server_log.lock().unwrap().push(request.clone());
            if let Some(reply) = state.handle(&request) {
                server_client.process_message(&TransferMessage::new(
                    1,
                    1,
                    0,
                    245,
                    190,
                    reply.encode().to_vec(),
                ));
            }
        }
    });
    (client, log)
}

fn fixture(options: ServerOptions) -> (FtpClient, Arc<Mutex<Vec<Payload>>>, tempfile::TempDir) {
    let root = tempfile::tempdir().unwrap();
    let (client, log) = start(root.path().to_path_buf(), options, ClientConfig::default());
    (client, log, root)
}

fn download_collecting(
    client: &FtpClient,
    remote: &str,
    folder: &std::path::Path,
) -> Receiver<(ClientResult, ProgressData)> {
    let (tx, rx) = mpsc::channel();
    client.download(
        remote,
        folder,
        Box::new(move |result, progress| {
            let _ = tx.send((result, progress));
        }),
    );
    rx
}

fn drain_to_terminal(events: &Receiver<(ClientResult, ProgressData)>) -> (ClientResult, Vec<ProgressData>) {
    let mut progress = Vec::new();
    loop {
        let (result, p) = events.recv_timeout(RECV).unwrap();
        if result == ClientResult::Next {
            progress.push(p);
        } else {
            return (result, progress);
        }
    }
}

#[test]
fn small_download_reports_progress_and_content() {
    let (client, _log, root) = fixture(ServerOptions {
        read_cap: 16,
        ..ServerOptions::default()
    });
    let body: Vec<u8> = (0..50u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(root.path().join("data.bin"), &body).unwrap();
    let dest = tempfile::tempdir().unwrap();

    let events = download_collecting(&client, "data.bin", dest.path());
    let (result, progress) = drain_to_terminal(&events);
    assert_eq!(result, ClientResult::Success);
    let seen: Vec<(u32, u32)> = progress
        .iter()
        .map(|p| (p.bytes_transferred, p.total_bytes))
        .collect();
    assert_eq!(seen, vec![(16, 50), (32, 50), (48, 50)]);
    assert_eq!(std::fs::read(dest.path().join("data.bin")).unwrap(), body);
}

#[test]
fn lost_ack_is_retried_with_the_same_sequence_number() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("data.bin"), b"hello remote").unwrap();
    let config = ClientConfig {
        response_timeout: Duration::from_millis(100),
        ..ClientConfig::default()
    };
    let (client, log) = start(
        root.path().to_path_buf(),
        ServerOptions {
            drop_open_ro_acks: 1,
            ..ServerOptions::default()
        },
        config,
    );
    let dest = tempfile::tempdir().unwrap();

    let events = download_collecting(&client, "data.bin", dest.path());
    let (result, _) = drain_to_terminal(&events);
    assert_eq!(result, ClientResult::Success);
    assert_eq!(
        std::fs::read(dest.path().join("data.bin")).unwrap(),
        b"hello remote"
    );

    let log = log.lock().unwrap();
    let opens: Vec<&Payload> = log.iter().filter(|p| p.opcode == Opcode::OpenFileRo).collect();
    assert_eq!(opens.len(), 2, "exactly one retry of the open request");
    assert_eq!(opens[0], opens[1], "the retry is byte-for-byte identical");
}

#[test]
fn missing_remote_file_reports_file_does_not_exist() {
    let (client, _log, _root) = fixture(ServerOptions::default());
    let dest = tempfile::tempdir().unwrap();
    let events = download_collecting(&client, "nope.bin", dest.path());
    let (result, progress) = drain_to_terminal(&events);
    assert_eq!(result, ClientResult::FileDoesNotExist);
    assert!(progress.is_empty());
    // terminal means terminal: no further callbacks
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn directory_listing_paginates_and_preserves_order() {
    let (client, log, root) = fixture(ServerOptions {
        list_cap: 6,
        ..ServerOptions::default()
    });
    for i in 0..50 {
        std::fs::write(root.path().join(format!("file{i:02}")), b"data").unwrap();
    }

    let (result, entries) = client.list_directory("/");
    assert_eq!(result, ClientResult::Success);
    assert_eq!(entries.len(), 50);
    let expected: Vec<String> = (0..50).map(|i| format!("Ffile{i:02}\t4")).collect();
    assert_eq!(entries, expected);

    let offsets: Vec<u32> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.opcode == Opcode::ListDirectory)
        .map(|p| p.offset)
        .collect();
    assert_eq!(offsets, vec![0, 6, 12, 18, 24, 30, 36, 42, 48, 50]);
}

#[test]
fn upload_then_download_round_trips() {
    let (client, log, _root) = fixture(ServerOptions::default());
    let local = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..2048u32).map(|i| (i * 7 % 256) as u8).collect();
    let source = local.path().join("blob.bin");
    std::fs::write(&source, &body).unwrap();

    let (tx, events) = mpsc::channel();
    client.upload(
        &source,
        "/",
        Box::new(move |result, progress| {
            let _ = tx.send((result, progress));
        }),
    );
    let (result, progress) = drain_to_terminal(&events);
    assert_eq!(result, ClientResult::Success);
    assert!(!progress.is_empty());
    let writes = log
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.opcode == Opcode::WriteFile)
        .count();
    assert_eq!(writes, 9); // ceil(2048 / 239)

    let dest = tempfile::tempdir().unwrap();
    let events = download_collecting(&client, "blob.bin", dest.path());
    let (result, _) = drain_to_terminal(&events);
    assert_eq!(result, ClientResult::Success);
    assert_eq!(std::fs::read(dest.path().join("blob.bin")).unwrap(), body);
}

#[test]
fn identical_files_compare_equal_by_checksum() {
    let (client, _log, root) = fixture(ServerOptions::default());
    let local = tempfile::tempdir().unwrap();
    let body = b"the quick brown fox jumps over the lazy dog".to_vec();
    let source = local.path().join("check.bin");
    std::fs::write(&source, &body).unwrap();
    std::fs::write(root.path().join("check.bin"), &body).unwrap();

    assert_eq!(
        client.are_files_identical(&source, "check.bin"),
        (ClientResult::Success, true)
    );

    std::fs::write(&source, b"something else entirely").unwrap();
    assert_eq!(
        client.are_files_identical(&source, "check.bin"),
        (ClientResult::Success, false)
    );

    assert_eq!(
        client.are_files_identical(&source, "missing.bin"),
        (ClientResult::FileDoesNotExist, false)
    );
}

#[test]
fn directory_and_file_commands_act_on_the_remote_tree() {
    let (client, _log, root) = fixture(ServerOptions::default());

    assert_eq!(client.create_directory("logs"), ClientResult::Success);
    assert!(root.path().join("logs").is_dir());
    assert_eq!(client.create_directory("logs"), ClientResult::FileExists);

    std::fs::write(root.path().join("logs/a.txt"), b"x").unwrap();
    assert_eq!(
        client.rename("logs/a.txt", "logs/b.txt"),
        ClientResult::Success
    );
    assert!(root.path().join("logs/b.txt").exists());

    assert_eq!(client.remove_file("logs/b.txt"), ClientResult::Success);
    assert_eq!(
        client.remove_file("logs/b.txt"),
        ClientResult::FileDoesNotExist
    );
    assert_eq!(client.remove_directory("logs"), ClientResult::Success);
    assert!(!root.path().join("logs").exists());
}

#[test]
fn back_to_back_requests_serialize_and_complete_in_order() {
    let (client, log, root) = fixture(ServerOptions::default());
    std::fs::write(root.path().join("first.bin"), vec![1u8; 600]).unwrap();
    std::fs::write(root.path().join("second.bin"), vec![2u8; 600]).unwrap();
    let dest = tempfile::tempdir().unwrap();

    let finished = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    for name in ["first.bin", "second.bin"] {
        let finished = Arc::clone(&finished);
        let tx = tx.clone();
        client.download(
            name,
            dest.path(),
            Box::new(move |result, _| {
                if result != ClientResult::Next {
                    finished.lock().unwrap().push((name, result));
                    let _ = tx.send(());
                }
            }),
        );
    }
    done.recv_timeout(RECV).unwrap();
    done.recv_timeout(RECV).unwrap();

    assert_eq!(
        *finished.lock().unwrap(),
        vec![
            ("first.bin", ClientResult::Success),
            ("second.bin", ClientResult::Success)
        ]
    );

    // No wire traffic for the second job until the first one terminated.
    let log = log.lock().unwrap();
    let second_open = log
        .iter()
        .position(|p| p.opcode == Opcode::OpenFileRo && p.data.starts_with(b"second.bin"))
        .unwrap();
    let first_terminate = log
        .iter()
        .position(|p| p.opcode == Opcode::TerminateSession)
        .unwrap();
    assert!(first_terminate < second_open);
}
