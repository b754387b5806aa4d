// (c) 2025 Ross Younger

//! `mavftp` is a client for the file-transfer sub-protocol carried inside a
//! point-to-point command/telemetry bus between a ground station and a
//! remote vehicle (typically an autopilot).
//!
//! ## Overview
//!
//! The remote side exposes a tiny FTP-like server: open for read or write,
//! chunked reads and writes, directory listing, create/remove/rename, and a
//! whole-file CRC-32. The datagram channel underneath is unreliable, so
//! this crate's heart is a reliable request/response state machine:
//! per-message sequence numbers, a single in-flight session, a retry timer,
//! and duplicate-ack suppression.
//!
//! * [protocol] — the bit-exact payload codec and wire enums
//! * [transport] — the consumed datagram seam ([`TransferMessage`],
//!   [`DatagramSink`])
//! * [`FtpClient`] — the user-facing surface
//!
//! ## How it works
//!
//! User requests join a FIFO; only the head is ever on the wire. Each
//! outbound request arms a one-shot timer; a matching ACK advances the
//! operation, a NAK ends it with a translated error, and silence re-sends
//! the request byte-for-byte until the retry budget runs out. Completion
//! (or failure) pops the job and starts the next one. User callbacks always
//! run on a dedicated worker thread.
//!
//! ## Example
//!
//! ```no_run
//! use mavftp::{ClientConfig, FtpClient, TransferMessage};
//!
//! // Wire the client to your bus; here, a sink that drops everything.
//! let client = FtpClient::new(ClientConfig::default(), Box::new(|_msg: &TransferMessage| {}));
//! // Feed incoming FILE_TRANSFER_PROTOCOL datagrams to client.process_message(..),
//! // then issue requests:
//! client.download("/log/flight.ulg", "/tmp", Box::new(|result, progress| {
//!     println!("{result}: {} of {}", progress.bytes_transferred, progress.total_bytes);
//! }));
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod client;
pub use client::{
    AreFilesIdenticalCallback, ClientConfig, ClientResult, DownloadCallback, FtpClient,
    ListDirectoryCallback, ProgressData, ResultCallback, UploadCallback,
};

pub mod protocol;

pub mod transport;
pub use transport::{DatagramSink, TransferMessage};

pub mod util;
