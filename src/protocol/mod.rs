//! Wire definitions for the file-transfer sub-protocol
// (c) 2025 Ross Younger
//!
//! # On-wire layout
//!
//! Every exchange is one [`Payload`] embedded in an outer point-to-point
//! datagram (see [`crate::transport`]). The payload is a fixed 12-byte
//! header followed by up to [`MAX_DATA`] data bytes:
//!
//! | field | width | meaning |
//! |---|---|---|
//! | `seq_number` | u16 LE | incremented per outbound message; wraps |
//! | `session` | u8 | server-assigned handle, 0 before assignment |
//! | `opcode` | u8 | request code on send; `Ack`/`Nak` on receive |
//! | `size` | u8 | data length, or requested length on a read |
//! | `req_opcode` | u8 | on a response, the opcode being acknowledged |
//! | `burst_complete` | u8 | last chunk of a burst reply (unused here) |
//! | padding | u8 | always 0 |
//! | `offset` | u32 LE | command-specific |
//!
//! The server answers every request with [`Opcode::Ack`] or [`Opcode::Nak`],
//! echoing the request's opcode in `req_opcode`. A NAK carries a [`NakCode`]
//! in its first data byte. Retried requests are re-sent byte-for-byte with
//! the same `seq_number`, so both peers suppress duplicates by sequence
//! number; [`seq_lt`] provides the wrap-around ordering used to drop very
//! old responses.

mod opcode;
pub use opcode::{ERRNO_ENOENT, NakCode, Opcode};

mod payload;
pub use payload::{HEADER_LEN, MAX_DATA, PAYLOAD_LEN, Payload};

mod seq;
pub use seq::seq_lt;
