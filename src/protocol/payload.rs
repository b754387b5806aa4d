//! Bit-exact codec for the file-transfer payload
// (c) 2025 Ross Younger

use anyhow::{Result, anyhow, ensure};
use bytes::{Buf, BufMut};

use super::Opcode;

/// Maximum number of data bytes a single payload can carry.
///
/// This is the outer message's payload capacity minus [`HEADER_LEN`].
pub const MAX_DATA: usize = 239;

/// The on-wire size of the fixed payload header, which is fixed (any change
/// would constitute a breaking protocol change).
pub const HEADER_LEN: usize = 12;

/// The on-wire size of a full payload buffer: header plus data region.
pub const PAYLOAD_LEN: usize = HEADER_LEN + MAX_DATA;

/// One file-transfer payload, as embedded in the outer datagram.
///
/// The `size` header field is kept distinct from `data`: a `ReadFile` request
/// carries the *requested* byte count in `size` with an empty data region,
/// whereas data-bearing payloads keep `size == data.len()`. [`Payload::decode`]
/// always yields `data.len() == size`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    /// Monotonically incremented per outbound message; wraps at 16 bits
    pub seq_number: u16,
    /// Server-assigned session handle, 0 before assignment
    pub session: u8,
    /// Request code on send; `Ack` or `Nak` on receive
    pub opcode: Opcode,
    /// Data length, or requested length on a read request (0..=MAX_DATA)
    pub size: u8,
    /// On a response, the opcode being acknowledged
    pub req_opcode: Opcode,
    /// Set on the last chunk of a burst reply (unused by this client)
    pub burst_complete: bool,
    /// Command-specific: file offset, directory-listing offset, ...
    pub offset: u32,
    /// Data region, at most [`MAX_DATA`] bytes
    pub data: Vec<u8>,
}

impl Payload {
    /// Builds a data-less request; `size` and `data` stay empty.
    #[must_use]
    pub fn request(opcode: Opcode, seq_number: u16, session: u8, offset: u32) -> Self {
        Self {
            seq_number,
            session,
            opcode,
            offset,
            ..Self::default()
        }
    }

    /// Attaches a data region, setting `size` to match.
    ///
    /// Anything beyond [`MAX_DATA`] bytes is truncated; callers are expected
    /// to have validated their data length beforehand.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self.data.truncate(MAX_DATA);
        #[allow(clippy::cast_possible_truncation)]
        {
            self.size = self.data.len() as u8;
        }
        self
    }

    /// Encodes to the fixed on-wire buffer.
    ///
    /// All multi-byte fields are little-endian; the data region is
    /// zero-filled beyond `size`.
    #[must_use]
    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        debug_assert!(self.data.len() <= MAX_DATA);
        let mut wire = [0u8; PAYLOAD_LEN];
        let mut buf = &mut wire[..];
        buf.put_u16_le(self.seq_number);
        buf.put_u8(self.session);
        buf.put_u8(self.opcode.into());
        buf.put_u8(self.size);
        buf.put_u8(self.req_opcode.into());
        buf.put_u8(u8::from(self.burst_complete));
        buf.put_u8(0); // padding
        buf.put_u32_le(self.offset);
        wire[HEADER_LEN..HEADER_LEN + self.data.len()].copy_from_slice(&self.data);
        wire
    }

    /// Decodes from an on-wire buffer, truncating the data region to `size`.
    ///
    /// # Errors
    /// Short buffers, unknown opcodes and a `size` beyond [`MAX_DATA`] are
    /// all rejected; the caller is expected to drop such a datagram.
    pub fn decode(wire: &[u8]) -> Result<Self> {
        ensure!(
            wire.len() >= HEADER_LEN,
            "short payload ({} bytes)",
            wire.len()
        );
        let mut buf = wire;
        let seq_number = buf.get_u16_le();
        let session = buf.get_u8();
        let opcode = buf.get_u8();
        let opcode = Opcode::try_from(opcode).map_err(|_| anyhow!("unknown opcode {opcode}"))?;
        let size = buf.get_u8();
        let req_opcode = buf.get_u8();
        let req_opcode =
            Opcode::try_from(req_opcode).map_err(|_| anyhow!("unknown req_opcode {req_opcode}"))?;
        let burst_complete = buf.get_u8() != 0;
        let _padding = buf.get_u8();
        let offset = buf.get_u32_le();
        ensure!(usize::from(size) <= MAX_DATA, "invalid payload size {size}");
        ensure!(
            buf.remaining() >= usize::from(size),
            "payload data truncated ({} < {size})",
            buf.remaining()
        );
        let data = buf[..usize::from(size)].to_vec();
        Ok(Self {
            seq_number,
            session,
            opcode,
            size,
            req_opcode,
            burst_complete,
            offset,
            data,
        })
    }
}
