//! Payload abstraction for multi-packet transfers. A session can own its
//! bytes, borrow a `'static` buffer without copying, or pull chunks from a
//! producer callback so large payloads never exist in memory at once.
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

/// Producer callback for [`TransportData::Chunked`]. Called with the byte
/// offset of the chunk to produce; fills the provided buffer completely
/// (except possibly the final chunk).
pub type ChunkCallback = Box<dyn FnMut(usize, &mut [u8])>;

/// Source or sink of a transport session's payload.
pub enum TransportData {
    /// Heap-owned buffer. Rx sessions always use this variant.
    Owned(Vec<u8>),
    /// Borrowed immutable buffer, e.g. a constant object pool baked into
    /// flash. Only valid for tx sessions.
    Static(&'static [u8]),
    /// Chunk producer for payloads generated on the fly. Only valid for tx
    /// sessions; the callback must be able to reproduce any chunk offset
    /// because CTS flow control can rewind the stream.
    Chunked {
        /// Total payload length announced in the RTS/BAM.
        total: usize,
        /// Chunk producer.
        fetch: ChunkCallback,
    },
}

impl TransportData {
    /// Allocate an owned, zero-filled rx buffer of `len` bytes.
    pub fn rx_buffer(len: usize) -> Self {
        TransportData::Owned(vec![0; len])
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            TransportData::Owned(data) => data.len(),
            TransportData::Static(data) => data.len(),
            TransportData::Chunked { total, .. } => *total,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`. Bytes past the
    /// end of the payload are left untouched; the caller pre-fills padding.
    pub fn read_at(&mut self, offset: usize, out: &mut [u8]) {
        let total = self.len();
        if offset >= total {
            return;
        }
        let available = (total - offset).min(out.len());
        match self {
            TransportData::Owned(data) => {
                out[..available].copy_from_slice(&data[offset..offset + available]);
            }
            TransportData::Static(data) => {
                out[..available].copy_from_slice(&data[offset..offset + available]);
            }
            TransportData::Chunked { fetch, .. } => {
                fetch(offset, &mut out[..available]);
            }
        }
    }

    /// Store one received byte. Silently ignores writes outside the buffer or
    /// on non-owned variants; rx sessions are always created over owned data.
    pub fn write_byte(&mut self, index: usize, value: u8) {
        if let TransportData::Owned(data) = self {
            if index < data.len() {
                data[index] = value;
            }
        }
    }

    /// Consume the payload into an owned vector. Chunked payloads are
    /// materialized through their callback.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            TransportData::Owned(data) => data,
            TransportData::Static(data) => data.to_vec(),
            TransportData::Chunked { total, mut fetch } => {
                let mut out = vec![0; total];
                fetch(0, &mut out);
                out
            }
        }
    }
}

impl core::fmt::Debug for TransportData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportData::Owned(data) => f.debug_tuple("Owned").field(&data.len()).finish(),
            TransportData::Static(data) => f.debug_tuple("Static").field(&data.len()).finish(),
            TransportData::Chunked { total, .. } => {
                f.debug_struct("Chunked").field("total", total).finish()
            }
        }
    }
}
