//! Encode and decode ready notifications.
//!
//! A ready notification is exactly [SIZE] raw bytes: the most significant half of the
//! [CorrelationId] followed by the least significant half, both big-endian. Any consumer of the
//! ready channel, in or out of process, must use this encoding.

use crate::{CorrelationId, Error};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length of an encoded notification.
pub const SIZE: usize = 16;

/// Encode `id` into a ready notification.
pub fn encode(id: &CorrelationId) -> Bytes {
    let mut buf = BytesMut::with_capacity(SIZE);
    write(id, &mut buf);
    buf.freeze()
}

/// Write the wire form of `id` into `buf`.
pub fn write(id: &CorrelationId, buf: &mut impl BufMut) {
    buf.put_u64(id.msb());
    buf.put_u64(id.lsb());
}

/// Decode a ready notification, failing if it is not exactly [SIZE] bytes.
pub fn decode(mut buf: impl Buf) -> Result<CorrelationId, Error> {
    let len = buf.remaining();
    if len != SIZE {
        return Err(Error::MalformedNotification(len));
    }
    let msb = buf.get_u64();
    let lsb = buf.get_u64();
    Ok(CorrelationId::new(msb, lsb))
}
