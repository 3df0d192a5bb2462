use crate::error::{CarError, CarResult};

/// Encode a u64 as an unsigned LEB128 varint.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint starting at `offset`. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8], offset: usize) -> CarResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.get(offset..).unwrap_or_default().iter().enumerate() {
        if shift >= 64 {
            return Err(CarError::Corrupt {
                offset,
                reason: "varint overflow".into(),
            });
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CarError::Corrupt {
        offset,
        reason: "truncated varint".into(),
    })
}
