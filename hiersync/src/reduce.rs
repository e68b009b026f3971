//! Element-wise reduction and the little-endian wire encoding of `f32`
//! buffers shared by the collective algorithms.

use crate::error::{HierSyncError, Result};
use crate::types::ReduceOp;

const ELEM_SIZE: usize = std::mem::size_of::<f32>();

/// Encode a slice of `f32` as little-endian bytes.
pub(crate) fn encode(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * ELEM_SIZE);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Overwrite `dst` with the values encoded in `src`.
pub(crate) fn decode_into(dst: &mut [f32], src: &[u8]) -> Result<()> {
    check_len(dst.len(), src)?;
    for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(ELEM_SIZE)) {
        *d = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

/// Element-wise `dst[i] = op(dst[i], src[i])` with `src` in wire encoding.
pub(crate) fn reduce_into(dst: &mut [f32], src: &[u8], op: ReduceOp) -> Result<()> {
    check_len(dst.len(), src)?;
    for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(ELEM_SIZE)) {
        let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        *d = op.apply(*d, v);
    }
    Ok(())
}

/// Divide every element by `divisor`.
pub(crate) fn scale_down(values: &mut [f32], divisor: u32) {
    let d = divisor as f32;
    for v in values.iter_mut() {
        *v /= d;
    }
}

fn check_len(count: usize, src: &[u8]) -> Result<()> {
    let expected = count * ELEM_SIZE;
    if src.len() != expected {
        return Err(HierSyncError::BufferSizeMismatch {
            expected,
            actual: src.len(),
        });
    }
    Ok(())
}
