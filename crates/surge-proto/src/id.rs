//! Unique id generation.
//!
//! Node uids are random uuids in canonical form. Publication uids are short
//! 22-character base62 strings built from a random per-process prefix and an
//! atomic sequence, unique across the cluster with overwhelming probability.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use uuid::Uuid;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Random prefix length of a publication uid.
const PREFIX_LEN: usize = 12;

/// Sequence suffix length of a publication uid.
const SEQ_LEN: usize = 10;

/// Total publication uid length.
pub const PUBLICATION_UID_LEN: usize = PREFIX_LEN + SEQ_LEN;

const SEQ_SPACE: u64 = 62u64.pow(SEQ_LEN as u32);

struct Generator {
    prefix: [u8; PREFIX_LEN],
    seq: AtomicU64,
}

static GENERATOR: OnceLock<Generator> = OnceLock::new();

fn generator() -> &'static Generator {
    GENERATOR.get_or_init(|| {
        let bytes = Uuid::new_v4().into_bytes();
        let mut prefix = [0u8; PREFIX_LEN];
        for (i, b) in prefix.iter_mut().enumerate() {
            *b = BASE62[bytes[i] as usize % 62];
        }
        let seed = u64::from_be_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        Generator {
            prefix,
            seq: AtomicU64::new(seed % SEQ_SPACE),
        }
    })
}

/// Generate a fresh node uid (canonical 36-character uuid).
#[must_use]
pub fn node_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate the next publication uid.
#[must_use]
pub fn next() -> String {
    let g = generator();
    let n = g.seq.fetch_add(1, Ordering::Relaxed) % SEQ_SPACE;

    let mut out = [0u8; PUBLICATION_UID_LEN];
    out[..PREFIX_LEN].copy_from_slice(&g.prefix);

    let mut rem = n;
    for slot in out[PREFIX_LEN..].iter_mut().rev() {
        *slot = BASE62[(rem % 62) as usize];
        rem /= 62;
    }

    // Both halves are drawn from BASE62, so the buffer is valid ASCII.
    String::from_utf8_lossy(&out).into_owned()
}
