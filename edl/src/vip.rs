// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! "Stealth" raw-transfer framing for VIP-authenticated loaders. The
//! semantics match the plain transfers; only the wire form differs:
//! every payload chunk travels with its SHA-256 digest so the loader
//! can check it against the signed digest table.
//!
//! The framing is reverse-engineered, which is why the whole module
//! sits behind the `vip` cargo feature and an explicit config flag.

use sha2::{Digest, Sha256};
use std::io::Write as _;

use crate::firehose::fh_read_exact;
use crate::types::EdlChan;
use crate::{FirehoseError, NakError};

/// Digest of one raw chunk, as the loader computes it.
pub fn chunk_digest(chunk: &[u8]) -> [u8; 32] {
    Sha256::digest(chunk).into()
}

/// Write one raw chunk in stealth form: digest frame first, then the
/// payload itself.
pub(crate) fn stealth_send_chunk<T: EdlChan>(
    chan: &mut T,
    chunk: &[u8],
) -> Result<(), FirehoseError> {
    chan.write_all(&chunk_digest(chunk))?;
    chan.write_all(chunk)?;
    chan.flush()?;
    Ok(())
}

/// Raw reads in stealth mode carry a 32-byte digest trailer; a mismatch
/// means the loader and host disagree about what was transferred.
pub(crate) fn stealth_check_read_trailer<T: EdlChan>(
    chan: &mut T,
    chunk: &[u8],
) -> Result<(), FirehoseError> {
    let mut trailer = [0u8; 32];
    fh_read_exact(chan, &mut trailer)?;
    if chunk_digest(chunk) != trailer {
        return Err(FirehoseError::Nak(NakError::Auth));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testchan::MockChan;

    #[test]
    fn stealth_chunk_is_digest_then_payload() {
        let mut chan = MockChan::new();
        let chunk = vec![0x5a; 512];
        stealth_send_chunk(&mut chan, &chunk).unwrap();

        assert_eq!(chan.outbound.len(), 32 + 512);
        assert_eq!(chan.outbound[..32], chunk_digest(&chunk));
        assert_eq!(&chan.outbound[32..], &chunk[..]);
    }

    #[test]
    fn read_trailer_mismatch_is_rejected() {
        let mut chan = MockChan::with_inbound(vec![0u8; 32]);
        let err = stealth_check_read_trailer(&mut chan, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, FirehoseError::Nak(NakError::Auth)));
    }
}
