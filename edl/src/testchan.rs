// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Scripted in-memory channel for protocol tests. Inbound bytes are
//! queued up front; everything the code under test writes is captured.

use std::io::{self, Read, Write};

use crate::types::{
    CancelToken, ChipIdentity, EdlChan, FirehoseConfiguration, SessionState,
};

pub(crate) struct MockChan {
    inbound: Vec<u8>,
    pos: usize,
    pub outbound: Vec<u8>,
    pub cfg: FirehoseConfiguration,
    cancel: CancelToken,
    stash: Vec<u8>,
    logs: Vec<String>,
    state: SessionState,
    chip: Option<ChipIdentity>,
}

impl MockChan {
    pub(crate) fn new() -> Self {
        Self::with_inbound(Vec::new())
    }

    pub(crate) fn with_inbound(inbound: Vec<u8>) -> Self {
        Self {
            inbound,
            pos: 0,
            outbound: Vec::new(),
            cfg: FirehoseConfiguration::default(),
            cancel: CancelToken::new(),
            stash: Vec::new(),
            logs: Vec::new(),
            state: SessionState::Connecting,
            chip: None,
        }
    }

    /// Queue more device-side bytes.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    pub(crate) fn outbound_str(&self) -> String {
        String::from_utf8_lossy(&self.outbound).into_owned()
    }
}

impl Read for MockChan {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.inbound.len() {
            // The scripted device has nothing more to say.
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = std::cmp::min(buf.len(), self.inbound.len() - self.pos);
        buf[..n].copy_from_slice(&self.inbound[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MockChan {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EdlChan for MockChan {
    fn fh_config(&self) -> &FirehoseConfiguration {
        &self.cfg
    }

    fn mut_fh_config(&mut self) -> &mut FirehoseConfiguration {
        &mut self.cfg
    }

    fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn stash(&mut self) -> &mut Vec<u8> {
        &mut self.stash
    }

    fn firehose_logs(&mut self) -> &mut Vec<String> {
        &mut self.logs
    }

    fn session_state(&self) -> SessionState {
        self.state
    }

    fn set_session_state(&mut self, state: SessionState) {
        self.state = state;
    }

    fn chip_identity(&self) -> Option<&ChipIdentity> {
        self.chip.as_ref()
    }

    fn latch_chip_identity(&mut self, id: ChipIdentity) {
        self.chip = Some(id);
    }
}
