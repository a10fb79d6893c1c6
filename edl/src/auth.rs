// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Vendor-specific authentication exchanges. Each runs once per
//! session, before any privileged command; a rejection is not fatal,
//! privileged commands simply NAK later.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io::Write as _;

use crate::firehose::{check_cancel, firehose_send, firehose_xml_setup};
use crate::parsers::firehose_parser_ack_nak;
use crate::types::{AuthMode, EdlChan};
use crate::{FirehoseError, FirehoseStatus, firehose_configure, firehose_read};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Rejected(String),
    /// The device wants this token signed externally; auth is suspended,
    /// not failed.
    ChallengeRequired(String),
}

/// Externally supplied authentication material.
#[derive(Clone, Debug, Default)]
pub struct AuthArtifacts {
    /// VIP digest blob, verbatim from the vendor package.
    pub digest: Option<Vec<u8>>,
    /// VIP RSA-2048 signature (256 bytes).
    pub signature: Option<Vec<u8>>,
    /// Candidate MiAuth signatures, tried in order.
    pub mi_signatures: Vec<Vec<u8>>,
}

pub trait Authenticator {
    fn label(&self) -> &'static str;

    fn authenticate<T: EdlChan>(&mut self, chan: &mut T) -> Result<AuthOutcome, FirehoseError>;
}

fn send_sig_header<T: EdlChan>(
    chan: &mut T,
    target: &str,
    size_in_bytes: usize,
) -> Result<(), FirehoseError> {
    let pkt = firehose_xml_setup(
        "sig",
        &[
            ("TargetName", target),
            ("size_in_bytes", &size_in_bytes.to_string()),
            ("verbose", "0"),
        ],
    )?;
    firehose_send(chan, &pkt)
}

fn send_blob_and_wait<T: EdlChan>(
    chan: &mut T,
    target: &str,
    blob: &[u8],
) -> Result<FirehoseStatus, FirehoseError> {
    check_cancel(chan)?;
    send_sig_header(chan, target, blob.len())?;
    chan.write_all(blob)?;
    chan.flush()?;
    firehose_read(chan, firehose_parser_ack_nak)
}

/// OPLUS/Realme VIP: a pre-signed digest blob followed by the RSA-2048
/// signature over it, sealed with a second \<configure\> round.
pub struct VipAuth {
    pub digest: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Authenticator for VipAuth {
    fn label(&self) -> &'static str {
        "vip"
    }

    fn authenticate<T: EdlChan>(&mut self, chan: &mut T) -> Result<AuthOutcome, FirehoseError> {
        if self.signature.len() != 256 {
            return Err(FirehoseError::Unsupported(
                "VIP signature must be exactly 256 bytes",
            ));
        }

        if send_blob_and_wait(chan, "digest", &self.digest)? == FirehoseStatus::Nak {
            return Ok(AuthOutcome::Rejected("digest table refused".into()));
        }
        if send_blob_and_wait(chan, "sig", &self.signature)? == FirehoseStatus::Nak {
            return Ok(AuthOutcome::Rejected("signature refused".into()));
        }

        // The loader re-runs capability negotiation in VIP mode.
        firehose_configure(chan, false)?;
        if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
            return Ok(AuthOutcome::Rejected("VIP reconfigure refused".into()));
        }

        Ok(AuthOutcome::Authenticated)
    }
}

/// Xiaomi: try each known signature; when all fail, request a challenge
/// token for external signing.
pub struct MiAuth {
    pub signatures: Vec<Vec<u8>>,
}

/// Tokens come back either Base64 already (they start with "VQ") or as
/// a hex string that still needs encoding.
pub(crate) fn normalize_challenge(raw: &str) -> String {
    if raw.starts_with("VQ") {
        return raw.to_owned();
    }
    match hex::decode(raw.trim()) {
        Ok(bytes) => BASE64.encode(bytes),
        Err(_) => raw.to_owned(),
    }
}

impl Authenticator for MiAuth {
    fn label(&self) -> &'static str {
        "miauth"
    }

    fn authenticate<T: EdlChan>(&mut self, chan: &mut T) -> Result<AuthOutcome, FirehoseError> {
        for sig in &self.signatures {
            if send_blob_and_wait(chan, "sig", sig)? == FirehoseStatus::Ack {
                return Ok(AuthOutcome::Authenticated);
            }
        }

        // None of the canned signatures took; ask for a challenge.
        check_cancel(chan)?;
        let pkt = firehose_xml_setup("sig", &[("TargetName", "req"), ("verbose", "0")])?;
        firehose_send(chan, &pkt)?;

        let mut token: Option<String> = None;
        let status = firehose_read(chan, |c, attrs| match firehose_parser_ack_nak(c, attrs) {
            Ok(s) => Ok(s),
            Err(FirehoseError::MalformedData(_)) => {
                // Not ACK/NAK: the "value" carries the token itself.
                token = attrs.get("value").cloned();
                Ok(FirehoseStatus::Ack)
            }
            Err(e) => Err(e),
        })?;

        match token {
            Some(t) => Ok(AuthOutcome::ChallengeRequired(normalize_challenge(&t))),
            None if status == FirehoseStatus::Nak => {
                Ok(AuthOutcome::Rejected("challenge request refused".into()))
            }
            None => Ok(AuthOutcome::Rejected("no challenge token offered".into())),
        }
    }
}

/// OnePlus: a fixed post-configure unlock sequence, no external secrets.
pub struct DemaciaAuth;

impl Authenticator for DemaciaAuth {
    fn label(&self) -> &'static str {
        "demacia"
    }

    fn authenticate<T: EdlChan>(&mut self, chan: &mut T) -> Result<AuthOutcome, FirehoseError> {
        for cmd in ["demacia", "setprojmodel"] {
            check_cancel(chan)?;
            let pkt = firehose_xml_setup(cmd, &[])?;
            firehose_send(chan, &pkt)?;
            if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
                return Ok(AuthOutcome::Rejected(format!("<{cmd}> refused")));
            }
        }
        Ok(AuthOutcome::Authenticated)
    }
}

/// Dispatch on the configured mode. `AuthMode::None` trivially succeeds.
pub fn run_auth<T: EdlChan>(
    chan: &mut T,
    mode: AuthMode,
    artifacts: &AuthArtifacts,
) -> Result<AuthOutcome, FirehoseError> {
    match mode {
        AuthMode::None => Ok(AuthOutcome::Authenticated),
        AuthMode::Vip => {
            let (Some(digest), Some(signature)) =
                (artifacts.digest.clone(), artifacts.signature.clone())
            else {
                return Err(FirehoseError::Unsupported(
                    "VIP auth requires a digest and a signature file",
                ));
            };
            VipAuth { digest, signature }.authenticate(chan)
        }
        AuthMode::Xiaomi => MiAuth {
            signatures: artifacts.mi_signatures.clone(),
        }
        .authenticate(chan),
        AuthMode::OnePlus => DemaciaAuth.authenticate(chan),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testchan::MockChan;

    const ACK: &[u8] = b"<data><response value=\"ACK\"/></data>";
    const NAK: &[u8] = b"<data><response value=\"NAK\"/></data>";

    #[test]
    fn challenge_normalization() {
        // Already Base64.
        assert_eq!(normalize_challenge("VQIDBAU="), "VQIDBAU=");
        // Hex becomes Base64.
        assert_eq!(normalize_challenge("01020304"), "AQIDBA==");
        // Garbage passes through untouched.
        assert_eq!(normalize_challenge("zz-not-hex"), "zz-not-hex");
    }

    #[test]
    fn vip_happy_path() {
        let mut chan = MockChan::new();
        chan.feed(ACK); // digest
        chan.feed(ACK); // signature
        chan.feed(ACK); // reconfigure

        let mut auth = VipAuth {
            digest: vec![0x11; 96],
            signature: vec![0x22; 256],
        };
        assert_eq!(
            auth.authenticate(&mut chan).unwrap(),
            AuthOutcome::Authenticated
        );

        let sent = chan.outbound_str();
        assert!(sent.contains("TargetName=\"digest\""));
        assert!(sent.contains("TargetName=\"sig\""));
        assert!(sent.contains("size_in_bytes=\"256\""));
        assert!(sent.contains("<configure"));
    }

    #[test]
    fn vip_digest_refusal_falls_back() {
        let mut chan = MockChan::new();
        chan.feed(NAK);

        let mut auth = VipAuth {
            digest: vec![0; 32],
            signature: vec![0; 256],
        };
        assert!(matches!(
            auth.authenticate(&mut chan).unwrap(),
            AuthOutcome::Rejected(_)
        ));
    }

    #[test]
    fn vip_odd_signature_length_is_refused_host_side() {
        let mut chan = MockChan::new();
        let mut auth = VipAuth {
            digest: vec![0; 32],
            signature: vec![0; 64],
        };
        assert!(matches!(
            auth.authenticate(&mut chan),
            Err(FirehoseError::Unsupported(_))
        ));
    }

    #[test]
    fn miauth_second_signature_wins() {
        let mut chan = MockChan::new();
        chan.feed(NAK);
        chan.feed(ACK);

        let mut auth = MiAuth {
            signatures: vec![vec![0xaa; 256], vec![0xbb; 256]],
        };
        assert_eq!(
            auth.authenticate(&mut chan).unwrap(),
            AuthOutcome::Authenticated
        );
    }

    #[test]
    fn miauth_surfaces_hex_challenge_as_base64() {
        let mut chan = MockChan::new();
        chan.feed(NAK); // only canned signature refused
        chan.feed(b"<data><response value=\"0102030405060708\"/></data>");

        let mut auth = MiAuth {
            signatures: vec![vec![0xaa; 256]],
        };
        let outcome = auth.authenticate(&mut chan).unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::ChallengeRequired(BASE64.encode([1, 2, 3, 4, 5, 6, 7, 8]))
        );
    }

    #[test]
    fn demacia_nak_is_soft() {
        let mut chan = MockChan::new();
        chan.feed(ACK);
        chan.feed(NAK);

        assert!(matches!(
            DemaciaAuth.authenticate(&mut chan).unwrap(),
            AuthOutcome::Rejected(_)
        ));
    }
}
