//! Link-level AEAD envelope.
//!
//! Every frame on the air is AES-128-GCM encrypted under the pre-shared
//! network key. The 12-byte nonce is derived from the base header
//! (`origin ‖ packet_id ‖ hop_count ‖ packet_type ‖ 0 0`) and the 20-byte
//! base header is authenticated as associated data, so any in-flight header
//! mutation voids the tag. Because the hop count participates in the nonce,
//! each forwarding hop re-encrypts: this is link confidentiality, not
//! end-to-end.
//!
//! The wire format truncates the GCM tag to 8 bytes, which the high-level
//! `aes-gcm` crate cannot express (it only supports 12..16-byte tags), so
//! GCM is assembled here from the `aes`, `ctr` and `ghash` primitives.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use ghash::GHash;
use ghash::universal_hash::UniversalHash;
use subtle::ConstantTimeEq;

use crate::error::RouterError;
use crate::packet::{BASE_HEADER_LEN, FLAGS_OFFSET, flags};
use crate::types::{MAX_FRAME_LEN, RadioFrame};

/// Nonce length mandated by GCM with a 96-bit IV.
pub const NONCE_LEN: usize = 12;
/// Truncated tag length appended after the ciphertext.
pub const TAG_LEN: usize = 8;

/// Stateless sealer/opener bound to the network key.
pub struct Envelope {
    key: [u8; 16],
    cipher: Aes128,
    /// GHASH subkey, `AES_K(0^128)`.
    hash_key: [u8; 16],
}

impl Envelope {
    pub fn new(key: [u8; 16]) -> Self {
        let cipher = Aes128::new((&key).into());
        let mut hash_key = [0u8; 16];
        cipher.encrypt_block((&mut hash_key).into());
        Self {
            key,
            cipher,
            hash_key,
        }
    }

    /// Encrypt a marshalled frame in place and append the tag.
    ///
    /// Sets `FLAG_ENCRYPTED` in the header before deriving the nonce and
    /// AAD, so the header goes out exactly as authenticated.
    pub fn seal(&self, frame: &mut RadioFrame) -> Result<(), RouterError> {
        if frame.len() < BASE_HEADER_LEN {
            return Err(RouterError::MalformedHeader {
                need: BASE_HEADER_LEN,
                have: frame.len(),
            });
        }
        if frame.len() + TAG_LEN > MAX_FRAME_LEN {
            return Err(RouterError::FrameTooLarge {
                len: frame.len() + TAG_LEN,
                max: MAX_FRAME_LEN,
            });
        }

        frame.as_mut_slice()[FLAGS_OFFSET] |= flags::ENCRYPTED;

        let buf = frame.as_mut_slice();
        let nonce = nonce_from_header(buf);
        let (aad, body) = buf.split_at_mut(BASE_HEADER_LEN);
        self.keystream(&nonce).apply_keystream(body);
        let tag = self.tag(&nonce, aad, body);
        frame.extend_from_slice(&tag[..TAG_LEN])
    }

    /// Verify and decrypt a received frame in place.
    ///
    /// On success the tag is stripped and `FLAG_ENCRYPTED` cleared so the
    /// dispatcher sees plaintext; on failure the frame must be dropped.
    pub fn open(&self, frame: &mut RadioFrame) -> Result<(), RouterError> {
        if frame.len() < BASE_HEADER_LEN + TAG_LEN {
            return Err(RouterError::MalformedHeader {
                need: BASE_HEADER_LEN + TAG_LEN,
                have: frame.len(),
            });
        }

        let body_end = frame.len() - TAG_LEN;
        let buf = frame.as_mut_slice();
        let nonce = nonce_from_header(buf);
        {
            let (head, rx_tag) = buf.split_at(body_end);
            let (aad, body) = head.split_at(BASE_HEADER_LEN);
            let expected = self.tag(&nonce, aad, body);
            if expected[..TAG_LEN].ct_eq(rx_tag).unwrap_u8() == 0 {
                return Err(RouterError::AuthFailed);
            }
        }
        self.keystream(&nonce)
            .apply_keystream(&mut buf[BASE_HEADER_LEN..body_end]);
        buf[FLAGS_OFFSET] &= !flags::ENCRYPTED;
        frame.truncate(body_end);
        Ok(())
    }

    /// CTR keystream starting at counter block 2; block 1 masks the tag.
    fn keystream(&self, nonce: &[u8; NONCE_LEN]) -> Ctr32BE<Aes128> {
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(nonce);
        iv[15] = 2;
        Ctr32BE::new((&self.key).into(), (&iv).into())
    }

    /// Full 16-byte GCM tag over the AAD and ciphertext.
    fn tag(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> [u8; 16] {
        let mut mac = GHash::new((&self.hash_key).into());
        mac.update_padded(aad);
        mac.update_padded(ciphertext);
        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&((aad.len() as u64) * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&((ciphertext.len() as u64) * 8).to_be_bytes());
        mac.update(&[lengths.into()]);
        let s = mac.finalize();

        let mut j0 = [0u8; 16];
        j0[..NONCE_LEN].copy_from_slice(nonce);
        j0[15] = 1;
        self.cipher.encrypt_block((&mut j0).into());

        let mut tag = [0u8; 16];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = s[i] ^ j0[i];
        }
        tag
    }
}

/// Nonce layout: `origin(4) ‖ packet_id(4) ‖ hop_count ‖ packet_type ‖ 0 0`,
/// read straight from the encoded header so byte order matches the wire.
fn nonce_from_header(header: &[u8]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0..4].copy_from_slice(&header[8..12]);
    nonce[4..8].copy_from_slice(&header[12..16]);
    nonce[8] = header[18];
    nonce[9] = header[16];
    nonce
}
