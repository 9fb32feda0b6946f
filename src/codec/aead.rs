//! AEAD protection for voice RTP payloads.
//!
//! Both negotiated modes authenticate the RTP header as associated data and
//! place a 4-byte packet counter at the end of the datagram. The counter is
//! copied into the leading bytes of an otherwise zero nonce: 12 bytes for
//! AES-256-GCM, 24 for XChaCha20-Poly1305.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::{Error, Result};

/// Negotiated transport encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    XChaCha20Poly1305,
    Aes256Gcm,
}

impl EncryptionMode {
    /// The protocol name sent in SELECT_PROTOCOL.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EncryptionMode::XChaCha20Poly1305 => "aead_xchacha20_poly1305_rtpsize",
            EncryptionMode::Aes256Gcm => "aead_aes256_gcm_rtpsize",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "aead_xchacha20_poly1305_rtpsize" => Some(EncryptionMode::XChaCha20Poly1305),
            "aead_aes256_gcm_rtpsize" => Some(EncryptionMode::Aes256Gcm),
            _ => None,
        }
    }

    /// Pick the preferred mode out of the server's advertised set.
    pub fn negotiate(offered: &[String]) -> Option<Self> {
        for preferred in [
            EncryptionMode::XChaCha20Poly1305,
            EncryptionMode::Aes256Gcm,
        ] {
            if offered.iter().any(|m| m == preferred.wire_name()) {
                return Some(preferred);
            }
        }
        None
    }
}

/// AEAD cipher bound to one session's secret key.
pub struct Cipher {
    mode: EncryptionMode,
    xchacha: Option<XChaCha20Poly1305>,
    gcm: Option<Aes256Gcm>,
}

impl Cipher {
    pub fn new(mode: EncryptionMode, secret_key: &[u8]) -> Result<Self> {
        let key: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| Error::Protocol("secret key must be 32 bytes"))?;
        let mut cipher = Cipher {
            mode,
            xchacha: None,
            gcm: None,
        };
        match mode {
            EncryptionMode::XChaCha20Poly1305 => {
                cipher.xchacha = Some(XChaCha20Poly1305::new((&key).into()));
            }
            EncryptionMode::Aes256Gcm => {
                cipher.gcm = Some(
                    Aes256Gcm::new_from_slice(&key)
                        .map_err(|_| Error::Protocol("invalid AES-256-GCM key"))?,
                );
            }
        }
        Ok(cipher)
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Decrypt a payload with the RTP header as associated data.
    pub fn open(&self, ciphertext: &[u8], header: &[u8], counter: [u8; 4]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: ciphertext,
            aad: header,
        };
        match self.mode {
            EncryptionMode::XChaCha20Poly1305 => {
                let mut nonce = [0u8; 24];
                nonce[..4].copy_from_slice(&counter);
                self.xchacha
                    .as_ref()
                    .unwrap()
                    .decrypt(XNonce::from_slice(&nonce), payload)
                    .map_err(|_| Error::Protocol("voice packet failed authentication"))
            }
            EncryptionMode::Aes256Gcm => {
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(&counter);
                self.gcm
                    .as_ref()
                    .unwrap()
                    .decrypt(Nonce::from_slice(&nonce), payload)
                    .map_err(|_| Error::Protocol("voice packet failed authentication"))
            }
        }
    }

    /// Encrypt a payload with the RTP header as associated data.
    pub fn seal(&self, plaintext: &[u8], header: &[u8], counter: [u8; 4]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad: header,
        };
        match self.mode {
            EncryptionMode::XChaCha20Poly1305 => {
                let mut nonce = [0u8; 24];
                nonce[..4].copy_from_slice(&counter);
                self.xchacha
                    .as_ref()
                    .unwrap()
                    .encrypt(XNonce::from_slice(&nonce), payload)
                    .map_err(|_| Error::Protocol("voice packet encryption failed"))
            }
            EncryptionMode::Aes256Gcm => {
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(&counter);
                self.gcm
                    .as_ref()
                    .unwrap()
                    .encrypt(Nonce::from_slice(&nonce), payload)
                    .map_err(|_| Error::Protocol("voice packet encryption failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_xchacha() {
        let offered = vec![
            "aead_aes256_gcm_rtpsize".to_owned(),
            "aead_xchacha20_poly1305_rtpsize".to_owned(),
        ];
        assert_eq!(
            EncryptionMode::negotiate(&offered),
            Some(EncryptionMode::XChaCha20Poly1305)
        );

        let gcm_only = vec!["aead_aes256_gcm_rtpsize".to_owned()];
        assert_eq!(
            EncryptionMode::negotiate(&gcm_only),
            Some(EncryptionMode::Aes256Gcm)
        );

        assert_eq!(
            EncryptionMode::negotiate(&["xsalsa20_poly1305".to_owned()]),
            None
        );
    }

    #[test]
    fn round_trip_both_modes() {
        let key = [0x42u8; 32];
        let header = [0x80u8, 0x78, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3];
        let counter = [0, 0, 0, 7];

        for mode in [
            EncryptionMode::XChaCha20Poly1305,
            EncryptionMode::Aes256Gcm,
        ] {
            let cipher = Cipher::new(mode, &key).unwrap();
            for len in [0usize, 1, 57, 960, 1200] {
                let payload = vec![0xA5u8; len];
                let sealed = cipher.seal(&payload, &header, counter).unwrap();
                let opened = cipher.open(&sealed, &header, counter).unwrap();
                assert_eq!(opened, payload);
            }
        }
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let key = [0x42u8; 32];
        let header = [1u8; 12];
        let cipher = Cipher::new(EncryptionMode::XChaCha20Poly1305, &key).unwrap();
        let sealed = cipher.seal(b"audio", &header, [0; 4]).unwrap();

        let mut bad_header = header;
        bad_header[0] ^= 0xFF;
        assert!(cipher.open(&sealed, &bad_header, [0; 4]).is_err());
    }
}
