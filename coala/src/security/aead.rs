use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use tinyvec::ArrayVec;

use super::SecurityError;

/// AES-128-GCM with a 12-byte nonce and a 12-byte tag
type Cipher = AesGcm<Aes128, U12, U12>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 4;
const OKM_LEN: usize = KEY_LEN * 2 + IV_LEN * 2;

/// Key material of one side of a session, as expanded from the shared secret
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Keys {
  pub(crate) peer_key: [u8; KEY_LEN],
  pub(crate) my_key: [u8; KEY_LEN],
  pub(crate) peer_iv: [u8; IV_LEN],
  pub(crate) my_iv: [u8; IV_LEN],
}

impl core::fmt::Debug for Keys {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Keys").finish_non_exhaustive()
  }
}

impl Keys {
  /// HKDF-SHA256 of the shared secret, laid out as
  /// `peer key | my key | peer iv | my iv`
  pub(crate) fn derive(shared_secret: &[u8], salt: &[u8], info: &[u8]) -> Result<Self, SecurityError> {
    let mut okm = [0u8; OKM_LEN];
    Hkdf::<Sha256>::new(Some(salt), shared_secret).expand(info, &mut okm)
                                                  .map_err(|_| SecurityError::KeyDerivationFailed)?;

    let mut keys = Keys { peer_key: [0; KEY_LEN],
                          my_key: [0; KEY_LEN],
                          peer_iv: [0; IV_LEN],
                          my_iv: [0; IV_LEN] };
    keys.peer_key.copy_from_slice(&okm[..KEY_LEN]);
    keys.my_key.copy_from_slice(&okm[KEY_LEN..KEY_LEN * 2]);
    keys.peer_iv.copy_from_slice(&okm[KEY_LEN * 2..KEY_LEN * 2 + IV_LEN]);
    keys.my_iv.copy_from_slice(&okm[KEY_LEN * 2 + IV_LEN..]);
    Ok(keys)
  }

  /// The same material seen from the other end of the session
  pub(crate) fn mirrored(self) -> Self {
    Keys { peer_key: self.my_key,
           my_key: self.peer_key,
           peer_iv: self.my_iv,
           my_iv: self.peer_iv }
  }
}

/// `iv | counter (little-endian) | 6 zero bytes`
pub(crate) fn nonce(iv: &[u8; IV_LEN], counter: u16) -> ArrayVec<[u8; 12]> {
  let mut n = ArrayVec::<[u8; 12]>::new();
  n.extend_from_slice(iv);
  n.extend_from_slice(&counter.to_le_bytes());
  n.extend_from_slice(&[0u8; 6]);
  n
}

/// Seals with our key and opens with the peer's.
///
/// The counter is the id of the message being sealed, so the peer can
/// rebuild the nonce without it being sent.
pub(crate) struct Aead {
  sealer: Cipher,
  opener: Cipher,
  my_iv: [u8; IV_LEN],
  peer_iv: [u8; IV_LEN],
}

impl core::fmt::Debug for Aead {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Aead").finish_non_exhaustive()
  }
}

impl Aead {
  pub(crate) fn new(keys: &Keys) -> Result<Self, SecurityError> {
    let cipher = |key: &[u8]| Cipher::new_from_slice(key).map_err(|_| SecurityError::KeyDerivationFailed);

    Ok(Aead { sealer: cipher(&keys.my_key)?,
              opener: cipher(&keys.peer_key)?,
              my_iv: keys.my_iv,
              peer_iv: keys.peer_iv })
  }

  pub(crate) fn seal(&self, plain: &[u8], counter: u16, aad: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let nonce = nonce(&self.my_iv, counter);
    self.sealer
        .encrypt(Nonce::<U12>::from_slice(&nonce), Payload { msg: plain, aad })
        .map_err(|_| SecurityError::ValidationFailed)
  }

  pub(crate) fn open(&self, sealed: &[u8], counter: u16, aad: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let nonce = nonce(&self.peer_iv, counter);
    self.opener
        .decrypt(Nonce::<U12>::from_slice(&nonce), Payload { msg: sealed, aad })
        .map_err(|_| SecurityError::ValidationFailed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn hex(s: &str) -> Vec<u8> {
    (0..s.len()).step_by(2)
                .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
                .collect()
  }

  fn keys() -> Keys {
    let mut k = Keys { peer_key: [0; 16],
                       my_key: [0; 16],
                       peer_iv: [0; 4],
                       my_iv: [0; 4] };
    k.peer_key.copy_from_slice(&hex("bdd1cf3e4a5d0d1c009be633da60a372"));
    k.my_key.copy_from_slice(&hex("6e486ac093054578dc5308b966b9ff28"));
    k.peer_iv.copy_from_slice(&hex("799212a9"));
    k.my_iv.copy_from_slice(&hex("b3efe5ce"));
    k
  }

  const FOX: &[u8] = b"The quick, brown fox jumps over a lazy dog.";

  #[test]
  fn nonce_layout() {
    let iv = [0x79, 0x92, 0x12, 0xa9];
    assert_eq!(nonce(&iv, 256).as_slice(), hex("799212a90001000000000000").as_slice());
  }

  #[test]
  fn seal_known_vector() {
    let aead = Aead::new(&keys()).unwrap();
    let sealed = aead.seal(FOX, 300, &hex("88e564a2e6b64a356efd11")).unwrap();

    assert_eq!(sealed,
               hex(concat!("066770c836b2c0a745adaeef33005392a6dd02c85a5047149a051dfb6d",
                           "d15f840083c407154e04f76d878cb42973e72f4c3e10b9a67cf3")));
  }

  #[test]
  fn open_known_vector() {
    let aead = Aead::new(&keys()).unwrap();
    let sealed = hex(concat!("1616888d96446e598e31fb3dafe855018bddf93cca9401f42fed6d19dc49ef4c",
                             "f816dddd741ccf2af09eeecbd3f867982e2a602d67cc78"));

    assert_eq!(aead.open(&sealed, 400, &hex("88e564a2e6b64a356efd11")).unwrap(),
               FOX.to_vec());
  }

  #[test]
  fn tampering_fails_validation() {
    let aead = Aead::new(&keys()).unwrap();
    let peer = Aead::new(&keys().mirrored()).unwrap();

    let sealed = aead.seal(FOX, 7, b"ad").unwrap();
    assert_eq!(peer.open(&sealed, 7, b"ad").unwrap(), FOX.to_vec());

    let mut flipped = sealed.clone();
    flipped[3] ^= 1;
    assert_eq!(peer.open(&flipped, 7, b"ad"), Err(SecurityError::ValidationFailed));
    assert_eq!(peer.open(&sealed, 8, b"ad"), Err(SecurityError::ValidationFailed));
    assert_eq!(peer.open(&sealed, 7, b"da"), Err(SecurityError::ValidationFailed));
  }

  #[test]
  fn hkdf_layout() {
    let keys = Keys::derive(&hex("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b"),
                            &hex("000102030405060708090a0b0c"),
                            &hex("f0f1f2f3f4f5f6f7f8f9")).unwrap();

    assert_eq!(keys.peer_key.to_vec(), hex("3cb25f25faacd57a90434f64d0362f2a"));
    assert_eq!(keys.my_key.to_vec(), hex("2d2d0a90cf1a5a4c5db02d56ecc4c5bf"));
    assert_eq!(keys.peer_iv.to_vec(), hex("34007208"));
    assert_eq!(keys.my_iv.to_vec(), hex("d5b88718"));
  }
}
