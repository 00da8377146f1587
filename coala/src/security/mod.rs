use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use coala_msg::{known, Message};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::envelope::Envelope;
use crate::sync::{read, write};

mod aead;

use aead::{Aead, Keys};

/// Errors of the secure session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
  /// The message was queued until the handshake with the peer completes
  HandshakeInProgress,
  /// A sealed payload or URL failed authentication
  ValidationFailed,
  /// The peer presented a public key other than the one the message expected
  PeerPublicKeyValidationFailed,
  /// A coaps message arrived from a peer we have no session with
  SessionNotEstablished,
  /// A handshake without a public key
  PayloadExpected,
  /// The peer's public key is malformed or of low order
  InvalidPublicKey,
  /// Expanding the shared secret into session keys failed
  KeyDerivationFailed,
}

impl core::fmt::Display for SecurityError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | SecurityError::HandshakeInProgress => write!(f, "handshake in progress"),
      | SecurityError::ValidationFailed => write!(f, "message failed authentication"),
      | SecurityError::PeerPublicKeyValidationFailed => write!(f, "unexpected peer public key"),
      | SecurityError::SessionNotEstablished => write!(f, "no session with the peer"),
      | SecurityError::PayloadExpected => write!(f, "handshake without public key"),
      | SecurityError::InvalidPublicKey => write!(f, "invalid public key"),
      | SecurityError::KeyDerivationFailed => write!(f, "key derivation failed"),
    }
  }
}

/// The X25519 key pair an instance presents during handshakes
///
/// ```
/// use coala::security::Identity;
///
/// let id = Identity::generate();
/// let restored = Identity::from_secret_bytes(id.to_bytes());
/// assert_eq!(id.public_key(), restored.public_key());
/// ```
#[derive(Clone)]
pub struct Identity {
  secret: StaticSecret,
  public: PublicKey,
}

impl core::fmt::Debug for Identity {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Identity")
     .field("public", &hex(self.public.as_bytes()))
     .finish_non_exhaustive()
  }
}

impl Default for Identity {
  fn default() -> Self {
    Self::generate()
  }
}

impl Identity {
  /// A fresh random key pair
  pub fn generate() -> Self {
    Self::from(StaticSecret::random_from_rng(OsRng))
  }

  /// Restore a key pair from its secret
  pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
    Self::from(StaticSecret::from(bytes))
  }

  /// The public key sent to peers
  pub fn public_key(&self) -> [u8; 32] {
    self.public.to_bytes()
  }

  /// The secret, for persisting the identity
  pub fn to_bytes(&self) -> [u8; 32] {
    self.secret.to_bytes()
  }

  fn shared_secret(&self, peer: [u8; 32]) -> Result<[u8; 32], SecurityError> {
    let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
    if !shared.was_contributory() {
      return Err(SecurityError::InvalidPublicKey);
    }
    Ok(shared.to_bytes())
  }
}

impl From<StaticSecret> for Identity {
  fn from(secret: StaticSecret) -> Self {
    let public = PublicKey::from(&secret);
    Self { secret, public }
  }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
  bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Keys agreed on with one peer.
///
/// Both ends derive the same material; the side that answered the handshake
/// swaps the "peer" and "my" halves.
#[derive(Debug)]
pub struct SecuredSession {
  incoming: bool,
  peer_public_key: [u8; 32],
  aead: Aead,
}

impl SecuredSession {
  /// Run the key exchange against a peer's public key
  pub fn start(identity: &Identity, peer_public_key: &[u8], incoming: bool) -> Result<Self, SecurityError> {
    let peer: [u8; 32] = peer_public_key.try_into()
                                        .map_err(|_| SecurityError::InvalidPublicKey)?;
    let shared = identity.shared_secret(peer)?;
    let keys = Keys::derive(&shared, &[], &[])?;
    let keys = if incoming { keys.mirrored() } else { keys };

    Ok(Self { incoming,
              peer_public_key: peer,
              aead: Aead::new(&keys)? })
  }

  /// Whether the peer started the handshake
  pub fn is_incoming(&self) -> bool {
    self.incoming
  }

  /// The key the peer presented
  pub fn peer_public_key(&self) -> [u8; 32] {
    self.peer_public_key
  }

  /// Encrypt and authenticate for the peer
  pub fn seal(&self, plain: &[u8], counter: u16) -> Result<Vec<u8>, SecurityError> {
    self.aead.seal(plain, counter, &[])
  }

  /// Authenticate and decrypt something the peer sealed
  pub fn open(&self, sealed: &[u8], counter: u16) -> Result<Vec<u8>, SecurityError> {
    self.aead.open(sealed, counter, &[])
  }
}

/// What a session is identified by: the peer, the proxy in between
/// and the session id the proxy assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
  pub(crate) addr: SocketAddr,
  pub(crate) proxy: Option<SocketAddr>,
  pub(crate) proxy_security_id: Option<Vec<u8>>,
}

impl SessionKey {
  pub(crate) fn new(addr: SocketAddr, msg: &Envelope) -> Self {
    Self { addr,
           proxy: msg.proxy_via,
           proxy_security_id: proxy_security_id(msg) }
  }
}

pub(crate) fn proxy_security_id(msg: &Message) -> Option<Vec<u8>> {
  msg.get_first(known::coala::PROXY_SECURITY_ID)
     .map(|v| v.0.clone())
}

#[derive(Debug)]
enum SessionState {
  Handshaking { pending: Vec<Envelope> },
  Established(Arc<SecuredSession>),
}

/// What to do with an outbound coaps message
#[derive(Debug)]
pub(crate) enum Route {
  /// Seal it with this session
  Seal(Arc<SecuredSession>),
  /// It was queued behind a handshake that is underway
  Enqueued,
  /// It was queued and a handshake needs to be started
  StartHandshake,
}

/// Sessions by [`SessionKey`], along with the messages waiting on handshakes
#[derive(Debug, Default)]
pub(crate) struct Sessions(RwLock<HashMap<SessionKey, SessionState>>);

impl Sessions {
  pub(crate) fn route(&self, key: &SessionKey, msg: &Envelope) -> Route {
    let mut sessions = write(&self.0);

    match sessions.get_mut(key) {
      | Some(SessionState::Established(s)) => Route::Seal(s.clone()),
      | Some(SessionState::Handshaking { pending }) => {
        pending.push(msg.clone());
        Route::Enqueued
      },
      | None => {
        sessions.insert(key.clone(),
                        SessionState::Handshaking { pending: vec![msg.clone()] });
        Route::StartHandshake
      },
    }
  }

  /// Move to established; the messages that were waiting should now be sent
  pub(crate) fn establish(&self, key: SessionKey, session: SecuredSession) -> Vec<Envelope> {
    match write(&self.0).insert(key, SessionState::Established(Arc::new(session))) {
      | Some(SessionState::Handshaking { pending }) => pending,
      | _ => vec![],
    }
  }

  /// Drop the session; the messages that were waiting should now be failed
  pub(crate) fn fail(&self, key: &SessionKey) -> Vec<Envelope> {
    match write(&self.0).remove(key) {
      | Some(SessionState::Handshaking { pending }) => pending,
      | _ => vec![],
    }
  }

  pub(crate) fn get(&self, key: &SessionKey) -> Option<Arc<SecuredSession>> {
    match read(&self.0).get(key) {
      | Some(SessionState::Established(s)) => Some(s.clone()),
      | _ => None,
    }
  }

  pub(crate) fn discard(&self, key: &SessionKey) {
    write(&self.0).remove(key);
  }

  /// The key the first queued message expects the peer to present
  pub(crate) fn pending_peer_key(&self, key: &SessionKey) -> Option<[u8; 32]> {
    match read(&self.0).get(key) {
      | Some(SessionState::Handshaking { pending }) => pending.first().and_then(|m| m.peer_public_key),
      | _ => None,
    }
  }

  pub(crate) fn is_handshaking(&self, key: &SessionKey) -> bool {
    matches!(read(&self.0).get(key), Some(SessionState::Handshaking { .. }))
  }
}
