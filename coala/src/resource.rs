use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use coala_msg::{known, Code, Method, OptValue, ResponseCode, Type};

use crate::envelope::{random_id, Envelope};
use crate::Coala;

/// Path of the resource discovery resource
pub const WELL_KNOWN_CORE: &str = ".well-known/core";

/// What a resource handler is given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
  /// Uri-Query items, split into name and value on the first `=`
  pub query: Vec<(String, Option<String>)>,
  /// Request payload; empty when there was none
  pub payload: Vec<u8>,
}

impl Input {
  /// Value of the first query item named `name`
  pub fn query_value(&self, name: &str) -> Option<&str> {
    self.query
        .iter()
        .find(|(k, _)| k == name)
        .and_then(|(_, v)| v.as_deref())
  }
}

/// What a resource handler produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
  /// Response code
  pub code: ResponseCode,
  /// Response payload; empty for none
  pub payload: Vec<u8>,
}

impl Output {
  /// An output with a payload
  pub fn new(code: ResponseCode, payload: impl Into<Vec<u8>>) -> Self {
    Self { code,
           payload: payload.into() }
  }

  /// An output without a payload
  pub fn code(code: ResponseCode) -> Self {
    Self::new(code, Vec::new())
  }
}

/// Business logic behind a resource
pub type Handler = Arc<dyn Fn(Input) -> Output + Send + Sync>;

fn normalize(path: &str) -> String {
  path.trim_matches('/').to_string()
}

/// A resource answering one method at one path
#[derive(Clone)]
pub struct SimpleResource {
  method: Method,
  path: String,
  handler: Handler,
}

impl core::fmt::Debug for SimpleResource {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("SimpleResource")
     .field("method", &self.method)
     .field("path", &self.path)
     .finish()
  }
}

impl SimpleResource {
  /// Create a resource. Leading and trailing slashes of `path` are ignored.
  pub fn new<F>(method: Method, path: &str, handler: F) -> Self
    where F: Fn(Input) -> Output + Send + Sync + 'static
  {
    Self { method,
           path: normalize(path),
           handler: Arc::new(handler) }
  }
}

/// A GET resource that peers can subscribe to.
///
/// Observers register with a GET carrying `Observe: 0` and are sent a
/// CON notification every time [`ObservableResource::notify_observers`] is called.
pub struct ObservableResource {
  path: String,
  handler: Handler,
  sequence: AtomicU64,
  observers: RwLock<HashMap<SocketAddr, Envelope>>,
}

impl core::fmt::Debug for ObservableResource {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ObservableResource")
     .field("path", &self.path)
     .field("sequence", &self.sequence)
     .field("observers", &self.observers_count())
     .finish()
  }
}

impl ObservableResource {
  /// Create an observable resource
  pub fn new<F>(path: &str, handler: F) -> Arc<Self>
    where F: Fn(Input) -> Output + Send + Sync + 'static
  {
    Arc::new(Self { path: normalize(path),
                    handler: Arc::new(handler),
                    sequence: AtomicU64::new(0),
                    observers: RwLock::new(HashMap::new()) })
  }

  /// Current notification sequence number
  pub fn sequence(&self) -> u64 {
    self.sequence.load(Ordering::SeqCst)
  }

  /// Number of subscribed peers
  pub fn observers_count(&self) -> usize {
    self.observers.read().map(|o| o.len()).unwrap_or(0)
  }

  /// Subscribe a peer. The register request is kept to address notifications.
  pub(crate) fn add_observer(&self, addr: SocketAddr, register: Envelope) {
    if let Ok(mut o) = self.observers.write() {
      o.insert(addr, register);
    }
  }

  pub(crate) fn remove_observer(&self, addr: SocketAddr) {
    if let Ok(mut o) = self.observers.write() {
      o.remove(&addr);
    }
  }

  pub(crate) fn handle(&self, input: Input) -> Output {
    (self.handler)(input)
  }

  /// Bump the sequence number and send the resource's current state to every observer
  pub fn notify_observers(&self, coala: &Coala) {
    let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
    let Output { code, payload } = self.handle(Input::default());

    let observers = match self.observers.read() {
      | Ok(o) => o.iter().map(|(a, r)| (*a, r.clone())).collect::<Vec<_>>(),
      | Err(_) => return,
    };

    for (addr, register) in observers {
      let mut msg = coala_msg::Message::new(Type::Con, Code::Response(code), random_id());
      msg.token = register.token.clone();
      msg.set_scheme(register.scheme());
      msg.set(known::no_repeat::OBSERVE, OptValue::uint(sequence));
      msg.payload = coala_msg::Payload(payload.clone());

      let env = Envelope { addr: Some(addr),
                           proxy_via: register.proxy_via,
                           ..Envelope::new(msg) };

      if let Err(e) = coala.send(env) {
        log::warn!(target: "coala", "failed to notify observer {}: {}", addr, e);
      }
    }
  }
}

/// A resource registered with [`Coala::add_resource`]
#[derive(Debug, Clone)]
pub enum Resource {
  /// See [`SimpleResource`]
  Simple(SimpleResource),
  /// See [`ObservableResource`]
  Observable(Arc<ObservableResource>),
}

impl From<SimpleResource> for Resource {
  fn from(r: SimpleResource) -> Self {
    Resource::Simple(r)
  }
}

impl From<Arc<ObservableResource>> for Resource {
  fn from(r: Arc<ObservableResource>) -> Self {
    Resource::Observable(r)
  }
}

impl Resource {
  /// Method the resource answers
  pub fn method(&self) -> Method {
    match self {
      | Resource::Simple(r) => r.method,
      | Resource::Observable(_) => Method::Get,
    }
  }

  /// Path of the resource, without leading or trailing slashes
  pub fn path(&self) -> &str {
    match self {
      | Resource::Simple(r) => &r.path,
      | Resource::Observable(r) => &r.path,
    }
  }

  /// Whether the resource lives at `path`
  pub fn matches_path(&self, path: &str) -> bool {
    self.path() == path.trim_matches('/')
  }

  /// Whether the resource answers `method` at `path`
  pub fn matches(&self, method: Method, path: &str) -> bool {
    self.method() == method && self.matches_path(path)
  }

  /// Run the resource's handler
  pub fn handle(&self, input: Input) -> Output {
    match self {
      | Resource::Simple(r) => (r.handler)(input),
      | Resource::Observable(r) => r.handle(input),
    }
  }
}

/// The `/.well-known/core` listing of registered resources
pub(crate) fn discovery(resources: &[Resource]) -> Output {
  let mut paths = resources.iter().map(|r| r.path()).collect::<Vec<_>>();
  paths.dedup();

  let listing = paths.iter()
                     .map(|p| format!("</{}>", p))
                     .collect::<Vec<_>>()
                     .join(",");
  Output::new(ResponseCode::Content, listing)
}
