use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use coala_msg::{known, Code, Id, Message, Method, OptValue, ResponseCode, Scheme, Token, Type};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;
use url::Url;

use crate::Error;

/// Port used when a URL doesn't name one
pub const DEFAULT_PORT: u16 = 5683;

const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ')
                                         .add(b'"')
                                         .add(b'#')
                                         .add(b'<')
                                         .add(b'>')
                                         .add(b'`')
                                         .add(b'?')
                                         .add(b'{')
                                         .add(b'}')
                                         .add(b'/')
                                         .add(b'%');

const QUERY_ITEM: &AsciiSet = &PATH_SEGMENT.add(b'&').add(b'=').add(b'+');

/// A response to a request, delivered to its [`ResponseHandler`]
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  /// The response message
  pub msg: Message,
  /// Who sent the response
  pub from: SocketAddr,
  /// Public key of the peer, when the response came over a secure session
  pub peer_public_key: Option<[u8; 32]>,
}

/// Callback invoked with the response to a message, or the reason
/// no response will come.
pub type ResponseHandler = Arc<dyn Fn(Result<Response, Error>) + Send + Sync>;

/// Callback invoked with the bytes received so far during a large download
pub type ProgressHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Errors converting between URLs and messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
  /// The URL could not be parsed
  Parse(url::ParseError),
  /// Only `coap` and `coaps` are supported
  UnsupportedScheme(String),
  /// The URL has no host
  MissingHost,
  /// The host name didn't resolve to an address
  Unresolved(String),
}

impl core::fmt::Display for UrlError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | UrlError::Parse(e) => write!(f, "invalid URL: {}", e),
      | UrlError::UnsupportedScheme(s) => write!(f, "unsupported URL scheme {:?}", s),
      | UrlError::MissingHost => write!(f, "URL has no host"),
      | UrlError::Unresolved(h) => write!(f, "could not resolve host {:?}", h),
    }
  }
}

impl From<url::ParseError> for UrlError {
  fn from(e: url::ParseError) -> Self {
    UrlError::Parse(e)
  }
}

/// A random message id in `1..=65535`
pub fn random_id() -> Id {
  Id(rand::thread_rng().gen_range(1..=u16::MAX))
}

/// A random token of `len` bytes
pub fn random_token(len: usize) -> Token {
  let mut bytes = [0u8; 8];
  let len = len.min(8);
  rand::thread_rng().fill(&mut bytes[..len]);
  Token::new(&bytes[..len])
}

/// A [`Message`] along with where it is going (or where it came from)
/// and what to do with its response.
///
/// Derefs to the wire message.
///
/// ```
/// use coala::{Envelope, msg::{Method, Type}};
///
/// let req = Envelope::request(Type::Con, Method::Get, "coap://127.0.0.1:5683/info?verbose").unwrap();
///
/// assert_eq!(req.path(), vec!["info"]);
/// assert_eq!(req.addr, Some("127.0.0.1:5683".parse().unwrap()));
/// assert_eq!(req.url().unwrap().as_str(), "coap://127.0.0.1:5683/info?verbose");
/// ```
#[derive(Clone)]
pub struct Envelope {
  /// The wire message
  pub msg: Message,
  /// Destination of an outbound message, sender of an inbound one
  pub addr: Option<SocketAddr>,
  /// Proxy the message travels through
  pub proxy_via: Option<SocketAddr>,
  /// Public key of the peer.
  ///
  /// On outbound coaps messages this is the key the peer is expected to present
  /// during the handshake; on inbound messages it is the key of the session the
  /// message arrived on.
  pub peer_public_key: Option<[u8; 32]>,
  /// Invoked with the response to this message
  pub on_response: Option<ResponseHandler>,
}

impl Deref for Envelope {
  type Target = Message;

  fn deref(&self) -> &Message {
    &self.msg
  }
}

impl DerefMut for Envelope {
  fn deref_mut(&mut self) -> &mut Message {
    &mut self.msg
  }
}

impl core::fmt::Debug for Envelope {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Envelope")
     .field("msg", &self.msg)
     .field("addr", &self.addr)
     .field("proxy_via", &self.proxy_via)
     .field("peer_public_key", &self.peer_public_key)
     .field("on_response", &self.on_response.as_ref().map(|_| ".."))
     .finish()
  }
}

impl From<Message> for Envelope {
  fn from(msg: Message) -> Self {
    Self::new(msg)
  }
}

impl Envelope {
  /// Wrap a message that has no address yet
  pub fn new(msg: Message) -> Self {
    Self { msg,
           addr: None,
           proxy_via: None,
           peer_public_key: None,
           on_response: None }
  }

  /// A request with a random message id, addressed by a URL
  pub fn request(ty: Type, method: Method, url: &str) -> Result<Self, Error> {
    let mut env = Self::new(Message::new(ty, Code::Request(method), random_id()));
    env.set_url(url)?;
    Ok(env)
  }

  /// An ACK to `req` with the same message id and token, addressed to `from`
  pub fn ack_to(req: &Message, from: SocketAddr, code: ResponseCode) -> Self {
    let mut msg = Message::new(Type::Ack, Code::Response(code), req.id);
    msg.token = req.token.clone();
    msg.set_scheme(req.scheme());

    Self { addr: Some(from),
           ..Self::new(msg) }
  }

  /// A response to `req` with a new message id, addressed to `from`
  pub fn response_to(ty: Type, code: ResponseCode, req: &Message, from: SocketAddr) -> Self {
    let mut msg = Message::new(ty, Code::Response(code), random_id());
    msg.token = req.token.clone();
    msg.set_scheme(req.scheme());

    Self { addr: Some(from),
           ..Self::new(msg) }
  }

  /// Attach a response handler.
  ///
  /// Responses are matched by token, so a message without one is
  /// given a random 4-byte token.
  pub fn set_response_handler<F>(&mut self, f: F)
    where F: Fn(Result<Response, Error>) + Send + Sync + 'static
  {
    if self.msg.token.is_empty() {
      self.msg.token = random_token(4);
    }
    self.on_response = Some(Arc::new(f));
  }

  /// Builder-style [`Envelope::set_response_handler`]
  pub fn with_response_handler<F>(mut self, f: F) -> Self
    where F: Fn(Result<Response, Error>) + Send + Sync + 'static
  {
    self.set_response_handler(f);
    self
  }

  /// Invoke the response handler, if there is one
  pub(crate) fn respond(&self, r: Result<Response, Error>) {
    if let Some(f) = self.on_response.as_ref() {
      f(r)
    }
  }

  /// Whether the destination is the "all CoAP devices" multicast group
  pub fn is_multicast(&self) -> bool {
    self.addr
        .map(|a| crate::net::multicast::is_all_coap_devices(a.ip()))
        .unwrap_or(false)
  }

  /// The URL this message is addressed to.
  ///
  /// Host and port come from the Uri-Host and Uri-Port options when present,
  /// otherwise from [`Envelope::addr`]. `None` when neither names a host.
  pub fn url(&self) -> Option<Url> {
    let host = match self.msg.get_str(known::no_repeat::HOST) {
      | Some(h) => h.to_string(),
      | None => match self.addr?.ip() {
        | IpAddr::V4(ip) => ip.to_string(),
        | IpAddr::V6(ip) => format!("[{}]", ip),
      },
    };
    let port = self.msg
                   .get_uint(known::no_repeat::PORT)
                   .map(|p| p as u16)
                   .or_else(|| self.addr.map(|a| a.port()))
                   .unwrap_or(DEFAULT_PORT);

    let mut s = format!("{}://{}:{}/", self.msg.scheme().as_str(), host, port);

    let path = self.msg
                   .path()
                   .into_iter()
                   .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT).to_string())
                   .collect::<Vec<_>>();
    s.push_str(&path.join("/"));

    let query = self.msg
                    .query()
                    .into_iter()
                    .map(|(k, v)| match v {
                      | Some(v) => format!("{}={}",
                                           utf8_percent_encode(&k, QUERY_ITEM),
                                           utf8_percent_encode(&v, QUERY_ITEM)),
                      | None => utf8_percent_encode(&k, QUERY_ITEM).to_string(),
                    })
                    .collect::<Vec<_>>();
    if !query.is_empty() {
      s.push('?');
      s.push_str(&query.join("&"));
    }

    Url::parse(&s).ok()
  }

  /// Point this message at a URL.
  ///
  /// Replaces the scheme, the Uri-Path and Uri-Query options and the address;
  /// removes Uri-Host and Uri-Port. Host names are resolved.
  ///
  /// ```
  /// use coala::Envelope;
  /// use coala::msg::{known, Code, Id, Message, Method, Scheme, Type};
  ///
  /// let mut env = Envelope::new(Message::new(Type::Con, Code::Request(Method::Get), Id(1)));
  /// env.set_url("coaps://[::1]/a%20b/c?x=1&y").unwrap();
  ///
  /// assert_eq!(env.scheme(), Scheme::Coaps);
  /// assert_eq!(env.path(), vec!["a b", "c"]);
  /// assert_eq!(env.get(known::repeat::QUERY).count(), 2);
  /// assert_eq!(env.addr, Some("[::1]:5683".parse().unwrap()));
  /// ```
  pub fn set_url(&mut self, url: &str) -> Result<(), Error> {
    let url = Url::parse(url).map_err(UrlError::from)?;
    let scheme =
      Scheme::parse(url.scheme()).ok_or_else(|| UrlError::UnsupportedScheme(url.scheme().to_string()))?;
    let host = url.host_str().ok_or(UrlError::MissingHost)?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let addr = resolve(host, port)?;

    self.msg.remove(known::no_repeat::HOST);
    self.msg.remove(known::no_repeat::PORT);
    self.msg.set_scheme(scheme);
    self.set_path_and_query(&url);

    self.addr = Some(addr);
    Ok(())
  }

  /// Replace the Uri-Path and Uri-Query options with those of `url`
  pub(crate) fn set_path_and_query(&mut self, url: &Url) {
    self.msg.remove(known::repeat::PATH);
    self.msg.remove(known::repeat::QUERY);

    url.path_segments()
       .into_iter()
       .flatten()
       .filter(|seg| !seg.is_empty())
       .for_each(|seg| {
         let seg = percent_decode_str(seg).decode_utf8_lossy().into_owned();
         self.msg.set(known::repeat::PATH, OptValue::from(seg));
       });

    url.query()
       .into_iter()
       .flat_map(|q| q.split('&'))
       .filter(|item| !item.is_empty())
       .for_each(|item| {
         let item = percent_decode_str(item).decode_utf8_lossy().into_owned();
         self.msg.set(known::repeat::QUERY, OptValue::from(item));
       });
  }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, UrlError> {
  let literal = host.trim_start_matches('[').trim_end_matches(']');
  if let Ok(ip) = literal.parse::<IpAddr>() {
    return Ok(SocketAddr::new(ip, port));
  }

  (host, port).to_socket_addrs()
              .ok()
              .and_then(|mut addrs| addrs.next())
              .ok_or_else(|| UrlError::Unresolved(host.to_string()))
}
