use crate::OptNumber;

macro_rules! opt {
  ($(#[doc = $doc:expr])+ $name:ident = $n:literal) => {
    $(#[doc = $doc])+
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
}

/// Non-repeatable options
pub mod no_repeat {
  opt!(#[doc = "Uri-Host (RFC7252 5.10.1)"] HOST = 3);
  opt!(#[doc = "If-None-Match (RFC7252 5.10.8.2)"] IF_NONE_MATCH = 5);
  opt!(#[doc = "Observe (RFC7641). `0` registers, `1` deregisters;"]
       #[doc = "in notifications it carries the sequence number."]
       OBSERVE = 6);
  opt!(#[doc = "See [`HOST`]"] PORT = 7);
  opt!(#[doc = "Content-Format (RFC7252 5.10.3)"] CONTENT_FORMAT = 12);
  opt!(#[doc = "Max-Age in seconds (RFC7252 5.10.5)"] MAX_AGE = 14);
  opt!(#[doc = "Accept (RFC7252 5.10.4)"] ACCEPT = 17);
  opt!(#[doc = "Block2 (RFC7959), see [`crate::Block`]"] BLOCK2 = 23);
  opt!(#[doc = "Block1 (RFC7959), see [`crate::Block`]"] BLOCK1 = 27);
  opt!(#[doc = "Proxy-Uri (RFC7252 5.10.2)"] PROXY_URI = 35);
  opt!(#[doc = "See [`PROXY_URI`]"] PROXY_SCHEME = 39);
  opt!(#[doc = "Size1 (RFC7252 5.10.9)"] SIZE1 = 60);

  /// All of the above
  pub const ALL: [crate::OptNumber; 12] = [HOST,
                                           IF_NONE_MATCH,
                                           OBSERVE,
                                           PORT,
                                           CONTENT_FORMAT,
                                           MAX_AGE,
                                           ACCEPT,
                                           BLOCK2,
                                           BLOCK1,
                                           PROXY_URI,
                                           PROXY_SCHEME,
                                           SIZE1];
}

/// Repeatable options
pub mod repeat {
  opt!(#[doc = "If-Match (RFC7252 5.10.8.1)"] IF_MATCH = 1);
  opt!(#[doc = "ETag (RFC7252 5.10.6)"] ETAG = 4);
  opt!(#[doc = "Location-Path (RFC7252 5.10.7)"] LOCATION_PATH = 8);
  opt!(#[doc = "Uri-Path; one option per path segment"] PATH = 11);
  opt!(#[doc = "Uri-Query; one `name=value` option per query item"] QUERY = 15);
  opt!(#[doc = "See [`LOCATION_PATH`]"] LOCATION_QUERY = 20);

  /// All of the above
  pub const ALL: [crate::OptNumber; 6] = [IF_MATCH, ETAG, LOCATION_PATH, PATH, QUERY, LOCATION_QUERY];
}

/// Non-repeatable options private to coala peers
pub mod coala {
  opt!(#[doc = "Scheme used to deliver the message, see [`crate::Scheme`]."]
       #[doc = "Absent means `coap`."]
       URI_SCHEME = 2111);
  opt!(#[doc = "Selective-repeat window size. Its presence next to a block option"]
       #[doc = "means the sender drives the transfer with the windowed ARQ."]
       WINDOW_SIZE = 3001);
  opt!(#[doc = "Handshake message marker: `1` for the request, `2` for the response"]
       HANDSHAKE_TYPE = 3999);
  opt!(#[doc = "The peer has no `coaps` session for the sender; the sender must restart it"]
       SESSION_NOT_FOUND = 4001);
  opt!(#[doc = "The peer's `coaps` session expired; the sender must restart it"]
       SESSION_EXPIRED = 4003);
  opt!(#[doc = "Sealed destination URI of a `coaps` message"] COAPS_URI = 4005);
  opt!(#[doc = "Session id assigned by a proxy, part of the secure session key"]
       PROXY_SECURITY_ID = 4007);

  /// All of the above
  pub const ALL: [crate::OptNumber; 7] = [URI_SCHEME,
                                          WINDOW_SIZE,
                                          HANDSHAKE_TYPE,
                                          SESSION_NOT_FOUND,
                                          SESSION_EXPIRED,
                                          COAPS_URI,
                                          PROXY_SECURITY_ID];
}

/// Content-Format of a CoRE link-format document (RFC6690)
pub const CONTENT_FORMAT_LINK_FORMAT: u64 = 40;

/// Human name of a known option
pub fn name(n: OptNumber) -> Option<&'static str> {
  use self::coala::*;
  use self::no_repeat::*;
  use self::repeat::*;

  let name = match n {
    | IF_MATCH => "IfMatch",
    | HOST => "UriHost",
    | ETAG => "ETag",
    | IF_NONE_MATCH => "IfNoneMatch",
    | OBSERVE => "Observe",
    | PORT => "UriPort",
    | LOCATION_PATH => "LocationPath",
    | PATH => "UriPath",
    | CONTENT_FORMAT => "ContentFormat",
    | MAX_AGE => "MaxAge",
    | QUERY => "UriQuery",
    | ACCEPT => "Accept",
    | LOCATION_QUERY => "LocationQuery",
    | BLOCK2 => "Block2",
    | BLOCK1 => "Block1",
    | PROXY_URI => "ProxyUri",
    | PROXY_SCHEME => "ProxyScheme",
    | SIZE1 => "Size1",
    | URI_SCHEME => "UriScheme",
    | WINDOW_SIZE => "SelectiveRepeatWindowSize",
    | HANDSHAKE_TYPE => "HandshakeType",
    | SESSION_NOT_FOUND => "SessionNotFound",
    | SESSION_EXPIRED => "SessionExpired",
    | COAPS_URI => "CoapsUri",
    | PROXY_SECURITY_ID => "ProxySecurityId",
    | _ => return None,
  };

  Some(name)
}

/// Whether a known option carries a UTF-8 string value
pub fn is_string(n: OptNumber) -> bool {
  [no_repeat::HOST,
   repeat::LOCATION_PATH,
   repeat::PATH,
   repeat::QUERY,
   repeat::LOCATION_QUERY,
   no_repeat::PROXY_URI,
   no_repeat::PROXY_SCHEME].contains(&n)
}

/// Whether this library understands the option
pub fn is_known(n: OptNumber) -> bool {
  no_repeat::ALL.contains(&n) || repeat::ALL.contains(&n) || coala::ALL.contains(&n)
}
