//! `coala` is a CoAP runtime for peers that are client and server at once.
//!
//! On top of plain CoAP (RFC7252) it provides:
//! - Block-wise transfer of large payloads (RFC7959)
//! - A selective-repeat ARQ for large payloads: a window of blocks is kept
//!   in flight and blocks may arrive in any order
//! - Observation of resources (RFC7641), client- and server-side
//! - `coaps` secure sessions: an X25519 handshake followed by
//!   AES-128-GCM sealed payloads and URLs
//! - Sending through a proxy, over UDP or tunneled through TCP
//!
//! ## Processing
//! Every message goes through a stack of [layers](crate::layer): outbound
//! messages through [`OutLayer`](layer::OutLayer)s on their way to the socket,
//! inbound messages through [`InLayer`](layer::InLayer)s on their way to
//! a [resource](crate::resource) or a [response handler](ResponseHandler).
//! A layer may take a message over, e.g. to split it into blocks or to hold it
//! back until a secure session is established.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coala::msg::{Method, ResponseCode, Type};
//! use coala::resource::{Output, SimpleResource};
//! use coala::{Coala, Envelope};
//!
//! let coala = Arc::new(Coala::try_bind("0.0.0.0:5683", Default::default()).unwrap());
//! coala.add_resource(SimpleResource::new(Method::Get, "info", |_| {
//!        Output::new(ResponseCode::Content, "coala")
//!      }));
//! coala.start().unwrap();
//!
//! let req = Envelope::request(Type::Con, Method::Get, "coap://192.168.1.5/info").unwrap()
//!                    .with_response_handler(|rep| match rep {
//!                      | Ok(rep) => println!("{:?} from {}", rep.msg.payload, rep.from),
//!                      | Err(e) => println!("failed: {}", e),
//!                    });
//! coala.send(req).unwrap();
//! ```

// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod sync;

/// runtime configuration
pub mod config;

/// time abstractions
pub mod time;

/// network abstractions
pub mod net;

/// `std`-backed sockets and clock
pub mod std;

/// sliding windows used by the selective-repeat ARQ
pub mod window;

/// tracking of outbound messages
pub mod pool;

/// inbound and outbound message processing
pub mod layer;

/// secure sessions
pub mod security;

/// client-side observation
pub mod observe;

/// server-side resources
pub mod resource;

/// messages with addresses and response handlers
pub mod envelope;

mod core;

#[doc(inline)]
pub use coala_msg as msg;
#[doc(inline)]
pub use envelope::{Envelope, ProgressHandler, Response, ResponseHandler};
#[doc(inline)]
pub use resource::{Input, ObservableResource, Output, Resource, SimpleResource};

#[doc(inline)]
pub use crate::config::Config;
#[doc(inline)]
pub use crate::core::{Coala, Error};
