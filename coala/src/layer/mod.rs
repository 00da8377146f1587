use std::net::SocketAddr;

use crate::envelope::Envelope;
use crate::{Coala, Error};

/// Selective-repeat ARQ transfer of large payloads
pub mod arq;

/// Block-wise transfer without reordering tolerance
pub mod block;

/// Message summaries
pub mod log;

/// Client- and server-side observation
pub mod observe;

/// Forwarding messages through a proxy
pub mod proxy;

/// ACKs and acknowledgement bookkeeping
pub mod reliability;

/// Dispatching requests to resources
pub mod request;

/// Delivering responses to response handlers
pub mod response;

/// Secure session handshake and payload encryption
pub mod security;

/// A step of inbound message processing.
///
/// A layer may mutate the message and its sender, and populate or replace the
/// ACK that will be sent once the pipeline finishes.
///
/// Returning an error stops the pipeline. Errors for which
/// [`Error::is_control_flow`] holds mean "this layer took care of the message".
pub trait InLayer: Send + Sync + core::fmt::Debug {
  /// Process a message that was just received
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error>;
}

/// A step of outbound message processing.
///
/// A layer may mutate the message and where it is going. Returning an error
/// stops the message from being sent.
pub trait OutLayer: Send + Sync + core::fmt::Debug {
  /// Process a message about to be sent
  fn run_out(&self, coala: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error>;
}

/// The ordered inbound and outbound pipelines.
///
/// ```text
///  inbound: proxy -> security -> log -> reliability -> arq -> block -> observe -> request -> response
/// outbound: observe -> arq -> block -> log -> security -> proxy
/// ```
#[derive(Debug, Default)]
pub struct LayerStack {
  pub(crate) proxy: proxy::ProxyLayer,
  pub(crate) security: security::SecurityLayer,
  pub(crate) log: log::LogLayer,
  pub(crate) reliability: reliability::ReliabilityLayer,
  pub(crate) arq: arq::ArqLayer,
  pub(crate) block: block::BlockLayer,
  pub(crate) observe: observe::ObserveLayer,
  pub(crate) request: request::RequestLayer,
  pub(crate) response: response::ResponseLayer,
}

impl LayerStack {
  fn inbound(&self) -> [&dyn InLayer; 9] {
    [&self.proxy,
     &self.security,
     &self.log,
     &self.reliability,
     &self.arq,
     &self.block,
     &self.observe,
     &self.request,
     &self.response]
  }

  fn outbound(&self) -> [&dyn OutLayer; 6] {
    [&self.observe, &self.arq, &self.block, &self.log, &self.security, &self.proxy]
  }

  /// Run the outbound pipeline
  pub fn run_out(&self, coala: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error> {
    self.outbound()
        .into_iter()
        .try_for_each(|layer| layer.run_out(coala, msg, to))
  }

  /// Run the inbound pipeline.
  ///
  /// Whatever ACK the layers produced is sent even when a layer fails,
  /// then the failure is returned.
  pub fn run_in(&self, coala: &Coala, msg: &mut Envelope, from: &mut SocketAddr) -> Result<(), Error> {
    let mut ack = None;

    let result = self.inbound()
                     .into_iter()
                     .try_for_each(|layer| layer.run_in(coala, msg, from, &mut ack));

    let sent = match ack {
      | Some(ack) => {
        self.arq.answered(&ack);
        coala.send(ack)
      },
      | None => Ok(()),
    };

    result.and(sent)
  }
}
