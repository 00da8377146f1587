use std::net::SocketAddr;

use coala_msg::{known, ResponseCode, Type};

use super::InLayer;
use crate::envelope::Envelope;
use crate::{Coala, Error};

/// Acknowledges CON messages and marks acknowledged messages as delivered.
///
/// The ACK is only prepared here; later layers may piggyback a response
/// onto it, and it is sent once the inbound pipeline finishes.
#[derive(Debug, Default)]
pub struct ReliabilityLayer;

impl InLayer for ReliabilityLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    match msg.ty {
      | Type::Con => {
        let mut a = Envelope::ack_to(msg, *from, ResponseCode::Empty);
        a.proxy_via = msg.proxy_via;
        if let Some(id) = msg.get_first(known::coala::PROXY_SECURITY_ID) {
          a.set(known::coala::PROXY_SECURITY_ID, id.clone());
        }
        *ack = Some(a);
      },
      | Type::Ack | Type::Reset
        if !msg.code.is_empty() && msg.has(known::coala::WINDOW_SIZE) =>
      {
        coala.pool().did_transmit(msg.id)
      },
      | _ => (),
    }

    Ok(())
  }
}
