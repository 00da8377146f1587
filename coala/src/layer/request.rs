use std::net::SocketAddr;

use coala_msg::{known, Code, Method, OptValue, Payload, ResponseCode, Type};

use super::InLayer;
use crate::envelope::Envelope;
use crate::resource::{discovery, Input, Output, Resource, WELL_KNOWN_CORE};
use crate::{Coala, Error};

/// Routes requests to the resource registered for their path and method.
///
/// The resource's output is piggybacked onto the ACK of a CON request.
/// NON requests are answered with a NON response carrying the request's
/// message id.
#[derive(Debug, Default)]
pub struct RequestLayer;

struct Answer {
  output: Output,
  content_format: Option<u64>,
  /// Errors go into the ACK only; NON requests aren't answered with them
  separate: bool,
}

impl Answer {
  fn error(code: ResponseCode) -> Self {
    Self { output: Output::code(code),
           content_format: None,
           separate: false }
  }
}

fn dispatch(resources: &[Resource], method: Method, path: &str, input: Input) -> Answer {
  if let Some(r) = resources.iter().find(|r| r.matches(method, path)) {
    return Answer { output: r.handle(input),
                    content_format: None,
                    separate: true };
  }

  if method == Method::Get && path == WELL_KNOWN_CORE {
    return Answer { output: discovery(resources),
                    content_format: Some(known::CONTENT_FORMAT_LINK_FORMAT),
                    separate: true };
  }

  match resources.iter().any(|r| r.matches_path(path)) {
    | true => Answer::error(ResponseCode::MethodNotAllowed),
    | false => Answer::error(ResponseCode::NotFound),
  }
}

impl InLayer for RequestLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    if !matches!(msg.ty, Type::Con | Type::Non) {
      return Ok(());
    }

    let method = match msg.method() {
      | Some(m) => m,
      | None => return Ok(()),
    };
    let path = msg.path_string();

    let unknown_critical = msg.opts
                              .iter()
                              .find(|o| o.number.is_critical() && !o.number.is_known())
                              .map(|o| o.number);

    let answer = match unknown_critical {
      | Some(n) => {
        log::debug!(target: "coala", "rejecting /{} from {}: unknown critical option {}", path, from, n.0);
        Answer::error(ResponseCode::BadOption)
      },
      | None => dispatch(&coala.resources(),
                         method,
                         &path,
                         Input { query: msg.query(),
                                 payload: msg.payload.0.clone() }),
    };

    let Answer { output: Output { code, payload },
                 content_format,
                 separate, } = answer;

    match ack.as_mut() {
      | Some(ack) => {
        ack.code = Code::Response(code);
        ack.payload = Payload(payload);
        if let Some(cf) = content_format {
          ack.set(known::no_repeat::CONTENT_FORMAT, OptValue::uint(cf));
        }
        Ok(())
      },
      | None if separate => {
        let mut rep = Envelope::response_to(Type::Non, code, msg, *from);
        rep.id = msg.id;
        rep.proxy_via = msg.proxy_via;
        rep.payload = Payload(payload);
        if let Some(cf) = content_format {
          rep.set(known::no_repeat::CONTENT_FORMAT, OptValue::uint(cf));
        }
        coala.send(rep)
      },
      | None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use coala_msg::{Id, OptNumber};

  use super::*;
  use crate::net::Addrd;
  use crate::resource::{ObservableResource, SimpleResource};
  use crate::test;

  fn server() -> (Coala, test::Dgrams, test::Dgrams) {
    let (coala, rx, tx) = test::coala(Default::default());
    coala.add_resource(SimpleResource::new(Method::Get, "msg", |_| {
                         Output::new(ResponseCode::Content, "PiggyBackedContent")
                       }));
    coala.add_resource(SimpleResource::new(Method::Post, "echo", |input: Input| {
                         let mut out = input.query_value("prefix").unwrap_or("").as_bytes().to_vec();
                         out.extend(input.payload);
                         Output::new(ResponseCode::Changed, out)
                       }));
    (coala, rx, tx)
  }

  fn exchange(coala: &Coala, rx: &test::Dgrams, tx: &test::Dgrams, req: coala_msg::Message) -> Vec<Addrd<coala_msg::Message>> {
    test::SockMock::send_msg(rx, Addrd(req, test::peer_addr()));
    coala.poll_once();
    test::SockMock::drain_sent(tx)
  }

  #[test]
  fn response_is_piggybacked() {
    let (coala, rx, tx) = server();
    let sent = exchange(&coala, &rx, &tx, test::get("/msg", 1, &[1, 2]));

    assert_eq!(sent.len(), 1);
    let ack = sent[0].data();
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.id, Id(1));
    assert_eq!(ack.token.as_bytes(), &[1, 2]);
    assert_eq!(ack.response_code(), Some(ResponseCode::Content));
    assert_eq!(ack.payload.0, b"PiggyBackedContent".to_vec());
  }

  #[test]
  fn non_request_gets_non_response() {
    let (coala, rx, tx) = server();
    let mut req = test::msg(Type::Non, Method::Post, 40, &[3]);
    req.set(known::repeat::PATH, "echo".into());
    req.set(known::repeat::QUERY, "prefix=>".into());
    req.payload = Payload(b"hi".to_vec());

    let sent = exchange(&coala, &rx, &tx, req);

    assert_eq!(sent.len(), 1);
    let rep = sent[0].data();
    assert_eq!(rep.ty, Type::Non);
    assert_eq!(rep.id, Id(40));
    assert_eq!(rep.token.as_bytes(), &[3]);
    assert_eq!(rep.payload.0, b">hi".to_vec());
    assert_eq!(sent[0].addr(), test::peer_addr());
  }

  #[test]
  fn wrong_method_and_unknown_path() {
    let (coala, rx, tx) = server();

    let mut put = test::msg(Type::Con, Method::Put, 2, &[]);
    put.set(known::repeat::PATH, "msg".into());
    let sent = exchange(&coala, &rx, &tx, put);
    assert_eq!(sent[0].data().response_code(), Some(ResponseCode::MethodNotAllowed));

    let sent = exchange(&coala, &rx, &tx, test::get("nope", 3, &[]));
    assert_eq!(sent[0].data().response_code(), Some(ResponseCode::NotFound));

    // nothing is sent for a NON request nobody handles
    let mut non = test::get("nope", 4, &[]);
    non.ty = Type::Non;
    assert!(exchange(&coala, &rx, &tx, non).is_empty());
  }

  #[test]
  fn unknown_critical_option() {
    let (coala, rx, tx) = server();

    let mut req = test::get("msg", 5, &[]);
    req.set(OptNumber(9), OptValue::uint(1));
    let sent = exchange(&coala, &rx, &tx, req);
    assert_eq!(sent[0].data().response_code(), Some(ResponseCode::BadOption));

    // elective options are ignored
    let mut req = test::get("msg", 6, &[]);
    req.set(OptNumber(10), OptValue::uint(1));
    let sent = exchange(&coala, &rx, &tx, req);
    assert_eq!(sent[0].data().response_code(), Some(ResponseCode::Content));
  }

  #[test]
  fn discovery_lists_resources() {
    let (coala, rx, tx) = server();
    coala.add_resource(ObservableResource::new("state", |_| Output::code(ResponseCode::Content)));

    let sent = exchange(&coala, &rx, &tx, test::get(".well-known/core", 7, &[]));
    let ack = sent[0].data();
    assert_eq!(ack.response_code(), Some(ResponseCode::Content));
    assert_eq!(ack.get_uint(known::no_repeat::CONTENT_FORMAT),
               Some(known::CONTENT_FORMAT_LINK_FORMAT));
    assert_eq!(ack.payload.0, b"</msg>,</echo>,</state>".to_vec());
  }

  #[test]
  fn responses_are_ignored() {
    let (coala, _, tx) = server();
    let mut rep = test::to_peer(test::msg(Type::Con, ResponseCode::Content, 9, &[]));
    let mut ack = Some(Envelope::ack_to(&rep, test::peer_addr(), ResponseCode::Empty));

    RequestLayer.run_in(&coala, &mut rep, &mut test::peer_addr(), &mut ack)
                .unwrap();
    assert_eq!(ack.unwrap().code, Code::EMPTY);
    assert!(test::SockMock::drain_sent(&tx).is_empty());
  }
}
