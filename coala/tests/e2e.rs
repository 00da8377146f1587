use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coala::config::{Attempts, Config, Msg};
use coala::msg::{known, Block, Code, Id, Message, Method, Payload, ResponseCode, Token, TryFromBytes,
                 TryIntoBytes, Type};
use coala::resource::{Input, ObservableResource, Output, SimpleResource};
use coala::{Coala, Envelope, Error, Response};
use embedded_time::duration::Milliseconds;
use rand::Rng;
use simple_logger::SimpleLogger;

type Seen = Arc<Mutex<Vec<Result<Response, Error>>>>;

fn init_logging() {
  SimpleLogger::new().with_level(log::LevelFilter::Warn)
                     .init()
                     .ok();
}

fn peer(config: Config) -> Arc<Coala> {
  let coala = Arc::new(Coala::try_bind("127.0.0.1:0", config).unwrap());
  coala.start().unwrap();
  coala
}

fn addr(coala: &Coala) -> SocketAddr {
  coala.local_addr().unwrap()
}

fn url(coala: &Coala, scheme: &str, path: &str) -> String {
  format!("{}://{}/{}", scheme, addr(coala), path)
}

fn wait_until(what: &str, f: impl Fn() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !f() {
    if Instant::now() > deadline {
      panic!("timed out waiting for {}", what);
    }
    thread::sleep(Duration::from_millis(5));
  }
}

fn request(method: Method, url: &str) -> (Envelope, Seen) {
  let seen = Seen::default();
  let seen_ = seen.clone();
  let env = Envelope::request(Type::Con, method, url).unwrap()
                                                     .with_response_handler(move |r| {
                                                       seen_.lock().unwrap().push(r)
                                                     });
  (env, seen)
}

#[test]
fn piggybacked_response_is_delivered_once() {
  init_logging();
  let (server, client) = (peer(Config::default()), peer(Config::default()));
  server.add_resource(SimpleResource::new(Method::Get, "msg", |_| {
                        Output::new(ResponseCode::Content, "PiggyBackedContent")
                      }));

  let (req, seen) = request(Method::Get, &url(&server, "coap", "msg"));
  client.send(req).unwrap();

  wait_until("response", || !seen.lock().unwrap().is_empty());
  thread::sleep(Duration::from_millis(200));

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  let rep = seen[0].as_ref().unwrap();
  assert_eq!(rep.msg.response_code(), Some(ResponseCode::Content));
  assert_eq!(rep.msg.payload.0, b"PiggyBackedContent".to_vec());
  assert_eq!(rep.from, addr(&server));
}

#[test]
fn large_post_is_reassembled() {
  init_logging();
  let (server, client) = (peer(Config::default()), peer(Config::default()));

  let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
  let received_ = received.clone();
  server.add_resource(SimpleResource::new(Method::Post, "upload", move |input: Input| {
                        received_.lock().unwrap().push(input.payload);
                        Output::code(ResponseCode::Changed)
                      }));

  let mut data = vec![0u8; 40_000];
  rand::thread_rng().fill(&mut data[..]);

  let (mut req, seen) = request(Method::Post, &url(&server, "coap", "upload"));
  req.payload = coala::msg::Payload(data.clone());
  client.send(req).unwrap();

  wait_until("upload response", || !seen.lock().unwrap().is_empty());
  thread::sleep(Duration::from_millis(200));

  let received = received.lock().unwrap();
  assert_eq!(received.len(), 1);
  assert_eq!(received[0], data);

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  assert_eq!(seen[0].as_ref().unwrap().msg.response_code(),
             Some(ResponseCode::Changed));
}

#[test]
fn large_get_is_downloaded_in_windowed_blocks() {
  init_logging();
  let (server, client) = (peer(Config::default()), peer(Config::default()));

  let mut data = vec![0u8; 40_000];
  rand::thread_rng().fill(&mut data[..]);
  let data_ = data.clone();
  server.add_resource(SimpleResource::new(Method::Get, "firmware", move |_| {
                        Output::new(ResponseCode::Content, data_.clone())
                      }));

  let progress = Arc::new(Mutex::new(Vec::<usize>::new()));
  let progress_ = progress.clone();
  let (req, seen) = request(Method::Get, &url(&server, "coap", "firmware"));
  client.send_with_progress(req, move |bytes| progress_.lock().unwrap().push(bytes.len()))
        .unwrap();

  wait_until("download", || !seen.lock().unwrap().is_empty());
  thread::sleep(Duration::from_millis(200));

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  let rep = seen[0].as_ref().unwrap();
  assert_eq!(rep.msg.response_code(), Some(ResponseCode::Content));
  assert_eq!(rep.msg.payload.0, data);

  let progress = progress.lock().unwrap();
  assert_eq!(progress.last(), Some(&40_000));
  assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

/// A peer speaking plain RFC7959 over a raw socket, without the ARQ window option
fn plain_peer() -> UdpSocket {
  let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
  sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
  sock
}

fn recv_msg(sock: &UdpSocket) -> (Message, SocketAddr) {
  let mut buf = [0u8; 2048];
  let (n, from) = sock.recv_from(&mut buf).unwrap();
  (Message::try_from_bytes(&buf[..n]).unwrap(), from)
}

fn send_msg(sock: &UdpSocket, msg: Message, to: SocketAddr) {
  sock.send_to(&msg.try_into_bytes().unwrap(), to).unwrap();
}

#[test]
fn upload_from_plain_peer_goes_block_by_block() {
  init_logging();
  let server = peer(Config::default());
  server.add_resource(SimpleResource::new(Method::Post, "upload", |input: Input| {
                        Output::new(ResponseCode::Changed, input.payload.len().to_string())
                      }));

  let sock = plain_peer();
  let data = (0..148u8).collect::<Vec<u8>>();

  for (num, chunk) in data.chunks(64).enumerate() {
    let more = (num + 1) * 64 < data.len();
    let mut post = Message::new(Type::Con, Code::Request(Method::Post), Id(100 + num as u16));
    post.token = Token::new(&[1, 2]);
    post.set(known::repeat::PATH, "upload".into());
    post.set_block1(Some(Block::new(64, num as u32, more)));
    post.payload = Payload(chunk.to_vec());
    send_msg(&sock, post, addr(&server));

    let (ack, _) = recv_msg(&sock);
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.id, Id(100 + num as u16));

    if more {
      assert_eq!(ack.response_code(), Some(ResponseCode::Continue));
      assert_eq!(ack.block1().map(|b| b.num()), Some(num as u32));
      assert!(!ack.has(known::coala::WINDOW_SIZE));
    } else {
      assert_eq!(ack.response_code(), Some(ResponseCode::Changed));
      assert_eq!(ack.payload.0, b"148".to_vec());
    }
  }
}

#[test]
fn download_from_plain_peer_goes_block_by_block() {
  init_logging();
  let client = peer(Config::default());
  let sock = plain_peer();
  let sock_addr = sock.local_addr().unwrap();
  let data = (0..148u8).collect::<Vec<u8>>();

  let data_ = data.clone();
  let plain_server = thread::spawn(move || {
    let mut asked = vec![];
    loop {
      let (req, from) = recv_msg(&sock);
      let num = req.block2().map(|b| b.num()).unwrap_or(0);
      asked.push(num);

      let start = num as usize * 64;
      let end = (start + 64).min(data_.len());
      let more = end < data_.len();

      let mut rep = req.ack();
      rep.code = Code::Response(ResponseCode::Content);
      rep.set_block2(Some(Block::new(64, num, more)));
      rep.payload = Payload(data_[start..end].to_vec());
      send_msg(&sock, rep, from);

      if !more {
        return asked;
      }
    }
  });

  let (req, seen) = request(Method::Get, &format!("coap://{}/large", sock_addr));
  client.send(req).unwrap();

  wait_until("download", || !seen.lock().unwrap().is_empty());
  assert_eq!(plain_server.join().unwrap(), vec![0, 1, 2]);
  thread::sleep(Duration::from_millis(200));

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  let rep = seen[0].as_ref().unwrap();
  assert_eq!(rep.msg.response_code(), Some(ResponseCode::Content));
  assert_eq!(rep.msg.payload.0, data);
  assert_eq!(rep.from, sock_addr);
}

#[test]
fn secure_exchange() {
  init_logging();
  let (server, client) = (peer(Config::default()), peer(Config::default()));
  server.add_resource(SimpleResource::new(Method::Get, "secret", |input: Input| {
                        let who = input.query_value("who").unwrap_or("nobody").to_string();
                        Output::new(ResponseCode::Content, format!("hello {}", who))
                      }));

  let (req, seen) = request(Method::Get, &url(&server, "coaps", "secret?who=client"));
  client.send(req).unwrap();

  wait_until("secure response", || !seen.lock().unwrap().is_empty());

  let seen = seen.lock().unwrap();
  let rep = seen[0].as_ref().unwrap();
  assert_eq!(rep.msg.payload.0, b"hello client".to_vec());
  assert_eq!(rep.peer_public_key, Some(server.identity().public_key()));
}

#[test]
fn observer_gets_notifications() {
  init_logging();
  let (server, client) = (peer(Config::default()), peer(Config::default()));

  let counter = Arc::new(Mutex::new(0u32));
  let counter_ = counter.clone();
  let resource = ObservableResource::new("counter", move |_| {
    Output::new(ResponseCode::Content, counter_.lock().unwrap().to_string())
  });
  server.add_resource(resource.clone());

  let payloads = Arc::new(Mutex::new(Vec::<String>::new()));
  let payloads_ = payloads.clone();
  client.start_observing(&url(&server, "coap", "counter"), move |r| {
          if let Ok(rep) = r {
            payloads_.lock()
                     .unwrap()
                     .push(String::from_utf8_lossy(&rep.msg.payload.0).into_owned());
          }
        })
        .unwrap();

  wait_until("registration", || resource.observers_count() == 1);
  wait_until("first notification", || payloads.lock().unwrap().len() == 1);

  for _ in 0..2 {
    *counter.lock().unwrap() += 1;
    resource.notify_observers(&server);
  }

  wait_until("notifications", || payloads.lock().unwrap().len() == 3);
  assert_eq!(*payloads.lock().unwrap(), vec!["0", "1", "2"]);

  client.stop_observing(&url(&server, "coap", "counter")).unwrap();
  wait_until("deregistration", || resource.observers_count() == 0);
}

#[test]
fn unanswered_request_expires() {
  init_logging();
  let config = Config { msg: Msg { resend_interval: Milliseconds(100),
                                   max_attempts: Attempts(2),
                                   ..Msg::default() },
                        ..Config::default() };
  let client = peer(config);

  // receives, never answers
  let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
  let sink_addr = sink.local_addr().unwrap();

  let (req, seen) = request(Method::Get, &format!("coap://{}/void", sink_addr));
  client.send(req).unwrap();

  wait_until("expiry", || !seen.lock().unwrap().is_empty());
  assert_eq!(*seen.lock().unwrap(),
             vec![Err(Error::MessageExpired(Some(sink_addr)))]);
}

#[test]
fn stop_ends_the_worker() {
  init_logging();
  let coala = peer(Config::default());
  assert!(coala.is_running());
  coala.stop();
  assert!(!coala.is_running());
}
