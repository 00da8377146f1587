use ::std::io;
use ::std::net::{SocketAddr, ToSocketAddrs};
use ::std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use ::std::sync::{Arc, Mutex, RwLock, Weak};
use ::std::thread::{self, JoinHandle};
use ::std::time::Duration;

use coala_msg::{known, Message, Method, OptValue, Scheme, TryFromBytes, TryIntoBytes, Type};
use embedded_time::{Clock as _, Instant};

mod error;
#[doc(inline)]
pub use error::*;

use crate::config::Config;
use crate::envelope::{random_token, Envelope, ProgressHandler, Response, ResponseHandler};
use crate::layer::LayerStack;
use crate::net::{multicast, Addrd, Socket};
use crate::pool::{Action, DeliveryStats, MessagePool};
use crate::resource::Resource;
use crate::security::Identity;
use crate::sync::{read, write};
use crate::time::millis_between;

/// How long the worker sleeps when there was nothing to receive
const IDLE: Duration = Duration::from_millis(1);

const OBSERVE_REGISTER: u64 = 0;
const OBSERVE_DEREGISTER: u64 = 1;

type Clock = crate::std::Clock;

/// A CoAP peer: client and server at once.
///
/// Outbound messages go through [`Coala::send`]; inbound datagrams are
/// pulled off the socket by [`Coala::poll_once`], or continuously by the
/// worker thread [`Coala::start`] spawns.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use coala::msg::{Method, ResponseCode, Type};
/// use coala::resource::{Output, SimpleResource};
/// use coala::{Coala, Envelope};
///
/// let server = Arc::new(Coala::try_bind("0.0.0.0:5683", Default::default()).unwrap());
/// server.add_resource(SimpleResource::new(Method::Get, "hello", |_| {
///         Output::new(ResponseCode::Content, "world")
///       }));
/// server.start().unwrap();
///
/// let client = Arc::new(Coala::try_bind("0.0.0.0:0", Default::default()).unwrap());
/// client.start().unwrap();
///
/// let req = Envelope::request(Type::Con, Method::Get, "coap://127.0.0.1:5683/hello").unwrap()
///                    .with_response_handler(|rep| println!("{:?}", rep));
/// client.send(req).unwrap();
/// ```
pub struct Coala {
  sock: Box<dyn Socket>,
  config: Config,
  clock: Clock,
  pool: Arc<MessagePool<Clock>>,
  layers: LayerStack,
  resources: RwLock<Vec<Resource>>,
  identity: Identity,
  arq_window_size: AtomicUsize,
  running: AtomicBool,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl core::fmt::Debug for Coala {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Coala")
     .field("sock", &self.sock)
     .field("config", &self.config)
     .field("pool", &self.pool.len())
     .field("resources", &self.resources_count())
     .field("identity", &self.identity)
     .field("running", &self.running.load(Ordering::SeqCst))
     .finish()
  }
}

impl Coala {
  /// Run on a socket
  pub fn new<S: Socket + 'static>(sock: S, config: Config) -> Self {
    Self { sock: Box::new(sock),
           arq_window_size: AtomicUsize::new(config.arq.window_size),
           pool: Arc::new(MessagePool::new(config.msg.clone())),
           config,
           clock: Clock::new(),
           layers: LayerStack::default(),
           resources: RwLock::new(Vec::new()),
           identity: Identity::generate(),
           running: AtomicBool::new(false),
           worker: Mutex::new(None) }
  }

  /// Bind a UDP socket and join the "all CoAP devices" multicast group.
  ///
  /// Failing to join the group is not fatal; the instance just won't
  /// hear multicast requests.
  pub fn try_bind<A: ToSocketAddrs>(addr: A, config: Config) -> io::Result<Self> {
    let sock = crate::std::bind(addr)?;

    if let Err(e) = sock.join_multicast_v4(&multicast::ALL_COAP_DEVICES_IP,
                                           &::std::net::Ipv4Addr::UNSPECIFIED)
    {
      log::warn!(target: "coala", "could not join multicast group: {}", e);
    }

    Ok(Self::new(sock, config))
  }

  /// Use a persisted key pair for secure sessions instead of a random one
  pub fn with_identity(mut self, identity: Identity) -> Self {
    self.identity = identity;
    self
  }

  /// The key pair presented in secure session handshakes
  pub fn identity(&self) -> &Identity {
    &self.identity
  }

  /// Runtime configuration
  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Address of the underlying socket
  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.sock.local_addr()
  }

  pub(crate) fn pool(&self) -> &MessagePool<Clock> {
    &self.pool
  }

  /// Handle to the pool for callbacks that outlive a borrow of `self`
  pub(crate) fn pool_ref(&self) -> Weak<MessagePool<Clock>> {
    Arc::downgrade(&self.pool)
  }

  pub(crate) fn layers(&self) -> &LayerStack {
    &self.layers
  }

  pub(crate) fn now(&self) -> Instant<Clock> {
    self.clock.try_now().unwrap_or_else(|_| Instant::new(0))
  }

  /// Stop retransmitting a message and drop block-wise state for its token
  pub(crate) fn forget(&self, msg: &Message) {
    self.pool.remove(msg);
    self.layers.block.clear(&msg.token);
  }

  /// Send a message to [`Envelope::addr`].
  ///
  /// The message goes through the outbound layers, is serialized and sent;
  /// CON and NON messages are then tracked for retransmission and response
  /// matching. A message a layer took over (split into blocks, queued behind
  /// a secure handshake, ...) is not an error.
  pub fn send(&self, env: Envelope) -> Result<(), Error> {
    match self.send_now(env) {
      | Err(e) if e.is_control_flow() => {
        log::trace!(target: "coala", "outbound message taken over: {}", e);
        Ok(())
      },
      | r => r,
    }
  }

  fn send_now(&self, env: Envelope) -> Result<(), Error> {
    let mut to = env.addr.ok_or(Error::AddressNotSet)?;
    let mut out = env.clone();

    self.layers.run_out(self, &mut out, &mut to)?;
    let bytes = (&out.msg).try_into_bytes()?;

    self.pool.push(&env, self.now());
    nb::block!(self.sock.send(Addrd(&bytes[..], to)))?;
    Ok(())
  }

  /// [`Coala::send`], reporting the bytes of a block-wise download as they arrive
  pub fn send_with_progress<F>(&self, mut env: Envelope, progress: F) -> Result<(), Error>
    where F: Fn(&[u8]) + Send + Sync + 'static
  {
    if env.token.is_empty() {
      env.token = random_token(4);
    }

    let progress: ProgressHandler = Arc::new(progress);
    self.layers.arq.set_progress(env.token.clone(), progress);
    self.send(env)
  }

  /// Process a datagram that was received from a peer
  pub fn receive(&self, dgram: Addrd<&[u8]>) -> Result<(), Error> {
    let msg = Message::try_from_bytes(dgram.data())?;
    let mut from = dgram.addr();
    let mut env = Envelope { addr: Some(from),
                             ..Envelope::new(msg) };

    match self.layers.run_in(self, &mut env, &mut from) {
      | Err(e) if e.is_control_flow() => {
        log::trace!(target: "coala", "inbound message taken over: {}", e);
        Ok(())
      },
      | r => r,
    }
  }

  /// Receive and process one datagram, if one is waiting.
  ///
  /// Returns whether there was one.
  pub fn poll_once(&self) -> bool {
    match self.sock.poll() {
      | Ok(Some(dgram)) => {
        if let Err(e) = self.receive(Addrd(dgram.data().as_slice(), dgram.addr())) {
          log::warn!(target: "coala", "dropping message from {}: {}", dgram.addr(), e);
        }
        true
      },
      | Ok(None) => false,
      | Err(e) => {
        log::error!(target: "coala", "socket receive failed: {}", e);
        false
      },
    }
  }

  /// Run one pass of retransmission and observation upkeep
  pub fn tick(&self) {
    self.tick_at(self.now())
  }

  pub(crate) fn tick_at(&self, now: Instant<Clock>) {
    self.tick_pool(now);
    self.layers.observe.tick(self, now);
  }

  fn tick_pool(&self, now: Instant<Clock>) {
    for (action, env) in self.pool.poll(now) {
      // an earlier action in this pass may have dropped it
      if self.pool.get(env.id).is_none() {
        continue;
      }

      match action {
        | Action::Resend => {
          log::debug!(target: "coala", "resending {} to {:?}", env.id, env.addr);
          if let Err(e) = self.send(env) {
            log::warn!(target: "coala", "resend failed: {}", e);
          }
        },
        | Action::Delete => self.forget(&env),
        | Action::Timeout => {
          self.forget(&env);
          env.respond(Err(Error::MessageExpired(env.addr)));
          self.layers.arq.clear(&env.token);
        },
      }
    }

    self.layers.arq.prune(now, self.config.msg.exchange_lifetime());
  }

  /// Spawn the worker thread that receives datagrams and runs [`Coala::tick`].
  ///
  /// The worker holds a weak reference; it exits after [`Coala::stop`] or
  /// once the last [`Arc`] is dropped.
  pub fn start(self: &Arc<Self>) -> Result<(), Error> {
    if self.running.swap(true, Ordering::SeqCst) {
      return Ok(());
    }

    let weak = Arc::downgrade(self);
    let handle = thread::Builder::new().name("coala".into())
                                       .spawn(move || work(weak))?;

    *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    log::info!(target: "coala", "started on {:?}", self.local_addr().ok());
    Ok(())
  }

  /// Stop the worker thread.
  ///
  /// Messages awaiting a response are abandoned; their handlers are not invoked.
  pub fn stop(&self) {
    if !self.running.swap(false, Ordering::SeqCst) {
      return;
    }

    let handle = self.worker
                     .lock()
                     .unwrap_or_else(|p| p.into_inner())
                     .take();

    if let Some(h) = handle {
      if h.thread().id() != thread::current().id() && h.join().is_err() {
        log::error!(target: "coala", "worker thread panicked");
      }
    }
    log::info!(target: "coala", "stopped");
  }

  /// Whether the worker thread is running
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Serve a resource
  pub fn add_resource(&self, resource: impl Into<Resource>) {
    write(&self.resources).push(resource.into());
  }

  /// Stop serving every resource at `path`
  pub fn remove_resources(&self, path: &str) {
    write(&self.resources).retain(|r| !r.matches_path(path));
  }

  /// Number of resources served, `/.well-known/core` excluded
  pub fn resources_count(&self) -> usize {
    read(&self.resources).len()
  }

  pub(crate) fn resources(&self) -> Vec<Resource> {
    read(&self.resources).clone()
  }

  /// Number of blocks kept in flight by selective-repeat transfers started from now on
  pub fn arq_window_size(&self) -> usize {
    self.arq_window_size.load(Ordering::SeqCst)
  }

  /// See [`Coala::arq_window_size`]
  pub fn set_arq_window_size(&self, size: usize) {
    self.arq_window_size.store(size.max(1), Ordering::SeqCst);
  }

  /// Delivery statistics for a peer
  pub fn statistics(&self, scheme: Scheme, addr: SocketAddr) -> Option<DeliveryStats> {
    self.pool.statistics(scheme, addr)
  }

  /// Forget delivery statistics for a peer
  pub fn flush_statistics(&self, scheme: Scheme, addr: SocketAddr) {
    self.pool.flush_statistics(scheme, addr)
  }

  /// Forget all delivery statistics
  pub fn flush_all_statistics(&self) {
    self.pool.flush_all_statistics()
  }

  /// Subscribe to a resource; `handler` receives every notification.
  ///
  /// The observation is renewed when notifications stop coming for longer
  /// than their Max-Age.
  pub fn start_observing<F>(&self, url: &str, handler: F) -> Result<(), Error>
    where F: Fn(Result<Response, Error>) + Send + Sync + 'static
  {
    self.observe_url(url, OBSERVE_REGISTER, Some(Arc::new(handler)))
  }

  /// Cancel a subscription made with [`Coala::start_observing`]
  pub fn stop_observing(&self, url: &str) -> Result<(), Error> {
    self.observe_url(url, OBSERVE_DEREGISTER, None)
  }

  pub(crate) fn observe_url(&self,
                            url: &str,
                            action: u64,
                            handler: Option<ResponseHandler>)
                            -> Result<(), Error> {
    let mut env = Envelope::request(Type::Con, Method::Get, url)?;
    let url = env.url().map(|u| u.to_string()).unwrap_or_else(|| url.to_string());

    env.token = crate::observe::token_for(&url);
    env.set(known::no_repeat::OBSERVE, OptValue::uint(action));
    env.on_response = handler;
    self.send(env)
  }
}

impl Drop for Coala {
  fn drop(&mut self) {
    self.running.store(false, Ordering::SeqCst);
  }
}

fn work(coala: Weak<Coala>) {
  let (mut last_pool, mut last_observe) = match coala.upgrade() {
    | Some(c) => (c.now(), c.now()),
    | None => return,
  };

  loop {
    let c = match coala.upgrade() {
      | Some(c) if c.is_running() => c,
      | _ => break,
    };

    let busy = c.poll_once();
    let now = c.now();

    if millis_between(last_pool, now) >= c.config.pool_tick().0 {
      c.tick_pool(now);
      last_pool = now;
    }

    if millis_between(last_observe, now) >= c.config.observe.tick.0 {
      c.layers.observe.tick(&c, now);
      last_observe = now;
    }

    drop(c);
    if !busy {
      thread::sleep(IDLE);
    }
  }

  log::debug!(target: "coala", "worker exiting");
}
