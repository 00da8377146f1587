use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use coala_msg::*;

#[derive(Debug)]
struct TestInput {
  tkl: u8,
  n_opts: usize,
  opt_size: usize,
  payload_size: usize,
}

impl TestInput {
  fn message(&self) -> Message {
    let mut msg = Message::new(Type::Non, Code::Response(ResponseCode::Content), Id(1));
    msg.token = Token::new(&vec![1u8; self.tkl as usize]);
    msg.opts = (0..self.n_opts).map(|n| Opt { number: OptNumber(n as u16 * 3),
                                              value: OptValue(vec![1; self.opt_size]) })
                               .collect();
    msg.payload = Payload(vec![1; self.payload_size]);
    msg
  }
}

fn inputs() -> Vec<TestInput> {
  vec![TestInput { tkl: 0,
                   n_opts: 0,
                   opt_size: 0,
                   payload_size: 0 },
       TestInput { tkl: 4,
                   n_opts: 4,
                   opt_size: 8,
                   payload_size: 16 },
       TestInput { tkl: 8,
                   n_opts: 8,
                   opt_size: 64,
                   payload_size: 128 },
       TestInput { tkl: 8,
                   n_opts: 16,
                   opt_size: 64,
                   payload_size: 1024 },
       TestInput { tkl: 8,
                   n_opts: 32,
                   opt_size: 256,
                   payload_size: 2048 },]
}

fn message_to_bytes(c: &mut Criterion) {
  let mut group = c.benchmark_group("msg/to_bytes");
  group.measurement_time(std::time::Duration::from_secs(5));

  for inp in inputs() {
    let msg = inp.message();
    group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", inp)), &msg, |b, msg| {
           b.iter(|| msg.try_into_bytes().unwrap())
         });
  }

  group.finish();
}

fn message_from_bytes(c: &mut Criterion) {
  let mut group = c.benchmark_group("msg/from_bytes");
  group.measurement_time(std::time::Duration::from_secs(5));

  for inp in inputs() {
    let bytes = inp.message().try_into_bytes().unwrap();
    group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", inp)), &bytes, |b, bytes| {
           b.iter(|| Message::try_from_bytes(bytes).unwrap())
         });
  }

  group.finish();
}

criterion_group!(benches, message_to_bytes, message_from_bytes);
criterion_main!(benches);
