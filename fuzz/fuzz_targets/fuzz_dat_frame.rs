#![no_main]
use fidonet_probe::emsi::dat::read_dat;
use fidonet_probe::emsi::reader::CharReader;
use fidonet_probe::transport::testing::MockDuplex;
use fidonet_probe::transport::TestContext;
use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};

fuzz_target!(|data: &[u8]| {
    let mut reader = CharReader::new(MockDuplex::new(data.to_vec()));
    let ctx = TestContext::with_timeout(Duration::from_millis(50));
    let deadline = Instant::now() + Duration::from_millis(50);
    let _ = read_dat(&mut reader, Duration::from_millis(5), &ctx, deadline, true);
});
