#![no_main]
use fidonet_probe::binkp::Frame;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut cur = Cursor::new(data);
    while let Ok(_frame) = Frame::decode(&mut cur) {}
});
