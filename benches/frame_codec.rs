//! Benchmark suite for the wire codec and the ledger
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Codec benchmarks cover encode and decode of a typical request and of
//! requests carrying larger file payloads. Ledger benchmarks measure
//! deposits under contention and one interest pass over a full ledger.

use netbank::core::{Ledger, WorkerPool};
use netbank::io::frame_codec::encode_frame;
use netbank::io::{decode_request, decode_response, encode_request, encode_response};
use netbank::types::{Request, RequestKind, Response};
use std::sync::Arc;
use std::thread;

fn main() {
    divan::main();
}

fn upload_request(payload_len: usize) -> Request {
    Request::new(RequestKind::UploadFile, 42)
        .with_name("report.txt")
        .with_payload("x".repeat(payload_len))
}

/// Encode a deposit request to its payload string
#[divan::bench]
fn encode_deposit() -> String {
    let request = Request::new(RequestKind::Deposit, 17).with_amount(250.5);
    encode_request(divan::black_box(&request))
}

/// Decode a deposit request payload
#[divan::bench]
fn decode_deposit() -> Request {
    decode_request(divan::black_box(b"1|17|250.5||"))
}

/// Decode a balance response payload
#[divan::bench]
fn decode_balance_response() -> Response {
    let payload = encode_response(&Response::success("View balance successful").with_balance(1024.75));
    decode_response(divan::black_box(payload.as_bytes())).unwrap_or_default()
}

/// Encode and frame an upload of `payload_len` bytes
#[divan::bench(args = [64, 4096, 262144])]
fn frame_upload(bencher: divan::Bencher, payload_len: usize) {
    let request = upload_request(payload_len);
    bencher.bench(|| encode_frame(&encode_request(divan::black_box(&request))).map(|frame| frame.len()));
}

/// Decode an upload of `payload_len` bytes
#[divan::bench(args = [64, 4096, 262144])]
fn decode_upload(bencher: divan::Bencher, payload_len: usize) {
    let payload = encode_request(&upload_request(payload_len));
    bencher.bench(|| decode_request(divan::black_box(payload.as_bytes())));
}

/// `threads` threads depositing into the same account
#[divan::bench(args = [1, 4, 8])]
fn ledger_contended_deposits(bencher: divan::Bencher, threads: usize) {
    bencher.bench(|| {
        let ledger = Arc::new(Ledger::new(16).expect("valid size"));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = ledger.deposit(3, 1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        ledger.balance(3)
    });
}

/// One interest pass over 1000 active accounts with `parallelism` in flight
#[divan::bench(args = [1, 4, 8])]
fn ledger_interest_pass(bencher: divan::Bencher, parallelism: usize) {
    let ledger = Arc::new(Ledger::new(1000).expect("valid size"));
    for id in 0..1000 {
        let _ = ledger.deposit(id, 100.0);
    }
    let pool = WorkerPool::new("bench-interest", 8).expect("valid size");
    bencher.bench(|| ledger.accrue_interest_all(0.0001, parallelism, &pool));
}
