use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use signal_relay::signaling::{ClientMessage, UserCode};

const OFFER: &[u8] = br#"{"type":"call-offer","target":"bob","offer":{"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0 1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n"}}"#;

const CANDIDATE: &[u8] = br#"{"type":"call-candidate","target":"bob","candidate":{"candidate":"candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0 generation 0","sdpMid":"0","sdpMLineIndex":0}}"#;

/// parsing benchmark
fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("call-offer", |b| {
        b.iter(|| {
            let msg = ClientMessage::parse(black_box(OFFER)).unwrap();
            black_box(msg)
        })
    });

    group.bench_function("call-candidate", |b| {
        b.iter(|| {
            let msg = ClientMessage::parse(black_box(CANDIDATE)).unwrap();
            black_box(msg)
        })
    });

    group.finish();
}

/// full parse, stamp and encode cycle for one relayed envelope
fn bench_relay(c: &mut Criterion) {
    let from = UserCode::from("alice");

    let mut group = c.benchmark_group("Relay");
    group.throughput(Throughput::Elements(1));

    group.bench_function("call-candidate", |b| {
        b.iter(|| {
            let msg = ClientMessage::parse(black_box(CANDIDATE)).unwrap();
            let (target, relayed) = msg.into_relay(from.clone());
            let encoded = relayed.encode().unwrap();
            black_box((target, encoded))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_relay);
criterion_main!(benches);
