use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nmdc_proto::lock::key_for_lock;
use nmdc_proto::message::{Message, MyInfoArgs, SearchArgs};
use nmdc_proto::{escape, unescape};

fn bench_classify(c: &mut Criterion) {
    let frames = [
        "$MyINFO $ALL alice desc <++ V:1,M:A,H:0/0/1,S:2>$ $100\u{1}$$10737418240$",
        "$Search 1.2.3.4:412 F?T?0?9?TTH:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
        "<alice> hello everyone",
        "$ConnectToMe bob 1.2.3.4:412S",
    ];

    c.bench_function("classify", |b| {
        b.iter(|| {
            for f in &frames {
                black_box(Message::new((*f).to_string()));
            }
        })
    });
}

fn bench_myinfo(c: &mut Criterion) {
    let raw = "$MyINFO $ALL alice desc <++ V:1,M:A,H:0/0/1,S:2>$ $100\u{1}$mail@x$10737418240$";

    c.bench_function("myinfo_parse", |b| {
        b.iter(|| black_box(MyInfoArgs::parse(black_box(raw)).unwrap()))
    });
}

fn bench_search(c: &mut Criterion) {
    let raw = "$Search 1.2.3.4:412 F?T?0?9?TTH:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    c.bench_function("search_parse", |b| {
        b.iter(|| black_box(SearchArgs::parse(black_box(raw)).unwrap()))
    });
}

fn bench_lock_key(c: &mut Criterion) {
    let lock = b"EXTENDEDPROTOCOL_NMDC_1234";

    c.bench_function("lock_to_key", |b| {
        b.iter(|| black_box(key_for_lock(black_box(lock))))
    });
}

fn bench_escape(c: &mut Criterion) {
    let raw = "text with $ and | and ` metacharacters repeated $ | ` a few times";
    let escaped = escape(raw);

    c.bench_function("escape", |b| b.iter(|| black_box(escape(black_box(raw)))));
    c.bench_function("unescape", |b| {
        b.iter(|| black_box(unescape(black_box(escaped.as_bytes()))))
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_myinfo,
    bench_search,
    bench_lock_key,
    bench_escape
);
criterion_main!(benches);
