use chromenet_dns::base::networkchange::NetworkChangeNotifier;
use chromenet_dns::dns::{DnsConfig, DnsSession, DohServerConfig, ResolveContext, SecureDnsMode};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::SocketAddr;

fn config() -> DnsConfig {
    let nameservers: Vec<SocketAddr> = (1..=4)
        .map(|i| SocketAddr::from(([10, 0, 0, i], 53)))
        .collect();
    let doh = (0..3)
        .map(|i| {
            DohServerConfig::new(format!("https://doh{i}.test/dns-query{{?dns}}"), false).unwrap()
        })
        .collect();
    DnsConfig::new().nameservers(nameservers).dns_over_https_servers(doh)
}

/// Timeout computation and server selection are on every query's path.
/// All in-memory, no sockets.
fn benchmark_session(c: &mut Criterion) {
    let session = DnsSession::new(config());
    for i in 0..200 {
        let rtt = time::Duration::milliseconds(20 + i as i64);
        session.record_rtt(i % 4, false, false, rtt, Ok(()));
    }

    c.bench_function("next_timeout", |b| {
        b.iter(|| black_box(session.next_timeout(black_box(1), black_box(5))))
    });

    c.bench_function("record_rtt", |b| {
        b.iter(|| {
            let rtt = black_box(time::Duration::milliseconds(35));
            session.record_rtt(0, false, false, rtt, Ok(()))
        })
    });

    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    for _ in 0..2 {
        session.record_server_failure(0, false, &ctx);
        session.record_server_failure(1, false, &ctx);
    }
    c.bench_function("server_index_to_use", |b| {
        b.iter(|| black_box(session.server_index_to_use(black_box(0))))
    });
}

fn benchmark_resolve_context(c: &mut Criterion) {
    let session = DnsSession::new(config());
    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    ctx.invalidate_caches(Some(&session));
    ctx.set_probe_success(2, true, &session);

    c.bench_function("doh_server_index_to_use", |b| {
        b.iter(|| black_box(ctx.doh_server_index_to_use(0, SecureDnsMode::Automatic, &session)))
    });
}

criterion_group!(benches, benchmark_session, benchmark_resolve_context);
criterion_main!(benches);
