use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anycast_probe::candidate::{Candidate, Protocol};
use anycast_probe::generator::{CandidateGenerator, GeneratorConfig};
use anycast_probe::input::ScanOrder;
use anycast_probe::rank::Ranking;
use anycast_probe::scanner::{
    FailureReason, ProbeOutcome, Prober, ScanSettings, Scanner, Timeouts,
};
use tokio::net::{TcpListener, UdpSocket};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Only 10.0.0.1:443 answers; every other candidate hangs until its deadline.
struct OneLiveEndpoint;

impl Prober for OneLiveEndpoint {
    async fn probe(&self, candidate: &Candidate, timeout: Duration) -> ProbeOutcome {
        let candidate = *candidate;
        if candidate.socket_addr() == "10.0.0.1:443".parse::<SocketAddr>().unwrap() {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(15)).await;
            ProbeOutcome::success(candidate, start.elapsed())
        } else {
            tokio::time::sleep(timeout).await;
            ProbeOutcome::failure(candidate, FailureReason::Timeout)
        }
    }
}

#[tokio::test]
async fn slow_endpoints_are_probed_in_parallel() {
    let timeout = Duration::from_millis(400);
    let candidates = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        .iter()
        .map(|ip| Candidate::new(ip.parse().unwrap(), 443, Protocol::Tcp))
        .collect::<Vec<_>>();
    let settings = ScanSettings::new(Timeouts::uniform(timeout), 10).unwrap();

    let started = Instant::now();
    let results = Scanner::with_prober(OneLiveEndpoint, settings)
        .run(candidates)
        .await;
    let elapsed = started.elapsed();

    // Bounded by the slowest timeout, not by the sum of them.
    assert!(elapsed >= timeout, "run returned early after {elapsed:?}");
    assert!(elapsed < timeout * 2, "run took {elapsed:?}");

    let ranking = Ranking::rank(&results);
    assert_eq!(ranking.get(Protocol::Tcp).len(), 1);
    assert!(ranking.get(Protocol::Udp).is_empty());
    let best = ranking.best(Protocol::Tcp).unwrap();
    assert_eq!(best.endpoint, "10.0.0.1:443".parse::<SocketAddr>().unwrap());
    assert!(
        best.latency >= Duration::from_millis(15) && best.latency < Duration::from_millis(100),
        "latency {:?}",
        best.latency
    );
}

#[tokio::test]
async fn silent_udp_peer_is_not_reported() {
    let silent = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let echo = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let silent_port = silent.local_addr().unwrap().port();
    let echo_port = echo.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((len, peer)) = echo.recv_from(&mut buf).await {
            let _ = echo.send_to(&buf[..len], peer).await;
        }
    });

    let settings = ScanSettings::new(Timeouts::uniform(Duration::from_millis(300)), 4).unwrap();
    let results = Scanner::new(settings)
        .run(vec![
            Candidate::new(LOCALHOST, silent_port, Protocol::Udp),
            Candidate::new(LOCALHOST, echo_port, Protocol::Udp),
        ])
        .await;

    let udp = results.get(Protocol::Udp);
    assert_eq!(udp.len(), 1);
    assert_eq!(udp[0].candidate().port(), echo_port);
    drop(silent);
}

#[tokio::test]
async fn seed_address_is_generated_probed_and_ranked() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let open_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let mut generator = CandidateGenerator::with_seed(
        GeneratorConfig {
            ranges: vec![],
            default_samples: 25,
            seeds: vec![LOCALHOST],
            tcp_ports: vec![open_port],
            udp_ports: vec![],
            order: ScanOrder::Random,
        },
        7,
    )
    .unwrap();
    let candidates = generator.generate();
    assert_eq!(candidates.len(), 1);

    let settings = ScanSettings::new(Timeouts::uniform(Duration::from_secs(1)), 8).unwrap();
    let results = Scanner::new(settings).run(candidates.clone()).await;
    let ranking = Ranking::rank(&results);

    let best = ranking.best(Protocol::Tcp).unwrap();
    assert_eq!(best.endpoint, SocketAddr::new(LOCALHOST, open_port));
    assert!(results.unresolved(&candidates).is_empty());
}
