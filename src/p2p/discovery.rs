//! Peer discovery and reconnection loop.
//!
//! A flat advertise → scan → filter → dial → sleep cycle under a fixed
//! rendezvous namespace shared by every node of the application (distinct
//! from any chat room topic). Peers that fail to dial go on a cooldown list
//! so the loop does not hot-loop against consistently unreachable peers
//! (e.g. behind symmetric NAT) without permanently blacklisting them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::p2p::network::{MeshHost, PeerCandidate};

/// Rendezvous namespace all meshtalk nodes advertise under.
pub const MESH_NAMESPACE: &str = "--meshtalk-namespace--";

const SCAN_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_DIAL_COOLDOWN: Duration = Duration::from_secs(20 * 60);
const BOOTSTRAP_DIAL_COOLDOWN: Duration = Duration::from_secs(60);

/// Tuning knobs for the discovery loop. The cooldown differs by node role,
/// so it is a parameter rather than a constant.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub namespace: String,
    pub dial_cooldown: Duration,
    pub scan_interval: Duration,
}

impl DiscoveryConfig {
    /// Defaults for a mesh client node.
    pub fn client() -> Self {
        Self {
            namespace: MESH_NAMESPACE.to_string(),
            dial_cooldown: CLIENT_DIAL_COOLDOWN,
            scan_interval: SCAN_INTERVAL,
        }
    }

    /// Defaults for a bootstrap node, which retries dead peers sooner.
    pub fn bootstrap() -> Self {
        Self {
            dial_cooldown: BOOTSTRAP_DIAL_COOLDOWN,
            ..Self::client()
        }
    }
}

/// Peers that recently failed to dial, mapped to the earliest retry time.
/// Owned and mutated only by the discovery task; stale entries are harmless
/// because the timestamp check makes them a no-op once past.
#[derive(Debug, Default)]
pub struct DeadPeerList {
    entries: HashMap<PeerId, Instant>,
}

impl DeadPeerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the peer is still inside its cooldown window at `now`.
    pub fn is_cooling(&self, peer: &PeerId, now: Instant) -> bool {
        self.entries.get(peer).is_some_and(|retry_at| now < *retry_at)
    }

    pub fn record_failure(&mut self, peer: PeerId, now: Instant, cooldown: Duration) {
        self.entries.insert(peer, now + cooldown);
    }

    pub fn record_success(&mut self, peer: &PeerId) {
        self.entries.remove(peer);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Candidate filter applied before the (async) connectedness check: skip
/// ourselves, peers with no advertised addresses, and peers in cooldown.
pub fn eligible(
    candidate: &PeerCandidate,
    local_peer: &PeerId,
    dead: &DeadPeerList,
    now: Instant,
) -> bool {
    if candidate.peer_id == *local_peer {
        return false;
    }
    if candidate.addrs.is_empty() {
        return false;
    }
    !dead.is_cooling(&candidate.peer_id, now)
}

/// Splits a configured bootstrap address into its peer id and dial address.
/// The trailing `/p2p/<peer-id>` component is required; the dial address is
/// the multiaddr with that component stripped.
pub fn parse_bootstrap_address(address: &str) -> Result<PeerCandidate, MeshError> {
    let full: Multiaddr = address
        .parse()
        .map_err(|e| MeshError::Address(format!("{address}: {e}")))?;

    let mut dial_addr = Multiaddr::empty();
    let mut peer_id = None;
    for protocol in full.iter() {
        match protocol {
            Protocol::P2p(id) => peer_id = Some(id),
            other => dial_addr.push(other),
        }
    }

    let peer_id = peer_id
        .ok_or_else(|| MeshError::Address(format!("{address}: missing /p2p/<peer-id> suffix")))?;
    Ok(PeerCandidate {
        peer_id,
        addrs: vec![dial_addr],
    })
}

/// One-shot pass over the user-curated bootstrap list, before the periodic
/// cycle starts. Unparseable addresses and failed dials are logged per entry
/// and never abort the batch.
pub async fn connect_static_bootstraps(host: &MeshHost, addresses: &[String]) {
    if addresses.is_empty() {
        debug!("no configured bootstrap addresses");
        return;
    }
    info!("dialing {} configured bootstrap address(es)", addresses.len());
    for address in addresses {
        let candidate = match parse_bootstrap_address(address) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("skipping bootstrap address: {e}");
                continue;
            }
        };
        if candidate.peer_id == host.peer_id() {
            continue;
        }
        match host.dial(candidate.peer_id, candidate.addrs).await {
            Ok(()) => info!("connected to bootstrap {address}"),
            Err(e) => warn!("failed to connect to bootstrap {address}: {e}"),
        }
    }
}

/// The periodic discovery cycle. Runs until the cancellation token fires;
/// every long await sits inside a `select!` so cancellation is observed
/// within one iteration.
pub async fn run(host: Arc<MeshHost>, config: DiscoveryConfig, cancel: CancellationToken) {
    let local_peer = host.peer_id();
    let mut dead = DeadPeerList::new();

    loop {
        let advertised = tokio::select! {
            _ = cancel.cancelled() => break,
            result = host.advertise(&config.namespace) => result,
        };
        match advertised {
            Ok(()) | Err(MeshError::EmptyRoutingTable) => {}
            Err(e) => warn!("error advertising under {}: {e}", config.namespace),
        }

        let candidates = tokio::select! {
            _ = cancel.cancelled() => break,
            result = host.find_peers(&config.namespace) => result,
        };
        let candidates = match candidates {
            Ok(candidates) => candidates,
            Err(MeshError::EmptyRoutingTable) => Vec::new(),
            Err(e) => {
                warn!("error finding peers under {}: {e}", config.namespace);
                Vec::new()
            }
        };

        for candidate in candidates {
            if cancel.is_cancelled() {
                return;
            }
            if !eligible(&candidate, &local_peer, &dead, Instant::now()) {
                continue;
            }
            if host.is_connected(candidate.peer_id).await {
                continue;
            }

            info!("connecting to discovered peer {}", candidate.peer_id);
            let dialed = tokio::select! {
                _ = cancel.cancelled() => return,
                result = host.dial(candidate.peer_id, candidate.addrs.clone()) => result,
            };
            match dialed {
                // Success is reported by the connection notifier.
                Ok(()) => dead.record_success(&candidate.peer_id),
                Err(e) => {
                    warn!("failed to connect to peer {}: {e}", candidate.peer_id);
                    dead.record_failure(candidate.peer_id, Instant::now(), config.dial_cooldown);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.scan_interval) => {}
        }
    }
    debug!("discovery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(peer_id: PeerId, with_addr: bool) -> PeerCandidate {
        let addrs = if with_addr {
            vec!["/ip4/10.0.0.1/tcp/4001".parse().unwrap()]
        } else {
            Vec::new()
        };
        PeerCandidate { peer_id, addrs }
    }

    #[test]
    fn own_peer_id_is_never_eligible() {
        let local = PeerId::random();
        let dead = DeadPeerList::new();
        assert!(!eligible(&candidate(local, true), &local, &dead, Instant::now()));
    }

    #[test]
    fn candidate_without_addresses_is_skipped() {
        let local = PeerId::random();
        let dead = DeadPeerList::new();
        let other = candidate(PeerId::random(), false);
        assert!(!eligible(&other, &local, &dead, Instant::now()));
    }

    #[test]
    fn fresh_candidate_is_eligible() {
        let local = PeerId::random();
        let dead = DeadPeerList::new();
        let other = candidate(PeerId::random(), true);
        assert!(eligible(&other, &local, &dead, Instant::now()));
    }

    #[test]
    fn cooldown_blocks_until_expiry() {
        let local = PeerId::random();
        let other = candidate(PeerId::random(), true);
        let cooldown = Duration::from_secs(60);
        let t0 = Instant::now();

        let mut dead = DeadPeerList::new();
        dead.record_failure(other.peer_id, t0, cooldown);

        // Inside the window: skipped. At and after expiry: eligible again.
        assert!(!eligible(&other, &local, &dead, t0 + Duration::from_secs(30)));
        assert!(eligible(&other, &local, &dead, t0 + cooldown));
        assert!(eligible(&other, &local, &dead, t0 + cooldown + Duration::from_secs(1)));
    }

    #[test]
    fn successful_dial_clears_the_cooldown() {
        let peer = PeerId::random();
        let mut dead = DeadPeerList::new();
        dead.record_failure(peer, Instant::now(), Duration::from_secs(600));
        assert!(dead.is_cooling(&peer, Instant::now()));
        dead.record_success(&peer);
        assert!(!dead.is_cooling(&peer, Instant::now()));
        assert!(dead.is_empty());
    }

    #[test]
    fn repeated_failure_refreshes_the_retry_time() {
        let peer = PeerId::random();
        let cooldown = Duration::from_secs(60);
        let t0 = Instant::now();
        let mut dead = DeadPeerList::new();
        dead.record_failure(peer, t0, cooldown);
        dead.record_failure(peer, t0 + Duration::from_secs(50), cooldown);
        assert_eq!(dead.len(), 1);
        // Still cooling past the first window because the second failure
        // pushed the retry time out.
        assert!(dead.is_cooling(&peer, t0 + Duration::from_secs(70)));
    }

    #[test]
    fn parse_bootstrap_address_splits_peer_id() {
        let peer = PeerId::random();
        let address = format!("/ip4/1.2.3.4/tcp/4001/p2p/{peer}");
        let candidate = parse_bootstrap_address(&address).unwrap();
        assert_eq!(candidate.peer_id, peer);
        assert_eq!(candidate.addrs, vec!["/ip4/1.2.3.4/tcp/4001".parse::<Multiaddr>().unwrap()]);
    }

    #[test]
    fn parse_bootstrap_address_rejects_missing_peer_id() {
        assert!(matches!(
            parse_bootstrap_address("/ip4/1.2.3.4/tcp/4001"),
            Err(MeshError::Address(_))
        ));
    }

    #[test]
    fn parse_bootstrap_address_rejects_garbage() {
        assert!(matches!(
            parse_bootstrap_address("not a multiaddr"),
            Err(MeshError::Address(_))
        ));
    }

    #[test]
    fn client_and_bootstrap_cooldowns_differ_by_role() {
        assert_eq!(DiscoveryConfig::client().dial_cooldown, Duration::from_secs(1200));
        assert_eq!(DiscoveryConfig::bootstrap().dial_cooldown, Duration::from_secs(60));
        assert_eq!(
            DiscoveryConfig::client().scan_interval,
            DiscoveryConfig::bootstrap().scan_interval
        );
    }
}
