//! libp2p host wiring.
//!
//! The swarm runs in a dedicated background task driven by a command channel
//! and reports back over an event channel, so the rest of the node never
//! touches libp2p types beyond `PeerId` and `Multiaddr`. Dial outcomes are
//! correlated through a pending-dial map and DHT queries through a
//! pending-query map keyed by `QueryId`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use libp2p::core::upgrade;
use libp2p::futures::StreamExt;
use libp2p::gossipsub::{
    self, Behaviour as Gossipsub, ConfigBuilder as GossipsubConfigBuilder, IdentTopic,
    MessageAuthenticity, ValidationMode,
};
use libp2p::kad::{self, store::MemoryStore, QueryId, QueryResult, RecordKey};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{Config as SwarmConfig, DialError, NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::{dns, identify, identity, noise, ping, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Transport};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::identity::NodeIdentity;

const IDENTIFY_PROTOCOL: &str = "/meshtalk/id/1.0.0";
const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/meshtalk/kad/1.0.0");

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub listen_port: u16,
    /// Chat room topic to join, or `None` for a bootstrap-only node.
    pub chat_topic: Option<String>,
    /// Bootstrap nodes run the DHT in server mode; clients let it negotiate.
    pub kad_server: bool,
}

/// A peer discovered under the rendezvous namespace, with whatever addresses
/// the DHT and identify exchanges have produced for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCandidate {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

/// Events surfaced to the node's event loop.
#[derive(Debug)]
pub enum HostEvent {
    /// A payload received from the room topic.
    Message { source: PeerId, data: Vec<u8> },
    PeerConnected { peer: PeerId, addr: Multiaddr },
    PeerDisconnected { peer: PeerId, addr: Multiaddr },
}

enum HostCommand {
    Publish(Vec<u8>),
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Advertise {
        namespace: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    FindPeers {
        namespace: String,
        reply: oneshot::Sender<Result<Vec<PeerCandidate>, MeshError>>,
    },
    Connectedness {
        peer: PeerId,
        reply: oneshot::Sender<bool>,
    },
    ListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    Shutdown,
}

/// Handle to the running host. Cloneable command side; single-consumer event
/// side behind a lock, as only the node's event loop drains it.
pub struct MeshHost {
    peer_id: PeerId,
    command_tx: mpsc::Sender<HostCommand>,
    event_rx: Mutex<mpsc::Receiver<HostEvent>>,
}

impl MeshHost {
    /// Builds the transport stack and behaviours, starts listening, and
    /// spawns the swarm task. A listen failure here is fatal to startup.
    pub async fn spawn(config: HostConfig, node_identity: &NodeIdentity) -> Result<Self, MeshError> {
        let keypair = node_identity.keypair().clone();
        let peer_id = node_identity.peer_id();

        // The system resolver wraps TCP so /dns*/ bootstrap addresses dial.
        let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
        let transport = dns::tokio::Transport::system(tcp_transport)
            .map_err(|e| MeshError::Network(format!("dns resolver setup: {e}")))?
            .upgrade(upgrade::Version::V1)
            .authenticate(
                noise::Config::new(&keypair)
                    .map_err(|e| MeshError::Network(format!("noise handshake setup: {e}")))?,
            )
            .multiplex(yamux::Config::default())
            .boxed();

        let gossipsub = build_gossipsub(&keypair)?;

        let mut kad_config = kad::Config::new(KAD_PROTOCOL);
        kad_config.set_provider_publication_interval(None);
        let mut kademlia = kad::Behaviour::with_config(
            peer_id,
            MemoryStore::new(peer_id),
            kad_config,
        );
        if config.kad_server {
            kademlia.set_mode(Some(kad::Mode::Server));
        }

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.into(),
            keypair.public(),
        ));

        let behaviour = MeshBehaviour {
            gossipsub,
            kademlia,
            identify,
            ping: ping::Behaviour::default(),
        };

        let swarm_config = SwarmConfig::with_tokio_executor()
            .with_idle_connection_timeout(Duration::from_secs(60));
        let mut swarm = Swarm::new(transport, behaviour, peer_id, swarm_config);

        let topic = match &config.chat_topic {
            Some(name) => {
                let topic = IdentTopic::new(name.clone());
                swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&topic)
                    .map_err(|e| MeshError::Network(format!("topic subscribe: {e}")))?;
                Some(topic)
            }
            None => None,
        };

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
            .parse()
            .map_err(|e| MeshError::Address(format!("listen address: {e}")))?;
        Swarm::listen_on(&mut swarm, listen_addr)
            .map_err(|e| MeshError::Network(format!("failed to bind listen port: {e}")))?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(128);

        tokio::spawn(run_swarm(swarm, topic, command_rx, event_tx));

        Ok(Self {
            peer_id,
            command_tx,
            event_rx: Mutex::new(event_rx),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Publishes raw bytes to the joined room topic.
    pub async fn publish(&self, data: Vec<u8>) -> Result<(), MeshError> {
        self.command_tx
            .send(HostCommand::Publish(data))
            .await
            .map_err(|_| MeshError::Network("host task gone".into()))
    }

    /// Dials a peer and waits for the outcome of the attempt.
    pub async fn dial(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<(), MeshError> {
        let (reply, result) = oneshot::channel();
        self.command_tx
            .send(HostCommand::Dial { peer, addrs, reply })
            .await
            .map_err(|_| MeshError::Network("host task gone".into()))?;
        result
            .await
            .map_err(|_| MeshError::Network("dial dropped".into()))?
            .map_err(MeshError::Network)
    }

    /// Advertises this node as a provider under the rendezvous namespace.
    pub async fn advertise(&self, namespace: &str) -> Result<(), MeshError> {
        let (reply, result) = oneshot::channel();
        self.command_tx
            .send(HostCommand::Advertise {
                namespace: namespace.to_string(),
                reply,
            })
            .await
            .map_err(|_| MeshError::Network("host task gone".into()))?;
        result.await.map_err(|_| MeshError::Network("advertise dropped".into()))?
    }

    /// Looks up peers advertising under the rendezvous namespace.
    pub async fn find_peers(&self, namespace: &str) -> Result<Vec<PeerCandidate>, MeshError> {
        let (reply, result) = oneshot::channel();
        self.command_tx
            .send(HostCommand::FindPeers {
                namespace: namespace.to_string(),
                reply,
            })
            .await
            .map_err(|_| MeshError::Network("host task gone".into()))?;
        result.await.map_err(|_| MeshError::Network("lookup dropped".into()))?
    }

    pub async fn is_connected(&self, peer: PeerId) -> bool {
        let (reply, result) = oneshot::channel();
        if self
            .command_tx
            .send(HostCommand::Connectedness { peer, reply })
            .await
            .is_err()
        {
            return false;
        }
        result.await.unwrap_or(false)
    }

    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        let (reply, result) = oneshot::channel();
        if self
            .command_tx
            .send(HostCommand::ListenAddrs { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        result.await.unwrap_or_default()
    }

    pub async fn next_event(&self) -> Option<HostEvent> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(HostCommand::Shutdown).await;
    }
}

#[derive(NetworkBehaviour)]
struct MeshBehaviour {
    gossipsub: Gossipsub,
    kademlia: kad::Behaviour<MemoryStore>,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

fn build_gossipsub(keypair: &identity::Keypair) -> Result<Gossipsub, MeshError> {
    let config = GossipsubConfigBuilder::default()
        .validation_mode(ValidationMode::Strict)
        .heartbeat_interval(Duration::from_secs(1))
        .build()
        .map_err(|e| MeshError::Network(format!("gossipsub config: {e}")))?;
    Gossipsub::new(MessageAuthenticity::Signed(keypair.clone()), config)
        .map_err(|e| MeshError::Network(format!("gossipsub init: {e}")))
}

/// In-flight provider lookup, accumulating providers until the query ends.
struct ProviderLookup {
    found: HashSet<PeerId>,
    reply: oneshot::Sender<Result<Vec<PeerCandidate>, MeshError>>,
}

struct SwarmTask {
    swarm: Swarm<MeshBehaviour>,
    topic: Option<IdentTopic>,
    event_tx: mpsc::Sender<HostEvent>,
    pending_dials: HashMap<PeerId, oneshot::Sender<Result<(), String>>>,
    pending_advertises: HashMap<QueryId, oneshot::Sender<Result<(), MeshError>>>,
    pending_lookups: HashMap<QueryId, ProviderLookup>,
    /// Addresses learned from identify exchanges and DHT routing updates,
    /// used to flesh out `PeerCandidate`s.
    addr_book: HashMap<PeerId, Vec<Multiaddr>>,
}

async fn run_swarm(
    swarm: Swarm<MeshBehaviour>,
    topic: Option<IdentTopic>,
    mut command_rx: mpsc::Receiver<HostCommand>,
    event_tx: mpsc::Sender<HostEvent>,
) {
    let mut task = SwarmTask {
        swarm,
        topic,
        event_tx,
        pending_dials: HashMap::new(),
        pending_advertises: HashMap::new(),
        pending_lookups: HashMap::new(),
        addr_book: HashMap::new(),
    };

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(command) => task.handle_command(command),
                }
            }
            event = task.swarm.select_next_some() => {
                task.handle_swarm_event(event).await;
            }
        }
    }
    debug!("swarm task stopped");
}

impl SwarmTask {
    fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Publish(data) => {
                let Some(topic) = &self.topic else {
                    warn!("publish on a node without a joined topic");
                    return;
                };
                if let Err(e) = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic.clone(), data)
                {
                    // Duplicate and InsufficientPeers are routine in a small
                    // mesh that is still forming.
                    debug!("publish failed: {e}");
                }
            }
            HostCommand::Dial { peer, addrs, reply } => self.start_dial(peer, addrs, reply),
            HostCommand::Advertise { namespace, reply } => {
                if self.routing_table_is_empty() {
                    let _ = reply.send(Err(MeshError::EmptyRoutingTable));
                    return;
                }
                match self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .start_providing(RecordKey::new(&namespace))
                {
                    Ok(query_id) => {
                        self.pending_advertises.insert(query_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(MeshError::Network(format!("advertise: {e}"))));
                    }
                }
            }
            HostCommand::FindPeers { namespace, reply } => {
                if self.routing_table_is_empty() {
                    let _ = reply.send(Err(MeshError::EmptyRoutingTable));
                    return;
                }
                let query_id = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .get_providers(RecordKey::new(&namespace));
                self.pending_lookups.insert(
                    query_id,
                    ProviderLookup {
                        found: HashSet::new(),
                        reply,
                    },
                );
            }
            HostCommand::Connectedness { peer, reply } => {
                let _ = reply.send(self.swarm.is_connected(&peer));
            }
            HostCommand::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
            HostCommand::Shutdown => unreachable!("handled by the select loop"),
        }
    }

    fn start_dial(
        &mut self,
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<(), String>>,
    ) {
        for addr in &addrs {
            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer, addr.clone());
        }
        let opts = DialOpts::peer_id(peer).addresses(addrs).build();
        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(peer, reply);
            }
            // Already connected or a dial is in flight; not a failure.
            Err(DialError::DialPeerConditionFalse(_)) => {
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(e.to_string()));
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<MeshBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("listening on {address}");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                let addr = endpoint.get_remote_address().clone();
                self.remember_addr(peer_id, addr.clone());
                if let Some(reply) = self.pending_dials.remove(&peer_id) {
                    let _ = reply.send(Ok(()));
                }
                let _ = self
                    .event_tx
                    .send(HostEvent::PeerConnected { peer: peer_id, addr })
                    .await;
            }
            SwarmEvent::ConnectionClosed {
                peer_id, endpoint, ..
            } => {
                let addr = endpoint.get_remote_address().clone();
                let _ = self
                    .event_tx
                    .send(HostEvent::PeerDisconnected { peer: peer_id, addr })
                    .await;
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(peer) = peer_id {
                    if let Some(reply) = self.pending_dials.remove(&peer) {
                        let _ = reply.send(Err(error.to_string()));
                    }
                }
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event).await,
            _ => {}
        }
    }

    async fn handle_behaviour_event(&mut self, event: MeshBehaviourEvent) {
        match event {
            MeshBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            }) => {
                let _ = self
                    .event_tx
                    .send(HostEvent::Message {
                        source: propagation_source,
                        data: message.data,
                    })
                    .await;
            }
            MeshBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic }) => {
                debug!("peer {peer_id} subscribed to {topic}");
            }
            MeshBehaviourEvent::Gossipsub(_) => {}
            MeshBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                // Feed identify results into the DHT so lookups can resolve
                // addresses for discovered peers.
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                    self.remember_addr(peer_id, addr);
                }
            }
            MeshBehaviourEvent::Identify(_) => {}
            MeshBehaviourEvent::Kademlia(kad::Event::RoutingUpdated {
                peer, addresses, ..
            }) => {
                for addr in addresses.iter() {
                    self.remember_addr(peer, addr.clone());
                }
            }
            MeshBehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id, result, ..
            }) => self.handle_query_result(id, result),
            MeshBehaviourEvent::Kademlia(_) => {}
            MeshBehaviourEvent::Ping(_) => {}
        }
    }

    fn handle_query_result(&mut self, id: QueryId, result: QueryResult) {
        match result {
            QueryResult::StartProviding(outcome) => {
                if let Some(reply) = self.pending_advertises.remove(&id) {
                    let _ = reply.send(
                        outcome
                            .map(|_| ())
                            .map_err(|e| MeshError::Network(format!("advertise: {e}"))),
                    );
                }
            }
            QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                providers, ..
            })) => {
                if let Some(lookup) = self.pending_lookups.get_mut(&id) {
                    lookup.found.extend(providers);
                }
            }
            QueryResult::GetProviders(Ok(
                kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. },
            )) => {
                if let Some(lookup) = self.pending_lookups.remove(&id) {
                    let candidates = lookup
                        .found
                        .into_iter()
                        .map(|peer_id| PeerCandidate {
                            addrs: self.addr_book.get(&peer_id).cloned().unwrap_or_default(),
                            peer_id,
                        })
                        .collect();
                    let _ = lookup.reply.send(Ok(candidates));
                }
            }
            QueryResult::GetProviders(Err(e)) => {
                if let Some(lookup) = self.pending_lookups.remove(&id) {
                    let _ = lookup
                        .reply
                        .send(Err(MeshError::Network(format!("peer lookup: {e}"))));
                }
            }
            _ => {}
        }
    }

    fn routing_table_is_empty(&mut self) -> bool {
        self.swarm
            .behaviour_mut()
            .kademlia
            .kbuckets()
            .map(|bucket| bucket.num_entries())
            .sum::<usize>()
            == 0
    }

    fn remember_addr(&mut self, peer: PeerId, addr: Multiaddr) {
        let addrs = self.addr_book.entry(peer).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
}
