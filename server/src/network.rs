//! Server network layer handling UDP communications and tick coordination

use crate::client_manager::ClientManager;
use crate::dispatcher::{Dispatcher, InboundFrame, SenderContext, TickReport};
use crate::error::ServerError;
use crate::utils::TickClock;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Largest datagram the receiver accepts
const RECV_BUFFER_BYTES: usize = 2048;

/// Dispatch statistics are logged once per this many ticks
const STATS_INTERVAL_TICKS: u64 = 300;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived {
        bytes: Vec<u8>,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
        net_ids: Vec<u32>,
    },
    Shutdown,
}

/// Messages sent from the tick loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    BroadcastFrame {
        bytes: Vec<u8>,
        exclude: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub tick_duration: Duration,
    pub max_clients: usize,
    /// Silence after which a peer is dropped and its tank leaves
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(33),
            max_clients: 32,
            client_timeout: Duration::from_secs(5),
        }
    }
}

/// Main server coordinating networking and entity synchronization
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    dispatcher: Dispatcher,
    clock: TickClock,
    config: ServerConfig,
    tick: u64,

    // Frames received since the last tick
    pending: Vec<InboundFrame>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
    out_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        dispatcher: Dispatcher,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            dispatcher,
            clock: TickClock::start(),
            config,
            tick: 0,
            pending: Vec::new(),
            server_tx,
            server_rx,
            out_tx,
            out_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Channel into the main loop, e.g. for requesting shutdown
    pub fn message_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_BYTES];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let bytes = buffer[..len].to_vec();
                        if let Err(e) = server_tx.send(ServerMessage::FrameReceived { bytes, addr })
                        {
                            error!("Failed to send frame to main loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing frame queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    OutboundMessage::BroadcastFrame { bytes, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = socket.send_to(&bytes, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client in timed_out {
                    let message = ServerMessage::ClientTimeout {
                        client_id: client.id,
                        net_ids: client.net_ids,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn queue(&self, message: OutboundMessage) {
        if let Err(e) = self.out_tx.send(message) {
            error!("Failed to queue outbound frame: {}", e);
        }
    }

    /// Admits the sender and queues its frame for the next tick
    async fn handle_frame(&mut self, bytes: Vec<u8>, addr: SocketAddr) {
        let sender = {
            let mut clients = self.clients.write().await;
            if clients.admit(addr).is_none() {
                warn!("Ignoring frame from {}: server full", addr);
                return;
            }
            SenderContext {
                addr,
                net_id: clients.net_id_for(addr),
            }
        };

        self.pending.push(InboundFrame { bytes, sender });
    }

    /// Releases the tanks of a timed-out client, except those another live
    /// client still reports
    async fn handle_timeout(&mut self, client_id: u32, net_ids: Vec<u32>) {
        info!("Client {} timed out", client_id);

        let orphaned: Vec<u32> = {
            let clients = self.clients.read().await;
            net_ids
                .into_iter()
                .filter(|net_id| clients.find_client_by_net_id(*net_id).is_none())
                .collect()
        };

        for net_id in orphaned {
            self.dispatcher.entity_left(net_id);
        }
    }

    /// Associates each reporting connection with the tanks it reported
    async fn record_sightings(&mut self, report: &TickReport) {
        let mut clients = self.clients.write().await;
        for &(addr, net_id) in &report.sightings {
            clients.associate_net_id(addr, net_id);
        }
    }

    /// Relays the reconciled state of every tank updated this tick to every
    /// peer except the one reporting it
    async fn broadcast_updates(&mut self, report: &TickReport) {
        let mut net_ids: Vec<u32> = Vec::with_capacity(report.sightings.len());
        for &(_, net_id) in &report.sightings {
            if !net_ids.contains(&net_id) {
                net_ids.push(net_id);
            }
        }

        if net_ids.is_empty() {
            return;
        }

        let timestamp = self.clock.now();
        let frames = self.dispatcher.encode_entities(&net_ids, timestamp);

        let owners: Vec<Option<u32>> = {
            let clients = self.clients.read().await;
            frames
                .iter()
                .map(|(net_id, _)| clients.find_client_by_net_id(*net_id))
                .collect()
        };

        for ((_, bytes), exclude) in frames.into_iter().zip(owners) {
            self.queue(OutboundMessage::BroadcastFrame { bytes, exclude });
        }
    }

    async fn run_tick(&mut self) {
        self.tick += 1;

        let frames = std::mem::take(&mut self.pending);
        if !frames.is_empty() {
            let report = self.dispatcher.process_tick(frames);
            if report.dropped > 0 {
                debug!(
                    "Tick {}: applied {}, replayed {}, dropped {}",
                    self.tick, report.applied, report.replayed, report.dropped
                );
            }

            self.record_sightings(&report).await;
            self.broadcast_updates(&report).await;
        }

        // Periodic monitoring
        if self.tick % STATS_INTERVAL_TICKS == 0 {
            let client_count = {
                let clients = self.clients.read().await;
                clients.len()
            };
            let stats = self.dispatcher.stats();

            if client_count > 0 {
                debug!(
                    "Tick {}: {} clients, {} entities, {} frames ({} replayed, {} dropped)",
                    self.tick,
                    client_count,
                    self.dispatcher.store().len(),
                    stats.frames,
                    stats.replayed,
                    stats.dropped
                );
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.config.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::FrameReceived { bytes, addr }) => {
                            self.handle_frame(bytes, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id, net_ids }) => {
                            self.handle_timeout(client_id, net_ids).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    self.run_tick().await;
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::tank_state::{encode_tank_state, peek_net_id};
    use shared::{
        TankState, TankStatePacket, UnitConfig, UnitSchemaRegistry, Vec3, Vitals,
        OPCODE_KEEP_ALIVE,
    };
    use std::net::{IpAddr, Ipv4Addr};

    fn schemas() -> Arc<UnitSchemaRegistry> {
        Arc::new(
            UnitSchemaRegistry::from_configs([
                UnitConfig::new(0, false, false),
                UnitConfig::new(7, true, false),
            ])
            .unwrap(),
        )
    }

    fn tank_frame(net_id: u32) -> Vec<u8> {
        let mut state = TankState::new(net_id, 7);
        state.position = Vec3::new(1.0, 2.0, 3.0);
        state.vitals = Some(Vitals {
            weapon_id: 3,
            health_mult: 100,
            energy_mult: 200,
            firing_mask: Some(1),
            extra_a: None,
            extra_b: None,
        });
        encode_tank_state(&TankStatePacket { timestamp: 1, state }, &schemas()).unwrap()
    }

    async fn test_server() -> Server {
        let config = ServerConfig {
            tick_duration: Duration::from_millis(10),
            max_clients: 2,
            client_timeout: Duration::from_secs(5),
        };
        tokio_test::assert_ok!(Server::new("127.0.0.1:0", Dispatcher::new(schemas()), config).await)
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn test_server_message_creation() {
        let addr = peer(8080);
        let msg = ServerMessage::FrameReceived {
            bytes: vec![OPCODE_KEEP_ALIVE],
            addr,
        };

        match msg {
            ServerMessage::FrameReceived { bytes, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(bytes, vec![0x40]);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

        let msg = OutboundMessage::BroadcastFrame {
            bytes: vec![0x18, 0, 0, 0, 0],
            exclude: Some(5),
        };
        assert!(tx.send(msg).is_ok());

        match rx.try_recv().unwrap() {
            OutboundMessage::BroadcastFrame { bytes, exclude } => {
                assert_eq!(exclude, Some(5));
                assert_eq!(bytes[0], 0x18);
            }
        }
    }

    #[tokio::test]
    async fn test_frames_wait_for_tick() {
        let mut server = test_server().await;

        server.handle_frame(tank_frame(42), peer(9001)).await;
        assert!(server.dispatcher().store().is_empty());
        assert_eq!(server.clients.read().await.len(), 1);

        server.run_tick().await;
        assert!(server.dispatcher().store().contains(42));
        assert_eq!(server.clients.read().await.net_id_for(peer(9001)), Some(42));
    }

    #[tokio::test]
    async fn test_tick_broadcasts_to_other_peers() {
        let mut server = test_server().await;

        server.handle_frame(vec![OPCODE_KEEP_ALIVE], peer(9002)).await;
        server.handle_frame(tank_frame(42), peer(9001)).await;
        server.run_tick().await;

        let owner = server.clients.read().await.find_client_by_addr(peer(9001));
        match server.out_rx.try_recv().unwrap() {
            OutboundMessage::BroadcastFrame { bytes, exclude } => {
                assert_eq!(exclude, owner);
                assert_eq!(bytes, tank_frame_with_clock(&bytes));
            }
        }
        assert!(server.out_rx.try_recv().is_err());
    }

    // The relayed frame differs from the inbound one only in its timestamp
    fn tank_frame_with_clock(relayed: &[u8]) -> Vec<u8> {
        let mut expected = tank_frame(42);
        expected[1..5].copy_from_slice(&relayed[1..5]);
        expected
    }

    #[tokio::test]
    async fn test_server_full_drops_frames() {
        let mut server = test_server().await;

        server.handle_frame(vec![OPCODE_KEEP_ALIVE], peer(9001)).await;
        server.handle_frame(vec![OPCODE_KEEP_ALIVE], peer(9002)).await;
        server.handle_frame(tank_frame(42), peer(9003)).await;
        assert_eq!(server.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_releases_entity() {
        let mut server = test_server().await;

        server.handle_frame(tank_frame(42), peer(9001)).await;
        server.run_tick().await;
        assert!(server.dispatcher().store().contains(42));

        let client = server.clients.write().await.remove_client(&1).unwrap();
        server.handle_timeout(client.id, client.net_ids).await;
        assert!(!server.dispatcher().store().contains(42));
    }

    #[tokio::test]
    async fn test_timeout_keeps_tank_reported_by_live_peer() {
        let mut server = test_server().await;

        server.handle_frame(tank_frame(42), peer(9001)).await;
        server.handle_frame(tank_frame(42), peer(9002)).await;
        server.run_tick().await;

        let stale = server.clients.read().await.find_client_by_addr(peer(9001)).unwrap();
        let client = server.clients.write().await.remove_client(&stale).unwrap();
        assert_eq!(client.net_ids, vec![42]);

        server.handle_timeout(client.id, client.net_ids).await;
        assert!(server.dispatcher().store().contains(42));
        assert!(server.clients.read().await.find_client_by_net_id(42).is_some());
    }

    #[tokio::test]
    async fn test_peer_reporting_two_tanks_keeps_both() {
        let mut server = test_server().await;

        server.handle_frame(vec![OPCODE_KEEP_ALIVE], peer(9002)).await;
        server.handle_frame(tank_frame(42), peer(9001)).await;
        server.handle_frame(tank_frame(43), peer(9001)).await;
        server.run_tick().await;

        assert!(server.dispatcher().store().contains(42));
        assert!(server.dispatcher().store().contains(43));

        let owner = server.clients.read().await.find_client_by_addr(peer(9001));
        let mut relayed = Vec::new();
        while let Ok(OutboundMessage::BroadcastFrame { bytes, exclude }) = server.out_rx.try_recv()
        {
            assert_eq!(exclude, owner);
            relayed.push(peek_net_id(&bytes).unwrap());
        }
        assert_eq!(relayed, vec![42, 43]);

        // Both stay on the next tick, decoded without a connection hint
        server.handle_frame(tank_frame(42), peer(9001)).await;
        server.handle_frame(tank_frame(43), peer(9001)).await;
        server.run_tick().await;
        assert_eq!(server.dispatcher().store().len(), 2);
        assert_eq!(server.dispatcher().stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_tick() {
        let mut server = test_server().await;

        server.handle_frame(vec![0x99, 1, 2], peer(9001)).await;
        server.handle_frame(tank_frame(42), peer(9002)).await;
        server.run_tick().await;

        assert!(server.dispatcher().store().contains(42));
        assert_eq!(server.dispatcher().stats().dropped, 1);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.tick_duration.as_millis() > 0);
        assert!(config.max_clients > 0);
        assert_eq!(config.client_timeout, Duration::from_secs(5));
    }
}
