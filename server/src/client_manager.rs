//! Connection tracking for the UDP server
//!
//! This module handles the server-side bookkeeping of peers, including:
//! - Admission with a capacity limit and id assignment
//! - The association between a connection and the tanks it reports
//! - Liveness tracking, so silent peers can be turned into "entity left"
//!   signals for the entity store
//!
//! The association is what lets the dispatcher hint a frame's unit type before
//! the frame has been decoded.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any frame from this client
    pub last_seen: Instant,
    /// Net ids of the tanks this client has reported, in first-seen order
    pub net_ids: Vec<u32>,
    /// Frames received over this connection
    pub frames_received: u64,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            net_ids: Vec::new(),
            frames_received: 0,
        }
    }

    /// Records activity on this connection
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.frames_received += 1;
    }

    /// Returns true if nothing has been received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected peers
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit.
    /// Client IDs start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Returns the client for `addr`, admitting it if it is new and there is
    /// room. The client's activity is refreshed either way.
    pub fn admit(&mut self, addr: SocketAddr) -> Option<&Client> {
        let client_id = match self.find_client_by_addr(addr) {
            Some(id) => id,
            None => self.add_client(addr)?,
        };

        let client = self.clients.get_mut(&client_id)?;
        client.touch();
        Some(client)
    }

    /// Removes a client, returning it so the caller can release its tanks.
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!(
            "Client {} disconnected after {} frames",
            client.id, client.frames_received
        );
        Some(client)
    }

    /// Finds a client ID by network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Finds a client reporting the tank with `net_id`
    pub fn find_client_by_net_id(&self, net_id: u32) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.net_ids.contains(&net_id))
            .map(|(id, _)| *id)
    }

    /// The tank reported over the connection at `addr`, used as the decode
    /// hint for its next frame.
    ///
    /// Returns None when the connection has reported no tank or several, since
    /// the frame could then be about any of them.
    pub fn net_id_for(&self, addr: SocketAddr) -> Option<u32> {
        let client = self.clients.values().find(|client| client.addr == addr)?;
        match client.net_ids.as_slice() {
            [net_id] => Some(*net_id),
            _ => None,
        }
    }

    /// Records that the connection at `addr` reported the tank `net_id`.
    ///
    /// Returns true if the tank is new for this connection. Tanks are never
    /// dropped from a live connection; they are only released on timeout.
    pub fn associate_net_id(&mut self, addr: SocketAddr, net_id: u32) -> bool {
        let Some(client) = self.clients.values_mut().find(|client| client.addr == addr) else {
            return false;
        };

        if client.net_ids.contains(&net_id) {
            return false;
        }

        info!("Client {} reports tank {}", client.id, net_id);
        client.net_ids.push(net_id);
        true
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed clients so their tanks can be released.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    /// Gets all client IDs and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
