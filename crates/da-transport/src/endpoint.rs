//! The one UDP socket a process binds, wired to a [`PerfectLinkManager`].

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use da_common::hosts::HostsTable;
use da_common::ProcessId;
use da_core::pl::PerfectLinkManager;

use crate::periodic::spawn_periodic;

/// Receive loop wakes up this often even with nothing to read, so `stop`
/// never blocks longer than this.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STUBBORN_INTERVAL: Duration = Duration::from_millis(250);
const ACK_INTERVAL: Duration = Duration::from_millis(250);
/// Largest datagram we ever expect: header + a lattice-agreement decided set.
const MAX_DATAGRAM: usize = 65_507;

pub struct DatagramEndpoint {
    self_id: ProcessId,
    socket: UdpSocket,
    addr_to_id: HashMap<SocketAddr, ProcessId>,
    id_to_addr: HashMap<ProcessId, SocketAddr>,
    pl: Arc<PerfectLinkManager>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DatagramEndpoint {
    pub fn bind(self_id: ProcessId, hosts: &HostsTable, pl: Arc<PerfectLinkManager>) -> anyhow::Result<Arc<Self>> {
        let self_addr = hosts
            .addr_of(self_id)
            .ok_or_else(|| anyhow::anyhow!("process id {self_id} not present in hosts file"))?;
        let socket = UdpSocket::bind(self_addr)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        let mut addr_to_id = HashMap::new();
        let mut id_to_addr = HashMap::new();
        for (id, addr) in hosts.peers_of(self_id) {
            pl.add_peer(id);
            addr_to_id.insert(addr, id);
            id_to_addr.insert(id, addr);
        }

        tracing::info!(self_id, %self_addr, peers = id_to_addr.len(), "bound datagram endpoint");

        Ok(Arc::new(DatagramEndpoint {
            self_id,
            socket,
            addr_to_id,
            id_to_addr,
            pl,
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Starts the receive pump and the PL stubborn-send / ack-flush cycles.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let recv_self = self.clone();
        let running = self.running.clone();
        let recv_handle = std::thread::Builder::new()
            .name(format!("da-recv-{}", self.self_id))
            .spawn(move || recv_self.recv_loop(running))
            .expect("failed to spawn receive thread");

        let stubborn_self = self.clone();
        let stubborn_handle = spawn_periodic(
            format!("da-pl-send-{}", self.self_id),
            STUBBORN_INTERVAL,
            self.running.clone(),
            move || stubborn_self.flush_stubborn(),
        );

        let ack_self = self.clone();
        let ack_handle = spawn_periodic(
            format!("da-pl-ack-{}", self.self_id),
            ACK_INTERVAL,
            self.running.clone(),
            move || ack_self.flush_acks(),
        );

        let mut threads = self.threads.lock().unwrap();
        threads.push(recv_handle);
        threads.push(stubborn_handle);
        threads.push(ack_handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn send_to(&self, peer: ProcessId, bytes: Bytes) {
        let Some(&addr) = self.id_to_addr.get(&peer) else {
            tracing::warn!(peer, "send_to unknown peer id, dropping");
            return;
        };
        if let Err(err) = self.socket.send_to(&bytes, addr) {
            tracing::warn!(peer, %addr, error = %err, "udp send failed");
        }
    }

    fn recv_loop(&self, running: Arc<AtomicBool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from_addr)) => {
                    let Some(&peer) = self.addr_to_id.get(&from_addr) else {
                        tracing::debug!(%from_addr, "datagram from unknown address, dropping");
                        continue;
                    };
                    let bytes = Bytes::copy_from_slice(&buf[..len]);
                    self.pl.on_datagram(peer, bytes);
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "udp recv failed");
                }
            }
        }
        tracing::debug!(self_id = self.self_id, "receive loop stopped");
    }

    fn flush_stubborn(&self) {
        for (peer, bytes) in self.pl.stubborn_tick() {
            self.send_to(peer, bytes);
        }
    }

    fn flush_acks(&self) {
        for (peer, bytes) in self.pl.ack_tick() {
            self.send_to(peer, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use da_wire::pl::PlPacket;
    use std::io::Write;

    fn write_hosts(lines: &[(u16, u16)]) -> (tempfile::NamedTempFile, Vec<u16>) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for (id, port) in lines {
            writeln!(f, "{id} 127.0.0.1 {port}").unwrap();
        }
        (f, lines.iter().map(|(id, _)| *id).collect())
    }

    fn free_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn two_endpoints_exchange_a_datagram_end_to_end() {
        let port_a = free_port();
        let port_b = free_port();
        let (f, _) = write_hosts(&[(1, port_a), (2, port_b)]);
        let hosts = HostsTable::parse(f.path()).unwrap();

        let pl_a = Arc::new(PerfectLinkManager::new());
        let ep_a = DatagramEndpoint::bind(1, &hosts, pl_a.clone()).unwrap();
        let pl_b = Arc::new(PerfectLinkManager::new());
        let ep_b = DatagramEndpoint::bind(2, &hosts, pl_b.clone()).unwrap();

        struct Collector(Mutex<Vec<Bytes>>);
        impl da_core::pl::Notifyable for Collector {
            fn notify(&self, _from: ProcessId, _seq: u32, payload: Bytes) {
                self.0.lock().unwrap().push(payload);
            }
        }
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        pl_b.subscribe(collector.clone());

        ep_a.start();
        ep_b.start();

        pl_a.send(2, Bytes::from_static(b"hello"));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while collector.0.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        ep_a.stop();
        ep_b.stop();

        let seen = collector.0.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Bytes::from_static(b"hello")]);
    }

    #[test]
    fn unknown_sender_address_is_dropped_without_panicking() {
        let port_a = free_port();
        let port_b = free_port();
        let (f, _) = write_hosts(&[(1, port_a), (2, port_b)]);
        let hosts = HostsTable::parse(f.path()).unwrap();
        let pl = Arc::new(PerfectLinkManager::new());
        let ep = DatagramEndpoint::bind(1, &hosts, pl).unwrap();

        let stray = UdpSocket::bind("127.0.0.1:0").unwrap();
        ep.start();
        stray
            .send_to(&PlPacket::Ack { seq: 1 }.encode(), ("127.0.0.1", port_a))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        ep.stop();
    }
}
