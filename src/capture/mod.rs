//! Live packet capture (§4.E). One `pcap` session on the host's active
//! interface, BPF-filtered to `(not arp and host not <host_ip>) or arp` —
//! the exact filter the reference implementation passes to its sniffer,
//! which excludes the host's own traffic except ARP (so who-has/is-at
//! frames are always seen while the host's redirected-through-it traffic is
//! not re-captured). Captured frames land in a bounded, drop-oldest queue
//! that the classifier drains continuously.

pub mod classifier;
pub mod handlers;
pub mod packet;
pub mod tls;

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pcap::Capture;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::state::AppState;

const QUEUE_CAPACITY: usize = 4096;
const CAPTURE_ROLL_PERIOD: Duration = Duration::from_secs(30);
const PCAP_READ_TIMEOUT_MS: i32 = 1000;
const SNAPLEN: i32 = 65535;

/// A bounded SPSC-shaped frame queue with drop-oldest backpressure (§4.E):
/// capture must never block on the classifier.
pub struct CaptureQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl CaptureQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn push(&self, frame: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(frame);
        drop(guard);
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until at least one frame is queued, then take everything
    /// currently buffered.
    pub async fn drain(&self) -> Vec<Vec<u8>> {
        loop {
            {
                let mut guard = self.inner.lock().unwrap();
                if !guard.is_empty() {
                    return guard.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Run one ~30s capture session on the current active interface, feeding
/// frames into `queue`. Reopens against the latest topology snapshot on
/// every invocation, so an interface change is picked up by the next
/// supervised-task tick (§4.C).
pub async fn run_session(state: Arc<AppState>, queue: Arc<CaptureQueue>) -> anyhow::Result<()> {
    let network = state.network_snapshot().await;
    let interface_name = network.interface_name.clone();
    let host_ip = network.host_ip;

    tokio::task::spawn_blocking(move || capture_blocking(&interface_name, host_ip, queue, state)).await??;
    Ok(())
}

fn capture_blocking(
    interface_name: &str,
    host_ip: Ipv4Addr,
    queue: Arc<CaptureQueue>,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    let device = pcap::Device::list()?
        .into_iter()
        .find(|d| d.name == interface_name)
        .ok_or_else(|| anyhow::anyhow!("interface {interface_name} not found for capture"))?;

    let mut cap = Capture::from_device(device)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(PCAP_READ_TIMEOUT_MS)
        .open()?;

    let filter = format!("(not arp and host not {host_ip}) or arp");
    cap.filter(&filter, true)?;

    info!(interface = interface_name, filter, "capture session started");

    let deadline = Instant::now() + CAPTURE_ROLL_PERIOD;
    while Instant::now() < deadline && state.is_running() {
        match cap.next_packet() {
            Ok(packet) => queue.push(packet.data.to_vec()),
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                warn!(error = %e, "capture read error, ending session early");
                break;
            }
        }
    }

    let dropped = queue.dropped_count();
    if dropped > 0 {
        warn!(dropped, "capture queue dropped frames under backpressure");
    }

    Ok(())
}

/// Spawn the classifier's continuous drain loop once at startup (§4.F). The
/// capture session itself is driven by the supervised task runner so it
/// restarts every 30s.
pub fn spawn_classifier(state: Arc<AppState>, queue: Arc<CaptureQueue>) {
    tokio::spawn(classifier::drain_loop(state, queue));
}
