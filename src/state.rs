//! Process-wide context, replacing the reference implementation's global
//! mutable singleton with an explicit value constructed at startup and
//! threaded to every task.
//!
//! Two locks, never held together (§5): `network` guards the scalar
//! topology fields; the store has its own internal synchronization (a
//! single-connection `SqlitePool`, see `store::init`). Callers must copy
//! values out of `network` before making a store call or a packet-send
//! syscall that depends on them.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use pnet::util::MacAddr;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::oui::OuiDatabase;

/// Snapshot of the network topology as last resolved by §4.A.
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub host_ip: Ipv4Addr,
    pub host_mac: MacAddr,
    pub gateway_ip: Ipv4Addr,
    pub interface_name: String,
    pub subnet_ips: Vec<Ipv4Addr>,
}

pub struct AppState {
    pub network: RwLock<NetworkInfo>,
    pub is_running: AtomicBool,
    pub is_inspecting: AtomicBool,
    pub store: SqlitePool,
    pub config: AppConfig,
    pub oui: OuiDatabase,
    /// Unix-second timestamp of the last flow hostname backfill run, gating
    /// it to at most once every 2s (§4.G) without a dedicated supervised task.
    pub flow_backfill_last_run: AtomicI64,
}

impl AppState {
    pub fn new(
        network: NetworkInfo,
        store: SqlitePool,
        config: AppConfig,
        oui: OuiDatabase,
    ) -> Self {
        Self {
            network: RwLock::new(network),
            is_running: AtomicBool::new(true),
            is_inspecting: AtomicBool::new(true),
            store,
            config,
            oui,
            flow_backfill_last_run: AtomicI64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_inspecting(&self) -> bool {
        self.is_inspecting.load(Ordering::SeqCst)
    }

    /// Snapshot the current network info under the global-state lock. Callers
    /// must not hold the returned guard across a store call or a send
    /// syscall — this clones out so the lock is released immediately.
    pub async fn network_snapshot(&self) -> NetworkInfo {
        self.network.read().await.clone()
    }

    pub async fn update_network(&self, new: NetworkInfo) {
        *self.network.write().await = new;
    }
}
