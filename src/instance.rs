//! One running translator: its flavor, config snapshot and databases.

use std::sync::Arc;

use arc_swap::ArcSwap;
use nat_state::{BibDb, FragDb, Pool4Db, SessionDb};
use parking_lot::{Mutex, RwLock};
use prefix_pool::{EamTable, Pool4, Pool6};
use tokio::sync::Notify;

use crate::config::{Config, Flavor};

/// Databases only the stateless translator keeps.
#[derive(Default)]
pub struct SiitState {
    /// The IPv4 addresses this translator speaks for.
    pub pool4: RwLock<Pool4>,
    /// Addresses never translated even when they would match.
    pub blacklist: RwLock<Pool4>,
    /// Source addresses for ICMPv4 errors with unrepresentable origins.
    pub rfc6791: RwLock<Pool4>,
    pub eamt: RwLock<EamTable>,
}

/// Databases only the stateful translator keeps.
#[derive(Default)]
pub struct Nat64State {
    pub pool4: RwLock<Pool4Db>,
    pub bib: RwLock<BibDb>,
    pub sessions: RwLock<SessionDb>,
    pub fragdb: Mutex<FragDb>,
}

pub enum State {
    Siit(SiitState),
    Nat64(Nat64State),
}

pub struct Instance {
    pub flavor: Flavor,
    config: ArcSwap<Config>,
    pub pool6: RwLock<Pool6>,
    pub state: State,
    /// Serializes control-plane mutations; the dataplane never takes it.
    pub control_lock: Mutex<()>,
    /// Wakes the expiry task when the next deadline may have moved.
    pub expiry_rearm: Notify,
}

impl Instance {
    pub fn new(flavor: Flavor) -> Arc<Self> {
        Arc::new(Self {
            flavor,
            config: ArcSwap::from_pointee(Config::default()),
            pool6: RwLock::new(Pool6::new()),
            state: match flavor {
                Flavor::Siit => State::Siit(SiitState::default()),
                Flavor::Nat64 => State::Nat64(Nat64State::default()),
            },
            control_lock: Mutex::new(()),
            expiry_rearm: Notify::new(),
        })
    }

    /// The current snapshot; hold it for at most one packet.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn publish_config(&self, config: Config) {
        self.config.store(Arc::new(config));
    }

    pub fn nat64(&self) -> Option<&Nat64State> {
        match &self.state {
            State::Nat64(state) => Some(state),
            State::Siit(_) => None,
        }
    }

    pub fn siit(&self) -> Option<&SiitState> {
        match &self.state {
            State::Siit(state) => Some(state),
            State::Nat64(_) => None,
        }
    }

    /// Module teardown: empty every table and drop held packets. No ICMP
    /// errors are emitted for the packets released here.
    pub fn flush_all(&self) {
        let _guard = self.control_lock.lock();
        self.pool6.write().flush();
        match &self.state {
            State::Siit(siit) => {
                siit.pool4.write().flush();
                siit.blacklist.write().flush();
                siit.rfc6791.write().flush();
                siit.eamt.write().flush();
            }
            State::Nat64(nat64) => {
                nat64.pool4.write().flush();
                nat64.sessions.write().flush();
                nat64.bib.write().flush();
                nat64.fragdb.lock().flush();
            }
        }
        self.expiry_rearm.notify_one();
    }
}
