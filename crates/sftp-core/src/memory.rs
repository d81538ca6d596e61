//! In-memory control and DNS backends.
//!
//! State transitions are scripted: a started server reports `STARTING` for a
//! configurable number of describes before flipping to `ONLINE`, and likewise
//! for stops. Each start hands out a fresh endpoint so callers can observe
//! endpoint rotation. Every mutating call is appended to a log.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::types::{
    DnsAliasRecord, NewUser, ServerDescriptor, ServerId, ServerSpec, ServerState, UserCreation,
};
use crate::{ControlApi, DnsApi, Error, Result};

/// A mutating call observed by [`InMemoryControlApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateServer(String),
    StartServer(ServerId),
    StopServer(ServerId),
    DeleteServer(ServerId),
    CreateUser { server: ServerId, username: String },
    DeleteUser { server: ServerId, username: String },
}

#[derive(Debug, Clone)]
struct MemServer {
    id: ServerId,
    name: String,
    state: ServerState,
    endpoint: Option<String>,
    starts: u32,
    /// Describes left before the current transition settles.
    pending: u32,
    /// State reported by the next describe instead of the real one.
    stale: Option<ServerState>,
    users: BTreeMap<String, NewUser>,
}

impl MemServer {
    fn descriptor(&self) -> ServerDescriptor {
        ServerDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            endpoint: self.endpoint.clone(),
        }
    }
}

#[derive(Debug)]
struct ControlState {
    servers: Vec<MemServer>,
    next_id: u32,
    /// `None` means transitions never settle.
    settle_after: Option<u32>,
    fail_start: bool,
    fail_stop: bool,
    vanish_on_stop: bool,
    stale_restarts: bool,
    hide_endpoint: bool,
    failing_users: HashSet<String>,
    mutations: Vec<Mutation>,
}

pub struct InMemoryControlApi {
    state: Mutex<ControlState>,
}

impl Default for InMemoryControlApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                servers: Vec::new(),
                next_id: 1,
                settle_after: Some(1),
                fail_start: false,
                fail_stop: false,
                vanish_on_stop: false,
                stale_restarts: false,
                hide_endpoint: false,
                failing_users: HashSet::new(),
                mutations: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of describes a start or stop spends in its transitional state.
    pub fn settle_after(&self, describes: u32) {
        self.lock().settle_after = Some(describes);
    }

    /// Keep every started or stopped server in its transitional state.
    pub fn never_settle(&self) {
        self.lock().settle_after = None;
    }

    /// Starts end in `START_FAILED` instead of `ONLINE`.
    pub fn fail_starts(&self) {
        self.lock().fail_start = true;
    }

    /// Stops end in `STOP_FAILED` instead of `OFFLINE`.
    pub fn fail_stops(&self) {
        self.lock().fail_stop = true;
    }

    /// A stop removes the server once it settles, as if deleted elsewhere.
    pub fn vanish_on_stop(&self) {
        self.lock().vanish_on_stop = true;
    }

    /// The first describe after restarting a failed server still reports
    /// the failed state.
    pub fn stale_restarts(&self) {
        self.lock().stale_restarts = true;
    }

    /// Online servers report no endpoint.
    pub fn hide_endpoint(&self) {
        self.lock().hide_endpoint = true;
    }

    /// Creating this username returns an error.
    pub fn fail_user(&self, username: &str) {
        self.lock().failing_users.insert(username.to_string());
    }

    /// Insert a server directly, bypassing the mutation log.
    pub fn seed_server(&self, name: &str, state: ServerState) -> ServerId {
        let mut inner = self.lock();
        let id = ServerId(format!("s-{:04}", inner.next_id));
        inner.next_id += 1;
        let endpoint = (state == ServerState::Online && !inner.hide_endpoint)
            .then(|| endpoint_for(&id, 1));
        inner.servers.push(MemServer {
            id: id.clone(),
            name: name.to_string(),
            state,
            endpoint,
            starts: u32::from(state == ServerState::Online),
            pending: 0,
            stale: None,
            users: BTreeMap::new(),
        });
        id
    }

    /// Insert a user directly, bypassing the mutation log.
    pub fn seed_user(&self, id: &ServerId, user: NewUser) {
        let mut inner = self.lock();
        if let Some(server) = inner.servers.iter_mut().find(|s| &s.id == id) {
            server.users.insert(user.username.clone(), user);
        }
    }

    pub fn server(&self, name: &str) -> Option<ServerDescriptor> {
        self.lock()
            .servers
            .iter()
            .find(|s| s.name == name)
            .map(MemServer::descriptor)
    }

    pub fn server_count(&self, name: &str) -> usize {
        self.lock().servers.iter().filter(|s| s.name == name).count()
    }

    /// Users on a server, ordered by username.
    pub fn users(&self, id: &ServerId) -> Vec<NewUser> {
        self.lock()
            .servers
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.users.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }
}

fn endpoint_for(id: &ServerId, generation: u32) -> String {
    format!("{id}-g{generation}.sftp.internal")
}

impl ControlState {
    fn server_mut(&mut self, id: &ServerId) -> Result<&mut MemServer> {
        self.servers
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| Error::ServerNotFound(id.clone()))
    }

    fn begin_start(&mut self, id: &ServerId) -> Result<()> {
        let settle = self.settle_after;
        let stale_restarts = self.stale_restarts;
        let server = self.server_mut(id)?;
        if stale_restarts && server.state.is_failed() {
            server.stale = Some(server.state);
        }
        server.state = ServerState::Starting;
        server.endpoint = None;
        server.starts += 1;
        server.pending = settle.unwrap_or(0);
        Ok(())
    }
}

#[async_trait]
impl ControlApi for InMemoryControlApi {
    async fn find_server(&self, name: &str) -> Result<Option<ServerDescriptor>> {
        Ok(self.server(name))
    }

    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerDescriptor> {
        let id = self.seed_server(&spec.name, ServerState::Offline);
        let mut inner = self.lock();
        inner.mutations.push(Mutation::CreateServer(spec.name.clone()));
        inner.begin_start(&id)?;
        Ok(inner.server_mut(&id)?.descriptor())
    }

    async fn start_server(&self, id: &ServerId) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(Mutation::StartServer(id.clone()));
        let state = inner.server_mut(id)?.state;
        match state {
            ServerState::Offline | ServerState::StartFailed | ServerState::StopFailed => {
                inner.begin_start(id)
            }
            other => Err(Error::Control(format!("cannot start server in state {other}"))),
        }
    }

    async fn stop_server(&self, id: &ServerId) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(Mutation::StopServer(id.clone()));
        let settle = inner.settle_after;
        let server = inner.server_mut(id)?;
        let current = server.state;
        match current {
            ServerState::Online | ServerState::Starting => {
                server.state = ServerState::Stopping;
                server.pending = settle.unwrap_or(0);
                Ok(())
            }
            other => Err(Error::Control(format!("cannot stop server in state {other}"))),
        }
    }

    async fn delete_server(&self, id: &ServerId) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(Mutation::DeleteServer(id.clone()));
        inner.servers.retain(|s| &s.id != id);
        Ok(())
    }

    async fn describe_server(&self, id: &ServerId) -> Result<ServerDescriptor> {
        let mut inner = self.lock();
        let settles = inner.settle_after.is_some();
        let fail_start = inner.fail_start;
        let fail_stop = inner.fail_stop;
        let vanish_on_stop = inner.vanish_on_stop;
        let hide_endpoint = inner.hide_endpoint;
        let server = inner.server_mut(id)?;

        if let Some(stale) = server.stale.take() {
            let mut descriptor = server.descriptor();
            descriptor.state = stale;
            return Ok(descriptor);
        }

        let mut vanished = false;
        if settles && matches!(server.state, ServerState::Starting | ServerState::Stopping) {
            if server.pending > 0 {
                server.pending -= 1;
            }
            if server.pending == 0 {
                let current = server.state;
                match current {
                    ServerState::Starting if fail_start => server.state = ServerState::StartFailed,
                    ServerState::Starting => {
                        server.state = ServerState::Online;
                        server.endpoint =
                            (!hide_endpoint).then(|| endpoint_for(&server.id, server.starts));
                    }
                    _ if vanish_on_stop => vanished = true,
                    _ if fail_stop => server.state = ServerState::StopFailed,
                    _ => {
                        server.state = ServerState::Offline;
                        server.endpoint = None;
                    }
                }
            }
        }

        if vanished {
            inner.servers.retain(|s| &s.id != id);
            return Err(Error::ServerNotFound(id.clone()));
        }

        Ok(server.descriptor())
    }

    async fn find_user(&self, id: &ServerId, username: &str) -> Result<bool> {
        let mut inner = self.lock();
        Ok(inner.server_mut(id)?.users.contains_key(username))
    }

    async fn create_user(&self, id: &ServerId, user: &NewUser) -> Result<UserCreation> {
        let mut inner = self.lock();
        inner.mutations.push(Mutation::CreateUser {
            server: id.clone(),
            username: user.username.clone(),
        });
        if inner.failing_users.contains(&user.username) {
            return Err(Error::Control(format!(
                "create user {}: injected failure",
                user.username
            )));
        }
        let server = inner.server_mut(id)?;
        if server.users.contains_key(&user.username) {
            return Ok(UserCreation::AlreadyExists);
        }
        server.users.insert(user.username.clone(), user.clone());
        Ok(UserCreation::Created)
    }

    async fn list_users(&self, id: &ServerId) -> Result<Vec<String>> {
        let mut inner = self.lock();
        Ok(inner.server_mut(id)?.users.keys().cloned().collect())
    }

    async fn delete_user(&self, id: &ServerId, username: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(Mutation::DeleteUser {
            server: id.clone(),
            username: username.to_string(),
        });
        inner.server_mut(id)?.users.remove(username);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DnsState {
    records: HashMap<(String, String), DnsAliasRecord>,
    upserts: u32,
    fail_upserts: bool,
}

/// Zone-keyed CNAME store.
#[derive(Default)]
pub struct InMemoryDns {
    state: Mutex<DnsState>,
}

impl InMemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DnsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, zone_id: &str, name: &str) -> Option<DnsAliasRecord> {
        self.lock()
            .records
            .get(&(zone_id.to_string(), name.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Number of upserts that reached the store.
    pub fn upserts(&self) -> u32 {
        self.lock().upserts
    }

    pub fn fail_upserts(&self) {
        self.lock().fail_upserts = true;
    }
}

#[async_trait]
impl DnsApi for InMemoryDns {
    async fn find_record(&self, zone_id: &str, name: &str) -> Result<Option<DnsAliasRecord>> {
        Ok(self.record(zone_id, name))
    }

    async fn upsert_record(&self, zone_id: &str, record: &DnsAliasRecord) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_upserts {
            return Err(Error::Dns(format!("upsert {}: injected failure", record.name)));
        }
        inner.upserts += 1;
        inner
            .records
            .insert((zone_id.to_string(), record.name.clone()), record.clone());
        Ok(())
    }
}
