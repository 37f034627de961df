//! The universe server: accepts and authenticates connections, owns every
//! world thread, routes packets, and persists everything durable.

use crate::client_context::{ClientContext, SystemLocation, WorldChunks};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionServer, PacketSocket};
use crate::error::{Result, ServerError};
use crate::packets::{
    ChatMessage, ChatSendMode, CompressionMode, NetCompatibilityRules, Packet, PROTOCOL_VERSION,
};
use crate::universe::settings::{TempWorldIndex, TimeoutBan, UniverseSettings};
use crate::universe::system_world::SystemWorld;
use crate::warping::{InstanceWorldId, SpawnTarget, WarpAction, WarpAlias, WarpToWorld, WorldId};
use crate::world::server::{WorldServer, WorldServerConfig, WorldServerFidelity};
use crate::world::storage::WorldStorage;
use crate::world::template::{
    CelestialDatabase, CelestialMasterDatabase, TerrestrialParameters, WorldTemplate,
};
use crate::world::thread::{WorldMessage, WorldServerThread};
use log::{error, info, warn};
use serde_json::Value as Json;
use skyward_core::math::{Vec2U, Vec3I};
use skyward_core::types::celestial::CelestialCoordinate;
use skyward_core::types::game::{
    ConnectionId, MAX_CLIENT_CONNECTION_ID, MIN_CLIENT_CONNECTION_ID,
};
use skyward_core::types::id_map::IdMap;
use skyward_core::types::lock_file::LockFile;
use skyward_core::types::rpc_promise::RpcThreadPromise;
use skyward_core::types::sha256::{digest_equal, sha256};
use skyward_core::types::random::secure_random_bytes;
use skyward_core::types::time::{milliseconds_since_epoch, monotonic_milliseconds, Clock};
use skyward_core::types::versioning::{fail_rename, VersionedJson, VersioningDatabase};
use skyward_core::types::worker_pool::{WorkerPool, WorkerPoolPromise};
use skyward_core::Uuid;
use std::collections::HashMap;
use std::net::{IpAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;

/// A warp override hook; the first hook returning a destination wins.
pub type WarpOverrideHook =
    Box<dyn Fn(&WarpAction, ConnectionId, bool) -> Option<WarpToWorld> + Send + Sync>;

enum WorldTrack {
    Pending(WorkerPoolPromise<Arc<WorldServerThread>>),
    Ready(Arc<WorldServerThread>),
}

type FlightData = (Vec3I, SystemLocation, Json);

/// Everything guarded by the universe main lock.
#[derive(Default)]
struct MainState {
    worlds: HashMap<WorldId, WorldTrack>,
    system_worlds: HashMap<Vec3I, SystemWorld>,
    temp_world_index: TempWorldIndex,
    temp_bans: Vec<TimeoutBan>,

    pending_warps: HashMap<ConnectionId, (WarpAction, bool)>,
    queued_flights: HashMap<ConnectionId, (FlightData, Option<f64>)>,
    pending_flights: HashMap<ConnectionId, FlightData>,
    pending_arrivals: HashMap<ConnectionId, CelestialCoordinate>,
    pending_disconnections: HashMap<ConnectionId, String>,
    pending_chat: Vec<(ConnectionId, String, ChatSendMode)>,
    pending_celestial_requests: HashMap<ConnectionId, Vec<crate::packets::CelestialRequest>>,
    pending_world_messages: HashMap<WorldId, Vec<WorldMessage>>,

    last_clock_update_sent: i64,
    storage_deadline: i64,
}

/// Manages all running worlds, accepts client connections, and routes
/// packets between clients and the worlds that own them.
pub struct UniverseServer {
    config: ServerConfig,
    storage_directory: PathBuf,
    _storage_lock: LockFile,
    assets_digest: Vec<u8>,

    versioning: VersioningDatabase,
    celestial: Arc<Mutex<Box<dyn CelestialDatabase>>>,
    universe_clock: Arc<Clock>,
    settings: Mutex<UniverseSettings>,
    worker_pool: WorkerPool,
    connection_server: Arc<ConnectionServer>,

    pause: Arc<AtomicBool>,
    timescale: Mutex<f32>,
    stop_flag: Arc<AtomicBool>,

    main: Mutex<MainState>,
    clients: RwLock<IdMap<ConnectionId, Arc<Mutex<ClientContext>>>>,
    accept_threads: Mutex<Vec<JoinHandle<()>>>,
    warp_override_hooks: Mutex<Vec<WarpOverrideHook>>,
}

impl UniverseServer {
    /// Creates a universe over a storage directory, taking its advisory
    /// lock. Fails when another live server holds the directory.
    pub fn new(config: ServerConfig) -> Result<Arc<UniverseServer>> {
        let storage_directory = config.storage_directory.clone();
        std::fs::create_dir_all(&storage_directory)?;
        let storage_lock = LockFile::acquire(storage_directory.join("universe.lock"), 0)?;

        let (settings, stored_time) =
            UniverseSettings::load(&storage_directory.join("universe.dat"));
        let universe_clock = Arc::new(Clock::new(true));
        universe_clock.set_time(stored_time);

        let mut versioning = VersioningDatabase::new();
        ClientContext::register_versioning(&mut versioning);
        versioning.register_kind(
            crate::world::storage::WORLD_METADATA_KIND,
            crate::world::storage::WORLD_METADATA_VERSION,
        );

        let celestial: Arc<Mutex<Box<dyn CelestialDatabase>>> = Arc::new(Mutex::new(Box::new(
            CelestialMasterDatabase::open(storage_directory.join("universe.chunks")),
        )));

        let assets_digest = config
            .assets_digest_override
            .clone()
            .map(String::into_bytes)
            .unwrap_or_default();

        let server = Arc::new_cyclic(|weak: &Weak<UniverseServer>| {
            let callback_weak = weak.clone();
            let connection_server = ConnectionServer::new(Arc::new(move |client_id, packets| {
                if let Some(server) = callback_weak.upgrade() {
                    server.packets_received(client_id, packets);
                }
            }));
            connection_server.start_workers(config.network_worker_threads);

            let mut main = MainState::default();
            main.temp_world_index =
                TempWorldIndex::load(&storage_directory.join("tempworlds.index"));
            main.storage_deadline =
                monotonic_milliseconds() + config.universe_storage_interval as i64;

            UniverseServer {
                worker_pool: WorkerPool::new("universe-worker", config.worker_pool_threads),
                clients: RwLock::new(IdMap::new(
                    MIN_CLIENT_CONNECTION_ID,
                    MAX_CLIENT_CONNECTION_ID,
                )),
                main: Mutex::new(main),
                settings: Mutex::new(settings),
                pause: Arc::new(AtomicBool::new(false)),
                timescale: Mutex::new(1.0),
                stop_flag: Arc::new(AtomicBool::new(false)),
                accept_threads: Mutex::new(Vec::new()),
                warp_override_hooks: Mutex::new(Vec::new()),
                connection_server,
                versioning,
                celestial,
                universe_clock,
                assets_digest,
                _storage_lock: storage_lock,
                storage_directory,
                config,
            }
        });
        info!(
            "universe server starting with uuid {}",
            server.settings.lock().unwrap().uuid
        );
        Ok(server)
    }

    pub fn universe_clock(&self) -> Arc<Clock> {
        self.universe_clock.clone()
    }

    pub fn max_clients(&self) -> u32 {
        self.config.max_players
    }

    pub fn register_warp_override(&self, hook: WarpOverrideHook) {
        self.warp_override_hooks.lock().unwrap().push(hook);
    }

    // -- pause / timescale ----------------------------------------------

    pub fn set_pause(&self, pause: bool) {
        self.pause.store(pause, Ordering::SeqCst);
        if pause {
            self.universe_clock.stop();
        } else {
            self.universe_clock.start();
        }
        let timescale = *self.timescale.lock().unwrap();
        self.broadcast(Packet::Pause {
            paused: pause,
            timescale,
        });
    }

    pub fn set_timescale(&self, timescale: f32) {
        *self.timescale.lock().unwrap() = timescale;
        let main = self.main.lock().unwrap();
        for track in main.worlds.values() {
            if let WorldTrack::Ready(world) = track {
                world
                    .timescale_handle()
                    .store(timescale.to_bits(), Ordering::SeqCst);
            }
        }
        drop(main);
        self.broadcast(Packet::Pause {
            paused: self.pause.load(Ordering::SeqCst),
            timescale,
        });
    }

    // -- client queries --------------------------------------------------

    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.clients.read().unwrap().keys().collect()
    }

    pub fn number_of_clients(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_connected_client(&self, client_id: ConnectionId) -> bool {
        self.clients.read().unwrap().contains(client_id)
    }

    pub fn client_nick(&self, client_id: ConnectionId) -> Option<String> {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .map(|context| context.lock().unwrap().player_name.clone())
    }

    pub fn find_nick(&self, nick: &str) -> Option<ConnectionId> {
        let clients = self.clients.read().unwrap();
        let result = clients
            .iter()
            .find(|(_, context)| context.lock().unwrap().player_name == nick)
            .map(|(id, _)| id);
        result
    }

    pub fn uuid_for_client(&self, client_id: ConnectionId) -> Option<Uuid> {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .map(|context| context.lock().unwrap().player_uuid)
    }

    pub fn client_for_uuid(&self, uuid: Uuid) -> Option<ConnectionId> {
        let clients = self.clients.read().unwrap();
        let result = clients
            .iter()
            .find(|(_, context)| context.lock().unwrap().player_uuid == uuid)
            .map(|(id, _)| id);
        result
    }

    pub fn client_world(&self, client_id: ConnectionId) -> Option<WorldId> {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .and_then(|context| context.lock().unwrap().player_world.clone())
    }

    pub fn client_ship_coordinate(&self, client_id: ConnectionId) -> Option<CelestialCoordinate> {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .map(|context| context.lock().unwrap().ship_coordinate)
    }

    pub fn is_admin(&self, client_id: ConnectionId) -> bool {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .map(|context| context.lock().unwrap().admin)
            .unwrap_or(false)
    }

    pub fn active_worlds(&self) -> Vec<WorldId> {
        let main = self.main.lock().unwrap();
        main.worlds
            .iter()
            .filter(|(_, track)| matches!(track, WorldTrack::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_world_active(&self, world_id: &WorldId) -> bool {
        matches!(
            self.main.lock().unwrap().worlds.get(world_id),
            Some(WorldTrack::Ready(_))
        )
    }

    // -- admin chat ------------------------------------------------------

    pub fn admin_broadcast(&self, text: &str) {
        self.broadcast(Packet::ChatReceive {
            message: ChatMessage {
                mode: ChatSendMode::Broadcast,
                from_connection: 0,
                from_nick: "server".into(),
                text: text.into(),
            },
        });
    }

    pub fn admin_whisper(&self, client_id: ConnectionId, text: &str) {
        self.connection_server.send_packets(
            client_id,
            vec![Packet::ChatReceive {
                message: ChatMessage {
                    mode: ChatSendMode::Broadcast,
                    from_connection: 0,
                    from_nick: "server".into(),
                    text: text.into(),
                },
            }],
        );
    }

    fn broadcast(&self, packet: Packet) {
        for client_id in self.client_ids() {
            self.connection_server
                .send_packets(client_id, vec![packet.clone()]);
        }
    }

    // -- warps and flights ----------------------------------------------

    pub fn client_warp_player(&self, client_id: ConnectionId, action: WarpAction, deploy: bool) {
        self.main
            .lock()
            .unwrap()
            .pending_warps
            .insert(client_id, (action, deploy));
    }

    pub fn client_fly_ship(
        &self,
        client_id: ConnectionId,
        system: Vec3I,
        location: SystemLocation,
        settings: Json,
    ) {
        self.main
            .lock()
            .unwrap()
            .pending_flights
            .insert(client_id, (system, location, settings));
    }

    /// Sends a message to a world, creating it if necessary; the reply
    /// arrives through the returned thread promise.
    pub fn send_world_message(
        &self,
        world_id: WorldId,
        message: String,
        args: Vec<Json>,
    ) -> RpcThreadPromise<Json> {
        let (promise, keeper) = RpcThreadPromise::create_pair();
        self.main
            .lock()
            .unwrap()
            .pending_world_messages
            .entry(world_id)
            .or_default()
            .push(WorldMessage {
                message,
                args,
                keeper,
            });
        promise
    }

    // -- bans ------------------------------------------------------------

    /// Bans the user behind a connection by ip and/or uuid; a timeout
    /// makes it temporary. The client is disconnected either way.
    pub fn ban_user(
        &self,
        client_id: ConnectionId,
        reason: String,
        ban_ip: bool,
        ban_uuid: bool,
        timeout_millis: Option<i64>,
    ) {
        let (ip, uuid) = {
            let clients = self.clients.read().unwrap();
            match clients.get(client_id) {
                Some(context) => {
                    let context = context.lock().unwrap();
                    (context.remote_address, Some(context.player_uuid))
                }
                None => return,
            }
        };

        match timeout_millis {
            Some(timeout) => {
                self.main.lock().unwrap().temp_bans.push(TimeoutBan {
                    ban_expiry: milliseconds_since_epoch() + timeout,
                    reason: reason.clone(),
                    ip: ban_ip.then_some(ip).flatten(),
                    uuid: ban_uuid.then(|| uuid).flatten(),
                });
            }
            None => {
                let mut settings = self.settings.lock().unwrap();
                if ban_ip {
                    if let Some(ip) = ip {
                        settings.banned_ips.push(ip.to_string());
                    }
                }
                if ban_uuid {
                    if let Some(uuid) = uuid {
                        settings.banned_uuids.push(uuid.hex());
                    }
                }
            }
        }

        self.disconnect_client(client_id, format!("You are banned: {reason}"));
    }

    pub fn unban_ip(&self, address: &str) -> bool {
        let mut settings = self.settings.lock().unwrap();
        let before = settings.banned_ips.len();
        settings.banned_ips.retain(|ip| ip != address);
        let mut main = self.main.lock().unwrap();
        let temp_before = main.temp_bans.len();
        main.temp_bans
            .retain(|ban| ban.ip.map(|ip| ip.to_string()) != Some(address.to_string()));
        before != settings.banned_ips.len() || temp_before != main.temp_bans.len()
    }

    pub fn unban_uuid(&self, uuid_hex: &str) -> bool {
        let mut settings = self.settings.lock().unwrap();
        let before = settings.banned_uuids.len();
        settings.banned_uuids.retain(|uuid| uuid != uuid_hex);
        let mut main = self.main.lock().unwrap();
        let temp_before = main.temp_bans.len();
        main.temp_bans
            .retain(|ban| ban.uuid.map(|uuid| uuid.hex()) != Some(uuid_hex.to_string()));
        before != settings.banned_uuids.len() || temp_before != main.temp_bans.len()
    }

    /// The ban reason applying to this ip/uuid, if any.
    pub fn is_banned_user(&self, ip: Option<IpAddr>, uuid: Uuid) -> Option<String> {
        {
            let settings = self.settings.lock().unwrap();
            if let Some(ip) = ip {
                if settings.banned_ips.iter().any(|banned| *banned == ip.to_string()) {
                    return Some("ip banned".into());
                }
            }
            if settings.banned_uuids.iter().any(|banned| *banned == uuid.hex()) {
                return Some("uuid banned".into());
            }
        }
        let main = self.main.lock().unwrap();
        let now = milliseconds_since_epoch();
        for ban in &main.temp_bans {
            if ban.ban_expiry <= now {
                continue;
            }
            if ban.ip.is_some() && ban.ip == ip {
                return Some(ban.reason.clone());
            }
            if ban.uuid == Some(uuid) {
                return Some(ban.reason.clone());
            }
        }
        None
    }

    pub fn disconnect_client(&self, client_id: ConnectionId, reason: String) {
        self.main
            .lock()
            .unwrap()
            .pending_disconnections
            .insert(client_id, reason);
    }

    // -- accepting connections ------------------------------------------

    /// Hands a fresh connection to a dedicated accept thread that runs
    /// the handshake state machine.
    pub fn add_client(self: &Arc<Self>, socket: PacketSocket) {
        let mut accept_threads = self.accept_threads.lock().unwrap();
        accept_threads.retain(|handle| !handle.is_finished());
        if accept_threads.len() >= self.config.max_pending_connections {
            warn!("maximum pending connections, dropping connection");
            return;
        }
        let server = self.clone();
        let handle = std::thread::Builder::new()
            .name("universe-accept".into())
            .spawn(move || {
                let remote = socket.remote_address();
                let connection = Connection::new(socket);
                if let Err(e) = server.accept_connection(connection, remote) {
                    warn!("connection from {remote:?} failed: {e}");
                }
            })
            .expect("failed to spawn accept thread");
        accept_threads.push(handle);
    }

    fn accept_connection(
        self: &Arc<Self>,
        mut connection: Connection,
        remote_address: Option<IpAddr>,
    ) -> Result<()> {
        let wait_limit = self.config.client_wait_limit;

        connection.receive_any(wait_limit)?;
        let Some(Packet::ProtocolRequest { protocol_version }) = connection.pull_single() else {
            return Err(ServerError::protocol("expected ProtocolRequest"));
        };

        if protocol_version != PROTOCOL_VERSION {
            warn!(
                "rejecting connection: unsupported protocol {protocol_version}, supported {PROTOCOL_VERSION}"
            );
            connection.send(Packet::ProtocolResponse {
                allowed: false,
                info: Json::Null,
            })?;
            return Ok(());
        }

        let compression = self.config.compression;
        connection.send(Packet::ProtocolResponse {
            allowed: true,
            info: serde_json::json!({
                "compression": compression,
                "openProtocolVersion": 1,
            }),
        })?;
        if compression == CompressionMode::Zstd {
            connection.set_compression(CompressionMode::Zstd)?;
        }

        connection.receive_any(wait_limit)?;
        let Some(Packet::ClientConnect {
            assets_digest,
            allow_assets_mismatch,
            account,
            player_uuid,
            player_name,
            player_species,
            ship_species,
            ship_chunks,
            ship_upgrades,
            intro_complete,
            info: _,
        }) = connection.pull_single()
        else {
            connection.send(Packet::ConnectFailure {
                reason: "connect timeout".into(),
            })?;
            return Err(ServerError::protocol("expected ClientConnect"));
        };

        let fail = |connection: &mut Connection, reason: String| -> Result<()> {
            warn!(
                "login failed for '{player_name}' from {remote_address:?}: {reason}"
            );
            connection.send(Packet::ConnectFailure { reason })
        };

        let mut administrator = remote_address.is_none();
        if !administrator {
            if assets_digest != self.assets_digest
                && !self.config.allow_assets_mismatch
                && !allow_assets_mismatch
            {
                return fail(&mut connection, "Assets mismatch".into());
            }

            if !self.config.known_species.contains(&player_species) {
                return fail(&mut connection, "Unknown species".into());
            }

            if !account.is_empty() {
                // Salted challenge; the same failure message for a missing
                // account and a wrong password prevents user enumeration
                let salt = secure_random_bytes(self.config.password_salt_length);
                connection.send(Packet::HandshakeChallenge { salt: salt.clone() })?;
                connection.receive_any(wait_limit)?;
                let Some(Packet::HandshakeResponse { pass_hash }) = connection.pull_single()
                else {
                    return fail(&mut connection, "Expected handshake response".into());
                };

                let mut success = false;
                if let Some(user) = self.config.server_users.get(&account) {
                    let mut salted = Vec::new();
                    salted.extend_from_slice(user.password.as_bytes());
                    salted.extend_from_slice(account.as_bytes());
                    salted.extend_from_slice(&salt);
                    let expected = sha256(&salted);
                    if digest_equal(&expected, &pass_hash) {
                        success = true;
                        administrator = user.admin;
                    }
                }
                if !success {
                    return fail(
                        &mut connection,
                        format!("No such account '{account}' or incorrect password"),
                    );
                }
            } else {
                if !self.config.allow_anonymous_connections {
                    return fail(&mut connection, "Anonymous connections disallowed".into());
                }
                administrator = self.config.anonymous_connections_are_admin;
            }

            if let Some(reason) = self.is_banned_user(remote_address, player_uuid) {
                return fail(&mut connection, format!("You are banned: {reason}"));
            }
        }

        // Duplicate uuid: an administrator displaces the older session
        if let Some(clash) = self.client_for_uuid(player_uuid) {
            if administrator {
                self.disconnect_client(clash, "Duplicate UUID joined with priority".into());
            } else {
                return fail(&mut connection, "Duplicate player UUID".into());
            }
        }

        let client_id = {
            let mut clients = self.clients.write().unwrap();
            if clients.len() as u32 >= self.config.max_players && !administrator {
                drop(clients);
                return fail(&mut connection, "Max player connections".into());
            }

            let net_rules = NetCompatibilityRules {
                version: protocol_version,
                legacy: false,
            };
            let mut context = ClientContext::new(
                0,
                remote_address,
                net_rules,
                player_uuid,
                player_name.clone(),
                player_species.clone(),
                ship_species,
                administrator,
                ship_chunks,
            );
            context.ship_upgrades = ship_upgrades;
            self.load_client_context_file(&mut context);
            if !administrator {
                context.admin = false;
            }

            let client_id = clients.next_id()?;
            context.client_id = client_id;
            clients
                .add_with_id(client_id, Arc::new(Mutex::new(context)))
                .map_err(|e| ServerError::protocol(format!("id allocation clashed: {e}")))?;
            client_id
        };

        let universe_uuid = self.settings.lock().unwrap().uuid;
        let celestial_information = self.celestial.lock().unwrap().base_information();
        connection.send(Packet::ConnectSuccess {
            client_id,
            universe_uuid,
            celestial_information,
        })?;
        connection.send(Packet::UniverseTimeUpdate {
            universe_time: self.universe_clock.time(),
        })?;
        connection.send(Packet::Pause {
            paused: self.pause.load(Ordering::SeqCst),
            timescale: *self.timescale.lock().unwrap(),
        })?;

        self.connection_server
            .add_connection(client_id, connection.into_socket());

        // Place the ship in its system and route the player to the intro
        // instance, their revive warp, or their own ship
        self.place_client_ship(client_id);

        let (species, intro_complete_flag, revive_warp) = {
            let clients = self.clients.read().unwrap();
            match clients.get(client_id) {
                Some(context) => {
                    let context = context.lock().unwrap();
                    (
                        context.player_species.clone(),
                        intro_complete,
                        context.revive_warp.clone(),
                    )
                }
                None => return Ok(()),
            }
        };

        if let (Some(instance), false) =
            (self.config.intro_instance_for(&species), intro_complete_flag)
        {
            info!("spawning player '{player_name}' in intro instance {instance}");
            self.client_warp_player(
                client_id,
                WarpAction::ToWorld(WarpToWorld {
                    world: WorldId::Instance(InstanceWorldId::owned(instance, player_uuid)),
                    target: SpawnTarget::Default,
                }),
                false,
            );
        } else if let Some(revive) = revive_warp {
            self.client_warp_player(client_id, WarpAction::ToWorld(revive), false);
        } else {
            self.client_warp_player(client_id, WarpAction::own_ship(), false);
        }

        let players = self.number_of_clients() as u16;
        self.broadcast(Packet::ServerInfo {
            players,
            max_players: self.config.max_players as u16,
        });
        info!("client '{player_name}' connected as {client_id}");
        Ok(())
    }

    fn client_context_file(&self, uuid: Uuid) -> PathBuf {
        self.storage_directory
            .join(format!("{}.clientcontext", uuid.hex()))
    }

    fn load_client_context_file(&self, context: &mut ClientContext) {
        let path = self.client_context_file(context.player_uuid);
        if !path.exists() {
            return;
        }
        let loaded = VersionedJson::read_file(&path)
            .map_err(ServerError::from)
            .and_then(|stored| context.load_versioned(&self.versioning, stored));
        if let Err(e) = loaded {
            error!(
                "could not load client context for '{}', ignoring: {e}",
                context.player_name
            );
            if let Err(rename_error) = fail_rename(&path) {
                error!("could not rename failed context file: {rename_error}");
            }
        }
    }

    fn place_client_ship(&self, client_id: ConnectionId) {
        let (uuid, speed, coordinate, location) = {
            let clients = self.clients.read().unwrap();
            let Some(context) = clients.get(client_id) else {
                return;
            };
            let context = context.lock().unwrap();
            (
                context.player_uuid,
                context.ship_upgrades.ship_speed,
                context.ship_coordinate,
                context.ship_location.clone(),
            )
        };
        if coordinate.is_null() {
            return;
        }
        {
            let mut main = self.main.lock().unwrap();
            let system = main
                .system_worlds
                .entry(coordinate.location)
                .or_insert_with(|| SystemWorld::new(coordinate.location));
            system.add_client(client_id, uuid, speed, location);
        }
        if let Some(context) = self.clients.read().unwrap().get(client_id) {
            context.lock().unwrap().system_world = Some(coordinate.location);
        }
    }

    // -- the main loop ---------------------------------------------------

    /// Runs the orchestration loop until `stop` is called. Listens for
    /// TCP connections on the configured port.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).map_err(|e| {
            ServerError::network(format!(
                "could not bind {}: {e}",
                self.config.bind_address()
            ))
        })?;
        listener.set_nonblocking(true)?;
        info!("listening for connections on {}", self.config.bind_address());

        while !self.stop_flag.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, address)) => {
                    info!("connection received from {address}");
                    match PacketSocket::open(stream) {
                        Ok(socket) => self.add_client(socket),
                        Err(e) => warn!("could not open socket: {e}"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("accept failed: {e}"),
            }

            if let Err(e) = self.tick() {
                error!("universe tick error: {e}");
            }

            std::thread::sleep(std::time::Duration::from_millis(
                self.config.main_wakeup_interval,
            ));
        }

        self.shutdown();
        Ok(())
    }

    /// One pass of the orchestration work; public so embedders and tests
    /// can drive the universe without the TCP loop.
    pub fn tick(self: &Arc<Self>) -> Result<()> {
        self.remove_timed_bans();
        self.update_system_worlds();
        self.send_clock_updates();
        self.kick_errored_players();
        self.reap_connections();
        self.process_planet_type_changes();
        self.warp_players();
        self.fly_ships();
        self.arrive_ships();
        self.respond_to_celestial_requests();
        self.process_chat();
        self.clear_broken_worlds();
        self.handle_world_messages();
        self.shutdown_inactive_worlds();
        self.do_triggered_storage();
        self.flush_world_packets();
        Ok(())
    }

    pub fn stop(self: &Arc<Self>) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn shutdown(self: &Arc<Self>) {
        info!("stopping universe server");
        for client_id in self.client_ids() {
            self.perform_disconnection(client_id, "ServerShutdown".into());
        }
        let worlds: Vec<(WorldId, WorldTrack)> = {
            let mut main = self.main.lock().unwrap();
            main.worlds.drain().collect()
        };
        for (world_id, track) in worlds {
            if let WorldTrack::Ready(world) = track {
                if let Err(e) = world.sync() {
                    error!("failed to sync world {world_id}: {e}");
                }
                world.stop();
            }
        }
        self.save_settings();
        self.save_temp_world_index();
        if let Err(e) = self.celestial.lock().unwrap().commit() {
            error!("celestial commit failed: {e}");
        }
        self.connection_server.stop();
    }

    fn remove_timed_bans(&self) {
        let now = milliseconds_since_epoch();
        self.main
            .lock()
            .unwrap()
            .temp_bans
            .retain(|ban| ban.ban_expiry > now);
    }

    fn update_system_worlds(&self) {
        let mut orbit_updates: Vec<(ConnectionId, Option<WarpAction>, Option<SystemLocation>)> =
            Vec::new();
        {
            let mut main = self.main.lock().unwrap();
            let dt = self.config.main_wakeup_interval as f32 / 1000.0;
            for system in main.system_worlds.values_mut() {
                for client_id in system.update(dt) {
                    orbit_updates.push((
                        client_id,
                        system.client_warp_action(client_id),
                        system.client_ship_location(client_id),
                    ));
                }
            }
        }
        let clients = self.clients.read().unwrap();
        for (client_id, orbit, location) in orbit_updates {
            if let Some(context) = clients.get(client_id) {
                let mut context = context.lock().unwrap();
                context.orbit_warp_action = orbit;
                if let Some(location) = location {
                    context.ship_location = location;
                }
            }
        }
    }

    /// Coalesced universe clock broadcast.
    fn send_clock_updates(&self) {
        let now = monotonic_milliseconds();
        {
            let mut main = self.main.lock().unwrap();
            if now - main.last_clock_update_sent
                < self.config.clock_update_packet_interval as i64
            {
                return;
            }
            main.last_clock_update_sent = now;
        }
        self.broadcast(Packet::UniverseTimeUpdate {
            universe_time: self.universe_clock.time(),
        });
    }

    fn kick_errored_players(&self) {
        let mut errored = Vec::new();
        {
            let main = self.main.lock().unwrap();
            for track in main.worlds.values() {
                if let WorldTrack::Ready(world) = track {
                    errored.extend(world.errored_clients());
                }
            }
        }
        for client_id in errored {
            self.disconnect_client(client_id, "Incoming packet error".into());
        }
    }

    fn reap_connections(&self) {
        for client_id in self.client_ids() {
            if !self.connection_server.connection_alive(client_id) {
                self.disconnect_client(client_id, "Connection lost".into());
            } else if let Some(idle) = self.connection_server.idle_time(client_id) {
                if idle > self.config.connection_timeout as i64 {
                    self.disconnect_client(client_id, "Connection timed out".into());
                }
            }
        }

        let pending: Vec<(ConnectionId, String)> = {
            let mut main = self.main.lock().unwrap();
            main.pending_disconnections.drain().collect()
        };
        for (client_id, reason) in pending {
            self.perform_disconnection(client_id, reason);
        }
    }

    fn perform_disconnection(&self, client_id: ConnectionId, reason: String) {
        let context = {
            let mut clients = self.clients.write().unwrap();
            clients.remove(client_id)
        };
        let Some(context) = context else {
            self.connection_server.remove_connection(client_id);
            return;
        };

        // Pull the player out of their world, flushing final packets
        let world_id = context.lock().unwrap().player_world.clone();
        if let Some(world_id) = world_id {
            if let Some(world) = self.get_world(&world_id) {
                let final_packets = world.remove_client(client_id);
                self.connection_server.send_packets(client_id, final_packets);
            }
        }

        {
            let system_world = context.lock().unwrap().system_world;
            let mut main = self.main.lock().unwrap();
            if let Some(system) =
                system_world.and_then(|location| main.system_worlds.get_mut(&location))
            {
                system.remove_client(client_id);
            }
            main.pending_warps.remove(&client_id);
            main.pending_flights.remove(&client_id);
            main.queued_flights.remove(&client_id);
            main.pending_arrivals.remove(&client_id);
            main.pending_celestial_requests.remove(&client_id);
        }

        self.save_client_context(&context);
        self.connection_server
            .send_packets(client_id, vec![Packet::ServerDisconnect { reason }]);
        self.connection_server.remove_connection(client_id);

        let players = self.number_of_clients() as u16;
        self.broadcast(Packet::ServerInfo {
            players,
            max_players: self.config.max_players as u16,
        });
        info!(
            "client '{}' <{client_id}> disconnected",
            context.lock().unwrap().player_name
        );
    }

    fn process_planet_type_changes(&self) {
        let changes: Vec<(WorldId, String, String)> = {
            let main = self.main.lock().unwrap();
            main.worlds
                .iter()
                .filter_map(|(id, track)| match track {
                    WorldTrack::Ready(world) => world
                        .pull_new_planet_type()
                        .map(|(planet_type, biome)| (id.clone(), planet_type, biome)),
                    _ => None,
                })
                .collect()
        };
        for (world_id, planet_type, _weather_biome) in changes {
            if let WorldId::Celestial(coordinate) = world_id {
                let mut celestial = self.celestial.lock().unwrap();
                if let Some(mut parameters) = celestial.parameters(coordinate) {
                    parameters.world_type = planet_type.clone();
                    if let Err(e) = celestial.update_parameters(coordinate, parameters) {
                        error!("could not update planet type: {e}");
                    }
                }
                drop(celestial);
                self.broadcast(Packet::PlanetTypeUpdate {
                    coordinate,
                    planet_type,
                });
            }
        }
    }

    /// Resolves a warp request to a concrete world and target.
    fn resolve_warp_action(
        &self,
        action: &WarpAction,
        client_id: ConnectionId,
        deploy: bool,
    ) -> Option<WarpToWorld> {
        for hook in self.warp_override_hooks.lock().unwrap().iter() {
            if let Some(overridden) = hook(action, client_id, deploy) {
                return Some(overridden);
            }
        }

        let clients = self.clients.read().unwrap();
        let context = clients.get(client_id)?.lock().unwrap();

        match action {
            WarpAction::ToWorld(to_world) => Some(to_world.clone()),
            WarpAction::ToPlayer { uuid } => {
                drop(context);
                let target_client = clients
                    .iter()
                    .find(|(_, c)| c.lock().unwrap().player_uuid == *uuid)
                    .map(|(id, c)| (id, c.lock().unwrap().player_world.clone()))?;
                let (target_id, world_id) = target_client;
                let world_id = world_id?;
                let world = self.get_world(&world_id)?;
                let position = world.player_revive_position(target_id)?;
                Some(WarpToWorld {
                    world: world_id,
                    target: if deploy {
                        SpawnTarget::Default
                    } else {
                        SpawnTarget::Position { position }
                    },
                })
            }
            WarpAction::Alias { alias } => match alias {
                WarpAlias::Return => context.return_warp.clone(),
                WarpAlias::OrbitedWorld => match context.orbit_warp_action.clone() {
                    Some(WarpAction::ToWorld(to_world)) => Some(to_world),
                    _ => None,
                },
                WarpAlias::OwnShip => Some(WarpToWorld {
                    world: WorldId::ClientShip(context.player_uuid),
                    target: SpawnTarget::Default,
                }),
            },
        }
    }

    fn warp_players(self: &Arc<Self>) {
        let pending: Vec<(ConnectionId, WarpAction, bool)> = {
            let main = self.main.lock().unwrap();
            main.pending_warps
                .iter()
                .map(|(&id, (action, deploy))| (id, action.clone(), *deploy))
                .collect()
        };

        for (client_id, action, deploy) in pending {
            let Some(destination) = self.resolve_warp_action(&action, client_id, deploy) else {
                // Unresolvable actions fall back to the player's own ship
                let mut main = self.main.lock().unwrap();
                if self.clients.read().unwrap().contains(client_id)
                    && !matches!(
                        action,
                        WarpAction::Alias {
                            alias: WarpAlias::OwnShip
                        }
                    )
                {
                    main.pending_warps
                        .insert(client_id, (WarpAction::own_ship(), false));
                } else {
                    main.pending_warps.remove(&client_id);
                }
                continue;
            };

            match self.trigger_world_creation(&destination.world) {
                None => {
                    // Still loading; retry next tick
                }
                Some(None) => {
                    info!(
                        "warp for client {client_id} failed, world {} failed to load",
                        destination.world
                    );
                    self.finish_warp(client_id, &action, false, false);
                    self.fall_back_warp(client_id, &action);
                }
                Some(Some(world)) => {
                    if !world.spawn_target_valid(&destination.target) {
                        info!(
                            "warp for client {client_id} failed, invalid spawn target"
                        );
                        self.finish_warp(client_id, &action, false, true);
                        self.fall_back_warp(client_id, &action);
                        continue;
                    }

                    self.move_client_to_world(client_id, &destination, &world);
                    self.finish_warp(client_id, &action, true, false);
                }
            }
        }
    }

    fn fall_back_warp(&self, client_id: ConnectionId, failed_action: &WarpAction) {
        let fallback = {
            let clients = self.clients.read().unwrap();
            clients
                .get(client_id)
                .and_then(|context| context.lock().unwrap().return_warp.clone())
        };
        let mut main = self.main.lock().unwrap();
        let own_ship = matches!(
            failed_action,
            WarpAction::Alias {
                alias: WarpAlias::OwnShip
            }
        );
        match fallback {
            Some(return_warp) if !own_ship => {
                main.pending_warps
                    .insert(client_id, (WarpAction::ToWorld(return_warp), false));
            }
            _ if !own_ship => {
                main.pending_warps
                    .insert(client_id, (WarpAction::own_ship(), false));
            }
            _ => {
                // Their own ship failed; nothing further to fall back to
                drop(main);
                self.disconnect_client(client_id, "Ship world failed to load".into());
            }
        }
    }

    fn finish_warp(&self, client_id: ConnectionId, action: &WarpAction, success: bool, invalid: bool) {
        self.main.lock().unwrap().pending_warps.remove(&client_id);
        self.connection_server.send_packets(
            client_id,
            vec![Packet::PlayerWarpResult {
                success,
                action: action.clone(),
                warp_action_invalid: invalid,
            }],
        );
    }

    fn move_client_to_world(
        &self,
        client_id: ConnectionId,
        destination: &WarpToWorld,
        world: &Arc<WorldServerThread>,
    ) {
        let (admin, local, net_rules, previous_world) = {
            let clients = self.clients.read().unwrap();
            let Some(context) = clients.get(client_id) else {
                return;
            };
            let context = context.lock().unwrap();
            (
                context.admin,
                context.remote_address.is_none(),
                context.net_rules,
                context.player_world.clone(),
            )
        };

        // Drain the old world first so packet order holds for the client
        if let Some(previous_id) = previous_world {
            if let Some(previous) = self.get_world(&previous_id) {
                let revive = previous.player_revive_position(client_id);
                let final_packets = previous.remove_client(client_id);
                self.connection_server.send_packets(client_id, final_packets);
                if let Some(position) = revive {
                    let clients = self.clients.read().unwrap();
                    if let Some(context) = clients.get(client_id) {
                        context.lock().unwrap().return_warp = Some(WarpToWorld {
                            world: previous_id,
                            target: SpawnTarget::Position { position },
                        });
                    }
                }
            }
        }

        let added = world.add_client(client_id, &destination.target, local, admin, net_rules);
        let clients = self.clients.read().unwrap();
        if let Some(context) = clients.get(client_id) {
            let mut context = context.lock().unwrap();
            if added {
                context.player_world = Some(destination.world.clone());
                if matches!(destination.world, WorldId::ClientShip(_))
                    || matches!(destination.world, WorldId::Celestial(_))
                {
                    context.revive_warp = Some(destination.clone());
                }
            } else {
                context.player_world = None;
            }
        }
    }

    fn fly_ships(self: &Arc<Self>) {
        // Queued in-system follow-up flights depart after a short wait
        {
            let mut main = self.main.lock().unwrap();
            let now = self.universe_clock.time();
            let wait = self.config.queued_flight_wait_time;
            let mut departing = Vec::new();
            for (&client_id, (flight, departure)) in &mut main.queued_flights {
                match departure {
                    None => *departure = Some(now + wait),
                    Some(time) if now >= *time => departing.push((client_id, flight.clone())),
                    _ => {}
                }
            }
            for (client_id, flight) in departing {
                main.queued_flights.remove(&client_id);
                main.pending_flights.insert(client_id, flight);
            }
        }

        let pending: Vec<(ConnectionId, FlightData)> = {
            let mut main = self.main.lock().unwrap();
            let arrivals = main.pending_arrivals.clone();
            main.pending_flights
                .iter()
                .filter(|(id, _)| !arrivals.contains_key(id))
                .map(|(&id, flight)| (id, flight.clone()))
                .collect()
        };

        for (client_id, (system, location, settings)) in pending {
            self.main.lock().unwrap().pending_flights.remove(&client_id);

            let Some(context) = self.clients.read().unwrap().get(client_id).cloned() else {
                continue;
            };
            let (uuid, current_coordinate, current_location) = {
                let context = context.lock().unwrap();
                (
                    context.player_uuid,
                    context.ship_coordinate,
                    context.ship_location.clone(),
                )
            };

            if current_coordinate.location == system && current_location == location {
                continue;
            }

            let interstellar = current_coordinate.location != system;
            if !interstellar {
                if location.is_none() {
                    continue;
                }
                let mut main = self.main.lock().unwrap();
                if let Some(system_world) = main.system_worlds.get_mut(&system) {
                    system_world.set_client_destination(client_id, location.clone());
                }
                continue;
            }

            // Interstellar: detach from the old system and start flying
            {
                let mut main = self.main.lock().unwrap();
                if let Some(old_system) = context
                    .lock()
                    .unwrap()
                    .system_world
                    .and_then(|old| main.system_worlds.get_mut(&old))
                {
                    old_system.remove_client(client_id);
                }
                if !location.is_none() {
                    main.queued_flights.insert(
                        client_id,
                        ((system, location.clone(), settings.clone()), None),
                    );
                }
            }

            let destination = location
                .celestial()
                .unwrap_or(CelestialCoordinate::system(system));
            info!("flying ship for client {client_id} to {destination}");

            match self.trigger_world_creation(&WorldId::ClientShip(uuid)) {
                Some(Some(ship)) => {
                    ship.execute_action(|world: &mut WorldServer| {
                        world.start_flying_sky(true, system == Vec3I::zero(), settings.clone());
                    });
                }
                Some(None) => continue,
                None => {
                    // Ship world still loading; requeue the flight
                    self.main
                        .lock()
                        .unwrap()
                        .pending_flights
                        .insert(client_id, (system, location.clone(), settings.clone()));
                    continue;
                }
            }

            {
                let mut context = context.lock().unwrap();
                context.ship_coordinate = CelestialCoordinate::system(system);
                context.ship_location = SystemLocation::None;
                context.system_world = None;
                context.orbit_warp_action = None;
            }
            self.main
                .lock()
                .unwrap()
                .pending_arrivals
                .insert(client_id, destination);
        }
    }

    fn arrive_ships(self: &Arc<Self>) {
        let arrivals: Vec<(ConnectionId, CelestialCoordinate)> = {
            let main = self.main.lock().unwrap();
            main.pending_arrivals
                .iter()
                .map(|(&id, &coordinate)| (id, coordinate))
                .collect()
        };

        for (client_id, coordinate) in arrivals {
            let Some(context) = self.clients.read().unwrap().get(client_id).cloned() else {
                self.main.lock().unwrap().pending_arrivals.remove(&client_id);
                continue;
            };

            // Worlds at the destination must exist before the ship lands
            if !coordinate.is_system() {
                match self.trigger_world_creation(&WorldId::Celestial(coordinate)) {
                    None => continue,
                    Some(None) => {
                        warn!("arrival world {coordinate} failed to load");
                        self.main.lock().unwrap().pending_arrivals.remove(&client_id);
                        continue;
                    }
                    Some(Some(_)) => {}
                }
            }

            let uuid = context.lock().unwrap().player_uuid;
            let speed = context.lock().unwrap().ship_upgrades.ship_speed;
            let location = if coordinate.is_system() {
                SystemLocation::None
            } else {
                SystemLocation::Celestial { coordinate }
            };

            let (sky, orbit) = {
                let mut main = self.main.lock().unwrap();
                let system = main
                    .system_worlds
                    .entry(coordinate.location)
                    .or_insert_with(|| SystemWorld::new(coordinate.location));
                system.add_client(client_id, uuid, speed, location.clone());
                (
                    system.client_sky_parameters(client_id),
                    system.client_warp_action(client_id),
                )
            };

            {
                let mut context = context.lock().unwrap();
                context.ship_coordinate = coordinate;
                context.ship_location = location;
                context.system_world = Some(coordinate.location);
                context.orbit_warp_action = orbit.clone();
            }

            if let Some(Some(ship)) = self.trigger_world_creation(&WorldId::ClientShip(uuid)) {
                ship.execute_action(|world: &mut WorldServer| {
                    world.stop_flying_sky_at(sky.clone());
                });
                // Everyone on the ship gets the new orbit warp
                let ship_clients = ship.clients();
                let clients = self.clients.read().unwrap();
                for ship_client in ship_clients {
                    if let Some(other) = clients.get(ship_client) {
                        other.lock().unwrap().orbit_warp_action = orbit.clone();
                    }
                }
            }

            info!("ship for client {client_id} arrived at {coordinate}");
            self.main.lock().unwrap().pending_arrivals.remove(&client_id);
        }
    }

    fn respond_to_celestial_requests(&self) {
        let pending: Vec<(ConnectionId, Vec<crate::packets::CelestialRequest>)> = {
            let mut main = self.main.lock().unwrap();
            main.pending_celestial_requests.drain().collect()
        };
        for (client_id, requests) in pending {
            let mut responses = Vec::new();
            let mut celestial = self.celestial.lock().unwrap();
            for request in requests {
                match request {
                    crate::packets::CelestialRequest::System { system } => {
                        let children = celestial.children(CelestialCoordinate::system(system));
                        let parameters: Vec<Json> = children
                            .iter()
                            .filter_map(|&child| {
                                celestial.parameters(child).map(|p| {
                                    serde_json::json!({
                                        "coordinate": child,
                                        "parameters": p,
                                    })
                                })
                            })
                            .collect();
                        responses.push(serde_json::json!({
                            "system": system,
                            "worlds": parameters,
                        }));
                    }
                    crate::packets::CelestialRequest::Chunk { chunk } => {
                        responses.push(serde_json::json!({"chunk": chunk, "systems": []}));
                    }
                }
            }
            drop(celestial);
            self.connection_server.send_packets(
                client_id,
                vec![Packet::CelestialResponse {
                    responses: Json::Array(responses),
                }],
            );
        }
    }

    fn process_chat(&self) {
        let pending: Vec<(ConnectionId, String, ChatSendMode)> = {
            let mut main = self.main.lock().unwrap();
            main.pending_chat.drain(..).collect()
        };
        for (from, text, mode) in pending {
            let Some(from_nick) = self.client_nick(from) else {
                continue;
            };
            let message = Packet::ChatReceive {
                message: ChatMessage {
                    mode,
                    from_connection: from,
                    from_nick,
                    text,
                },
            };
            match mode {
                ChatSendMode::Broadcast | ChatSendMode::Party => self.broadcast(message),
                ChatSendMode::Local => {
                    let world = self.client_world(from);
                    for client_id in self.client_ids() {
                        if self.client_world(client_id) == world {
                            self.connection_server
                                .send_packets(client_id, vec![message.clone()]);
                        }
                    }
                }
            }
        }
    }

    fn clear_broken_worlds(&self) {
        let broken: Vec<WorldId> = {
            let main = self.main.lock().unwrap();
            main.worlds
                .iter()
                .filter_map(|(id, track)| match track {
                    WorldTrack::Ready(world) if world.server_error_occurred() => Some(id.clone()),
                    _ => None,
                })
                .collect()
        };
        for world_id in broken {
            self.world_died_with_error(&world_id);
        }
    }

    fn world_died_with_error(&self, world_id: &WorldId) {
        error!("world {world_id} died with an error");
        let track = self.main.lock().unwrap().worlds.remove(world_id);
        let clients_in_world = match &track {
            Some(WorldTrack::Ready(world)) => {
                world.stop();
                world.clients()
            }
            _ => Vec::new(),
        };

        if let WorldId::ClientShip(uuid) = world_id {
            // A broken ship world cannot be fallen back to
            if let Some(owner) = self.client_for_uuid(*uuid) {
                self.disconnect_client(owner, "Ship world failed".into());
            }
        }
        for client_id in clients_in_world {
            {
                let clients = self.clients.read().unwrap();
                if let Some(context) = clients.get(client_id) {
                    context.lock().unwrap().player_world = None;
                }
            }
            self.client_warp_player(client_id, WarpAction::own_ship(), false);
        }
    }

    fn handle_world_messages(&self) {
        let pending: Vec<(WorldId, Vec<WorldMessage>)> = {
            let mut main = self.main.lock().unwrap();
            main.pending_world_messages.drain().collect()
        };
        for (world_id, messages) in pending {
            match self.trigger_world_creation(&world_id) {
                Some(Some(world)) => world.pass_messages(messages),
                Some(None) => {
                    for message in messages {
                        let _ = message
                            .keeper
                            .fail(format!("world {world_id} failed to load"));
                    }
                }
                None => {
                    // Still loading; requeue
                    self.main
                        .lock()
                        .unwrap()
                        .pending_world_messages
                        .entry(world_id)
                        .or_default()
                        .extend(messages);
                }
            }
        }
    }

    fn shutdown_inactive_worlds(&self) {
        let expiring: Vec<WorldId> = {
            let main = self.main.lock().unwrap();
            let warp_targets: Vec<WorldId> = main
                .pending_warps
                .values()
                .filter_map(|(action, _)| match action {
                    WarpAction::ToWorld(to_world) => Some(to_world.world.clone()),
                    _ => None,
                })
                .collect();
            main.worlds
                .iter()
                .filter_map(|(id, track)| match track {
                    WorldTrack::Ready(world)
                        if world.no_clients()
                            && world.should_expire()
                            && !warp_targets.contains(id) =>
                    {
                        Some(id.clone())
                    }
                    _ => None,
                })
                .collect()
        };

        for world_id in expiring {
            info!("shutting down inactive world {world_id}");
            let track = self.main.lock().unwrap().worlds.remove(&world_id);
            if let Some(WorldTrack::Ready(world)) = track {
                if let WorldId::ClientShip(uuid) = &world_id {
                    self.store_ship_chunks(*uuid, &world);
                } else if let Err(e) = world.sync() {
                    error!("failed to sync world {world_id}: {e}");
                }
                world.stop();
            }
            if let WorldId::Instance(instance) = &world_id {
                if !self.config.instance_world_persistent(&instance.instance) {
                    self.main
                        .lock()
                        .unwrap()
                        .temp_world_index
                        .record_shutdown(
                            instance.clone(),
                            self.config.temp_world_delete_time as i64,
                        );
                }
            }
        }

        // Delete expired temp world files
        let expired: Vec<InstanceWorldId> = {
            let main = self.main.lock().unwrap();
            main.temp_world_index.expired()
        };
        for instance in expired {
            let path = self.temp_world_file(&instance);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("could not delete temp world {}: {e}", path.display());
                }
            }
            self.main
                .lock()
                .unwrap()
                .temp_world_index
                .remove(&instance);
        }
    }

    fn do_triggered_storage(&self) {
        {
            let mut main = self.main.lock().unwrap();
            if monotonic_milliseconds() < main.storage_deadline {
                return;
            }
            main.storage_deadline =
                monotonic_milliseconds() + self.config.universe_storage_interval as i64;
        }

        // Ship chunks fold back into the owning client context first
        let ships: Vec<(Uuid, Arc<WorldServerThread>)> = {
            let main = self.main.lock().unwrap();
            main.worlds
                .iter()
                .filter_map(|(id, track)| match (id, track) {
                    (WorldId::ClientShip(uuid), WorldTrack::Ready(world)) => {
                        Some((*uuid, world.clone()))
                    }
                    _ => None,
                })
                .collect()
        };
        for (uuid, world) in ships {
            self.store_ship_chunks(uuid, &world);
        }

        let contexts: Vec<Arc<Mutex<ClientContext>>> = {
            let clients = self.clients.read().unwrap();
            clients.values().cloned().collect()
        };
        for context in contexts {
            self.save_client_context(&context);
        }

        self.save_settings();
        self.save_temp_world_index();
        if let Err(e) = self.celestial.lock().unwrap().commit() {
            error!("celestial commit failed: {e}");
        }
    }

    fn store_ship_chunks(&self, uuid: Uuid, world: &Arc<WorldServerThread>) {
        match world.read_chunks() {
            Ok(chunks) => {
                if let Some(client_id) = self.client_for_uuid(uuid) {
                    let clients = self.clients.read().unwrap();
                    if let Some(context) = clients.get(client_id) {
                        context.lock().unwrap().ship_chunks = chunks;
                    }
                }
            }
            Err(e) => error!("failed to read ship chunks for {uuid}: {e}"),
        }
    }

    fn save_client_context(&self, context: &Arc<Mutex<ClientContext>>) {
        let context = context.lock().unwrap();
        match context.to_versioned(&self.versioning) {
            Ok(stored) => {
                let path = self.client_context_file(context.player_uuid);
                if let Err(e) = stored.write_file(&path) {
                    error!("failed to write client context {}: {e}", path.display());
                }
            }
            Err(e) => error!("failed to serialize client context: {e}"),
        }
    }

    fn save_settings(&self) {
        let settings = self.settings.lock().unwrap();
        if let Err(e) = settings.save(
            &self.storage_directory.join("universe.dat"),
            self.universe_clock.time(),
        ) {
            error!("failed to save universe settings: {e}");
        }
    }

    fn save_temp_world_index(&self) {
        let main = self.main.lock().unwrap();
        if let Err(e) = main
            .temp_world_index
            .save(&self.storage_directory.join("tempworlds.index"))
        {
            error!("failed to save temp world index: {e}");
        }
    }

    // -- world creation --------------------------------------------------

    fn get_world(&self, world_id: &WorldId) -> Option<Arc<WorldServerThread>> {
        match self.main.lock().unwrap().worlds.get(world_id) {
            Some(WorldTrack::Ready(world)) => Some(world.clone()),
            _ => None,
        }
    }

    /// Kicks off (or polls) world creation.
    ///
    /// - `None`: creation in flight, ask again next tick.
    /// - `Some(None)`: creation failed or the id is invalid.
    /// - `Some(Some(world))`: the running world thread.
    fn trigger_world_creation(&self, world_id: &WorldId) -> Option<Option<Arc<WorldServerThread>>> {
        enum Poll {
            Ready(Arc<WorldServerThread>),
            InFlight,
            Resolved(Option<Arc<WorldServerThread>>, Option<String>),
            Absent,
        }

        let polled = {
            let main = self.main.lock().unwrap();
            match main.worlds.get(world_id) {
                Some(WorldTrack::Ready(world)) => Poll::Ready(world.clone()),
                Some(WorldTrack::Pending(promise)) => {
                    if promise.finished() {
                        Poll::Resolved(promise.result(), promise.error())
                    } else {
                        Poll::InFlight
                    }
                }
                None => Poll::Absent,
            }
        };

        match polled {
            Poll::Ready(world) => Some(Some(world)),
            Poll::InFlight => None,
            Poll::Resolved(Some(world), _) => {
                world.set_pause(self.pause.clone());
                world
                    .timescale_handle()
                    .store(self.timescale.lock().unwrap().to_bits(), Ordering::SeqCst);
                self.main
                    .lock()
                    .unwrap()
                    .worlds
                    .insert(world_id.clone(), WorldTrack::Ready(world.clone()));
                Some(Some(world))
            }
            Poll::Resolved(None, reason) => {
                let reason = reason.unwrap_or_else(|| "unknown error".into());
                error!("world {world_id} failed to load: {reason}");
                self.main.lock().unwrap().worlds.remove(world_id);
                self.world_died_with_error(world_id);
                Some(None)
            }
            Poll::Absent => {
                let Some(promise) = self.make_world_promise(world_id) else {
                    return Some(None);
                };
                self.main
                    .lock()
                    .unwrap()
                    .worlds
                    .insert(world_id.clone(), WorldTrack::Pending(promise));
                None
            }
        }
    }

    fn world_config(&self) -> WorldServerConfig {
        WorldServerConfig {
            fidelity: WorldServerFidelity::from(self.config.world_fidelity),
            lighting: self.config.lighting,
            timestep: self.config.server_global_timestep,
            expiry_time: self.config.world_server_expiry,
            ..WorldServerConfig::default()
        }
    }

    fn temp_world_file(&self, instance: &InstanceWorldId) -> PathBuf {
        self.storage_directory
            .join(format!("{}.tempworld", instance.file_base()))
    }

    fn make_world_promise(
        &self,
        world_id: &WorldId,
    ) -> Option<WorkerPoolPromise<Arc<WorldServerThread>>> {
        let world_config = self.world_config();
        let timestep = self.config.server_global_timestep;
        let clock = self.universe_clock.clone();

        match world_id {
            WorldId::ClientShip(uuid) => {
                let chunks: WorldChunks = {
                    let clients = self.clients.read().unwrap();
                    let context = clients
                        .iter()
                        .find(|(_, c)| c.lock().unwrap().player_uuid == *uuid)
                        .map(|(_, c)| c.lock().unwrap().ship_chunks.clone())?;
                    context
                };
                let uuid = *uuid;
                let world_id = world_id.clone();
                Some(self.worker_pool.add_task(move || {
                    let storage = if chunks.is_empty() {
                        WorldStorage::memory()
                    } else {
                        WorldStorage::from_chunks(chunks)
                    };
                    let template = WorldTemplate::terrestrial(
                        // Ship worlds are small and seeded by their owner
                        u64::from_le_bytes(uuid.as_bytes()[..8].try_into().unwrap_or([0; 8])),
                        &TerrestrialParameters {
                            size: Vec2U::new(512, 256),
                            surface_level: 128,
                            undersurface_level: 100,
                            core_level: 32,
                            ..TerrestrialParameters::default()
                        },
                    );
                    build_world_thread(world_id, template, storage, world_config, timestep, clock)
                }))
            }
            WorldId::Celestial(coordinate) => {
                let parameters = self.celestial.lock().unwrap().parameters(*coordinate)?;
                if !parameters.visitable() {
                    return None;
                }
                let path = self
                    .storage_directory
                    .join(format!("{}.world", coordinate.file_name()));
                let world_id = world_id.clone();
                Some(self.worker_pool.add_task(move || {
                    let storage = open_world_storage(&path)?;
                    let template = WorldTemplate::from_celestial_parameters(parameters);
                    build_world_thread(world_id, template, storage, world_config, timestep, clock)
                }))
            }
            WorldId::Instance(instance) => {
                let persistent = self.config.instance_world_persistent(&instance.instance);
                let path = if persistent {
                    self.storage_directory
                        .join(format!("unique-{}.world", instance.file_base()))
                } else {
                    self.temp_world_file(instance)
                };
                let seed = skyward_core::types::random::static_random_u64(
                    0x1457_ab1e,
                    &[&instance.instance.as_str()],
                );
                let world_id = world_id.clone();
                Some(self.worker_pool.add_task(move || {
                    let storage = open_world_storage(&path)?;
                    let template = WorldTemplate::terrestrial(
                        seed,
                        &TerrestrialParameters {
                            size: Vec2U::new(1000, 1000),
                            surface_level: 500,
                            undersurface_level: 400,
                            core_level: 100,
                            ..TerrestrialParameters::default()
                        },
                    );
                    build_world_thread(world_id, template, storage, world_config, timestep, clock)
                }))
            }
        }
    }

    // -- packet routing --------------------------------------------------

    fn packets_received(self: &Arc<Self>, client_id: ConnectionId, packets: Vec<Packet>) {
        let mut world_packets = Vec::new();
        for packet in packets {
            match packet {
                Packet::ClientDisconnectRequest => {
                    self.disconnect_client(client_id, "Client requested disconnect".into());
                }
                Packet::PlayerWarp { action, deploy } => {
                    self.client_warp_player(client_id, action, deploy);
                }
                Packet::FlyShip {
                    system,
                    location,
                    settings,
                } => {
                    self.client_fly_ship(client_id, system, location, settings);
                }
                Packet::ChatSend { text, mode } => {
                    self.main
                        .lock()
                        .unwrap()
                        .pending_chat
                        .push((client_id, text, mode));
                }
                Packet::CelestialRequest { requests } => {
                    self.main
                        .lock()
                        .unwrap()
                        .pending_celestial_requests
                        .entry(client_id)
                        .or_default()
                        .extend(requests);
                }
                packet @ (Packet::ClientContextUpdate { .. }
                | Packet::EntityCreate { .. }
                | Packet::EntityUpdate { .. }
                | Packet::EntityDestroy { .. }
                | Packet::TileDamageUpdate { .. }) => {
                    world_packets.push(packet);
                }
                other => {
                    warn!(
                        "client {client_id} sent out-of-context packet {:?}",
                        other.packet_type()
                    );
                    self.disconnect_client(client_id, "Protocol error".into());
                    return;
                }
            }
        }

        if !world_packets.is_empty() {
            if let Some(world_id) = self.client_world(client_id) {
                if let Some(world) = self.get_world(&world_id) {
                    world.push_incoming_packets(client_id, world_packets);
                }
            }
        }
    }

    /// Pulls every world's produced packets through to the connections.
    /// Runs as each world's update action in production; tests call it
    /// directly.
    pub fn flush_world_packets(&self) {
        let worlds: Vec<Arc<WorldServerThread>> = {
            let main = self.main.lock().unwrap();
            main.worlds
                .values()
                .filter_map(|track| match track {
                    WorldTrack::Ready(world) => Some(world.clone()),
                    _ => None,
                })
                .collect()
        };
        for world in worlds {
            for client_id in world.clients() {
                let packets = world.pull_outgoing_packets(client_id);
                if !packets.is_empty() {
                    self.connection_server.send_packets(client_id, packets);
                }
            }
        }
    }
}

fn open_world_storage(path: &std::path::Path) -> std::result::Result<WorldStorage, String> {
    match WorldStorage::open(path) {
        Ok(storage) => Ok(storage),
        Err(e) => {
            // Damaged world files move aside and a fresh world substitutes
            warn!("world file {} failed to load: {e}", path.display());
            let _ = fail_rename(path);
            WorldStorage::open(path).map_err(|e| e.to_string())
        }
    }
}

fn build_world_thread(
    world_id: WorldId,
    template: WorldTemplate,
    storage: WorldStorage,
    config: WorldServerConfig,
    timestep: f32,
    clock: Arc<Clock>,
) -> std::result::Result<Arc<WorldServerThread>, String> {
    let mut world = WorldServer::new(world_id.to_string(), template, storage, config)
        .map_err(|e| e.to_string())?;
    world.set_reference_clock(clock);
    let thread = Arc::new(WorldServerThread::new(world, world_id, timestep));
    thread.start();
    Ok(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Duration;

    fn test_config(name: &str) -> ServerConfig {
        let storage = std::env::temp_dir().join(format!(
            "skyward-universe-{}-{name}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&storage).ok();
        ServerConfig {
            storage_directory: storage,
            main_wakeup_interval: 10,
            client_wait_limit: 2000,
            worker_pool_threads: 2,
            network_worker_threads: 1,
            ..ServerConfig::default()
        }
    }

    fn socket_pair() -> (PacketSocket, PacketSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            PacketSocket::open(client).unwrap(),
            PacketSocket::open(server).unwrap(),
        )
    }

    fn client_connect_packet(uuid: Uuid) -> Packet {
        Packet::ClientConnect {
            assets_digest: Vec::new(),
            allow_assets_mismatch: true,
            account: String::new(),
            player_uuid: uuid,
            player_name: "Kestrel".into(),
            player_species: "avian".into(),
            ship_species: "avian".into(),
            ship_chunks: WorldChunks::new(),
            ship_upgrades: Default::default(),
            intro_complete: true,
            info: Json::Null,
        }
    }

    /// Waits for at least one packet, returning everything that arrived.
    fn receive_some(socket: &mut PacketSocket) -> std::result::Result<Vec<Packet>, String> {
        for _ in 0..400 {
            let packets = socket
                .receive_packets(Duration::from_millis(10))
                .map_err(|e| e.to_string())?;
            if !packets.is_empty() {
                return Ok(packets);
            }
        }
        Err("timed out waiting for packet".into())
    }

    fn receive_one(socket: &mut PacketSocket) -> std::result::Result<Packet, String> {
        Ok(receive_some(socket)?.remove(0))
    }

    /// Drives the client half of a successful handshake; returns the
    /// socket and assigned client id.
    fn connect_client(
        universe: &Arc<UniverseServer>,
        uuid: Uuid,
    ) -> std::result::Result<(PacketSocket, ConnectionId), String> {
        let (mut client, server) = socket_pair();
        universe.add_client(server);

        client
            .send_packets(&[Packet::ProtocolRequest {
                protocol_version: PROTOCOL_VERSION,
            }])
            .unwrap();
        let response = receive_one(&mut client)?;
        let Packet::ProtocolResponse { allowed: true, .. } = response else {
            return Err(format!("protocol rejected: {response:?}"));
        };
        client.set_compression(CompressionMode::Zstd).unwrap();

        client.send_packets(&[client_connect_packet(uuid)]).unwrap();
        loop {
            for packet in receive_some(&mut client)? {
                match packet {
                    Packet::ConnectSuccess { client_id, .. } => return Ok((client, client_id)),
                    Packet::ConnectFailure { reason } => return Err(reason),
                    _other => {}
                }
            }
        }
    }

    #[test]
    fn handshake_accepts_valid_clients() {
        let universe = UniverseServer::new(test_config("handshake")).unwrap();
        let (_socket, client_id) = connect_client(&universe, Uuid::new()).unwrap();
        assert!(universe.is_connected_client(client_id));
        assert_eq!(universe.number_of_clients(), 1);
    }

    #[test]
    fn handshake_rejects_bad_protocol_version() {
        let universe = UniverseServer::new(test_config("protocol")).unwrap();
        let (mut client, server) = socket_pair();
        universe.add_client(server);

        client
            .send_packets(&[Packet::ProtocolRequest {
                protocol_version: 9999,
            }])
            .unwrap();
        let response = receive_one(&mut client).unwrap();
        assert_eq!(
            response,
            Packet::ProtocolResponse {
                allowed: false,
                info: Json::Null
            }
        );
    }

    #[test]
    fn duplicate_uuid_is_rejected_for_non_admins() {
        let universe = UniverseServer::new(test_config("duplicate")).unwrap();
        let uuid = Uuid::new();
        let (_first, _) = connect_client(&universe, uuid).unwrap();
        let error = connect_client(&universe, uuid).unwrap_err();
        assert!(error.contains("Duplicate"), "{error}");
    }

    #[test]
    fn ban_round_trip_blocks_then_allows() {
        let universe = UniverseServer::new(test_config("bans")).unwrap();
        let uuid = Uuid::new();
        let (_socket, client_id) = connect_client(&universe, uuid).unwrap();

        universe.ban_user(client_id, "x".into(), false, true, None);
        for _ in 0..5 {
            universe.tick().unwrap();
        }
        assert!(!universe.is_connected_client(client_id));

        let error = connect_client(&universe, uuid).unwrap_err();
        assert!(error.starts_with("You are banned"), "{error}");

        assert!(universe.unban_uuid(&uuid.hex()));
        let (_socket, _id) = connect_client(&universe, uuid).unwrap();
    }

    #[test]
    fn warp_fallback_lands_players_on_their_ship() {
        let universe = UniverseServer::new(test_config("warp")).unwrap();
        let uuid = Uuid::new();
        let (mut socket, client_id) = connect_client(&universe, uuid).unwrap();

        // The connect path queues a warp to the player's own ship; run
        // ticks until the ship world loads and the warp resolves.
        let mut result = None;
        for _ in 0..600 {
            universe.tick().unwrap();
            universe.flush_world_packets();
            if let Ok(packets) = socket.receive_packets(Duration::from_millis(5)) {
                for packet in packets {
                    if let Packet::PlayerWarpResult { success, .. } = packet {
                        result = Some(success);
                    }
                }
            }
            if result.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(result, Some(true), "player eventually lands on a world");
        assert_eq!(
            universe.client_world(client_id),
            Some(WorldId::ClientShip(uuid))
        );
        let active = universe.active_worlds();
        assert_eq!(active, vec![WorldId::ClientShip(uuid)]);
    }
}
