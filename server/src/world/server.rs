//! The per-world simulation.

use crate::client_context::WorldChunks;
use crate::config::WorldFidelity;
use crate::error::{Result, ServerError};
use crate::packets::{NetCompatibilityRules, Packet};
use crate::warping::SpawnTarget;
use crate::world::damage::{DamageManager, NotificationRouter};
use crate::world::dungeon::{
    DungeonDefinition, DungeonGenerator, DungeonGeneratorWorldFacade,
};
use crate::world::entities::{Entity, EntityMap, EntityType};
use crate::world::falling_blocks::{FallingBlocksAgent, FallingBlocksWorld};
use crate::world::liquids::{LiquidCell, LiquidCellEngine, LiquidWorld};
use crate::world::sectors::{SectorId, TileSectorArray, SECTOR_SIZE};
use crate::world::sky::{Sky, SkyParameters};
use crate::world::spawner::{SpawnProfile, Spawner, SpawnerWorld};
use crate::world::storage::{WorldStorage, WORLD_METADATA_KIND, WORLD_METADATA_VERSION};
use crate::world::structures::WorldStructure;
use crate::world::template::WorldTemplate;
use crate::world::weather::ServerWeather;
use crate::world::wires::WireProcessor;
use log::{debug, error, info, warn};
use serde_json::Value as Json;
use skyward_core::geometry::WorldGeometry;
use skyward_core::lighting::{Cell, LightIntensityCalculator, LightingConfig};
use skyward_core::math::{PolyF, RectF, RectI, Vec2F, Vec2I};
use skyward_core::types::game::{
    connection_entity_space, ConnectionId, DamageTeam, EntityId,
};
use skyward_core::types::liquid::{LiquidStore, EMPTY_LIQUID_ID};
use skyward_core::types::material::{
    is_real_material, MaterialColorVariant, MaterialHue, MaterialId, ModId, EMPTY_MATERIAL_ID,
    NO_MOD_ID, NULL_MATERIAL_ID,
};
use skyward_core::types::rpc_promise::{RpcPromise, RpcThreadPromise, RpcThreadPromiseKeeper};
use skyward_core::types::tile::{
    DungeonId, ServerTile, TileLayer, TileModification, BIOME_MICRO_DUNGEON_ID, NO_DUNGEON_ID,
    SPAWN_DUNGEON_ID,
};
use skyward_core::types::time::{Clock, GameTimer};
use skyward_core::types::versioning::VersionedJson;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// How much optional per-tick processing a world performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldServerFidelity {
    Minimum,
    Low,
    Medium,
    High,
}

impl From<WorldFidelity> for WorldServerFidelity {
    fn from(fidelity: WorldFidelity) -> Self {
        match fidelity {
            WorldFidelity::Minimum => WorldServerFidelity::Minimum,
            WorldFidelity::Low => WorldServerFidelity::Low,
            WorldFidelity::Medium => WorldServerFidelity::Medium,
            WorldFidelity::High => WorldServerFidelity::High,
        }
    }
}

/// Per-phase stride table: `(enabled, every n ticks)`.
struct TimingPlan {
    entries: HashMap<&'static str, (bool, u64)>,
    last_run: HashMap<&'static str, u64>,
}

impl TimingPlan {
    fn for_fidelity(fidelity: WorldServerFidelity) -> TimingPlan {
        let entries: HashMap<&'static str, (bool, u64)> = match fidelity {
            WorldServerFidelity::Minimum => [
                ("liquid", (false, 1)),
                ("wires", (false, 1)),
                ("fallingBlocks", (false, 1)),
                ("spawner", (false, 1)),
            ],
            WorldServerFidelity::Low => [
                ("liquid", (true, 4)),
                ("wires", (true, 4)),
                ("fallingBlocks", (false, 1)),
                ("spawner", (true, 8)),
            ],
            WorldServerFidelity::Medium => [
                ("liquid", (true, 2)),
                ("wires", (true, 2)),
                ("fallingBlocks", (true, 2)),
                ("spawner", (true, 4)),
            ],
            WorldServerFidelity::High => [
                ("liquid", (true, 1)),
                ("wires", (true, 1)),
                ("fallingBlocks", (true, 1)),
                ("spawner", (true, 2)),
            ],
        }
        .into_iter()
        .collect();
        TimingPlan {
            entries,
            last_run: HashMap::new(),
        }
    }

    /// Ticks elapsed since the phase last ran, when it should run now.
    fn should_run_this_step(&mut self, name: &'static str, step: u64) -> Option<u64> {
        let (enabled, ratio) = *self.entries.get(name)?;
        if !enabled {
            return None;
        }
        let last = self.last_run.get(name).copied();
        match last {
            Some(last) if step < last + ratio => None,
            _ => {
                self.last_run.insert(name, step);
                Some(last.map(|l| step - l).unwrap_or(1))
            }
        }
    }
}

/// A script call-out context attached to the world; the sandbox itself is
/// external.
pub trait ScriptContext: Send {
    fn init(&mut self) {}
    fn update(&mut self, _dt: f32) {}
    fn uninit(&mut self) {}
    /// Returns a reply when the context handles the message.
    fn handle_message(&mut self, message: &str, args: &[Json]) -> Option<Json>;
}

/// Tuning a world server is constructed with.
#[derive(Debug, Clone)]
pub struct WorldServerConfig {
    pub fidelity: WorldServerFidelity,
    pub lighting: LightingConfig,
    /// Seconds per tick.
    pub timestep: f32,
    /// Seconds an empty world lingers before it expires.
    pub expiry_time: f32,
    /// Half-extent of a client's visible window around its player.
    pub client_window_size: Vec2F,
    /// Extra monitoring border around client windows.
    pub client_window_border: f32,
    /// Liquid cells processed per engine step.
    pub liquid_cells_per_step: usize,
    /// Ticks an untouched sector stays loaded.
    pub sector_time_to_live: u64,
}

impl Default for WorldServerConfig {
    fn default() -> Self {
        WorldServerConfig {
            fidelity: WorldServerFidelity::Medium,
            lighting: LightingConfig::default(),
            timestep: 1.0 / 20.0,
            expiry_time: 30.0,
            client_window_size: Vec2F::new(48.0, 32.0),
            client_window_border: 16.0,
            liquid_cells_per_step: 256,
            sector_time_to_live: 600,
        }
    }
}

struct ClientInfo {
    client_id: ConnectionId,
    net_rules: NetCompatibilityRules,
    admin: bool,
    local: bool,
    started: bool,
    player_entity: EntityId,
    window: RectF,
    outgoing: Vec<Packet>,
    slave_versions: HashMap<EntityId, u64>,
    pending_tile_updates: HashSet<Vec2I>,
    pending_liquid_updates: HashSet<Vec2I>,
    pending_tile_damage_updates: HashSet<(Vec2I, TileLayer)>,
    active_sectors: HashSet<SectorId>,
    sky_net_version: u64,
    weather_net_version: u64,
}

type WorldAction = Box<dyn FnOnce(&mut WorldServer) + Send>;

struct QueuedDungeonPlacement {
    dungeon_name: String,
    position: Vec2I,
    dungeon_id: Option<DungeonId>,
    keeper: RpcThreadPromiseKeeper<Vec2I>,
}

/// A single world's tile and entity simulation, stepped by its owning
/// thread.
pub struct WorldServer {
    world_id: String,
    config: WorldServerConfig,
    timing: TimingPlan,

    template: WorldTemplate,
    geometry: WorldGeometry,
    tiles: TileSectorArray,
    storage: WorldStorage,
    entities: EntityMap,

    clients: BTreeMap<ConnectionId, ClientInfo>,
    current_step: u64,
    current_time: f64,
    reference_clock: Option<Arc<Clock>>,

    sky: Sky,
    weather: ServerWeather,
    liquid_engine: LiquidCellEngine,
    wire_processor: WireProcessor,
    falling_blocks: FallingBlocksAgent,
    spawner: Spawner,
    damage_manager: DamageManager,
    notifications: NotificationRouter,

    protected_dungeon_ids: HashSet<DungeonId>,
    tile_protection_enabled: bool,
    dungeon_gravity: HashMap<DungeonId, f32>,
    dungeon_breathable: HashMap<DungeonId, bool>,
    dungeon_definitions: HashMap<String, Arc<DungeonDefinition>>,
    next_dungeon_id: DungeonId,
    pending_dungeon_placements: VecDeque<QueuedDungeonPlacement>,

    central_structure: Option<WorldStructure>,
    player_start: Vec2F,
    respawn_in_world: bool,
    world_properties: serde_json::Map<String, Json>,
    script_contexts: HashMap<String, Box<dyn ScriptContext>>,

    timers: Vec<(f32, WorldAction)>,
    net_state_cache: HashMap<(NetCompatibilityRules, EntityId, u64), Arc<Vec<u8>>>,
    marked_regions: Vec<RectI>,
    new_planet_type: Option<(String, String)>,
    needs_global_break_check: bool,

    expiry_timer: GameTimer,
}

impl WorldServer {
    /// Creates a world over existing (possibly empty) storage. Fresh
    /// worlds derive their player start from the template; loaded worlds
    /// read their metadata back.
    pub fn new(
        world_id: String,
        template: WorldTemplate,
        storage: WorldStorage,
        config: WorldServerConfig,
    ) -> Result<WorldServer> {
        let geometry = WorldGeometry::new(template.size());
        let entity_space = connection_entity_space(0);
        let mut server = WorldServer {
            geometry,
            tiles: TileSectorArray::new(template.size()),
            entities: EntityMap::new(geometry, entity_space.0, entity_space.1),
            timing: TimingPlan::for_fidelity(config.fidelity),
            liquid_engine: LiquidCellEngine::new(config.liquid_cells_per_step),
            expiry_timer: GameTimer::new(config.expiry_time),
            spawner: Spawner::new(template.seed()),
            weather: ServerWeather::new(),
            sky: Sky::new(SkyParameters::default()),
            wire_processor: WireProcessor::new(),
            falling_blocks: FallingBlocksAgent::new(),
            damage_manager: DamageManager::new(),
            notifications: NotificationRouter::default(),
            clients: BTreeMap::new(),
            current_step: 0,
            current_time: 0.0,
            reference_clock: None,
            protected_dungeon_ids: HashSet::new(),
            tile_protection_enabled: true,
            dungeon_gravity: HashMap::new(),
            dungeon_breathable: HashMap::new(),
            dungeon_definitions: HashMap::new(),
            next_dungeon_id: 1,
            pending_dungeon_placements: VecDeque::new(),
            central_structure: None,
            player_start: Vec2F::zero(),
            respawn_in_world: false,
            world_properties: serde_json::Map::new(),
            script_contexts: HashMap::new(),
            timers: Vec::new(),
            net_state_cache: HashMap::new(),
            marked_regions: Vec::new(),
            new_planet_type: None,
            needs_global_break_check: false,
            world_id,
            config,
            template,
            storage,
        };
        server.init()?;
        Ok(server)
    }

    fn init(&mut self) -> Result<()> {
        match self.storage.metadata()? {
            Some(stored) => self.read_metadata(stored)?,
            None => {
                let start = self
                    .template
                    .find_sensible_player_start()
                    .map(|p| p.to_f32() + Vec2F::new(0.0, 1.0))
                    .unwrap_or_else(|| {
                        Vec2F::new(
                            self.template.size().x() as f32 / 2.0,
                            self.template.surface_level(),
                        )
                    });
                self.player_start = start;
                self.write_metadata()?;
            }
        }
        Ok(())
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    pub fn geometry(&self) -> WorldGeometry {
        self.geometry
    }

    pub fn template(&self) -> &WorldTemplate {
        &self.template
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn epoch_time(&self) -> f64 {
        self.current_time
    }

    pub fn day_length(&self) -> f32 {
        self.template.day_length()
    }

    /// Fraction of the current day, in `[0, 1)`.
    pub fn time_of_day(&self) -> f32 {
        (self.current_time % self.day_length() as f64) as f32 / self.day_length()
    }

    pub fn is_day(&self) -> bool {
        self.time_of_day() < 0.5
    }

    pub fn set_reference_clock(&mut self, clock: Arc<Clock>) {
        self.current_time = clock.time();
        self.weather.set_reference_clock(Some(clock.clone()));
        self.reference_clock = Some(clock);
    }

    pub fn fidelity(&self) -> WorldServerFidelity {
        self.config.fidelity
    }

    pub fn set_fidelity(&mut self, fidelity: WorldServerFidelity) {
        self.config.fidelity = fidelity;
        self.timing = TimingPlan::for_fidelity(fidelity);
    }

    pub fn register_dungeon_definition(&mut self, definition: Arc<DungeonDefinition>) {
        self.dungeon_definitions
            .insert(definition.name().to_string(), definition);
    }

    pub fn add_script_context(&mut self, name: impl Into<String>, mut context: Box<dyn ScriptContext>) {
        context.init();
        self.script_contexts.insert(name.into(), context);
    }

    pub fn player_start(&self) -> Vec2F {
        self.player_start
    }

    pub fn set_player_start(&mut self, position: Vec2F, respawn_in_world: bool) {
        self.player_start = position;
        self.respawn_in_world = respawn_in_world;
    }

    pub fn get_property(&self, name: &str) -> Option<&Json> {
        self.world_properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Json) {
        self.world_properties.insert(name.into(), value);
    }

    // -- clients ---------------------------------------------------------

    /// Whether a spawn target resolves to a placeable position.
    pub fn spawn_target_valid(&mut self, target: &SpawnTarget) -> bool {
        self.resolve_spawn_target(target).is_some()
    }

    fn resolve_spawn_target(&mut self, target: &SpawnTarget) -> Option<Vec2F> {
        match target {
            SpawnTarget::Default => Some(self.player_start),
            SpawnTarget::Position { position } => {
                let tile = self.geometry.xwrap(*position).floor_vec();
                self.signal_region(RectI::with_size(tile, Vec2I::new(1, 1)));
                let info = self.tiles.tile(tile);
                (!info.collision.is_solid()).then_some(*position)
            }
            SpawnTarget::UniqueEntity { unique_id } => self
                .entities
                .unique_entity(unique_id)
                .and_then(|id| self.entities.get(id))
                .map(|entity| entity.position),
            SpawnTarget::X { x } => {
                let x = self.geometry.xwrap_f(*x);
                Some(Vec2F::new(x, self.template.surface_level()))
            }
        }
    }

    /// Adds a client at a spawn target. False when the id is already
    /// present or the target is invalid.
    pub fn add_client(
        &mut self,
        client_id: ConnectionId,
        target: &SpawnTarget,
        local: bool,
        admin: bool,
        net_rules: NetCompatibilityRules,
    ) -> bool {
        if self.clients.contains_key(&client_id) {
            return false;
        }
        let Some(position) = self.resolve_spawn_target(target) else {
            return false;
        };

        let mut player = Entity::new(EntityType::Player, position);
        player.keep_alive = true;
        let player_entity = match self.entities.add_entity(player) {
            Ok(id) => id,
            Err(e) => {
                error!("failed to add player entity for client {client_id}: {e}");
                return false;
            }
        };

        let window = RectF::with_size(
            position - self.config.client_window_size,
            self.config.client_window_size * 2.0,
        );

        let mut info = ClientInfo {
            client_id,
            net_rules,
            admin,
            local,
            started: false,
            player_entity,
            window,
            outgoing: Vec::new(),
            slave_versions: HashMap::new(),
            pending_tile_updates: HashSet::new(),
            pending_liquid_updates: HashSet::new(),
            pending_tile_damage_updates: HashSet::new(),
            active_sectors: HashSet::new(),
            sky_net_version: 0,
            weather_net_version: 0,
        };

        let template_data = self.template.to_store().unwrap_or(Json::Null);
        info.outgoing.push(Packet::WorldStart {
            template_data,
            sky_data: serde_json::to_vec(&self.sky.net_state()).unwrap_or_default(),
            weather_data: Vec::new(),
            player_start: position,
            player_respawn: self.player_start,
            respawn_in_world: self.respawn_in_world,
            world_properties: Json::Object(self.world_properties.clone()),
            client_id,
        });
        info.started = true;

        self.notifications.add_client(client_id);
        self.clients.insert(client_id, info);
        self.expiry_timer.reset();
        info!(
            "world {}: added client {client_id} at {position:?}",
            self.world_id
        );
        true
    }

    /// Removes a client, returning its final packets (ending in
    /// `WorldStop`).
    pub fn remove_client(&mut self, client_id: ConnectionId) -> Vec<Packet> {
        let Some(mut info) = self.clients.remove(&client_id) else {
            return Vec::new();
        };
        self.notifications.remove_client(client_id);
        self.entities.remove_entity(info.player_entity);
        // Client-authoritative entities leave with their owner
        let (start, end) = connection_entity_space(client_id);
        for id in self.entities.ids() {
            if id <= start && id >= end {
                self.entities.remove_entity(id);
            }
        }

        let mut packets = std::mem::take(&mut info.outgoing);
        packets.push(Packet::WorldStop {
            reason: "Removed".into(),
        });
        info!("world {}: removed client {client_id}", self.world_id);
        packets
    }

    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    pub fn has_client(&self, client_id: ConnectionId) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn no_clients(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client_window(&self, client_id: ConnectionId) -> Option<RectF> {
        self.clients.get(&client_id).map(|c| c.window)
    }

    /// The player's revive position in this world, used as a return warp.
    pub fn player_revive_position(&self, client_id: ConnectionId) -> Option<Vec2F> {
        let info = self.clients.get(&client_id)?;
        self.entities
            .get(info.player_entity)
            .map(|entity| entity.position)
    }

    pub fn get_outgoing_packets(&mut self, client_id: ConnectionId) -> Vec<Packet> {
        self.clients
            .get_mut(&client_id)
            .map(|info| std::mem::take(&mut info.outgoing))
            .unwrap_or_default()
    }

    pub fn send_packet(&mut self, client_id: ConnectionId, packet: Packet) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(info) => {
                info.outgoing.push(packet);
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, packet: Packet) {
        for info in self.clients.values_mut() {
            info.outgoing.push(packet.clone());
        }
    }

    /// Processes one client's inbound packets. An error marks the client
    /// errored at the thread layer; no further packets are handled.
    pub fn handle_incoming_packets(
        &mut self,
        client_id: ConnectionId,
        packets: Vec<Packet>,
    ) -> Result<()> {
        for packet in packets {
            match packet {
                Packet::ClientContextUpdate { update } => {
                    self.handle_client_context_update(client_id, &update)?;
                }
                Packet::EntityCreate {
                    entity_type,
                    entity_id,
                    store_data,
                    ..
                } => {
                    self.handle_client_entity_create(
                        client_id,
                        entity_type,
                        entity_id,
                        &store_data,
                    )?;
                }
                Packet::EntityUpdate {
                    entity_id,
                    version,
                    delta,
                } => {
                    self.handle_client_entity_update(client_id, entity_id, version, &delta)?;
                }
                Packet::EntityDestroy { entity_id, .. } => {
                    let (start, end) = connection_entity_space(client_id);
                    if entity_id > start || entity_id < end {
                        return Err(ServerError::protocol(format!(
                            "client {client_id} destroyed entity {entity_id} outside its space"
                        )));
                    }
                    self.entities.remove_entity(entity_id);
                    self.broadcast_entity_destroy(entity_id, false);
                }
                other => {
                    return Err(ServerError::protocol(format!(
                        "world received unexpected packet kind {:?} from client {client_id}",
                        other.packet_type()
                    )));
                }
            }
        }
        Ok(())
    }

    fn handle_client_context_update(
        &mut self,
        client_id: ConnectionId,
        update: &Json,
    ) -> Result<()> {
        let Some(info) = self.clients.get_mut(&client_id) else {
            return Ok(());
        };
        if let Some(window) = update.get("window") {
            let window: RectF = serde_json::from_value(window.clone())
                .map_err(|e| ServerError::protocol(format!("bad window update: {e}")))?;
            info.window = window;
        }
        if let Some(position) = update.get("playerPosition") {
            let position: Vec2F = serde_json::from_value(position.clone())
                .map_err(|e| ServerError::protocol(format!("bad position update: {e}")))?;
            let player = info.player_entity;
            if let Some(entity) = self.entities.get_mut(player) {
                entity.position = position;
            }
        }
        Ok(())
    }

    fn handle_client_entity_create(
        &mut self,
        client_id: ConnectionId,
        entity_type: u8,
        entity_id: EntityId,
        store_data: &[u8],
    ) -> Result<()> {
        let (start, end) = connection_entity_space(client_id);
        if entity_id > start || entity_id < end {
            return Err(ServerError::protocol(format!(
                "client {client_id} created entity {entity_id} outside its space [{start}, {end}]"
            )));
        }
        let entity_type = match entity_type {
            1 => EntityType::Monster,
            3 => EntityType::Object,
            4 => EntityType::ItemDrop,
            5 => EntityType::Projectile,
            6 => EntityType::Vehicle,
            _ => EntityType::Effect,
        };
        let mut entity = Entity::new(entity_type, Vec2F::zero());
        entity.id = entity_id;
        entity.master = false;
        entity.store = serde_json::from_slice(store_data).unwrap_or(Json::Null);
        self.entities
            .add_entity(entity)
            .map_err(|e| ServerError::protocol(format!("client entity rejected: {e}")))?;
        Ok(())
    }

    fn handle_client_entity_update(
        &mut self,
        client_id: ConnectionId,
        entity_id: EntityId,
        version: u64,
        delta: &[u8],
    ) -> Result<()> {
        let (start, end) = connection_entity_space(client_id);
        if entity_id > start || entity_id < end {
            return Err(ServerError::protocol(format!(
                "client {client_id} updated entity {entity_id} outside its space"
            )));
        }
        if let Some(entity) = self.entities.get_mut(entity_id) {
            // Slaves apply only non-stale updates
            if version >= entity.version {
                entity.version = version;
                if let Ok(store) = serde_json::from_slice::<Json>(delta) {
                    if let Some(position) = store.get("position") {
                        if let Ok(position) = serde_json::from_value::<Vec2F>(position.clone()) {
                            entity.position = position;
                        }
                    }
                    entity.store = store;
                }
            }
        }
        Ok(())
    }

    // -- entities --------------------------------------------------------

    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId> {
        let id = self.entities.add_entity(entity)?;
        self.broadcast_entity_create(id);
        Ok(id)
    }

    /// Removes an entity; `die` broadcasts a death notification instead
    /// of a silent removal.
    pub fn remove_entity(&mut self, entity_id: EntityId, die: bool) -> Option<Entity> {
        let entity = self.entities.remove_entity(entity_id)?;
        self.broadcast_entity_destroy(entity_id, die);
        Some(entity)
    }

    pub fn entity(&self, entity_id: EntityId) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn entity_mut(&mut self, entity_id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn broadcast_entity_create(&mut self, entity_id: EntityId) {
        let Some(entity) = self.entities.get(entity_id) else {
            return;
        };
        let packet = Packet::EntityCreate {
            entity_type: entity.entity_type as u8,
            entity_id,
            store_data: serde_json::to_vec(&entity.store).unwrap_or_default(),
            first_net_state: Vec::new(),
        };
        let visible = entity.bound_box();
        let geometry = self.geometry;
        for info in self.clients.values_mut() {
            if geometry.rect_intersects_rect(&info.window, &visible) {
                info.slave_versions.insert(entity_id, 0);
                info.outgoing.push(packet.clone());
            }
        }
    }

    fn broadcast_entity_destroy(&mut self, entity_id: EntityId, death: bool) {
        for info in self.clients.values_mut() {
            if info.slave_versions.remove(&entity_id).is_some() {
                info.outgoing.push(Packet::EntityDestroy {
                    entity_id,
                    death,
                    final_net_state: Vec::new(),
                });
            }
        }
    }

    /// Resolves a unique id to its position as a promise.
    pub fn find_unique_entity(&mut self, unique_id: &str) -> RpcPromise<Vec2F> {
        match self
            .entities
            .unique_entity(unique_id)
            .and_then(|id| self.entities.get(id))
        {
            Some(entity) => RpcPromise::fulfilled(entity.position),
            None => RpcPromise::failed(format!("unknown unique entity '{unique_id}'")),
        }
    }

    /// Delivers a message to an entity (by id or unique id) through its
    /// script context, returning the reply as a promise.
    pub fn send_entity_message(
        &mut self,
        target: &str,
        message: &str,
        args: &[Json],
    ) -> RpcPromise<Json> {
        let entity_id = match target.parse::<EntityId>() {
            Ok(id) => Some(id),
            Err(_) => self.entities.unique_entity(target),
        };
        let Some(entity_id) = entity_id else {
            return RpcPromise::failed(format!("unknown entity '{target}'"));
        };
        if !self.entities.contains(entity_id) {
            return RpcPromise::failed(format!("unknown entity '{target}'"));
        }
        // Entity scripts route through the world's script contexts
        for context in self.script_contexts.values_mut() {
            if let Some(reply) = context.handle_message(message, args) {
                return RpcPromise::fulfilled(reply);
            }
        }
        RpcPromise::fulfilled(Json::Null)
    }

    /// Handles a world message from the universe server.
    pub fn receive_message(&mut self, message: &str, args: &[Json]) -> Option<Json> {
        for context in self.script_contexts.values_mut() {
            if let Some(reply) = context.handle_message(message, args) {
                return Some(reply);
            }
        }
        None
    }

    // -- sky -------------------------------------------------------------

    pub fn start_flying_sky(&mut self, interstellar: bool, start_in_warp: bool, settings: Json) {
        self.sky.start_flying(interstellar, start_in_warp, settings);
    }

    pub fn stop_flying_sky_at(&mut self, destination: SkyParameters) {
        self.sky.stop_flying_at(destination);
    }

    pub fn set_orbital_sky(&mut self, parameters: SkyParameters) {
        self.sky.set_orbital(parameters);
    }

    pub fn sky(&self) -> &Sky {
        &self.sky
    }

    pub fn weather_mut(&mut self) -> &mut ServerWeather {
        &mut self.weather
    }

    pub fn set_weather(&mut self, name: &str, force: bool) {
        self.weather.set_weather(name, force);
    }

    pub fn weather_list(&self) -> Vec<String> {
        self.weather.weather_list()
    }

    /// Changes the planet type; the universe server pulls the change and
    /// updates the celestial database.
    pub fn set_planet_type(&mut self, planet_type: &str, weather_biome: &str) {
        self.new_planet_type = Some((planet_type.to_string(), weather_biome.to_string()));
    }

    pub fn pull_new_planet_type(&mut self) -> Option<(String, String)> {
        self.new_planet_type.take()
    }

    // -- lighting --------------------------------------------------------

    /// Light intensity at a world position, from ambient sky light over
    /// non-obstacle cells above the undersurface plus nearby glowing
    /// liquids, attenuated through the cellular pipeline.
    pub fn light_level(&mut self, position: Vec2F) -> f32 {
        let ambient = if self.is_day() { 1.0 } else { 0.25 };
        let undersurface = self.template.undersurface_level();

        let mut calculator = LightIntensityCalculator::new(self.config.lighting);
        calculator.begin(self.geometry.xwrap(position));
        let region = calculator.calculation_region();
        self.signal_region(region);

        for cell_position in region.positions() {
            let tile = self.tiles.tile(cell_position);
            let lit = !tile.obstacle && cell_position.y() as f32 >= undersurface;
            calculator.set_cell(
                cell_position,
                Cell {
                    light: if lit { ambient } else { 0.0 },
                    obstacle: tile.obstacle,
                },
            );
        }

        calculator.calculate()
    }

    // -- central structure -----------------------------------------------

    /// Gives the world its central structure at `position`, removing any
    /// previous one first. Returns the structure with its coordinates
    /// translated into world space.
    pub fn set_central_structure(
        &mut self,
        structure: WorldStructure,
        position: Vec2I,
    ) -> WorldStructure {
        self.remove_central_structure();

        let mut placed = structure.translated_to(position);
        self.signal_region(placed.region());

        for block in &placed.blocks {
            let block_position = self.geometry.xwrap_vec_i(block.position);
            if let Some(tile) = self.tiles.tile_mut(block_position) {
                let state = tile.layer_mut(block.layer);
                state.material = block.material;
                if block.layer == TileLayer::Foreground {
                    tile.update_collision(
                        skyward_core::types::collision::CollisionKind::Block,
                    );
                }
            }
            self.queue_tile_update(block_position);
        }

        let objects = placed.objects.clone();
        for object in &objects {
            let mut entity = Entity::new(EntityType::Object, object.position.to_f32());
            entity.store = serde_json::json!({
                "objectName": object.name,
                "direction": object.direction,
                "parameters": object.parameters,
            });
            let entity_id = match self.add_entity(entity) {
                Ok(id) => id,
                Err(e) => {
                    warn!("central structure object '{}' rejected: {e}", object.name);
                    0
                }
            };
            placed.placed_object_entities.push(entity_id);
        }

        self.central_structure = Some(placed.clone());
        placed
    }

    pub fn central_structure(&self) -> Option<&WorldStructure> {
        self.central_structure.as_ref()
    }

    /// Removes the central structure, erasing only the blocks and objects
    /// it introduced that are not residual.
    pub fn remove_central_structure(&mut self) {
        let Some(structure) = self.central_structure.take() else {
            return;
        };

        let removable: Vec<Vec2I> = structure
            .removable_blocks()
            .map(|block| self.geometry.xwrap_vec_i(block.position))
            .collect();
        for (block, position) in structure.removable_blocks().zip(removable.iter()) {
            if let Some(tile) = self.tiles.tile_mut(*position) {
                let state = tile.layer_mut(block.layer);
                state.material = EMPTY_MATERIAL_ID;
                if block.layer == TileLayer::Foreground {
                    tile.update_collision(
                        skyward_core::types::collision::CollisionKind::None,
                    );
                }
            }
            self.queue_tile_update(*position);
        }

        for (object, &entity_id) in structure
            .objects
            .iter()
            .zip(structure.placed_object_entities.iter())
        {
            if !object.residual && entity_id != 0 {
                self.remove_entity(entity_id, false);
            }
        }
    }

    // -- protection and tile modification --------------------------------

    pub fn get_tile_protection(&self, dungeon_id: DungeonId) -> bool {
        self.protected_dungeon_ids.contains(&dungeon_id)
    }

    pub fn set_tile_protection(&mut self, dungeon_id: DungeonId, protected: bool) {
        if protected {
            self.protected_dungeon_ids.insert(dungeon_id);
        } else {
            self.protected_dungeon_ids.remove(&dungeon_id);
        }
    }

    /// Bulk protection set; returns how many entries changed.
    pub fn set_tile_protection_bulk(
        &mut self,
        dungeon_ids: &[DungeonId],
        protected: bool,
    ) -> usize {
        let mut changed = 0;
        for &dungeon_id in dungeon_ids {
            let flipped = if protected {
                self.protected_dungeon_ids.insert(dungeon_id)
            } else {
                self.protected_dungeon_ids.remove(&dungeon_id)
            };
            if flipped {
                changed += 1;
            }
        }
        changed
    }

    /// Globally toggles protection checks without touching the set, for
    /// server-side bulk operations.
    pub fn set_tile_protection_enabled(&mut self, enabled: bool) {
        self.tile_protection_enabled = enabled;
    }

    pub fn is_tile_protected(&self, position: Vec2I) -> bool {
        if !self.tile_protection_enabled {
            return false;
        }
        let tile = self.tiles.tile(position);
        self.protected_dungeon_ids.contains(&tile.dungeon_id)
    }

    pub fn dungeon_id_at(&self, position: Vec2I) -> DungeonId {
        self.tiles.tile(position).dungeon_id
    }

    pub fn set_dungeon_id(&mut self, region: RectI, dungeon_id: DungeonId) {
        for position in region.positions() {
            let position = self.geometry.xwrap_vec_i(position);
            if let Some(tile) = self.tiles.tile_mut(position) {
                tile.dungeon_id = dungeon_id;
            }
            self.queue_tile_update(position);
        }
    }

    pub fn set_dungeon_gravity(&mut self, dungeon_id: DungeonId, gravity: Option<f32>) {
        match gravity {
            Some(gravity) => self.dungeon_gravity.insert(dungeon_id, gravity),
            None => self.dungeon_gravity.remove(&dungeon_id),
        };
    }

    pub fn set_dungeon_breathable(&mut self, dungeon_id: DungeonId, breathable: Option<bool>) {
        match breathable {
            Some(breathable) => self.dungeon_breathable.insert(dungeon_id, breathable),
            None => self.dungeon_breathable.remove(&dungeon_id),
        };
    }

    pub fn gravity(&self, position: Vec2F) -> f32 {
        let tile = self.tiles.tile(position.floor_vec());
        self.dungeon_gravity
            .get(&tile.dungeon_id)
            .copied()
            .unwrap_or_else(|| self.template.gravity())
    }

    pub fn breathable(&self, position: Vec2F) -> bool {
        let tile = self.tiles.tile(position.floor_vec());
        self.dungeon_breathable
            .get(&tile.dungeon_id)
            .copied()
            .unwrap_or(true)
    }

    fn modification_allowed(&self, modification: &TileModification, position: Vec2I, admin: bool)
        -> bool
    {
        if !admin && self.is_tile_protected(position) {
            return false;
        }
        if !self.tiles.tile_loaded(position) {
            return false;
        }
        match modification {
            TileModification::PlaceMaterial { material, .. } => {
                is_real_material(*material) || *material == EMPTY_MATERIAL_ID
            }
            TileModification::PlaceMod { material_mod, .. } => {
                *material_mod == NO_MOD_ID || *material_mod < NO_MOD_ID
            }
            TileModification::PlaceLiquid { level, .. } => (0.0..=1.0).contains(level),
            TileModification::PlaceMaterialColor { .. } => true,
        }
    }

    /// Pre-checks modifications without applying; returns the valid ones.
    pub fn valid_tile_modifications(
        &self,
        modifications: &[(Vec2I, TileModification)],
        _allow_entity_overlap: bool,
        admin: bool,
    ) -> Vec<(Vec2I, TileModification)> {
        modifications
            .iter()
            .filter(|(position, modification)| {
                self.modification_allowed(modification, *position, admin)
            })
            .cloned()
            .collect()
    }

    /// Applies modifications, returning the rejected remainder.
    pub fn apply_tile_modifications(
        &mut self,
        modifications: &[(Vec2I, TileModification)],
        allow_entity_overlap: bool,
        admin: bool,
    ) -> Vec<(Vec2I, TileModification)> {
        let mut invalid = Vec::new();
        for (position, modification) in modifications {
            let position = self.geometry.xwrap_vec_i(*position);
            if !self.modification_allowed(modification, position, admin) {
                invalid.push((position, modification.clone()));
                continue;
            }
            if !allow_entity_overlap
                && matches!(modification, TileModification::PlaceMaterial { .. })
                && !self.entities.at_tile(position).is_empty()
            {
                invalid.push((position, modification.clone()));
                continue;
            }
            self.apply_one_modification(position, modification);
        }
        invalid
    }

    fn apply_one_modification(&mut self, position: Vec2I, modification: &TileModification) {
        let Some(tile) = self.tiles.tile_mut(position) else {
            return;
        };
        match modification {
            TileModification::PlaceMaterial {
                layer,
                material,
                hue_shift,
                color_variant,
                collision_override,
            } => {
                let state = tile.layer_mut(*layer);
                state.material = *material;
                state.hue_shift = *hue_shift;
                state.color_variant = *color_variant;
                state.material_mod = NO_MOD_ID;
                if *layer == TileLayer::Foreground {
                    let kind = collision_override.unwrap_or(if *material == EMPTY_MATERIAL_ID {
                        skyward_core::types::collision::CollisionKind::None
                    } else {
                        skyward_core::types::collision::CollisionKind::Block
                    });
                    tile.update_collision(kind);
                }
                if tile.dungeon_id == NO_DUNGEON_ID {
                    tile.dungeon_id = skyward_core::types::tile::CONSTRUCTION_DUNGEON_ID;
                }
            }
            TileModification::PlaceMod {
                layer,
                material_mod,
                hue_shift,
            } => {
                let state = tile.layer_mut(*layer);
                state.material_mod = *material_mod;
                state.mod_hue_shift = *hue_shift;
            }
            TileModification::PlaceLiquid { liquid, level } => {
                tile.liquid = LiquidStore::filled(*liquid, *level);
                self.liquid_engine.activate(position);
                self.queue_liquid_update(position);
            }
            TileModification::PlaceMaterialColor {
                layer,
                color_variant,
            } => {
                tile.layer_mut(*layer).color_variant = *color_variant;
            }
        }
        self.falling_blocks.visit(position);
        self.needs_global_break_check = true;
        self.queue_tile_update(position);
    }

    fn queue_tile_update(&mut self, position: Vec2I) {
        for info in self.clients.values_mut() {
            info.pending_tile_updates.insert(position);
        }
    }

    fn queue_liquid_update(&mut self, position: Vec2I) {
        for info in self.clients.values_mut() {
            info.pending_liquid_updates.insert(position);
        }
    }

    pub fn queue_tile_damage_update(&mut self, position: Vec2I, layer: TileLayer) {
        for info in self.clients.values_mut() {
            info.pending_tile_damage_updates.insert((position, layer));
        }
    }

    pub fn request_global_break_check(&mut self) {
        self.needs_global_break_check = true;
    }

    // -- region generation ----------------------------------------------

    /// Ensures a region is loaded and generated; true when fully ready.
    pub fn signal_region(&mut self, region: RectI) -> bool {
        let sectors = self.tiles.sectors_for_region(region);
        let mut ready = true;
        for sector in sectors {
            self.tiles.load_sector(sector, self.current_step);
            if !self.tiles.is_generated(sector) {
                if let Err(e) = self.generate_sector(sector) {
                    warn!("sector {sector:?} generation failed: {e}");
                    ready = false;
                }
            }
        }
        ready
    }

    /// Immediately generates a region.
    pub fn generate_region(&mut self, region: RectI) {
        self.signal_region(region);
    }

    pub fn region_active(&self, region: RectI) -> bool {
        self.tiles
            .sectors_for_region(region)
            .into_iter()
            .all(|sector| self.tiles.is_generated(sector))
    }

    fn generate_sector(&mut self, sector: SectorId) -> Result<()> {
        // Stored sectors reload instead of regenerating
        if let Some(stored) = self.storage.load_sector(sector)? {
            self.tiles.insert_sector(sector, stored);
            self.tiles.touch_sector(sector, self.current_step);
            return Ok(());
        }

        let region = self.tiles.sector_region(sector);
        for position in region.positions() {
            let info = self.template.block_info(position.x(), position.y());
            let Some(tile) = self.tiles.tile_mut(position) else {
                continue;
            };

            // Generation must leave no null materials behind
            let main_block = info.main_block.unwrap_or(1);
            if info.terrain {
                tile.foreground.material = if info.foreground_cave {
                    EMPTY_MATERIAL_ID
                } else {
                    main_block
                };
                tile.background.material = if info.background_cave {
                    EMPTY_MATERIAL_ID
                } else {
                    main_block
                };
            } else {
                tile.foreground.material = EMPTY_MATERIAL_ID;
                tile.background.material = EMPTY_MATERIAL_ID;
            }
            let solid = tile.foreground.material != EMPTY_MATERIAL_ID;
            tile.update_collision(if solid {
                skyward_core::types::collision::CollisionKind::Block
            } else {
                skyward_core::types::collision::CollisionKind::None
            });
            tile.block_biome_index = info.block_biome_index.unwrap_or(0) as u8;
            tile.environment_biome_index = info.environment_biome_index.unwrap_or(0) as u8;

            if info.ocean_liquid != EMPTY_LIQUID_ID
                && !info.terrain
                && position.y() < info.ocean_liquid_level
            {
                tile.liquid = LiquidStore::endless(info.ocean_liquid, 0.0);
            } else if info.cave_liquid != EMPTY_LIQUID_ID && info.foreground_cave {
                tile.liquid = LiquidStore::filled(info.cave_liquid, 1.0);
            }
        }

        self.tiles.set_sector_generated(sector);
        debug!("world {}: generated sector {sector:?}", self.world_id);
        Ok(())
    }

    // -- dungeons --------------------------------------------------------

    fn allocate_dungeon_id(&mut self) -> DungeonId {
        let id = self.next_dungeon_id;
        self.next_dungeon_id =
            (self.next_dungeon_id + 1) % skyward_core::types::tile::FIRST_META_DUNGEON_ID;
        id
    }

    /// Places a registered dungeon immediately.
    pub fn place_dungeon(
        &mut self,
        dungeon_name: &str,
        position: Vec2I,
        dungeon_id: Option<DungeonId>,
        force_placement: bool,
    ) -> bool {
        let Some(definition) = self.dungeon_definitions.get(dungeon_name).cloned() else {
            warn!("unknown dungeon '{dungeon_name}'");
            return false;
        };
        let dungeon_id = dungeon_id.unwrap_or_else(|| self.allocate_dungeon_id());
        let seed = skyward_core::types::random::static_random_u64(
            self.template.seed(),
            &[&dungeon_name, &(position.x() as u64), &(position.y() as u64)],
        );

        // The dungeon needs its footprint generated first
        let radius = definition.max_radius();
        self.signal_region(RectI::from_coords(
            position.x() - radius,
            (position.y() - radius).max(0),
            position.x() + radius,
            position.y() + radius,
        ));

        let surface = self.template.surface_level() as i32;
        let mut generator = DungeonGenerator::new(definition, seed, Some(dungeon_id));
        let placed = generator.generate(self, position, Some(surface), force_placement);

        if let Some((rects, _places)) = &placed {
            for rect in rects {
                for piece in self.geometry.split_rect_i(*rect) {
                    for position in piece.positions() {
                        self.queue_tile_update(position);
                    }
                }
            }
        }
        placed.is_some()
    }

    /// Queues a microdungeon for placement during sector paging; the
    /// promise resolves with the anchor position once placed.
    pub fn enqueue_placement(
        &mut self,
        dungeon_name: String,
        position: Vec2I,
        dungeon_id: Option<DungeonId>,
    ) -> RpcThreadPromise<Vec2I> {
        let (promise, keeper) = RpcThreadPromise::create_pair();
        self.pending_dungeon_placements.push_back(QueuedDungeonPlacement {
            dungeon_name,
            position,
            dungeon_id,
            keeper,
        });
        promise
    }

    fn process_dungeon_queue(&mut self) {
        while let Some(placement) = self.pending_dungeon_placements.pop_front() {
            let placed = self.place_dungeon(
                &placement.dungeon_name,
                placement.position,
                placement.dungeon_id.or(Some(BIOME_MICRO_DUNGEON_ID)),
                false,
            );
            let result = if placed {
                placement.keeper.fulfill(placement.position)
            } else {
                placement
                    .keeper
                    .fail(format!("dungeon '{}' did not place", placement.dungeon_name))
            };
            if result.is_err() {
                debug!("dungeon placement promise already finished");
            }
        }
    }

    // -- biome regions ---------------------------------------------------

    /// Inserts a biome region into the layout and invalidates the
    /// affected sectors.
    pub fn add_biome_region(
        &mut self,
        position: Vec2I,
        biome: crate::world::biome::Biome,
        width: i32,
    ) {
        let seed = self.template.seed();
        let rects = self
            .template
            .layout_mut()
            .add_biome_region(seed, position, biome, width);
        self.invalidate_generated_rects(&rects);
    }

    pub fn expand_biome_region(&mut self, position: Vec2I, new_width: i32) {
        let rects = self
            .template
            .layout_mut()
            .expand_biome_region(position, new_width);
        self.invalidate_generated_rects(&rects);
    }

    pub fn set_layer_environment_biome(&mut self, position: Vec2I) -> Option<String> {
        self.template.layout_mut().set_layer_environment_biome(position)
    }

    fn invalidate_generated_rects(&mut self, rects: &[RectI]) {
        for rect in rects {
            for piece in self.geometry.split_rect_i(*rect) {
                for sector in self.tiles.sectors_for_region(piece) {
                    if self.tiles.is_loaded(sector) {
                        if let Err(e) = self.regenerate_sector(sector) {
                            warn!("sector {sector:?} regeneration failed: {e}");
                        }
                    }
                }
            }
        }
    }

    fn regenerate_sector(&mut self, sector: SectorId) -> Result<()> {
        self.tiles.insert_sector(
            sector,
            crate::world::sectors::Sector {
                tiles: vec![ServerTile::new(); (SECTOR_SIZE * SECTOR_SIZE) as usize],
                last_touched: self.current_step,
                generated: false,
            },
        );
        self.generate_sector(sector)?;
        let region = self.tiles.sector_region(sector);
        for position in region.positions() {
            self.queue_tile_update(position);
        }
        Ok(())
    }

    // -- timers ----------------------------------------------------------

    /// Schedules an action to run on the world after `delay` seconds.
    pub fn timer(&mut self, delay: f32, action: impl FnOnce(&mut WorldServer) + Send + 'static) {
        self.timers.push((delay, Box::new(action)));
    }

    // -- expiry ----------------------------------------------------------

    pub fn should_expire(&self) -> bool {
        self.no_clients() && self.expiry_timer.ready()
    }

    pub fn set_expiry_time(&mut self, expiry_time: f32) {
        self.expiry_timer = GameTimer::new(expiry_time);
    }

    // -- the tick --------------------------------------------------------

    /// One simulation step, in the fixed phase order.
    pub fn update(&mut self, dt: f32) {
        // 1: clocks
        self.current_step += 1;
        match &self.reference_clock {
            Some(clock) => self.current_time = clock.time(),
            None => self.current_time += dt as f64,
        }
        self.sky.update(dt as f64);

        // 2: script contexts and world messages have already been
        // delivered through receive_message; tick the contexts
        let mut contexts = std::mem::take(&mut self.script_contexts);
        for context in contexts.values_mut() {
            context.update(dt);
        }
        self.script_contexts = contexts;

        // 3: incoming packets are handled by the thread before stepping

        // 4: entity update; masters stamp versions
        for entity in self.entities.iter_mut() {
            if entity.master {
                entity.version += 1;
            }
        }

        // 5: liquids
        if self
            .timing
            .should_run_this_step("liquid", self.current_step)
            .is_some()
        {
            let mut engine = std::mem::take(&mut self.liquid_engine);
            let updates = engine.step(&mut LiquidFacade { world: self });
            self.liquid_engine = engine;
            for (position, _update) in updates {
                self.queue_liquid_update(position);
                self.falling_blocks.visit(position);
            }
        }

        // 6: wires
        if self
            .timing
            .should_run_this_step("wires", self.current_step)
            .is_some()
        {
            let _changed = self.wire_processor.propagate();
        }

        // 7: falling blocks
        if self
            .timing
            .should_run_this_step("fallingBlocks", self.current_step)
            .is_some()
        {
            let mut agent = std::mem::take(&mut self.falling_blocks);
            let moved = agent.update(&mut FallingFacade { world: self });
            self.falling_blocks = agent;
            for (from, to, _material) in moved {
                self.queue_tile_update(from);
                self.queue_tile_update(to);
                self.liquid_engine.activate(from);
                self.liquid_engine.activate(to);
            }
        }

        // 8: damage
        let entities = &self.entities;
        self.damage_manager
            .update(|id| entities.get(id).map(|entity| entity.team));
        let notifications = self.damage_manager.pull_notifications();
        for notification in &notifications {
            let client_ids: Vec<ConnectionId> = self.clients.keys().copied().collect();
            for client_id in client_ids {
                if self.notifications.needs(client_id, notification) {
                    // Damage currently rides the chat channel as a
                    // structured message until a dedicated packet exists
                    let packet = Packet::ClientContextUpdate {
                        update: serde_json::json!({
                            "damageNotification": {
                                "source": notification.source_entity,
                                "target": notification.target_entity,
                                "healthLost": notification.health_lost,
                            }
                        }),
                    };
                    if let Some(info) = self.clients.get_mut(&client_id) {
                        info.outgoing.push(packet);
                    }
                }
            }
        }

        // 9: weather
        let visible: Vec<RectI> = self
            .clients
            .values()
            .map(|info| info.window.to_rect_i())
            .collect();
        self.weather.set_client_visible_regions(visible);
        self.weather.update(dt as f64);
        for projectile in self.weather.pull_new_projectiles() {
            let mut entity = Entity::new(EntityType::Projectile, projectile.position);
            entity.store = serde_json::json!({
                "projectile": projectile.projectile,
                "velocity": projectile.velocity,
                "parameters": projectile.parameters,
            });
            if let Err(e) = self.add_entity(entity) {
                warn!("weather projectile rejected: {e}");
            }
        }

        // 10: sector paging + queued dungeon placement
        self.page_sectors();
        self.process_dungeon_queue();

        // 11: spawner
        if self
            .timing
            .should_run_this_step("spawner", self.current_step)
            .is_some()
        {
            self.run_spawner();
        }

        // 12: per-client outgoing queues
        self.queue_update_packets();

        // 13: timers
        let mut due = Vec::new();
        let mut remaining = Vec::new();
        for (mut time_left, action) in self.timers.drain(..) {
            time_left -= dt;
            if time_left <= 0.0 {
                due.push(action);
            } else {
                remaining.push((time_left, action));
            }
        }
        self.timers = remaining;
        for action in due {
            action(self);
        }

        // Deferred break check: tile entities whose roots lost support go
        if self.needs_global_break_check {
            self.needs_global_break_check = false;
            let broken: Vec<EntityId> = self
                .entities
                .iter()
                .filter(|entity| {
                    entity.tile_bound.as_ref().is_some_and(|view| {
                        !view.roots.is_empty()
                            && view
                                .roots
                                .iter()
                                .all(|&root| !self.tiles.tile(root).collision.is_solid())
                    })
                })
                .map(|entity| entity.id)
                .collect();
            for entity_id in broken {
                self.remove_entity(entity_id, true);
            }
        }

        // 14: expiry
        if self.no_clients() {
            self.expiry_timer.tick(dt);
        } else {
            self.expiry_timer.reset();
        }
    }

    /// The monitoring regions of every client: window plus border.
    fn client_monitoring_regions(&self) -> Vec<(ConnectionId, RectI)> {
        self.clients
            .iter()
            .map(|(&client_id, info)| {
                let mut window = info.window;
                if let Some(player) = self.entities.get(info.player_entity) {
                    window = RectF::with_size(
                        player.position - self.config.client_window_size,
                        self.config.client_window_size * 2.0,
                    )
                    .combined(&window);
                }
                (
                    client_id,
                    window.padded(self.config.client_window_border).to_rect_i(),
                )
            })
            .collect()
    }

    fn page_sectors(&mut self) {
        let regions = self.client_monitoring_regions();
        let mut newly_active: Vec<(ConnectionId, SectorId)> = Vec::new();

        for (client_id, region) in &regions {
            for sector in self.tiles.sectors_for_region(*region) {
                self.tiles.load_sector(sector, self.current_step);
                if !self.tiles.is_generated(sector) {
                    if let Err(e) = self.generate_sector(sector) {
                        warn!("sector {sector:?} generation failed: {e}");
                        continue;
                    }
                }
                self.tiles.touch_sector(sector, self.current_step);
                if let Some(info) = self.clients.get_mut(client_id) {
                    if info.active_sectors.insert(sector) {
                        newly_active.push((*client_id, sector));
                    }
                }
            }
        }

        // Mark the freshly activated sectors for the spawner, and send
        // their tiles to the activating client
        for (client_id, sector) in newly_active {
            let region = self.tiles.sector_region(sector);
            let mut tiles = Vec::with_capacity((SECTOR_SIZE * SECTOR_SIZE) as usize);
            for x in region.x_min()..region.x_max() {
                for y in region.y_min()..region.y_max() {
                    tiles.push(self.tiles.tile(Vec2I::new(x, y)).to_net_tile());
                }
            }
            if let Some(info) = self.clients.get_mut(&client_id) {
                info.outgoing.push(Packet::TileArrayUpdate {
                    min: region.min,
                    width: SECTOR_SIZE as u32,
                    height: SECTOR_SIZE as u32,
                    tiles,
                });
            }
        }

        // Drop client sector activations that fell out of view
        for (client_id, region) in &regions {
            let keep: HashSet<SectorId> =
                self.tiles.sectors_for_region(*region).into_iter().collect();
            if let Some(info) = self.clients.get_mut(client_id) {
                info.active_sectors.retain(|sector| keep.contains(sector));
            }
        }

        // Age out untouched sectors, persisting them first
        if self.current_step >= self.config.sector_time_to_live {
            let cutoff = self.current_step - self.config.sector_time_to_live;
            let stale = self.tiles.take_stale_sectors(cutoff);
            for (id, sector) in stale {
                if let Err(e) = self.storage.store_sector(id, &sector) {
                    error!("failed to store sector {id:?}: {e}");
                }
            }
        }
    }

    fn run_spawner(&mut self) {
        let mut spawner = Spawner::new(self.template.seed() ^ self.current_step);
        spawner.set_enabled(self.spawner.enabled());
        let regions: Vec<RectI> = self
            .client_monitoring_regions()
            .into_iter()
            .map(|(_, region)| region)
            .collect();
        for region in regions {
            spawner.spawn_in_region(&mut SpawnFacade { world: self }, region);
        }
    }

    pub fn set_spawning_enabled(&mut self, enabled: bool) {
        self.spawner.set_enabled(enabled);
    }

    fn queue_update_packets(&mut self) {
        // Tile, liquid and damage updates inside each client's window
        let geometry = self.geometry;
        let mut tile_packets: Vec<(ConnectionId, Packet)> = Vec::new();
        for (&client_id, info) in &mut self.clients {
            let window = info.window.padded(self.config.client_window_border);
            for position in info.pending_tile_updates.drain() {
                if geometry.rect_contains(&window, position.to_f32()) {
                    tile_packets.push((client_id, Packet::TileUpdate {
                        position,
                        tile: ServerTile::new().to_net_tile(),
                    }));
                }
            }
            for position in info.pending_liquid_updates.drain() {
                if geometry.rect_contains(&window, position.to_f32()) {
                    tile_packets.push((client_id, Packet::LiquidUpdate {
                        position,
                        liquid: Default::default(),
                    }));
                }
            }
            for (position, layer) in info.pending_tile_damage_updates.drain() {
                tile_packets.push((client_id, Packet::TileDamageUpdate {
                    position,
                    layer,
                    damage: 0.0,
                }));
            }
        }
        // Fill in actual tile state outside the borrow of clients
        for (client_id, packet) in tile_packets {
            let packet = match packet {
                Packet::TileUpdate { position, .. } => Packet::TileUpdate {
                    position,
                    tile: self.tiles.tile(position).to_net_tile(),
                },
                Packet::LiquidUpdate { position, .. } => Packet::LiquidUpdate {
                    position,
                    liquid: self.tiles.tile(position).liquid.net_update(),
                },
                Packet::TileDamageUpdate {
                    position, layer, ..
                } => {
                    let tile = self.tiles.tile(position);
                    Packet::TileDamageUpdate {
                        position,
                        layer,
                        damage: match layer {
                            TileLayer::Foreground => tile.foreground_damage,
                            TileLayer::Background => tile.background_damage,
                        },
                    }
                }
                other => other,
            };
            if let Some(info) = self.clients.get_mut(&client_id) {
                info.outgoing.push(packet);
            }
        }

        // Entity replication with the shared net-state cache
        let entity_states: Vec<(EntityId, u64, RectF, Arc<Vec<u8>>)> = {
            let cache = &mut self.net_state_cache;
            let mut states = Vec::new();
            for entity in self.entities.iter() {
                // Cache key includes net rules; all current clients share
                // the default rules unless negotiated otherwise
                let key = (NetCompatibilityRules::default(), entity.id, entity.version);
                let bytes = cache
                    .entry(key)
                    .or_insert_with(|| {
                        Arc::new(serde_json::to_vec(&entity.store).unwrap_or_default())
                    })
                    .clone();
                states.push((entity.id, entity.version, entity.bound_box(), bytes));
            }
            states
        };

        let live_ids: HashSet<EntityId> = entity_states.iter().map(|(id, ..)| *id).collect();
        for info in self.clients.values_mut() {
            let window = info.window.padded(self.config.client_window_border);
            for (entity_id, version, bound_box, bytes) in &entity_states {
                let visible = geometry.rect_intersects_rect(&window, bound_box);
                match info.slave_versions.get(entity_id).copied() {
                    None if visible => {
                        info.slave_versions.insert(*entity_id, *version);
                        info.outgoing.push(Packet::EntityCreate {
                            entity_type: 0,
                            entity_id: *entity_id,
                            store_data: bytes.as_ref().clone(),
                            first_net_state: Vec::new(),
                        });
                    }
                    Some(seen) if visible && *version > seen => {
                        info.slave_versions.insert(*entity_id, *version);
                        info.outgoing.push(Packet::EntityUpdate {
                            entity_id: *entity_id,
                            version: *version,
                            delta: bytes.as_ref().clone(),
                        });
                    }
                    Some(_) if !visible => {
                        info.slave_versions.remove(entity_id);
                        info.outgoing.push(Packet::EntityDestroy {
                            entity_id: *entity_id,
                            death: false,
                            final_net_state: Vec::new(),
                        });
                    }
                    _ => {}
                }
            }
            // Entities that vanished entirely
            let stale: Vec<EntityId> = info
                .slave_versions
                .keys()
                .filter(|id| !live_ids.contains(id))
                .copied()
                .collect();
            for entity_id in stale {
                info.slave_versions.remove(&entity_id);
                info.outgoing.push(Packet::EntityDestroy {
                    entity_id,
                    death: false,
                    final_net_state: Vec::new(),
                });
            }
        }

        // Trim the net state cache to live versions
        self.net_state_cache
            .retain(|(_, id, version), _| {
                self.entities
                    .get(*id)
                    .map(|entity| entity.version.saturating_sub(4) <= *version)
                    .unwrap_or(false)
            });
    }

    // -- persistence -----------------------------------------------------

    fn read_metadata(&mut self, stored: VersionedJson) -> Result<()> {
        if stored.kind != WORLD_METADATA_KIND {
            return Err(ServerError::storage(format!(
                "expected {WORLD_METADATA_KIND}, found {}",
                stored.kind
            )));
        }
        let content = stored.content;
        if let Some(start) = content.get("playerStart") {
            self.player_start = serde_json::from_value(start.clone())?;
        }
        self.respawn_in_world = content
            .get("respawnInWorld")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        if let Some(properties) = content.get("worldProperties").and_then(Json::as_object) {
            self.world_properties = properties.clone();
        }
        if let Some(protected) = content.get("protectedDungeonIds").and_then(Json::as_array) {
            self.protected_dungeon_ids = protected
                .iter()
                .filter_map(Json::as_u64)
                .map(|id| id as DungeonId)
                .collect();
        }
        if let Some(template) = content.get("template") {
            self.template = WorldTemplate::from_store(template)?;
            self.geometry = WorldGeometry::new(self.template.size());
        }
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        let protected: Vec<u64> = self
            .protected_dungeon_ids
            .iter()
            .map(|&id| id as u64)
            .collect();
        let metadata = VersionedJson::new(
            WORLD_METADATA_KIND,
            WORLD_METADATA_VERSION,
            serde_json::json!({
                "playerStart": self.player_start,
                "respawnInWorld": self.respawn_in_world,
                "worldProperties": Json::Object(self.world_properties.clone()),
                "protectedDungeonIds": protected,
                "template": self.template.to_store()?,
            }),
        );
        self.storage.set_metadata(&metadata)
    }

    /// Writes all loaded sectors and metadata to storage.
    pub fn sync(&mut self) -> Result<()> {
        self.write_metadata()?;
        for id in self.tiles.loaded_sectors() {
            if let Some(sector) = self.tiles.sector(id) {
                self.storage.store_sector(id, sector)?;
            }
        }
        self.storage.sync()
    }

    /// Syncs and unloads every sector.
    pub fn unload_all(&mut self) -> Result<()> {
        self.sync()?;
        let stale = self.tiles.take_stale_sectors(u64::MAX);
        drop(stale);
        Ok(())
    }

    /// Full world contents as in-memory chunks (ship worlds).
    pub fn read_chunks(&mut self) -> Result<WorldChunks> {
        self.sync()?;
        Ok(self.storage.read_chunks())
    }

    // -- queries used by generation facades ------------------------------

    fn solid_at(&self, position: Vec2I, layer: TileLayer) -> bool {
        let tile = self.tiles.tile(position);
        if self.tiles.tile_loaded(position) {
            match layer {
                TileLayer::Foreground => tile.collision.is_solid(),
                TileLayer::Background => {
                    tile.background.material != EMPTY_MATERIAL_ID
                        && tile.background.material != NULL_MATERIAL_ID
                }
            }
        } else {
            // Unloaded tiles answer from the template
            self.template
                .block_info(position.x(), position.y())
                .terrain
        }
    }
}

// Facade adapters over the world for the sub-engines.

struct LiquidFacade<'a> {
    world: &'a mut WorldServer,
}

impl LiquidWorld for LiquidFacade<'_> {
    fn liquid_cell(&self, position: Vec2I) -> Option<LiquidCell> {
        if !self.world.tiles.tile_loaded(position) {
            return None;
        }
        let tile = self.world.tiles.tile(position);
        Some(LiquidCell {
            liquid: tile.liquid.liquid,
            level: tile.liquid.level,
            pressure: tile.liquid.pressure,
            source: tile.liquid.source,
        })
    }

    fn set_liquid_cell(&mut self, position: Vec2I, liquid: u8, level: f32, pressure: f32) {
        if let Some(tile) = self.world.tiles.tile_mut(position) {
            if tile.liquid.source {
                return;
            }
            tile.liquid = LiquidStore::new(liquid, level, pressure.max(0.0), false);
        }
    }

    fn cell_open(&self, position: Vec2I) -> bool {
        position.y() >= 0
            && position.y() < self.world.geometry.height() as i32
            && self.world.tiles.tile_loaded(position)
            && !self.world.tiles.tile(position).collision.is_solid()
    }

    fn wrap(&self, position: Vec2I) -> Vec2I {
        self.world.geometry.xwrap_vec_i(position)
    }
}

struct FallingFacade<'a> {
    world: &'a mut WorldServer,
}

impl FallingBlocksWorld for FallingFacade<'_> {
    fn falling_material(&self, position: Vec2I) -> Option<MaterialId> {
        // Granular materials are modeled as the biome main block band
        let tile = self.world.tiles.tile(position);
        let material = tile.foreground.material;
        (is_real_material(material)
            && tile.dungeon_id == skyward_core::types::tile::DESTROYED_BLOCK_DUNGEON_ID)
            .then_some(material)
    }

    fn supported(&self, position: Vec2I) -> bool {
        if position.y() < 0 {
            return true;
        }
        self.world.tiles.tile(position).collision.is_solid()
    }

    fn remove_block(&mut self, position: Vec2I) -> Option<MaterialId> {
        let tile = self.world.tiles.tile_mut(position)?;
        let material = tile.foreground.material;
        if material == EMPTY_MATERIAL_ID {
            return None;
        }
        tile.foreground.material = EMPTY_MATERIAL_ID;
        tile.update_collision(skyward_core::types::collision::CollisionKind::None);
        Some(material)
    }

    fn settle_block(&mut self, position: Vec2I, material: MaterialId) {
        if let Some(tile) = self.world.tiles.tile_mut(position) {
            tile.foreground.material = material;
            tile.update_collision(skyward_core::types::collision::CollisionKind::Block);
        }
    }

    fn wrap(&self, position: Vec2I) -> Vec2I {
        self.world.geometry.xwrap_vec_i(position)
    }
}

struct SpawnFacade<'a> {
    world: &'a mut WorldServer,
}

impl SpawnerWorld for SpawnFacade<'_> {
    fn is_day(&self) -> bool {
        self.world.is_day()
    }

    fn solid(&self, position: Vec2I) -> bool {
        self.world.solid_at(position, TileLayer::Foreground)
    }

    fn liquid(&self, position: Vec2I) -> bool {
        !self.world.tiles.tile(position).liquid.is_empty()
    }

    fn enclosed(&self, position: Vec2I) -> bool {
        let tile = self.world.tiles.tile(position);
        tile.background.material != EMPTY_MATERIAL_ID
            && tile.background.material != NULL_MATERIAL_ID
    }

    fn spawning_blocked(&self, position: Vec2I) -> bool {
        let tile = self.world.tiles.tile(position);
        tile.dungeon_id == SPAWN_DUNGEON_ID
            || self.world.protected_dungeon_ids.contains(&tile.dungeon_id)
    }

    fn spawn_profile(&self, position: Vec2I) -> Option<SpawnProfile> {
        let tile = self.world.tiles.tile(position);
        self.world
            .template
            .layout()
            .biome(tile.block_biome_index as usize)
            .map(|biome| biome.spawn_profile.clone())
    }

    fn spawn_monster(&mut self, position: Vec2F, monster_type: &str) {
        let mut entity = Entity::new(EntityType::Monster, position);
        entity.store = serde_json::json!({"monsterType": monster_type});
        entity.team = DamageTeam {
            team_type: skyward_core::types::game::TeamType::Enemy,
            team: 1,
        };
        if let Err(e) = self.world.add_entity(entity) {
            warn!("natural spawn rejected: {e}");
        }
    }
}

impl DungeonGeneratorWorldFacade for WorldServer {
    fn mark_region(&mut self, region: RectI) {
        self.marked_regions.push(region);
    }

    fn mark_terrain(&mut self, _region: &PolyF) {}

    fn mark_space(&mut self, _region: &PolyF) {}

    fn set_foreground_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    ) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.foreground.material = material;
            tile.foreground.hue_shift = hue_shift;
            tile.foreground.color_variant = color_variant;
            let solid = material != EMPTY_MATERIAL_ID && material != NULL_MATERIAL_ID;
            tile.update_collision(if solid {
                skyward_core::types::collision::CollisionKind::Block
            } else {
                skyward_core::types::collision::CollisionKind::None
            });
        }
    }

    fn set_background_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    ) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.background.material = material;
            tile.background.hue_shift = hue_shift;
            tile.background.color_variant = color_variant;
        }
    }

    fn set_foreground_mod(&mut self, position: Vec2I, material_mod: ModId, hue_shift: MaterialHue) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.foreground.material_mod = material_mod;
            tile.foreground.mod_hue_shift = hue_shift;
        }
    }

    fn set_background_mod(&mut self, position: Vec2I, material_mod: ModId, hue_shift: MaterialHue) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.background.material_mod = material_mod;
            tile.background.mod_hue_shift = hue_shift;
        }
    }

    fn place_object(&mut self, position: Vec2I, name: &str, direction: skyward_core::types::game::Direction, parameters: &Json) {
        let mut entity = Entity::new(EntityType::Object, position.to_f32());
        entity.store = serde_json::json!({
            "objectName": name,
            "direction": direction,
            "parameters": parameters,
        });
        entity.tile_bound = Some(crate::world::entities::TileBoundView {
            spaces: vec![position],
            roots: vec![position + Vec2I::new(0, -1)],
        });
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("dungeon object '{name}' rejected: {e}");
        }
    }

    fn place_vehicle(&mut self, position: Vec2F, name: &str, parameters: &Json) {
        let mut entity = Entity::new(EntityType::Vehicle, position);
        entity.store = serde_json::json!({"vehicleName": name, "parameters": parameters});
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("dungeon vehicle '{name}' rejected: {e}");
        }
    }

    fn place_surface_biome_items(&mut self, _position: Vec2I) {}

    fn place_biome_tree(&mut self, position: Vec2I) {
        let mut entity = Entity::new(EntityType::Plant, position.to_f32());
        entity.store = serde_json::json!({"kind": "biomeTree"});
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("biome tree rejected: {e}");
        }
    }

    fn add_drop(&mut self, position: Vec2F, descriptor: &Json) {
        let mut entity = Entity::new(EntityType::ItemDrop, position);
        entity.store = descriptor.clone();
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("item drop rejected: {e}");
        }
    }

    fn spawn_npc(&mut self, position: Vec2F, definition: &Json) {
        let mut entity = Entity::new(EntityType::Npc, position);
        entity.store = definition.clone();
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("npc rejected: {e}");
        }
    }

    fn spawn_stagehand(&mut self, position: Vec2F, definition: &Json) {
        let mut entity = Entity::new(EntityType::Stagehand, position);
        entity.store = definition.clone();
        if let Err(e) = self.entities.add_entity(entity) {
            warn!("stagehand rejected: {e}");
        }
    }

    fn set_liquid(&mut self, position: Vec2I, liquid: LiquidStore) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.liquid = liquid;
        }
        self.liquid_engine.activate(position);
    }

    fn connect_wire_group(&mut self, group: &[Vec2I]) {
        // Chain the group into one component, first position as output
        if let Some((&first, rest)) = group.split_first() {
            for &position in rest {
                self.wire_processor.connect((first, 0), (position, 0));
            }
        }
    }

    fn set_tile_protection(&mut self, dungeon_id: DungeonId, protected: bool) {
        WorldServer::set_tile_protection(self, dungeon_id, protected);
    }

    fn check_solid(&mut self, position: Vec2I, layer: TileLayer) -> bool {
        self.solid_at(position, layer)
    }

    fn check_open(&mut self, position: Vec2I, layer: TileLayer) -> bool {
        !self.solid_at(position, layer)
    }

    fn check_ocean_liquid(&mut self, position: Vec2I) -> bool {
        self.template.is_ocean_at(position.x(), position.y())
    }

    fn dungeon_id_at(&mut self, position: Vec2I) -> DungeonId {
        self.tiles.tile(position).dungeon_id
    }

    fn set_dungeon_id_at(&mut self, position: Vec2I, dungeon_id: DungeonId) {
        if let Some(tile) = self.tiles.tile_mut(position) {
            tile.dungeon_id = dungeon_id;
        }
    }

    fn clear_tile_entities(
        &mut self,
        bounds: RectI,
        positions: &HashSet<Vec2I>,
        _clear_anchored: bool,
    ) {
        let _ = bounds;
        let mut to_remove = Vec::new();
        for position in positions {
            to_remove.extend(self.entities.at_tile(*position));
        }
        for entity_id in to_remove {
            self.entities.remove_entity(entity_id);
        }
    }

    fn world_geometry(&self) -> WorldGeometry {
        self.geometry
    }

    fn set_player_start(&mut self, position: Vec2F) {
        self.player_start = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::template::TerrestrialParameters;
    use skyward_core::math::Vec2U;

    fn test_world() -> WorldServer {
        let template = WorldTemplate::terrestrial(
            777,
            &TerrestrialParameters {
                size: Vec2U::new(512, 512),
                surface_level: 256,
                undersurface_level: 220,
                core_level: 64,
                ..TerrestrialParameters::default()
            },
        );
        WorldServer::new(
            "test-world".into(),
            template,
            WorldStorage::memory(),
            WorldServerConfig {
                sector_time_to_live: 10_000,
                ..WorldServerConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn fresh_world_finds_a_player_start() {
        let world = test_world();
        let start = world.player_start();
        assert!(start.y() > 0.0);
    }

    #[test]
    fn add_client_sends_world_start_and_sectors() {
        let mut world = test_world();
        assert!(world.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default()
        ));
        assert!(!world.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default()
        ));

        world.update(0.05);
        let packets = world.get_outgoing_packets(1);
        assert!(matches!(packets.first(), Some(Packet::WorldStart { .. })));
        assert!(
            packets
                .iter()
                .any(|p| matches!(p, Packet::TileArrayUpdate { .. })),
            "activated sectors arrive as tile arrays"
        );
    }

    #[test]
    fn generated_sectors_have_no_null_materials() {
        let mut world = test_world();
        world.signal_region(RectI::from_coords(100, 200, 164, 300));
        for x in 100..164 {
            for y in 200..300 {
                let tile = world.tiles.tile(Vec2I::new(x, y));
                assert_ne!(tile.foreground.material, NULL_MATERIAL_ID, "({x}, {y})");
                assert_ne!(tile.background.material, NULL_MATERIAL_ID, "({x}, {y})");
            }
        }
    }

    #[test]
    fn remove_client_flushes_and_stops() {
        let mut world = test_world();
        world.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default(),
        );
        let packets = world.remove_client(1);
        assert!(matches!(
            packets.last(),
            Some(Packet::WorldStop { .. })
        ));
        assert!(world.no_clients());
        assert!(world.remove_client(1).is_empty());
    }

    #[test]
    fn tile_protection_rejects_non_admin_modifications() {
        let mut world = test_world();
        let position = Vec2I::new(150, 250);
        world.signal_region(RectI::with_size(position, Vec2I::new(1, 1)));
        world.set_dungeon_id(RectI::with_size(position, Vec2I::new(1, 1)), 77);
        world.set_tile_protection(77, true);

        let before = world.tiles.tile(position).clone();
        let modification = TileModification::PlaceMaterial {
            layer: TileLayer::Foreground,
            material: 5,
            hue_shift: 0,
            color_variant: 0,
            collision_override: None,
        };

        let invalid =
            world.apply_tile_modifications(&[(position, modification.clone())], true, false);
        assert_eq!(invalid.len(), 1);
        assert_eq!(world.tiles.tile(position), &before, "tile unchanged");

        // Admins bypass; so does globally disabling protection
        let invalid = world.apply_tile_modifications(&[(position, modification.clone())], true, true);
        assert!(invalid.is_empty());

        world.set_tile_protection_enabled(false);
        let invalid = world.apply_tile_modifications(&[(position, modification)], true, false);
        assert!(invalid.is_empty());
    }

    #[test]
    fn tile_modifications_partition_valid_and_invalid() {
        let mut world = test_world();
        let loaded = Vec2I::new(100, 250);
        world.signal_region(RectI::with_size(loaded, Vec2I::new(1, 1)));
        let unloaded = Vec2I::new(400, 40);

        let place = |material| TileModification::PlaceMaterial {
            layer: TileLayer::Foreground,
            material,
            hue_shift: 0,
            color_variant: 0,
            collision_override: None,
        };

        let invalid = world.apply_tile_modifications(
            &[(loaded, place(5)), (unloaded, place(5))],
            true,
            false,
        );
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0, unloaded);
        assert_eq!(world.tiles.tile(loaded).foreground.material, 5);
    }

    #[test]
    fn unique_entity_promises_resolve() {
        let mut world = test_world();
        let mut entity = Entity::new(EntityType::Object, Vec2F::new(50.0, 260.0));
        entity.unique_id = Some("beacon".into());
        world.add_entity(entity).unwrap();

        let promise = world.find_unique_entity("beacon");
        assert!(promise.succeeded());
        assert_eq!(promise.result(), Some(Vec2F::new(50.0, 260.0)));

        let missing = world.find_unique_entity("nothing");
        assert!(missing.failed_state());
    }

    #[test]
    fn world_expires_only_when_empty_and_idle() {
        let mut world = test_world();
        world.set_expiry_time(0.2);
        world.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default(),
        );
        for _ in 0..10 {
            world.update(0.05);
        }
        assert!(!world.should_expire(), "occupied worlds do not expire");

        world.remove_client(1);
        for _ in 0..10 {
            world.update(0.05);
        }
        assert!(world.should_expire());
    }

    #[test]
    fn timers_fire_once_after_delay() {
        let mut world = test_world();
        world.timer(0.1, |world| {
            world.set_property("fired", Json::Bool(true));
        });
        world.update(0.05);
        assert!(world.get_property("fired").is_none());
        world.update(0.06);
        assert_eq!(world.get_property("fired"), Some(&Json::Bool(true)));
        world.update(0.05);
    }

    #[test]
    fn entity_versions_replicate_incrementally() {
        let mut world = test_world();
        world.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default(),
        );
        world.update(0.05);
        world.get_outgoing_packets(1);

        let start = world.player_start();
        let monster = Entity::new(EntityType::Monster, start);
        let id = world.add_entity(monster).unwrap();

        world.update(0.05);
        let packets = world.get_outgoing_packets(1);
        assert!(
            packets.iter().any(|p| matches!(
                p,
                Packet::EntityCreate { entity_id, .. } if *entity_id == id
            ) || matches!(
                p,
                Packet::EntityUpdate { entity_id, .. } if *entity_id == id
            )),
            "new entity replicates to the client"
        );

        world.remove_entity(id, true);
        let packets = world.get_outgoing_packets(1);
        assert!(packets.iter().any(|p| matches!(
            p,
            Packet::EntityDestroy { entity_id, death: true, .. } if *entity_id == id
        )));
    }

    #[test]
    fn surface_is_brighter_than_the_deep() {
        let mut world = test_world();
        let surface_x = world.player_start().x();
        let sky = world.light_level(Vec2F::new(surface_x, 500.0));
        let deep = world.light_level(Vec2F::new(surface_x, 20.0));
        assert!(sky > deep, "sky {sky} vs deep {deep}");
        assert!(sky > 0.5);
    }

    #[test]
    fn central_structure_removal_keeps_residuals() {
        use crate::world::structures::{StructureBlock, StructureObject};

        let mut world = test_world();
        let structure = WorldStructure {
            anchor_position: Vec2I::new(0, 0),
            blocks: vec![
                StructureBlock {
                    position: Vec2I::new(0, 0),
                    material: 40,
                    layer: TileLayer::Foreground,
                    residual: false,
                },
                StructureBlock {
                    position: Vec2I::new(1, 0),
                    material: 41,
                    layer: TileLayer::Foreground,
                    residual: true,
                },
            ],
            objects: vec![StructureObject {
                name: "beacon".into(),
                position: Vec2I::new(0, 1),
                ..Default::default()
            }],
            placed_object_entities: Vec::new(),
        };

        let anchor = Vec2I::new(200, 250);
        let placed = world.set_central_structure(structure, anchor);
        assert_eq!(placed.anchor_position, anchor);
        assert_eq!(world.tiles.tile(anchor).foreground.material, 40);
        assert_eq!(
            world
                .tiles
                .tile(anchor + Vec2I::new(1, 0))
                .foreground
                .material,
            41
        );
        let object_id = placed.placed_object_entities[0];
        assert!(world.entity(object_id).is_some());

        // A second structure displaces the first; residual blocks stay
        let placed_again =
            world.set_central_structure(WorldStructure::default(), Vec2I::new(100, 250));
        assert_eq!(
            world.tiles.tile(anchor).foreground.material,
            EMPTY_MATERIAL_ID,
            "non-residual block removed"
        );
        assert_eq!(
            world
                .tiles
                .tile(anchor + Vec2I::new(1, 0))
                .foreground
                .material,
            41,
            "residual block kept"
        );
        assert!(world.entity(object_id).is_none(), "object removed");
        assert!(placed_again.blocks.is_empty());
    }

    #[test]
    fn world_sync_round_trips_through_chunks() {
        let mut world = test_world();
        let position = Vec2I::new(128, 240);
        world.signal_region(RectI::with_size(position, Vec2I::new(1, 1)));
        world.apply_tile_modifications(
            &[(
                position,
                TileModification::PlaceMaterial {
                    layer: TileLayer::Foreground,
                    material: 33,
                    hue_shift: 0,
                    color_variant: 0,
                    collision_override: None,
                },
            )],
            true,
            true,
        );
        let chunks = world.read_chunks().unwrap();

        let template = WorldTemplate::from_store(
            &world.template.to_store().unwrap(),
        )
        .unwrap();
        let mut reloaded = WorldServer::new(
            "test-world".into(),
            template,
            WorldStorage::from_chunks(chunks),
            WorldServerConfig::default(),
        )
        .unwrap();
        reloaded.signal_region(RectI::with_size(position, Vec2I::new(1, 1)));
        assert_eq!(reloaded.tiles.tile(position).foreground.material, 33);
    }
}
