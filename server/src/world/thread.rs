//! Runs a world server on its own thread, isolating its failures.
//!
//! All methods here are designed not to panic the caller: world step
//! errors set the thread's error flag and stop it; per-client packet
//! errors quarantine only that client.

use crate::error::Result;
use crate::packets::{NetCompatibilityRules, Packet};
use crate::warping::{SpawnTarget, WorldId};
use crate::world::server::WorldServer;
use log::{error, info, warn};
use serde_json::Value as Json;
use skyward_core::math::Vec2F;
use skyward_core::types::game::ConnectionId;
use skyward_core::types::rpc_promise::RpcThreadPromiseKeeper;
use skyward_core::types::time::monotonic_time;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A message for the world, fulfilled through a thread promise.
pub struct WorldMessage {
    pub message: String,
    pub args: Vec<Json>,
    pub keeper: RpcThreadPromiseKeeper<Json>,
}

/// Bounded catch-up when the thread oversleeps.
const MAX_CATCH_UP_STEPS: u32 = 5;

struct SharedState {
    world: Mutex<WorldServer>,
    clients: Mutex<HashSet<ConnectionId>>,
    errored_clients: Mutex<HashSet<ConnectionId>>,
    incoming: Mutex<HashMap<ConnectionId, Vec<Packet>>>,
    outgoing: Mutex<HashMap<ConnectionId, Vec<Packet>>>,
    messages: Mutex<Vec<WorldMessage>>,
    update_action: Mutex<Option<Box<dyn FnMut(&mut WorldServer) + Send>>>,
    stop: AtomicBool,
    error_occurred: AtomicBool,
    should_expire: AtomicBool,
    pause: Mutex<Option<Arc<AtomicBool>>>,
    /// f32 bits; 1.0 when the universe has not set a timescale.
    timescale: Arc<AtomicU32>,
    timestep: f32,
}

/// Handle to a world running on its own thread.
pub struct WorldServerThread {
    world_id: WorldId,
    state: Arc<SharedState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorldServerThread {
    pub fn new(world: WorldServer, world_id: WorldId, timestep: f32) -> WorldServerThread {
        WorldServerThread {
            world_id,
            state: Arc::new(SharedState {
                world: Mutex::new(world),
                clients: Mutex::new(HashSet::new()),
                errored_clients: Mutex::new(HashSet::new()),
                incoming: Mutex::new(HashMap::new()),
                outgoing: Mutex::new(HashMap::new()),
                messages: Mutex::new(Vec::new()),
                update_action: Mutex::new(None),
                stop: AtomicBool::new(false),
                error_occurred: AtomicBool::new(false),
                should_expire: AtomicBool::new(false),
                pause: Mutex::new(None),
                timescale: Arc::new(AtomicU32::new(1.0f32.to_bits())),
                timestep,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn world_id(&self) -> &WorldId {
        &self.world_id
    }

    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let state = self.state.clone();
        let world_id = self.world_id.clone();
        *handle = Some(
            std::thread::Builder::new()
                .name(format!("world-{world_id}"))
                .spawn(move || run_world(state, world_id))
                .expect("failed to spawn world thread"),
        );
    }

    /// Signals the thread to stop and joins it.
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn set_pause(&self, pause: Arc<AtomicBool>) {
        *self.state.pause.lock().unwrap() = Some(pause);
    }

    pub fn timescale_handle(&self) -> Arc<AtomicU32> {
        self.state.timescale.clone()
    }

    /// True when the world itself failed and the thread stopped.
    pub fn server_error_occurred(&self) -> bool {
        self.state.error_occurred.load(Ordering::SeqCst)
    }

    pub fn should_expire(&self) -> bool {
        self.state.should_expire.load(Ordering::SeqCst)
            && self.state.messages.lock().unwrap().is_empty()
    }

    pub fn spawn_target_valid(&self, target: &SpawnTarget) -> bool {
        self.state.world.lock().unwrap().spawn_target_valid(target)
    }

    /// Adds a client to the world; false when the world rejected it.
    pub fn add_client(
        &self,
        client_id: ConnectionId,
        target: &SpawnTarget,
        local: bool,
        admin: bool,
        net_rules: NetCompatibilityRules,
    ) -> bool {
        let added = self
            .state
            .world
            .lock()
            .unwrap()
            .add_client(client_id, target, local, admin, net_rules);
        if added {
            self.state.clients.lock().unwrap().insert(client_id);
        }
        added
    }

    /// Removes a client and returns its final outgoing packets.
    pub fn remove_client(&self, client_id: ConnectionId) -> Vec<Packet> {
        self.state.clients.lock().unwrap().remove(&client_id);
        self.state.errored_clients.lock().unwrap().remove(&client_id);
        self.state.incoming.lock().unwrap().remove(&client_id);

        let mut final_packets = self
            .state
            .outgoing
            .lock()
            .unwrap()
            .remove(&client_id)
            .unwrap_or_default();
        final_packets.extend(self.state.world.lock().unwrap().remove_client(client_id));
        final_packets
    }

    pub fn clients(&self) -> Vec<ConnectionId> {
        self.state.clients.lock().unwrap().iter().copied().collect()
    }

    pub fn has_client(&self, client_id: ConnectionId) -> bool {
        self.state.clients.lock().unwrap().contains(&client_id)
    }

    pub fn no_clients(&self) -> bool {
        self.state.clients.lock().unwrap().is_empty()
    }

    /// Clients whose packets raised an error. They stay attached (their
    /// final packets must still be flushed) but no further input from
    /// them is handled.
    pub fn errored_clients(&self) -> Vec<ConnectionId> {
        self.state
            .errored_clients
            .lock()
            .unwrap()
            .iter()
            .copied()
            .collect()
    }

    pub fn push_incoming_packets(&self, client_id: ConnectionId, packets: Vec<Packet>) {
        if self.state.errored_clients.lock().unwrap().contains(&client_id) {
            return;
        }
        self.state
            .incoming
            .lock()
            .unwrap()
            .entry(client_id)
            .or_default()
            .extend(packets);
    }

    pub fn pull_outgoing_packets(&self, client_id: ConnectionId) -> Vec<Packet> {
        self.state
            .outgoing
            .lock()
            .unwrap()
            .remove(&client_id)
            .unwrap_or_default()
    }

    pub fn player_revive_position(&self, client_id: ConnectionId) -> Option<Vec2F> {
        self.state
            .world
            .lock()
            .unwrap()
            .player_revive_position(client_id)
    }

    pub fn pull_new_planet_type(&self) -> Option<(String, String)> {
        self.state.world.lock().unwrap().pull_new_planet_type()
    }

    /// Runs an action on the world under the world lock. Errors inside
    /// the action are the caller's to handle; the thread error flag is
    /// not touched.
    pub fn execute_action<R>(&self, action: impl FnOnce(&mut WorldServer) -> R) -> R {
        let mut world = self.state.world.lock().unwrap();
        action(&mut world)
    }

    /// Called after every world update, under the world lock.
    pub fn set_update_action(&self, action: impl FnMut(&mut WorldServer) + Send + 'static) {
        *self.state.update_action.lock().unwrap() = Some(Box::new(action));
    }

    /// Queues messages for the world; replies arrive through each
    /// message's thread promise keeper.
    pub fn pass_messages(&self, messages: Vec<WorldMessage>) {
        self.state.messages.lock().unwrap().extend(messages);
    }

    pub fn sync(&self) -> Result<()> {
        self.state.world.lock().unwrap().sync()
    }

    pub fn unload_all(&self) -> Result<()> {
        self.state.world.lock().unwrap().unload_all()
    }

    /// Syncs and reads the full world into memory chunks.
    pub fn read_chunks(&self) -> Result<crate::client_context::WorldChunks> {
        self.state.world.lock().unwrap().read_chunks()
    }
}

impl Drop for WorldServerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_world(state: Arc<SharedState>, world_id: WorldId) {
    info!("world thread {world_id} started");
    let timestep = state.timestep as f64;
    let mut next_step = monotonic_time();

    while !state.stop.load(Ordering::SeqCst) {
        let paused = state
            .pause
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.load(Ordering::SeqCst));
        if paused {
            next_step = monotonic_time();
            std::thread::sleep(std::time::Duration::from_millis(20));
            continue;
        }

        let now = monotonic_time();
        if now < next_step {
            std::thread::sleep(std::time::Duration::from_secs_f64(
                (next_step - now).min(timestep),
            ));
            continue;
        }

        // Absorb wall-clock skew with a bounded number of catch-up steps
        let mut steps = 0u32;
        while monotonic_time() >= next_step && steps < MAX_CATCH_UP_STEPS {
            next_step += timestep;
            steps += 1;
        }
        if monotonic_time() >= next_step {
            next_step = monotonic_time() + timestep;
        }

        let timescale = f32::from_bits(state.timescale.load(Ordering::SeqCst));
        let result = catch_unwind(AssertUnwindSafe(|| {
            step_world(&state, timestep as f32 * timescale, steps);
        }));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!("world {world_id} failed: {message}");
            state.error_occurred.store(true, Ordering::SeqCst);
            break;
        }
    }

    info!("world thread {world_id} stopped");
}

fn step_world(state: &Arc<SharedState>, dt: f32, steps: u32) {
    let mut world = state.world.lock().unwrap();

    // Deliver pending world messages
    for message in state.messages.lock().unwrap().drain(..) {
        let reply = world.receive_message(&message.message, &message.args);
        let result = match reply {
            Some(reply) => message.keeper.fulfill(reply),
            None => message
                .keeper
                .fail(format!("world did not handle message '{}'", message.message)),
        };
        if result.is_err() {
            warn!("world message promise already finished");
        }
    }

    // Per-client incoming packets; a failing client is quarantined
    let incoming: Vec<(ConnectionId, Vec<Packet>)> = {
        let mut map = state.incoming.lock().unwrap();
        map.drain().collect()
    };
    for (client_id, packets) in incoming {
        if state.errored_clients.lock().unwrap().contains(&client_id) {
            continue;
        }
        if let Err(e) = world.handle_incoming_packets(client_id, packets) {
            warn!("client {client_id} errored: {e}");
            state.errored_clients.lock().unwrap().insert(client_id);
        }
    }

    for _ in 0..steps.max(1) {
        world.update(dt);
    }

    // Drain produced packets into the outgoing queues
    {
        let mut outgoing = state.outgoing.lock().unwrap();
        for client_id in world.client_ids() {
            let packets = world.get_outgoing_packets(client_id);
            if !packets.is_empty() {
                outgoing.entry(client_id).or_default().extend(packets);
            }
        }
    }

    if let Some(action) = state.update_action.lock().unwrap().as_mut() {
        action(&mut world);
    }

    state
        .should_expire
        .store(world.should_expire(), Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::server::{WorldServerConfig, WorldServer};
    use crate::world::storage::WorldStorage;
    use crate::world::template::{TerrestrialParameters, WorldTemplate};
    use crate::warping::InstanceWorldId;
    use skyward_core::math::Vec2U;
    use std::time::Duration;

    fn test_thread() -> WorldServerThread {
        let template = WorldTemplate::terrestrial(
            99,
            &TerrestrialParameters {
                size: Vec2U::new(256, 256),
                surface_level: 128,
                undersurface_level: 100,
                core_level: 32,
                ..TerrestrialParameters::default()
            },
        );
        let world = WorldServer::new(
            "thread-test".into(),
            template,
            WorldStorage::memory(),
            WorldServerConfig::default(),
        )
        .unwrap();
        WorldServerThread::new(
            world,
            WorldId::Instance(InstanceWorldId::shared("thread-test")),
            1.0 / 60.0,
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn thread_steps_the_world() {
        let thread = test_thread();
        thread.start();
        assert!(wait_until(|| thread
            .execute_action(|world| world.current_step())
            > 2));
        thread.stop();
        assert!(!thread.server_error_occurred());
    }

    #[test]
    fn clients_join_and_leave_through_the_thread() {
        let thread = test_thread();
        thread.start();

        assert!(thread.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default()
        ));
        assert!(thread.has_client(1));

        assert!(wait_until(|| !thread.pull_outgoing_packets(1).is_empty()));

        let final_packets = thread.remove_client(1);
        assert!(final_packets
            .iter()
            .any(|p| matches!(p, Packet::WorldStop { .. })));
        assert!(thread.no_clients());
        thread.stop();
    }

    #[test]
    fn bad_packets_quarantine_only_that_client() {
        let thread = test_thread();
        thread.start();
        thread.add_client(
            1,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default(),
        );
        thread.add_client(
            2,
            &SpawnTarget::Default,
            false,
            false,
            NetCompatibilityRules::default(),
        );

        // A handshake packet is not valid inside a world
        thread.push_incoming_packets(
            1,
            vec![Packet::ProtocolRequest {
                protocol_version: 0,
            }],
        );
        assert!(wait_until(|| thread.errored_clients().contains(&1)));
        assert!(!thread.errored_clients().contains(&2));
        assert!(!thread.server_error_occurred(), "thread stays healthy");
        thread.stop();
    }

    #[test]
    fn pause_freezes_stepping() {
        let thread = test_thread();
        let pause = Arc::new(AtomicBool::new(true));
        thread.set_pause(pause.clone());
        thread.start();

        std::thread::sleep(Duration::from_millis(50));
        let paused_steps = thread.execute_action(|world| world.current_step());
        assert_eq!(paused_steps, 0, "paused world does not step");

        pause.store(false, Ordering::SeqCst);
        assert!(wait_until(|| thread
            .execute_action(|world| world.current_step())
            > 0));
        thread.stop();
    }

    #[test]
    fn world_messages_resolve_their_promises() {
        use skyward_core::types::rpc_promise::RpcThreadPromise;

        let thread = test_thread();
        thread.start();

        let (promise, keeper) = RpcThreadPromise::<Json>::create_pair();
        thread.pass_messages(vec![WorldMessage {
            message: "unhandled".into(),
            args: Vec::new(),
            keeper,
        }]);
        assert!(wait_until(|| promise.finished()));
        assert!(promise.failed_state(), "unhandled messages fail");
        thread.stop();
    }
}
