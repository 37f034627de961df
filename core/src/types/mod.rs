//! The shared type vocabulary: ids, tiles, materials, liquids, promises,
//! randomness, clocks and persistence helpers.

pub mod celestial;
pub mod collision;
pub mod compression;
pub mod game;
pub mod id_map;
pub mod liquid;
pub mod lock_file;
pub mod material;
pub mod perlin;
pub mod random;
pub mod rpc_promise;
pub mod sha256;
pub mod tile;
pub mod time;
pub mod uuid;
pub mod versioning;
pub mod weighted_pool;
pub mod worker_pool;

pub use game::{ConnectionId, EntityId};
pub use id_map::IdMap;
pub use rpc_promise::{RpcPromise, RpcPromiseKeeper, RpcThreadPromise, RpcThreadPromiseKeeper};
pub use weighted_pool::WeightedPool;
