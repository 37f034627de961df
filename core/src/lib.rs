//! # Skyward Core
//!
//! Foundation crate for the Skyward universe server: math and geometry on
//! wrapping worlds, the cellular lighting engine, binary serialization,
//! randomness, cross-thread promises, and the shared tile/material/liquid
//! type vocabulary used by the server crate.
//!
//! ## Modules
//!
//! - `math` - Vector, rect, line and polygon primitives
//! - `geometry` - Toroidal (x-wrapping) world metric
//! - `lighting` - Spread and point-source cellular light calculation
//! - `serialization` - VLQ-framed binary readers and writers
//! - `types` - Ids, tiles, liquids, promises, pools, clocks and friends
//! - `error` - Crate error type

pub mod error;
pub mod geometry;
pub mod lighting;
pub mod math;
pub mod serialization;
pub mod types;

pub use error::{Error, Result};
pub use geometry::WorldGeometry;
pub use math::{Line2F, PolyF, Rect, RectF, RectI, Vec2, Vec2F, Vec2I, Vec2U, Vec3, Vec3F, Vector};
pub use types::uuid::Uuid;

/// Crate version, used in startup banners and storage metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
