//! Geometric primitives used across the engine.
//!
//! Everything here is wrap-agnostic; the x-wrapping world metric lives in
//! [`crate::geometry`] and is built by composing these primitives.

mod line;
mod poly;
mod rect;
mod vector;

pub use line::Line2F;
pub use poly::PolyF;
pub use rect::{Rect, RectF, RectI, RectU};
pub use vector::{Vec2, Vec2F, Vec2I, Vec2U, Vec3, Vec3F, Vec3I, Vec4, Vec4F, Vector};

/// sqrt(2), the diagonal step cost used by the cellular light spread.
pub const SQRT2: f32 = std::f32::consts::SQRT_2;
