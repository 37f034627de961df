//! Axis-aligned rectangles.

use super::vector::{Vec2, Vec2F, Vec2I};
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle described by its min and max corners.
///
/// `max` is exclusive for integer rects used as tile regions, matching how
/// sector and window math treats them throughout the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Copy + Default + Deserialize<'de>"
))]
pub struct Rect<T> {
    pub min: Vec2<T>,
    pub max: Vec2<T>,
}

impl<T: Copy + Default> Default for Rect<T> {
    fn default() -> Self {
        Rect {
            min: Vec2::default(),
            max: Vec2::default(),
        }
    }
}

pub type RectF = Rect<f32>;
pub type RectI = Rect<i32>;
pub type RectU = Rect<u32>;

impl<T: Copy> Rect<T> {
    pub fn new(min: Vec2<T>, max: Vec2<T>) -> Self {
        Rect { min, max }
    }

    pub fn from_coords(x_min: T, y_min: T, x_max: T, y_max: T) -> Self {
        Rect {
            min: Vec2::new(x_min, y_min),
            max: Vec2::new(x_max, y_max),
        }
    }

    pub fn x_min(&self) -> T {
        self.min.x()
    }

    pub fn y_min(&self) -> T {
        self.min.y()
    }

    pub fn x_max(&self) -> T {
        self.max.x()
    }

    pub fn y_max(&self) -> T {
        self.max.y()
    }
}

macro_rules! rect_impl {
    ($t:ty) => {
        impl Rect<$t> {
            /// The canonical empty rect: min at +inf-most values, max at the
            /// -inf-most, so combining with any point or rect works.
            pub fn null() -> Self {
                Rect::from_coords(<$t>::MAX, <$t>::MAX, <$t>::MIN, <$t>::MIN)
            }

            pub fn is_null(&self) -> bool {
                self.min.x() > self.max.x() || self.min.y() > self.max.y()
            }

            pub fn is_empty(&self) -> bool {
                self.min.x() >= self.max.x() || self.min.y() >= self.max.y()
            }

            pub fn with_size(min: Vec2<$t>, size: Vec2<$t>) -> Self {
                Rect::new(min, min + size)
            }

            pub fn size(&self) -> Vec2<$t> {
                self.max - self.min
            }

            pub fn width(&self) -> $t {
                self.max.x() - self.min.x()
            }

            pub fn height(&self) -> $t {
                self.max.y() - self.min.y()
            }

            pub fn translated(&self, offset: Vec2<$t>) -> Self {
                Rect::new(self.min + offset, self.max + offset)
            }

            pub fn padded(&self, amount: $t) -> Self {
                Rect::new(
                    self.min - Vec2::filled(amount),
                    self.max + Vec2::filled(amount),
                )
            }

            pub fn combined(&self, other: &Self) -> Self {
                if self.is_null() {
                    return *other;
                }
                if other.is_null() {
                    return *self;
                }
                Rect::new(
                    Vec2::new(
                        self.min.x().min(other.min.x()),
                        self.min.y().min(other.min.y()),
                    ),
                    Vec2::new(
                        self.max.x().max(other.max.x()),
                        self.max.y().max(other.max.y()),
                    ),
                )
            }

            pub fn combine_point(&mut self, point: Vec2<$t>) {
                self.min = Vec2::new(self.min.x().min(point.x()), self.min.y().min(point.y()));
                self.max = Vec2::new(self.max.x().max(point.x()), self.max.y().max(point.y()));
            }

            /// The intersection of two rects; null when they do not overlap.
            pub fn overlap(&self, other: &Self) -> Self {
                Rect::new(
                    Vec2::new(
                        self.min.x().max(other.min.x()),
                        self.min.y().max(other.min.y()),
                    ),
                    Vec2::new(
                        self.max.x().min(other.max.x()),
                        self.max.y().min(other.max.y()),
                    ),
                )
            }

            pub fn intersects(&self, other: &Self) -> bool {
                !(other.max.x() <= self.min.x()
                    || other.min.x() >= self.max.x()
                    || other.max.y() <= self.min.y()
                    || other.min.y() >= self.max.y())
            }

            pub fn contains(&self, point: Vec2<$t>) -> bool {
                point.x() >= self.min.x()
                    && point.x() < self.max.x()
                    && point.y() >= self.min.y()
                    && point.y() < self.max.y()
            }

            pub fn contains_rect(&self, other: &Self) -> bool {
                other.min.x() >= self.min.x()
                    && other.min.y() >= self.min.y()
                    && other.max.x() <= self.max.x()
                    && other.max.y() <= self.max.y()
            }

            /// Clamps `point` to the nearest coordinate inside the rect.
            pub fn nearest_coord_to(&self, point: Vec2<$t>) -> Vec2<$t> {
                Vec2::new(
                    point.x().max(self.min.x()).min(self.max.x()),
                    point.y().max(self.min.y()).min(self.max.y()),
                )
            }
        }
    };
}

rect_impl!(f32);
rect_impl!(i32);
rect_impl!(u32);

impl RectF {
    pub fn center(&self) -> Vec2F {
        (self.min + self.max) / 2.0
    }

    pub fn set_center(&mut self, center: Vec2F) {
        let half = self.size() / 2.0;
        self.min = center - half;
        self.max = center + half;
    }

    /// The four edges as line endpoint pairs, counterclockwise from the
    /// bottom edge.
    pub fn edges(&self) -> [(Vec2F, Vec2F); 4] {
        let (a, b) = (self.min, self.max);
        [
            (a, Vec2F::new(b.x(), a.y())),
            (Vec2F::new(b.x(), a.y()), b),
            (b, Vec2F::new(a.x(), b.y())),
            (Vec2F::new(a.x(), b.y()), a),
        ]
    }

    pub fn to_rect_i(&self) -> RectI {
        RectI::from_coords(
            self.min.x().floor() as i32,
            self.min.y().floor() as i32,
            self.max.x().ceil() as i32,
            self.max.y().ceil() as i32,
        )
    }
}

impl RectI {
    pub fn to_rect_f(&self) -> RectF {
        RectF::from_coords(
            self.min.x() as f32,
            self.min.y() as f32,
            self.max.x() as f32,
            self.max.y() as f32,
        )
    }

    pub fn center(&self) -> Vec2I {
        Vec2I::new(
            (self.min.x() + self.max.x()) / 2,
            (self.min.y() + self.max.y()) / 2,
        )
    }

    /// Iterate every integer position inside the rect, column major.
    pub fn positions(&self) -> impl Iterator<Item = Vec2I> + '_ {
        let (x0, x1, y0, y1) = (self.min.x(), self.max.x(), self.min.y(), self.max.y());
        (x0..x1).flat_map(move |x| (y0..y1).map(move |y| Vec2I::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_and_intersects() {
        let a = RectI::from_coords(0, 0, 10, 10);
        let b = RectI::from_coords(5, 5, 15, 15);
        assert!(a.intersects(&b));
        assert_eq!(a.overlap(&b), RectI::from_coords(5, 5, 10, 10));

        let c = RectI::from_coords(10, 0, 20, 10);
        assert!(!a.intersects(&c), "touching edges do not intersect");
    }

    #[test]
    fn null_combines_as_identity() {
        let mut acc = RectI::null();
        acc = acc.combined(&RectI::from_coords(2, 3, 4, 5));
        assert_eq!(acc, RectI::from_coords(2, 3, 4, 5));
        acc.combine_point(Vec2I::new(0, 10));
        assert_eq!(acc, RectI::from_coords(0, 3, 4, 10));
    }

    #[test]
    fn contains_is_half_open() {
        let r = RectI::from_coords(0, 0, 4, 4);
        assert!(r.contains(Vec2I::new(0, 0)));
        assert!(!r.contains(Vec2I::new(4, 4)));
    }

    #[test]
    fn positions_cover_area() {
        let r = RectI::from_coords(1, 1, 4, 3);
        assert_eq!(r.positions().count(), 6);
    }
}
