//! The world metric: a Cartesian plane that wraps in x.
//!
//! Worlds with a nonzero width are toroidal along x. All geometric
//! predicates here are defined by splitting their operands at the seam and
//! testing the pieces under plain Euclidean geometry, so callers never have
//! to reason about wrap themselves.

use crate::math::{Line2F, PolyF, RectF, RectI, Vec2F, Vec2I, Vec2U};

/// Geometry over a world of fixed size, wrapping in x iff width is nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorldGeometry {
    size: Vec2U,
}

impl WorldGeometry {
    pub fn new(size: Vec2U) -> Self {
        WorldGeometry { size }
    }

    pub fn size(&self) -> Vec2U {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.x()
    }

    pub fn height(&self) -> u32 {
        self.size.y()
    }

    fn wraps(&self) -> bool {
        self.size.x() != 0
    }

    /// Wraps an x coordinate into `[0, width)`.
    pub fn xwrap_f(&self, x: f32) -> f32 {
        if self.wraps() {
            pfmod(x, self.size.x() as f32)
        } else {
            x
        }
    }

    pub fn xwrap_i(&self, x: i32) -> i32 {
        if self.wraps() {
            pimod(x, self.size.x() as i32)
        } else {
            x
        }
    }

    pub fn xwrap(&self, pos: Vec2F) -> Vec2F {
        Vec2F::new(self.xwrap_f(pos.x()), pos.y())
    }

    pub fn xwrap_vec_i(&self, pos: Vec2I) -> Vec2I {
        Vec2I::new(self.xwrap_i(pos.x()), pos.y())
    }

    /// Clamps a y coordinate into `[0, height)`.
    pub fn yclamp(&self, y: f32) -> f32 {
        y.clamp(0.0, (self.size.y() as f32 - 1.0).max(0.0))
    }

    pub fn yclamp_i(&self, y: i32) -> i32 {
        y.clamp(0, (self.size.y() as i32 - 1).max(0))
    }

    /// Shortest signed x delta from `b` to `a`; magnitude is at most
    /// `width / 2`.
    pub fn x_diff_f(&self, a: f32, b: f32) -> f32 {
        if self.wraps() {
            wrap_diff_f(a, b, self.size.x() as f32)
        } else {
            a - b
        }
    }

    pub fn x_diff_i(&self, a: i32, b: i32) -> i32 {
        if self.wraps() {
            wrap_diff_i(a, b, self.size.x() as i32)
        } else {
            a - b
        }
    }

    pub fn diff(&self, a: Vec2F, b: Vec2F) -> Vec2F {
        Vec2F::new(self.x_diff_f(a.x(), b.x()), a.y() - b.y())
    }

    pub fn diff_i(&self, a: Vec2I, b: Vec2I) -> Vec2I {
        Vec2I::new(self.x_diff_i(a.x(), b.x()), a.y() - b.y())
    }

    /// The representation of `pos` nearest to `anchor`, possibly outside of
    /// `[0, width)`.
    pub fn nearest_to(&self, anchor: Vec2F, pos: Vec2F) -> Vec2F {
        anchor + self.diff(pos, anchor)
    }

    /// Wrap-aware linear interpolation along the shortest x path; when the
    /// distance exceeds `discontinuity_threshold`, snaps to the end value
    /// rather than sliding through intermediate positions.
    pub fn lerp(
        &self,
        offset: f32,
        min: Vec2F,
        max: Vec2F,
        discontinuity_threshold: Option<f32>,
    ) -> Vec2F {
        let distance = self.diff(max, min);
        if let Some(threshold) = discontinuity_threshold {
            if distance.magnitude() > threshold {
                return min + distance;
            }
        }
        min + distance * offset
    }

    /// Splits a rect at the seam into at most two in-range rects.
    ///
    /// Not defined for rects wider than the world.
    pub fn split_rect(&self, rect: RectF) -> Vec<RectF> {
        if rect.is_null() || !self.wraps() {
            return vec![rect];
        }
        let width = self.size.x() as f32;
        let min = self.xwrap(rect.min);
        let wrapped = RectF::new(min, min + rect.size());
        if wrapped.x_max() > width {
            vec![
                RectF::from_coords(wrapped.x_min(), wrapped.y_min(), width, wrapped.y_max()),
                RectF::from_coords(0.0, wrapped.y_min(), wrapped.x_max() - width, wrapped.y_max()),
            ]
        } else {
            vec![wrapped]
        }
    }

    pub fn split_rect_i(&self, rect: RectI) -> Vec<RectI> {
        if rect.is_null() || !self.wraps() {
            return vec![rect];
        }
        let width = self.size.x() as i32;
        let min = self.xwrap_vec_i(rect.min);
        let wrapped = RectI::new(min, min + rect.size());
        if wrapped.x_max() > width {
            vec![
                RectI::from_coords(wrapped.x_min(), wrapped.y_min(), width, wrapped.y_max()),
                RectI::from_coords(0, wrapped.y_min(), wrapped.x_max() - width, wrapped.y_max()),
            ]
        } else {
            vec![wrapped]
        }
    }

    /// Splits a segment crossing the seam into two collinear pieces. With
    /// `preserve_direction`, piece order and orientation concatenate back
    /// into the original direction.
    pub fn split_line(&self, mut line: Line2F, preserve_direction: bool) -> Vec<Line2F> {
        if !self.wraps() {
            return vec![line];
        }
        let width = self.size.x() as f32;
        let swapped = line.make_positive() && preserve_direction;
        let min = self.xwrap(line.min());
        let mut wrapped = Line2F::new(min, min + line.diff());

        if wrapped.max().x() > width {
            let seam = Line2F::new(Vec2F::new(width, 0.0), Vec2F::new(width, 1.0));
            let crossing = wrapped
                .infinite_intersection(&seam)
                .unwrap_or(Vec2F::new(width, wrapped.max().y()));
            let far = wrapped.max() - Vec2F::new(width, 0.0);
            if swapped {
                vec![
                    Line2F::new(far, Vec2F::new(0.0, crossing.y())),
                    Line2F::new(Vec2F::new(width, crossing.y()), wrapped.min()),
                ]
            } else {
                vec![
                    Line2F::new(wrapped.min(), Vec2F::new(width, crossing.y())),
                    Line2F::new(Vec2F::new(0.0, crossing.y()), far),
                ]
            }
        } else {
            if swapped {
                wrapped.reverse();
            }
            vec![wrapped]
        }
    }

    /// Splits a convex polygon at the seam, producing at most two polygons
    /// with the crossing points inserted as new vertices.
    pub fn split_poly(&self, poly: &PolyF) -> Vec<PolyF> {
        if poly.is_null() || !self.wraps() {
            return vec![poly.clone()];
        }
        let width = self.size.x() as f32;
        let correct = Vec2F::new(width, 0.0);
        let bound_left = Line2F::new(Vec2F::new(0.0, 0.0), Vec2F::new(0.0, 1.0));
        let bound_right = Line2F::new(Vec2F::new(width, 0.0), Vec2F::new(width, 1.0));

        let mut halves = [PolyF::default(), PolyF::default()];
        let mut select = 0usize;

        for i in 0..poly.sides() {
            let segment = poly.side(i);
            if (segment.min().x() < 0.0) != (segment.max().x() < 0.0) {
                let intersect = segment
                    .infinite_intersection(&bound_left)
                    .unwrap_or(segment.a);
                if segment.min().x() < 0.0 {
                    halves[select].add(segment.min() + correct);
                    halves[select].add(Vec2F::new(width, intersect.y()));
                    select ^= 1;
                    halves[select].add(Vec2F::new(0.0, intersect.y()));
                } else {
                    halves[select].add(segment.min());
                    halves[select].add(Vec2F::new(0.0, intersect.y()));
                    select ^= 1;
                    halves[select].add(Vec2F::new(width, intersect.y()));
                }
            } else if (segment.min().x() > width) != (segment.max().x() > width) {
                let intersect = segment
                    .infinite_intersection(&bound_right)
                    .unwrap_or(segment.a);
                if segment.min().x() > width {
                    halves[select].add(segment.min() - correct);
                    halves[select].add(Vec2F::new(0.0, intersect.y()));
                    select ^= 1;
                    halves[select].add(Vec2F::new(width, intersect.y()));
                } else {
                    halves[select].add(segment.min());
                    halves[select].add(Vec2F::new(width, intersect.y()));
                    select ^= 1;
                    halves[select].add(Vec2F::new(0.0, intersect.y()));
                }
            } else if segment.min().x() < 0.0 {
                halves[select].add(segment.min() + correct);
            } else if segment.min().x() > width {
                halves[select].add(segment.min() - correct);
            } else {
                halves[select].add(segment.min());
            }
        }

        let [first, second] = halves;
        if second.is_null() {
            vec![first]
        } else if first.is_null() {
            vec![second]
        } else {
            vec![first, second]
        }
    }

    /// Splits an x interval `[start, end)` at the seam.
    ///
    /// Not defined for intervals wider than the world.
    pub fn split_x_region(&self, region: Vec2I) -> Vec<Vec2I> {
        if !self.wraps() {
            return vec![region];
        }
        let width = self.size.x() as i32;
        let x1 = self.xwrap_i(region.x());
        let x2 = x1 + region.y() - region.x();
        if x2 > width {
            vec![Vec2I::new(x1, width), Vec2I::new(0, x2 - width)]
        } else {
            vec![Vec2I::new(x1, x2)]
        }
    }

    pub fn rect_contains(&self, rect: &RectF, pos: Vec2F) -> bool {
        let wrapped = self.xwrap(pos);
        self.split_rect(*rect).iter().any(|r| r.contains(wrapped))
    }

    pub fn rect_intersects_rect(&self, a: &RectF, b: &RectF) -> bool {
        for ra in self.split_rect(*a) {
            for rb in self.split_rect(*b) {
                if ra.intersects(&rb) {
                    return true;
                }
            }
        }
        false
    }

    /// Overlap computed against the representation of `b` nearest to `a`.
    pub fn rect_overlap(&self, a: &RectF, b: &RectF) -> RectF {
        let near_min = self.nearest_to(a.min, b.min);
        a.overlap(&RectF::with_size(near_min, b.size()))
    }

    pub fn poly_contains(&self, poly: &PolyF, pos: Vec2F) -> bool {
        let wrapped = self.xwrap(pos);
        self.split_poly(poly).iter().any(|p| p.contains(wrapped))
    }

    pub fn poly_overlap_area(&self, a: &PolyF, b: &PolyF) -> f32 {
        let mut area = 0.0;
        for pa in self.split_poly(a) {
            for pb in self.split_poly(b) {
                area += PolyF::clip(&pa, &pb).convex_area();
            }
        }
        area
    }

    pub fn line_intersects_rect(&self, line: &Line2F, rect: &RectF) -> bool {
        for l in self.split_line(*line, false) {
            for r in self.split_rect(*rect) {
                if l.intersects_rect(&r) {
                    return true;
                }
            }
        }
        false
    }

    pub fn line_intersects_poly(&self, line: &Line2F, poly: &PolyF) -> bool {
        for l in self.split_line(*line, false) {
            for p in self.split_poly(poly) {
                if p.intersects_line(&l) {
                    return true;
                }
            }
        }
        false
    }

    pub fn poly_intersects_poly(&self, a: &PolyF, b: &PolyF) -> bool {
        for pa in self.split_poly(a) {
            for pb in self.split_poly(b) {
                if pa.intersects_poly(&pb) {
                    return true;
                }
            }
        }
        false
    }

    pub fn line_intersects_circle(&self, line: &Line2F, center: Vec2F, radius: f32) -> bool {
        self.split_line(*line, false)
            .iter()
            .any(|l| l.distance_to(self.nearest_to(l.center(), center)) <= radius)
    }

    pub fn rect_intersects_circle(&self, rect: &RectF, center: Vec2F, radius: f32) -> bool {
        if self.rect_contains(rect, center) {
            return true;
        }
        self.split_rect(*rect).iter().any(|r| {
            r.edges()
                .iter()
                .any(|&(a, b)| self.line_intersects_circle(&Line2F::new(a, b), center, radius))
        })
    }

    /// First crossing of the directed line with the polygon, honoring line
    /// direction across the seam.
    pub fn line_intersects_poly_at(&self, line: &Line2F, poly: &PolyF) -> Option<Vec2F> {
        for l in self.split_line(*line, true) {
            for p in self.split_poly(poly) {
                if let Some(point) = p.line_intersection(&l) {
                    return Some(point);
                }
            }
        }
        None
    }

    pub fn poly_distance(&self, poly: &PolyF, point: Vec2F) -> f32 {
        poly.distance(self.nearest_to(poly.center(), point))
    }

    /// Nearest coordinate within `rect` to `pos`, under the wrap metric.
    pub fn nearest_coord_in_box(&self, rect: &RectF, pos: Vec2F) -> Vec2F {
        let offset = rect.center();
        let relative = self.diff(pos, offset);
        let mut centered = *rect;
        centered.set_center(Vec2F::zero());
        centered.nearest_coord_to(relative) + offset
    }

    pub fn diff_to_nearest_coord_in_box(&self, rect: &RectF, pos: Vec2F) -> Vec2F {
        self.diff(pos, self.nearest_coord_in_box(rect, pos))
    }
}

fn pfmod(x: f32, m: f32) -> f32 {
    let r = x % m;
    if r < 0.0 {
        r + m
    } else {
        r
    }
}

fn pimod(x: i32, m: i32) -> i32 {
    let r = x % m;
    if r < 0 {
        r + m
    } else {
        r
    }
}

fn wrap_diff_f(a: f32, b: f32, size: f32) -> f32 {
    let diff = pfmod(a - b, size);
    if diff > size / 2.0 {
        diff - size
    } else {
        diff
    }
}

fn wrap_diff_i(a: i32, b: i32, size: i32) -> i32 {
    let diff = pimod(a - b, size);
    if diff > size / 2 {
        diff - size
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn geometry() -> WorldGeometry {
        WorldGeometry::new(Vec2U::new(100, 50))
    }

    #[test]
    fn xwrap_is_idempotent_and_in_range() {
        let geo = geometry();
        for x in [-250.5f32, -100.0, -0.5, 0.0, 33.3, 99.9, 100.0, 570.25] {
            let wrapped = geo.xwrap_f(x);
            assert!((0.0..100.0).contains(&wrapped), "{x} wrapped to {wrapped}");
            assert_relative_eq!(geo.xwrap_f(wrapped), wrapped);
        }
    }

    #[test]
    fn diff_magnitude_is_bounded() {
        let geo = geometry();
        for (a, b) in [(10.0f32, 90.0), (90.0, 10.0), (0.0, 50.0), (99.0, 1.0)] {
            let d = geo.x_diff_f(a, b);
            assert!(d.abs() <= 50.0, "diff({a}, {b}) = {d}");
            assert_relative_eq!(geo.xwrap_f(b + d), geo.xwrap_f(a), epsilon = 1e-4);
        }
    }

    #[test]
    fn split_rect_covers_original() {
        let geo = geometry();
        let rect = RectF::from_coords(90.0, 10.0, 110.0, 20.0);
        let halves = geo.split_rect(rect);
        assert_eq!(halves.len(), 2);
        let area: f32 = halves.iter().map(|r| r.width() * r.height()).sum();
        assert_relative_eq!(area, 200.0);
        for half in &halves {
            assert!(half.x_min() >= 0.0 && half.x_max() <= 100.0);
        }

        let inside = RectF::from_coords(10.0, 10.0, 20.0, 20.0);
        assert_eq!(geo.split_rect(inside), vec![inside]);
    }

    #[test]
    fn split_line_preserves_direction() {
        let geo = geometry();
        let line = Line2F::new(Vec2F::new(95.0, 0.0), Vec2F::new(105.0, 10.0));
        let pieces = geo.split_line(line, true);
        assert_eq!(pieces.len(), 2);
        let total: f32 = pieces.iter().map(Line2F::length).sum();
        assert_relative_eq!(total, line.length(), epsilon = 1e-4);
        // Concatenation runs in the original left-to-right direction.
        assert_relative_eq!(pieces[0].a.x(), 95.0, epsilon = 1e-4);
        assert_relative_eq!(pieces[1].b.x(), 5.0, epsilon = 1e-4);
    }

    #[test]
    fn split_line_reversed_input_keeps_direction() {
        let geo = geometry();
        let line = Line2F::new(Vec2F::new(105.0, 10.0), Vec2F::new(95.0, 0.0));
        let pieces = geo.split_line(line, true);
        assert_eq!(pieces.len(), 2);
        assert_relative_eq!(pieces[0].a.x(), 5.0, epsilon = 1e-4);
        assert_relative_eq!(pieces[1].b.x(), 95.0, epsilon = 1e-4);
    }

    #[test]
    fn split_poly_at_seam_conserves_area() {
        let geo = geometry();
        let poly = PolyF::rect(Vec2F::new(95.0, 0.0), Vec2F::new(105.0, 10.0));
        let halves = geo.split_poly(&poly);
        assert_eq!(halves.len(), 2);
        let area: f32 = halves.iter().map(PolyF::convex_area).sum();
        assert_relative_eq!(area, 100.0, epsilon = 1e-3);
    }

    #[test]
    fn wrapped_predicates_see_through_the_seam() {
        let geo = geometry();
        let rect = RectF::from_coords(95.0, 0.0, 105.0, 10.0);
        assert!(geo.rect_contains(&rect, Vec2F::new(2.0, 5.0)));
        assert!(geo.rect_contains(&rect, Vec2F::new(97.0, 5.0)));
        assert!(!geo.rect_contains(&rect, Vec2F::new(50.0, 5.0)));

        let other = RectF::from_coords(0.0, 5.0, 3.0, 15.0);
        assert!(geo.rect_intersects_rect(&rect, &other));
    }

    #[test]
    fn non_wrapping_world_is_plain_euclidean() {
        let geo = WorldGeometry::new(Vec2U::new(0, 50));
        assert_relative_eq!(geo.x_diff_f(10.0, 90.0), -80.0);
        assert_relative_eq!(geo.xwrap_f(-5.0), -5.0);
    }
}
