//! Convex polygons.

use super::line::Line2F;
use super::vector::Vec2F;

/// A convex polygon, vertices in counterclockwise order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyF {
    vertices: Vec<Vec2F>,
}

impl PolyF {
    pub fn new(vertices: Vec<Vec2F>) -> Self {
        PolyF { vertices }
    }

    pub fn rect(min: Vec2F, max: Vec2F) -> Self {
        PolyF {
            vertices: vec![
                min,
                Vec2F::new(max.x(), min.y()),
                max,
                Vec2F::new(min.x(), max.y()),
            ],
        }
    }

    pub fn is_null(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Vec2F] {
        &self.vertices
    }

    pub fn add(&mut self, vertex: Vec2F) {
        self.vertices.push(vertex);
    }

    pub fn sides(&self) -> usize {
        self.vertices.len()
    }

    /// The i-th side, from vertex i to vertex i+1 (wrapping).
    pub fn side(&self, i: usize) -> Line2F {
        let next = (i + 1) % self.vertices.len();
        Line2F::new(self.vertices[i], self.vertices[next])
    }

    pub fn translated(&self, offset: Vec2F) -> Self {
        PolyF {
            vertices: self.vertices.iter().map(|&v| v + offset).collect(),
        }
    }

    pub fn center(&self) -> Vec2F {
        if self.vertices.is_empty() {
            return Vec2F::zero();
        }
        let mut sum = Vec2F::zero();
        for &v in &self.vertices {
            sum += v;
        }
        sum / self.vertices.len() as f32
    }

    pub fn contains(&self, point: Vec2F) -> bool {
        if self.vertices.len() < 3 {
            return false;
        }
        for i in 0..self.vertices.len() {
            let side = self.side(i);
            if cross(side.diff(), point - side.a) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Signed area via the shoelace formula; counterclockwise polygons are
    /// positive.
    pub fn convex_area(&self) -> f32 {
        if self.vertices.len() < 3 {
            return 0.0;
        }
        let mut area = 0.0;
        for i in 0..self.vertices.len() {
            let s = self.side(i);
            area += cross(s.a, s.b);
        }
        area / 2.0
    }

    /// Sutherland-Hodgman clip of `subject` against convex `clip`.
    pub fn clip(subject: &PolyF, clip: &PolyF) -> PolyF {
        if subject.is_null() || clip.is_null() {
            return PolyF::default();
        }

        let mut output = subject.vertices.clone();
        for i in 0..clip.sides() {
            let edge = clip.side(i);
            let input = std::mem::take(&mut output);
            if input.is_empty() {
                break;
            }

            let inside = |p: Vec2F| cross(edge.diff(), p - edge.a) >= 0.0;
            for j in 0..input.len() {
                let current = input[j];
                let previous = input[(j + input.len() - 1) % input.len()];
                let segment = Line2F::new(previous, current);

                if inside(current) {
                    if !inside(previous) {
                        if let Some(p) = segment.infinite_intersection(&edge) {
                            output.push(p);
                        }
                    }
                    output.push(current);
                } else if inside(previous) {
                    if let Some(p) = segment.infinite_intersection(&edge) {
                        output.push(p);
                    }
                }
            }
        }

        PolyF { vertices: output }
    }

    pub fn intersects_poly(&self, other: &PolyF) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        if other
            .vertices
            .first()
            .is_some_and(|&v| self.contains(v))
        {
            return true;
        }
        if self
            .vertices
            .first()
            .is_some_and(|&v| other.contains(v))
        {
            return true;
        }
        for i in 0..self.sides() {
            for j in 0..other.sides() {
                if self.side(i).intersects(&other.side(j)) {
                    return true;
                }
            }
        }
        false
    }

    pub fn intersects_line(&self, line: &Line2F) -> bool {
        self.line_intersection(line).is_some() || self.contains(line.a)
    }

    /// First intersection of the directed line with the polygon boundary,
    /// nearest to the line start.
    pub fn line_intersection(&self, line: &Line2F) -> Option<Vec2F> {
        let mut best: Option<(f32, Vec2F)> = None;
        for i in 0..self.sides() {
            if let Some(p) = line.intersection(&self.side(i)) {
                let dist = (p - line.a).magnitude_squared();
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, p));
                }
            }
        }
        best.map(|(_, p)| p)
    }

    /// Distance from the polygon to a point; zero when inside.
    pub fn distance(&self, point: Vec2F) -> f32 {
        if self.contains(point) {
            return 0.0;
        }
        let mut best = f32::INFINITY;
        for i in 0..self.sides() {
            best = best.min(self.side(i).distance_to(point));
        }
        if best.is_finite() {
            best
        } else {
            0.0
        }
    }
}

fn cross(a: Vec2F, b: Vec2F) -> f32 {
    a.x() * b.y() - a.y() * b.x()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> PolyF {
        PolyF::rect(Vec2F::new(0.0, 0.0), Vec2F::new(1.0, 1.0))
    }

    #[test]
    fn contains_interior_point() {
        assert!(unit_square().contains(Vec2F::new(0.5, 0.5)));
        assert!(!unit_square().contains(Vec2F::new(1.5, 0.5)));
    }

    #[test]
    fn area_of_unit_square() {
        assert_relative_eq!(unit_square().convex_area(), 1.0);
    }

    #[test]
    fn clip_overlapping_squares() {
        let a = unit_square();
        let b = PolyF::rect(Vec2F::new(0.5, 0.5), Vec2F::new(1.5, 1.5));
        let clipped = PolyF::clip(&a, &b);
        assert_relative_eq!(clipped.convex_area(), 0.25, epsilon = 1e-5);
    }

    #[test]
    fn disjoint_polys_do_not_intersect() {
        let a = unit_square();
        let b = PolyF::rect(Vec2F::new(2.0, 2.0), Vec2F::new(3.0, 3.0));
        assert!(!a.intersects_poly(&b));
        assert!(a.intersects_poly(&unit_square()));
    }

    #[test]
    fn line_intersection_picks_nearest() {
        let square = unit_square();
        let line = Line2F::new(Vec2F::new(-1.0, 0.5), Vec2F::new(2.0, 0.5));
        let hit = square.line_intersection(&line).unwrap();
        assert_relative_eq!(hit.x(), 0.0, epsilon = 1e-6);
    }
}
