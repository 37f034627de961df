//! Fixed-size vector types.

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// A fixed-size vector over `N` components.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vector<T, const N: usize>(pub [T; N]);

pub type Vec2<T> = Vector<T, 2>;
pub type Vec3<T> = Vector<T, 3>;
pub type Vec4<T> = Vector<T, 4>;

pub type Vec2I = Vec2<i32>;
pub type Vec2U = Vec2<u32>;
pub type Vec2F = Vec2<f32>;
pub type Vec3I = Vec3<i32>;
pub type Vec3F = Vec3<f32>;
pub type Vec4F = Vec4<f32>;

impl<T: Copy + Default, const N: usize> Default for Vector<T, N> {
    fn default() -> Self {
        Vector([T::default(); N])
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for Vector<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().enumerate().try_for_each(|(i, v)| {
            write!(f, "{}{v:?}", if i == 0 { "(" } else { ", " })
        })?;
        write!(f, ")")
    }
}

impl<T: Copy, const N: usize> Vector<T, N> {
    /// Vector with every component set to `value`.
    pub fn filled(value: T) -> Self {
        Vector([value; N])
    }

    pub fn as_array(&self) -> &[T; N] {
        &self.0
    }
}

impl<T: Copy + Default, const N: usize> Vector<T, N> {
    pub fn zero() -> Self {
        Self::default()
    }
}

impl<T, const N: usize> Index<usize> for Vector<T, N> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.0[index]
    }
}

impl<T, const N: usize> IndexMut<usize> for Vector<T, N> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.0[index]
    }
}

impl<T: Copy> Vec2<T> {
    pub fn new(x: T, y: T) -> Self {
        Vector([x, y])
    }

    pub fn x(&self) -> T {
        self.0[0]
    }

    pub fn y(&self) -> T {
        self.0[1]
    }
}

impl<T: Copy> Vec3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Vector([x, y, z])
    }

    pub fn x(&self) -> T {
        self.0[0]
    }

    pub fn y(&self) -> T {
        self.0[1]
    }

    pub fn z(&self) -> T {
        self.0[2]
    }

    pub fn vec2(&self) -> Vec2<T> {
        Vector([self.0[0], self.0[1]])
    }
}

impl<T: Copy> Vec4<T> {
    pub fn new(x: T, y: T, z: T, w: T) -> Self {
        Vector([x, y, z, w])
    }
}

// Componentwise arithmetic for any numeric component type.

impl<T: Copy + Add<Output = T>, const N: usize> Add for Vector<T, N> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i] + rhs.0[i];
        }
        self
    }
}

impl<T: Copy + Add<Output = T>, const N: usize> AddAssign for Vector<T, N> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: Copy + Sub<Output = T>, const N: usize> Sub for Vector<T, N> {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i] - rhs.0[i];
        }
        self
    }
}

impl<T: Copy + Sub<Output = T>, const N: usize> SubAssign for Vector<T, N> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<T: Copy + Mul<Output = T>, const N: usize> Mul<T> for Vector<T, N> {
    type Output = Self;

    fn mul(mut self, rhs: T) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i] * rhs;
        }
        self
    }
}

impl<T: Copy + Div<Output = T>, const N: usize> Div<T> for Vector<T, N> {
    type Output = Self;

    fn div(mut self, rhs: T) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i] / rhs;
        }
        self
    }
}

impl<T: Copy + Neg<Output = T>, const N: usize> Neg for Vector<T, N> {
    type Output = Self;

    fn neg(mut self) -> Self {
        for i in 0..N {
            self.0[i] = -self.0[i];
        }
        self
    }
}

impl<T: Copy + Ord, const N: usize> Vector<T, N> {
    pub fn piecewise_min(mut self, rhs: Self) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i].min(rhs.0[i]);
        }
        self
    }

    pub fn piecewise_max(mut self, rhs: Self) -> Self {
        for i in 0..N {
            self.0[i] = self.0[i].max(rhs.0[i]);
        }
        self
    }
}

macro_rules! float_vector_impl {
    ($t:ty) => {
        impl<const N: usize> Vector<$t, N> {
            pub fn magnitude_squared(&self) -> $t {
                self.0.iter().map(|v| v * v).sum()
            }

            pub fn magnitude(&self) -> $t {
                self.magnitude_squared().sqrt()
            }

            pub fn normalized(&self) -> Self {
                let mag = self.magnitude();
                if mag == 0.0 {
                    *self
                } else {
                    *self / mag
                }
            }

            pub fn dot(&self, rhs: Self) -> $t {
                let mut sum = 0.0;
                for i in 0..N {
                    sum += self.0[i] * rhs.0[i];
                }
                sum
            }

            pub fn sum(&self) -> $t {
                self.0.iter().sum()
            }

            pub fn min_component(&self) -> $t {
                self.0.iter().copied().fold(<$t>::INFINITY, <$t>::min)
            }

            pub fn max_component(&self) -> $t {
                self.0.iter().copied().fold(<$t>::NEG_INFINITY, <$t>::max)
            }

            pub fn vmin(mut self, rhs: Self) -> Self {
                for i in 0..N {
                    self.0[i] = self.0[i].min(rhs.0[i]);
                }
                self
            }

            pub fn vmax(mut self, rhs: Self) -> Self {
                for i in 0..N {
                    self.0[i] = self.0[i].max(rhs.0[i]);
                }
                self
            }
        }

        impl Vec2<$t> {
            pub fn floor_vec(&self) -> Vec2I {
                Vec2I::new(self.0[0].floor() as i32, self.0[1].floor() as i32)
            }

            pub fn round_vec(&self) -> Vec2I {
                Vec2I::new(self.0[0].round() as i32, self.0[1].round() as i32)
            }

            pub fn angle(&self) -> $t {
                self.0[1].atan2(self.0[0])
            }

            pub fn with_angle(angle: $t, magnitude: $t) -> Self {
                Vec2::new(angle.cos() * magnitude, angle.sin() * magnitude)
            }

            pub fn rotate(&self, angle: $t) -> Self {
                let (sin, cos) = angle.sin_cos();
                Vec2::new(
                    self.0[0] * cos - self.0[1] * sin,
                    self.0[0] * sin + self.0[1] * cos,
                )
            }
        }
    };
}

float_vector_impl!(f32);

impl Vec2I {
    pub fn to_f32(&self) -> Vec2F {
        Vec2F::new(self.0[0] as f32, self.0[1] as f32)
    }
}

impl Vec2U {
    pub fn to_i32(&self) -> Vec2I {
        Vec2I::new(self.0[0] as i32, self.0[1] as i32)
    }

    pub fn to_f32(&self) -> Vec2F {
        Vec2F::new(self.0[0] as f32, self.0[1] as f32)
    }
}

impl From<Vec2I> for Vec2F {
    fn from(v: Vec2I) -> Vec2F {
        v.to_f32()
    }
}

impl From<Vec2U> for Vec2I {
    fn from(v: Vec2U) -> Vec2I {
        v.to_i32()
    }
}

impl<T: Serialize, const N: usize> Serialize for Vector<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(N))?;
        for v in &self.0 {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

impl<'de, T: Deserialize<'de> + Copy + Default, const N: usize> Deserialize<'de> for Vector<T, N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArrayVisitor<T, const N: usize>(std::marker::PhantomData<T>);

        impl<'de, T: Deserialize<'de> + Copy + Default, const N: usize> Visitor<'de>
            for ArrayVisitor<T, N>
        {
            type Value = Vector<T, N>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a sequence of {N} numbers")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = [T::default(); N];
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Vector(out))
            }
        }

        deserializer.deserialize_seq(ArrayVisitor(std::marker::PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn arithmetic() {
        let a = Vec2F::new(1.0, 2.0);
        let b = Vec2F::new(3.0, -1.0);
        assert_eq!(a + b, Vec2F::new(4.0, 1.0));
        assert_eq!(a - b, Vec2F::new(-2.0, 3.0));
        assert_eq!(a * 2.0, Vec2F::new(2.0, 4.0));
        assert_eq!(-a, Vec2F::new(-1.0, -2.0));
    }

    #[test]
    fn magnitude_and_dot() {
        let v = Vec2F::new(3.0, 4.0);
        assert_relative_eq!(v.magnitude(), 5.0);
        assert_relative_eq!(v.normalized().magnitude(), 1.0);
        assert_relative_eq!(v.dot(Vec2F::new(1.0, 0.0)), 3.0);
    }

    #[test]
    fn rotation() {
        let v = Vec2F::new(1.0, 0.0).rotate(std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(v.x(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.y(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn json_round_trip() {
        let v = Vec3F::new(1.0, 0.5, 0.25);
        let text = serde_json::to_string(&v).unwrap();
        let back: Vec3F = serde_json::from_str(&text).unwrap();
        assert_eq!(v, back);
    }
}
