use serde::{Deserialize, Serialize};

/// A particle position in kpc.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    /// Drops the coordinate perpendicular to `plane`.
    pub fn project(&self, plane: Plane) -> (f32, f32) {
        match plane {
            Plane::XY => (self.x, self.y),
            Plane::XZ => (self.x, self.z),
        }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(v: [f32; 3]) -> Self {
        Vec3::new(v[0], v[1], v[2])
    }
}

/// Orthogonal projection planes, named by the (horizontal, vertical) axes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Plane {
    XY,
    XZ,
}

/// Projects every position onto `plane`.
pub fn project_all(positions: &[Vec3], plane: Plane) -> Vec<(f32, f32)> {
    positions.iter().map(|p| p.project(plane)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keeps_the_named_axes() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(p.project(Plane::XY), (1.0, 2.0));
        assert_eq!(p.project(Plane::XZ), (1.0, 3.0));
    }

    #[test]
    fn project_all_preserves_order() {
        let pts = vec![Vec3::new(0.0, 1.0, 2.0), Vec3::new(-3.0, 4.0, -5.0)];
        assert_eq!(project_all(&pts, Plane::XZ), vec![(0.0, 2.0), (-3.0, -5.0)]);
    }

    #[test]
    fn array_conversion_keeps_axis_order() {
        let p = Vec3::from([1.5, -2.0, 0.25]);
        assert_eq!(p, Vec3::new(1.5, -2.0, 0.25));
        assert_eq!(p.to_array(), [1.5, -2.0, 0.25]);
    }
}
