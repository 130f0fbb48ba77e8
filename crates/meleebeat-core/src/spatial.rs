//! Minimal 3D vector and listener pose.

/// A position or direction in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, -1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z).length()
    }
}

/// Camera/avatar pose, sampled once per frame by the render loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ListenerPose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
            up: Vec3::UP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Vec3::new(1.0, 2.0, 2.0);
        assert!((a.length() - 3.0).abs() < 1e-6);
        assert!((a.distance(Vec3::new(1.0, 2.0, 5.0)) - 3.0).abs() < 1e-6);
    }
}
