use glam::{Quat, Vec3};

/// Identifier of an entrant, stable for the whole race (index into the director's registry).
pub type CarId = usize;

/// Pose is a world position plus orientation. +Z of the rotated frame is forward, +X right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Pose {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// to_local_direction expresses a world direction in the pose's frame.
    pub fn to_local_direction(&self, dir: Vec3) -> Vec3 {
        self.rotation.inverse() * dir
    }

    /// to_local_point expresses a world point in the pose's frame.
    pub fn to_local_point(&self, point: Vec3) -> Vec3 {
        self.to_local_direction(point - self.position)
    }

    /// looking_along returns a pose at `position` whose forward axis points along the horizontal
    /// part of `dir`.
    pub fn looking_along(position: Vec3, dir: Vec3) -> Pose {
        let rotation = if dir.x == 0.0 && dir.z == 0.0 {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_y(dir.x.atan2(dir.z))
        };
        Pose { position, rotation }
    }
}

/// NitroGauge mirrors the vehicle's nitro resource; the accounting itself belongs to the vehicle.
///
/// * `current` - Stored nitro (0 - 100)
/// * `active` - Nitro is currently burning
/// * `cooling_down` - The vehicle's own nitro cooldown is running
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NitroGauge {
    pub current: f32,
    pub active: bool,
    pub cooling_down: bool,
}

/// VehicleState is what the vehicle state provider exposes to the controller every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    pub pose: Pose,
    pub velocity: Vec3,
    pub max_speed: f32,
    pub nitro: NitroGauge,
}

impl VehicleState {
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// normalized_speed returns the speed as a fraction of the maximum speed.
    pub fn normalized_speed(&self) -> f32 {
        if self.max_speed > 0.0 {
            self.speed() / self.max_speed
        } else {
            0.0
        }
    }
}

/// ControlOutput is handed to the vehicle's control sink once per tick.
///
/// * `steer` - [-1, 1], positive steers right
/// * `throttle` - [0, 1]
/// * `brake` - [0, 1]
/// * `handbrake` - [0, 1]
/// * `nitro` - Request to fire nitro this tick
/// * `acceleration_scale` - Multiplier on the vehicle's nominal acceleration (overtake/defence
/// boosts)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    pub steer: f32,
    pub throttle: f32,
    pub brake: f32,
    pub handbrake: f32,
    pub nitro: bool,
    pub acceleration_scale: f32,
}

impl ControlOutput {
    /// Full handbrake, nothing else. Used while waiting for the start and as fail-safe stop.
    pub fn hold() -> ControlOutput {
        ControlOutput {
            steer: 0.0,
            throttle: 0.0,
            brake: 0.0,
            handbrake: 1.0,
            nitro: false,
            acceleration_scale: 1.0,
        }
    }
}

/// PeerSnapshot is the frozen view of another entrant that controllers see during a frame. All
/// snapshots of a frame are taken before any controller runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerSnapshot {
    pub id: CarId,
    pub pose: Pose,
    pub velocity: Vec3,
    pub active: bool,
}

impl PeerSnapshot {
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn looking_along_points_forward() {
        let pose = Pose::looking_along(Vec3::ZERO, Vec3::new(1.0, 3.0, 0.0));
        let fwd = pose.forward();
        assert_abs_diff_eq!(fwd.x, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(fwd.y, 0.0, epsilon = 1e-5);

        // a point to the car's right has positive local x
        let pose = Pose::looking_along(Vec3::ZERO, Vec3::Z);
        let right = pose.rotation * Vec3::X;
        assert!(pose.to_local_point(right * 4.0).x > 3.9);
    }
}
