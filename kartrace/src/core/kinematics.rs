use crate::core::vehicle::{ControlOutput, NitroGauge, Pose, VehicleState};
use glam::{Quat, Vec3};
use serde::Deserialize;

/// Parameters of the kinematic stand-in vehicle used for headless races. It is not a physics
/// model, it only turns control values into plausible motion.
///
/// * `max_speed` - (m/s) Top speed without nitro
/// * `acceleration` - (m/s^2) Acceleration at full throttle
/// * `brake_deceleration` - (m/s^2) Deceleration at full brake
/// * `handbrake_deceleration` - (m/s^2) Deceleration at full handbrake
/// * `drag` - (1/s) Speed proportional drag
/// * `wheelbase` - (m) Wheelbase of the bicycle model
/// * `max_wheel_angle` - (rad) Wheel angle at full steering
/// * `nitro_acceleration_factor` - Acceleration multiplier while nitro burns
/// * `nitro_speed_factor` - Top speed multiplier while nitro burns
/// * `nitro_burn_rate` - (1/s) Nitro consumption while burning
/// * `nitro_regen_rate` - (1/s) Nitro regeneration while not burning
/// * `nitro_max_burn` - (s) Maximum duration of one burst
/// * `nitro_cooldown` - (s) Pause after a burst
#[derive(Debug, Deserialize, Clone)]
pub struct KinematicPars {
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,
    #[serde(default = "default_acceleration")]
    pub acceleration: f32,
    #[serde(default = "default_brake_deceleration")]
    pub brake_deceleration: f32,
    #[serde(default = "default_handbrake_deceleration")]
    pub handbrake_deceleration: f32,
    #[serde(default = "default_drag")]
    pub drag: f32,
    #[serde(default = "default_wheelbase")]
    pub wheelbase: f32,
    #[serde(default = "default_max_wheel_angle")]
    pub max_wheel_angle: f32,
    #[serde(default = "default_nitro_acceleration_factor")]
    pub nitro_acceleration_factor: f32,
    #[serde(default = "default_nitro_speed_factor")]
    pub nitro_speed_factor: f32,
    #[serde(default = "default_nitro_burn_rate")]
    pub nitro_burn_rate: f32,
    #[serde(default = "default_nitro_regen_rate")]
    pub nitro_regen_rate: f32,
    #[serde(default = "default_nitro_max_burn")]
    pub nitro_max_burn: f32,
    #[serde(default = "default_nitro_cooldown")]
    pub nitro_cooldown: f32,
}

fn default_max_speed() -> f32 {
    25.0
}
fn default_acceleration() -> f32 {
    8.0
}
fn default_brake_deceleration() -> f32 {
    18.0
}
fn default_handbrake_deceleration() -> f32 {
    6.0
}
fn default_drag() -> f32 {
    0.05
}
fn default_wheelbase() -> f32 {
    2.5
}
fn default_max_wheel_angle() -> f32 {
    0.6
}
fn default_nitro_acceleration_factor() -> f32 {
    1.6
}
fn default_nitro_speed_factor() -> f32 {
    1.3
}
fn default_nitro_burn_rate() -> f32 {
    40.0
}
fn default_nitro_regen_rate() -> f32 {
    4.0
}
fn default_nitro_max_burn() -> f32 {
    2.0
}
fn default_nitro_cooldown() -> f32 {
    3.0
}

impl Default for KinematicPars {
    fn default() -> Self {
        KinematicPars {
            max_speed: default_max_speed(),
            acceleration: default_acceleration(),
            brake_deceleration: default_brake_deceleration(),
            handbrake_deceleration: default_handbrake_deceleration(),
            drag: default_drag(),
            wheelbase: default_wheelbase(),
            max_wheel_angle: default_max_wheel_angle(),
            nitro_acceleration_factor: default_nitro_acceleration_factor(),
            nitro_speed_factor: default_nitro_speed_factor(),
            nitro_burn_rate: default_nitro_burn_rate(),
            nitro_regen_rate: default_nitro_regen_rate(),
            nitro_max_burn: default_nitro_max_burn(),
            nitro_cooldown: default_nitro_cooldown(),
        }
    }
}

/// KinematicCar integrates speed and yaw of a flat-ground bicycle model and owns the nitro
/// resource accounting.
#[derive(Debug, Clone)]
pub struct KinematicCar {
    pars: KinematicPars,
    position: Vec3,
    yaw: f32,
    speed: f32,
    nitro: NitroGauge,
    burn_time: f32,
    cooldown: f32,
}

impl KinematicCar {
    pub fn new(pars: &KinematicPars, pose: Pose) -> KinematicCar {
        let mut car = KinematicCar {
            pars: pars.clone(),
            position: Vec3::ZERO,
            yaw: 0.0,
            speed: 0.0,
            nitro: NitroGauge {
                current: 100.0,
                active: false,
                cooling_down: false,
            },
            burn_time: 0.0,
            cooldown: 0.0,
        };
        car.teleport(pose);
        car
    }

    /// teleport places the car at `pose` at standstill.
    pub fn teleport(&mut self, pose: Pose) {
        let forward = pose.forward();
        self.position = pose.position;
        self.yaw = forward.x.atan2(forward.z);
        self.speed = 0.0;
    }

    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: Quat::from_rotation_y(self.yaw),
        }
    }

    pub fn state(&self) -> VehicleState {
        let pose = self.pose();
        VehicleState {
            pose,
            velocity: pose.forward() * self.speed,
            max_speed: self.pars.max_speed,
            nitro: self.nitro,
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// step applies the control values for dt seconds.
    pub fn step(&mut self, controls: &ControlOutput, dt: f32) {
        self.update_nitro(controls.nitro, dt);

        let (accel_factor, speed_factor) = if self.nitro.active {
            (self.pars.nitro_acceleration_factor, self.pars.nitro_speed_factor)
        } else {
            (1.0, 1.0)
        };

        let throttle = controls.throttle.clamp(0.0, 1.0);
        let brake = controls.brake.clamp(0.0, 1.0);
        let handbrake = controls.handbrake.clamp(0.0, 1.0);

        let accel = throttle * self.pars.acceleration * controls.acceleration_scale.max(0.0) * accel_factor
            - brake * self.pars.brake_deceleration
            - handbrake * self.pars.handbrake_deceleration
            - self.pars.drag * self.speed;
        self.speed = (self.speed + accel * dt).clamp(0.0, self.pars.max_speed * speed_factor);

        // bicycle model, the handbrake loosens the rear and tightens the turn
        let wheel_angle = controls.steer.clamp(-1.0, 1.0) * self.pars.max_wheel_angle;
        let yaw_rate = self.speed * wheel_angle.tan() / self.pars.wheelbase * (1.0 + 0.5 * handbrake);
        self.yaw += yaw_rate * dt;

        let forward = Vec3::new(self.yaw.sin(), 0.0, self.yaw.cos());
        self.position += forward * self.speed * dt;
    }

    fn update_nitro(&mut self, requested: bool, dt: f32) {
        if self.nitro.active {
            self.burn_time += dt;
            self.nitro.current = (self.nitro.current - self.pars.nitro_burn_rate * dt).max(0.0);
            if self.nitro.current <= 0.0 || self.burn_time >= self.pars.nitro_max_burn {
                self.nitro.active = false;
                self.nitro.cooling_down = true;
                self.cooldown = self.pars.nitro_cooldown;
            }
            return;
        }

        self.nitro.current = (self.nitro.current + self.pars.nitro_regen_rate * dt).min(100.0);

        if self.nitro.cooling_down {
            self.cooldown -= dt;
            if self.cooldown <= 0.0 {
                self.nitro.cooling_down = false;
            }
            return;
        }

        if requested && self.nitro.current > 0.0 {
            self.nitro.active = true;
            self.burn_time = 0.0;
        }
    }
}
