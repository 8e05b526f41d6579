pub mod avoidance;
pub mod controller;
pub mod corners;
pub mod driver;
pub mod handle_race;
pub mod kinematics;
pub mod nitro;
pub mod overtake;
pub mod race;
pub mod race_car_state;
pub mod racing_line;
pub mod scheduler;
pub mod standings;
pub mod track;
pub mod vehicle;
