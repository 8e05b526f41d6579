pub mod general;
pub mod noise;
