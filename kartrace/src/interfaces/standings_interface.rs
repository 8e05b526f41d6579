use crate::core::race::{RaceDirector, RacePhase};
use crate::core::vehicle::VehicleState;
use crate::post::race_result::RaceResult;

/// Maximum frequency (Hz, in simulated time) at which race states are sent to a listener.
pub const MAX_STATE_UPDATE_FREQUENCY: f32 = 20.0;

/// CarState is the presentation view of one car.
///
/// * `rank` - Current position among the cars still racing, 0 if unranked or finished
/// * `finish_position` - Position in the order of arrival, once finished
/// * `lap` - Current lap
/// * `race_prog` - Composite progress (completed laps + fraction of the current lap)
/// * `velocity` - (m/s) Current speed
/// * `position` - (m) World position
#[derive(Debug, Clone, Default)]
pub struct CarState {
    pub id: usize,
    pub name: String,
    pub rank: usize,
    pub finish_position: Option<usize>,
    pub lap: u32,
    pub race_prog: f32,
    pub velocity: f32,
    pub position: [f32; 3],
    pub finished: bool,
    pub overtaking: bool,
    pub defending: bool,
    pub nitro_active: bool,
}

/// RaceState is sent to presentation layers (console, HUD) while the race runs. The last message
/// carries the final result.
#[derive(Debug, Clone)]
pub struct RaceState {
    pub race_time: f32,
    pub phase: RacePhase,
    pub car_states: Vec<CarState>,
    pub final_result: Option<RaceResult>,
}

impl RaceState {
    /// from_director collects the state of every registered car: finished cars in order of
    /// arrival, then the running cars by rank (unranked cars last).
    pub fn from_director(director: &RaceDirector, vehicles: &[VehicleState]) -> RaceState {
        let mut car_states: Vec<CarState> = director
            .entrant_ids()
            .into_iter()
            .filter_map(|id| {
                let entrant = director.entrant(id)?;
                let vehicle = vehicles.get(id).copied().unwrap_or_default();
                let controller = entrant.controller();
                Some(CarState {
                    id,
                    name: entrant.name.clone(),
                    rank: entrant.state.rank,
                    finish_position: entrant.state.finish_position,
                    lap: entrant.state.lap,
                    race_prog: director.composite_progress(id).unwrap_or(0.0),
                    velocity: vehicle.speed(),
                    position: vehicle.pose.position.to_array(),
                    finished: entrant.state.finished,
                    overtaking: controller.map_or(false, |c| c.is_overtaking()),
                    defending: controller.map_or(false, |c| c.is_defending()),
                    nitro_active: vehicle.nitro.active,
                })
            })
            .collect();
        car_states.sort_by_key(|c| match (c.finish_position, c.rank) {
            (Some(pos), _) => (0, pos),
            (None, 0) => (2, 0),
            (None, rank) => (1, rank),
        });

        RaceState {
            race_time: director.race_time(),
            phase: director.phase(),
            car_states,
            final_result: None,
        }
    }
}
