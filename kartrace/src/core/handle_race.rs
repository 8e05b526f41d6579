use crate::core::kinematics::KinematicCar;
use crate::core::race::{RaceDirector, RacePhase, TriggerEvent};
use crate::core::scheduler::PeriodicTask;
use crate::core::track::RaceTrack;
use crate::core::vehicle::{CarId, VehicleState};
use crate::interfaces::standings_interface::{RaceState, MAX_STATE_UPDATE_FREQUENCY};
use crate::post::race_result::{RaceResult, RacerResult};
use crate::pre::read_sim_pars::SimPars;
use anyhow::Context;
use flume::Sender;
use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound of simulated time per lap before a race is aborted.
const MAX_TIME_PER_LAP: f32 = 600.0;

/// LineTracker follows a car's position along the racing line and turns index advances into
/// trigger events. The start/finish line sits on racing line point 0, checkpoint c on
/// `Checkpoint::line_index`.
#[derive(Debug, Clone)]
struct LineTracker {
    last_idx: Option<usize>,
}

impl LineTracker {
    fn new() -> LineTracker {
        LineTracker { last_idx: None }
    }

    fn reset(&mut self) {
        self.last_idx = None;
    }

    /// update returns the trigger events of all line points passed since the last call, in
    /// driving order. Jumps backwards or of more than a quarter lap produce no events. Tracks have at
    /// least four line points, so a single step forward always counts.
    fn update(&mut self, car: CarId, idx: usize, track: &RaceTrack) -> Vec<TriggerEvent> {
        let len = track.line.len();
        let mut events = vec![];

        if let Some(last_idx) = self.last_idx {
            let advance = (idx + len - last_idx) % len;
            if advance > 0 && advance <= len / 4 {
                for step in 1..=advance {
                    let passed = (last_idx + step) % len;
                    if passed == 0 {
                        events.push(TriggerEvent::StartFinishCrossed { car });
                    }
                    events.extend(
                        track
                            .checkpoints
                            .iter()
                            .filter(|c| c.line_index == passed)
                            .map(|c| TriggerEvent::CheckpointCrossed {
                                car,
                                checkpoint: c.index,
                            }),
                    );
                }
            } else if advance != 0 {
                return events;
            }
        }

        self.last_idx = Some(idx);
        events
    }
}

/// handle_race creates and simulates a headless race on the basis of the inserted parameters and
/// returns the results for post-processing. If a sender is inserted, the race is simulated in
/// real-time and race states are sent to the listener.
pub fn handle_race(
    sim_pars: &SimPars,
    timestep_size: f32,
    tx: Option<&Sender<RaceState>>,
    realtime_factor: f32,
) -> anyhow::Result<RaceResult> {
    if !(timestep_size > 0.0) {
        anyhow::bail!("Time step size must be positive, got {}!", timestep_size);
    }

    let track = Rc::new(RaceTrack::from_pars(&sim_pars.track_pars)?);
    let mut director = RaceDirector::new(
        &sim_pars.race_pars,
        &sim_pars.driver_pars,
        Some(Rc::clone(&track)),
    );
    let spawned = director.spawn_ai_field()?;

    // vehicles are indexed by car id
    let mut cars: Vec<KinematicCar> = spawned
        .iter()
        .map(|(_, pose)| KinematicCar::new(&sim_pars.vehicle_pars, *pose))
        .collect();
    let mut trackers = vec![LineTracker::new(); cars.len()];
    let mut racetimes: Vec<Vec<f32>> = vec![vec![]; cars.len()];

    let max_race_time = sim_pars.race_pars.tot_no_laps.max(1) as f32 * MAX_TIME_PER_LAP;
    let mut state_task = PeriodicTask::new(1.0 / MAX_STATE_UPDATE_FREQUENCY);
    let mut progress_print_task = PeriodicTask::new(10.0);
    let mut sim_time = 0.0;

    while director.phase() != RacePhase::Finished {
        let t_start = Instant::now();

        let states: Vec<VehicleState> = cars.iter().map(KinematicCar::state).collect();
        let frame = director.update(timestep_size, &states);

        for (id, controls) in frame.controls.iter() {
            if let Some(car) = cars.get_mut(*id) {
                car.step(controls, timestep_size);
            }
        }
        for (id, pose) in frame.teleports.iter() {
            if let Some(car) = cars.get_mut(*id) {
                car.teleport(*pose);
                trackers[*id].reset();
            }
        }

        // trigger events from line progress
        for id in 0..cars.len() {
            let position = track.to_local(cars[id].pose().position);
            let idx = match track.line.closest_point(position) {
                Some((idx, _, _)) => idx,
                None => continue,
            };

            for event in trackers[id].update(id, idx, &track) {
                let lap_before = director.entrant(id).map(|e| e.state.completed_laps());
                if let Some(pose) = director.handle_event(event) {
                    cars[id].teleport(pose);
                    trackers[id].reset();
                }
                let lap_after = director.entrant(id).map(|e| e.state.completed_laps());
                if lap_after > lap_before {
                    racetimes[id].push(director.race_time());
                }
            }
        }

        sim_time += timestep_size;

        if progress_print_task.due(timestep_size) {
            let leader = director.current_positions().into_iter().next();
            match leader {
                Some(leader) => debug!(
                    "Simulating... race time {:.1}s, leader {} at progress {:.2}",
                    director.race_time(),
                    leader.name,
                    leader.progress
                ),
                None => debug!("Simulating... waiting for the start ({:?})", director.phase()),
            }
        }

        if sim_time > max_race_time {
            warn!(
                "Race aborted after {:.0}s of race time, not all cars finished!",
                director.race_time()
            );
            break;
        }

        if let Some(tx) = tx {
            if state_task.due(timestep_size) {
                let states: Vec<VehicleState> = cars.iter().map(KinematicCar::state).collect();
                tx.send(RaceState::from_director(&director, &states))
                    .context("Failed to send race state to listener!")?;
            }

            // sleep until time step is finished in real-time as well
            let t_step = Duration::from_secs_f32(timestep_size / realtime_factor.max(1e-3));
            match t_step.checked_sub(t_start.elapsed()) {
                Some(t_sleep) => sleep(t_sleep),
                None => warn!("Could not keep up with real-time!"),
            }
        }
    }

    director.update_standings();
    let result = race_result(&director, &racetimes, &track.name);
    info!(
        "Race simulated: {:.2}s race time ({:.2}s including the start procedure)",
        result.race_time, sim_time
    );

    // send final result once
    if let Some(tx) = tx {
        let states: Vec<VehicleState> = cars.iter().map(KinematicCar::state).collect();
        let mut final_msg = RaceState::from_director(&director, &states);
        final_msg.final_result = Some(result.clone());
        tx.send(final_msg)
            .context("Failed to send final race result to listener!")?;
    }

    Ok(result)
}

fn race_result(director: &RaceDirector, racetimes: &[Vec<f32>], track_name: &str) -> RaceResult {
    let racers: Vec<RacerResult> = director
        .classification()
        .into_iter()
        .enumerate()
        .filter_map(|(pos, id)| {
            let entrant = director.entrant(id)?;
            let difficulty = entrant.controller().map(|c| c.difficulty()).unwrap_or_default();
            Some(RacerResult {
                id,
                name: entrant.name.clone(),
                skill: difficulty.skill,
                aggressiveness: difficulty.aggressiveness,
                position: pos + 1,
                finished: entrant.state.finished,
                finish_time: entrant.state.finish_time,
                racetimes: racetimes.get(id).cloned().unwrap_or_default(),
            })
        })
        .collect();

    RaceResult {
        track_name: track_name.to_owned(),
        tot_no_laps: director.pars().tot_no_laps,
        race_time: director.race_time(),
        all_finished: racers.iter().all(|r| r.finished),
        racers,
    }
}
