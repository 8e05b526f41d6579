use crate::core::controller::{DefenseRequest, DrivingController};
use crate::core::driver::{Difficulty, DriverPars};
use crate::core::race_car_state::{LapEvent, RaceCarState};
use crate::core::scheduler::PeriodicTask;
use crate::core::standings::{rank_order, ranks_from_order, rubber_band_multipliers, RubberBandPars};
use crate::core::track::RaceTrack;
use crate::core::vehicle::{CarId, ControlOutput, PeerSnapshot, Pose, VehicleState};
use glam::Vec3;
use helpers::general::lerp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use serde::Deserialize;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Height added to spawn and respawn poses so cars do not start inside the ground.
const SPAWN_HEIGHT: f32 = 0.5;
/// Racing line point used to determine the start direction.
const START_DIRECTION_POINT: i64 = 5;

/// * `min_skill` / `max_skill` - Skill range, the pole sitter gets the maximum
/// * `min_aggressiveness` / `max_aggressiveness` - Range of the uniformly drawn aggressiveness
#[derive(Debug, Deserialize, Clone)]
pub struct DifficultyRange {
    #[serde(default = "default_min_skill")]
    pub min_skill: f32,
    #[serde(default = "default_max_skill")]
    pub max_skill: f32,
    #[serde(default = "default_min_aggressiveness")]
    pub min_aggressiveness: f32,
    #[serde(default = "default_max_aggressiveness")]
    pub max_aggressiveness: f32,
}

fn default_min_skill() -> f32 {
    0.5
}
fn default_max_skill() -> f32 {
    0.9
}
fn default_min_aggressiveness() -> f32 {
    0.3
}
fn default_max_aggressiveness() -> f32 {
    0.8
}

impl Default for DifficultyRange {
    fn default() -> Self {
        DifficultyRange {
            min_skill: default_min_skill(),
            max_skill: default_max_skill(),
            min_aggressiveness: default_min_aggressiveness(),
            max_aggressiveness: default_max_aggressiveness(),
        }
    }
}

/// * `tot_no_laps` - Number of laps of the race
/// * `no_ai_racers` - Number of AI cars spawned on the grid
/// * `seed` - Seed of the random generator, drawn from entropy if missing
/// * `settle_time` - (s) Waiting time after spawning before the countdown starts
/// * `countdown_steps` - Number of countdown steps
/// * `countdown_step_duration` - (s) Duration of a countdown step
/// * `ranking_interval` - (s) Interval of the standings update
/// * `rubber_banding_interval` - (s) Interval of the rubber-banding update
/// * `overtake_order_interval` - (s) Interval of the overtake orders
/// * `fall_check_interval` - (s) Interval of the fall check
/// * `fall_threshold` - (m) Height below which a car counts as fallen
/// * `starting_offset` - (m) Distance between the start line and the first grid slot
/// * `spacing_distance` - (m) Distance between two grid slots
/// * `difficulty` - Difficulty ranges of the AI field
/// * `rubber_banding` - Rubber-banding parameters
#[derive(Debug, Deserialize, Clone)]
pub struct RacePars {
    #[serde(default = "default_tot_no_laps")]
    pub tot_no_laps: u32,
    #[serde(default = "default_no_ai_racers")]
    pub no_ai_racers: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_settle_time")]
    pub settle_time: f32,
    #[serde(default = "default_countdown_steps")]
    pub countdown_steps: u32,
    #[serde(default = "default_one_second")]
    pub countdown_step_duration: f32,
    #[serde(default = "default_one_second")]
    pub ranking_interval: f32,
    #[serde(default = "default_one_second")]
    pub rubber_banding_interval: f32,
    #[serde(default = "default_overtake_order_interval")]
    pub overtake_order_interval: f32,
    #[serde(default = "default_fall_check_interval")]
    pub fall_check_interval: f32,
    #[serde(default = "default_fall_threshold")]
    pub fall_threshold: f32,
    #[serde(default = "default_starting_offset")]
    pub starting_offset: f32,
    #[serde(default = "default_spacing_distance")]
    pub spacing_distance: f32,
    #[serde(default)]
    pub difficulty: DifficultyRange,
    #[serde(default)]
    pub rubber_banding: RubberBandPars,
}

fn default_tot_no_laps() -> u32 {
    3
}
fn default_no_ai_racers() -> usize {
    3
}
fn default_settle_time() -> f32 {
    2.0
}
fn default_countdown_steps() -> u32 {
    3
}
fn default_one_second() -> f32 {
    1.0
}
fn default_overtake_order_interval() -> f32 {
    10.0
}
fn default_fall_check_interval() -> f32 {
    0.5
}
fn default_fall_threshold() -> f32 {
    -50.0
}
fn default_starting_offset() -> f32 {
    5.0
}
fn default_spacing_distance() -> f32 {
    10.0
}

impl Default for RacePars {
    fn default() -> Self {
        RacePars {
            tot_no_laps: default_tot_no_laps(),
            no_ai_racers: default_no_ai_racers(),
            seed: None,
            settle_time: default_settle_time(),
            countdown_steps: default_countdown_steps(),
            countdown_step_duration: default_one_second(),
            ranking_interval: default_one_second(),
            rubber_banding_interval: default_one_second(),
            overtake_order_interval: default_overtake_order_interval(),
            fall_check_interval: default_fall_check_interval(),
            fall_threshold: default_fall_threshold(),
            starting_offset: default_starting_offset(),
            spacing_distance: default_spacing_distance(),
            difficulty: DifficultyRange::default(),
            rubber_banding: RubberBandPars::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    /// Waiting for a racing line and for the field to settle.
    Idle,
    /// Counting down, `remaining` steps left.
    Countdown { remaining: u32 },
    Racing,
    Finished,
}

/// Who drives an entrant.
#[derive(Debug)]
pub enum Pilot {
    Ai(Box<DrivingController>),
    /// Driven from outside (e.g. a human player); only its trigger events are known.
    External,
}

#[derive(Debug)]
pub struct Entrant {
    pub name: String,
    pub pilot: Pilot,
    pub state: RaceCarState,
}

impl Entrant {
    pub fn is_ai(&self) -> bool {
        matches!(self.pilot, Pilot::Ai(_))
    }

    pub fn controller(&self) -> Option<&DrivingController> {
        match &self.pilot {
            Pilot::Ai(controller) => Some(&**controller),
            Pilot::External => None,
        }
    }

    fn controller_mut(&mut self) -> Option<&mut DrivingController> {
        match &mut self.pilot {
            Pilot::Ai(controller) => Some(&mut **controller),
            Pilot::External => None,
        }
    }
}

/// Discrete events from the checkpoint, start/finish and fall triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerEvent {
    CheckpointCrossed { car: CarId, checkpoint: usize },
    StartFinishCrossed { car: CarId },
    Fell { car: CarId },
}

/// Everything the vehicles have to apply after a director frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub controls: Vec<(CarId, ControlOutput)>,
    pub teleports: Vec<(CarId, Pose)>,
}

/// One line of the standings.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub id: CarId,
    pub name: String,
    pub rank: usize,
    pub progress: f32,
}

/// RaceDirector owns the race: the entrant registry, lap bookkeeping, standings,
/// rubber-banding and overtake orders, and the phase machine from spawn to finish.
#[derive(Debug)]
pub struct RaceDirector {
    pars: RacePars,
    driver_pars: DriverPars,
    track: Option<Rc<RaceTrack>>,
    entrants: Vec<Option<Entrant>>,
    phase: RacePhase,
    phase_timer: f32,
    race_time: f32,
    ranking_task: PeriodicTask,
    rubber_banding_task: PeriodicTask,
    overtake_order_task: PeriodicTask,
    fall_check_task: PeriodicTask,
    order: Vec<CarId>,
    rng: StdRng,
    warned_no_line: bool,
}

impl RaceDirector {
    pub fn new(pars: &RacePars, driver_pars: &DriverPars, track: Option<Rc<RaceTrack>>) -> RaceDirector {
        let rng = match pars.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        RaceDirector {
            pars: pars.clone(),
            driver_pars: driver_pars.clone(),
            track,
            entrants: vec![],
            phase: RacePhase::Idle,
            phase_timer: 0.0,
            race_time: 0.0,
            ranking_task: PeriodicTask::new(pars.ranking_interval),
            rubber_banding_task: PeriodicTask::new(pars.rubber_banding_interval),
            overtake_order_task: PeriodicTask::new(pars.overtake_order_interval),
            fall_check_task: PeriodicTask::new(pars.fall_check_interval),
            order: vec![],
            rng,
            warned_no_line: false,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // REGISTRY ------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// register_ai adds an AI entrant at `position` and returns its id.
    pub fn register_ai(&mut self, name: &str, difficulty: Difficulty, position: Vec3) -> CarId {
        let id = self.entrants.len();
        let rng = StdRng::seed_from_u64(self.rng.gen());
        let mut controller = DrivingController::new(id, name, self.driver_pars.clone(), difficulty, rng);
        controller.set_track(self.track.clone(), position);
        if self.phase == RacePhase::Racing {
            controller.set_racing(true);
        }

        self.entrants.push(Some(Entrant {
            name: name.to_owned(),
            pilot: Pilot::Ai(Box::new(controller)),
            state: RaceCarState::default(),
        }));
        id
    }

    /// register_external adds an entrant driven from outside and returns its id.
    pub fn register_external(&mut self, name: &str) -> CarId {
        let id = self.entrants.len();
        self.entrants.push(Some(Entrant {
            name: name.to_owned(),
            pilot: Pilot::External,
            state: RaceCarState::default(),
        }));
        id
    }

    /// deregister removes an entrant. Its id is not reused; other cars stop seeing it.
    pub fn deregister(&mut self, id: CarId) -> Option<Entrant> {
        let entrant = self.entrants.get_mut(id)?.take();
        if entrant.is_some() {
            self.order.retain(|&other| other != id);
        }
        entrant
    }

    /// spawn_ai_field lays out `no_ai_racers` AI cars on a grid behind the start line and returns
    /// their ids and poses. Fails without a usable racing line.
    pub fn spawn_ai_field(&mut self) -> anyhow::Result<Vec<(CarId, Pose)>> {
        let track = match &self.track {
            Some(track) if !track.line.is_empty() => Rc::clone(track),
            _ => anyhow::bail!("Cannot spawn AI racers without a racing line!"),
        };

        let grid = grid_poses(&track, self.pars.no_ai_racers, self.pars.starting_offset, self.pars.spacing_distance);
        let mut spawned = Vec::with_capacity(grid.len());

        for (i, pose) in grid.into_iter().enumerate() {
            let difficulty = self.draw_difficulty(i);
            let name = format!("AI Racer {}", i + 1);
            let id = self.register_ai(&name, difficulty, pose.position);
            debug!(
                "Spawned {} (skill {:.2}, aggressiveness {:.2})",
                name, difficulty.skill, difficulty.aggressiveness
            );
            spawned.push((id, pose));
        }

        info!("Spawned {} AI racers on track {}", spawned.len(), track.name);
        Ok(spawned)
    }

    /// draw_difficulty gives the cars at the front of the grid more skill (plus some jitter) and
    /// draws aggressiveness uniformly.
    fn draw_difficulty(&mut self, grid_idx: usize) -> Difficulty {
        let range = &self.pars.difficulty;
        let (min_skill, max_skill) = ordered(range.min_skill, range.max_skill);
        let (min_aggr, max_aggr) = ordered(range.min_aggressiveness, range.max_aggressiveness);

        let t = grid_idx as f32 / (self.pars.no_ai_racers.saturating_sub(1)).max(1) as f32;
        let jitter = Uniform::new_inclusive(-0.1, 0.1).sample(&mut self.rng);
        let skill = (lerp(max_skill, min_skill, t) + jitter).clamp(min_skill, max_skill);
        let aggressiveness = Uniform::new_inclusive(min_aggr, max_aggr).sample(&mut self.rng);

        Difficulty::new(skill, aggressiveness)
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// update advances the race by dt. `vehicles` is indexed by car id and holds every vehicle's
    /// state at the end of the previous frame; all controllers see this same snapshot.
    pub fn update(&mut self, dt: f32, vehicles: &[VehicleState]) -> FrameOutput {
        let mut output = FrameOutput::default();

        self.advance_phase(dt);

        // frozen peer view of this frame
        let peers: Vec<PeerSnapshot> = self
            .entrants
            .iter()
            .enumerate()
            .filter_map(|(id, entrant)| {
                let entrant = entrant.as_ref()?;
                let vehicle = vehicles.get(id)?;
                Some(PeerSnapshot {
                    id,
                    pose: vehicle.pose,
                    velocity: vehicle.velocity,
                    active: !entrant.state.finished,
                })
            })
            .collect();

        // controllers
        let mut defense_requests: Vec<DefenseRequest> = vec![];
        for (id, entrant) in self.entrants.iter_mut().enumerate() {
            let (Some(entrant), Some(vehicle)) = (entrant.as_mut(), vehicles.get(id)) else {
                continue;
            };
            if let Some(controller) = entrant.controller_mut() {
                let tick = controller.tick(vehicle, &peers, dt);
                output.controls.push((id, tick.controls));
                defense_requests.extend(tick.defense_request);
            }
        }
        self.deliver_defense_requests(&defense_requests);

        // periodic tasks
        if self.phase != RacePhase::Finished && self.fall_check_task.due(dt) {
            output.teleports.extend(self.check_falls(vehicles));
        }

        if self.phase == RacePhase::Racing {
            if self.ranking_task.due(dt) {
                self.update_standings();
            }
            if self.rubber_banding_task.due(dt) {
                self.apply_rubber_banding();
            }
            if self.overtake_order_task.due(dt) {
                self.update_standings();
                self.issue_overtake_orders();
            }
        }

        output
    }

    fn advance_phase(&mut self, dt: f32) {
        match self.phase {
            RacePhase::Idle => {
                if !self.has_line() {
                    if !self.warned_no_line {
                        warn!("No racing line available, the race cannot start");
                        self.warned_no_line = true;
                    }
                    return;
                }
                if self.entrants.iter().all(Option::is_none) {
                    return;
                }
                self.phase_timer += dt;
                if self.phase_timer >= self.pars.settle_time {
                    self.phase_timer = 0.0;
                    if self.pars.countdown_steps == 0 {
                        self.start_racing();
                    } else {
                        info!("Countdown: {}", self.pars.countdown_steps);
                        self.phase = RacePhase::Countdown {
                            remaining: self.pars.countdown_steps,
                        };
                    }
                }
            }
            RacePhase::Countdown { remaining } => {
                self.phase_timer += dt;
                if self.phase_timer >= self.pars.countdown_step_duration {
                    self.phase_timer -= self.pars.countdown_step_duration;
                    if remaining <= 1 {
                        self.start_racing();
                    } else {
                        info!("Countdown: {}", remaining - 1);
                        self.phase = RacePhase::Countdown {
                            remaining: remaining - 1,
                        };
                    }
                }
            }
            RacePhase::Racing => {
                self.race_time += dt;
            }
            RacePhase::Finished => {}
        }
    }

    fn start_racing(&mut self) {
        info!("GO! Race started with {} entrants", self.entrant_ids().len());
        self.phase = RacePhase::Racing;
        self.phase_timer = 0.0;
        self.race_time = 0.0;
        self.ranking_task.reset();
        self.rubber_banding_task.reset();
        self.overtake_order_task.reset();

        for entrant in self.entrants.iter_mut().flatten() {
            if let Some(controller) = entrant.controller_mut() {
                controller.set_racing(true);
            }
        }
        self.update_standings();
    }

    fn deliver_defense_requests(&mut self, requests: &[DefenseRequest]) {
        for request in requests {
            if let Some(controller) = self
                .entrants
                .get_mut(request.target)
                .and_then(|e| e.as_mut())
                .and_then(|e| e.controller_mut())
            {
                controller.try_start_defense(request.boost);
            }
        }
    }

    // ---------------------------------------------------------------------------------------------
    // TRIGGER EVENTS ------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// handle_event applies a trigger event. For falls it returns the pose the car has to be
    /// teleported to.
    pub fn handle_event(&mut self, event: TriggerEvent) -> Option<Pose> {
        match event {
            TriggerEvent::CheckpointCrossed { car, checkpoint } => {
                if self.phase != RacePhase::Racing {
                    return None;
                }
                let entrant = self.entrants.get_mut(car)?.as_mut()?;
                if entrant.state.on_checkpoint(checkpoint) {
                    debug!("{} passed checkpoint {}", entrant.name, checkpoint);
                }
                None
            }
            TriggerEvent::StartFinishCrossed { car } => {
                if self.phase != RacePhase::Racing {
                    return None;
                }
                let no_checkpoints = self.no_checkpoints();
                let (tot_no_laps, race_time) = (self.pars.tot_no_laps, self.race_time);
                let entrant = self.entrants.get_mut(car)?.as_mut()?;

                match entrant.state.on_start_finish(no_checkpoints, tot_no_laps, race_time) {
                    LapEvent::LapCompleted { lap } => {
                        info!("{} started lap {}/{}", entrant.name, lap, tot_no_laps);
                    }
                    LapEvent::Finished { finish_time } => {
                        if let Some(controller) = entrant.controller_mut() {
                            controller.stop();
                        }
                        let finish_position = self
                            .entrants
                            .iter()
                            .flatten()
                            .filter(|e| e.state.finish_position.is_some())
                            .count()
                            + 1;
                        if let Some(entrant) = self.entrants[car].as_mut() {
                            entrant.state.finish_position = Some(finish_position);
                            info!(
                                "{} finished P{} after {:.2}s",
                                entrant.name, finish_position, finish_time
                            );
                        }
                        self.update_standings();
                        self.check_race_finished();
                    }
                    LapEvent::Ignored => {}
                }
                None
            }
            TriggerEvent::Fell { car } => self.respawn(car),
        }
    }

    /// respawn returns the last crossed checkpoint's pose, or the start pose if none was crossed
    /// this lap, lifted slightly. Lap and checkpoint counters stay untouched.
    fn respawn(&self, car: CarId) -> Option<Pose> {
        let track = self.track.as_ref()?;
        let entrant = self.entrants.get(car)?.as_ref()?;

        let mut pose = entrant
            .state
            .last_checkpoint
            .and_then(|c| track.checkpoints.get(c))
            .map(|c| c.pose)
            .unwrap_or(track.start_pose);
        pose.position.y += SPAWN_HEIGHT;

        info!("{} fell off the track, respawning", entrant.name);
        Some(pose)
    }

    fn check_falls(&mut self, vehicles: &[VehicleState]) -> Vec<(CarId, Pose)> {
        let fallen: Vec<CarId> = self
            .entrant_ids()
            .into_iter()
            .filter(|&id| {
                vehicles
                    .get(id)
                    .map(|v| v.pose.position.y < self.pars.fall_threshold)
                    .unwrap_or(false)
            })
            .collect();

        fallen
            .into_iter()
            .filter_map(|id| self.respawn(id).map(|pose| (id, pose)))
            .collect()
    }

    fn check_race_finished(&mut self) {
        let all_finished = self.entrants.iter().flatten().all(|e| e.state.finished);
        if all_finished && self.entrants.iter().any(Option::is_some) {
            info!("All entrants finished after {:.2}s", self.race_time);
            self.phase = RacePhase::Finished;
        }
    }

    // ---------------------------------------------------------------------------------------------
    // STANDINGS AND PACING ------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// composite_progress is the single progress metric used for ranking, rubber-banding and
    /// overtake orders: completed laps plus the fraction of the current lap.
    pub fn composite_progress(&self, id: CarId) -> Option<f32> {
        let entrant = self.entrants.get(id)?.as_ref()?;
        let no_checkpoints = self.no_checkpoints();

        let fraction = match entrant.controller() {
            Some(controller) => {
                let fraction = controller.race_progress();
                // still approaching the start/finish line (grid or end of the lap)
                if no_checkpoints > 0 && entrant.state.last_checkpoint.is_none() && fraction > 0.5 {
                    fraction - 1.0
                } else {
                    fraction
                }
            }
            None => entrant.state.checkpoint_fraction(no_checkpoints),
        };

        Some(entrant.state.progress(fraction))
    }

    /// update_standings ranks the cars still racing 1..N by descending composite progress
    /// (stable). Finished cars drop out of the live standings and keep their finish position.
    pub fn update_standings(&mut self) {
        let running: Vec<CarId> = self
            .entrant_ids()
            .into_iter()
            .filter(|&id| self.entrants[id].as_ref().map_or(false, |e| !e.state.finished))
            .collect();
        let progress: Vec<f32> = running
            .iter()
            .map(|&id| self.composite_progress(id).unwrap_or(0.0))
            .collect();
        let running_order = rank_order(&progress);
        let running_ranks = ranks_from_order(&running_order);

        self.order = running_order.iter().map(|&i| running[i]).collect();
        for entrant in self.entrants.iter_mut().flatten() {
            if entrant.state.finished {
                entrant.state.rank = 0;
            }
        }
        for (i, &id) in running.iter().enumerate() {
            if let Some(entrant) = self.entrants[id].as_mut() {
                entrant.state.rank = running_ranks[i];
            }
        }

        debug!(
            "Standings: {:?}",
            self.order
                .iter()
                .map(|&id| (id, self.composite_progress(id).unwrap_or(0.0)))
                .collect::<Vec<_>>()
        );
    }

    /// classification is the overall order: finished cars by finish position, then the cars still
    /// racing in their live order.
    pub fn classification(&self) -> Vec<CarId> {
        let mut finished: Vec<(CarId, usize)> = self
            .entrant_ids()
            .into_iter()
            .filter_map(|id| Some((id, self.entrants[id].as_ref()?.state.finish_position?)))
            .collect();
        finished.sort_by_key(|&(_, pos)| pos);

        let mut classification: Vec<CarId> = finished.into_iter().map(|(id, _)| id).collect();
        let remaining: Vec<CarId> =
            self.order.iter().copied().filter(|id| !classification.contains(id)).collect();
        classification.extend(remaining);
        classification
    }

    /// apply_rubber_banding hands every running AI car its speed multiplier.
    fn apply_rubber_banding(&mut self) {
        let running: Vec<CarId> = self
            .entrant_ids()
            .into_iter()
            .filter(|&id| self.entrants[id].as_ref().map_or(false, |e| !e.state.finished))
            .collect();
        let progress: Vec<f32> = running
            .iter()
            .map(|&id| self.composite_progress(id).unwrap_or(0.0))
            .collect();
        let is_ai: Vec<bool> = running
            .iter()
            .map(|&id| self.entrants[id].as_ref().map_or(false, Entrant::is_ai))
            .collect();

        let multipliers = rubber_band_multipliers(&progress, &is_ai, &self.pars.rubber_banding);

        for (&id, &multiplier) in running.iter().zip(multipliers.iter()) {
            if let Some(controller) = self.entrants[id].as_mut().and_then(|e| e.controller_mut()) {
                controller.set_rubber_banding_factor(multiplier);
            }
        }
        debug!("Rubber-banding: {:?}", running.iter().zip(multipliers).collect::<Vec<_>>());
    }

    /// issue_overtake_orders tells every AI car to attack the car directly ahead of it in the
    /// standings, unless that car is not AI driven.
    fn issue_overtake_orders(&mut self) {
        let running: Vec<CarId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| self.entrants.get(id).and_then(|e| e.as_ref()).map_or(false, |e| !e.state.finished))
            .collect();

        let mut requests = vec![];
        for pair in running.windows(2) {
            let (ahead, behind) = (pair[0], pair[1]);
            let ahead_is_ai = self.entrants[ahead].as_ref().map_or(false, Entrant::is_ai);
            if !ahead_is_ai {
                continue;
            }
            if let Some(controller) = self.entrants[behind].as_mut().and_then(|e| e.controller_mut()) {
                if let Some(request) = controller.force_overtake(ahead) {
                    debug!("Ordered car {} to overtake car {}", behind, ahead);
                    requests.push(request);
                }
            }
        }
        self.deliver_defense_requests(&requests);
    }

    // ---------------------------------------------------------------------------------------------
    // LIFECYCLE -----------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// reset_race discards all per-race state, cancels the periodic tasks and goes back to Idle.
    /// Returns the grid poses the AI cars have to be put back to.
    pub fn reset_race(&mut self) -> Vec<(CarId, Pose)> {
        info!("Resetting race");
        self.phase = RacePhase::Idle;
        self.phase_timer = 0.0;
        self.race_time = 0.0;
        self.order.clear();
        self.ranking_task.reset();
        self.rubber_banding_task.reset();
        self.overtake_order_task.reset();
        self.fall_check_task.reset();

        let ai_ids: Vec<CarId> = self
            .entrant_ids()
            .into_iter()
            .filter(|&id| self.entrants[id].as_ref().map_or(false, Entrant::is_ai))
            .collect();
        let grid = match &self.track {
            Some(track) if !track.line.is_empty() => grid_poses(
                track,
                ai_ids.len(),
                self.pars.starting_offset,
                self.pars.spacing_distance,
            ),
            _ => vec![],
        };

        let track = self.track.clone();
        let mut teleports = vec![];
        for entrant in self.entrants.iter_mut().flatten() {
            entrant.state = RaceCarState::default();
        }
        for (slot, &id) in ai_ids.iter().enumerate() {
            let pose = grid.get(slot).copied();
            if let Some(controller) = self.entrants[id].as_mut().and_then(|e| e.controller_mut()) {
                controller.reset();
                if let Some(pose) = pose {
                    controller.set_track(track.clone(), pose.position);
                    teleports.push((id, pose));
                }
            }
        }

        teleports
    }

    /// replace_track swaps in a regenerated track; every controller re-anchors its waypoint index
    /// at its car's current position.
    pub fn replace_track(&mut self, track: Option<Rc<RaceTrack>>, vehicles: &[VehicleState]) {
        self.track = track;
        self.warned_no_line = false;
        for (id, entrant) in self.entrants.iter_mut().enumerate() {
            let position = vehicles.get(id).map(|v| v.pose.position).unwrap_or(Vec3::ZERO);
            if let Some(controller) = entrant.as_mut().and_then(|e| e.controller_mut()) {
                controller.set_track(self.track.clone(), position);
            }
        }
    }

    // ---------------------------------------------------------------------------------------------
    // QUERIES -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// current_positions returns the live standings of the cars still racing as of the last
    /// ranking pass.
    pub fn current_positions(&self) -> Vec<Standing> {
        self.order
            .iter()
            .filter_map(|&id| {
                let entrant = self.entrants.get(id)?.as_ref()?;
                Some(Standing {
                    id,
                    name: entrant.name.clone(),
                    rank: entrant.state.rank,
                    progress: self.composite_progress(id)?,
                })
            })
            .collect()
    }

    /// position_of returns the finish position of a finished car, otherwise its live rank. None
    /// if unknown or not ranked yet.
    pub fn position_of(&self, id: CarId) -> Option<usize> {
        let state = &self.entrants.get(id)?.as_ref()?.state;
        match (state.finish_position, state.rank) {
            (Some(pos), _) => Some(pos),
            (None, 0) => None,
            (None, rank) => Some(rank),
        }
    }

    pub fn entrant_ids(&self) -> Vec<CarId> {
        self.entrants
            .iter()
            .enumerate()
            .filter_map(|(id, e)| e.as_ref().map(|_| id))
            .collect()
    }

    pub fn entrant(&self, id: CarId) -> Option<&Entrant> {
        self.entrants.get(id)?.as_ref()
    }

    pub fn controller(&self, id: CarId) -> Option<&DrivingController> {
        self.entrant(id)?.controller()
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn race_time(&self) -> f32 {
        self.race_time
    }

    pub fn track(&self) -> Option<&Rc<RaceTrack>> {
        self.track.as_ref()
    }

    pub fn pars(&self) -> &RacePars {
        &self.pars
    }

    pub fn no_checkpoints(&self) -> usize {
        self.track.as_ref().map_or(0, |t| t.no_checkpoints())
    }

    /// registry_len is one past the highest id ever handed out.
    pub fn registry_len(&self) -> usize {
        self.entrants.len()
    }

    fn has_line(&self) -> bool {
        self.track.as_ref().map_or(false, |t| !t.line.is_empty())
    }
}

/// grid_poses lays out `no_cars` slots behind the first racing line point, facing down the line.
pub fn grid_poses(track: &RaceTrack, no_cars: usize, starting_offset: f32, spacing: f32) -> Vec<Pose> {
    let start = track.world_point(0);
    let mut direction = track.world_point(START_DIRECTION_POINT) - start;
    direction.y = 0.0;
    let direction = direction.normalize_or_zero();

    (0..no_cars)
        .map(|i| {
            let mut position = start - direction * (starting_offset + i as f32 * spacing);
            position.y += SPAWN_HEIGHT;
            Pose::looking_along(position, direction)
        })
        .collect()
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
