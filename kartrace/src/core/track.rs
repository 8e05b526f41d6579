use crate::core::racing_line::RacingLine;
use crate::core::vehicle::Pose;
use anyhow::Context;
use glam::{Affine3A, Quat, Vec3};
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// * `name` - Track name
/// * `width` - (m) Track width
/// * `resolution` - Desired number of racing line points
/// * `corner_cutting_factor` - How aggressively the racing line cuts corners (0 - 1)
/// * `vertices` - (m) Closed center line polygon in track-local coordinates
/// * `vertices_file` - CSV file with `x_m,y_m,z_m` columns, used if `vertices` is empty
/// * `position` - (m) Position of the track frame in the world
/// * `rotation_deg` - (deg) Yaw of the track frame in the world
/// * `no_checkpoints` - Number of checkpoints evenly placed along the racing line (the start/finish
/// line is not counted)
#[derive(Debug, Deserialize, Clone)]
pub struct TrackPars {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: f32,
    #[serde(default = "default_resolution")]
    pub resolution: usize,
    #[serde(default = "default_corner_cutting_factor")]
    pub corner_cutting_factor: f32,
    #[serde(default)]
    pub vertices: Vec<Vec3>,
    #[serde(default)]
    pub vertices_file: Option<PathBuf>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation_deg: f32,
    #[serde(default = "default_no_checkpoints")]
    pub no_checkpoints: usize,
}

fn default_width() -> f32 {
    12.0
}
fn default_resolution() -> usize {
    400
}
fn default_corner_cutting_factor() -> f32 {
    0.7
}
fn default_no_checkpoints() -> usize {
    5
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("track polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("racing line generation produced no points")]
    EmptyLine,
    #[error("track {0} has neither inline vertices nor a vertices file")]
    MissingVertices(String),
    #[error("track width must be positive, got {0}")]
    InvalidWidth(f32),
    #[error("racing line resolution must be positive")]
    InvalidResolution,
    #[error("racing line needs at least 4 points, got {0}")]
    LineTooShort(usize),
    #[error("{checkpoints} checkpoints do not fit on a racing line of {points} points")]
    TooManyCheckpoints { checkpoints: usize, points: usize },
}

/// Smallest racing line on which line crossings can be told apart from backward moves.
pub const MIN_LINE_POINTS: usize = 4;

#[derive(Debug, Deserialize, Clone)]
pub struct CsvVertex {
    pub x_m: f32,
    pub y_m: f32,
    pub z_m: f32,
}

/// read_vertices_file reads a closed center line polygon from a CSV file.
pub fn read_vertices_file(filepath: &Path) -> anyhow::Result<Vec<Vec3>> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!(
            "Failed to open track vertices file {}!",
            filepath.to_string_lossy()
        ))?;

    let mut csv_reader = csv::Reader::from_reader(&fh);
    let mut vertices = vec![];

    for result in csv_reader.deserialize() {
        let vertex: CsvVertex = result.context(format!(
            "Failed to parse track vertices file {}!",
            filepath.to_string_lossy()
        ))?;
        vertices.push(Vec3::new(vertex.x_m, vertex.y_m, vertex.z_m));
    }

    Ok(vertices)
}

/// Checkpoint is one of the ordered checkpoints of a lap.
///
/// * `index` - Ordinal of the checkpoint within the lap (0 .. no_checkpoints)
/// * `line_index` - Racing line point the checkpoint sits on
/// * `pose` - World pose a fallen car is placed at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub index: usize,
    pub line_index: usize,
    pub pose: Pose,
}

/// RaceTrack owns the racing line (in track-local space) together with the track-to-world
/// transform, the ordered checkpoints and the start pose.
#[derive(Debug, Clone)]
pub struct RaceTrack {
    pub name: String,
    pub width: f32,
    pub line: RacingLine,
    pub transform: Affine3A,
    inverse_transform: Affine3A,
    pub checkpoints: Vec<Checkpoint>,
    pub start_pose: Pose,
}

impl RaceTrack {
    pub fn new(
        name: &str,
        vertices: &[Vec3],
        width: f32,
        resolution: usize,
        corner_cutting_factor: f32,
        transform: Affine3A,
        no_checkpoints: usize,
    ) -> Result<RaceTrack, TrackError> {
        if vertices.len() < 3 {
            return Err(TrackError::TooFewVertices(vertices.len()));
        }
        if !(width > 0.0) {
            return Err(TrackError::InvalidWidth(width));
        }
        if resolution == 0 {
            return Err(TrackError::InvalidResolution);
        }

        let line = RacingLine::generate(vertices, width, resolution, corner_cutting_factor);
        if line.is_empty() {
            return Err(TrackError::EmptyLine);
        }
        if line.len() < MIN_LINE_POINTS {
            return Err(TrackError::LineTooShort(line.len()));
        }
        if no_checkpoints >= line.len() {
            return Err(TrackError::TooManyCheckpoints {
                checkpoints: no_checkpoints,
                points: line.len(),
            });
        }

        let mut track = RaceTrack {
            name: name.to_owned(),
            width,
            line,
            transform,
            inverse_transform: transform.inverse(),
            checkpoints: vec![],
            start_pose: Pose::default(),
        };

        track.start_pose = track.line_pose(0);
        track.checkpoints = (0..no_checkpoints)
            .map(|c| {
                let line_index = checkpoint_line_index(c, no_checkpoints, track.line.len());
                Checkpoint {
                    index: c,
                    line_index,
                    pose: track.line_pose(line_index),
                }
            })
            .collect();

        Ok(track)
    }

    /// from_pars builds the track from its parameters, reading the vertices file if the
    /// parameters carry no inline vertices.
    pub fn from_pars(pars: &TrackPars) -> anyhow::Result<RaceTrack> {
        let vertices = if !pars.vertices.is_empty() {
            pars.vertices.clone()
        } else if let Some(vertices_file) = &pars.vertices_file {
            read_vertices_file(vertices_file)?
        } else {
            return Err(TrackError::MissingVertices(pars.name.clone()).into());
        };

        let transform = Affine3A::from_rotation_translation(
            Quat::from_rotation_y(pars.rotation_deg.to_radians()),
            pars.position,
        );

        let track = RaceTrack::new(
            &pars.name,
            &vertices,
            pars.width,
            pars.resolution,
            pars.corner_cutting_factor,
            transform,
            pars.no_checkpoints,
        )
        .context(format!("Failed to build track {}!", pars.name))?;

        info!(
            "Track {} ready: {} racing line points, {} checkpoints",
            track.name,
            track.line.len(),
            track.checkpoints.len()
        );
        Ok(track)
    }

    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.transform.transform_point3(local)
    }

    pub fn to_local(&self, world: Vec3) -> Vec3 {
        self.inverse_transform.transform_point3(world)
    }

    pub fn to_world_direction(&self, local: Vec3) -> Vec3 {
        self.transform.transform_vector3(local)
    }

    /// world_point returns racing line point idx (wrapped) in world space.
    pub fn world_point(&self, idx: i64) -> Vec3 {
        self.to_world(self.line.point(idx))
    }

    /// line_pose returns a world pose on racing line point idx facing along the line.
    pub fn line_pose(&self, idx: usize) -> Pose {
        let idx = idx as i64;
        Pose::looking_along(self.world_point(idx), self.to_world_direction(self.line.tangent(idx)))
    }

    pub fn no_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }
}

/// checkpoint_line_index spreads `no_checkpoints` checkpoints evenly between two passes of the
/// start/finish line (which sits on racing line point 0).
pub fn checkpoint_line_index(checkpoint: usize, no_checkpoints: usize, line_len: usize) -> usize {
    (checkpoint + 1) * line_len / (no_checkpoints + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::racing_line::tests::circle;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rejects_degenerate_input() {
        let two = [Vec3::ZERO, Vec3::X];
        assert_eq!(
            RaceTrack::new("t", &two, 10.0, 100, 0.7, Affine3A::IDENTITY, 3).unwrap_err(),
            TrackError::TooFewVertices(2)
        );
        let verts = circle(50.0, 8);
        assert_eq!(
            RaceTrack::new("t", &verts, 0.0, 100, 0.7, Affine3A::IDENTITY, 3).unwrap_err(),
            TrackError::InvalidWidth(0.0)
        );
        assert_eq!(
            RaceTrack::new("t", &verts, 10.0, 0, 0.7, Affine3A::IDENTITY, 3).unwrap_err(),
            TrackError::InvalidResolution
        );

        let triangle = circle(50.0, 3);
        assert_eq!(
            RaceTrack::new("t", &triangle, 10.0, 3, 0.7, Affine3A::IDENTITY, 1).unwrap_err(),
            TrackError::LineTooShort(3)
        );
        let square = circle(50.0, 4);
        assert_eq!(
            RaceTrack::new("t", &square, 10.0, 4, 0.7, Affine3A::IDENTITY, 4).unwrap_err(),
            TrackError::TooManyCheckpoints {
                checkpoints: 4,
                points: 4
            }
        );
    }

    #[test]
    fn smallest_line_keeps_checkpoints_apart() {
        let track = RaceTrack::new("t", &circle(50.0, 4), 10.0, 4, 0.7, Affine3A::IDENTITY, 3).unwrap();
        assert_eq!(track.line.len(), 4);
        let indices: Vec<usize> = track.checkpoints.iter().map(|c| c.line_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn checkpoints_are_ordered_along_the_line() {
        let track = RaceTrack::new("t", &circle(80.0, 16), 10.0, 320, 0.7, Affine3A::IDENTITY, 5).unwrap();
        assert_eq!(track.no_checkpoints(), 5);
        let indices: Vec<usize> = track.checkpoints.iter().map(|c| c.line_index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert!(indices[0] > 0);
        assert!(*indices.last().unwrap() < track.line.len());
    }

    #[test]
    fn transform_round_trips_and_start_faces_along_line() {
        let transform = Affine3A::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(100.0, 5.0, -40.0),
        );
        let track = RaceTrack::new("t", &circle(80.0, 16), 10.0, 320, 0.7, transform, 3).unwrap();

        let p = Vec3::new(3.0, 1.0, -7.0);
        let back = track.to_local(track.to_world(p));
        assert_abs_diff_eq!(back.distance(p), 0.0, epsilon = 1e-3);

        let start = track.start_pose;
        assert_abs_diff_eq!(start.position.distance(track.world_point(0)), 0.0, epsilon = 1e-4);
        let along = (track.world_point(1) - track.world_point(0)).normalize();
        assert!(start.forward().dot(along) > 0.99);
    }

    #[test]
    fn missing_vertices_is_an_error() {
        let pars: TrackPars = serde_json::from_str(r#"{"name": "empty"}"#).unwrap();
        assert!(RaceTrack::from_pars(&pars).is_err());

        let pars: TrackPars = serde_json::from_str(
            r#"{"name": "tri", "vertices": [[0, 0, 0], [100, 0, 0], [0, 0, 100]], "no_checkpoints": 2}"#,
        )
        .unwrap();
        let track = RaceTrack::from_pars(&pars).unwrap();
        assert_eq!(track.no_checkpoints(), 2);
        assert_eq!(track.line.len(), 399);
    }
}
