use crate::core::driver::DriverPars;
use crate::core::kinematics::KinematicPars;
use crate::core::race::RacePars;
use crate::core::track::TrackPars;
use anyhow::Context;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::Path;

/// SimPars is used to store all other parameter structs.
#[derive(Debug, Deserialize, Clone)]
pub struct SimPars {
    pub race_pars: RacePars,
    pub track_pars: TrackPars,
    #[serde(default)]
    pub driver_pars: DriverPars,
    #[serde(default)]
    pub vehicle_pars: KinematicPars,
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct. A relative `vertices_file` of the track is resolved against the parameter file's
/// directory.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!(
            "Failed to open parameter file {}!",
            filepath.to_string_lossy()
        ))?;
    let mut pars: SimPars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse parameter file {}!",
        filepath.to_string_lossy()
    ))?;

    if let (Some(vertices_file), Some(dir)) = (&pars.track_pars.vertices_file, filepath.parent()) {
        if vertices_file.is_relative() {
            pars.track_pars.vertices_file = Some(dir.join(vertices_file));
        }
    }

    Ok(pars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_minimal_file_and_resolves_vertices_path() {
        let dir = std::env::temp_dir().join("kartrace_read_sim_pars_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pars.json");
        let mut fh = std::fs::File::create(&path).unwrap();
        write!(
            fh,
            r#"{{
                "race_pars": {{"tot_no_laps": 2, "seed": 4}},
                "track_pars": {{"name": "Oval", "vertices_file": "oval.csv"}}
            }}"#
        )
        .unwrap();

        let pars = read_sim_pars(&path).unwrap();
        assert_eq!(pars.race_pars.tot_no_laps, 2);
        assert_eq!(pars.race_pars.seed, Some(4));
        assert_eq!(pars.race_pars.no_ai_racers, 3);
        assert_eq!(pars.driver_pars.lookahead_points, 8);
        assert_eq!(pars.track_pars.vertices_file, Some(dir.join("oval.csv")));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_sim_pars(Path::new("does/not/exist.json")).unwrap_err();
        assert!(format!("{}", err).contains("does/not/exist.json"));
    }
}
