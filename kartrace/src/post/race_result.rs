use std::fmt::Write;
use std::io::Write as IoWrite;

use serde::{Deserialize, Serialize};

/// RacerResult is the outcome of the race for one entrant.
///
/// * `id` - Registry id of the car
/// * `name` - Display name
/// * `skill` / `aggressiveness` - Difficulty the car raced with
/// * `position` - Final position (1 = winner)
/// * `finished` - The car completed all laps
/// * `finish_time` - (s) Race time at which the car finished
/// * `racetimes` - (s) Race time at the end of each completed lap
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RacerResult {
    pub id: usize,
    pub name: String,
    pub skill: f32,
    pub aggressiveness: f32,
    pub position: usize,
    pub finished: bool,
    pub finish_time: Option<f32>,
    pub racetimes: Vec<f32>,
}

impl RacerResult {
    pub fn completed_laps(&self) -> usize {
        self.racetimes.len()
    }

    /// laptimes returns the duration of each completed lap.
    pub fn laptimes(&self) -> Vec<f32> {
        let mut prev = 0.0;
        self.racetimes
            .iter()
            .map(|&t| {
                let laptime = t - prev;
                prev = t;
                laptime
            })
            .collect()
    }
}

/// RaceResult contains all race information that is required for post-processing the results.
/// `racers` is ordered by final position.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RaceResult {
    pub track_name: String,
    pub tot_no_laps: u32,
    pub race_time: f32,
    pub all_finished: bool,
    pub racers: Vec<RacerResult>,
}

impl RaceResult {
    pub fn winner(&self) -> Option<&RacerResult> {
        self.racers.first().filter(|r| r.finished)
    }

    fn format_results(&self) -> Result<String, std::fmt::Error> {
        let mut content = String::new();

        writeln!(
            &mut content,
            "RESULT: {} laps on {} ({:.2}s simulated)",
            self.tot_no_laps, self.track_name, self.race_time
        )?;
        writeln!(&mut content, "pos, name, skill, aggr, laps, finish time")?;
        for racer in self.racers.iter() {
            let finish = match racer.finish_time {
                Some(t) => format!("{:8.3}s", t),
                None => String::from("     DNF"),
            };
            writeln!(
                &mut content,
                "{:3}, {:12}, {:4.2}, {:4.2}, {:3}, {}",
                racer.position,
                racer.name,
                racer.skill,
                racer.aggressiveness,
                racer.completed_laps(),
                finish
            )?;
        }

        writeln!(&mut content, "RESULT: Lap times")?;
        for racer in self.racers.iter() {
            write!(&mut content, "{:12}", racer.name)?;
            for laptime in racer.laptimes() {
                write!(&mut content, ", {:8.3}s", laptime)?;
            }
            writeln!(&mut content)?;
        }

        Ok(content)
    }

    /// print_results prints the final classification and lap times to the console output.
    pub fn print_results(&self) {
        match self.format_results() {
            Ok(content) => print!("{}", content),
            Err(e) => eprintln!("WARNING: Could not format race results: {}", e),
        }
    }

    /// write_results_to_file writes the final classification and lap times to a text file
    /// (output/last_run.txt if no path is given). Returns the path to the written file.
    pub fn write_results_to_file(&self, path: Option<&std::path::Path>) -> anyhow::Result<String> {
        let content = self.format_results()?;

        let out_dir = std::path::Path::new("output");
        let out_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                std::fs::create_dir_all(out_dir)?;
                out_dir.join("last_run.txt")
            }
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&out_path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        Ok(out_path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn result() -> RaceResult {
        RaceResult {
            track_name: String::from("Oval"),
            tot_no_laps: 2,
            race_time: 61.0,
            all_finished: false,
            racers: vec![
                RacerResult {
                    id: 1,
                    name: String::from("AI Racer 2"),
                    skill: 0.8,
                    aggressiveness: 0.4,
                    position: 1,
                    finished: true,
                    finish_time: Some(60.5),
                    racetimes: vec![31.0, 60.5],
                },
                RacerResult {
                    id: 0,
                    name: String::from("AI Racer 1"),
                    skill: 0.6,
                    aggressiveness: 0.7,
                    position: 2,
                    finished: false,
                    finish_time: None,
                    racetimes: vec![33.0],
                },
            ],
        }
    }

    #[test]
    fn laptimes_from_racetimes() {
        let result = result();
        let laptimes = result.racers[0].laptimes();
        assert_abs_diff_eq!(laptimes[0], 31.0);
        assert_abs_diff_eq!(laptimes[1], 29.5);
        assert_eq!(result.winner().map(|r| r.id), Some(1));
    }

    #[test]
    fn formatted_results_list_every_racer() {
        let content = result().format_results().unwrap();
        assert!(content.contains("AI Racer 1"));
        assert!(content.contains("AI Racer 2"));
        assert!(content.contains("DNF"));
    }

    #[test]
    fn writes_results_to_given_path() {
        let path = std::env::temp_dir().join("kartrace_result_test.txt");
        let written = result().write_results_to_file(Some(&path)).unwrap();
        let content = std::fs::read_to_string(&written).unwrap();
        assert!(content.starts_with("RESULT"));
        let _ = std::fs::remove_file(path);
    }
}
