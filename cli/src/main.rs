use clap::Parser;
use kartrace::core::handle_race::handle_race;
use kartrace::core::track::RaceTrack;
use kartrace::interfaces::standings_interface::RaceState;
use kartrace::post::race_result::RaceResult;
use kartrace::pre::read_sim_pars::{read_sim_pars, SimPars};
use kartrace::pre::sim_opts::SimOpts;
use plotters::prelude::*;
use rayon::prelude::*;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

/// export_racing_line_plot draws the center line and the racing line of the track, colored by
/// recommended speed, into a PNG file in the output folder.
fn export_racing_line_plot(track: &RaceTrack) -> anyhow::Result<String> {
    let out_dir = std::path::Path::new("output");
    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("racing_line_{}.png", track.name));

    let centers = track.line.centers();
    let points = track.line.points();
    let margin = track.width;
    let (mut x_min, mut x_max, mut z_min, mut z_max) =
        (f32::INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::NEG_INFINITY);
    for p in centers.iter().chain(points.iter()) {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        z_min = z_min.min(p.z);
        z_max = z_max.max(p.z);
    }
    if !x_min.is_finite() || !z_min.is_finite() {
        anyhow::bail!("Track {} has no racing line to plot!", track.name);
    }

    let root = BitMapBackend::new(&out_path, (1280, 960)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Racing line {}", track.name), ("sans-serif", 24).into_font())
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min - margin..x_max + margin, z_min - margin..z_max + margin)?;

    chart
        .configure_mesh()
        .x_desc("x (m)")
        .y_desc("z (m)")
        .label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 16))
        .draw()?;

    let center_line: Vec<(f32, f32)> = centers.iter().chain(centers.first()).map(|p| (p.x, p.z)).collect();
    chart
        .draw_series(LineSeries::new(center_line, RGBColor(150, 150, 150)))?
        .label("center line")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RGBColor(150, 150, 150)));

    // racing line points, slow (red) to fast (green)
    chart
        .draw_series(points.iter().zip(track.line.speeds().iter()).map(|(p, &v)| {
            let v = v.clamp(0.0, 1.0);
            let color = RGBColor((255.0 * (1.0 - v)) as u8, (200.0 * v) as u8, 0);
            Circle::new((p.x, p.z), 2, color.filled())
        }))?
        .label("racing line")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, RED.filled()));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", 16))
        .position(plotters::chart::SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(out_path.to_string_lossy().into_owned())
}

/// print_win_summary prints how often each car won over all simulation runs.
fn print_win_summary(results: &[RaceResult]) {
    let mut wins: Vec<(String, u32)> = vec![];
    let mut no_winner = 0;

    for result in results.iter() {
        match result.winner() {
            Some(winner) => match wins.iter_mut().find(|(name, _)| *name == winner.name) {
                Some((_, count)) => *count += 1,
                None => wins.push((winner.name.clone(), 1)),
            },
            None => no_winner += 1,
        }
    }
    wins.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    println!("RESULT: Wins over {} runs", results.len());
    for (name, count) in wins.iter() {
        println!("{:12}: {:4} ({:.1}%)", name, count, 100.0 * *count as f32 / results.len() as f32);
    }
    if no_winner > 0 {
        println!("{:12}: {:4}", "no finisher", no_winner);
    }
}

fn print_race_state(state: &RaceState) {
    let line: Vec<String> = state
        .car_states
        .iter()
        .map(|c| {
            let mut flags = String::new();
            if c.overtaking {
                flags.push('O');
            }
            if c.defending {
                flags.push('D');
            }
            if c.nitro_active {
                flags.push('N');
            }
            let position = match c.finish_position {
                Some(pos) => format!("F{}", pos),
                None => format!("P{}", c.rank),
            };
            format!(
                "{} {} L{} {:.1}km/h {}",
                position,
                c.name,
                c.lap,
                c.velocity * 3.6,
                flags
            )
        })
        .collect();
    println!("{:7.1}s {:?} | {}", state.race_time, state.phase, line.join(" | "));
}

fn seeded_pars(sim_pars: &SimPars, run: u32) -> SimPars {
    let mut pars = sim_pars.clone();
    pars.race_pars.seed = pars.race_pars.seed.map(|seed| seed.wrapping_add(run as u64));
    pars
}

fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();

    let log_filter = if sim_opts.debug {
        "kartrace=debug,cli=debug"
    } else {
        "kartrace=info,cli=info"
    };
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    // get simulation parameters
    let sim_pars = if let Some(parfile_path) = &sim_opts.parfile_path {
        info!("Reading simulation parameters from {:?}", parfile_path);
        read_sim_pars(parfile_path)?
    } else {
        anyhow::bail!("No parameter file provided! Use -p <path_to_json> to run the simulation.");
    };

    if !(0.001..=0.1).contains(&sim_opts.timestep_size) {
        warn!(
            "Time step size {:.3}s is outside the recommended range [0.001, 0.1]",
            sim_opts.timestep_size
        );
    }

    info!(
        "Simulating {} laps on {} with a time step size of {:.3}s",
        sim_pars.race_pars.tot_no_laps, sim_pars.track_pars.name, sim_opts.timestep_size
    );

    let track = RaceTrack::from_pars(&sim_pars.track_pars)?;
    match export_racing_line_plot(&track) {
        Ok(path) => info!("Racing line plot written to {}", path),
        Err(e) => warn!("Could not write racing line plot: {}", e),
    }

    // EXECUTION -----------------------------------------------------------------------------------
    if sim_opts.live {
        let (tx, rx) = flume::unbounded();

        let sim_opts_thread = sim_opts.clone();
        let sim_pars_thread = sim_pars.clone();
        let handle = thread::spawn(move || {
            handle_race(
                &sim_pars_thread,
                sim_opts_thread.timestep_size,
                Some(&tx),
                sim_opts_thread.realtime_factor,
            )
        });

        // the simulator thread drops the sender when it ends
        let mut t_last_print = f32::NEG_INFINITY;
        for state in rx.iter() {
            if let Some(result) = &state.final_result {
                result.print_results();
            } else if state.race_time >= t_last_print + 1.0 {
                print_race_state(&state);
                t_last_print = state.race_time;
            }
        }

        match handle.join() {
            Ok(result) => {
                let path = result?.write_results_to_file(None)?;
                info!("Results written to {}", path);
            }
            Err(_) => anyhow::bail!("Simulation thread panicked!"),
        }
    } else if sim_opts.no_sim_runs <= 1 {
        let t_start = Instant::now();
        let race_result = handle_race(&sim_pars, sim_opts.timestep_size, None, 1.0)?;
        info!("Execution time: {}ms", t_start.elapsed().as_millis());

        race_result.print_results();
        let path = race_result.write_results_to_file(None)?;
        info!("Results written to {}", path);
    } else {
        let t_start = Instant::now();
        let results = (0..sim_opts.no_sim_runs)
            .into_par_iter()
            .map(|run| handle_race(&seeded_pars(&sim_pars, run), sim_opts.timestep_size, None, 1.0))
            .collect::<anyhow::Result<Vec<RaceResult>>>()?;
        info!(
            "Execution time for {} runs: {}ms",
            sim_opts.no_sim_runs,
            t_start.elapsed().as_millis()
        );

        print_win_summary(&results);
    }

    Ok(())
}
