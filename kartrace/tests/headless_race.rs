use kartrace::core::handle_race::handle_race;
use kartrace::pre::read_sim_pars::SimPars;
use std::f32::consts::TAU;

fn ring_pars(seed: u64) -> SimPars {
    let vertices: Vec<[f32; 3]> = (0..24)
        .map(|i| {
            let a = i as f32 / 24.0 * TAU;
            [200.0 * a.cos(), 0.0, 200.0 * a.sin()]
        })
        .collect();

    let json = serde_json::json!({
        "race_pars": {
            "tot_no_laps": 1,
            "no_ai_racers": 3,
            "seed": seed,
            "settle_time": 0.5,
            "countdown_step_duration": 0.5
        },
        "track_pars": {
            "name": "Ring",
            "width": 14.0,
            "resolution": 400,
            "vertices": vertices,
            "no_checkpoints": 4
        }
    });
    serde_json::from_value(json).unwrap()
}

#[test]
fn seeded_race_produces_a_full_classification() {
    let result = handle_race(&ring_pars(7), 0.05, None, 1.0).unwrap();

    assert_eq!(result.track_name, "Ring");
    assert_eq!(result.racers.len(), 3);

    let mut positions: Vec<usize> = result.racers.iter().map(|r| r.position).collect();
    positions.sort_unstable();
    assert_eq!(positions, vec![1, 2, 3]);

    for racer in result.racers.iter() {
        assert!(racer.skill >= 0.5 && racer.skill <= 0.9);
        assert!(racer.completed_laps() <= 1);
        assert_eq!(racer.finished, racer.finish_time.is_some());
    }
}

#[test]
fn same_seed_gives_the_same_race() {
    let first = handle_race(&ring_pars(11), 0.05, None, 1.0).unwrap();
    let second = handle_race(&ring_pars(11), 0.05, None, 1.0).unwrap();

    assert_eq!(first.racers, second.racers);
    assert_eq!(first.race_time, second.race_time);
}

#[test]
fn live_mode_sends_states_and_a_final_result() {
    let (tx, rx) = flume::unbounded();
    let result = handle_race(&ring_pars(3), 0.05, Some(&tx), 1000.0).unwrap();
    drop(tx);

    let states: Vec<_> = rx.drain().collect();
    assert!(states.len() > 1);
    let last = states.last().unwrap();
    let final_result = last.final_result.as_ref().unwrap();
    assert_eq!(final_result.racers, result.racers);
    assert!(states[..states.len() - 1].iter().all(|s| s.final_result.is_none()));
}
