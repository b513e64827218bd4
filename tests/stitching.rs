use std::collections::{HashMap, HashSet};

use crossbeam_channel::bounded;
use fragstitch::batch::solve_batch;
use fragstitch::{
    Config, Direction, ExitReason, Fragment, Pipeline, StitchGraph, StitchReport, StitchedPath,
    Stitcher,
};

const DT: f64 = 0.04;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next()
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() * (i + 1) as f64) as usize;
            items.swap(i, j.min(i));
        }
    }
}

/// Vehicles on three lanes, each broken into fragments by short gaps.
fn scene(rng: &mut Lcg, vehicles: usize, direction: Direction) -> Vec<Fragment> {
    let mut out = Vec::new();

    for v in 0..vehicles {
        let lane = 6.0 + 12.0 * (v % 3) as f64;
        let speed = rng.range(25.0, 35.0);
        let x0 = 1000.0 + 80.0 * (v / 3) as f64 + rng.range(0.0, 10.0);
        let t_start = rng.range(0.0, 2.0);
        let end = t_start + rng.range(4.0, 8.0);

        let mut t = t_start;
        let mut piece = 0;

        while t < end {
            let n = (rng.range(0.6, 2.0) / DT) as usize + 1;
            let ts: Vec<f64> = (0..n).map(|i| t + i as f64 * DT).collect();
            let xs = ts
                .iter()
                .map(|s| x0 + direction.sign() * speed * (s - t_start))
                .collect();
            let ys = (0..n).map(|_| lane + rng.range(-0.3, 0.3)).collect();

            let last = ts[n - 1];
            out.push(Fragment::new(
                format!("{}-v{}-{}", direction, v, piece),
                direction,
                ts,
                xs,
                ys,
            ));

            t = last + rng.range(DT, 0.6);
            piece += 1;
        }
    }

    out
}

fn by_last_timestamp(fragments: &mut [Fragment]) {
    fragments.sort_by(|a, b| a.last_timestamp.total_cmp(&b.last_timestamp));
}

fn stitch_all(
    config: Config,
    direction: Direction,
    fragments: Vec<Fragment>,
) -> (Vec<StitchedPath>, StitchReport) {
    let (tx, mut rx) = bounded(fragments.len().max(1));
    for f in fragments {
        tx.send(f).unwrap();
    }
    drop(tx);

    let mut out = Vec::new();
    let report = Stitcher::new(direction, config).run(&mut rx, &mut out);

    (out, report)
}

fn assert_each_once(paths: &[StitchedPath], fragments: &[Fragment]) {
    let mut seen = HashSet::new();

    for id in paths.iter().flat_map(|p| p.ids()) {
        assert!(seen.insert(id.to_string()), "{} emitted twice", id);
    }

    let expected: HashSet<String> = fragments.iter().map(|f| f.id.clone()).collect();
    assert_eq!(seen, expected);
}

fn assert_windowed(paths: &[StitchedPath], time_win: f64) {
    for path in paths {
        for pair in path.fragments.windows(2) {
            let gap = pair[1].first_timestamp - pair[0].last_timestamp;

            assert!(
                (0.0..=time_win).contains(&gap),
                "{} -> {} gap {}",
                pair[0].id,
                pair[1].id,
                gap
            );
        }
    }
}

#[test]
fn test_online_matches_batch_optimum() {
    let config = Config {
        time_win: 15.0,
        ..Config::default()
    };
    let thresh = config.stitcher_args.stitch_thresh;

    for seed in [1, 7, 42] {
        let mut rng = Lcg(seed);
        let mut fragments = scene(&mut rng, 9, Direction::East);
        rng.shuffle(&mut fragments);

        let mut graph = StitchGraph::new(
            Direction::East,
            config.time_win,
            config.stitcher_args.clone(),
        );
        for f in fragments.iter().cloned() {
            let id = graph.add_node(f).unwrap();
            graph.augment_path(id).unwrap();
        }

        let online = graph.total_cost() - thresh * graph.num_edges() as f64;
        let batch = solve_batch(&fragments, &config).unwrap();

        assert!(
            (online - batch.objective).abs() < 1e-6,
            "seed {}: online {} batch {}",
            seed,
            online,
            batch.objective
        );
    }
}

#[test]
fn test_arrival_order_does_not_change_optimum() {
    let config = Config {
        time_win: 15.0,
        ..Config::default()
    };

    let mut rng = Lcg(3);
    let mut fragments = scene(&mut rng, 6, Direction::West);

    by_last_timestamp(&mut fragments);
    let (ordered, _) = stitch_all(config.clone(), Direction::West, fragments.clone());

    rng.shuffle(&mut fragments);
    let (shuffled, _) = stitch_all(config, Direction::West, fragments);

    let as_set = |paths: &[StitchedPath]| -> HashSet<Vec<String>> {
        paths
            .iter()
            .map(|p| p.ids().into_iter().map(String::from).collect())
            .collect()
    };

    assert_eq!(as_set(&ordered), as_set(&shuffled));
}

#[test]
fn test_every_fragment_leaves_exactly_once() {
    let config = Config {
        time_win: 2.0,
        stitcher_timeout: 0.2,
        ..Config::default()
    };

    for seed in [5, 11, 99] {
        let mut rng = Lcg(seed);
        let mut fragments = scene(&mut rng, 12, Direction::East);
        by_last_timestamp(&mut fragments);

        let (paths, report) = stitch_all(config.clone(), Direction::East, fragments.clone());

        assert_eq!(report.exit, ExitReason::StreamEnded);
        assert_eq!(report.ingested, fragments.len());
        assert_eq!(report.emitted_fragments, fragments.len());
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.emitted_paths, paths.len());

        assert_each_once(&paths, &fragments);
        assert_windowed(&paths, config.time_win);
    }
}

#[test]
fn test_paths_are_time_ordered() {
    let config = Config {
        time_win: 2.0,
        stitcher_timeout: 0.2,
        ..Config::default()
    };

    let mut rng = Lcg(8);
    let mut fragments = scene(&mut rng, 9, Direction::West);
    rng.shuffle(&mut fragments);

    let (paths, _) = stitch_all(config, Direction::West, fragments.clone());

    assert_each_once(&paths, &fragments);

    for path in &paths {
        assert_eq!(path.direction, Direction::West);
        assert!(path
            .fragments
            .windows(2)
            .all(|w| w[0].last_timestamp <= w[1].first_timestamp));
    }
}

#[test]
fn test_pipeline_end_to_end() {
    let config = Config {
        time_win: 2.0,
        stitcher_timeout: 0.5,
        queue_capacity: 4,
        ..Config::default()
    };

    let mut rng = Lcg(21);
    let mut fragments = scene(&mut rng, 6, Direction::East);
    fragments.extend(scene(&mut rng, 6, Direction::West));
    by_last_timestamp(&mut fragments);

    let (tx, rx) = bounded(config.queue_capacity);
    let pipeline = Pipeline::spawn(config.clone(), rx).unwrap();

    let feed = fragments.clone();
    let feeder = std::thread::spawn(move || {
        for f in feed {
            tx.send(f).unwrap();
        }
    });

    let (paths, report) = pipeline.collect().unwrap();
    feeder.join().unwrap();

    assert_eq!(report.routed, fragments.len());
    assert_eq!(report.east.exit, ExitReason::StreamEnded);
    assert_eq!(report.west.exit, ExitReason::StreamEnded);
    assert_eq!(
        report.east.emitted_fragments + report.west.emitted_fragments,
        fragments.len()
    );

    assert_each_once(&paths, &fragments);
    assert_windowed(&paths, config.time_win);

    let directions: HashMap<&str, Direction> =
        fragments.iter().map(|f| (f.id.as_str(), f.direction)).collect();

    for path in &paths {
        assert!(path.ids().iter().all(|id| directions[id] == path.direction));
    }
}
