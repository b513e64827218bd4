use crate::config::Config;
use crate::cost::link_cost;
use crate::error::{Error, Result};
use crate::fragment::{Direction, Fragment};
use crate::track::Track;

use munkres::{solve_assignment, WeightMatrix};
use std::collections::HashSet;

/// Optimal stitching of a finite fragment set.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSolution {
    /// fragment ids, head to tail, ordered by the tail's last timestamp
    pub paths: Vec<Vec<String>>,
    /// sum of `cost - stitch_thresh` over the chosen links
    pub objective: f64,
}

/// Solves the whole set at once with the Hungarian method: every fragment
/// gets at most one successor and one predecessor, minimizing the total
/// thresholded link cost. Invalid fragments are skipped.
pub fn solve_batch(fragments: &[Fragment], config: &Config) -> Result<BatchSolution> {
    let mut seen = HashSet::new();
    for f in fragments {
        if !seen.insert(f.id.as_str()) {
            return Err(Error::DuplicateFragment(f.id.clone()));
        }
    }

    let mut paths = Vec::new();
    let mut objective = 0.0;

    for direction in [Direction::East, Direction::West] {
        let group: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| f.direction == direction)
            .filter(|f| match f.validate() {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%err, "skip fragment");
                    false
                }
            })
            .collect();

        let (mut dir_paths, dir_objective) = solve_direction(&group, config)?;

        tracing::debug!(
            %direction,
            fragments = group.len(),
            paths = dir_paths.len(),
            "batch solved"
        );

        paths.append(&mut dir_paths);
        objective += dir_objective;
    }

    Ok(BatchSolution { paths, objective })
}

fn solve_direction(group: &[&Fragment], config: &Config) -> Result<(Vec<Vec<String>>, f64)> {
    let n = group.len();
    if n == 0 {
        return Ok((Vec::new(), 0.0));
    }

    let params = &config.stitcher_args;
    let thresh = params.stitch_thresh;

    let tracks: Vec<Track> = group
        .iter()
        .map(|f| Track::from_fragment(f, params.anchor_samples))
        .collect();

    // row = predecessor, column = successor
    let costs: Vec<Vec<Option<f64>>> = tracks
        .iter()
        .enumerate()
        .map(|(r, pred)| {
            tracks
                .iter()
                .enumerate()
                .map(|(c, succ)| {
                    if r == c {
                        None
                    } else {
                        link_cost(pred, succ, config.time_win, params)
                    }
                })
                .collect()
        })
        .collect();

    // leaving a pair unlinked costs the threshold
    let mut mat = WeightMatrix::from_fn(n, |(r, c)| costs[r][c].unwrap_or(thresh));

    let assignment = solve_assignment(&mut mat)
        .map_err(|e| Error::Assignment(format!("{:?}", e)))?;

    let mut succ = vec![None; n];
    let mut pred = vec![None; n];
    let mut objective = 0.0;

    for pos in assignment {
        if let Some(cost) = costs[pos.row][pos.column] {
            if cost < thresh {
                succ[pos.row] = Some(pos.column);
                pred[pos.column] = Some(pos.row);
                objective += cost - thresh;
            }
        }
    }

    let mut chains: Vec<Vec<usize>> = (0..n)
        .filter(|&i| pred[i].is_none())
        .map(|head| {
            let mut chain = vec![head];
            let mut cur = head;

            while let Some(next) = succ[cur] {
                chain.push(next);
                cur = next;
            }

            chain
        })
        .collect();

    chains.sort_by(|a, b| {
        let ta = tracks[a[a.len() - 1]].last_timestamp;
        let tb = tracks[b[b.len() - 1]].last_timestamp;

        ta.total_cmp(&tb)
    });

    let paths = chains
        .into_iter()
        .map(|chain| chain.into_iter().map(|i| group[i].id.clone()).collect())
        .collect();

    Ok((paths, objective))
}
