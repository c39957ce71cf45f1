use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::{CommError, Communicator, Message};

/// How work units are distributed over the workers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Balancing {
    /// Assignment computed once from the cost estimates, no coordination while working.
    #[default]
    Static,
    /// Rank 0 hands out units on request.
    Dynamic,
}

/// Splits items with the given costs into at most `n_units` contiguous ranges of roughly equal
/// total cost. Every range is non-empty.
pub fn contiguous_units(costs: &[f64], n_units: usize) -> Vec<Range<usize>> {
    if costs.is_empty() {
        return Vec::new();
    }

    let n_units = n_units.clamp(1, costs.len());
    let total = costs.iter().sum::<f64>();
    let target = total / n_units as f64;

    let mut units = Vec::with_capacity(n_units);
    let mut start = 0;
    let mut accumulated = 0.0;

    for (index, &cost) in costs.iter().enumerate() {
        accumulated += cost;
        let remaining_items = costs.len() - index - 1;
        let remaining_units = n_units - units.len() - 1;

        let full = accumulated >= target * (units.len() + 1) as f64;
        if remaining_units > 0 && (full || remaining_items == remaining_units) {
            units.push(start..index + 1);
            start = index + 1;
        }
    }
    units.push(start..costs.len());

    units
}

/// Longest-processing-time-first assignment of units to workers. Returns, for every worker, the
/// indices of its units in ascending order.
pub fn assign_static(unit_costs: &[f64], workers: usize) -> Vec<Vec<usize>> {
    let workers = workers.max(1);
    let mut order = (0..unit_costs.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| unit_costs[b].total_cmp(&unit_costs[a]).then(a.cmp(&b)));

    let mut loads: Vec<f64> = vec![0.0; workers];
    let mut assignment = vec![Vec::new(); workers];

    for unit in order {
        let worker = loads
            .iter()
            .enumerate()
            .min_by(|(_, a): &(usize, &f64), (_, b): &(usize, &f64)| a.total_cmp(b))
            .map_or(0, |(worker, _)| worker);
        loads[worker] += unit_costs[unit];
        assignment[worker].push(unit);
    }

    for units in &mut assignment {
        units.sort_unstable();
    }
    assignment
}

/// Processes `n_units` work units with rank 0 acting as coordinator. Rank 0 answers requests
/// between its own units, or only answers requests when the communicator cannot poll; every other
/// rank asks for a unit, processes it, and asks again until told that nothing is left.
pub fn dynamic_schedule<C, E>(
    comm: &C,
    n_units: usize,
    mut process: impl FnMut(usize) -> Result<(), E>,
) -> Result<(), E>
where
    C: Communicator + ?Sized,
    E: From<CommError>,
{
    let is_request = |_: usize, message: &Message| matches!(message, Message::WorkRequest);

    if comm.size() == 1 {
        return (0..n_units).try_for_each(process);
    }

    if comm.is_root() {
        let mut next = 0;
        let mut finished = 0;
        let workers = comm.size() - 1;

        let mut answer = |source: usize, next: &mut usize, finished: &mut usize| {
            let assignment = (*next < n_units).then_some(*next);
            match assignment {
                Some(_) => *next += 1,
                None => *finished += 1,
            }
            comm.send(source, Message::WorkAssignment(assignment))
        };

        while finished < workers {
            // serve everyone who is waiting before working on a unit
            while let Some((source, _)) = comm.receive_matching(&is_request, false)? {
                answer(source, &mut next, &mut finished)?;
            }

            if next < n_units && comm.can_poll() {
                let unit = next;
                next += 1;
                process(unit)?;
            } else if finished < workers {
                if let Some((source, _)) = comm.receive_matching(&is_request, true)? {
                    answer(source, &mut next, &mut finished)?;
                }
            }
        }
        Ok(())
    } else {
        loop {
            comm.send(0, Message::WorkRequest)?;
            let reply = comm.receive_matching(
                &|source, message| source == 0 && matches!(message, Message::WorkAssignment(_)),
                true,
            )?;
            match reply {
                Some((_, Message::WorkAssignment(Some(unit)))) => process(unit)?,
                Some((_, Message::WorkAssignment(None))) => return Ok(()),
                other => {
                    return Err(CommError::Protocol(format!(
                        "expected a work assignment, got {other:?}"
                    ))
                    .into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{assign_static, contiguous_units, dynamic_schedule};
    use crate::{
        error::Error,
        parallel::{CommError, Communicator, LocalCluster, Message},
    };

    /// Hides messages in flight from non-blocking receives.
    struct BlockingOnly<'a, C: Communicator>(&'a C);

    impl<C: Communicator> Communicator for BlockingOnly<'_, C> {
        fn rank(&self) -> usize {
            self.0.rank()
        }

        fn size(&self) -> usize {
            self.0.size()
        }

        fn send(&self, destination: usize, message: Message) -> Result<(), CommError> {
            self.0.send(destination, message)
        }

        fn receive_matching(
            &self,
            filter: &dyn Fn(usize, &Message) -> bool,
            blocking: bool,
        ) -> Result<Option<(usize, Message)>, CommError> {
            if blocking {
                self.0.receive_matching(filter, true)
            } else {
                Ok(None)
            }
        }

        fn can_poll(&self) -> bool {
            false
        }
    }

    #[test]
    fn contiguous_units_cover_everything() {
        let mut rng = StdRng::seed_from_u64(42);
        let costs = (0..500).map(|_| rng.gen_range(1.0..100.0)).collect::<Vec<f64>>();

        for n_units in [1, 2, 7, 64, 499, 500, 800] {
            let units = contiguous_units(&costs, n_units);
            assert_eq!(units.len(), n_units.min(costs.len()));
            assert_eq!(units.first().unwrap().start, 0);
            assert_eq!(units.last().unwrap().end, costs.len());
            for pair in units.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert!(units.iter().all(|unit| !unit.is_empty()));
        }

        let units = contiguous_units(&costs, 8);
        let total = costs.iter().sum::<f64>();
        for unit in &units {
            let cost = costs[unit.clone()].iter().sum::<f64>();
            assert!(cost < 2.0 * total / 8.0);
        }

        assert!(contiguous_units(&[], 4).is_empty());
    }

    #[test]
    fn static_assignment_is_balanced_and_complete() {
        let mut rng = StdRng::seed_from_u64(7);
        let costs = (0..40).map(|_| rng.gen_range(1.0..10.0)).collect::<Vec<f64>>();
        let assignment = assign_static(&costs, 3);

        let mut all = assignment.iter().flatten().copied().collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<_>>());

        let loads = assignment
            .iter()
            .map(|units| units.iter().map(|&u| costs[u]).sum::<f64>())
            .collect::<Vec<_>>();
        let max = loads.iter().copied().fold(0.0, f64::max);
        let min = loads.iter().copied().fold(f64::INFINITY, f64::min);
        // LPT keeps the spread below the largest single unit
        assert!(max - min <= 10.0);
    }

    #[test]
    fn dynamic_schedule_processes_every_unit_once() {
        let per_rank = LocalCluster::run(4, |comm| {
            let mut processed = Vec::new();
            dynamic_schedule::<_, Error>(comm, 25, |unit| {
                processed.push(unit);
                Ok(())
            })?;
            Ok(processed)
        })
        .unwrap();

        let mut all = per_rank.into_iter().flatten().collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn coordinator_without_polling_only_hands_out_units() {
        let per_rank = LocalCluster::run(3, |comm| {
            let comm = BlockingOnly(comm);
            let mut processed = Vec::new();
            dynamic_schedule::<_, Error>(&comm, 17, |unit| {
                processed.push(unit);
                Ok(())
            })?;
            Ok(processed)
        })
        .unwrap();

        assert!(per_rank[0].is_empty());
        let mut all = per_rank.into_iter().flatten().collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..17).collect::<Vec<_>>());
    }
}
