use std::ops::Range;

use crate::{
    basis::AoBasis,
    integrals::{significant_quartets, SchwarzBounds, ShellQuartet},
    parallel::{assign_static, contiguous_units},
    xc::MolecularGrid,
};

/// A contiguous slice of the quartet list or of the grid batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkUnit {
    Quartets(Range<usize>),
    GridBatches(Range<usize>),
}

/// How the work of one geometry is cut into units and, for static balancing, which worker
/// computes which unit. Every worker derives the same plan from the same inputs.
#[derive(Clone, Debug)]
pub struct WorkPlan {
    quartets: Vec<ShellQuartet>,
    units: Vec<WorkUnit>,
    costs: Vec<f64>,
    assignment: Vec<Vec<usize>>,
}

/// Rough operation count of a quartet: primitive quartets times block size.
fn quartet_cost(basis: &AoBasis, quartet: &ShellQuartet) -> f64 {
    quartet
        .shells
        .iter()
        .map(|&index| {
            let shell = &basis.shells()[index];
            (shell.n_primitives() * shell.n_functions()) as f64
        })
        .product()
}

impl WorkPlan {
    pub fn new(
        basis: &AoBasis,
        bounds: &SchwarzBounds,
        threshold: f64,
        grid: Option<&MolecularGrid>,
        workers: usize,
        units_per_worker: usize,
    ) -> Self {
        let workers = workers.max(1);
        let target_units = workers * units_per_worker.max(1);

        let quartets = significant_quartets(bounds, threshold);
        let quartet_costs = quartets
            .iter()
            .map(|quartet| quartet_cost(basis, quartet))
            .collect::<Vec<_>>();

        let mut units = Vec::new();
        let mut costs = Vec::new();
        for range in contiguous_units(&quartet_costs, target_units) {
            costs.push(quartet_costs[range.clone()].iter().sum());
            units.push(WorkUnit::Quartets(range));
        }

        if let Some(grid) = grid {
            let n = basis.n_functions() as f64;
            let batch_costs = grid
                .batches()
                .iter()
                .map(|batch| batch.len() as f64 * n * n)
                .collect::<Vec<_>>();
            for range in contiguous_units(&batch_costs, target_units) {
                costs.push(batch_costs[range.clone()].iter().sum());
                units.push(WorkUnit::GridBatches(range));
            }
        }

        let assignment = assign_static(&costs, workers);
        log::debug!(
            "work plan: {} quartets and {} grid batches in {} units over {workers} workers",
            quartets.len(),
            grid.map_or(0, |grid| grid.batches().len()),
            units.len(),
        );

        Self {
            quartets,
            units,
            costs,
            assignment,
        }
    }

    /// Significant canonical quartets in canonical order.
    pub fn quartets(&self) -> &[ShellQuartet] {
        &self.quartets
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    pub fn workers(&self) -> usize {
        self.assignment.len()
    }

    /// Units of `rank` under static balancing.
    pub fn assigned(&self, rank: usize) -> &[usize] {
        self.assignment.get(rank).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkPlan, WorkUnit};
    use crate::{
        basis::AoBasis,
        integrals::{unique_quartets, McMurchieDavidson, SchwarzBounds},
        molecule, testing,
        xc::{GridConfig, MolecularGrid},
    };

    #[test]
    fn units_cover_all_work_once() {
        let water = molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1)
        };
        let basis = AoBasis::new(&water, &testing::basis_set("6-31G")).unwrap();
        let bounds = SchwarzBounds::new(&McMurchieDavidson, &basis);
        let grid = MolecularGrid::new(
            &water,
            &GridConfig {
                radial_points: 10,
                theta_points: 6,
                phi_points: 12,
                batch_size: 32,
            },
        );

        let plan = WorkPlan::new(&basis, &bounds, 0.0, Some(&grid), 3, 4);
        assert_eq!(plan.quartets().len(), unique_quartets(basis.n_shells()).count());
        assert_eq!(plan.workers(), 3);

        let mut quartets = vec![0; plan.quartets().len()];
        let mut batches = vec![0; grid.batches().len()];
        for unit in plan.units() {
            match unit {
                WorkUnit::Quartets(range) => range.clone().for_each(|q| quartets[q] += 1),
                WorkUnit::GridBatches(range) => range.clone().for_each(|b| batches[b] += 1),
            }
        }
        assert!(quartets.iter().all(|&count| count == 1));
        assert!(batches.iter().all(|&count| count == 1));

        let mut assigned = (0..3).flat_map(|rank| plan.assigned(rank).to_vec()).collect::<Vec<_>>();
        assigned.sort_unstable();
        assert_eq!(assigned, (0..plan.units().len()).collect::<Vec<_>>());
        assert!(plan.assigned(3).is_empty());
    }
}
