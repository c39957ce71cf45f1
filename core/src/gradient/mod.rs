//! Analytic nuclear gradients of a converged SCF energy.
mod terms;

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    dispersion::DispersionTerm,
    error::{Error, Result},
    fock::{FockBuilder, WorkUnit},
    integrals::{nuclear_charges, IntegralKernel, McMurchieDavidson},
    molecule::Molecule,
    parallel::Communicator,
    scf::{ScfState, ScfStatus},
    xc::xc_gradient_batch,
};

/// dE/dR per atom in hartree/bohr, with its parts kept for inspection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub total: Vec<Vector3<f64>>,
    pub nuclear_repulsion: Vec<Vector3<f64>>,
    /// Kinetic and nuclear attraction derivatives contracted with the density, including the
    /// Hellmann-Feynman force of the moving nuclei.
    pub one_electron: Vec<Vector3<f64>>,
    pub two_electron: Vec<Vector3<f64>>,
    pub pulay: Vec<Vector3<f64>>,
    pub xc: Vec<Vector3<f64>>,
    pub dispersion: Vec<Vector3<f64>>,
}

impl Gradient {
    /// Largest absolute cartesian component.
    pub fn max_component(&self) -> f64 {
        self.total
            .iter()
            .flat_map(|g| g.iter())
            .fold(0.0, |max: f64, value| max.max(value.abs()))
    }

    /// Flattened to (x0, y0, z0, x1, ...), the layout of [`Molecule::coordinates`].
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.total.len() * 3,
            self.total.iter().flat_map(|g| g.iter().copied()),
        )
    }
}

/// Combines the derivative integrals of a converged calculation into forces.
pub struct GradientAssembler<'a, K: IntegralKernel = McMurchieDavidson> {
    builder: &'a FockBuilder<K>,
    molecule: &'a Molecule,
}

impl<'a, K: IntegralKernel> GradientAssembler<'a, K> {
    pub fn new(builder: &'a FockBuilder<K>, molecule: &'a Molecule) -> Self {
        Self { builder, molecule }
    }

    /// The two-electron and exchange-correlation parts are split over the ranks of `comm` along
    /// the builder's static plan and reduced; everything else is cheap and computed on every rank.
    pub fn assemble<C>(
        &self,
        comm: &C,
        state: &ScfState,
        dispersion: &DispersionTerm,
    ) -> Result<Gradient>
    where
        C: Communicator + ?Sized,
    {
        if state.status != ScfStatus::Converged {
            return Err(Error::GradientPrecondition(state.status));
        }
        let plan = self.builder.plan();
        if comm.size() != plan.workers() {
            return Err(Error::InvalidConfig(format!(
                "work plan is for {} workers, communicator has {}",
                plan.workers(),
                comm.size()
            )));
        }

        let n_atoms = self.molecule.n_atoms();
        let kernel = self.builder.kernel();
        let basis = self.builder.basis();
        let zeros = || vec![Vector3::zeros(); n_atoms];
        let total_density = state.total_density();

        let mut one_electron = zeros();
        terms::one_electron(
            kernel,
            basis,
            &nuclear_charges(self.molecule),
            &total_density,
            &mut one_electron,
        );

        let mut pulay = zeros();
        let fock = self.builder.build(comm, &state.densities)?.fock;
        let energy_weighted =
            terms::energy_weighted_density(&state.densities, &fock, state.orbitals.occupation);
        terms::pulay(kernel, basis, &energy_weighted, &mut pulay);

        let alpha = self.builder.flavor().exact_exchange();
        let exchange_scale = if state.is_restricted() { alpha / 2.0 } else { alpha };
        let function_atoms = basis.function_atoms();
        let shells = basis.shells();

        let mut two_electron = zeros();
        let mut xc = zeros();
        for &unit in plan.assigned(comm.rank()) {
            match &plan.units()[unit] {
                WorkUnit::Quartets(range) => {
                    for quartet in &plan.quartets()[range.clone()] {
                        let [p, q, r, s] = quartet.shells;
                        terms::add_quartet(
                            kernel,
                            [&shells[p], &shells[q], &shells[r], &shells[s]],
                            quartet.degeneracy(),
                            &total_density,
                            &state.densities,
                            exchange_scale,
                            &mut two_electron,
                        );
                    }
                }
                WorkUnit::GridBatches(range) => {
                    let grid = self.builder.grid();
                    let functional = self.builder.flavor().functional();
                    if let (Some(grid), Some(functional)) = (grid, functional) {
                        for batch in &grid.batches()[range.clone()] {
                            xc_gradient_batch(
                                batch,
                                basis,
                                &state.densities,
                                functional,
                                &function_atoms,
                                &mut xc,
                            );
                        }
                    }
                }
            }
        }

        let mut buffer = Vec::with_capacity(6 * n_atoms);
        buffer.extend(two_electron.iter().chain(&xc).flat_map(|g| g.iter().copied()));
        let reduced = comm.all_reduce_sum(buffer)?;
        let (reduced_two_electron, reduced_xc) = reduced.split_at(3 * n_atoms);
        let unflatten = |values: &[f64]| {
            values
                .chunks_exact(3)
                .map(Vector3::from_column_slice)
                .collect::<Vec<_>>()
        };
        let two_electron = unflatten(reduced_two_electron);
        let xc = unflatten(reduced_xc);

        let nuclear_repulsion = self.molecule.nuclear_repulsion_gradient();
        let total = (0..n_atoms)
            .map(|atom| {
                nuclear_repulsion[atom]
                    + one_electron[atom]
                    + two_electron[atom]
                    + pulay[atom]
                    + xc[atom]
                    + dispersion.gradient[atom]
            })
            .collect();

        Ok(Gradient {
            total,
            nuclear_repulsion,
            one_electron,
            two_electron,
            pulay,
            xc,
            dispersion: dispersion.gradient.clone(),
        })
    }
}
