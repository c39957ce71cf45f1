//! Distributed construction of Fock matrices.
//!
//! The two-electron and exchange-correlation work of a geometry is cut into units once (see
//! [`WorkPlan`]). Every call to [`FockBuilder::build`] lets each worker accumulate the units it owns
//! into private matrices, which a single reduction then combines. The result does not depend on
//! how many workers there are or which of them computed which unit, up to summation order.
mod accumulate;
mod plan;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{
    basis::AoBasis,
    error::{Error, Result},
    integrals::{core_hamiltonian, IntegralKernel, McMurchieDavidson, SchwarzBounds},
    molecule::Molecule,
    parallel::{dynamic_schedule, Balancing, Communicator},
    xc::{CombinedFunctional, GridConfig, Method, MolecularGrid},
};

use accumulate::Accumulator;
pub use plan::{WorkPlan, WorkUnit};

/// The contributions a Fock build has to produce, fixed once per calculation.
#[derive(Clone, Debug)]
pub enum FockFlavor {
    CoulombOnly,
    CoulombXc {
        functional: CombinedFunctional,
    },
    /// Coulomb, exact exchange scaled by `exact_exchange` and optionally a semilocal part.
    CoulombExchangeXc {
        exact_exchange: f64,
        functional: Option<CombinedFunctional>,
    },
}

impl FockFlavor {
    pub fn from_method(method: &Method) -> Self {
        let exact_exchange = method.exact_exchange();
        match (exact_exchange != 0.0, method.functional()) {
            (false, None) => FockFlavor::CoulombOnly,
            (false, Some(functional)) => FockFlavor::CoulombXc { functional },
            (true, functional) => FockFlavor::CoulombExchangeXc {
                exact_exchange,
                functional,
            },
        }
    }

    pub fn exact_exchange(&self) -> f64 {
        match self {
            FockFlavor::CoulombExchangeXc { exact_exchange, .. } => *exact_exchange,
            _ => 0.0,
        }
    }

    pub fn functional(&self) -> Option<&CombinedFunctional> {
        match self {
            FockFlavor::CoulombOnly => None,
            FockFlavor::CoulombXc { functional } => Some(functional),
            FockFlavor::CoulombExchangeXc { functional, .. } => functional.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FockConfig {
    /// Quartets with a Schwarz estimate below this are skipped.
    pub schwarz_threshold: f64,
    pub balancing: Balancing,
    /// Work units per worker; more units even out the load at the price of coordination.
    pub units_per_worker: usize,
    pub grid: GridConfig,
}

impl Default for FockConfig {
    fn default() -> Self {
        Self {
            schwarz_threshold: 1e-12,
            balancing: Balancing::Static,
            units_per_worker: 8,
            grid: GridConfig::default(),
        }
    }
}

/// Energy terms of one SCF iteration in hartree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyComponents {
    pub one_electron: f64,
    pub coulomb: f64,
    pub exchange: f64,
    pub xc: f64,
    pub nuclear_repulsion: f64,
    pub dispersion: f64,
}

impl EnergyComponents {
    pub fn electronic(&self) -> f64 {
        self.one_electron + self.coulomb + self.exchange + self.xc
    }

    pub fn total(&self) -> f64 {
        self.electronic() + self.nuclear_repulsion + self.dispersion
    }
}

#[derive(Clone, Debug)]
pub struct FockOutput {
    /// One Fock matrix per spin channel.
    pub fock: Vec<DMatrix<f64>>,
    /// J of the total density.
    pub coulomb: DMatrix<f64>,
    /// Unscaled K of every channel density; empty without exact exchange.
    pub exchange: Vec<DMatrix<f64>>,
    /// Electronic energy terms; nuclear repulsion and dispersion are left at zero.
    pub energy: EnergyComponents,
    /// Electron count integrated on the grid, when there is one.
    pub grid_electrons: Option<f64>,
}

/// Builds Fock matrices for one geometry. Holds no iteration state.
#[derive(Debug)]
pub struct FockBuilder<K: IntegralKernel = McMurchieDavidson> {
    kernel: K,
    basis: AoBasis,
    flavor: FockFlavor,
    core_hamiltonian: DMatrix<f64>,
    grid: Option<MolecularGrid>,
    plan: WorkPlan,
    balancing: Balancing,
}

impl<K: IntegralKernel> FockBuilder<K> {
    /// Prepares the core Hamiltonian, screening and work plan for `workers` workers.
    pub fn new(
        kernel: K,
        molecule: &Molecule,
        basis: AoBasis,
        flavor: FockFlavor,
        config: &FockConfig,
        workers: usize,
    ) -> Self {
        let core_hamiltonian = core_hamiltonian(&kernel, &basis, molecule);
        let grid = flavor.functional().map(|_| {
            let grid = MolecularGrid::new(molecule, &config.grid);
            log::debug!("integration grid with {} points", grid.n_points());
            grid
        });

        let bounds = SchwarzBounds::new(&kernel, &basis);
        let plan = WorkPlan::new(
            &basis,
            &bounds,
            config.schwarz_threshold,
            grid.as_ref(),
            workers,
            config.units_per_worker,
        );

        Self {
            kernel,
            basis,
            flavor,
            core_hamiltonian,
            grid,
            plan,
            balancing: config.balancing,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn basis(&self) -> &AoBasis {
        &self.basis
    }

    pub fn flavor(&self) -> &FockFlavor {
        &self.flavor
    }

    pub fn core_hamiltonian(&self) -> &DMatrix<f64> {
        &self.core_hamiltonian
    }

    pub fn grid(&self) -> Option<&MolecularGrid> {
        self.grid.as_ref()
    }

    pub fn plan(&self) -> &WorkPlan {
        &self.plan
    }

    /// Builds the Fock matrices of the given densities: one total density for a restricted
    /// calculation, alpha and beta densities for an unrestricted one.
    ///
    /// F_σ = H + J[P] - (α / f) K[P_σ] + V^σ_xc, where f is 2 for a restricted total density and
    /// 1 otherwise.
    pub fn build<C>(&self, comm: &C, densities: &[DMatrix<f64>]) -> Result<FockOutput>
    where
        C: Communicator + ?Sized,
    {
        let n = self.basis.n_functions();
        if !matches!(densities.len(), 1 | 2) || densities.iter().any(|d| d.shape() != (n, n)) {
            return Err(Error::InvalidInput(format!(
                "expected one or two {n}x{n} density matrices"
            )));
        }
        if comm.size() != self.plan.workers() {
            return Err(Error::InvalidConfig(format!(
                "work plan is for {} workers, communicator has {}",
                self.plan.workers(),
                comm.size()
            )));
        }

        let total = densities
            .iter()
            .skip(1)
            .fold(densities[0].clone(), |sum, density| sum + density);
        let alpha = self.flavor.exact_exchange();

        let mut accumulator = match self.balancing {
            Balancing::Static => {
                self.accumulate(self.plan.assigned(comm.rank()), &total, densities)
            }
            Balancing::Dynamic => {
                let mut accumulator = self.empty_accumulator(densities.len());
                dynamic_schedule::<_, Error>(comm, self.plan.units().len(), |unit| {
                    self.process_unit(unit, &mut accumulator, &total, densities);
                    Ok(())
                })?;
                accumulator
            }
        };

        let reduced = comm.all_reduce_sum(accumulator.pack())?;
        accumulator.unpack(&reduced);
        let parts = accumulator.finish();

        let restricted = densities.len() == 1;
        let exchange_scale = if restricted { alpha / 2.0 } else { alpha };

        let mut energy = EnergyComponents {
            one_electron: total.dot(&self.core_hamiltonian),
            coulomb: 0.5 * total.dot(&parts.coulomb),
            ..Default::default()
        };

        let mut fock = Vec::with_capacity(densities.len());
        for (spin, density) in densities.iter().enumerate() {
            let mut matrix = &self.core_hamiltonian + &parts.coulomb;
            if let Some(exchange) = parts.exchange.get(spin) {
                matrix -= exchange * exchange_scale;
                energy.exchange -= 0.5 * exchange_scale * density.dot(exchange);
            }
            if let Some(xc) = &parts.xc {
                matrix += &xc.potential[spin];
            }
            fock.push(matrix);
        }

        if let Some(xc) = &parts.xc {
            energy.xc = xc.energy;
        }

        Ok(FockOutput {
            fock,
            coulomb: parts.coulomb,
            exchange: parts.exchange,
            energy,
            grid_electrons: parts.xc.map(|xc| xc.electrons),
        })
    }

    fn empty_accumulator(&self, channels: usize) -> Accumulator {
        Accumulator::zeros(
            self.basis.n_functions(),
            channels,
            self.flavor.exact_exchange() != 0.0,
            self.grid.is_some(),
        )
    }

    fn accumulate(
        &self,
        units: &[usize],
        total: &DMatrix<f64>,
        densities: &[DMatrix<f64>],
    ) -> Accumulator {
        #[cfg(feature = "rayon")]
        let accumulator = {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

            units
                .par_iter()
                .fold(
                    || self.empty_accumulator(densities.len()),
                    |mut accumulator, &unit| {
                        self.process_unit(unit, &mut accumulator, total, densities);
                        accumulator
                    },
                )
                .reduce(|| self.empty_accumulator(densities.len()), Accumulator::merge)
        };

        #[cfg(not(feature = "rayon"))]
        let accumulator = {
            let mut accumulator = self.empty_accumulator(densities.len());
            for &unit in units {
                self.process_unit(unit, &mut accumulator, total, densities);
            }
            accumulator
        };

        accumulator
    }

    fn process_unit(
        &self,
        unit: usize,
        accumulator: &mut Accumulator,
        total: &DMatrix<f64>,
        densities: &[DMatrix<f64>],
    ) {
        let shells = self.basis.shells();
        match &self.plan.units()[unit] {
            WorkUnit::Quartets(range) => {
                for quartet in &self.plan.quartets()[range.clone()] {
                    let [p, q, r, s] = quartet.shells;
                    accumulator.add_quartet(
                        &self.kernel,
                        [&shells[p], &shells[q], &shells[r], &shells[s]],
                        quartet.degeneracy(),
                        total,
                        densities,
                    );
                }
            }
            WorkUnit::GridBatches(range) => {
                if let (Some(grid), Some(functional)) = (&self.grid, self.flavor.functional()) {
                    for batch in &grid.batches()[range.clone()] {
                        accumulator.add_grid_batch(batch, &self.basis, densities, functional);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{FockBuilder, FockConfig, FockFlavor};
    use crate::{
        basis::AoBasis,
        integrals::{ElectronTensor, McMurchieDavidson},
        molecule::Molecule,
        molecule,
        parallel::{Balancing, LocalCluster, SerialCommunicator},
        testing,
        xc::{GridConfig, Method},
    };

    fn water() -> Molecule {
        molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1)
        }
    }

    fn random_density(n: usize, rng: &mut StdRng) -> DMatrix<f64> {
        let matrix = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.5..0.5));
        (&matrix + matrix.transpose()) * 0.5
    }

    fn small_grid() -> GridConfig {
        GridConfig {
            radial_points: 20,
            theta_points: 8,
            phi_points: 16,
            batch_size: 64,
        }
    }

    #[test]
    fn matches_dense_reference() {
        let molecule = water();
        let basis = AoBasis::new(&molecule, &testing::basis_set("6-31G")).unwrap();
        let n = basis.n_functions();
        let tensor = ElectronTensor::from_basis(&basis, &McMurchieDavidson);

        let mut rng = StdRng::seed_from_u64(3);
        let densities = vec![random_density(n, &mut rng), random_density(n, &mut rng)];
        let total = &densities[0] + &densities[1];

        let config = FockConfig {
            schwarz_threshold: 0.0,
            ..Default::default()
        };
        let builder = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis,
            FockFlavor::from_method(&Method::HartreeFock),
            &config,
            1,
        );
        let output = builder.build(&SerialCommunicator, &densities).unwrap();

        let coulomb = DMatrix::from_fn(n, n, |i, j| {
            let mut sum = 0.0;
            for k in 0..n {
                for l in 0..n {
                    sum += tensor[(i, j, k, l)] * total[(k, l)];
                }
            }
            sum
        });
        assert_relative_eq!(output.coulomb, coulomb, epsilon = 1e-10);

        for (spin, density) in densities.iter().enumerate() {
            let exchange = DMatrix::from_fn(n, n, |i, j| {
                let mut sum = 0.0;
                for k in 0..n {
                    for l in 0..n {
                        sum += tensor[(i, k, j, l)] * density[(k, l)];
                    }
                }
                sum
            });
            assert_relative_eq!(output.exchange[spin], exchange, epsilon = 1e-10);

            let fock = builder.core_hamiltonian() + &coulomb - &exchange;
            assert_relative_eq!(output.fock[spin], fock, epsilon = 1e-10);
        }

        assert_relative_eq!(
            output.energy.coulomb,
            0.5 * total.dot(&coulomb),
            epsilon = 1e-10
        );
    }

    #[test]
    fn restricted_channel_halves_exchange() {
        let molecule = water();
        let basis = AoBasis::new(&molecule, &testing::basis_set("STO-3G")).unwrap();
        let n = basis.n_functions();
        let mut rng = StdRng::seed_from_u64(11);
        let density = random_density(n, &mut rng);

        let builder = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis,
            FockFlavor::from_method(&Method::HartreeFock),
            &FockConfig::default(),
            1,
        );

        let restricted = builder
            .build(&SerialCommunicator, &[density.clone()])
            .unwrap();
        let half = &density * 0.5;
        let unrestricted = builder
            .build(&SerialCommunicator, &[half.clone(), half])
            .unwrap();

        assert_relative_eq!(restricted.fock[0], unrestricted.fock[0], epsilon = 1e-12);
        assert_relative_eq!(restricted.fock[0], unrestricted.fock[1], epsilon = 1e-12);
        assert_relative_eq!(
            restricted.energy.electronic(),
            unrestricted.energy.electronic(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn hartree_has_no_exchange() {
        let molecule = water();
        let basis = AoBasis::new(&molecule, &testing::basis_set("STO-3G")).unwrap();
        let n = basis.n_functions();
        let density = random_density(n, &mut StdRng::seed_from_u64(5));

        let builder = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis,
            FockFlavor::from_method(&Method::Hartree),
            &FockConfig::default(),
            1,
        );
        assert!(matches!(builder.flavor(), FockFlavor::CoulombOnly));
        assert!(builder.grid().is_none());

        let output = builder.build(&SerialCommunicator, &[density]).unwrap();
        assert!(output.exchange.is_empty());
        assert_eq!(output.energy.exchange, 0.0);
        assert_relative_eq!(
            output.fock[0],
            builder.core_hamiltonian() + &output.coulomb,
            epsilon = 1e-14
        );
    }

    #[test]
    fn independent_of_worker_count_and_balancing() {
        let molecule = water();
        let basis = AoBasis::new(&molecule, &testing::basis_set("6-31G")).unwrap();
        let n = basis.n_functions();
        let mut rng = StdRng::seed_from_u64(42);
        let densities = vec![random_density(n, &mut rng), random_density(n, &mut rng)];
        let flavor = FockFlavor::from_method(&Method::HalfAndHalf);

        let config = FockConfig {
            grid: small_grid(),
            ..Default::default()
        };
        let serial = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis.clone(),
            flavor.clone(),
            &config,
            1,
        )
        .build(&SerialCommunicator, &densities)
        .unwrap();
        assert!(serial.grid_electrons.is_some());

        for workers in [2, 3] {
            for balancing in [Balancing::Static, Balancing::Dynamic] {
                let config = FockConfig {
                    balancing,
                    units_per_worker: 5,
                    ..config.clone()
                };
                let builder = FockBuilder::new(
                    McMurchieDavidson,
                    &molecule,
                    basis.clone(),
                    flavor.clone(),
                    &config,
                    workers,
                );
                let outputs =
                    LocalCluster::run(workers, |comm| builder.build(comm, &densities)).unwrap();

                for output in &outputs {
                    // every rank holds the same reduced result
                    assert_eq!(output.fock, outputs[0].fock);
                    for (parallel, reference) in output.fock.iter().zip(&serial.fock) {
                        assert_relative_eq!(*parallel, *reference, epsilon = 1e-10);
                    }
                    assert_relative_eq!(
                        output.energy.electronic(),
                        serial.energy.electronic(),
                        epsilon = 1e-10
                    );
                }
            }
        }
    }

    #[test]
    fn rejects_malformed_input() {
        let molecule = water();
        let basis = AoBasis::new(&molecule, &testing::basis_set("STO-3G")).unwrap();
        let n = basis.n_functions();
        let flavor = FockFlavor::from_method(&Method::HartreeFock);
        let builder = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis.clone(),
            flavor.clone(),
            &FockConfig::default(),
            1,
        );

        let density = DMatrix::zeros(n, n);
        assert!(builder.build(&SerialCommunicator, &[density.clone()]).is_ok());
        assert!(builder
            .build(&SerialCommunicator, &[DMatrix::zeros(n + 1, n + 1)])
            .is_err());
        assert!(builder
            .build(&SerialCommunicator, &[density.clone(), density.clone(), density.clone()])
            .is_err());

        // planned for two workers, run on one
        let builder = FockBuilder::new(
            McMurchieDavidson,
            &molecule,
            basis,
            flavor,
            &FockConfig::default(),
            2,
        );
        assert!(builder.build(&SerialCommunicator, &[density]).is_err());
    }
}
