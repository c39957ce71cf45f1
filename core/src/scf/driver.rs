use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    basis::{AoBasis, BasisSet},
    cancel::CancellationToken,
    dispersion::DispersionTerm,
    error::{Error, Result},
    fock::{EnergyComponents, FockBuilder, FockFlavor},
    gradient::{Gradient, GradientAssembler},
    integrals::{dipole_matrices, overlap_matrix, McMurchieDavidson},
    molecule::Molecule,
    parallel::Communicator,
};

use super::{
    guess::{adapt_densities, initial_fock},
    properties::{dipole_moment, mulliken_charges},
    utils::{density_from_orbitals, rms, sorted_eigs},
    Acceleration, Diis, DivergenceMonitor, MoCoefficients, Orthogonalizer, Reference, ScfConfig,
    ScfState, ScfStatus, Verdict,
};

/// Result of a converged calculation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScfOutcome {
    pub energy: f64,
    pub components: EnergyComponents,
    pub orbitals: MoCoefficients,
    pub densities: Vec<DMatrix<f64>>,
    pub cycles: usize,
    pub status: ScfStatus,
    pub mulliken_charges: Vec<f64>,
    /// e bohr, about the origin
    pub dipole: Vector3<f64>,
}

/// Runs the self-consistent field iteration for one geometry.
///
/// Every rank of `comm` drives its own copy with identical input. Fock matrices are reduced over
/// all ranks, after which diagonalization and extrapolation run redundantly, so all ranks take the
/// same decisions in lockstep.
pub struct ScfDriver<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    config: ScfConfig,
    molecule: Molecule,
    builder: FockBuilder,
    overlap: DMatrix<f64>,
    orthogonalizer: Orthogonalizer,
    occupied: Vec<usize>,
    occupation: f64,
    nuclear_repulsion: f64,
    dispersion: DispersionTerm,
    state: ScfState,
    cancellation: Option<CancellationToken>,
}

impl<'a, C: Communicator + ?Sized> ScfDriver<'a, C> {
    /// Sets up integrals, screening and the orthogonal basis and forms the initial guess.
    pub fn new(
        comm: &'a C,
        molecule: &Molecule,
        basis_set: &BasisSet,
        config: &ScfConfig,
    ) -> Result<Self> {
        let (n_alpha, n_beta) = molecule.spin_occupations()?;
        let restricted = match config.reference {
            Reference::Auto => n_alpha == n_beta,
            Reference::Restricted if n_alpha != n_beta => {
                return Err(Error::InvalidConfig(format!(
                    "a restricted reference needs a closed shell, multiplicity is {}",
                    molecule.multiplicity()
                )))
            }
            Reference::Restricted => true,
            Reference::Unrestricted => false,
        };

        let basis = AoBasis::new(molecule, basis_set)?;
        let n = basis.n_functions();
        let kernel = McMurchieDavidson;
        let overlap = overlap_matrix(&kernel, &basis);

        let orthogonalizer = Orthogonalizer::new(&overlap, config.linear_dependency_threshold);
        if orthogonalizer.n_orbitals() < n_alpha {
            return Err(Error::BasisLinearDependency {
                functions: n,
                removed: orthogonalizer.removed(),
                orbitals: orthogonalizer.n_orbitals(),
                occupied: n_alpha,
            });
        }

        let builder = FockBuilder::new(
            kernel,
            molecule,
            basis,
            FockFlavor::from_method(&config.method),
            &config.fock,
            comm.size(),
        );

        let nuclear_repulsion = molecule.nuclear_repulsion();
        let dispersion = config.dispersion.build().evaluate(molecule);
        log::debug!("nuclear repulsion energy: {nuclear_repulsion}");
        log::debug!("dispersion energy: {}", dispersion.energy);
        log::debug!(
            "{n} basis functions, {} orbitals, {} spin channel(s)",
            orthogonalizer.n_orbitals(),
            if restricted { 1 } else { 2 }
        );

        let (occupied, occupation) = if restricted {
            (vec![n_alpha], 2.0)
        } else {
            (vec![n_alpha, n_beta], 1.0)
        };

        let monitor = DivergenceMonitor::new(if config.diis.enabled {
            Acceleration::Diis
        } else {
            Acceleration::Plain
        });
        let diis = Diis::new(config.diis.window, config.diis.min_vectors);

        let mut driver = Self {
            comm,
            config: config.clone(),
            molecule: molecule.clone(),
            builder,
            overlap,
            orthogonalizer,
            occupied,
            occupation,
            nuclear_repulsion,
            dispersion,
            state: ScfState::new(Vec::new(), MoCoefficients::default(), diis, monitor),
            cancellation: None,
        };

        let guess = initial_fock(config.guess, driver.builder.core_hamiltonian(), &driver.overlap);
        let channels = driver.occupied.len();
        let orbitals = driver.orbitals(&vec![guess; channels]);
        driver.state.densities = driver.densities(&orbitals);
        driver.state.orbitals = orbitals;

        Ok(driver)
    }

    /// Starts from the given densities instead: one total density or alpha and beta densities,
    /// converted to this calculation's spin channels.
    pub fn with_guess(mut self, densities: &[DMatrix<f64>]) -> Result<Self> {
        self.state.densities = adapt_densities(
            densities,
            self.occupied.len(),
            self.builder.basis().n_functions(),
        )?;
        Ok(self)
    }

    /// Continues a calculation from a state saved at a cycle boundary.
    pub fn resume(
        comm: &'a C,
        molecule: &Molecule,
        basis_set: &BasisSet,
        config: &ScfConfig,
        state: ScfState,
    ) -> Result<Self> {
        let mut driver = Self::new(comm, molecule, basis_set, config)?;
        let n = driver.builder.basis().n_functions();
        if state.densities.len() != driver.occupied.len()
            || state.densities.iter().any(|d| d.shape() != (n, n))
        {
            return Err(Error::InvalidInput(format!(
                "saved SCF state has {} density matrices that do not fit {} channel(s) of {n} functions",
                state.densities.len(),
                driver.occupied.len()
            )));
        }
        driver.state = state;
        Ok(driver)
    }

    /// Checked at every cycle boundary; all ranks stop together once any of them is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn state(&self) -> &ScfState {
        &self.state
    }

    pub fn into_state(self) -> ScfState {
        self.state
    }

    pub fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    pub fn builder(&self) -> &FockBuilder {
        &self.builder
    }

    pub fn overlap(&self) -> &DMatrix<f64> {
        &self.overlap
    }

    pub fn orthogonalizer(&self) -> &Orthogonalizer {
        &self.orthogonalizer
    }

    /// Runs one cycle and returns the status it ended in. Terminal states are sticky.
    pub fn step(&mut self) -> Result<ScfStatus> {
        if self.state.status.is_terminal() {
            return Ok(self.state.status);
        }

        let cancelled = self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        let votes = self
            .comm
            .all_reduce_sum(vec![if cancelled { 1.0 } else { 0.0 }])?;
        if votes.first().is_some_and(|&votes| votes > 0.0) {
            log::info!("cancelled after cycle {}", self.state.cycle);
            return Err(Error::Interrupted {
                cycle: self.state.cycle,
            });
        }

        if self.state.cycle >= self.config.max_cycles {
            self.state.status = ScfStatus::MaxCyclesExceeded;
            return Ok(self.state.status);
        }

        let cycle = self.state.cycle + 1;
        self.state.status = ScfStatus::Iterating;

        let output = self.builder.build(self.comm, &self.state.densities)?;
        let components = EnergyComponents {
            nuclear_repulsion: self.nuclear_repulsion,
            dispersion: self.dispersion.energy,
            ..output.energy
        };
        let energy = components.total();
        let energy_delta = (self.state.cycle > 0).then(|| energy - self.state.energy);

        let errors = output
            .fock
            .iter()
            .zip(&self.state.densities)
            .map(|(fock, density)| {
                let fps = fock * density * &self.overlap;
                self.orthogonalizer.to_orthogonal(&(&fps - fps.transpose()))
            })
            .collect::<Vec<_>>();
        let residual = errors
            .iter()
            .flat_map(|error| error.iter())
            .fold(0.0, |max: f64, value| max.max(value.abs()));

        let verdict = self.state.monitor.observe(
            &self.config.divergence,
            energy_delta,
            residual,
            self.config.convergence.energy,
        );
        match verdict {
            Verdict::Continue => {}
            Verdict::Fallback => {
                log::warn!(
                    "energy rose for more than {} cycles without the residual shrinking, \
                     falling back to damped updates",
                    self.config.divergence.energy_rise_cycles
                );
                self.state.diis.reset();
            }
            Verdict::Recovered => {
                log::info!("damping reduced the residual to {residual:.3e}, resuming acceleration");
            }
            Verdict::Diverged => {
                self.state.status = ScfStatus::Diverged;
                self.state.cycle = cycle;
                self.state.energy = energy;
                self.state.components = components;
                self.state.energy_delta = energy_delta;
                self.state.residual = residual;
                return Ok(self.state.status);
            }
        }

        let mode = self.state.monitor.mode();
        let fock = match mode {
            Acceleration::Diis => {
                self.state.diis.push(output.fock.clone(), errors);
                self.state
                    .diis
                    .extrapolate()
                    .unwrap_or_else(|| output.fock.clone())
            }
            Acceleration::Plain | Acceleration::Damping => output.fock.clone(),
        };

        let orbitals = self.orbitals(&fock);
        let mut densities = self.densities(&orbitals);
        if mode == Acceleration::Damping {
            let damping = self.config.divergence.damping;
            for (new, old) in densities.iter_mut().zip(&self.state.densities) {
                *new *= 1.0 - damping;
                *new += old * damping;
            }
        }

        let changes = densities
            .iter()
            .zip(&self.state.densities)
            .map(|(new, old)| new - old)
            .collect::<Vec<_>>();
        let density_delta = rms(&changes);

        let criteria = &self.config.convergence;
        let within_thresholds = energy_delta.is_some_and(|delta| delta.abs() < criteria.energy)
            && density_delta < criteria.density;
        let converged_cycles = if within_thresholds {
            self.state.converged_cycles + 1
        } else {
            0
        };
        let fixed_point = density_delta < criteria.density && residual < criteria.residual;

        log::info!(
            "cycle {cycle:<4} energy {energy:.10} ΔE {} rms ΔD {density_delta:.3e} residual {residual:.3e} ({mode:?})",
            energy_delta.map_or_else(|| "-".to_string(), |delta| format!("{delta:+.3e}")),
        );

        self.state.cycle = cycle;
        self.state.energy = energy;
        self.state.components = components;
        self.state.energy_delta = energy_delta;
        self.state.density_delta = density_delta;
        self.state.residual = residual;
        self.state.converged_cycles = converged_cycles;
        self.state.densities = densities;

        if converged_cycles >= criteria.consecutive_cycles || fixed_point {
            // report the eigenpairs of the Fock matrix itself, not of its extrapolation
            self.state.orbitals = if mode == Acceleration::Diis {
                self.orbitals(&output.fock)
            } else {
                orbitals
            };
            self.state.status = ScfStatus::Converged;
            log::info!("converged in {cycle} cycles, total energy {energy:.10}");
        } else {
            self.state.orbitals = orbitals;
        }
        Ok(self.state.status)
    }

    /// Iterates until convergence. Failure modes come back as errors carrying the last state.
    pub fn solve(&mut self) -> Result<ScfOutcome> {
        loop {
            match self.step()? {
                ScfStatus::Converged => return Ok(self.outcome()),
                ScfStatus::Diverged => {
                    return Err(Error::ScfDivergence {
                        cycle: self.state.cycle,
                        energy: self.state.energy,
                        residual: self.state.residual,
                        density_delta: self.state.density_delta,
                    })
                }
                ScfStatus::MaxCyclesExceeded => {
                    return Err(Error::MaxCyclesExceeded {
                        cycles: self.state.cycle,
                        energy: self.state.energy,
                        density_delta: self.state.density_delta,
                        state: Box::new(self.state.clone()),
                    })
                }
                ScfStatus::Initialized | ScfStatus::Iterating => {}
            }
        }
    }

    /// Nuclear gradient of the converged energy.
    pub fn gradient(&self) -> Result<Gradient> {
        GradientAssembler::new(&self.builder, &self.molecule).assemble(
            self.comm,
            &self.state,
            &self.dispersion,
        )
    }

    fn outcome(&self) -> ScfOutcome {
        let total = self.state.total_density();
        let basis = self.builder.basis();
        let dipoles = dipole_matrices(self.builder.kernel(), basis);

        ScfOutcome {
            energy: self.state.energy,
            components: self.state.components,
            orbitals: self.state.orbitals.clone(),
            densities: self.state.densities.clone(),
            cycles: self.state.cycle,
            status: self.state.status,
            mulliken_charges: mulliken_charges(&self.molecule, basis, &self.overlap, &total),
            dipole: dipole_moment(&self.molecule, &dipoles, &total),
        }
    }

    /// Diagonalizes every channel's Fock matrix in the orthogonal basis.
    fn orbitals(&self, fock: &[DMatrix<f64>]) -> MoCoefficients {
        let (coefficients, energies): (Vec<DMatrix<f64>>, Vec<DVector<f64>>) = fock
            .iter()
            .map(|matrix| {
                let (vectors, values) = sorted_eigs(self.orthogonalizer.to_orthogonal(matrix));
                (self.orthogonalizer.transform() * vectors, values)
            })
            .unzip();

        MoCoefficients {
            coefficients,
            energies,
            occupied: self.occupied.clone(),
            occupation: self.occupation,
        }
    }

    fn densities(&self, orbitals: &MoCoefficients) -> Vec<DMatrix<f64>> {
        orbitals
            .coefficients
            .iter()
            .zip(&orbitals.occupied)
            .map(|(coefficients, &occupied)| {
                density_from_orbitals(coefficients, occupied, orbitals.occupation)
            })
            .collect()
    }
}
