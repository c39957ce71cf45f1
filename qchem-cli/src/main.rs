use std::{path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use qchem_core::{
    basis::BasisSet,
    checkpoint::{system_fingerprint, Checkpoint, CheckpointStore},
    config::{ConfigBasisSet, ConfigMolecule, JobConfig},
    gradient::Gradient,
    molecule::Molecule,
    optimizer::{GeometryOptimizer, OptimizationOutcome, OptimizerEvent, ScfSurface},
    parallel::{Communicator, LocalCluster, SerialCommunicator},
    scf::{ScfDriver, ScfOutcome},
    units::{AU_TO_DEBYE, BOHR_TO_ANGSTROM},
    vibrations::{vibrational_analysis, HarmonicAnalysis},
};
#[cfg(feature = "mpi")]
use qchem_core::parallel::MpiCommunicator;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: QcCommand,
}

#[derive(Args, Debug)]
struct Inputs {
    /// The molecule, as JSON (bohr) or XYZ (angstrom)
    #[arg(long, short)]
    molecule: PathBuf,
    /// Basis set in the Basis Set Exchange JSON format
    #[arg(long, short)]
    basis_set: PathBuf,
    /// JSON job configuration; defaults are used for everything it leaves out
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Number of worker threads, overriding the configuration
    #[arg(long, short)]
    workers: Option<usize>,
    /// Checkpoint file written during the run
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Continue from the checkpoint instead of starting over
    #[arg(long, requires = "checkpoint")]
    restart: bool,
    /// Run as one process of an MPI job instead of on local threads
    #[cfg(feature = "mpi")]
    #[arg(long, conflicts_with = "workers")]
    mpi: bool,
}

#[derive(Subcommand, Debug)]
enum QcCommand {
    /// Single point energy
    Scf {
        #[command(flatten)]
        inputs: Inputs,
        /// Also compute the nuclear gradient
        #[arg(long)]
        gradient: bool,
    },
    /// Minimize the energy with respect to the nuclear positions
    Optimize {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Harmonic frequencies from a finite difference Hessian at the given geometry
    Frequencies {
        #[command(flatten)]
        inputs: Inputs,
    },
}

/// How the workers of a run reach each other.
enum Transport {
    Threads(usize),
    #[cfg(feature = "mpi")]
    Mpi(MpiCommunicator),
}

struct Job {
    molecule: Molecule,
    basis_set: BasisSet,
    config: JobConfig,
    store: Option<CheckpointStore>,
    restart: bool,
    transport: Transport,
}

impl Job {
    fn load(inputs: Inputs) -> Result<Self> {
        let molecule = ConfigMolecule::load(&inputs.molecule)
            .with_context(|| format!("reading {}", inputs.molecule.display()))?;
        let basis_set = ConfigBasisSet::load(&inputs.basis_set)
            .with_context(|| format!("reading {}", inputs.basis_set.display()))?;
        let mut config = match &inputs.config {
            Some(path) => JobConfig::load(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => JobConfig::default(),
        };
        if let Some(workers) = inputs.workers {
            config.workers = workers;
        }
        config.validate()?;

        #[cfg(feature = "mpi")]
        let transport = if inputs.mpi {
            Transport::Mpi(MpiCommunicator::initialize()?)
        } else {
            Transport::Threads(config.workers)
        };
        #[cfg(not(feature = "mpi"))]
        let transport = Transport::Threads(config.workers);

        Ok(Self {
            molecule,
            basis_set,
            config,
            store: inputs.checkpoint.map(CheckpointStore::new),
            restart: inputs.restart,
            transport,
        })
    }

    /// Only one process of an MPI job prints results.
    fn reports(&self) -> bool {
        match &self.transport {
            Transport::Threads(_) => true,
            #[cfg(feature = "mpi")]
            Transport::Mpi(comm) => comm.is_root(),
        }
    }

    /// Runs `task` on every worker and keeps the result of rank 0, or of this process under MPI.
    fn on_workers<R: Send>(
        &self,
        task: impl Fn(&dyn Communicator) -> qchem_core::Result<R> + Sync,
    ) -> Result<R> {
        match &self.transport {
            Transport::Threads(workers) if *workers <= 1 => Ok(task(&SerialCommunicator)?),
            Transport::Threads(workers) => LocalCluster::run(*workers, |comm| task(comm))?
                .into_iter()
                .next()
                .context("no worker reported a result"),
            #[cfg(feature = "mpi")]
            Transport::Mpi(comm) => {
                let outcome = task(comm);
                if outcome.is_err() {
                    comm.abort();
                }
                Ok(outcome?)
            }
        }
    }

    fn restart_point(&self) -> Result<Option<Checkpoint>> {
        let Some(store) = self.store.as_ref().filter(|_| self.restart) else {
            return Ok(None);
        };
        let fingerprint = system_fingerprint(&self.molecule, &self.basis_set);
        let checkpoint = store
            .load(Some(fingerprint))
            .with_context(|| format!("restarting from {}", store.path().display()))?;
        Ok(Some(checkpoint))
    }
}

fn single_point(job: &Job, with_gradient: bool) -> Result<(ScfOutcome, Option<Gradient>)> {
    let restart = job.restart_point()?;
    let molecule = restart
        .as_ref()
        .map_or(&job.molecule, |checkpoint| &checkpoint.molecule);
    let scf_state = restart.as_ref().and_then(|checkpoint| checkpoint.scf.clone());
    if job.restart && scf_state.is_none() {
        bail!("the checkpoint holds no SCF state");
    }

    job.on_workers(|comm| {
        let mut driver = match &scf_state {
            Some(state) => ScfDriver::resume(
                comm,
                molecule,
                &job.basis_set,
                &job.config.scf,
                state.clone(),
            )?,
            None => ScfDriver::new(comm, molecule, &job.basis_set, &job.config.scf)?,
        };

        let outcome = driver.solve();
        if let (true, Some(store)) = (comm.is_root(), &job.store) {
            let checkpoint =
                Checkpoint::new(molecule, &job.basis_set).with_scf(driver.state().clone());
            store.save(&checkpoint)?;
        }
        let outcome = outcome?;

        let gradient = if with_gradient {
            Some(driver.gradient()?)
        } else {
            None
        };
        Ok((outcome, gradient))
    })
}

fn optimize(job: &Job) -> Result<OptimizationOutcome> {
    let restart = job.restart_point()?;
    if restart.as_ref().is_some_and(|checkpoint| checkpoint.optimizer.is_none()) {
        bail!("the checkpoint holds no optimizer state");
    }

    job.on_workers(|comm| {
        let surface = ScfSurface::new(comm, &job.basis_set, &job.config.scf);
        let mut optimizer = match &restart {
            Some(checkpoint) => {
                GeometryOptimizer::resume(surface, &job.config.optimizer, checkpoint.clone())?
            }
            None => GeometryOptimizer::new(surface, &job.molecule, &job.config.optimizer)?,
        };
        if comm.is_root() {
            if let Some(store) = &job.store {
                optimizer = optimizer.with_checkpoints(store, &job.basis_set);
            }
            optimizer = optimizer.with_observer(|event| {
                if let OptimizerEvent::Rejected { step, rejections, .. } = event {
                    info!("step {step}: {rejections} rejected trial steps in a row");
                }
            });
        }
        optimizer.run()
    })
}

fn frequencies(job: &Job) -> Result<HarmonicAnalysis> {
    if job.restart {
        bail!("frequencies start from the input geometry and take no restart");
    }
    job.on_workers(|comm| {
        let mut surface = ScfSurface::new(comm, &job.basis_set, &job.config.scf);
        vibrational_analysis(&mut surface, &job.molecule, &job.config.vibrations)
    })
}

fn print_frequencies(analysis: &HarmonicAnalysis) {
    println!(
        "harmonic frequencies (cm^-1), {} rigid modes projected out:",
        analysis.rigid_modes
    );
    for (index, frequency) in analysis.frequencies.iter().enumerate() {
        if *frequency < 0.0 {
            println!("  {:>3} {:>12.2}i", index + 1, -frequency);
        } else {
            println!("  {:>3} {:>12.2}", index + 1, frequency);
        }
    }
}

fn print_geometry(molecule: &Molecule) {
    println!("geometry (angstrom):");
    for atom in molecule.atoms() {
        let position = atom.position() * BOHR_TO_ANGSTROM;
        println!(
            "  {:<2} {:>14.8} {:>14.8} {:>14.8}",
            atom.element_type(),
            position.x,
            position.y,
            position.z
        );
    }
}

fn print_gradient(molecule: &Molecule, gradient: &Gradient) {
    println!("gradient (hartree/bohr):");
    for (atom, g) in molecule.atoms().iter().zip(&gradient.total) {
        println!(
            "  {:<2} {:>14.8} {:>14.8} {:>14.8}",
            atom.element_type(),
            g.x,
            g.y,
            g.z
        );
    }
    println!("max gradient component: {:.3e}", gradient.max_component());
}

fn print_scf(molecule: &Molecule, outcome: &ScfOutcome) {
    let components = &outcome.components;
    println!("SCF {:?} after {} cycles", outcome.status, outcome.cycles);
    println!("one electron energy:      {:>18.10}", components.one_electron);
    println!("coulomb energy:           {:>18.10}", components.coulomb);
    println!("exchange energy:          {:>18.10}", components.exchange);
    println!("exchange-correlation:     {:>18.10}", components.xc);
    println!("nuclear repulsion energy: {:>18.10}", components.nuclear_repulsion);
    println!("dispersion energy:        {:>18.10}", components.dispersion);
    println!("total energy:             {:>18.10}", outcome.energy);

    let channels = ["alpha", "beta"];
    for (index, energies) in outcome.orbitals.energies.iter().enumerate() {
        let label = if outcome.orbitals.channels() == 1 { "orbital" } else { channels[index] };
        println!("{label} energies: {:.6?}", energies.as_slice());
    }

    println!("mulliken charges:");
    for (atom, charge) in molecule.atoms().iter().zip(&outcome.mulliken_charges) {
        println!("  {:<2} {charge:>10.6}", atom.element_type());
    }
    let dipole = outcome.dipole * AU_TO_DEBYE;
    println!(
        "dipole moment (debye): {:.6} {:.6} {:.6}, |mu| = {:.6}",
        dipole.x,
        dipole.y,
        dipole.z,
        dipole.norm()
    );
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    let start = Instant::now();

    match cli.command {
        QcCommand::Scf { inputs, gradient } => {
            let job = Job::load(inputs)?;
            let (outcome, gradient) = single_point(&job, gradient)?;
            if job.reports() {
                print_scf(&job.molecule, &outcome);
                if let Some(gradient) = &gradient {
                    print_gradient(&job.molecule, gradient);
                }
            }
        }
        QcCommand::Optimize { inputs } => {
            let job = Job::load(inputs)?;
            let outcome = optimize(&job)?;
            if !job.reports() {
                return Ok(());
            }
            println!(
                "geometry optimized after {} steps and {} energy evaluations",
                outcome.steps, outcome.evaluations
            );
            println!("total energy: {:.10}", outcome.energy);
            println!("max gradient component: {:.3e}", outcome.max_force);
            print_geometry(&outcome.molecule);
        }
        QcCommand::Frequencies { inputs } => {
            let job = Job::load(inputs)?;
            let analysis = frequencies(&job)?;
            if job.reports() {
                print_frequencies(&analysis);
            }
        }
    }

    println!("finished in {:0.2?}", start.elapsed());
    Ok(())
}
