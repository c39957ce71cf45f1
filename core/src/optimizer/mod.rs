//! Trust-region quasi-Newton geometry optimization.
//!
//! The optimizer is a state machine advanced one transition at a time, so a run can be stopped
//! and checkpointed at any boundary:
//!
//! ```text
//! AwaitingEnergy --evaluate--> StepProposed --evaluate trial--> Accepted | Rejected
//!        Accepted | Rejected --propose--> StepProposed | Optimized
//! ```
mod bfgs;
mod config;
mod surface;

use std::collections::VecDeque;

use log::{debug, info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

pub use bfgs::SecantPair;
pub use config::OptimizerConfig;
pub use surface::{EnergySurface, ScfSurface, SurfacePoint};

use crate::{
    basis::BasisSet,
    cancel::CancellationToken,
    checkpoint::{Checkpoint, CheckpointStore},
    error::{Error, Result},
    molecule::Molecule,
};

use self::bfgs::{approximate_hessian, predicted_change, trust_region_step};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStatus {
    /// The current geometry has not been evaluated yet.
    AwaitingEnergy,
    /// A trial step waits for its energy.
    StepProposed,
    Accepted,
    Rejected,
    Optimized,
}

/// A trial displacement and the energy change the quadratic model expects from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub step: DVector<f64>,
    pub predicted: f64,
}

/// Everything needed to continue an optimization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub status: OptimizerStatus,
    /// accepted steps
    pub step: usize,
    pub evaluations: usize,
    /// the current, last accepted geometry
    pub molecule: Molecule,
    pub energy: Option<f64>,
    pub gradient: Option<DVector<f64>>,
    pub trust_radius: f64,
    /// consecutive rejected steps
    pub rejections: usize,
    pub history: VecDeque<SecantPair>,
    pub proposal: Option<Proposal>,
}

impl OptimizerState {
    pub(crate) fn new(molecule: &Molecule, config: &OptimizerConfig) -> Self {
        Self {
            status: OptimizerStatus::AwaitingEnergy,
            step: 0,
            evaluations: 0,
            molecule: molecule.clone(),
            energy: None,
            gradient: None,
            trust_radius: config.initial_trust_radius,
            rejections: 0,
            history: VecDeque::new(),
            proposal: None,
        }
    }

    /// Largest absolute gradient component at the current geometry.
    pub fn max_force(&self) -> Option<f64> {
        self.gradient.as_ref().map(|g| g.amax())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptimizerEvent {
    Evaluated {
        step: usize,
        energy: f64,
        max_force: f64,
    },
    Proposed {
        step: usize,
        length: f64,
        predicted: f64,
    },
    Accepted {
        step: usize,
        energy: f64,
        energy_change: f64,
        max_force: f64,
        trust_radius: f64,
    },
    Rejected {
        step: usize,
        energy_change: f64,
        predicted: f64,
        rejections: usize,
        trust_radius: f64,
    },
    Optimized {
        steps: usize,
        energy: f64,
        max_force: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub molecule: Molecule,
    pub energy: f64,
    pub gradient: DVector<f64>,
    pub max_force: f64,
    pub steps: usize,
    pub evaluations: usize,
}

type Observer<'o> = Box<dyn FnMut(&OptimizerEvent) + 'o>;

pub struct GeometryOptimizer<'o, S: EnergySurface> {
    surface: S,
    config: OptimizerConfig,
    state: OptimizerState,
    observer: Option<Observer<'o>>,
    cancellation: Option<CancellationToken>,
    checkpoints: Option<(&'o CheckpointStore, Checkpoint)>,
}

impl<'o, S: EnergySurface> GeometryOptimizer<'o, S> {
    pub fn new(surface: S, molecule: &Molecule, config: &OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            surface,
            config: config.clone(),
            state: OptimizerState::new(molecule, config),
            observer: None,
            cancellation: None,
            checkpoints: None,
        })
    }

    /// Continues from the optimizer state of `checkpoint`, handing its SCF state back to the
    /// surface.
    pub fn resume(mut surface: S, config: &OptimizerConfig, checkpoint: Checkpoint) -> Result<Self> {
        config.validate()?;
        let state = checkpoint.optimizer.ok_or_else(|| {
            Error::InvalidInput("checkpoint holds no optimizer state".into())
        })?;
        let dimension = 3 * state.molecule.n_atoms();
        let consistent = state.gradient.as_ref().map_or(true, |g| g.len() == dimension)
            && state.proposal.as_ref().map_or(true, |p| p.step.len() == dimension)
            && (state.status != OptimizerStatus::StepProposed || state.proposal.is_some());
        if !consistent {
            return Err(Error::CheckpointCorrupt(
                "optimizer state does not fit its molecule".into(),
            ));
        }

        if let Some(expected) = surface.system_fingerprint(&state.molecule) {
            if expected != checkpoint.system_fingerprint {
                return Err(Error::CheckpointFingerprintMismatch {
                    expected,
                    found: checkpoint.system_fingerprint,
                });
            }
        }

        info!(
            "resuming geometry optimization at step {} ({:?})",
            state.step, state.status
        );
        surface.restore(checkpoint.scf);
        Ok(Self {
            surface,
            config: config.clone(),
            state,
            observer: None,
            cancellation: None,
            checkpoints: None,
        })
    }

    pub fn with_observer(mut self, observer: impl FnMut(&OptimizerEvent) + 'o) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Checked by [`GeometryOptimizer::run`] between transitions. On a distributed surface every
    /// rank stops as soon as any of them is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Saves a checkpoint to `store` after every transition of [`GeometryOptimizer::run`].
    pub fn with_checkpoints(mut self, store: &'o CheckpointStore, basis_set: &BasisSet) -> Self {
        self.checkpoints = Some((store, Checkpoint::new(&self.state.molecule, basis_set)));
        self
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn outcome(&self) -> Option<OptimizationOutcome> {
        if self.state.status != OptimizerStatus::Optimized {
            return None;
        }
        let gradient = self.state.gradient.clone()?;
        Some(OptimizationOutcome {
            molecule: self.state.molecule.clone(),
            energy: self.state.energy?,
            max_force: gradient.amax(),
            gradient,
            steps: self.state.step,
            evaluations: self.state.evaluations,
        })
    }

    /// Advances until the geometry is optimized, checkpointing after every transition.
    pub fn run(&mut self) -> Result<OptimizationOutcome> {
        loop {
            if let Some(outcome) = self.outcome() {
                return Ok(outcome);
            }
            let cancelled = self.cancellation.as_ref().is_some_and(|t| t.is_cancelled());
            if self.surface.cancellation_vote(cancelled)? {
                info!("geometry optimization interrupted at step {}", self.state.step);
                return Err(Error::Interrupted {
                    cycle: self.state.step,
                });
            }
            self.advance()?;
            self.save_checkpoint()?;
        }
    }

    /// Performs one transition of the state machine.
    pub fn advance(&mut self) -> Result<OptimizerStatus> {
        match self.state.status {
            OptimizerStatus::AwaitingEnergy => {
                let molecule = self.state.molecule.clone();
                let point = self.evaluate(&molecule)?;
                let max_force = point.gradient.amax();
                self.state.energy = Some(point.energy);
                self.state.gradient = Some(point.gradient);
                info!(
                    "step {:3}: E = {:.10}, max force {:.3e}",
                    self.state.step, point.energy, max_force
                );
                self.emit(OptimizerEvent::Evaluated {
                    step: self.state.step,
                    energy: point.energy,
                    max_force,
                });
                self.propose()?;
            }
            OptimizerStatus::StepProposed => self.try_step()?,
            OptimizerStatus::Accepted | OptimizerStatus::Rejected => self.propose()?,
            OptimizerStatus::Optimized => {}
        }
        Ok(self.state.status)
    }

    fn evaluate(&mut self, molecule: &Molecule) -> Result<SurfacePoint> {
        let point = self.surface.evaluate(molecule)?;
        let dimension = 3 * molecule.n_atoms();
        if point.gradient.len() != dimension || !point.energy.is_finite() {
            return Err(Error::InvalidInput(format!(
                "surface returned {} gradient components for {} coordinates, energy {}",
                point.gradient.len(),
                dimension,
                point.energy
            )));
        }
        self.state.evaluations += 1;
        Ok(point)
    }

    fn current(&self) -> Result<(f64, &DVector<f64>)> {
        match (self.state.energy, &self.state.gradient) {
            (Some(energy), Some(gradient)) => Ok((energy, gradient)),
            _ => Err(Error::InvalidInput(
                "optimizer has no energy at the current geometry".into(),
            )),
        }
    }

    fn propose(&mut self) -> Result<()> {
        let (energy, gradient) = self.current()?;
        let max_force = gradient.amax();
        let hessian = approximate_hessian(
            gradient.len(),
            self.config.initial_hessian,
            &self.state.history,
        );
        let step = trust_region_step(&hessian, gradient, self.state.trust_radius);
        let length = step.norm();

        if max_force < self.config.force_threshold && length < self.config.step_threshold {
            self.state.status = OptimizerStatus::Optimized;
            self.state.proposal = None;
            info!(
                "geometry optimized after {} steps: E = {:.10}, max force {:.3e}",
                self.state.step, energy, max_force
            );
            self.emit(OptimizerEvent::Optimized {
                steps: self.state.step,
                energy,
                max_force,
            });
            return Ok(());
        }
        if self.state.step >= self.config.max_steps {
            return Err(Error::OptimizerMaxStepsExceeded {
                steps: self.state.step,
                max_force,
            });
        }

        let predicted = predicted_change(&hessian, gradient, &step);
        debug!(
            "proposing step of length {length:.4e} (radius {:.4e}), predicted dE {predicted:.4e}",
            self.state.trust_radius
        );
        self.state.proposal = Some(Proposal { step, predicted });
        self.state.status = OptimizerStatus::StepProposed;
        self.emit(OptimizerEvent::Proposed {
            step: self.state.step,
            length,
            predicted,
        });
        Ok(())
    }

    fn try_step(&mut self) -> Result<()> {
        let proposal = self.state.proposal.clone().ok_or_else(|| {
            Error::InvalidInput("no step has been proposed".into())
        })?;
        let trial = self
            .state
            .molecule
            .with_coordinates(&(self.state.molecule.coordinates() + &proposal.step));
        let point = self.evaluate(&trial)?;
        let (energy, gradient) = self.current()?;
        let actual = point.energy - energy;
        let length = proposal.step.norm();
        let config = &self.config;

        if actual > config.rejection_tolerance * proposal.predicted.abs() {
            self.state.rejections += 1;
            self.state.trust_radius =
                (config.shrink_factor * length).max(config.min_trust_radius);
            self.state.proposal = None;
            self.state.status = OptimizerStatus::Rejected;
            warn!(
                "step {} rejected: dE = {actual:.4e}, predicted {:.4e}, trust radius now {:.3e}",
                self.state.step, proposal.predicted, self.state.trust_radius
            );
            self.emit(OptimizerEvent::Rejected {
                step: self.state.step,
                energy_change: actual,
                predicted: proposal.predicted,
                rejections: self.state.rejections,
                trust_radius: self.state.trust_radius,
            });

            if self.state.rejections >= self.config.max_rejections {
                return Err(Error::OptimizerStepRejectionLimitExceeded {
                    step: self.state.step,
                    rejections: self.state.rejections,
                    trust_radius: self.state.trust_radius,
                });
            }
            return Ok(());
        }

        let pair = SecantPair {
            gradient_change: &point.gradient - gradient,
            step: proposal.step,
        };
        self.state.history.push_back(pair);
        while self.state.history.len() > config.history {
            self.state.history.pop_front();
        }

        let ratio = if proposal.predicted.abs() > f64::EPSILON {
            actual / proposal.predicted
        } else {
            1.0
        };
        let radius = self.state.trust_radius;
        self.state.trust_radius = if ratio > 0.75 && length >= 0.8 * radius {
            (config.grow_factor * radius).min(config.max_trust_radius)
        } else if ratio < 0.25 {
            (config.shrink_factor * radius).max(config.min_trust_radius)
        } else {
            radius
        };

        let max_force = point.gradient.amax();
        self.state.molecule = trial;
        self.state.energy = Some(point.energy);
        self.state.gradient = Some(point.gradient);
        self.state.step += 1;
        self.state.rejections = 0;
        self.state.proposal = None;
        self.state.status = OptimizerStatus::Accepted;

        info!(
            "step {:3}: E = {:.10}, dE {actual:+.3e}, max force {max_force:.3e}, trust radius {:.3e}",
            self.state.step, point.energy, self.state.trust_radius
        );
        self.emit(OptimizerEvent::Accepted {
            step: self.state.step,
            energy: point.energy,
            energy_change: actual,
            max_force,
            trust_radius: self.state.trust_radius,
        });
        Ok(())
    }

    fn save_checkpoint(&self) -> Result<()> {
        let Some((store, template)) = &self.checkpoints else {
            return Ok(());
        };
        let checkpoint = Checkpoint {
            molecule: self.state.molecule.clone(),
            scf: self.surface.scf_state().cloned(),
            optimizer: Some(self.state.clone()),
            ..template.clone()
        };
        store.save(&checkpoint)?;
        Ok(())
    }

    fn emit(&mut self, event: OptimizerEvent) {
        if let Some(observer) = &mut self.observer {
            observer(&event);
        }
    }
}
