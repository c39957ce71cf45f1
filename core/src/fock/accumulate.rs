use nalgebra::DMatrix;

use crate::{
    basis::{AoBasis, Shell},
    integrals::IntegralKernel,
    xc::{integrate_batch, GridBatch, XcFunctional, XcMatrices},
};

/// Partial two-electron and exchange-correlation contributions of one worker.
///
/// Coulomb and exchange are kept unsymmetrized while accumulating; [`Accumulator::finish`] folds
/// in the transpose.
#[derive(Clone, Debug)]
pub(crate) struct Accumulator {
    pub(crate) coulomb: DMatrix<f64>,
    /// one per spin channel, empty without exact exchange
    pub(crate) exchange: Vec<DMatrix<f64>>,
    pub(crate) xc: Option<XcMatrices>,
}

/// Symmetrized contributions after the reduction.
#[derive(Clone, Debug)]
pub(crate) struct TwoElectronParts {
    pub(crate) coulomb: DMatrix<f64>,
    pub(crate) exchange: Vec<DMatrix<f64>>,
    pub(crate) xc: Option<XcMatrices>,
}

impl Accumulator {
    pub(crate) fn zeros(n: usize, channels: usize, exchange: bool, xc: bool) -> Self {
        Self {
            coulomb: DMatrix::zeros(n, n),
            exchange: if exchange {
                vec![DMatrix::zeros(n, n); channels]
            } else {
                Vec::new()
            },
            xc: xc.then(|| XcMatrices::zeros(n, channels)),
        }
    }

    /// Adds one canonical quartet. `total` is the total density, `densities` the per-channel
    /// densities the exchange is built from.
    pub(crate) fn add_quartet(
        &mut self,
        kernel: &impl IntegralKernel,
        shells: [&Shell; 4],
        degeneracy: f64,
        total: &DMatrix<f64>,
        densities: &[DMatrix<f64>],
    ) {
        let [a, b, c, d] = shells;
        let block = kernel.electron_repulsion((a, b, c, d));

        let mut index = 0;
        for i in a.functions() {
            for j in b.functions() {
                for k in c.functions() {
                    for l in d.functions() {
                        let value = block[index] * degeneracy;
                        index += 1;

                        self.coulomb[(i, j)] += total[(k, l)] * value;
                        self.coulomb[(k, l)] += total[(i, j)] * value;

                        for (exchange, density) in self.exchange.iter_mut().zip(densities) {
                            exchange[(i, k)] += density[(j, l)] * value;
                            exchange[(j, l)] += density[(i, k)] * value;
                            exchange[(i, l)] += density[(j, k)] * value;
                            exchange[(j, k)] += density[(i, l)] * value;
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn add_grid_batch(
        &mut self,
        batch: &GridBatch,
        basis: &AoBasis,
        densities: &[DMatrix<f64>],
        functional: &dyn XcFunctional,
    ) {
        if let Some(xc) = &mut self.xc {
            integrate_batch(batch, basis, densities, functional, xc);
        }
    }

    #[cfg_attr(not(feature = "rayon"), allow(dead_code))]
    pub(crate) fn merge(mut self, other: Self) -> Self {
        self.coulomb += other.coulomb;
        for (mine, theirs) in self.exchange.iter_mut().zip(other.exchange) {
            *mine += theirs;
        }
        if let (Some(mine), Some(theirs)) = (&mut self.xc, other.xc) {
            mine.energy += theirs.energy;
            mine.electrons += theirs.electrons;
            for (a, b) in mine.potential.iter_mut().zip(theirs.potential) {
                *a += b;
            }
        }
        self
    }

    /// Flattens everything into one buffer for a single reduction.
    pub(crate) fn pack(&self) -> Vec<f64> {
        let mut buffer = self.coulomb.as_slice().to_vec();
        for exchange in &self.exchange {
            buffer.extend_from_slice(exchange.as_slice());
        }
        if let Some(xc) = &self.xc {
            buffer.push(xc.energy);
            buffer.push(xc.electrons);
            for potential in &xc.potential {
                buffer.extend_from_slice(potential.as_slice());
            }
        }
        buffer
    }

    /// Inverse of [`Accumulator::pack`], writing the reduced values back in place.
    pub(crate) fn unpack(&mut self, buffer: &[f64]) {
        let size = self.coulomb.len();
        let mut chunks = buffer;
        let mut take = |count: usize| {
            let (head, tail) = chunks.split_at(count);
            chunks = tail;
            head
        };

        self.coulomb.copy_from_slice(take(size));
        for exchange in &mut self.exchange {
            exchange.copy_from_slice(take(size));
        }
        if let Some(xc) = &mut self.xc {
            xc.energy = take(1)[0];
            xc.electrons = take(1)[0];
            for potential in &mut xc.potential {
                potential.copy_from_slice(take(size));
            }
        }
    }

    /// J = (J' + J'^T) / 4 and K = (K' + K'^T) / 8 undo the double counting of the canonical
    /// quartet loop.
    pub(crate) fn finish(self) -> TwoElectronParts {
        let symmetrize = |matrix: DMatrix<f64>, scale: f64| (&matrix + matrix.transpose()) * scale;
        TwoElectronParts {
            coulomb: symmetrize(self.coulomb, 0.25),
            exchange: self
                .exchange
                .into_iter()
                .map(|exchange| symmetrize(exchange, 0.125))
                .collect(),
            xc: self.xc,
        }
    }
}
