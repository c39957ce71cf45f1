use std::hash::Hash;
use std::ops::Index;

use crate::basis::AoBasis;

use super::{screening::unique_quartets, IntegralKernel};

/// An integral index used in the two-electron integrals of a basis set.
///
/// The index represents the four indices (x, y, z, w) used to calculate a two-electron integral:
///   int_{x,y,z,w} = int_{xy|zw} = <x y | z w>
///
/// Since two-electron integrals are symmetric in x <-> y, z <-> w and (xy) <-> (zw), this struct
/// stores its indices in canonical order: x >= y, z >= w, xy >= zw.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct IntegralIndex(usize, usize, usize, usize);

impl IntegralIndex {
    /// Creates a new integral index with the given indices.
    pub(crate) const fn new(index: (usize, usize, usize, usize)) -> Self {
        let (i, j, k, l) = Self::correct_order(index);
        Self(i, j, k, l)
    }

    /// Returns the indices in canonical order.
    #[inline(always)]
    const fn correct_order(
        (i, j, k, l): (usize, usize, usize, usize),
    ) -> (usize, usize, usize, usize) {
        let (i, j) = if i >= j { (i, j) } else { (j, i) };
        let (k, l) = if k >= l { (k, l) } else { (l, k) };

        let ij = i * (i + 1) / 2 + j;
        let kl = k * (k + 1) / 2 + l;

        if ij >= kl {
            (i, j, k, l)
        } else {
            (k, l, i, j)
        }
    }

    pub fn linear(&self, size: usize) -> usize {
        let &Self(i, j, k, l) = self;
        ((i * size + j) * size + k) * size + l
    }
}

impl std::fmt::Display for IntegralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let &Self(i, j, k, l) = self;
        write!(f, "({} {}|{} {})", i, j, k, l)
    }
}

/// Dense, unscreened electron repulsion integrals (ij|kl) over all basis functions.
///
/// Only practical for small systems; it serves as the reference the screened, distributed Fock
/// build is checked against.
pub struct ElectronTensor {
    data: Vec<f64>,
    /// side length
    size: usize,
}

impl ElectronTensor {
    /// Computes every canonical shell quartet once and stores its elements under their canonical
    /// function index.
    pub fn from_basis(basis: &AoBasis, kernel: &impl IntegralKernel) -> Self {
        let n_basis = basis.n_functions();
        let shells = basis.shells();
        let mut data = vec![0.0; n_basis.pow(4)];

        let quartets = unique_quartets(shells.len()).collect::<Vec<_>>();

        let compute = |[p, q, r, s]: [usize; 4]| {
            let block = kernel.electron_repulsion((&shells[p], &shells[q], &shells[r], &shells[s]));
            let mut output = Vec::with_capacity(block.len());
            let mut offset = 0;
            for i in shells[p].functions() {
                for j in shells[q].functions() {
                    for k in shells[r].functions() {
                        for l in shells[s].functions() {
                            let index = IntegralIndex::new((i, j, k, l));
                            log::trace!("ERI {index} = {:<1.8}", block[offset]);
                            output.push((index.linear(n_basis), block[offset]));
                            offset += 1;
                        }
                    }
                }
            }
            output
        };

        #[cfg(feature = "rayon")]
        {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

            quartets
                .par_iter()
                .map(|quartet| compute(quartet.shells))
                .collect::<Vec<_>>() // iterators are lazy - we collect to evaluate all elements
                .into_iter()
                .flatten()
                .for_each(|(index, integral)| data[index] = integral);
        }

        #[cfg(not(feature = "rayon"))]
        quartets
            .iter()
            .flat_map(|quartet| compute(quartet.shells))
            .for_each(|(index, integral)| data[index] = integral);

        Self {
            data,
            size: n_basis,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Index<(usize, usize, usize, usize)> for ElectronTensor {
    type Output = f64;

    fn index(&self, index: (usize, usize, usize, usize)) -> &Self::Output {
        let index = IntegralIndex::new(index);
        let linear = index.linear(self.size);
        &self.data[linear]
    }
}

impl Index<IntegralIndex> for ElectronTensor {
    type Output = f64;

    fn index(&self, index: IntegralIndex) -> &Self::Output {
        let linear = index.linear(self.size);
        &self.data[linear]
    }
}
