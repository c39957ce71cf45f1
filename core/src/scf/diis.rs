use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// One stored iterate: the Fock matrix of every spin channel and its error matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Sample {
    fock: Vec<DMatrix<f64>>,
    error: Vec<DMatrix<f64>>,
}

/// Pulay's direct inversion in the iterative subspace over a fixed number of slots.
///
/// Samples live in a preallocated arena; once it is full the oldest slot is overwritten, so
/// memory stays bounded and the age of every slot follows from `next`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diis {
    slots: Vec<Sample>,
    capacity: usize,
    min_vectors: usize,
    /// slot to overwrite next once the arena is full
    next: usize,
}

impl Diis {
    pub fn new(capacity: usize, min_vectors: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            min_vectors: min_vectors.clamp(1, capacity),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.next = 0;
    }

    pub fn push(&mut self, fock: Vec<DMatrix<f64>>, error: Vec<DMatrix<f64>>) {
        let sample = Sample { fock, error };
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.next] = sample;
            self.next = (self.next + 1) % self.capacity;
        }
    }

    /// Slot indices from oldest to newest.
    fn ordered(&self) -> impl Iterator<Item = usize> + '_ {
        let len = self.slots.len();
        let start = if len < self.capacity { 0 } else { self.next };
        (0..len).map(move |k| (start + k) % len)
    }

    /// Extrapolated Fock matrices, or `None` while there are too few samples. A singular subspace
    /// clears the history and also yields `None`.
    pub fn extrapolate(&mut self) -> Option<Vec<DMatrix<f64>>> {
        let n = self.slots.len();
        if n < self.min_vectors || n < 2 {
            return None;
        }

        let order = self.ordered().collect::<Vec<_>>();
        let overlap = |a: &Sample, b: &Sample| {
            a.error
                .iter()
                .zip(&b.error)
                .map(|(x, y)| x.dot(y))
                .sum::<f64>()
        };

        let mut matrix = DMatrix::zeros(n + 1, n + 1);
        for (i, &slot_i) in order.iter().enumerate() {
            for (j, &slot_j) in order.iter().enumerate().take(i + 1) {
                let value = overlap(&self.slots[slot_i], &self.slots[slot_j]);
                matrix[(i, j)] = value;
                matrix[(j, i)] = value;
            }
            matrix[(i, n)] = 1.0;
            matrix[(n, i)] = 1.0;
        }

        // scaling by the largest error norm keeps the system well conditioned near convergence
        let scale = (0..n).map(|i| matrix[(i, i)]).fold(0.0, f64::max);
        if scale > 0.0 {
            matrix.view_mut((0, 0), (n, n)).scale_mut(scale.recip());
        }

        let rhs = DVector::from_fn(n + 1, |i, _| if i == n { 1.0 } else { 0.0 });
        let solution = matrix.lu().solve(&rhs).filter(|c| c.iter().all(|x| x.is_finite()));
        let Some(coefficients) = solution else {
            log::warn!("DIIS subspace is singular, clearing {n} stored iterates");
            self.reset();
            return None;
        };

        let newest = &self.slots[order[n - 1]];
        let mut fock = newest
            .fock
            .iter()
            .map(|f| DMatrix::zeros(f.nrows(), f.ncols()))
            .collect::<Vec<_>>();
        for (k, &slot) in order.iter().enumerate() {
            for (sum, f) in fock.iter_mut().zip(&self.slots[slot].fock) {
                *sum += f * coefficients[k];
            }
        }
        Some(fock)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    use super::Diis;

    fn scalar(value: f64) -> Vec<DMatrix<f64>> {
        vec![DMatrix::from_element(1, 1, value)]
    }

    #[test]
    fn arena_overwrites_oldest() {
        let mut diis = Diis::new(3, 2);
        for k in 0..5 {
            diis.push(scalar(k as f64), scalar(1.0));
        }
        assert_eq!(diis.len(), 3);

        let stored = diis
            .ordered()
            .map(|slot| diis.slots[slot].fock[0][(0, 0)])
            .collect::<Vec<_>>();
        assert_eq!(stored, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn extrapolation_cancels_linear_error() {
        // error e = f - 2 vanishes at f = 2
        let mut diis = Diis::new(4, 2);
        diis.push(scalar(1.0), scalar(-1.0));
        assert!(diis.extrapolate().is_none());

        diis.push(scalar(4.0), scalar(2.0));
        let fock = diis.extrapolate().unwrap();
        assert_relative_eq!(fock[0][(0, 0)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_subspace_resets() {
        let mut diis = Diis::new(4, 2);
        diis.push(scalar(1.0), scalar(0.0));
        diis.push(scalar(2.0), scalar(0.0));
        assert!(diis.extrapolate().is_none());
        assert!(diis.is_empty());
    }
}
