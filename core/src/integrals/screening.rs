use crate::basis::AoBasis;

use super::IntegralKernel;

/// Cauchy-Schwarz bounds `Q_ab = sqrt(max |(ab|ab)|)` for every shell pair.
///
/// |(ab|cd)| <= Q_ab Q_cd holds for every element of a quartet block, so a quartet whose bound
/// product is below the threshold can be dropped without evaluating it.
#[derive(Clone, Debug)]
pub struct SchwarzBounds {
    n_shells: usize,
    bounds: Vec<f64>,
}

impl SchwarzBounds {
    pub fn new(kernel: &impl IntegralKernel, basis: &AoBasis) -> Self {
        let shells = basis.shells();
        let n_shells = shells.len();
        let mut bounds = vec![0.0; n_shells * n_shells];

        for a in 0..n_shells {
            for b in 0..=a {
                let (sa, sb) = (&shells[a], &shells[b]);
                let block = kernel.electron_repulsion((sa, sb, sa, sb));

                let nab = sa.n_functions() * sb.n_functions();
                let max = (0..nab)
                    .map(|ij| block[ij * nab + ij].abs())
                    .fold(0.0, f64::max);

                let bound = max.sqrt();
                bounds[a * n_shells + b] = bound;
                bounds[b * n_shells + a] = bound;
            }
        }

        Self { n_shells, bounds }
    }

    #[inline(always)]
    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.bounds[a * self.n_shells + b]
    }

    pub fn n_shells(&self) -> usize {
        self.n_shells
    }

    /// Upper bound of every integral in the quartet block (ab|cd).
    #[inline(always)]
    pub fn estimate(&self, [a, b, c, d]: [usize; 4]) -> f64 {
        self.get(a, b) * self.get(c, d)
    }

    #[inline(always)]
    pub fn is_negligible(&self, quartet: [usize; 4], threshold: f64) -> bool {
        self.estimate(quartet) < threshold
    }
}

/// A canonical shell quartet (P >= Q, R >= S, PQ >= RS) with the number of index permutations
/// it stands for, relative to the eight-fold symmetry class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShellQuartet {
    pub shells: [usize; 4],
}

impl ShellQuartet {
    /// Degeneracy factor (1, 2, 4 or 8) of the quartet.
    pub fn degeneracy(&self) -> f64 {
        let [p, q, r, s] = self.shells;
        let mut factor = 1.0;
        if p != q {
            factor *= 2.0;
        }
        if r != s {
            factor *= 2.0;
        }
        if (p, q) != (r, s) {
            factor *= 2.0;
        }
        factor
    }
}

/// All canonical quartets over `n_shells` shells, in canonical order.
pub fn unique_quartets(n_shells: usize) -> impl Iterator<Item = ShellQuartet> {
    (0..n_shells).flat_map(move |p| {
        (0..=p).flat_map(move |q| {
            (0..=p).flat_map(move |r| {
                let s_max = if r == p { q } else { r };
                (0..=s_max).map(move |s| ShellQuartet {
                    shells: [p, q, r, s],
                })
            })
        })
    })
}

/// Canonical quartets whose Schwarz estimate reaches `threshold`.
pub fn significant_quartets(bounds: &SchwarzBounds, threshold: f64) -> Vec<ShellQuartet> {
    let total = unique_quartets(bounds.n_shells()).count();
    let significant = unique_quartets(bounds.n_shells())
        .filter(|quartet| !bounds.is_negligible(quartet.shells, threshold))
        .collect::<Vec<_>>();

    log::debug!(
        "schwarz screening kept {} of {} shell quartets (threshold {threshold:e})",
        significant.len(),
        total
    );
    significant
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{significant_quartets, unique_quartets, SchwarzBounds};
    use crate::{
        basis::AoBasis,
        integrals::{IntegralKernel, McMurchieDavidson},
        molecule, testing,
    };

    #[test]
    fn quartets_cover_every_ordered_quartet() {
        // expanding each canonical quartet by its symmetry class reproduces all n^4 quartets once
        let n = 4;
        let mut seen = HashSet::new();
        let mut weight = 0.0;

        for quartet in unique_quartets(n) {
            let [p, q, r, s] = quartet.shells;
            let class: HashSet<_> = [
                [p, q, r, s],
                [q, p, r, s],
                [p, q, s, r],
                [q, p, s, r],
                [r, s, p, q],
                [s, r, p, q],
                [r, s, q, p],
                [s, r, q, p],
            ]
            .into_iter()
            .collect();

            assert_eq!(class.len() as f64, quartet.degeneracy());
            for member in class {
                assert!(seen.insert(member));
            }
            weight += quartet.degeneracy();
        }

        assert_eq!(seen.len(), n.pow(4));
        assert_eq!(weight, n.pow(4) as f64);
    }

    #[test]
    fn no_false_negatives() {
        let molecule = molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1),
            H => (9.0, 0.0, 0.0),
        };
        let basis = AoBasis::new(&molecule, &testing::basis_set("6-31G")).unwrap();
        let kernel = McMurchieDavidson;
        let bounds = SchwarzBounds::new(&kernel, &basis);
        let threshold = 1e-6;

        let kept = significant_quartets(&bounds, threshold)
            .into_iter()
            .collect::<HashSet<_>>();
        assert!(kept.len() < unique_quartets(basis.n_shells()).count());

        let shells = basis.shells();
        for quartet in unique_quartets(basis.n_shells()) {
            if kept.contains(&quartet) {
                continue;
            }
            let [p, q, r, s] = quartet.shells;
            let block = kernel.electron_repulsion((&shells[p], &shells[q], &shells[r], &shells[s]));
            let largest = block.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            assert!(largest < threshold, "{quartet:?} skipped with |(ab|cd)| = {largest}");
            assert!(largest <= bounds.estimate(quartet.shells) * (1.0 + 1e-12));
        }
    }
}
