//! Dense count tables with a Dirichlet prior over their rows.
//!
//! The same structure backs both halves of the collapsed LDA conditional:
//! the word-topic table (rows are word types, columns are topics, prior β)
//! and the topic-document table (rows are topics, columns are documents,
//! prior α). In both cases the prior is indexed by row and the normalizer is
//! the column total.

use ndarray::{Array1, Array2};

use crate::error::{LdaError, Result};
use crate::math::digamma;

/// Components of an asymmetric prior never drop below this value.
pub const PRIOR_FLOOR: f64 = 1e-10;

#[derive(Clone, Debug, PartialEq)]
pub struct CountModel {
    // N_rc
    counts: Array2<u32>,
    // N_.c
    marginal: Array1<u32>,
    // hist[r][k] = #{c : N_rc = k}
    histograms: Option<Vec<Vec<u32>>>,
    prior: Vec<f64>,
    prior_sum: f64,
}

impl CountModel {
    /// Creates an empty table whose prior is uniform with total mass `prior_sum`.
    pub fn new(rows: usize, cols: usize, prior_sum: f64) -> CountModel {
        CountModel {
            counts: Array2::zeros((rows, cols)),
            marginal: Array1::zeros(cols),
            histograms: None,
            prior: vec![prior_sum / rows as f64; rows],
            prior_sum,
        }
    }

    pub fn rows(&self) -> usize {
        self.counts.nrows()
    }

    pub fn cols(&self) -> usize {
        self.counts.ncols()
    }

    pub fn count(&self, r: usize, c: usize) -> u32 {
        self.counts[[r, c]]
    }

    pub fn marginal(&self, c: usize) -> u32 {
        self.marginal[c]
    }

    pub fn prior(&self) -> &[f64] {
        &self.prior
    }

    pub fn prior_sum(&self) -> f64 {
        self.prior_sum
    }

    pub fn has_histograms(&self) -> bool {
        self.histograms.is_some()
    }

    pub fn histogram(&self, r: usize) -> Option<&[u32]> {
        self.histograms.as_ref().map(|hists| &hists[r][..])
    }

    /// Smoothed conditional `(N_rc + prior[r]) / (N_.c + prior_sum)`.
    #[inline]
    pub fn score(&self, r: usize, c: usize) -> f64 {
        (self.counts[[r, c]] as f64 + self.prior[r]) / (self.marginal[c] as f64 + self.prior_sum)
    }

    /// Maximum-likelihood estimate `N_rc / N_.c`, zero for an empty column.
    pub fn score_no_prior(&self, r: usize, c: usize) -> f64 {
        match self.marginal[c] {
            0 => 0.0,
            nc => self.counts[[r, c]] as f64 / nc as f64,
        }
    }

    /// All rows ranked by `score(r, c)` in decreasing order.
    pub fn ranked_rows(&self, c: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = (0..self.rows()).map(|r| (r, self.score(r, c))).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    /// Adds one observation at `(r, c)`.
    ///
    /// `update_histogram` must be false until `initialize_histograms` has run.
    #[inline]
    pub fn increment(&mut self, r: usize, c: usize, update_histogram: bool) {
        let old = self.counts[[r, c]];
        self.counts[[r, c]] = old + 1;
        self.marginal[c] += 1;

        if update_histogram {
            let hist = self.row_histogram_mut(r);
            hist[old as usize] -= 1;
            hist[old as usize + 1] += 1;
        }
    }

    /// Removes one observation at `(r, c)`. Panics if the cell is empty.
    #[inline]
    pub fn decrement(&mut self, r: usize, c: usize, update_histogram: bool) {
        let old = self.counts[[r, c]];
        assert!(old > 0, "count at ({}, {}) would become negative", r, c);
        self.counts[[r, c]] = old - 1;
        self.marginal[c] -= 1;

        if update_histogram {
            let hist = self.row_histogram_mut(r);
            hist[old as usize] -= 1;
            hist[old as usize - 1] += 1;
        }
    }

    fn row_histogram_mut(&mut self, r: usize) -> &mut Vec<u32> {
        match self.histograms {
            Some(ref mut hists) => &mut hists[r],
            None => panic!("count histograms used before initialize_histograms"),
        }
    }

    /// Zeroes the table and its marginal. Prior and histograms are untouched.
    pub fn reset_counts(&mut self) {
        self.counts.fill(0);
        self.marginal.fill(0);
    }

    /// Builds the per-row histograms from the current table.
    ///
    /// `row_bounds[r]` is the largest count row `r` can ever reach; its
    /// histogram gets `row_bounds[r] + 1` buckets.
    pub fn initialize_histograms(&mut self, row_bounds: &[u32]) -> Result<()> {
        if self.histograms.is_some() {
            return Err(LdaError::Invariant("count histograms initialized twice".into()));
        }
        if row_bounds.len() != self.rows() {
            return Err(LdaError::Invariant(format!(
                "expected {} histogram bounds, got {}",
                self.rows(),
                row_bounds.len()
            )));
        }

        let mut hists = Vec::with_capacity(self.rows());
        for (r, (row, &bound)) in self.counts.outer_iter().zip(row_bounds).enumerate() {
            let mut hist = vec![0u32; bound as usize + 1];
            for &n in row.iter() {
                if n > bound {
                    return Err(LdaError::Invariant(format!(
                        "count {} in row {} exceeds histogram bound {}",
                        n, r, bound
                    )));
                }
                hist[n as usize] += 1;
            }
            hists.push(hist);
        }
        self.histograms = Some(hists);
        Ok(())
    }

    /// Histogram of the column totals: `hist[k] = #{c : N_.c = k}`.
    pub fn marginal_histogram(&self) -> Vec<u32> {
        let max = self.marginal.iter().cloned().max().unwrap_or(0);
        let mut hist = vec![0u32; max as usize + 1];
        for &n in self.marginal.iter() {
            hist[n as usize] += 1;
        }
        hist
    }

    /// Minka's fixed-point update of every prior component.
    ///
    /// Reads only the histograms, so one iteration costs the total histogram
    /// size rather than `rows * cols`.
    pub fn optimize_asymmetric(&mut self, iterations: usize) -> Result<()> {
        let hists = match self.histograms {
            Some(ref hists) => hists,
            None => {
                return Err(LdaError::Invariant(
                    "asymmetric prior optimized before initialize_histograms".into(),
                ))
            }
        };
        let marginal_hist = self.marginal_histogram();

        for _ in 0..iterations {
            let denominator = digamma_difference_sum(&marginal_hist, self.prior_sum);
            if denominator <= 0.0 {
                // Empty table
                return Ok(());
            }

            let mut sum = 0.0;
            for (param, hist) in self.prior.iter_mut().zip(hists) {
                let old = *param;
                let mut new = old * digamma_difference_sum(hist, old) / denominator;
                if new == 0.0 {
                    new = PRIOR_FLOOR;
                }
                *param = new;
                sum += new;
            }
            self.prior_sum = sum;
        }
        Ok(())
    }

    /// Fixed-point update of the prior's total mass with the shape held
    /// uniform. Reads the raw table.
    pub fn optimize_sum(&mut self, iterations: usize) -> Result<()> {
        if self.marginal.iter().all(|&n| n == 0) {
            return Err(LdaError::Invariant(
                "prior sum optimized over an empty count table".into(),
            ));
        }
        let rows = self.rows() as f64;

        for _ in 0..iterations {
            let digamma_sum = digamma(self.prior_sum);
            let q: f64 = self
                .marginal
                .iter()
                .map(|&n| digamma(n as f64 + self.prior_sum) - digamma_sum)
                .sum();

            let mut p = 0.0;
            for (row, &param) in self.counts.outer_iter().zip(&self.prior) {
                let digamma_param = digamma(param);
                for &n in row.iter() {
                    p += (digamma(n as f64 + param) - digamma_param) / rows;
                }
            }

            self.prior_sum *= p / q;
            let uniform = self.prior_sum / rows;
            self.prior.iter_mut().for_each(|param| *param = uniform);
        }
        Ok(())
    }
}

// sum_c [psi(N_c + a) - psi(a)] for the counts summarized by `hist`, using
// psi(n + a) - psi(a) = sum_{m < n} 1 / (a + m).
fn digamma_difference_sum(hist: &[u32], a: f64) -> f64 {
    let mut total = 0.0;
    let mut running = 0.0;
    for (n, &columns) in hist.iter().enumerate().skip(1) {
        running += 1.0 / (a + (n - 1) as f64);
        total += columns as f64 * running;
    }
    total
}


#[cfg(test)]
mod histogram_proptest {
    use super::CountModel;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn maintained_histograms_match_rebuilt(
            cells in prop::collection::vec((0usize..4, 0usize..3), 1..40),
            moves in prop::collection::vec((0usize..40, 0usize..3), 0..80),
        ) {
            // Every row can hold at most all observations
            let bound = cells.len() as u32;
            let mut m = CountModel::new(4, 3, 1.0);
            let mut placed = cells.clone();
            for &(r, c) in &placed {
                m.increment(r, c, false);
            }
            m.initialize_histograms(&[bound; 4]).unwrap();

            for &(i, c) in &moves {
                let i = i % placed.len();
                let (r, old) = placed[i];
                m.decrement(r, old, true);
                m.increment(r, c, true);
                placed[i] = (r, c);
            }

            let mut rebuilt = CountModel::new(4, 3, 1.0);
            for &(r, c) in &placed {
                rebuilt.increment(r, c, false);
            }
            rebuilt.initialize_histograms(&[bound; 4]).unwrap();

            prop_assert_eq!(&m, &rebuilt);
            let total: u32 = (0..3).map(|c| m.marginal(c)).sum();
            prop_assert_eq!(total as usize, cells.len());
        }
    }
}
