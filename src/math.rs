use rand::distributions::Distribution;
use rand::Rng;

// Asymptotic expansion of psi(y) around y = x + 6, reduced back to x with the
// recurrence psi(y) = psi(y - 1) + 1 / (y - 1). Six shifts are enough for the
// series to be accurate to ~1e-10 for every positive argument, including the
// very small Dirichlet parameters the optimizers produce.
//
// Only defined for x > 0.
pub fn digamma(x: f64) -> f64 {
    const C2: f64 = 0.083333333333333;
    const C4: f64 = 0.008333333333333;
    const C6: f64 = 0.003968253968254;
    const C8: f64 = 0.004166666666667;

    let y = x + 6.0;
    let r = 1.0 / (y * y);
    let series = (((C8 * r - C6) * r + C4) * r - C2) * r;

    // Shift terms are taken from x itself, not y - k, to keep the pole exact.
    let shift: f64 = (0..6).map(|k| 1.0 / (x + k as f64)).sum();

    series + f64::ln(y) - 0.5 / y - shift
}

/// Unnormalized categorical distribution over `0..weights.len()`.
///
/// Sampling walks the cumulative sum of the weights, so entries whose weight
/// underflowed to zero can never be selected.
#[derive(Clone, Copy, Debug)]
pub struct Categorical<'a> {
    weights: &'a [f64],
    sum: f64,
}

impl<'a> Categorical<'a> {
    /// `sum` must be the sum of `weights`; callers usually accumulate it
    /// while filling the weights.
    pub fn new(weights: &'a [f64], sum: f64) -> Categorical<'a> {
        assert!(!weights.is_empty(), "categorical over zero outcomes");
        Categorical { weights, sum }
    }
}

impl<'a> Distribution<usize> for Categorical<'a> {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let x = rng.gen::<f64>() * self.sum;

        let mut acc = 0.0;
        for (k, &w) in self.weights.iter().enumerate() {
            acc += w;
            if x < acc {
                return k;
            }
        }
        // Rounding left `x` past the accumulated total
        self.weights
            .iter()
            .rposition(|&w| w > 0.0)
            .unwrap_or(self.weights.len() - 1)
    }
}
