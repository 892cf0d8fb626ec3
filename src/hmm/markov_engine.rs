use ndarray::{s, Array2};
use rand::Rng;

use crate::hmm::markov_parameters::MarkovParameters;
use crate::model::allele;

/// Copying probability floor shared by every emission term, keeping state
/// likelihoods away from exact zero.
const BACKGROUND_ERROR: f64 = 1e-5;

/**
 * The hidden Markov engine that models one target chromosome as a mosaic
 * copy of a reference panel.
 *
 * Each hidden state is a reference haplotype index. Reference individuals
 * contribute adjacent haplotype pairs, so state `s` and state `s ^ 1` are the
 * two chromosomes of one donor and a switch between them (a "flip") is
 * cheaper than a full recombination. The state count is padded to even so
 * that `s ^ 1` is always in range; the padding column holds zero likelihood
 * and is never updated.
 *
 * One engine belongs to exactly one worker: the forward matrix and the
 * output vectors are private scratch, while the reference panel passed into
 * every walk is shared read-only.
 */
pub struct MarkovEngine {
    /// Number of hidden states (reference haplotypes) in use.
    pub states: usize,
    /// Row width of the forward matrix: `states` rounded up to even.
    width: usize,

    pub parameters: MarkovParameters,

    /// Forward likelihoods, markers x padded states.
    matrix: Array2<f32>,

    /// Posterior probability of the major allele, per marker.
    pub imputed_hap: Vec<f64>,
    /// Major-allele dose accumulated over the haplotypes of one individual.
    pub imputed_dose: Vec<f64>,
    /// Major-allele posterior with the marker's own observation discounted.
    pub leave_one_out: Vec<f64>,
    /// Lowercase base character of the maximum-likelihood allele, per marker.
    pub imputed_alleles: Vec<u8>,
}

impl MarkovEngine {
    pub fn new(markers: usize, states: usize) -> MarkovEngine {
        // With the possibility of flipping we always need an even number of
        // states, so the matrix is padded as required.
        let width = if states & 1 == 1 { states + 1 } else { states };

        MarkovEngine {
            states,
            width,
            parameters: MarkovParameters::new(markers),
            matrix: Array2::zeros((markers, width)),
            imputed_hap: vec![0.0; markers],
            imputed_dose: vec![0.0; markers],
            leave_one_out: vec![0.0; markers],
            imputed_alleles: vec![0; markers],
        }
    }

    /// Forward likelihood at one marker and state, mainly for inspection in
    /// tests.
    pub fn forward_likelihood(&self, marker: usize, state: usize) -> f32 {
        self.matrix[[marker, state]]
    }

    /**
     * The forward pass: starting from uniform likelihoods, alternate
     * conditioning on the observed allele and transposing across each
     * interval, leaving `matrix[m]` holding the forward likelihood of every
     * state at marker m (up to uniform rescalings).
     */
    pub fn walk_left(&mut self, observed: &[u8], haplotypes: &[&[u8]], freqs: &Array2<f32>) {
        let markers = self.parameters.markers;
        if markers == 0 {
            return;
        }

        // Initialize likelihoods at the first position
        for i in 0..self.states {
            self.matrix[[0, i]] = 1.0;
        }

        // Scan along the chromosome
        for m in 0..markers - 1 {
            if observed[m] != allele::MISSING {
                let e = self.parameters.error_rates[m];
                let f = freqs[[observed[m] as usize, m]] as f64;
                let row = self.matrix.row_mut(m).into_slice().unwrap();
                condition(row, haplotypes, m, observed[m], e, f, self.states);
            }

            let r = self.parameters.crossover_rates[m];
            let flip_rate = self.parameters.empirical_flip_rate;
            let states = self.states;
            let (from, mut to) = self.matrix.multi_slice_mut((s![m, ..], s![m + 1, ..]));
            transpose(
                from.as_slice().unwrap(),
                to.as_slice_mut().unwrap(),
                states,
                r,
                flip_rate,
            );
        }

        let last = markers - 1;
        if observed[last] != allele::MISSING {
            let e = self.parameters.error_rates[last];
            let f = freqs[[observed[last] as usize, last]] as f64;
            let row = self.matrix.row_mut(last).into_slice().unwrap();
            condition(row, haplotypes, last, observed[last], e, f, self.states);
        }
    }

    /**
     * The backward pass combined with per-position imputation: walk right to
     * left carrying the backward likelihood vector, form the per-state
     * posterior as its product with the forward matrix, and impute every
     * position from that posterior.
     *
     * Requires a preceding `walk_left` over the same observations.
     */
    pub fn impute(&mut self, major: &[u8], observed: &[u8], haplotypes: &[&[u8]], freqs: &Array2<f32>) {
        let markers = self.parameters.markers;
        if markers == 0 {
            return;
        }

        let mut vector = vec![0.0f32; self.width];
        let mut extra = vec![0.0f32; self.width];

        // Initialize likelihoods at the first position
        for i in 0..self.states {
            vector[i] = 1.0;
        }

        // Scan along the chromosome
        for m in (1..markers).rev() {
            for j in 0..self.states {
                extra[j] = vector[j] * self.matrix[[m, j]];
            }

            self.impute_at(major, observed, &extra, haplotypes, freqs, m);

            if observed[m] != allele::MISSING {
                let e = self.parameters.error_rates[m];
                let f = freqs[[observed[m] as usize, m]] as f64;
                condition(&mut vector, haplotypes, m, observed[m], e, f, self.states);
            }

            transpose(
                &vector,
                &mut extra,
                self.states,
                self.parameters.crossover_rates[m - 1],
                self.parameters.empirical_flip_rate,
            );

            std::mem::swap(&mut vector, &mut extra);
        }

        if observed[0] != allele::MISSING {
            let e = self.parameters.error_rates[0];
            let f = freqs[[observed[0] as usize, 0]] as f64;
            condition(&mut vector, haplotypes, 0, observed[0], e, f, self.states);
        }
        self.impute_at(major, observed, &vector, haplotypes, freqs, 0);
    }

    fn impute_at(
        &mut self,
        major: &[u8],
        observed: &[u8],
        probs: &[f32],
        haplotypes: &[&[u8]],
        freqs: &Array2<f32>,
        position: usize,
    ) {
        let mut p = [0.0f64; 5];

        for i in 0..self.states {
            p[haplotypes[i][position] as usize] += probs[i] as f64;
        }

        let mut ptotal = p[1] + p[2] + p[3] + p[4];
        let mut pmajor = p[major[position] as usize];

        let mut mle = 1;
        for a in 2..4 {
            if p[a] >= p[mle] {
                mle = a;
            }
        }

        self.imputed_hap[position] = pmajor / ptotal;
        self.imputed_dose[position] += self.imputed_hap[position];
        self.imputed_alleles[position] = allele::lowercase_label(mle as u8);

        // Discount the observation's own contribution to the posterior to
        // approximate a leave-one-out estimate at genotyped positions.
        let e = self.parameters.error_rates[position];
        let fmajor = freqs[[major[position] as usize, position]] as f64;
        let fmatch = 1.0 / (1.0 - e + e * fmajor + BACKGROUND_ERROR);
        let fmismatch = 1.0 / (e * fmajor + BACKGROUND_ERROR);

        for a in 1..4 {
            if observed[position] == a as u8 {
                p[a] *= fmatch;
            } else {
                p[a] *= fmismatch;
            }
        }

        ptotal = p[1] + p[2] + p[3] + p[4];
        pmajor = p[major[position] as usize];

        self.leave_one_out[position] = pmajor / ptotal;
    }

    /// Zero the accumulated dose. Called once per individual, before its
    /// haplotypes are imputed and summed.
    pub fn clear_imputed_dose(&mut self) {
        for dose in self.imputed_dose.iter_mut() {
            *dose = 0.0;
        }
    }

    /**
     * Sample one mosaic ancestry path from the forward matrix, walking right
     * to left and crediting the empirical error and crossover accumulators
     * along the way.
     *
     * At each interval the transition decomposes into three exclusive
     * events: no recombination, an intra-donor flip, and a full
     * recombination with resampling; one uniform draw picks among them in
     * proportion to their likelihood.
     */
    pub fn profile_model<R: Rng>(
        &mut self,
        observed: &[u8],
        haplotypes: &[&[u8]],
        freqs: &Array2<f32>,
        rng: &mut R,
    ) {
        let markers = self.parameters.markers;
        if markers == 0 {
            return;
        }

        // Sample a state at the last position
        let mut sum: f64 = (0..self.states)
            .map(|i| self.matrix[[markers - 1, i]] as f64)
            .sum();

        let r = rng.gen::<f64>() * sum;
        let mut state = 0;

        sum = 0.0;
        while state < self.states - 1 && sum < r {
            sum += self.matrix[[markers - 1, state]] as f64;
            state += 1;
        }

        let last = markers - 1;
        if observed[last] != allele::MISSING {
            self.parameters.emp_error[last] += count_errors_sampled(
                haplotypes[state][last],
                observed[last],
                self.parameters.error_rates[last],
                freqs[[observed[last] as usize, last]] as f64,
            );
        } else {
            self.parameters.emp_error[last] += self.parameters.error_rates[last];
        }

        for m in (0..markers - 1).rev() {
            let mut sum: f64 = (0..self.states).map(|i| self.matrix[[m, i]] as f64).sum();

            let rate = self.parameters.crossover_rates[m];
            let flip_rate = self.parameters.empirical_flip_rate;

            let norec = self.matrix[[m, state]] as f64 * (1.0 - rate);
            let flip = self.matrix[[m, state ^ 1]] as f64 * rate * flip_rate;
            let rec = sum * rate * (1.0 - flip_rate) / self.states as f64;

            sum = norec + flip + rec;

            let mut r = rng.gen::<f64>() * sum;

            if r > norec {
                if r > norec + flip {
                    // Full recombination: resample the state from the
                    // forward distribution at this marker
                    self.parameters.emp_crossover[m] += 1.0;

                    r -= norec - flip;
                    r *= self.states as f64 / (rate * (1.0 - flip_rate));

                    state = 0;
                    let mut cumulative = 0.0;
                    while state < self.states - 1 {
                        cumulative += self.matrix[[m, state]] as f64;
                        if cumulative > r {
                            break;
                        }
                        state += 1;
                    }
                } else {
                    // Switch to the donor's sibling haplotype
                    self.parameters.emp_crossover[m] += 1.0;
                    self.parameters.empirical_flips += 1.0;

                    state ^= 1;
                }
            }

            if observed[m] != allele::MISSING {
                self.parameters.emp_error[m] += count_errors_sampled(
                    haplotypes[state][m],
                    observed[m],
                    self.parameters.error_rates[m],
                    freqs[[observed[m] as usize, m]] as f64,
                );
            } else {
                self.parameters.emp_error[m] += self.parameters.error_rates[m];
            }
        }

        self.parameters.empirical_count += 1;
    }

    /**
     * Deterministic counterpart of `profile_model`: accumulate the expected
     * error and recombination counts from the posterior marginals, mirroring
     * the backward walk of `impute`.
     */
    pub fn count_expected(&mut self, observed: &[u8], haplotypes: &[&[u8]], freqs: &Array2<f32>) {
        let markers = self.parameters.markers;
        if markers == 0 {
            return;
        }

        let mut vector = vec![0.0f32; self.width];
        let mut extra = vec![0.0f32; self.width];

        for i in 0..self.states {
            vector[i] = 1.0;
        }

        for m in (1..markers).rev() {
            for j in 0..self.states {
                extra[j] = vector[j] * self.matrix[[m, j]];
            }

            if observed[m] != allele::MISSING {
                let e = self.parameters.error_rates[m];
                let f = freqs[[observed[m] as usize, m]] as f64;

                self.parameters.emp_error[m] +=
                    count_errors_expected(&extra, haplotypes, m, observed[m], e, f, self.states);
                condition(&mut vector, haplotypes, m, observed[m], e, f, self.states);
            } else {
                self.parameters.emp_error[m] += self.parameters.error_rates[m];
            }

            let rate = self.parameters.crossover_rates[m - 1];
            transpose(
                &vector,
                &mut extra,
                self.states,
                rate,
                self.parameters.empirical_flip_rate,
            );

            let recombinants = self.count_recombinants(&vector, m - 1, rate);
            self.parameters.emp_crossover[m - 1] += recombinants;

            std::mem::swap(&mut vector, &mut extra);
        }

        if observed[0] != allele::MISSING {
            let e = self.parameters.error_rates[0];
            let f = freqs[[observed[0] as usize, 0]] as f64;

            condition(&mut vector, haplotypes, 0, observed[0], e, f, self.states);
            self.parameters.emp_error[0] +=
                count_errors_expected(&vector, haplotypes, 0, observed[0], e, f, self.states);
        } else {
            self.parameters.emp_error[0] += self.parameters.error_rates[0];
        }

        self.parameters.empirical_count += 1;
    }

    /**
     * Posterior probability that the transition between a backward vector
     * and the forward distribution at the adjacent marker involved a
     * recombination or flip. The flip share is credited to
     * `empirical_flips` as a side effect.
     */
    fn count_recombinants(&mut self, from: &[f32], forward_marker: usize, rate: f64) -> f64 {
        if rate == 0.0 {
            return 0.0;
        }

        let mut sum = 0.0;
        for i in 0..self.states {
            sum += from[i] as f64;
        }

        let mut rsum = 0.0;
        let mut fsum = 0.0;
        let mut nrsum = 0.0;

        for i in 0..self.states {
            let to = self.matrix[[forward_marker, i]] as f64;
            rsum += to;
            fsum += from[i] as f64 * self.matrix[[forward_marker, i ^ 1]] as f64;
            nrsum += from[i] as f64 * to;
        }

        let flip_rate = self.parameters.empirical_flip_rate;

        fsum *= rate * flip_rate;
        rsum *= sum * rate * (1.0 - flip_rate) / self.states as f64;
        nrsum *= 1.0 - rate;

        let total = fsum + rsum + nrsum;

        self.parameters.empirical_flips += fsum / total;

        (rsum + fsum) / total
    }
}

/**
 * Apply one interval's transition to a row of state likelihoods.
 *
 * With crossover probability r, each state keeps its mass with weight
 * (1 - r), receives its sibling's mass with the flip share of r, and
 * receives an equal share of the total mass with the remainder. When the
 * shared term threatens to underflow, all three weights are scaled up
 * uniformly, which preserves posterior ratios.
 */
fn transpose(from: &[f32], to: &mut [f32], states: usize, r: f64, empirical_flip_rate: f64) {
    if r == 0.0 {
        to[..states].copy_from_slice(&from[..states]);
        return;
    }

    let mut flip_rate = r * empirical_flip_rate;

    let mut sum: f64 = from[..states].iter().map(|&value| value as f64).sum();
    sum *= r * (1.0 - empirical_flip_rate) / states as f64;

    let mut complement = 1.0 - r;

    // avoid underflows
    if sum < 1e-10 {
        sum *= 1e15;
        flip_rate *= 1e15;
        complement *= 1e15;
    }

    for i in 0..states {
        to[i] = (from[i] as f64 * complement + from[i ^ 1] as f64 * flip_rate + sum) as f32;
    }
}

/// Multiply a row of state likelihoods by the emission probability of the
/// observed allele. A missing observation leaves the row untouched.
fn condition(
    vector: &mut [f32],
    haplotypes: &[&[u8]],
    position: usize,
    observed: u8,
    e: f64,
    freq: f64,
    states: usize,
) {
    if observed == allele::MISSING {
        return;
    }

    let pmatch = (1.0 - e) + e * freq + BACKGROUND_ERROR;
    let prandom = e * freq + BACKGROUND_ERROR;

    for i in 0..states {
        if haplotypes[i][position] == observed {
            vector[i] = (vector[i] as f64 * pmatch) as f32;
        } else {
            vector[i] = (vector[i] as f64 * prandom) as f32;
        }
    }
}

/// Probability that the observation at a sampled state was a mosaic error.
fn count_errors_sampled(copied: u8, observed: u8, e: f64, freq: f64) -> f64 {
    if observed == allele::MISSING {
        return e;
    }

    if observed == copied {
        return e * freq / (1.0 - e + e * freq + BACKGROUND_ERROR);
    }

    e * freq / (e * freq + BACKGROUND_ERROR)
}

/// Posterior error mass given the observation, split over the states that
/// match it and those that do not.
fn count_errors_expected(
    vector: &[f32],
    haplotypes: &[&[u8]],
    position: usize,
    observed: u8,
    e: f64,
    freq: f64,
    states: usize,
) -> f64 {
    if observed == allele::MISSING {
        return e;
    }

    let mut matched = 0.0f64;
    let mut mismatched = 0.0f64;

    for i in 0..states {
        if haplotypes[i][position] == observed {
            matched += vector[i] as f64;
        } else {
            mismatched += vector[i] as f64;
        }
    }

    let background = (matched + mismatched) * BACKGROUND_ERROR;
    mismatched = (matched + mismatched) * e * freq;
    matched *= 1.0 - e;

    mismatched / (mismatched + matched + background)
}
