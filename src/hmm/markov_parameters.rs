use std::io::Write;
use std::ops::AddAssign;

use crate::utils::errors::HapmosaicError;
use crate::utils::file_utils;

/**
 * The mosaic model parameters: a per-marker error rate, a per-interval
 * crossover rate and the empirical accumulators that feed the end-of-round
 * model update.
 *
 * Each worker carries its own copy (via `copy_parameters`) and accumulates
 * into its local empirical counters; the round's master copy absorbs the
 * workers through `+=` and then calls `update_model`. Accumulation is
 * element-wise and commutative, so merge order does not matter beyond
 * floating-point association.
 */
#[derive(Clone, Debug)]
pub struct MarkovParameters {
    pub markers: usize,

    /// Per-marker mosaic error rate, in (0, 1) after any model update.
    pub error_rates: Vec<f64>,
    /// Per-interval crossover rate, one entry per adjacent marker pair.
    pub crossover_rates: Vec<f64>,

    pub emp_error: Vec<f64>,
    pub emp_crossover: Vec<f64>,

    /// Fraction of sampled recombinations attributed to switches between the
    /// two haplotypes of the same reference individual.
    pub empirical_flip_rate: f64,
    pub empirical_flips: f64,
    pub empirical_count: usize,
}

impl MarkovParameters {
    pub fn new(markers: usize) -> MarkovParameters {
        MarkovParameters {
            markers,
            error_rates: vec![0.0; markers],
            crossover_rates: vec![0.0; markers.saturating_sub(1)],
            emp_error: vec![0.0; markers],
            emp_crossover: vec![0.0; markers.saturating_sub(1)],
            empirical_flip_rate: 0.80,
            empirical_flips: 0.0,
            empirical_count: 0,
        }
    }

    /// Take over another set's current model (rates and flip rate) and reset
    /// the local empirical accumulators, readying this copy for one worker
    /// pass.
    pub fn copy_parameters(&mut self, rhs: &MarkovParameters) {
        self.markers = rhs.markers;
        self.empirical_flip_rate = rhs.empirical_flip_rate;

        self.error_rates = rhs.error_rates.clone();
        self.crossover_rates = rhs.crossover_rates.clone();

        self.empirical_count = 0;
        self.empirical_flips = 0.0;
        self.emp_error = vec![0.0; self.markers];
        self.emp_crossover = vec![0.0; self.markers.saturating_sub(1)];
    }

    /**
     * Fold the empirical accumulators into fresh model estimates and zero
     * them for the next round.
     *
     * Markers (and intervals) whose accumulated counts stay below one (two
     * for intervals) are pooled into a shared background rate instead of
     * receiving their own noisy estimate.
     */
    pub fn update_model(&mut self) {
        if self.markers == 0 {
            return;
        }

        let scale = 1.0 / (self.empirical_count as f64 + 1e-30);

        let mut background_e = 0.0;
        let mut background_r = 0.0;
        let mut background_e_count = 0usize;
        let mut background_r_count = 0usize;

        for i in 0..self.markers {
            if self.emp_error[i] < 1.0 {
                background_e += self.emp_error[i];
                background_e_count += 1;
            }

            if i < self.markers - 1 && self.emp_crossover[i] < 2.0 {
                background_r += self.emp_crossover[i];
                background_r_count += 1;
            }
        }

        background_r /= self.empirical_count as f64 * background_r_count as f64 + 1e-30;
        background_e /= self.empirical_count as f64 * background_e_count as f64 + 1e-30;

        let crossover_total: f64 = self.emp_crossover.iter().sum();
        self.empirical_flip_rate = self.empirical_flips / (crossover_total + 1e-30);

        for i in 0..self.markers.saturating_sub(1) {
            self.crossover_rates[i] = if self.emp_crossover[i] >= 2.0 {
                self.emp_crossover[i] * scale
            } else {
                background_r
            };
            self.error_rates[i] = if self.emp_error[i] >= 1.0 {
                self.emp_error[i] * scale
            } else {
                background_e
            };
            self.emp_crossover[i] = 0.0;
            self.emp_error[i] = 0.0;
        }

        let last = self.markers - 1;
        self.error_rates[last] = if self.emp_error[last] > 2.0 {
            self.emp_error[last] * scale
        } else {
            background_e
        };
        self.emp_error[last] = 0.0;

        self.empirical_count = 0;
        self.empirical_flips = 0.0;
    }

    pub fn write_parameters(
        &self,
        marker_names: &[String],
        prefix: &str,
        gzip: bool,
    ) -> Result<(), HapmosaicError> {
        let suffix = if gzip { ".gz" } else { "" };

        self.write_error_rates(marker_names, &format!("{}.erate{}", prefix, suffix), gzip)?;
        self.write_crossover_rates(marker_names, &format!("{}.rec{}", prefix, suffix), gzip)
    }

    pub fn write_error_rates(
        &self,
        marker_names: &[String],
        filename: &str,
        gzip: bool,
    ) -> Result<(), HapmosaicError> {
        let mut output = file_utils::writer(filename, gzip)?;

        write_io(&mut output, "MarkerName\tErrorRate\n")?;
        for i in 0..self.markers {
            write_io(
                &mut output,
                &format!("{}\t{}\n", marker_names[i], format_rate(self.error_rates[i])),
            )?;
        }

        Ok(())
    }

    pub fn write_crossover_rates(
        &self,
        marker_names: &[String],
        filename: &str,
        gzip: bool,
    ) -> Result<(), HapmosaicError> {
        let mut output = file_utils::writer(filename, gzip)?;

        write_io(&mut output, "Interval\tSwitchRate\n")?;
        for i in 0..self.markers.saturating_sub(1) {
            write_io(
                &mut output,
                &format!(
                    "{}-{}\t{}\n",
                    marker_names[i],
                    marker_names[i + 1],
                    format_rate(self.crossover_rates[i])
                ),
            )?;
        }

        Ok(())
    }

    /**
     * Load per-marker error rates from a previous run. The file must hold a
     * header line plus one line per marker; anything else is treated as a
     * shape mismatch and ignored.
     *
     * @return whether the rates were applied
     */
    pub fn read_error_rates(&mut self, filename: &str) -> bool {
        let lines = match file_utils::read_lines(filename) {
            Ok(lines) => lines,
            Err(_) => return false,
        };

        if lines.len() != self.markers + 1 {
            return false;
        }

        for i in 0..self.markers {
            let tokens: Vec<&str> = lines[i + 1].split_whitespace().collect();

            if tokens.len() >= 2 {
                if let Ok(rate) = tokens[1].parse::<f64>() {
                    self.error_rates[i] = rate;
                }
            }
        }

        true
    }

    /// Counterpart of `read_error_rates` for the per-interval crossover
    /// rates (header line plus one line per interval).
    pub fn read_crossover_rates(&mut self, filename: &str) -> bool {
        let lines = match file_utils::read_lines(filename) {
            Ok(lines) => lines,
            Err(_) => return false,
        };

        if lines.len() != self.markers {
            return false;
        }

        for i in 0..self.markers.saturating_sub(1) {
            let tokens: Vec<&str> = lines[i + 1].split_whitespace().collect();

            if tokens.len() >= 2 {
                if let Ok(rate) = tokens[1].parse::<f64>() {
                    self.crossover_rates[i] = rate;
                }
            }
        }

        true
    }
}

impl AddAssign<&MarkovParameters> for MarkovParameters {
    fn add_assign(&mut self, rhs: &MarkovParameters) {
        self.empirical_count += rhs.empirical_count;
        self.empirical_flips += rhs.empirical_flips;

        for i in 0..self.markers {
            self.emp_error[i] += rhs.emp_error[i];
        }
        for i in 0..self.markers.saturating_sub(1) {
            self.emp_crossover[i] += rhs.emp_crossover[i];
        }
    }
}

fn write_io(output: &mut Box<dyn Write + Send>, text: &str) -> Result<(), HapmosaicError> {
    output
        .write_all(text.as_bytes())
        .map_err(|e| HapmosaicError::FileOpenFailed {
            path: "<parameter file>".to_string(),
            source: e,
        })
}

/// Format a rate to five significant digits the way C's `%.5g` would,
/// switching to exponent notation for very small or very large magnitudes
/// and trimming trailing zeros.
fn format_rate(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }

    let exponent = value.abs().log10().floor() as i32;

    if exponent < -4 || exponent >= 5 {
        format!("{:.4e}", value)
    } else {
        let decimals = (4 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        fixed
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}
