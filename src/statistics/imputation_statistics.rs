use crate::model::allele;

/**
 * Per-marker accumulators for imputation quality, fed once per imputed
 * haplotype and merged under the driver's lock.
 *
 * The full-cohort accumulators cover every marker; the leave-one-out
 * accumulators are restricted to markers where the haplotype was actually
 * genotyped, so they measure how well the model recovers known alleles when
 * their own observation is discounted.
 */
pub struct ImputationStatistics {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    sum_call: Vec<f64>,
    count: Vec<usize>,

    loo_sum: Vec<f64>,
    loo_sum_sq: Vec<f64>,
    loo_product: Vec<f64>,
    loo_observed: Vec<f64>,
    loo_count: Vec<usize>,
}

impl ImputationStatistics {
    pub fn new(markers: usize) -> ImputationStatistics {
        ImputationStatistics {
            sum: vec![0.0; markers],
            sum_sq: vec![0.0; markers],
            sum_call: vec![0.0; markers],
            count: vec![0; markers],
            loo_sum: vec![0.0; markers],
            loo_sum_sq: vec![0.0; markers],
            loo_product: vec![0.0; markers],
            loo_observed: vec![0.0; markers],
            loo_count: vec![0; markers],
        }
    }

    pub fn update(&mut self, doses: &[f64], leave_one_out: &[f64], observed: &[u8], major: &[u8]) {
        for i in 0..doses.len() {
            self.sum[i] += doses[i];
            self.sum_sq[i] += doses[i] * doses[i];
            self.sum_call[i] += if doses[i] > 0.5 {
                doses[i]
            } else {
                1.0 - doses[i]
            };
            self.count[i] += 1;
        }

        for i in 0..leave_one_out.len() {
            if observed[i] != allele::MISSING {
                self.loo_sum[i] += leave_one_out[i];
                self.loo_sum_sq[i] += leave_one_out[i] * leave_one_out[i];
                if observed[i] == major[i] {
                    self.loo_product[i] += leave_one_out[i];
                    self.loo_observed[i] += 1.0;
                }
                self.loo_count[i] += 1;
            }
        }
    }

    /// Ratio of the observed dose variance to the expected binomial variance
    /// under the imputed allele frequency.
    pub fn rsq(&self, marker: usize) -> f64 {
        if self.count[marker] < 2 {
            return 0.0;
        }

        let n = self.count[marker] as f64;
        let f = self.sum[marker] / (n + 1e-30);
        let expected_variance = f * (1.0 - f);
        let observed_variance =
            (self.sum_sq[marker] - self.sum[marker] * self.sum[marker] / (n + 1e-30))
                / (n - 1.0 + 1e-30);

        observed_variance / (expected_variance + 1e-30)
    }

    /// `rsq` over the leave-one-out doses at genotyped markers.
    pub fn loo_rsq(&self, marker: usize) -> f64 {
        if self.loo_count[marker] < 2 {
            return 0.0;
        }

        let n = self.loo_count[marker] as f64;
        let f = self.loo_sum[marker] / (n + 1e-30);
        let expected_variance = f * (1.0 - f);
        let observed_variance =
            (self.loo_sum_sq[marker] - self.loo_sum[marker] * self.loo_sum[marker] / (n + 1e-30))
                / (n - 1.0 + 1e-30);

        observed_variance / (expected_variance + 1e-30)
    }

    pub fn allele_frequency(&self, marker: usize) -> f64 {
        if self.count[marker] < 2 {
            return 0.0;
        }

        self.sum[marker] / (self.count[marker] as f64 + 1e-30)
    }

    /// Pearson correlation between the leave-one-out dose and the indicator
    /// of actually carrying the major allele.
    pub fn empirical_r(&self, marker: usize) -> f64 {
        if self.loo_count[marker] < 2 {
            return 0.0;
        }

        let n = self.loo_count[marker] as f64;

        // n * Sum xy - Sum x * Sum y
        let p = n * self.loo_product[marker] - self.loo_sum[marker] * self.loo_observed[marker];

        // sqrt(n * Sum xx - Sum x * Sum x)
        let qx =
            (n * self.loo_sum_sq[marker] - self.loo_sum[marker] * self.loo_sum[marker]).sqrt();
        let qy = (n * self.loo_observed[marker]
            - self.loo_observed[marker] * self.loo_observed[marker])
            .sqrt();

        if qx / (qy + 1e-30) < 1e-3 {
            return 0.0;
        }

        p / (qx * qy + 1e-30)
    }

    pub fn empirical_rsq(&self, marker: usize) -> f64 {
        let r = self.empirical_r(marker);

        r * r
    }

    /// Mean leave-one-out dose over haplotypes that carry the major allele.
    pub fn loo_major_dose(&self, marker: usize) -> f64 {
        self.loo_product[marker] / (self.loo_observed[marker] + 1e-30)
    }

    /// Mean leave-one-out dose over haplotypes that carry a minor allele.
    pub fn loo_minor_dose(&self, marker: usize) -> f64 {
        (self.loo_sum[marker] - self.loo_product[marker])
            / (self.loo_count[marker] as f64 - self.loo_observed[marker] + 1e-30)
    }

    pub fn average_call_score(&self, marker: usize) -> f64 {
        self.sum_call[marker] / (self.count[marker] as f64 + 1e-30)
    }
}
