use std::io::BufRead;

use itertools::Itertools;
use ndarray::{s, Array2};

use crate::model::allele;
use crate::utils::errors::HapmosaicError;
use crate::utils::file_utils;

/// Chi-square threshold (2x4 table, p ~ 0.001) above which reference and
/// target allele frequencies are reported as mismatched.
const FREQUENCY_MISMATCH_CHISQ: f64 = 15.13;

/// One marker whose allele frequencies disagree between two panels.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyMismatch {
    pub marker: usize,
    /// The disagreement shrinks when this panel's alleles are
    /// reverse-complemented, pointing at a strand flip rather than a real
    /// frequency difference.
    pub strand_flip: bool,
    pub chisq: f64,
}

/**
 * A panel of phased haplotypes over a fixed marker list.
 *
 * Owns the `count x marker_count` matrix of encoded alleles, one label per
 * haplotype (consecutive equal labels denote the two haplotypes of one
 * diploid individual), the per-marker allele frequency table and the major
 * allele at every marker. The allele matrix is shared read-only across
 * imputation workers, so everything mutable during a run lives elsewhere.
 */
pub struct HaplotypePanel {
    pub count: usize,
    pub marker_count: usize,
    pub labels: Vec<String>,
    pub alleles: Array2<u8>,
    pub freq: Array2<f32>,
    pub major: Vec<u8>,
    pub translate: bool,
}

impl HaplotypePanel {
    pub fn new(marker_count: usize) -> HaplotypePanel {
        HaplotypePanel {
            count: 0,
            marker_count,
            labels: Vec::new(),
            alleles: Array2::zeros((0, marker_count)),
            freq: Array2::zeros((5, marker_count)),
            major: vec![0; marker_count],
            translate: true,
        }
    }

    /// One haplotype as a contiguous row of allele codes.
    pub fn haplotype(&self, index: usize) -> &[u8] {
        self.alleles.row(index).to_slice().unwrap()
    }

    /// Row views over every haplotype, in panel order. Workers index this
    /// directly, or filter it to build a leave-one-out panel without copying
    /// any allele data.
    pub fn haplotype_rows(&self) -> Vec<&[u8]> {
        self.alleles
            .outer_iter()
            .map(|row| row.to_slice().unwrap())
            .collect()
    }

    /// Load phased haplotypes from a whitespace-separated text stream in two
    /// passes: first count the non-blank records, then decode them.
    ///
    /// Each record is a label followed by tokens whose concatenated allele
    /// characters must equal the marker count exactly.
    pub fn load_haplotypes<R: BufRead>(
        &mut self,
        file: R,
        allow_missing: bool,
    ) -> Result<(), HapmosaicError> {
        // Don't load haplotypes unless we have a marker list
        if self.marker_count == 0 {
            warn!("Since no marker list was provided, the haplotype file will be ignored");
            return Ok(());
        }

        let mut lines = Vec::new();
        for line in file.lines() {
            let line = line.map_err(|e| HapmosaicError::FileOpenFailed {
                path: "<haplotype stream>".to_string(),
                source: e,
            })?;
            lines.push(line);
        }

        // First pass simply counts the number of non-blank records
        self.count = lines
            .iter()
            .filter(|line| line.split_whitespace().next().is_some())
            .count();

        if self.count == 0 {
            return Ok(());
        }

        self.alleles = Array2::zeros((self.count, self.marker_count));
        self.labels = vec![String::new(); self.count];

        // Second pass decodes the data
        let mut index = 0;
        for (line_number, line) in lines.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();

            if tokens.is_empty() {
                continue;
            }

            self.labels[index] = tokens[0].to_string();

            // Walk backwards from the last token until the trailing tokens
            // concatenate to exactly marker_count allele characters.
            let mut hapstart = tokens.len() - 1;
            let mut offset = self.marker_count as i64 - tokens[hapstart].len() as i64;
            while offset > 0 && hapstart > 0 {
                hapstart -= 1;
                offset -= tokens[hapstart].len() as i64;
            }

            if offset != 0 {
                return Err(HapmosaicError::MarkerCountMismatch {
                    haplotype: index + 1,
                    line: line_number + 1,
                });
            }

            for (i, ch) in tokens[hapstart..]
                .iter()
                .flat_map(|token| token.bytes())
                .enumerate()
            {
                self.alleles[[index, i]] = allele::encode(ch, self.translate, allow_missing)?;
            }

            index += 1;
        }

        Ok(())
    }

    pub fn load_haplotypes_from_path(
        &mut self,
        path: &str,
        allow_missing: bool,
    ) -> Result<(), HapmosaicError> {
        let file = file_utils::reader(path)?;
        self.load_haplotypes(file, allow_missing)
    }

    /**
     * Retain only the markers in `[first, last]`, clamping both endpoints to
     * the panel and collapsing to a single marker when first > last.
     *
     * @return the clamped endpoints actually used
     */
    pub fn clip_haplotypes(&mut self, first: isize, last: isize) -> (usize, usize) {
        let mut first = if first < 0 { 0 } else { first as usize };

        let last = if last < 0 || last as usize >= self.marker_count - 1 {
            self.marker_count - 1
        } else {
            last as usize
        };

        if first > last {
            first = last;
        }

        let new_marker_count = last - first + 1;

        self.alleles = self.alleles.slice(s![.., first..=last]).to_owned();
        self.marker_count = new_marker_count;
        self.freq = Array2::zeros((5, new_marker_count));
        self.major = vec![0; new_marker_count];

        (first, last)
    }

    /// Count each observed allele per marker and normalize the columns with
    /// any observations to sum to one. Columns with no observations stay
    /// zero.
    pub fn calculate_frequencies(&mut self) {
        self.freq = Array2::zeros((5, self.marker_count));

        for i in 0..self.count {
            for j in 0..self.marker_count {
                let al = self.alleles[[i, j]];
                if al != allele::MISSING {
                    self.freq[[al as usize, j]] += 1.0;
                }
            }
        }

        for j in 0..self.marker_count {
            let sum: f64 = (1..5).map(|a| self.freq[[a, j]] as f64).sum();

            if sum == 0.0 {
                continue;
            }

            let scale = 1.0 / sum;
            for a in 1..5 {
                self.freq[[a, j]] = (self.freq[[a, j]] as f64 * scale) as f32;
            }
        }
    }

    /// Record the most frequent allele at every marker; ties go to the
    /// larger allele code.
    pub fn list_major_alleles(&mut self) {
        for j in 0..self.marker_count {
            let mut counts = [0usize; 5];

            for i in 0..self.count {
                counts[self.alleles[[i, j]] as usize] += 1;
            }

            let mut major = 1;
            for a in 2..5 {
                if counts[a] >= counts[major] {
                    major = a;
                }
            }

            self.major[j] = major as u8;
        }
    }

    /// Label of the highest-frequency allele at a marker.
    pub fn major_allele_label(&self, marker: usize) -> &'static str {
        let mut hi = 1;
        for a in 2..5 {
            if self.freq[[a, marker]] >= self.freq[[hi, marker]] {
                hi = a;
            }
        }

        allele::label(hi as u8)
    }

    /// Label of the second most frequent allele at a marker, skipping codes
    /// that were never observed.
    pub fn minor_allele_label(&self, marker: usize) -> &'static str {
        let mut hi = 1;
        for a in 2..5 {
            if self.freq[[a, marker]] >= self.freq[[hi, marker]] {
                hi = a;
            }
        }

        let mut lo = if hi == 1 { 2 } else { 1 };
        while self.freq[[lo, marker]] == 0.0 && lo < 4 {
            lo += 1;
        }

        for a in lo + 1..5 {
            if a != hi && self.freq[[a, marker]] > self.freq[[lo, marker]] {
                lo = a;
            }
        }

        allele::label(lo as u8)
    }

    /**
     * Compare this panel's allele frequencies against another panel (the
     * reference), marker by marker, reporting markers whose frequencies are
     * incompatible. The same test is repeated with this panel's alleles
     * reverse-complemented; when the flipped table fits better the marker is
     * flagged as a possible strand flip rather than a plain mismatch.
     *
     * @param index  for every marker of this panel, the matching position in
     *               `other`, or a negative value when absent
     * @return the markers found to mismatch, in marker order
     */
    pub fn compare_frequencies(
        &self,
        other: &HaplotypePanel,
        index: &[i32],
        names: &[String],
    ) -> Vec<FrequencyMismatch> {
        let mut problems = Vec::new();

        for i in 0..self.marker_count {
            if index[i] < 0 {
                continue;
            }
            let other_marker = index[i] as usize;

            let known_count = (0..self.count)
                .filter(|&j| self.alleles[[j, i]] != allele::MISSING)
                .count() as f64;
            let other_known_count = (0..other.count)
                .filter(|&j| other.alleles[[j, other_marker]] != allele::MISSING)
                .count() as f64;

            let mut chisq = 0.0;
            for a in 1..5 {
                let f1 = self.freq[[a, i]] as f64;
                let f2 = other.freq[[a, other_marker]] as f64;

                if f1 + f2 > 0.0 {
                    let total = f1 * known_count + f2 * other_known_count;
                    let expected = total / (known_count + other_known_count) * known_count;
                    let delta = f1 * known_count - expected;

                    chisq += delta * delta / expected + delta * delta / (total - expected);
                }
            }

            let mut chisq_after_strand_flip = 0.0;
            for a in 1..5 {
                let f1 = self.freq[[allele::flipped(a as u8) as usize, i]] as f64;
                let f2 = other.freq[[a, other_marker]] as f64;

                if f1 + f2 > 0.0 {
                    let total = f1 * known_count + f2 * other_known_count;
                    let expected = total / (known_count + other_known_count) * known_count;
                    let delta = f1 * known_count - expected;

                    chisq_after_strand_flip +=
                        delta * delta / expected + delta * delta / (total - expected);
                }
            }

            if chisq > FREQUENCY_MISMATCH_CHISQ {
                let strand_flip = chisq_after_strand_flip < chisq;
                let shared: Vec<usize> = (1..5)
                    .filter(|&a| {
                        self.freq[[a, i]] + other.freq[[a, other_marker]] > 0.0
                    })
                    .collect();

                let alleles = shared.iter().map(|&a| allele::label(a as u8)).join(",");
                let freq1 = shared
                    .iter()
                    .map(|&a| format!("{:.2}", self.freq[[a, i]]))
                    .join(",");
                let freq2 = shared
                    .iter()
                    .map(|&a| format!("{:.2}", other.freq[[a, other_marker]]))
                    .join(",");

                warn!(
                    "{} for '{}': f[{}] = [{}] vs [{}], chisq {:.1}",
                    if strand_flip {
                        "Possible strand flip"
                    } else {
                        "Mismatched frequencies"
                    },
                    names[i],
                    alleles,
                    freq1,
                    freq2,
                    chisq
                );

                problems.push(FrequencyMismatch {
                    marker: i,
                    strand_flip,
                    chisq,
                });
            }
        }

        if !problems.is_empty() {
            warn!(
                "{} markers with potential frequency mismatches",
                problems.len()
            );
        }

        problems
    }
}
