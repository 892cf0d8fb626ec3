extern crate hapmosaic;

use approx::assert_relative_eq;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use hapmosaic::hmm::markov_engine::MarkovEngine;
use hapmosaic::model::haplotype_panel::HaplotypePanel;

fn panel_from_rows(rows: &[&[u8]]) -> HaplotypePanel {
    let marker_count = rows[0].len();
    let mut panel = HaplotypePanel::new(marker_count);

    panel.count = rows.len();
    panel.labels = (0..rows.len()).map(|i| format!("HAP{}", i + 1)).collect();
    panel.alleles = Array2::from_shape_fn((rows.len(), marker_count), |(i, j)| rows[i][j]);
    panel.calculate_frequencies();
    panel.list_major_alleles();

    panel
}

fn engine_for(panel: &HaplotypePanel, states: usize, e: f64, r: f64) -> MarkovEngine {
    let mut engine = MarkovEngine::new(panel.marker_count, states);
    engine.parameters.error_rates = vec![e; panel.marker_count];
    engine.parameters.crossover_rates = vec![r; panel.marker_count.saturating_sub(1)];
    engine
}

#[test]
fn a_panel_haplotype_imputes_back_to_itself() {
    // Two identical reference haplotypes and a target equal to them: every
    // position should come back with near-certainty
    let panel = panel_from_rows(&[&[1, 2, 3, 1], &[1, 2, 3, 1]]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 3, 1];

    let mut engine = engine_for(&panel, 2, 0.01, 0.0);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    assert_eq!(&engine.imputed_alleles, b"acga");
    for m in 0..4 {
        assert!(engine.imputed_hap[m] >= 0.99 && engine.imputed_hap[m] <= 1.0);
    }
}

#[test]
fn a_distinct_haplotype_imputes_to_its_own_alleles_without_noise() {
    // With zero error and crossover rates, a target identical to one panel
    // haplotype must reproduce that haplotype's alleles at every marker
    let panel = panel_from_rows(&[&[1, 2, 3, 1], &[2, 1, 1, 2]]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 3, 1];

    let mut engine = engine_for(&panel, 2, 0.0, 0.0);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    assert_eq!(&engine.imputed_alleles, b"acga");
}

#[test]
fn a_missing_site_is_filled_from_the_panel() {
    // Every reference haplotype carries G at the masked site
    let panel = panel_from_rows(&[
        &[1, 2, 3, 4, 1],
        &[1, 2, 3, 4, 1],
        &[1, 2, 3, 4, 1],
        &[1, 2, 3, 4, 1],
    ]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 0, 4, 1];

    let mut engine = engine_for(&panel, 4, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    assert_eq!(engine.imputed_alleles[2], b'g');
    assert!(engine.imputed_hap[2] > 0.99);
}

#[test]
fn the_mle_scan_never_reports_t() {
    // The maximum-likelihood allele scan stops at G, so a T-dominant site is
    // labeled 'g' even though the major-allele dose is still computed from T
    let panel = panel_from_rows(&[&[4, 4], &[4, 4]]);
    let rows = panel.haplotype_rows();
    let observed = [4u8, 4];

    let mut engine = engine_for(&panel, 2, 0.01, 0.0);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    assert_eq!(&engine.imputed_alleles, b"gg");
    for m in 0..2 {
        assert!(engine.imputed_hap[m] > 0.99);
    }
}

#[test]
fn imputed_quantities_stay_in_range() {
    let panel = panel_from_rows(&[
        &[1, 2, 3, 4, 1, 2],
        &[2, 2, 1, 4, 3, 2],
        &[1, 4, 3, 2, 1, 1],
    ]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 0, 3, 2, 0, 1];

    let mut engine = engine_for(&panel, 3, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    for m in 0..panel.marker_count {
        assert!(engine.imputed_hap[m] >= 0.0 && engine.imputed_hap[m] <= 1.0);
        assert!(engine.leave_one_out[m] >= 0.0 && engine.leave_one_out[m] <= 1.0);
        assert!(b"acgt".contains(&engine.imputed_alleles[m]));
    }
}

#[test]
fn forward_likelihoods_stay_finite_and_non_negative() {
    let panel = panel_from_rows(&[
        &[1, 2, 3, 4, 1, 2, 3, 4],
        &[4, 3, 2, 1, 4, 3, 2, 1],
        &[1, 1, 2, 2, 3, 3, 4, 4],
    ]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 3, 2, 1, 4, 3, 0, 4];

    let mut engine = engine_for(&panel, 3, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);

    for m in 0..panel.marker_count {
        for s in 0..3 {
            let value = engine.forward_likelihood(m, s);
            assert!(value.is_finite());
            assert!(value >= 0.0);
        }
    }
}

#[test]
fn underflow_is_rescaled_away_on_long_mismatched_walks() {
    // A target that disagrees with the whole panel at every one of many
    // markers drives the likelihood product far below f32 range; the
    // transition rescaling must keep the matrix finite and positive
    let reference_row = vec![1u8; 60];
    let panel = panel_from_rows(&[&reference_row, &reference_row]);
    let rows = panel.haplotype_rows();
    let observed = vec![2u8; 60];

    let mut engine = engine_for(&panel, 2, 0.001, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);

    for m in 0..60 {
        let mut row_sum = 0.0f64;
        for s in 0..2 {
            let value = engine.forward_likelihood(m, s);
            assert!(value.is_finite());
            assert!(value >= 0.0);
            row_sum += value as f64;
        }
        assert!(row_sum > 0.0);
    }
}

#[test]
fn missing_observations_leave_the_forward_matrix_uniform() {
    let panel = panel_from_rows(&[&[1, 2, 3, 4], &[4, 3, 2, 1]]);
    let rows = panel.haplotype_rows();
    let observed = [0u8, 0, 0, 0];

    let mut engine = engine_for(&panel, 2, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);

    for m in 0..4 {
        for s in 0..2 {
            assert_relative_eq!(engine.forward_likelihood(m, s), 1.0, epsilon = 1e-6);
        }
    }
}

#[test]
fn odd_state_counts_pad_with_a_zero_column() {
    let panel = panel_from_rows(&[&[1, 2, 3], &[2, 3, 4], &[3, 4, 1]]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 3];

    let mut engine = engine_for(&panel, 3, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    for m in 0..3 {
        assert_eq!(engine.forward_likelihood(m, 3), 0.0);
    }
}

#[test]
fn dose_accumulates_across_haplotypes_until_cleared() {
    let panel = panel_from_rows(&[&[1, 1], &[1, 1]]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 1];

    let mut engine = engine_for(&panel, 2, 0.01, 0.0);

    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.impute(&panel.major, &observed, &rows, &panel.freq);

    // Two haplotypes of one individual sum toward a diploid dose of two
    for m in 0..2 {
        assert!(engine.imputed_dose[m] > 1.99 && engine.imputed_dose[m] <= 2.0);
    }

    engine.clear_imputed_dose();
    assert_eq!(engine.imputed_dose, vec![0.0, 0.0]);
}

#[test]
fn expected_counts_are_zero_for_a_noiseless_perfect_copy() {
    let panel = panel_from_rows(&[&[1, 2, 3, 1], &[2, 1, 1, 2]]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 3, 1];

    let mut engine = engine_for(&panel, 2, 0.0, 0.0);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.count_expected(&observed, &rows, &panel.freq);

    assert_eq!(engine.parameters.empirical_count, 1);
    for value in engine.parameters.emp_error.iter() {
        assert_relative_eq!(*value, 0.0, epsilon = 1e-12);
    }
    for value in engine.parameters.emp_crossover.iter() {
        assert_relative_eq!(*value, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn expected_counts_accumulate_finite_mass_under_noise() {
    let panel = panel_from_rows(&[
        &[1, 2, 3, 4, 1],
        &[2, 2, 1, 4, 3],
        &[1, 4, 3, 2, 1],
        &[4, 2, 3, 2, 4],
    ]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 0, 4, 1];

    let mut engine = engine_for(&panel, 4, 0.01, 0.001);
    engine.walk_left(&observed, &rows, &panel.freq);
    engine.count_expected(&observed, &rows, &panel.freq);

    assert_eq!(engine.parameters.empirical_count, 1);
    for value in engine.parameters.emp_error.iter() {
        assert!(value.is_finite() && *value >= 0.0);
    }
    for value in engine.parameters.emp_crossover.iter() {
        assert!(value.is_finite() && *value >= 0.0);
    }
    assert!(engine.parameters.empirical_flips >= 0.0);
}

#[test]
fn profile_sampling_is_reproducible_under_a_fixed_seed() {
    let panel = panel_from_rows(&[
        &[1, 2, 3, 4, 1, 2],
        &[2, 2, 1, 4, 3, 2],
        &[1, 4, 3, 2, 1, 1],
        &[4, 2, 3, 2, 4, 4],
    ]);
    let rows = panel.haplotype_rows();
    let observed = [1u8, 2, 3, 0, 1, 2];

    let mut first = engine_for(&panel, 4, 0.01, 0.01);
    first.walk_left(&observed, &rows, &panel.freq);
    let mut rng = StdRng::seed_from_u64(7);
    first.profile_model(&observed, &rows, &panel.freq, &mut rng);

    let mut second = engine_for(&panel, 4, 0.01, 0.01);
    second.walk_left(&observed, &rows, &panel.freq);
    let mut rng = StdRng::seed_from_u64(7);
    second.profile_model(&observed, &rows, &panel.freq, &mut rng);

    assert_eq!(first.parameters.emp_error, second.parameters.emp_error);
    assert_eq!(
        first.parameters.emp_crossover,
        second.parameters.emp_crossover
    );
    assert_eq!(first.parameters.empirical_flips, second.parameters.empirical_flips);
    assert_eq!(first.parameters.empirical_count, 1);
}
