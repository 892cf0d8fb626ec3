use std::cmp::min;
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::hmm::markov_engine::MarkovEngine;
use crate::hmm::markov_parameters::MarkovParameters;
use crate::model::haplotype_panel::HaplotypePanel;
use crate::model::marker_index::{clip_reference, MarkerIndex};
use crate::statistics::imputation_statistics::ImputationStatistics;
use crate::utils::errors::HapmosaicError;
use crate::utils::file_utils;

/// Default mosaic error rate before any refinement.
const INITIAL_ERROR_RATE: f64 = 0.01;
/// Default per-interval crossover rate before any refinement.
const INITIAL_CROSSOVER_RATE: f64 = 0.001;

/**
 * The full imputation run: load the panels, refine the mosaic model over the
 * requested rounds, impute every target haplotype and write the output
 * files.
 *
 * Fatal input problems surface here, before any parallel region begins; the
 * two parallel regions themselves only merge worker results under a lock.
 */
pub fn start_imputation_engine(args: &clap::ArgMatches) -> Result<()> {
    let started = Instant::now();

    let rounds = *args.get_one::<usize>("rounds").unwrap();
    let states = *args.get_one::<usize>("states").unwrap();
    let em = args.get_flag("em");
    let gzip = args.get_flag("gzip");
    let phased = args.get_flag("phased");
    let seed = *args.get_one::<u64>("seed").unwrap();
    let prefix = args.get_one::<String>("prefix").unwrap().clone();
    let mut start = args.get_one::<String>("start").unwrap().clone();
    let mut stop = args.get_one::<String>("stop").unwrap().clone();

    // Read the reference marker list
    info!("Reading reference marker list");

    let mut ref_index = MarkerIndex::new(read_marker_list(
        args.get_one::<String>("refSnps").unwrap(),
    )?);

    info!("{} markers in reference haplotypes", ref_index.len());

    // Load the reference haplotypes
    info!("Loading reference haplotypes");

    let mut reference = HaplotypePanel::new(ref_index.len());
    reference.load_haplotypes_from_path(args.get_one::<String>("refHaps").unwrap(), false)?;

    info!("{} reference haplotypes loaded", reference.count);

    // Read the target marker list
    info!("Reading target marker list");

    let marker_list = read_marker_list(args.get_one::<String>("snps").unwrap())?;

    clip_reference(&mut reference, &mut ref_index, &marker_list, &mut start, &mut stop);

    // Cross-reference target marker names to reference panel positions
    let marker_index: Vec<i32> = marker_list
        .iter()
        .map(|name| match ref_index.position(name) {
            Some(position) => position as i32,
            None => -1,
        })
        .collect();

    let matches = marker_index.iter().filter(|&&index| index >= 0).count();

    info!("{} markers in target haplotypes overlap reference", matches);

    if matches == 0 {
        return Err(HapmosaicError::NoMarkerOverlap.into());
    }

    info!(
        "{} other markers in target haplotypes discarded",
        marker_list.len() - matches
    );

    report_marker_order_changes(&marker_index, &marker_list, &ref_index);

    // Load the target haplotypes, allowing missing sites
    info!("Loading target haplotypes");

    let mut target = HaplotypePanel::new(marker_list.len());
    target.load_haplotypes_from_path(args.get_one::<String>("haps").unwrap(), true)?;

    reference.calculate_frequencies();
    target.calculate_frequencies();
    target.compare_frequencies(&reference, &marker_index, &marker_list);

    info!("{} target haplotypes loaded", target.count);

    // Resolve the output window against the clipped reference
    let start_index = if start.is_empty() {
        0
    } else {
        ref_index
            .position(&start)
            .ok_or(HapmosaicError::ClipEndpointMissing)?
    };
    let stop_index = if stop.is_empty() {
        reference.marker_count - 1
    } else {
        ref_index
            .position(&stop)
            .ok_or(HapmosaicError::ClipEndpointMissing)?
    };

    info!("Setting up the mosaic model");

    let mut parameters = MarkovParameters::new(reference.marker_count);

    if rounds > 0 {
        info!(
            "Initializing model parameters (using {} and up to {} haplotypes)",
            if em { "E-M" } else { "MCMC" },
            states
        );
    }

    // Simple initial estimates of the error and crossover rates
    for rate in parameters.error_rates.iter_mut() {
        *rate = INITIAL_ERROR_RATE;
    }
    for rate in parameters.crossover_rates.iter_mut() {
        *rate = INITIAL_CROSSOVER_RATE;
    }

    if let Some(filename) = args.get_one::<String>("erate") {
        if parameters.read_error_rates(filename) {
            info!("Updated error rates using data in {}", filename);
        } else {
            warn!(
                "Error rate file {} does not match the marker list and was ignored",
                filename
            );
        }
    }

    if let Some(filename) = args.get_one::<String>("rec") {
        if parameters.read_crossover_rates(filename) {
            info!("Updated crossover rates using data in {}", filename);
        } else {
            warn!(
                "Crossover rate file {} does not match the marker list and was ignored",
                filename
            );
        }
    }

    estimate_parameters(
        &mut parameters,
        &reference,
        &target,
        &marker_index,
        rounds,
        states,
        em,
        seed,
    );

    if rounds > 0 {
        info!("Saving estimated parameters for future use");
        parameters.write_parameters(&ref_index.names, &prefix, gzip)?;
    }

    // List the major allele at each location
    reference.list_major_alleles();

    // Mark the reference positions that were genotyped in the target
    let mut genotyped = vec![false; reference.marker_count];
    for &index in marker_index.iter() {
        if index >= 0 {
            genotyped[index as usize] = true;
        }
    }

    write_draft_info(&prefix, &reference, &ref_index, &genotyped, start_index, stop_index)?;

    let statistics = impute_genotypes(
        &parameters,
        &reference,
        &target,
        &marker_index,
        start_index,
        stop_index,
        phased,
        gzip,
        &prefix,
    )?;

    write_info(
        &prefix,
        gzip,
        &reference,
        &ref_index,
        &statistics,
        &genotyped,
        start_index,
        stop_index,
    )?;

    let elapsed = started.elapsed().as_secs();
    info!(
        "Run completed in {} hours, {} mins, {} seconds",
        elapsed / 3600,
        (elapsed % 3600) / 60,
        elapsed % 60
    );

    Ok(())
}

fn read_marker_list(filename: &str) -> Result<Vec<String>, HapmosaicError> {
    Ok(file_utils::read_lines(filename)?
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect())
}

/// Warn when target markers occur in a different order than the reference;
/// only the first few pairs are listed individually.
fn report_marker_order_changes(
    marker_index: &[i32],
    marker_list: &[String],
    ref_index: &MarkerIndex,
) {
    let mut changes = 0;
    let mut previous: i64 = -1;

    for (i, &index) in marker_index.iter().enumerate() {
        if index < 0 {
            continue;
        }

        if (index as i64) < previous {
            changes += 1;
            if changes <= 10 {
                warn!(
                    "Marker {} precedes {} in reference, but follows it in target",
                    ref_index.name(previous as usize),
                    marker_list[i].trim()
                );
            }
        }
        previous = index as i64;
    }

    if changes > 10 {
        warn!("{} additional marker order changes not listed", changes - 10);
    }
    if changes > 0 {
        warn!(
            "{} marker pairs change order in target vs reference haplotypes",
            changes
        );
    }
}

/// Deterministic per-worker seed so serial runs reproduce exactly and
/// parallel runs differ only through merge order.
fn worker_seed(master: u64, round: usize, region: u64, worker: usize) -> u64 {
    master
        .wrapping_add((round as u64) << 40)
        .wrapping_add(region << 32)
        .wrapping_add(worker as u64)
}

/**
 * The parameter refinement loop. Each round trains on up to `states`
 * reference haplotypes against the rest of the panel (leave one out) and,
 * once half the rounds have passed, additionally on up to `states` target
 * haplotypes against the full panel. Worker contributions are merged by
 * reduction, then folded into fresh rates.
 */
#[allow(clippy::too_many_arguments)]
fn estimate_parameters(
    parameters: &mut MarkovParameters,
    reference: &HaplotypePanel,
    target: &HaplotypePanel,
    marker_index: &[i32],
    rounds: usize,
    states: usize,
    em: bool,
    seed: u64,
) {
    for round in 0..rounds {
        info!("Round {} of parameter refinement", round + 1);

        let mut original = MarkovParameters::new(reference.marker_count);
        original.copy_parameters(parameters);

        let iterations = min(states, reference.count);

        let contributions = (0..iterations)
            .into_par_iter()
            .map(|i| {
                let mut engine = MarkovEngine::new(reference.marker_count, reference.count - 1);
                engine.parameters.copy_parameters(&original);

                // Leave-one-out panel over row views, no allele data copied
                let panel: Vec<&[u8]> = (0..reference.count)
                    .filter(|&h| h != i)
                    .map(|h| reference.haplotype(h))
                    .collect();

                let observed = reference.haplotype(i);

                engine.walk_left(observed, &panel, &reference.freq);

                if em {
                    engine.count_expected(observed, &panel, &reference.freq);
                } else {
                    let mut rng = StdRng::seed_from_u64(worker_seed(seed, round, 0, i));
                    engine.profile_model(observed, &panel, &reference.freq, &mut rng);
                }

                engine.parameters
            })
            .reduce(
                || MarkovParameters::new(reference.marker_count),
                |mut merged, contribution| {
                    merged += &contribution;
                    merged
                },
            );

        *parameters += &contributions;

        if round >= rounds / 2 {
            let iterations = min(states, target.count);

            let contributions = (0..iterations)
                .into_par_iter()
                .map(|i| {
                    let mut engine = MarkovEngine::new(reference.marker_count, reference.count);
                    engine.parameters.copy_parameters(&original);

                    let panel = reference.haplotype_rows();

                    // Padded version of the target haplotype, with missing
                    // alleles at reference-only sites
                    let mut padded = vec![0u8; reference.marker_count];
                    for (j, &index) in marker_index.iter().enumerate() {
                        if index >= 0 {
                            padded[index as usize] = target.alleles[[i, j]];
                        }
                    }

                    engine.walk_left(&padded, &panel, &reference.freq);

                    if em {
                        engine.count_expected(&padded, &panel, &reference.freq);
                    } else {
                        let mut rng = StdRng::seed_from_u64(worker_seed(seed, round, 1, i));
                        engine.profile_model(&padded, &panel, &reference.freq, &mut rng);
                    }

                    engine.parameters
                })
                .reduce(
                    || MarkovParameters::new(reference.marker_count),
                    |mut merged, contribution| {
                        merged += &contribution;
                        merged
                    },
                );

            *parameters += &contributions;
        }

        parameters.update_model();

        let crossovers: f64 = parameters.crossover_rates.iter().sum();

        let mut errors = 0.0;
        for m in 0..reference.marker_count {
            let heterozygosity = 1.0
                - (1..5)
                    .map(|a| (reference.freq[[a, m]] as f64).powi(2))
                    .sum::<f64>();
            errors += parameters.error_rates[m] * heterozygosity;
        }
        errors /= reference.marker_count as f64 + 1e-30;

        info!("{:.0} mosaic crossovers expected per haplotype", crossovers);
        info!(
            "{:.1}% of crossovers are due to flips between sibling haplotypes",
            parameters.empirical_flip_rate * 100.0
        );
        info!("{:.3e} errors in mosaic expected per marker", errors);
    }
}

fn write_draft_info(
    prefix: &str,
    reference: &HaplotypePanel,
    ref_index: &MarkerIndex,
    genotyped: &[bool],
    start_index: usize,
    stop_index: usize,
) -> Result<()> {
    info!("Generating draft info file");

    let path = format!("{}.info.draft", prefix);
    let mut info = file_utils::writer(&path, false)?;

    writeln!(info, "SNP\tAl1\tAl2\tFreq1\tGenotyped").context("writing draft info file")?;

    for i in start_index..=stop_index {
        writeln!(
            info,
            "{}\t{}\t{}\t{:.4}\t{}",
            ref_index.name(i),
            reference.major_allele_label(i),
            reference.minor_allele_label(i),
            reference.freq[[reference.major[i] as usize, i]],
            if genotyped[i] { "Genotyped" } else { "-" }
        )
        .context("writing draft info file")?;
    }

    Ok(())
}

/**
 * Impute every target haplotype against the reference panel, parallel over
 * individuals. The two haplotypes of one individual run sequentially inside
 * one task so their doses accumulate into a single output line.
 */
#[allow(clippy::too_many_arguments)]
fn impute_genotypes(
    parameters: &MarkovParameters,
    reference: &HaplotypePanel,
    target: &HaplotypePanel,
    marker_index: &[i32],
    start_index: usize,
    stop_index: usize,
    phased: bool,
    gzip: bool,
    prefix: &str,
) -> Result<ImputationStatistics> {
    info!("Imputing genotypes");

    let suffix = if gzip { ".gz" } else { "" };

    let dosages = Mutex::new(file_utils::writer(
        &format!("{}.dose{}", prefix, suffix),
        gzip,
    )?);

    let phased_files = if phased {
        Some((
            Mutex::new(file_utils::writer(
                &format!("{}.hapDose{}", prefix, suffix),
                gzip,
            )?),
            Mutex::new(file_utils::writer(
                &format!("{}.haps{}", prefix, suffix),
                gzip,
            )?),
        ))
    } else {
        None
    };

    let statistics = Mutex::new(ImputationStatistics::new(reference.marker_count));

    // Adjacent haplotypes with the same label belong to one individual
    let mut individuals: Vec<(usize, usize)> = Vec::new();
    let mut first = 0;
    while first < target.count {
        let mut next = first + 1;
        while next < target.count && target.labels[next] == target.labels[first] {
            next += 1;
        }
        individuals.push((first, next));
        first = next;
    }

    let panel = reference.haplotype_rows();

    individuals
        .par_iter()
        .try_for_each(|&(first, last)| -> Result<()> {
            let mut engine = MarkovEngine::new(reference.marker_count, reference.count);
            engine.parameters.copy_parameters(parameters);
            engine.clear_imputed_dose();

            let mut padded = vec![0u8; reference.marker_count];

            for k in first..last {
                info!("Processing haplotype {} of {}", k + 1, target.count);

                for (j, &index) in marker_index.iter().enumerate() {
                    if index >= 0 {
                        padded[index as usize] = target.alleles[[k, j]];
                    }
                }

                engine.walk_left(&padded, &panel, &reference.freq);
                engine.impute(&reference.major, &padded, &panel, &reference.freq);

                {
                    let mut statistics = statistics.lock().unwrap();
                    statistics.update(
                        &engine.imputed_hap,
                        &engine.leave_one_out,
                        &padded,
                        &reference.major,
                    );
                }

                if let Some((hapdose, haps)) = &phased_files {
                    let mut hapdose = hapdose.lock().unwrap();
                    let mut haps = haps.lock().unwrap();

                    write!(hapdose, "{}\tHAPLO{}", target.labels[first], k - first + 1)?;
                    write!(haps, "{}\tHAPLO{}", target.labels[first], k - first + 1)?;
                    for j in start_index..=stop_index {
                        write!(hapdose, "\t{:.3}", engine.imputed_hap[j])?;
                        write!(
                            haps,
                            "{}{}",
                            if j % 8 == 0 { " " } else { "" },
                            engine.imputed_alleles[j] as char
                        )?;
                    }
                    writeln!(hapdose)?;
                    writeln!(haps)?;
                }
            }

            info!("Outputting individual {}", target.labels[first]);

            let mut dosages = dosages.lock().unwrap();
            write!(dosages, "{}\tDOSE", target.labels[first])?;
            for j in start_index..=stop_index {
                write!(dosages, "\t{:.3}", engine.imputed_dose[j])?;
            }
            writeln!(dosages)?;

            Ok(())
        })?;

    Ok(statistics.into_inner().unwrap())
}

#[allow(clippy::too_many_arguments)]
fn write_info(
    prefix: &str,
    gzip: bool,
    reference: &HaplotypePanel,
    ref_index: &MarkerIndex,
    statistics: &ImputationStatistics,
    genotyped: &[bool],
    start_index: usize,
    stop_index: usize,
) -> Result<()> {
    let suffix = if gzip { ".gz" } else { "" };
    let mut info = file_utils::writer(&format!("{}.info{}", prefix, suffix), gzip)?;

    writeln!(
        info,
        "SNP\tAl1\tAl2\tFreq1\tMAF\tAvgCall\tRsq\tGenotyped\tLooRsq\tEmpR\tEmpRsq\tDose1\tDose2"
    )
    .context("writing info file")?;

    for i in start_index..=stop_index {
        let frequency = statistics.allele_frequency(i);
        let maf = if frequency > 0.5 {
            1.0 - frequency
        } else {
            frequency
        };

        write!(
            info,
            "{}\t{}\t{}\t{:.5}\t{:.5}\t{:.5}\t{:.5}\t",
            ref_index.name(i),
            reference.major_allele_label(i),
            reference.minor_allele_label(i),
            frequency,
            maf,
            statistics.average_call_score(i),
            statistics.rsq(i)
        )
        .context("writing info file")?;

        if genotyped[i] {
            writeln!(
                info,
                "Genotyped\t{:.5}\t{:.5}\t{:.5}\t{:.5}\t{:.5}",
                statistics.loo_rsq(i),
                statistics.empirical_r(i),
                statistics.empirical_rsq(i),
                statistics.loo_major_dose(i),
                statistics.loo_minor_dose(i)
            )
            .context("writing info file")?;
        } else {
            writeln!(info, "-\t-\t-\t-\t-\t-").context("writing info file")?;
        }
    }

    Ok(())
}
