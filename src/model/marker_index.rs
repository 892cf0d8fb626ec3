use std::collections::HashMap;

use crate::model::haplotype_panel::HaplotypePanel;

/// Ordered marker names with a unique-name to position lookup. Rebuilt
/// whenever the reference panel is clipped.
pub struct MarkerIndex {
    pub names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl MarkerIndex {
    pub fn new(names: Vec<String>) -> MarkerIndex {
        let names: Vec<String> = names.into_iter().map(|n| n.trim().to_string()).collect();
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        MarkerIndex { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name.trim()).copied()
    }

    pub fn name(&self, position: usize) -> &str {
        &self.names[position]
    }
}

/**
 * Clip the reference panel down to the window spanned by the target markers
 * and the optional `start`/`stop` marker names, rebuilding the marker index
 * to match.
 *
 * When an endpoint is named but absent from the reference it is replaced by
 * the nearest target marker that follows it (for `start`) or the rightmost
 * target marker after it (for `stop`) and is present in the reference; if no
 * replacement exists the panel is left unchanged. The endpoint names are
 * rewritten in place so the caller can resolve the final window against the
 * rebuilt index.
 */
pub fn clip_reference(
    reference: &mut HaplotypePanel,
    index: &mut MarkerIndex,
    target_markers: &[String],
    start: &mut String,
    stop: &mut String,
) {
    // If no clipping was requested, there is nothing to do
    if start.is_empty() && stop.is_empty() {
        return;
    }

    // Find the stretch of target that overlaps with the reference and, at the
    // same time, keep track of the overlapping marker nearest each suggested
    // endpoint.
    let mut first_match = reference.marker_count as i64;
    let mut last_match: i64 = -1;
    let mut match_start = false;
    let mut match_stop = false;
    let mut new_start = String::new();
    let mut new_stop = String::new();

    for name in target_markers {
        let trimmed = name.trim();

        if *start == trimmed {
            match_start = true;
        }
        if *stop == trimmed {
            match_stop = true;
        }

        let position = match index.position(trimmed) {
            Some(position) => position as i64,
            None => continue,
        };

        if position < first_match {
            first_match = position;
        }
        if position > last_match {
            last_match = position;
        }

        if match_start {
            new_start = trimmed.to_string();
            match_start = false;
        }

        if match_stop {
            new_stop = trimmed.to_string();
            match_stop = false;
        }
    }

    // Endpoints missing from the reference are replaced using the target list
    let mut start_index = match index.position(start) {
        Some(position) => position as i64,
        None => -1,
    };

    if start_index < 0 && !start.is_empty() {
        if new_start.is_empty() {
            return;
        }

        *start = new_start;
        start_index = index.position(start).map(|p| p as i64).unwrap_or(-1);
    }
    if first_match > start_index {
        first_match = start_index;
    }

    let mut stop_index = match index.position(stop) {
        Some(position) => position as i64,
        None => -1,
    };

    if stop_index < 0 && !stop.is_empty() {
        if new_stop.is_empty() {
            return;
        }

        *stop = new_stop;
        stop_index = index.position(stop).map(|p| p as i64).unwrap_or(-1);
    }
    if last_match < stop_index {
        last_match = stop_index;
    }

    let clip_from = if !start.is_empty() { first_match } else { 0 };
    let clip_to = if !stop.is_empty() {
        last_match
    } else {
        reference.marker_count as i64 - 1
    };

    if clip_from > 0 || clip_to < reference.marker_count as i64 - 1 {
        info!("Clipping reference haplotypes to match target");

        let (clip_from, clip_to) =
            reference.clip_haplotypes(clip_from as isize, clip_to as isize);

        let names = index.names[clip_from..=clip_to].to_vec();
        *index = MarkerIndex::new(names);

        info!("{} markers remain after clipping", reference.marker_count);
    }
}
