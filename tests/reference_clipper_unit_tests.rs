extern crate hapmosaic;

use ndarray::Array2;

use hapmosaic::model::haplotype_panel::HaplotypePanel;
use hapmosaic::model::marker_index::{clip_reference, MarkerIndex};

fn reference_panel(names: &[&str]) -> (HaplotypePanel, MarkerIndex) {
    let marker_count = names.len();
    let mut panel = HaplotypePanel::new(marker_count);

    panel.count = 2;
    panel.labels = vec!["R1".to_string(), "R2".to_string()];
    panel.alleles = Array2::from_shape_fn((2, marker_count), |(_, j)| (j % 4 + 1) as u8);

    let index = MarkerIndex::new(names.iter().map(|n| n.to_string()).collect());

    (panel, index)
}

fn marker_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn marker_index_maps_names_to_positions() {
    let index = MarkerIndex::new(marker_names(&["rs1", " rs2 ", "rs3"]));

    assert_eq!(index.len(), 3);
    assert_eq!(index.position("rs2"), Some(1));
    assert_eq!(index.position(" rs3 "), Some(2));
    assert_eq!(index.position("rs9"), None);
    assert_eq!(index.name(0), "rs1");
}

#[test]
fn empty_endpoints_leave_the_reference_alone() {
    let names = ["m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9", "m10"];
    let (mut panel, mut index) = reference_panel(&names);

    let mut start = String::new();
    let mut stop = String::new();

    clip_reference(
        &mut panel,
        &mut index,
        &marker_names(&["m4", "m5", "m7"]),
        &mut start,
        &mut stop,
    );

    assert_eq!(panel.marker_count, 10);
    assert_eq!(index.len(), 10);
}

#[test]
fn endpoints_in_the_reference_extend_the_overlap_window() {
    // Target markers overlap the reference at m4..m7; the named endpoints
    // m3 and m8 widen the clipped window to include them.
    let names = ["m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9", "m10"];
    let (mut panel, mut index) = reference_panel(&names);

    let mut start = "m3".to_string();
    let mut stop = "m8".to_string();

    clip_reference(
        &mut panel,
        &mut index,
        &marker_names(&["m4", "m5", "m7"]),
        &mut start,
        &mut stop,
    );

    assert_eq!(panel.marker_count, 6);
    assert_eq!(index.names, marker_names(&["m3", "m4", "m5", "m6", "m7", "m8"]));
    assert_eq!(index.position("m3"), Some(0));
    assert_eq!(index.position("m9"), None);
}

#[test]
fn missing_start_is_replaced_by_the_next_overlapping_target_marker() {
    // m3 exists only in the target, so the window is driven by m4, the first
    // following target marker that the reference knows about.
    let names = ["m1", "m2", "m4", "m5", "m6", "m7", "m9", "m10"];
    let (mut panel, mut index) = reference_panel(&names);

    let mut start = "m3".to_string();
    let mut stop = String::new();

    clip_reference(
        &mut panel,
        &mut index,
        &marker_names(&["m3", "m4", "m5", "m7"]),
        &mut start,
        &mut stop,
    );

    assert_eq!(start, "m4");
    assert_eq!(panel.marker_count, 6);
    assert_eq!(index.names, marker_names(&["m4", "m5", "m6", "m7", "m9", "m10"]));
}

#[test]
fn unresolvable_endpoints_leave_the_reference_alone() {
    let names = ["m1", "m2", "m3", "m4"];
    let (mut panel, mut index) = reference_panel(&names);

    let mut start = "zzz".to_string();
    let mut stop = String::new();

    clip_reference(
        &mut panel,
        &mut index,
        &marker_names(&["m2", "m3"]),
        &mut start,
        &mut stop,
    );

    assert_eq!(start, "zzz");
    assert_eq!(panel.marker_count, 4);
    assert_eq!(index.len(), 4);
}
