extern crate hapmosaic;

use std::fs;
use std::path::Path;

use hapmosaic::cli::build_cli;
use hapmosaic::processing::imputation_engine::start_imputation_engine;

struct ImputationFixture {
    dir: tempfile::TempDir,
}

impl ImputationFixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("ref.snps"), "m1\nm2\nm3\nm4\nm5\n").unwrap();
        fs::write(
            dir.path().join("ref.haps"),
            "R1 AAGTA\nR2 ACGTA\nR3 ACGAA\nR4 CCGTT\n",
        )
        .unwrap();
        fs::write(dir.path().join("target.snps"), "m2\nm3\nm4\n").unwrap();
        fs::write(
            dir.path().join("target.haps"),
            "IND1 CGT\nIND1 CG.\n",
        )
        .unwrap();

        ImputationFixture { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_str().unwrap().to_string()
    }

    fn run(&self, extra: &[&str]) -> anyhow::Result<()> {
        self.run_rounds("2", extra)
    }

    fn run_rounds(&self, rounds: &str, extra: &[&str]) -> anyhow::Result<()> {
        let mut args = vec![
            "hapmosaic".to_string(),
            "--refHaps".to_string(),
            self.path("ref.haps"),
            "--refSnps".to_string(),
            self.path("ref.snps"),
            "--haps".to_string(),
            self.path("target.haps"),
            "--snps".to_string(),
            self.path("target.snps"),
            "--prefix".to_string(),
            self.path("out"),
            "--rounds".to_string(),
            rounds.to_string(),
            "--states".to_string(),
            "4".to_string(),
            "--seed".to_string(),
            "11".to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));

        let matches = build_cli().get_matches_from(args);
        start_imputation_engine(&matches)
    }
}

#[test]
fn a_complete_run_writes_every_output_file() {
    let fixture = ImputationFixture::new();

    fixture.run(&[]).unwrap();

    for name in ["out.dose", "out.info.draft", "out.info", "out.erate", "out.rec"] {
        assert!(
            Path::new(&fixture.path(name)).exists(),
            "missing output {}",
            name
        );
    }
}

#[test]
fn doses_cover_the_reference_window_and_sum_over_two_haplotypes() {
    let fixture = ImputationFixture::new();

    fixture.run(&[]).unwrap();

    let dose = fs::read_to_string(fixture.path("out.dose")).unwrap();
    let lines: Vec<&str> = dose.lines().collect();
    assert_eq!(lines.len(), 1);

    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields[0], "IND1");
    assert_eq!(fields[1], "DOSE");
    assert_eq!(fields.len(), 2 + 5);

    for value in &fields[2..] {
        let dose: f64 = value.parse().unwrap();
        assert!((0.0..=2.0).contains(&dose), "dose {} out of range", dose);
    }
}

#[test]
fn the_info_file_marks_genotyped_markers() {
    let fixture = ImputationFixture::new();

    fixture.run(&[]).unwrap();

    let info = fs::read_to_string(fixture.path("out.info")).unwrap();
    let lines: Vec<&str> = info.lines().collect();
    assert_eq!(lines.len(), 1 + 5);
    assert!(lines[0].starts_with("SNP\tAl1\tAl2\tFreq1\tMAF"));

    for (line, genotyped) in lines[1..].iter().zip([false, true, true, true, false]) {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[7], if genotyped { "Genotyped" } else { "-" });
    }
}

#[test]
fn the_draft_info_file_covers_the_window() {
    let fixture = ImputationFixture::new();

    fixture.run(&[]).unwrap();

    let draft = fs::read_to_string(fixture.path("out.info.draft")).unwrap();
    let lines: Vec<&str> = draft.lines().collect();
    assert_eq!(lines[0], "SNP\tAl1\tAl2\tFreq1\tGenotyped");
    assert_eq!(lines.len(), 1 + 5);
    assert!(lines[1].starts_with("m1\t"));
}

#[test]
fn phased_output_reports_per_haplotype_doses_and_alleles() {
    let fixture = ImputationFixture::new();

    fixture.run(&["--phased"]).unwrap();

    let hapdose = fs::read_to_string(fixture.path("out.hapDose")).unwrap();
    assert_eq!(hapdose.lines().count(), 2);
    for line in hapdose.lines() {
        assert!(line.starts_with("IND1\tHAPLO"));
        assert_eq!(line.split('\t').count(), 2 + 5);
    }

    let haps = fs::read_to_string(fixture.path("out.haps")).unwrap();
    assert_eq!(haps.lines().count(), 2);
    for line in haps.lines() {
        // Alleles follow the label fields in space-separated blocks of eight
        let alleles: String = line.split_whitespace().skip(2).collect();
        assert_eq!(alleles.len(), 5);
        assert!(alleles.chars().all(|c| "acgt".contains(c)));
    }
}

#[test]
fn expectation_maximization_runs_to_completion() {
    let fixture = ImputationFixture::new();

    fixture.run(&["--em"]).unwrap();

    assert!(Path::new(&fixture.path("out.dose")).exists());
}

#[test]
fn estimated_parameters_can_seed_a_second_run() {
    let fixture = ImputationFixture::new();

    fixture.run(&[]).unwrap();

    let erate = fixture.path("out.erate");
    let rec = fixture.path("out.rec");
    fixture
        .run_rounds("0", &["--erate", &erate, "--rec", &rec])
        .unwrap();

    assert!(Path::new(&fixture.path("out.dose")).exists());
}

#[test]
fn disjoint_marker_names_abort_the_run() {
    let fixture = ImputationFixture::new();
    fs::write(
        fixture.dir.path().join("target.snps"),
        "x1\nx2\nx3\n",
    )
    .unwrap();

    let result = fixture.run(&[]);

    assert!(result.is_err());
}

#[test]
fn missing_input_files_abort_the_run() {
    let fixture = ImputationFixture::new();
    fs::remove_file(fixture.dir.path().join("ref.haps")).unwrap();

    let result = fixture.run(&[]);

    assert!(result.is_err());
}
