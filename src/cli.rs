use clap::{crate_version, Arg, ArgAction, Command};
use env_logger::Builder;
use log::LevelFilter;

pub fn build_cli() -> Command {
    Command::new("hapmosaic")
        .version(crate_version!())
        .about("Imputation into phased haplotypes using a mosaic copying model")
        .next_help_heading("Reference haplotypes")
        .arg(
            Arg::new("refHaps")
                .long("refHaps")
                .help("Phased reference haplotype file")
                .required(true),
        )
        .arg(
            Arg::new("refSnps")
                .long("refSnps")
                .help("Reference marker list, one name per line")
                .required(true),
        )
        .next_help_heading("Target haplotypes")
        .arg(
            Arg::new("haps")
                .long("haps")
                .help("Phased target haplotype file")
                .required(true),
        )
        .arg(
            Arg::new("snps")
                .long("snps")
                .help("Target marker list, one name per line")
                .required(true),
        )
        .next_help_heading("Starting parameters")
        .arg(
            Arg::new("rec")
                .long("rec")
                .help("Crossover rates estimated by a previous run"),
        )
        .arg(
            Arg::new("erate")
                .long("erate")
                .help("Error rates estimated by a previous run"),
        )
        .next_help_heading("Parameter fitting")
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .help("Rounds of parameter refinement")
                .value_parser(clap::value_parser!(usize))
                .default_value("5"),
        )
        .arg(
            Arg::new("states")
                .long("states")
                .help("Maximum haplotypes sampled per round of refinement")
                .value_parser(clap::value_parser!(usize))
                .default_value("200"),
        )
        .arg(
            Arg::new("em")
                .long("em")
                .help("Estimate parameters by expectation-maximization instead of sampling")
                .action(ArgAction::SetTrue),
        )
        .next_help_heading("Output files")
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .help("Prefix for all output files")
                .default_value("hapmosaic"),
        )
        .arg(
            Arg::new("phased")
                .long("phased")
                .help("Also write per-haplotype doses and alleles")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("gzip")
                .long("gzip")
                .help("Compress the output files")
                .action(ArgAction::SetTrue),
        )
        .next_help_heading("Clipping window")
        .arg(
            Arg::new("start")
                .long("start")
                .help("First marker of the imputation window")
                .default_value(""),
        )
        .arg(
            Arg::new("stop")
                .long("stop")
                .help("Last marker of the imputation window")
                .default_value(""),
        )
        .next_help_heading("Multi-threading")
        .arg(
            Arg::new("cpus")
                .long("cpus")
                .help("Worker threads (0 leaves the pool at its default size)")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Master seed for the stochastic parameter sampler")
                .value_parser(clap::value_parser!(u64))
                .default_value("42"),
        )
        .next_help_heading("Logging")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print debug output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print errors")
                .action(ArgAction::SetTrue),
        )
}

pub fn set_log_level(matches: &clap::ArgMatches) {
    let mut log_level = LevelFilter::Info;
    if matches.get_flag("verbose") {
        log_level = LevelFilter::Debug;
    }
    if matches.get_flag("quiet") {
        log_level = LevelFilter::Error;
    }

    let mut builder = Builder::new();
    builder.filter_level(log_level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse(&filters);
    }

    // A second initialization (e.g. from tests) is harmless
    let _ = builder.try_init();
}
