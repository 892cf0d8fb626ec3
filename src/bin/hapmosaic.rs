extern crate hapmosaic;

use std::process;

use log::{error, warn};

use hapmosaic::cli::{build_cli, set_log_level};
use hapmosaic::processing::imputation_engine::start_imputation_engine;

fn main() {
    let matches = build_cli().get_matches();
    set_log_level(&matches);

    let cpus = *matches.get_one::<usize>("cpus").unwrap();
    if cpus > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(cpus)
            .build_global()
        {
            warn!("Could not size the thread pool to {} threads: {}", cpus, e);
        }
    }

    if let Err(e) = start_imputation_engine(&matches) {
        error!("{:#}", e);
        process::exit(1);
    }
}
