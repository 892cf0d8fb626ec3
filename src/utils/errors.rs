use thiserror::Error;

/// Fatal and recoverable error conditions raised while assembling the
/// imputation inputs. Everything here aborts the run before the parallel
/// regions begin; the HMM hot path itself has no recoverable errors.
#[derive(Error, Debug)]
pub enum HapmosaicError {
    #[error(
        "haplotypes can only contain alleles A ('A', 'a' or '1'), C ('C', 'c' or '2'), \
         G ('G', 'g' or '3') and T ('T', 't' or '4'), found '{0}'"
    )]
    InvalidAllele(char),

    #[error(
        "the haplotype file format was not recognized (problem occurred reading haplotype \
         #{haplotype} in line #{line}); check that the number of markers matches the SNP list"
    )]
    MarkerCountMismatch { haplotype: usize, line: usize },

    #[error("file [{path}] could not be opened: {source}")]
    FileOpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "no markers overlap between target and reference; check that the correct reference \
         is being used and that markers are named consistently"
    )]
    NoMarkerOverlap,

    #[error("clipping requested, but no position available for one of the endpoints")]
    ClipEndpointMissing,
}
