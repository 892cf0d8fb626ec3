use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::utils::errors::HapmosaicError;

/// Open a text file for buffered reading, transparently decompressing when
/// the path ends in `.gz`.
pub fn reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>, HapmosaicError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| HapmosaicError::FileOpenFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    if path.extension().map_or(false, |ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Open a text file for buffered writing, compressing the stream when
/// requested. Callers append the `.gz` suffix to the path themselves so that
/// the name on disk matches the encoding.
pub fn writer<P: AsRef<Path>>(
    path: P,
    gzip: bool,
) -> Result<Box<dyn Write + Send>, HapmosaicError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| HapmosaicError::FileOpenFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    if gzip {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Read a whole text file into trimmed-right lines. Parameter files are tiny
/// relative to the panels, so slurping keeps the shape checks trivial.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>, HapmosaicError> {
    let mut lines = Vec::new();
    for line in reader(path)?.lines() {
        let line = line.map_err(|e| HapmosaicError::FileOpenFailed {
            path: "<stream>".to_string(),
            source: e,
        })?;
        lines.push(line.trim_end().to_string());
    }
    Ok(lines)
}
