//! Distributable archive (.kar) building.
//!
//! A .kar file is a gzip-compressed tar container holding the compiled
//! modules of one project folder: every `.kyra` source is compiled to a
//! `.kbc` module, and pre-compiled `.kbc` files are bundled as-is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::error::KyraError;

/// Build a `.kar` archive from a project folder, returning the archive
/// path (a sibling of the folder).
pub fn build(project: &Path) -> Result<PathBuf, KyraError> {
    let output_path = project.with_extension("kar");
    let output = fs::File::create(&output_path)?;
    let encoder = GzEncoder::new(output, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut sources = Vec::new();
    for entry in WalkDir::new(project).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            sources.push(entry.path().to_path_buf());
        }
    }

    for path in sources {
        let relative = path.strip_prefix(project).unwrap_or(&path);

        match path.extension().and_then(|e| e.to_str()) {
            Some("kyra") => {
                let source = fs::read_to_string(&path)?;
                let bytes = crate::compile_to_bytes(&source)?;
                append_entry(&mut builder, &relative.with_extension("kbc"), &bytes)?;
            }
            Some("kbc") => {
                let bytes = fs::read(&path)?;
                append_entry(&mut builder, relative, &bytes)?;
            }
            _ => {}
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(output_path)
}

fn append_entry<W: io::Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    data: &[u8],
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode;
    use std::io::Read;

    fn archive_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let file = fs::File::open(path).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        let mut entries = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            entries.push((name, data));
        }
        entries
    }

    #[test]
    fn test_build_compiles_sources_into_archive() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("main.kyra"), "let x = 1\nreturn x\n").unwrap();
        fs::write(project.join("notes.txt"), "ignored").unwrap();

        let archive_path = build(&project).unwrap();
        assert_eq!(archive_path.extension().and_then(|e| e.to_str()), Some("kar"));

        let entries = archive_entries(&archive_path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "main.kbc");

        // The bundled bytes are a loadable module.
        let module = bytecode::decode(&entries[0].1).unwrap();
        assert!(module.functions.is_empty());
        assert!(!module.main.code.is_empty());
    }

    #[test]
    fn test_build_bundles_precompiled_modules() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir(&project).unwrap();
        let bytes = crate::compile_to_bytes("return 1\n").unwrap();
        fs::write(project.join("lib.kbc"), &bytes).unwrap();

        let archive_path = build(&project).unwrap();
        let entries = archive_entries(&archive_path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "lib.kbc");
        assert_eq!(entries[0].1, bytes);
    }

    #[test]
    fn test_build_propagates_compile_errors() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("app");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("bad.kyra"), "missing(1)\n").unwrap();

        assert!(build(&project).is_err());
    }
}
