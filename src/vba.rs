use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const VBA_PROJECT_PART: &str = "xl/vbaProject.bin";

/// Pull module names and decompressed source out of an .xlsm's embedded VBA
/// project. Workbooks without a project part yield an empty result rather
/// than an error so upload handling stays uniform across .xlsx and .xlsm.
pub fn extract_vba_modules(path: &Path) -> Result<BTreeMap<String, String>> {
    let file = File::open(path).with_context(|| format!("unable to open {:?}", path))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{:?} is not a valid zip container", path))?;

    let mut buf = Vec::new();
    match archive.by_name(VBA_PROJECT_PART) {
        Ok(mut part) => {
            part.read_to_end(&mut buf)
                .context("failed to read vbaProject.bin")?;
        }
        Err(zip::result::ZipError::FileNotFound) => return Ok(BTreeMap::new()),
        Err(err) => return Err(err).context("failed to open vbaProject.bin"),
    }

    let project = ovba::open_project(buf).context("failed to parse VBA project")?;

    let mut modules = BTreeMap::new();
    for module in &project.modules {
        let name = module.name.clone();
        match project.module_source(&name) {
            Ok(source) => {
                modules.insert(name, source);
            }
            Err(err) => {
                // One undecodable module must not sink the rest.
                tracing::warn!(module = %name, error = %err, "skipping VBA module");
            }
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use umya_spreadsheet::{new_file, writer};

    #[test]
    fn plain_xlsx_has_no_modules() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.xlsx");
        writer::xlsx::write(&new_file(), &path).unwrap();

        let modules = extract_vba_modules(&path).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn non_zip_input_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.xlsm");
        std::fs::write(&path, b"not a zip at all").unwrap();

        assert!(extract_vba_modules(&path).is_err());
    }
}
