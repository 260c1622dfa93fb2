use std::io;
use std::path::Path;

use log::debug;
use walkdir::WalkDir;

use crate::bac::BacFile;
use crate::bcm::BcmFile;
use crate::store::FsStore;
use crate::transplant::TransplantConfig;
use crate::{CharacterFiles, Result};

const BAC_SUFFIX: &str = "_PLAYER.bac";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterStatus {
    /// Passes every source gate.
    Donor,
    /// Passes every destination gate.
    Recipient,
    Unusable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterReport {
    pub files: CharacterFiles,
    pub status: CharacterStatus,
}

/// Classify every `<code>_PLAYER.bac`/`.bcm` pair directly inside `dir`.
///
/// Broken or incomplete pairs are reported as unusable rather than failing
/// the whole survey.
pub fn survey(dir: &Path, config: &TransplantConfig) -> Result<Vec<CharacterReport>> {
    config.validate()?;

    let mut reports = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        let Some(code) = name.strip_suffix(BAC_SUFFIX) else {
            continue;
        };
        if code.is_empty() {
            continue;
        }

        let files = CharacterFiles::new(dir, code);
        let status = classify(&files, config);
        debug!("{}: {:?}", code, status);
        reports.push(CharacterReport { files, status });
    }

    Ok(reports)
}

fn classify(files: &CharacterFiles, config: &TransplantConfig) -> CharacterStatus {
    if !files.bcm.is_file() {
        return CharacterStatus::Unusable(format!("\"{}\" is missing", files.bcm.display()));
    }

    let bac = match BacFile::load(&FsStore, &files.bac) {
        Ok(bac) => bac,
        Err(err) => return CharacterStatus::Unusable(err.to_string()),
    };
    let bcm = match BcmFile::load(&FsStore, &files.bcm) {
        Ok(bcm) => bcm,
        Err(err) => return CharacterStatus::Unusable(err.to_string()),
    };

    let as_source = bac
        .qualifies_for_src(&config.bac)
        .and_then(|_| bcm.qualifies_for_src(&config.bcm));
    let as_destination = bac
        .qualifies_for_dst(&config.bac)
        .and_then(|_| bcm.qualifies_for_dst(&config.bcm));

    match (as_source, as_destination) {
        (Ok(()), _) => CharacterStatus::Donor,
        (_, Ok(())) => CharacterStatus::Recipient,
        (Err(src), Err(dst)) => {
            CharacterStatus::Unusable(format!("not a donor: {}; not a recipient: {}", src, dst))
        }
    }
}
