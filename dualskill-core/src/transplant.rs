use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bac::{BacFile, BacRules};
use crate::bcm::{BcmFile, BcmRules};
use crate::store::ContainerStore;
use crate::{CharacterFiles, Result, TransplantError};

/// Which side of a transplant a container is checked for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    /// Already has the feature.
    Source,
    /// Lacks the feature and will receive it.
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Destination => f.write_str("destination"),
        }
    }
}

/// Why a container failed a qualification gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Rejection {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Receives human-readable diagnostics while a transplant runs.
pub trait DiagnosticSink {
    fn emit(&mut self, line: String);
}

impl DiagnosticSink for Vec<String> {
    fn emit(&mut self, line: String) {
        self.push(line);
    }
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&mut self, line: String) {
        warn!("{}", line);
    }
}

/// Designated records, thresholds and relocation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransplantConfig {
    pub bac: BacRules,
    pub bcm: BcmRules,
    /// Refuse to relocate when any link would end up on the wrong record,
    /// instead of only checking that links stay inside the table.
    pub strict_references: bool,
}

impl TransplantConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TransplantConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TransplantError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TransplantError::Io(e)
            }
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bac.entries_to_copy.is_empty() {
            return Err(TransplantError::Config(
                "bac.entries_to_copy must name at least one entry".to_string(),
            ));
        }
        if let Some(&index) = self
            .bac
            .entries_to_copy
            .iter()
            .find(|&&index| index >= self.bac.min_entries)
        {
            return Err(TransplantError::Config(format!(
                "bac entry {} is not covered by bac.min_entries ({})",
                index, self.bac.min_entries
            )));
        }

        let controls = &self.bcm.control_entries;
        if controls.is_empty() {
            return Err(TransplantError::Config(
                "bcm.control_entries must name at least one entry".to_string(),
            ));
        }
        if controls.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Err(TransplantError::Config(format!(
                "bcm.control_entries must be ascending and consecutive, got {:?}",
                controls
            )));
        }
        if let Some(&index) = controls.iter().find(|&&index| index >= self.bcm.min_entries) {
            return Err(TransplantError::Config(format!(
                "bcm entry {} is not covered by bcm.min_entries ({})",
                index, self.bcm.min_entries
            )));
        }
        if self.bcm.insert_at > self.bcm.min_entries {
            return Err(TransplantError::Config(format!(
                "bcm.insert_at ({}) is past bcm.min_entries ({})",
                self.bcm.insert_at, self.bcm.min_entries
            )));
        }

        Ok(())
    }
}

/// One donor/recipient pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransplantJob {
    pub source: CharacterFiles,
    pub destination: CharacterFiles,
    /// Run every step except writing the results.
    pub dry_run: bool,
}

impl TransplantJob {
    pub fn new(dir: &Path, source: &str, destination: &str) -> Self {
        TransplantJob {
            source: CharacterFiles::new(dir, source),
            destination: CharacterFiles::new(dir, destination),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransplantSummary {
    pub bac_entries: usize,
    pub copied_bac_entries: usize,
    pub bcm_entries_before: usize,
    pub bcm_entries_after: usize,
    pub written: Vec<PathBuf>,
}

/// Copy the feature from `job.source` onto `job.destination`.
///
/// Both destination files are rewritten together or not at all. Details of
/// a failed load or gate go to `sink`; the returned error is the verdict.
pub fn transplant<S, D>(
    store: &S,
    config: &TransplantConfig,
    job: &TransplantJob,
    sink: &mut D,
) -> Result<TransplantSummary>
where
    S: ContainerStore + ?Sized,
    D: DiagnosticSink + ?Sized,
{
    config.validate()?;

    let (src, dst) = (&job.source, &job.destination);
    if src.bac == dst.bac || src.bcm == dst.bcm {
        return Err(TransplantError::Config(format!(
            "source and destination are both \"{}\"",
            dst.code
        )));
    }

    let mut dst_bac = reported(sink, &dst.bac, BacFile::load(store, &dst.bac))?;
    let src_bac = reported(sink, &src.bac, BacFile::load(store, &src.bac))?;
    let mut dst_bcm = reported(sink, &dst.bcm, BcmFile::load(store, &dst.bcm))?;
    let src_bcm = reported(sink, &src.bcm, BcmFile::load(store, &src.bcm))?;

    let verdict = dst_bac.qualifies_for_dst(&config.bac);
    gate(sink, verdict, &dst.code, &dst.bac, Role::Destination)?;
    let verdict = src_bac.qualifies_for_src(&config.bac);
    gate(sink, verdict, &src.code, &src.bac, Role::Source)?;
    let verdict = dst_bcm.qualifies_for_dst(&config.bcm);
    gate(sink, verdict, &dst.code, &dst.bcm, Role::Destination)?;
    let verdict = src_bcm.qualifies_for_src(&config.bcm);
    gate(sink, verdict, &src.code, &src.bcm, Role::Source)?;

    dst_bac.copy_entries_from(&src_bac, &config.bac)?;

    if config.strict_references {
        let hazards = dst_bcm.table().relocation_hazards(config.bcm.insert_at);
        if let Some(&first) = hazards.first() {
            for hazard in &hazards {
                sink.emit(format!("\"{}\": {}", dst.bcm.display(), hazard));
            }
            return Err(TransplantError::RelocationHazard {
                count: hazards.len(),
                first,
            });
        }
    }

    let bcm_entries_before = dst_bcm.entry_count();
    let inserted = dst_bcm
        .graft_control_entries(&src_bcm, &config.bcm)
        .map_err(|err| {
            sink.emit(format!(
                "\"{}\": grafting entries from \"{}\" failed",
                dst.bcm.display(),
                src.bcm.display()
            ));
            err
        })?;
    debug!(
        "grafted {} BCM entries at {} into \"{}\"",
        inserted,
        config.bcm.insert_at,
        dst.bcm.display()
    );

    let bac_bytes = dst_bac.to_bytes();
    let bcm_bytes = dst_bcm.to_bytes();

    let written = if job.dry_run {
        info!("dry run: \"{}\" and \"{}\" left untouched", dst.bac.display(), dst.bcm.display());
        Vec::new()
    } else {
        store
            .save_files(&[
                (dst.bac.as_path(), bac_bytes.as_slice()),
                (dst.bcm.as_path(), bcm_bytes.as_slice()),
            ])
            .map_err(|err| {
                sink.emit(format!("Failed to save \"{}\".", dst.code));
                err
            })?;
        vec![dst.bac.clone(), dst.bcm.clone()]
    };

    info!(
        "transplanted {} -> {}: {} BAC entries copied, BCM {} -> {} entries",
        src.code,
        dst.code,
        config.bac.entries_to_copy.len(),
        bcm_entries_before,
        dst_bcm.entry_count()
    );

    Ok(TransplantSummary {
        bac_entries: dst_bac.entry_count(),
        copied_bac_entries: config.bac.entries_to_copy.len(),
        bcm_entries_before,
        bcm_entries_after: dst_bcm.entry_count(),
        written,
    })
}

fn reported<T, D>(sink: &mut D, path: &Path, loaded: Result<T>) -> Result<T>
where
    D: DiagnosticSink + ?Sized,
{
    loaded.map_err(|err| {
        sink.emit(format!("Failed to load file \"{}\"", path.display()));
        if let TransplantError::NotFound { .. } = err {
            sink.emit(
                "Make sure both characters' files are in the directory being patched.".to_string(),
            );
        }
        err
    })
}

fn gate<D>(
    sink: &mut D,
    verdict: std::result::Result<(), Rejection>,
    code: &str,
    path: &Path,
    role: Role,
) -> Result<()>
where
    D: DiagnosticSink + ?Sized,
{
    verdict.map_err(|rejection| {
        let format = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_uppercase())
            .unwrap_or_default();
        sink.emit(format!("\"{}\": {}.", path.display(), rejection));
        sink.emit(format!("\"{}\" doesn't qualify as {} {}.", code, format, role));
        TransplantError::ValidationFailed {
            path: path.to_path_buf(),
            role,
            reason: rejection.reason,
        }
    })
}
