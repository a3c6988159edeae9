use crate::core::metadata::{CaptureMetadata, MetadataProvider};
use glob::Pattern;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

pub const DEFAULT_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "heic"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: String,
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Discovery,
    Processing,
    Complete,
}

/// A readable image file with its content key and metadata.
#[derive(Debug, Clone)]
pub struct ScannedImage {
    pub path: PathBuf,
    /// BLAKE3 digest of the file contents.
    pub dedupe_key: String,
    pub metadata: CaptureMetadata,
}

pub struct ScannerService {
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
    accepted_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
}

impl ScannerService {
    pub fn new() -> Self {
        Self::with_extensions(DEFAULT_EXTENSIONS)
    }

    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .collect();

        Self {
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            accepted_extensions,
            exclude_patterns: Vec::new(),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self, ScanError> {
        self.exclude_patterns = patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ScanError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Setting the token stops a running scan with [`ScanError::Cancelled`].
    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn is_supported_format(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .map(|ext| {
                self.accepted_extensions
                    .contains(&ext.to_string_lossy().to_lowercase())
            })
            .unwrap_or(false)
    }

    /// Discover accepted files under `paths` (files or directories), hash
    /// them and extract metadata in parallel.
    ///
    /// Files that cannot be read are logged and skipped. Results keep the
    /// discovery order.
    pub fn scan_paths(
        &self,
        paths: &[PathBuf],
        provider: &dyn MetadataProvider,
    ) -> Result<Vec<ScannedImage>, ScanError> {
        self.check_cancelled()?;

        for path in paths {
            if !path.exists() {
                return Err(ScanError::InvalidPath {
                    path: path.to_string_lossy().to_string(),
                });
            }
        }

        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: 0,
            current_file: "Discovering files...".to_string(),
            phase: ScanPhase::Discovery,
        });

        let discovered = self.discover_files(paths)?;
        self.check_cancelled()?;

        let scanned = self.process_files(&discovered, provider)?;

        self.send_progress(ScanProgress {
            files_processed: discovered.len(),
            total_files: discovered.len(),
            current_file: "Scan complete".to_string(),
            phase: ScanPhase::Complete,
        });

        Ok(scanned)
    }

    pub fn discover_files(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
        let mut discovered = Vec::new();

        for root_path in paths {
            for entry in WalkDir::new(root_path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                self.check_cancelled()?;

                let path = entry.path();
                if !path.is_file() {
                    continue;
                }

                let path_str = path.to_string_lossy();
                if self
                    .exclude_patterns
                    .iter()
                    .any(|pattern| pattern.matches(&path_str))
                {
                    continue;
                }

                if self.is_supported_format(path) {
                    discovered.push(path.to_path_buf());
                } else if entry.depth() == 0 {
                    log::warn!("Skipping unsupported file {}", path.display());
                }
            }
        }

        Ok(discovered)
    }

    fn process_files(
        &self,
        files: &[PathBuf],
        provider: &dyn MetadataProvider,
    ) -> Result<Vec<ScannedImage>, ScanError> {
        let total_files = files.len();
        let processed_count = AtomicUsize::new(0);

        let results: Vec<Option<ScannedImage>> = files
            .par_iter()
            .map(|file_path| {
                self.check_cancelled()?;

                let scanned = match fs::read(file_path) {
                    Ok(bytes) => {
                        let hint = file_path.extension().and_then(|ext| ext.to_str());
                        Some(ScannedImage {
                            path: file_path.clone(),
                            dedupe_key: compute_dedupe_key(&bytes),
                            metadata: provider.extract(&bytes, hint),
                        })
                    }
                    Err(e) => {
                        log::warn!("Failed to read {}: {}", file_path.display(), e);
                        None
                    }
                };

                let current_count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                self.send_progress(ScanProgress {
                    files_processed: current_count,
                    total_files,
                    current_file: file_path.to_string_lossy().to_string(),
                    phase: ScanPhase::Processing,
                });

                Ok(scanned)
            })
            .collect::<Result<_, ScanError>>()?;

        Ok(results.into_iter().flatten().collect())
    }

    fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

impl Default for ScannerService {
    fn default() -> Self {
        Self::new()
    }
}

/// Content key used to skip files already in a session.
pub fn compute_dedupe_key(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
