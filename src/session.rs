//! Explicit application state: the working image set, the compare selection
//! and the activity log.
//!
//! The core modules stay pure; this is the one place that owns mutable state.

use crate::core::cluster::{
    cluster_by_similarity, group_by_scene, ImageEmbedding, SceneGroup, DEFAULT_SCENE_THRESHOLD,
};
use crate::core::geometry::Side;
use crate::core::metadata::CaptureMetadata;
use crate::services::scanner::ScannedImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Activity log capacity; older entries are dropped first.
pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Success => write!(f, "success"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub path: PathBuf,
    pub dedupe_key: String,
    pub metadata: CaptureMetadata,
    /// Empty until the embedding worker answers.
    pub embedding: Vec<f32>,
    pub scene_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl Selection {
    pub fn get(&self, side: Side) -> Option<&str> {
        match side {
            Side::Left => self.left.as_deref(),
            Side::Right => self.right.as_deref(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    images: Vec<ImageRecord>,
    selection: Selection,
    logs: VecDeque<LogEntry>,
    threshold: f32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SCENE_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            images: Vec::new(),
            selection: Selection::default(),
            logs: VecDeque::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn image(&self, id: &str) -> Option<&ImageRecord> {
        self.images.iter().find(|img| img.id == id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn log(&mut self, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
            LogLevel::Info | LogLevel::Success => log::info!("{}", message),
        }

        self.logs.push_back(LogEntry {
            id: Uuid::new_v4().to_string(),
            message,
            level,
            timestamp: Utc::now(),
        });
        while self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
    }

    /// Record an error together with its underlying message.
    pub fn log_error(&mut self, context: &str, error: impl fmt::Display) {
        self.log(format!("{context}: {error}"), LogLevel::Error);
    }

    /// Add scanned images, skipping content already in the session or seen
    /// earlier in the same call. Returns the ids of the new records.
    pub fn add_images(&mut self, scanned: Vec<ScannedImage>) -> Vec<String> {
        let mut keys: HashSet<String> = self
            .images
            .iter()
            .map(|img| img.dedupe_key.clone())
            .collect();

        let mut added = Vec::new();
        for image in scanned {
            if !keys.insert(image.dedupe_key.clone()) {
                log::debug!("Skipping duplicate {}", image.path.display());
                continue;
            }

            let id = format!("img_{}", Uuid::new_v4().simple());
            added.push(id.clone());
            self.images.push(ImageRecord {
                id,
                path: image.path,
                dedupe_key: image.dedupe_key,
                metadata: image.metadata,
                embedding: Vec::new(),
                scene_id: None,
            });
        }

        if added.is_empty() {
            self.log(
                "No new images to add (duplicates or unsupported format).",
                LogLevel::Warn,
            );
        } else {
            self.log(format!("Added {} image(s).", added.len()), LogLevel::Success);
        }
        added
    }

    /// Returns `false` when the id is unknown, e.g. removed while its
    /// embedding was in flight.
    pub fn set_embedding(&mut self, id: &str, embedding: Vec<f32>) -> bool {
        match self.images.iter_mut().find(|img| img.id == id) {
            Some(image) => {
                image.embedding = embedding;
                true
            }
            None => false,
        }
    }

    /// Recluster every image that has an embedding.
    ///
    /// Images without an embedding are left out of the run and keep whatever
    /// scene id they had. Returns the number of scenes in this run.
    pub fn apply_scenes(&mut self) -> usize {
        let assignment = {
            let embedded: Vec<ImageEmbedding<'_>> = self
                .images
                .iter()
                .filter(|img| !img.embedding.is_empty())
                .map(|img| ImageEmbedding::new(&img.id, &img.embedding))
                .collect();
            cluster_by_similarity(&embedded, self.threshold)
        };

        for image in &mut self.images {
            if let Some(scene) = assignment.scene_of(&image.id) {
                image.scene_id = Some(scene.to_string());
            }
        }

        let scenes = assignment.scene_count();
        self.log(
            format!(
                "Grouped {} image(s) into {} scene(s).",
                assignment.len(),
                scenes
            ),
            LogLevel::Info,
        );
        scenes
    }

    pub fn scene_groups(&self) -> Vec<SceneGroup<&ImageRecord>> {
        group_by_scene(self.images.iter(), |img| img.scene_id.clone())
    }

    /// Returns `false` when the id is unknown.
    pub fn select(&mut self, side: Side, id: &str) -> bool {
        if self.image(id).is_none() {
            return false;
        }
        match side {
            Side::Left => self.selection.left = Some(id.to_string()),
            Side::Right => self.selection.right = Some(id.to_string()),
        }
        true
    }

    /// Select the first two images of the group at `group_index` (as listed
    /// by [`scene_groups`](Self::scene_groups)) as left and right.
    pub fn compare_pair(&mut self, group_index: usize) -> Option<(String, String)> {
        let (label, left, right) = {
            let groups = self.scene_groups();
            let group = groups.get(group_index)?;
            match group.items.as_slice() {
                [first, second, ..] => (group.label.clone(), first.id.clone(), second.id.clone()),
                _ => return None,
            }
        };

        self.selection.left = Some(left.clone());
        self.selection.right = Some(right.clone());
        self.log(format!("Comparing first pair of {label}."), LogLevel::Info);
        Some((left, right))
    }

    /// Remove an image, clearing any selection that pointed at it.
    pub fn remove_image(&mut self, id: &str) -> Option<ImageRecord> {
        let index = self.images.iter().position(|img| img.id == id)?;
        let removed = self.images.remove(index);

        if self.selection.left.as_deref() == Some(id) {
            self.selection.left = None;
        }
        if self.selection.right.as_deref() == Some(id) {
            self.selection.right = None;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.selection = Selection::default();
    }
}
