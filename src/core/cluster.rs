// Scene clustering over image embeddings.
//
// Images whose embeddings are more similar than a threshold are unioned, and
// every image ends up labeled with the root of its set. Cluster ids are image
// ids and are not stable across runs.

use crate::core::similarity::cosine_similarity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default cosine similarity above which two images belong to the same scene.
pub const DEFAULT_SCENE_THRESHOLD: f32 = 0.92;

/// An image id paired with its embedding, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct ImageEmbedding<'a> {
    pub id: &'a str,
    pub embedding: &'a [f32],
}

impl<'a> ImageEmbedding<'a> {
    pub fn new(id: &'a str, embedding: &'a [f32]) -> Self {
        Self { id, embedding }
    }
}

/// Mapping from image id to the id of its cluster root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAssignment(HashMap<String, String>);

impl SceneAssignment {
    pub fn scene_of(&self, image_id: &str) -> Option<&str> {
        self.0.get(image_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct scenes in the assignment.
    pub fn scene_count(&self) -> usize {
        let mut roots: Vec<&str> = self.0.values().map(String::as_str).collect();
        roots.sort_unstable();
        roots.dedup();
        roots.len()
    }
}

/// Disjoint-set over string ids. Path compression on lookup, no rank.
#[derive(Debug, Default)]
struct UnionFind {
    parent: HashMap<String, String>,
}

impl UnionFind {
    fn find(&mut self, id: &str) -> String {
        if !self.parent.contains_key(id) {
            self.parent.insert(id.to_string(), id.to_string());
            return id.to_string();
        }

        let mut root = id.to_string();
        while let Some(parent) = self.parent.get(&root) {
            if *parent == root {
                break;
            }
            root = parent.clone();
        }

        let mut current = id.to_string();
        while current != root {
            let next = self
                .parent
                .insert(current, root.clone())
                .unwrap_or_else(|| root.clone());
            current = next;
        }

        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            self.parent.insert(root_a, root_b);
        }
    }
}

/// Group images into scenes by pairwise cosine similarity.
///
/// Two images are unioned when their similarity is strictly greater than
/// `threshold`; grouping is transitive. O(N^2) comparisons, which is fine for
/// interactive photo sets.
pub fn cluster_by_similarity(images: &[ImageEmbedding<'_>], threshold: f32) -> SceneAssignment {
    let mut sets = UnionFind::default();

    for (i, left) in images.iter().enumerate() {
        sets.find(left.id);
        for right in &images[i + 1..] {
            if cosine_similarity(left.embedding, right.embedding) > threshold {
                sets.union(left.id, right.id);
            }
        }
    }

    let assignment = images
        .iter()
        .map(|image| (image.id.to_string(), sets.find(image.id)))
        .collect();

    SceneAssignment(assignment)
}

/// A display group of items sharing a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGroup<T> {
    pub label: String,
    pub scene_id: Option<String>,
    pub items: Vec<T>,
}

/// Group items by scene id in order of first appearance.
///
/// Items without a scene land in a trailing "Unsorted" group; the rest are
/// labeled "Scene 1", "Scene 2", ...
pub fn group_by_scene<T, F>(items: impl IntoIterator<Item = T>, scene_of: F) -> Vec<SceneGroup<T>>
where
    F: Fn(&T) -> Option<String>,
{
    let mut groups: Vec<SceneGroup<T>> = Vec::new();
    let mut unsorted: Vec<T> = Vec::new();

    for item in items {
        match scene_of(&item) {
            Some(scene_id) => {
                match groups
                    .iter_mut()
                    .find(|g| g.scene_id.as_deref() == Some(scene_id.as_str()))
                {
                    Some(group) => group.items.push(item),
                    None => {
                        let label = format!("Scene {}", groups.len() + 1);
                        groups.push(SceneGroup {
                            label,
                            scene_id: Some(scene_id),
                            items: vec![item],
                        });
                    }
                }
            }
            None => unsorted.push(item),
        }
    }

    if !unsorted.is_empty() {
        groups.push(SceneGroup {
            label: "Unsorted".to_string(),
            scene_id: None,
            items: unsorted,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_angle(radians: f32) -> Vec<f32> {
        vec![radians.cos(), radians.sin()]
    }

    #[test]
    fn test_empty_input() {
        let assignment = cluster_by_similarity(&[], DEFAULT_SCENE_THRESHOLD);
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_single_image_is_its_own_scene() {
        let v = vec![0.1, 0.2, 0.3];
        let assignment = cluster_by_similarity(&[ImageEmbedding::new("a", &v)], 0.92);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.scene_of("a"), Some("a"));
    }

    #[test]
    fn test_identical_embeddings_are_grouped() {
        let v = vec![0.4, -0.2, 0.9];
        let images = [ImageEmbedding::new("a", &v), ImageEmbedding::new("b", &v)];
        let assignment = cluster_by_similarity(&images, DEFAULT_SCENE_THRESHOLD);
        assert_eq!(assignment.scene_of("a"), assignment.scene_of("b"));
        assert_eq!(assignment.scene_count(), 1);
    }

    #[test]
    fn test_transitive_union() {
        // cos(theta) = 0.95, so A-B and B-C clear the threshold while
        // A-C (cos 2theta ~ 0.805) does not.
        let theta = 0.95f32.acos();
        let a = at_angle(0.0);
        let b = at_angle(theta);
        let c = at_angle(2.0 * theta);

        assert!(cosine_similarity(&a, &c) < DEFAULT_SCENE_THRESHOLD);

        let images = [
            ImageEmbedding::new("a", &a),
            ImageEmbedding::new("b", &b),
            ImageEmbedding::new("c", &c),
        ];
        let assignment = cluster_by_similarity(&images, DEFAULT_SCENE_THRESHOLD);

        let scene = assignment.scene_of("a");
        assert!(scene.is_some());
        assert_eq!(assignment.scene_of("b"), scene);
        assert_eq!(assignment.scene_of("c"), scene);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // dot = 23, |a| = |b| = 5, so similarity is exactly 23/25 = 0.92.
        let a = vec![4.0, 2.0, 2.0, 1.0];
        let b = vec![4.0, 2.0, 2.0, -1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.92);

        let images = [ImageEmbedding::new("a", &a), ImageEmbedding::new("b", &b)];
        let assignment = cluster_by_similarity(&images, 0.92);
        assert_eq!(assignment.scene_of("a"), Some("a"));
        assert_eq!(assignment.scene_of("b"), Some("b"));
        assert_eq!(assignment.scene_count(), 2);
    }

    #[test]
    fn test_dissimilar_images_stay_apart() {
        let a = at_angle(0.0);
        let b = at_angle(std::f32::consts::FRAC_PI_2);
        let images = [ImageEmbedding::new("a", &a), ImageEmbedding::new("b", &b)];
        let assignment = cluster_by_similarity(&images, DEFAULT_SCENE_THRESHOLD);
        assert_ne!(assignment.scene_of("a"), assignment.scene_of("b"));
    }

    #[test]
    fn test_mismatched_dimensions_never_cluster() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let images = [ImageEmbedding::new("a", &a), ImageEmbedding::new("b", &b)];
        let assignment = cluster_by_similarity(&images, 0.0);
        assert_eq!(assignment.scene_count(), 2);
    }

    #[test]
    fn test_root_is_a_member_of_its_scene() {
        let v = vec![1.0, 1.0];
        let w = vec![1.0, 0.99];
        let x = vec![-1.0, 0.2];
        let images = [
            ImageEmbedding::new("p", &v),
            ImageEmbedding::new("q", &w),
            ImageEmbedding::new("r", &x),
        ];
        let assignment = cluster_by_similarity(&images, DEFAULT_SCENE_THRESHOLD);
        for (_, root) in assignment.iter() {
            assert_eq!(assignment.scene_of(root), Some(root));
        }
    }

    #[test]
    fn test_group_by_scene_orders_and_labels() {
        let items = vec![
            ("a", Some("s1")),
            ("b", None),
            ("c", Some("s2")),
            ("d", Some("s1")),
        ];
        let groups = group_by_scene(items, |(_, scene)| scene.map(str::to_string));

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].label, "Scene 1");
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[1].label, "Scene 2");
        assert_eq!(groups[2].label, "Unsorted");
        assert_eq!(groups[2].scene_id, None);
    }
}
