use crate::services::embedding::{EmbeddingError, EmbeddingProvider};
use image::ImageReader;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::path::Path;

pub const DEFAULT_HASH_SIZE: u32 = 16;

/// Embedding provider built on a gradient perceptual hash.
///
/// Each hash bit becomes `1.0` or `-1.0`, so the cosine similarity of two
/// vectors is `1 - 2 * hamming / bits`. Near-identical framings land close to
/// 1.0; unrelated scenes hover around 0.
pub struct PerceptualEmbeddingProvider {
    hash_size: u32,
    hasher: Option<Hasher>,
}

impl PerceptualEmbeddingProvider {
    pub fn new(hash_size: u32) -> Self {
        Self {
            hash_size: hash_size.max(2),
            hasher: None,
        }
    }

    /// Number of components in every vector this provider returns.
    pub fn dimensions(&self) -> usize {
        (self.hash_size * self.hash_size) as usize
    }
}

impl Default for PerceptualEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SIZE)
    }
}

impl EmbeddingProvider for PerceptualEmbeddingProvider {
    fn load(&mut self, progress: &mut dyn FnMut(&str)) -> Result<(), EmbeddingError> {
        progress("Preparing perceptual hasher...");
        self.hasher = Some(
            HasherConfig::new()
                .hash_size(self.hash_size, self.hash_size)
                .hash_alg(HashAlg::Gradient)
                .to_hasher(),
        );
        Ok(())
    }

    fn embed(&mut self, locator: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let hasher = self.hasher.as_ref().ok_or_else(|| EmbeddingError::Load {
            message: "perceptual hasher not prepared".to_string(),
        })?;

        let img = ImageReader::open(locator)?.with_guessed_format()?.decode()?;
        let hash = hasher.hash_image(&img);

        let bits = self.dimensions();
        let vector = hash
            .as_bytes()
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| (byte >> bit) & 1))
            .take(bits)
            .map(|bit| if bit == 1 { 1.0 } else { -1.0 })
            .collect();
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::cosine_similarity;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn loaded(hash_size: u32) -> PerceptualEmbeddingProvider {
        let mut provider = PerceptualEmbeddingProvider::new(hash_size);
        let mut notices = Vec::new();
        provider
            .load(&mut |message: &str| notices.push(message.to_string()))
            .unwrap();
        assert_eq!(notices.len(), 1);
        provider
    }

    fn write_gradient(
        dir: &TempDir,
        name: &str,
        width: u32,
        height: u32,
        flip: bool,
    ) -> std::path::PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v = ((x * 255) / width.max(1)) as u8;
            let v = if flip { 255 - v } else { v };
            Rgb([v, ((y * 255) / height.max(1)) as u8, 128])
        });
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_vector_shape() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_gradient(&temp_dir, "a.png", 64, 48, false);

        let mut provider = loaded(8);
        let vector = provider.embed(&path).unwrap();
        assert_eq!(vector.len(), 64);
        assert!(vector.iter().all(|v| *v == 1.0 || *v == -1.0));
    }

    #[test]
    fn test_resized_copy_is_nearly_identical() {
        let temp_dir = TempDir::new().unwrap();
        let small = write_gradient(&temp_dir, "small.png", 160, 120, false);
        let large = write_gradient(&temp_dir, "large.png", 640, 480, false);
        let flipped = write_gradient(&temp_dir, "flipped.png", 640, 480, true);

        let mut provider = loaded(DEFAULT_HASH_SIZE);
        let a = provider.embed(&small).unwrap();
        let b = provider.embed(&large).unwrap();
        let c = provider.embed(&flipped).unwrap();

        assert!(cosine_similarity(&a, &b) > 0.9);
        assert!(cosine_similarity(&a, &c) < cosine_similarity(&a, &b));
    }

    #[test]
    fn test_embed_requires_load() {
        let mut provider = PerceptualEmbeddingProvider::default();
        let result = provider.embed(Path::new("/non/existent.png"));
        assert!(matches!(result, Err(EmbeddingError::Load { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut provider = loaded(8);
        let result = provider.embed(Path::new("/non/existent.png"));
        assert!(matches!(result, Err(EmbeddingError::Io(_))));
    }
}
