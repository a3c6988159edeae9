pub mod embedding;
pub mod perceptual;
pub mod scanner;

pub use embedding::{EmbeddingBatch, EmbeddingProvider, EmbeddingWorker};
pub use perceptual::PerceptualEmbeddingProvider;
pub use scanner::ScannerService;
