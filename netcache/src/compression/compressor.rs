use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// LZ4 - Fast compression/decompression (default)
    #[default]
    Lz4,
    /// Zstandard - Better compression ratio
    Zstd,
}

impl CompressionAlgorithm {
    /// Build the transform for this algorithm
    pub fn transform(self) -> SharedTransform {
        match self {
            Self::Lz4 => Arc::new(Lz4Transform::default()),
            Self::Zstd => Arc::new(ZstdTransform::default()),
        }
    }
}

/// Reversible byte transform used by the adaptive cache
pub trait CompressionTransform: Send + Sync {
    /// Short identifier for logs and metrics
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Shared transform handle
pub type SharedTransform = Arc<dyn CompressionTransform>;

/// Compress `data`, keeping the output only when it is strictly smaller
///
/// Returns `None` when the transform fails or does not shrink the input.
pub fn compress_if_smaller(transform: &dyn CompressionTransform, data: &[u8]) -> Option<Vec<u8>> {
    match transform.compress(data) {
        Ok(compressed) if compressed.len() < data.len() => {
            debug!(
                "{} compressed: {} → {} bytes (ratio: {:.2}x)",
                transform.name(),
                data.len(),
                compressed.len(),
                compression_ratio(data.len(), compressed.len())
            );
            Some(compressed)
        }
        Ok(compressed) => {
            debug!(
                "{} skipped: output {} bytes not smaller than input {} bytes",
                transform.name(),
                compressed.len(),
                data.len()
            );
            None
        }
        Err(e) => {
            debug!("{} failed: {}", transform.name(), e);
            None
        }
    }
}

/// Calculate compression ratio
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}

/// LZ4 frame transform
#[derive(Debug, Clone)]
pub struct Lz4Transform {
    level: u32,
}

impl Default for Lz4Transform {
    fn default() -> Self {
        // Fast compression
        Self { level: 4 }
    }
}

impl CompressionTransform for Lz4Transform {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.level)
            .build(Vec::new())?;

        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }
}

/// Zstandard transform
#[derive(Debug, Clone)]
pub struct ZstdTransform {
    /// Compression level (1-22)
    level: i32,
}

impl ZstdTransform {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdTransform {
    fn default() -> Self {
        // Balanced compression
        Self { level: 3 }
    }
}

impl CompressionTransform for ZstdTransform {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::decode_all(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible() -> Vec<u8> {
        b"Hello, World! This is a test string that should compress well.".repeat(10)
    }

    #[test]
    fn test_lz4_compression() {
        let transform = Lz4Transform::default();
        let data = compressible();

        let compressed = transform.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = transform.decompress(&compressed).unwrap();
        assert_eq!(data, decompressed);
    }

    #[test]
    fn test_zstd_compression() {
        let transform = ZstdTransform::with_level(5);
        let data = compressible();

        let compressed = transform.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = transform.decompress(&compressed).unwrap();
        assert_eq!(data, decompressed);
    }

    #[test]
    fn test_skip_when_not_smaller() {
        // Tiny inputs grow once frame headers are added
        let transform = Lz4Transform::default();
        assert!(compress_if_smaller(&transform, b"ab").is_none());

        assert!(compress_if_smaller(&transform, &compressible()).is_some());
    }

    #[test]
    fn test_algorithm_selects_transform() {
        assert_eq!(CompressionAlgorithm::Lz4.transform().name(), "lz4");
        assert_eq!(CompressionAlgorithm::Zstd.transform().name(), "zstd");
        assert_eq!(CompressionAlgorithm::default(), CompressionAlgorithm::Lz4);
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(1000, 500), 2.0);
        assert!((compression_ratio(1000, 333) - 3.0).abs() < 0.01);
        assert_eq!(compression_ratio(10, 0), 1.0);
    }
}
