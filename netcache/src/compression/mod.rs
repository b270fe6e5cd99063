pub mod compressor;

pub use compressor::{
    CompressionAlgorithm, CompressionTransform, Lz4Transform, SharedTransform, ZstdTransform,
    compress_if_smaller, compression_ratio,
};
