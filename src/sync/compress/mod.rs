pub mod gzip;
pub mod xz;

use crate::sync::finish::Finish;
use crate::sync::function_path;
use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use crate::sync::result_error::WithDebugObjectAndFnName;
use derive_more::From;
use flate2::read::GzDecoder;
use function_name::named;
use flate2::write::GzEncoder;
use io_enum::{Read, Write};
use liblzma::read::XzDecoder;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::{Read, Write};
use std::result;
use validator::{Validate, ValidationErrors};

#[derive(Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    XzEncoder(XzEncoder<W>),
    GzEncoder(GzEncoder<W>),
}

#[derive(Read, From)]
pub enum Decompressor<R: Read> {
    None(R),
    XzDecoder(XzDecoder<R>),
    GzDecoder(GzDecoder<R>),
}

#[derive(Clone, Default, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "method")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    #[default]
    None,
    Xz(xz::XzConfig),
    Gzip(gzip::GzipConfig),
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            CompressorConfig::None => Ok(()),
            CompressorConfig::Xz(xz) => xz.validate(),
            CompressorConfig::Gzip(gz) => gz.validate(),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::XzEncoder(w) => w.finish(),
            Compressor::GzEncoder(w) => w.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    #[named]
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            CompressorConfig::None => Ok(Compressor::None(writer)),
            CompressorConfig::Xz(xz) => xz.build_compressor(writer),
            CompressorConfig::Gzip(gz) => gz.build_compressor(writer),
        }
        .with_debug_object_and_fn_name(self.clone(), function_path!())
    }
}

impl CompressorConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, CompressorConfig::None)
    }

    pub fn file_ext(&self) -> Option<&'static str> {
        match self {
            CompressorConfig::None => None,
            CompressorConfig::Xz(_) => Some("xz"),
            CompressorConfig::Gzip(_) => Some("gz"),
        }
    }

    /// Stable method tag persisted in the metadata store. For plain
    /// artifacts the tag doubles as the file suffix; encrypted paths carry
    /// no suffix at all.
    pub fn method_name(&self) -> Option<&'static str> {
        self.file_ext()
    }

    /// Reconstructs a decompression-capable config from a persisted method
    /// tag or artifact suffix. The level is irrelevant for decoding.
    pub fn from_method_name(name: &str) -> Result<CompressorConfig> {
        match name {
            "xz" => Ok(xz::XzConfig::default().into()),
            "gz" => Ok(gzip::GzipConfig::default().into()),
            other => Err(Error::CapabilityUnavailable(format!(
                "unknown compression method {other:?}"
            ))),
        }
    }

    pub fn build_decompressor<R: Read>(&self, reader: R) -> Result<Decompressor<R>> {
        match self {
            CompressorConfig::None => Ok(Decompressor::None(reader)),
            CompressorConfig::Xz(_) => Ok(XzDecoder::new(reader).into()),
            CompressorConfig::Gzip(_) => Ok(GzDecoder::new(reader).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(config: &CompressorConfig, data: &[u8]) -> Vec<u8> {
        let mut compressor = config.build_compressor(Vec::new()).unwrap();
        compressor.write_all(data).unwrap();
        let compressed = compressor.finish().unwrap();

        let mut decompressor = config
            .build_decompressor(Cursor::new(compressed))
            .unwrap();
        let mut out = Vec::new();
        decompressor.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_none_round_trip() {
        let data = b"no compression at all".to_vec();
        assert_eq!(round_trip(&CompressorConfig::None, &data), data);
    }

    #[test]
    fn test_xz_round_trip() {
        let data = vec![7u8; 65536];
        let config = CompressorConfig::Xz(Default::default());
        assert_eq!(round_trip(&config, &data), data);
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"gzip round trip data".repeat(100);
        let config = CompressorConfig::Gzip(Default::default());
        assert_eq!(round_trip(&config, &data), data);
    }

    #[test]
    fn test_file_ext() {
        assert_eq!(CompressorConfig::None.file_ext(), None);
        assert_eq!(
            CompressorConfig::Xz(Default::default()).file_ext(),
            Some("xz")
        );
        assert_eq!(
            CompressorConfig::Gzip(Default::default()).file_ext(),
            Some("gz")
        );
    }

    #[test]
    fn test_from_method_name() {
        assert_eq!(
            CompressorConfig::from_method_name("xz").unwrap().file_ext(),
            Some("xz")
        );
        assert_eq!(
            CompressorConfig::from_method_name("gz").unwrap().file_ext(),
            Some("gz")
        );
        match CompressorConfig::from_method_name("lz4") {
            Err(Error::CapabilityUnavailable(_)) => (),
            other => panic!("Expected CapabilityUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_compressor_config_serialization() {
        let config: CompressorConfig = serde_json::from_str("{\"method\":\"none\"}").unwrap();
        assert!(config.is_none());

        let config: CompressorConfig =
            serde_json::from_str("{\"method\":\"xz\",\"level\":5}").unwrap();
        assert_eq!(config.file_ext(), Some("xz"));
    }
}
