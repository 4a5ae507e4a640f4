// Copyright 2025 Stagehand Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Payload compression for staged objects.
//!
//! Warehouses detect compression on load (`COMPRESSION = AUTO`), so a
//! compressed object only needs the right extension on its key.

use stagehand_core::destination::DestinationError;

/// Compression algorithm for staged objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression - fastest writes, largest files.
    #[default]
    None,

    /// Gzip compression (RFC 1952), level 6.
    #[cfg(feature = "gzip")]
    Gzip,

    /// Zstandard compression, level 3.
    #[cfg(feature = "zstandard")]
    Zstd,
}

impl Compression {
    /// Returns the file extension suffix for this compression (with the dot).
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            #[cfg(feature = "gzip")]
            Self::Gzip => ".gz",
            #[cfg(feature = "zstandard")]
            Self::Zstd => ".zst",
        }
    }

    /// Lowercase name used in logs and metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            #[cfg(feature = "gzip")]
            Self::Gzip => "gzip",
            #[cfg(feature = "zstandard")]
            Self::Zstd => "zstd",
        }
    }

    /// Compresses a payload. `None` returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::SerializationError`] if the encoder fails.
    pub fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, DestinationError> {
        match self {
            Self::None => Ok(data),
            #[cfg(feature = "gzip")]
            Self::Gzip => compress_gzip(&data),
            #[cfg(feature = "zstandard")]
            Self::Zstd => compress_zstd(&data),
        }
    }
}

#[cfg(feature = "gzip")]
fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, DestinationError> {
    use flate2::write::GzEncoder;
    use flate2::Compression as GzCompression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
    encoder
        .write_all(data)
        .map_err(|e| DestinationError::serialization(e, "Failed to compress with gzip"))?;

    encoder
        .finish()
        .map_err(|e| DestinationError::serialization(e, "Failed to finalize gzip compression"))
}

#[cfg(feature = "zstandard")]
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>, DestinationError> {
    zstd::encode_all(data, 3)
        .map_err(|e| DestinationError::serialization(e, "Failed to compress with zstd"))
}

/// Builds the object key a staged file is stored under.
///
/// The folder, if any, is joined with `/` (surrounding slashes are
/// ignored) and the compression extension is appended to the name.
///
/// # Examples
///
/// ```rust
/// use stagehand_destinations::compression::{object_key, Compression};
///
/// assert_eq!(object_key(None, "f1.dat", Compression::None), "f1.dat");
/// assert_eq!(object_key(Some("/loads/"), "f1.dat", Compression::None), "loads/f1.dat");
/// ```
#[must_use]
pub fn object_key(folder: Option<&str>, name: &str, compression: Compression) -> String {
    let folder = folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty());
    match folder {
        Some(folder) => format!("{folder}/{name}{}", compression.extension()),
        None => format!("{name}{}", compression.extension()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_passthrough() {
        let data = b"a|b\n1|2\n".to_vec();
        assert_eq!(Compression::None.compress(data.clone()).unwrap(), data);
        assert_eq!(Compression::None.extension(), "");
    }

    #[test]
    fn test_object_key_with_extension() {
        #[cfg(feature = "gzip")]
        assert_eq!(object_key(Some("stage"), "f", Compression::Gzip), "stage/f.gz");

        #[cfg(feature = "zstandard")]
        assert_eq!(object_key(None, "f", Compression::Zstd), "f.zst");

        assert_eq!(object_key(Some(""), "f", Compression::None), "f");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_gzip_round_trips() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let data = b"a|b\n1|2\n".repeat(100);
        let compressed = Compression::Gzip.compress(data.clone()).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[cfg(feature = "zstandard")]
    #[test]
    fn test_zstd_shrinks_payload() {
        let data = b"a|b\n1|2\n".repeat(100);
        let compressed = Compression::Zstd.compress(data.clone()).unwrap();
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), data);
    }
}
