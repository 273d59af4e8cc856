// Copyright 2026 gridtier Project Authors
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

use std::hash::Hasher;

use bytes::Bytes;
use gridtier_common::layout::EntryLayout;
use twox_hash::XxHash64;

use crate::{
    compress::Compression,
    error::{Error, Result},
};

/// Trailer appended to every packed layout: 8 checksum bytes plus 1 compression tag byte.
const TRAILER_LEN: usize = 9;

/// Payload checksummer.
#[derive(Debug)]
pub struct Checksummer;

impl Checksummer {
    /// 64 bit checksum of a buffer.
    pub fn checksum64(buf: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(buf);
        hasher.finish()
    }
}

/// Packs an [`EntryLayout`] into self-describing bytes.
#[derive(Debug)]
pub struct LayoutSerializer;

impl LayoutSerializer {
    /// Serialize a layout: compressed bincode body followed by checksum and compression tag.
    pub fn serialize(layout: &EntryLayout, compression: Compression) -> Result<Bytes> {
        let mut layout = layout.clone();
        layout.pack()?;

        let mut buffer = vec![];
        match compression {
            Compression::None => {
                bincode::serialize_into(&mut buffer, &layout)?;
            }
            Compression::Lz4 => {
                let encoder = lz4::EncoderBuilder::new()
                    .checksum(lz4::ContentChecksum::NoChecksum)
                    .auto_flush(true)
                    .build(&mut buffer)?;
                bincode::serialize_into(encoder, &layout)?;
            }
            Compression::Zstd => {
                let encoder = zstd::Encoder::new(&mut buffer, 0)?.auto_finish();
                bincode::serialize_into(encoder, &layout)?;
            }
        }

        let checksum = Checksummer::checksum64(&buffer);
        buffer.extend_from_slice(&checksum.to_le_bytes());
        buffer.push(compression.to_u8());

        Ok(Bytes::from(buffer))
    }
}

/// Restores an [`EntryLayout`] from packed bytes.
#[derive(Debug)]
pub struct LayoutDeserializer;

impl LayoutDeserializer {
    /// Deserialize a packed layout, verifying the checksum.
    pub fn deserialize(buf: &[u8]) -> Result<EntryLayout> {
        if buf.len() < TRAILER_LEN {
            return Err(Error::other(anyhow::anyhow!(
                "packed layout truncated: {} bytes",
                buf.len()
            )));
        }
        let (body, trailer) = buf.split_at(buf.len() - TRAILER_LEN);

        let mut checksum_bytes = [0u8; 8];
        checksum_bytes.copy_from_slice(&trailer[..8]);
        let expected = u64::from_le_bytes(checksum_bytes);
        let get = Checksummer::checksum64(body);
        if expected != get {
            return Err(Error::ChecksumMismatch { expected, get });
        }

        let compression = Compression::try_from_u8(trailer[8])
            .ok_or_else(|| Error::other(anyhow::anyhow!("unknown compression tag: {}", trailer[8])))?;

        let layout: EntryLayout = match compression {
            Compression::None => bincode::deserialize_from(body)?,
            Compression::Lz4 => {
                let decoder = lz4::Decoder::new(body)?;
                bincode::deserialize_from(decoder)?
            }
            Compression::Zstd => {
                let decoder = zstd::Decoder::new(body)?;
                bincode::deserialize_from(decoder)?
            }
        };

        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::{GridEntry, PropertyValue};

    use super::*;

    fn layout() -> EntryLayout {
        let entry = GridEntry::new(
            "serde-1",
            11,
            vec![
                PropertyValue::Int(-40),
                PropertyValue::Text("payload payload payload payload".to_string()),
                PropertyValue::Bytes(vec![0xab; 256]),
            ],
        );
        EntryLayout::from_entry(&entry)
    }

    #[test]
    fn test_roundtrip_all_compressions() {
        for compression in [Compression::None, Compression::Lz4, Compression::Zstd] {
            let buf = LayoutSerializer::serialize(&layout(), compression).unwrap();
            let mut restored = LayoutDeserializer::deserialize(&buf).unwrap();
            restored.unpack().unwrap();
            let mut expected = layout();
            expected.unpack().unwrap();
            assert_eq!(restored, expected, "compression: {compression:?}");
        }
    }

    #[test]
    fn test_corrupted_body_is_rejected() {
        let buf = LayoutSerializer::serialize(&layout(), Compression::None).unwrap();
        let mut corrupted = buf.to_vec();
        corrupted[2] ^= 0xff;
        let err = LayoutDeserializer::deserialize(&corrupted).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_truncated_buffer_is_rejected() {
        assert!(LayoutDeserializer::deserialize(&[1, 2, 3]).is_err());
    }
}
