use std::fmt;
use std::sync::Arc;

use attest_store::{decompress_with, BackendError, Codec, Compressor, StoredEntry};
use attest_types::Value;

use crate::entry::Entry;
use crate::error::{LedgerError, LedgerResult};

/// Converts between ledger [`Entry`] values and backend [`StoredEntry`]
/// records.
///
/// Payload and metadata are `bincode`-encoded [`Value`]s, compressed with
/// the configured [`Compressor`] if any. Records are decoded according to
/// their own `codec` tag, not the current configuration.
#[derive(Clone, Default)]
pub struct EntryCodec {
    compressor: Option<Arc<dyn Compressor>>,
}

impl EntryCodec {
    pub fn new(compressor: Option<Arc<dyn Compressor>>) -> Self {
        Self { compressor }
    }

    /// Codec tag written on new records.
    pub fn codec(&self) -> Codec {
        self.compressor.as_ref().map_or(Codec::None, |c| c.codec())
    }

    pub fn encode(&self, entry: &Entry) -> LedgerResult<StoredEntry> {
        let timestamp = entry.timestamp();
        Ok(StoredEntry {
            sequence: entry.sequence(),
            timestamp_secs: timestamp.timestamp(),
            timestamp_nanos: timestamp.timestamp_subsec_nanos(),
            payload: self.pack(entry.payload())?,
            metadata: entry.metadata().map(|m| self.pack(m)).transpose()?,
            prev_hash: entry.prev_hash().clone(),
            content_hash: entry.content_hash().clone(),
            signature: entry.signature().map(<[u8]>::to_vec),
            signer_id: entry.signer_id().map(str::to_string),
            codec: self.codec(),
            commit: true,
        })
    }

    pub fn decode(&self, stored: &StoredEntry) -> LedgerResult<Entry> {
        let sequence = stored.sequence;
        let fail = |reason: String| LedgerError::Decode { sequence, reason };

        let timestamp = stored.timestamp().ok_or_else(|| {
            fail(format!(
                "timestamp {}.{:09} out of range",
                stored.timestamp_secs, stored.timestamp_nanos
            ))
        })?;
        let payload = self
            .unpack(stored.codec, &stored.payload)
            .map_err(|e| fail(format!("payload: {e}")))?;
        let metadata = stored
            .metadata
            .as_deref()
            .map(|m| self.unpack(stored.codec, m))
            .transpose()
            .map_err(|e| fail(format!("metadata: {e}")))?;

        Ok(Entry::from_parts(
            sequence,
            timestamp,
            payload,
            metadata,
            stored.prev_hash.clone(),
            stored.content_hash.clone(),
            stored.signature.clone(),
            stored.signer_id.clone(),
        ))
    }

    /// Records tagged with the configured compressor's codec go through it,
    /// so its output cap applies. Other tags use the defaults.
    fn unpack(&self, codec: Codec, bytes: &[u8]) -> Result<Value, BackendError> {
        let raw = match &self.compressor {
            Some(c) if c.codec() == codec => c.decompress(bytes)?,
            _ => decompress_with(codec, bytes)?,
        };
        Ok(bincode::deserialize(&raw)?)
    }

    fn pack(&self, value: &Value) -> LedgerResult<Vec<u8>> {
        let raw = bincode::serialize(value).map_err(BackendError::from)?;
        match &self.compressor {
            Some(c) => Ok(c.compress(&raw)?),
            None => Ok(raw),
        }
    }
}


impl fmt::Debug for EntryCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCodec")
            .field("codec", &self.codec())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use attest_store::ZstdCompressor;
    use attest_types::Digest;
    use chrono::DateTime;

    use super::*;

    fn entry(payload: Value, metadata: Option<Value>) -> Entry {
        Entry::from_parts(
            7,
            DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap(),
            payload,
            metadata,
            Digest::zero(32),
            Digest::from_bytes([1u8; 32]),
            Some(vec![9, 9]),
            Some("k1".into()),
        )
    }

    #[test]
    fn plain_roundtrip() {
        let codec = EntryCodec::default();
        let original = entry(
            Value::map([("user", Value::from("alice")), ("n", Value::from(3))]),
            Some(Value::from("meta")),
        );
        let stored = codec.encode(&original).unwrap();
        assert_eq!(stored.codec, Codec::None);
        assert_eq!(stored.timestamp_nanos, 123_456_789);
        assert_eq!(codec.decode(&stored).unwrap(), original);
    }

    #[test]
    fn compressed_records_decode_without_compressor() {
        let writer = EntryCodec::new(Some(Arc::new(ZstdCompressor::default())));
        let original = entry(Value::from("audit ".repeat(200)), None);
        let stored = writer.encode(&original).unwrap();
        assert_eq!(stored.codec, Codec::Zstd);
        assert!(stored.payload.len() < 1200);
        assert_eq!(EntryCodec::default().decode(&stored).unwrap(), original);
    }

    #[test]
    fn output_cap_of_configured_compressor_applies() {
        let writer = EntryCodec::new(Some(Arc::new(ZstdCompressor::default())));
        let stored = writer.encode(&entry(Value::from("a".repeat(1 << 16)), None)).unwrap();

        let capped = EntryCodec::new(Some(Arc::new(ZstdCompressor::default().with_max_output(512))));
        let err = capped.decode(&stored).unwrap_err();
        assert!(matches!(err, LedgerError::Decode { sequence: 7, ref reason } if reason.contains("exceeds")));
        assert!(writer.decode(&stored).is_ok());
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let codec = EntryCodec::default();
        let mut stored = codec.encode(&entry(Value::Null, None)).unwrap();
        stored.payload = vec![0xff; 3];
        let err = codec.decode(&stored).unwrap_err();
        assert!(matches!(err, LedgerError::Decode { sequence: 7, .. }));
    }

    #[test]
    fn out_of_range_timestamp_is_decode_error() {
        let codec = EntryCodec::default();
        let mut stored = codec.encode(&entry(Value::Null, None)).unwrap();
        stored.timestamp_secs = i64::MAX;
        assert!(matches!(codec.decode(&stored), Err(LedgerError::Decode { .. })));
    }
}
