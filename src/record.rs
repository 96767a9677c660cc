//! Record model: what a parsed line looks like, and what gets written to a shard.

use serde::{Deserialize, Serialize};

/// The binary payload stored for one device.
///
/// Encoded with `postcard`; the field order is part of the stored format and must
/// not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserApps {
    pub apps: Vec<u32>,
    pub lat: f64,
    pub lon: f64,
}

impl UserApps {
    /// Serialize to the stored byte format.
    ///
    /// # Errors
    ///
    /// Returns an error if `postcard` cannot serialize the value.
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode a payload previously produced by [`UserApps::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// One successfully parsed input line.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedRecord {
    pub device_type: String,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub app_ids: Vec<u32>,
}

impl ParsedRecord {
    /// Store key: `device_type:device_id`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }

    /// Consume the record and produce the unit of work for its shard.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn encode(self) -> Result<EncodedRecord, postcard::Error> {
        let key = self.key();
        let payload = UserApps {
            apps: self.app_ids,
            lat: self.latitude,
            lon: self.longitude,
        }
        .encode()?;
        Ok(EncodedRecord {
            shard: self.device_type,
            key,
            payload,
        })
    }
}

/// An encoded record, owned by exactly one writer stage until written or dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Device-type label of the shard this record belongs to.
    pub shard: String,
    pub key: String,
    pub payload: Vec<u8>,
}
