//! The anchor value object and its canonical hash
//!
//! An [`Anchor`] states "this content hash existed at this time". It never
//! carries the content itself. The anchor hash is SHA-256 over the RFC 8785
//! (JCS) serialization of every field, with participants sorted and
//! metadata keys ordered, so construction order never changes the digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::ValidationError;
use crate::hash::Hash;
use crate::metadata::{Metadata, MetadataValue};
use crate::time;

/// Prefix that admits application-defined anchor types
pub const CUSTOM_TYPE_PREFIX: &str = "custom.";

/// Kind of event an anchor attests to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnchorType {
    Meeting,
    Generic,
    Genomics,
    Research,
    Agreement,
    Audit,
    Release,
    PhilosophyDeclaration,
    ObservationLog,
    /// Any `custom.*` type; holds the full string including the prefix
    Custom(String),
}

impl AnchorType {
    /// The fixed vocabulary, excluding custom types
    pub const BUILTIN: [AnchorType; 9] = [
        AnchorType::Meeting,
        AnchorType::Generic,
        AnchorType::Genomics,
        AnchorType::Research,
        AnchorType::Agreement,
        AnchorType::Audit,
        AnchorType::Release,
        AnchorType::PhilosophyDeclaration,
        AnchorType::ObservationLog,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Meeting => "meeting",
            Self::Generic => "generic",
            Self::Genomics => "genomics",
            Self::Research => "research",
            Self::Agreement => "agreement",
            Self::Audit => "audit",
            Self::Release => "release",
            Self::PhilosophyDeclaration => "philosophy_declaration",
            Self::ObservationLog => "observation_log",
            Self::Custom(s) => s,
        }
    }
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(builtin) = Self::BUILTIN.iter().find(|t| t.as_str() == s) {
            return Ok(builtin.clone());
        }
        match s.strip_prefix(CUSTOM_TYPE_PREFIX) {
            Some(rest) if !rest.is_empty() => Ok(Self::Custom(s.to_string())),
            _ => Err(ValidationError::new(
                "anchor_type",
                format!(
                    "'{}' is not one of [{}] and lacks the '{}' prefix",
                    s,
                    Self::BUILTIN
                        .iter()
                        .map(AnchorType::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                    CUSTOM_TYPE_PREFIX
                ),
            )),
        }
    }
}

impl Serialize for AnchorType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AnchorType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Fields covered by the anchor hash, in a fixed shape
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    anchor_type: &'a str,
    source_id: &'a str,
    data_hash: String,
    participants: Vec<&'a str>,
    metadata: &'a Metadata,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_anchor_ref: Option<String>,
}

impl CanonicalPayload<'_> {
    /// Every field spelled out, so distinct anchors never share bytes
    fn fallback_bytes(&self) -> Vec<u8> {
        format!(
            "{:?}:{:?}:{}:{:?}:{:?}:{}:{:?}",
            self.anchor_type,
            self.source_id,
            self.data_hash,
            self.participants,
            self.metadata,
            self.timestamp,
            self.previous_anchor_ref,
        )
        .into_bytes()
    }
}

/// Immutable proof-of-existence record
#[derive(Debug, Clone)]
pub struct Anchor {
    anchor_type: AnchorType,
    source_id: String,
    data_hash: Hash,
    participants: Vec<String>,
    metadata: Metadata,
    timestamp: DateTime<Utc>,
    previous_anchor_ref: Option<Hash>,
    anchor_hash: OnceLock<Hash>,
}

impl Anchor {
    /// Anchor with no participants, no metadata and the current time
    pub fn new(
        anchor_type: impl AsRef<str>,
        source_id: impl Into<String>,
        data_hash: impl AsRef<str>,
    ) -> Result<Self, ValidationError> {
        Self::builder(anchor_type, source_id, data_hash).build()
    }

    pub fn builder(
        anchor_type: impl AsRef<str>,
        source_id: impl Into<String>,
        data_hash: impl AsRef<str>,
    ) -> AnchorBuilder {
        AnchorBuilder {
            anchor_type: anchor_type.as_ref().to_string(),
            source_id: source_id.into(),
            data_hash: data_hash.as_ref().to_string(),
            participants: Vec::new(),
            metadata: Metadata::new(),
            timestamp: None,
            previous_anchor_ref: None,
        }
    }

    pub fn anchor_type(&self) -> &AnchorType {
        &self.anchor_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn data_hash(&self) -> &Hash {
        &self.data_hash
    }

    /// Participants in the order they were supplied
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn previous_anchor_ref(&self) -> Option<&Hash> {
        self.previous_anchor_ref.as_ref()
    }

    /// Digest of the canonical payload, computed once and cached
    pub fn anchor_hash(&self) -> &Hash {
        self.anchor_hash
            .get_or_init(|| Hash::digest(&self.canonical_bytes()))
    }

    /// The bytes that [`Anchor::anchor_hash`] digests
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let payload = self.canonical_payload();
        match serde_jcs::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "JCS serialization failed, using field-wise encoding");
                payload.fallback_bytes()
            }
        }
    }

    fn canonical_payload(&self) -> CanonicalPayload<'_> {
        let mut participants: Vec<&str> = self.participants.iter().map(String::as_str).collect();
        participants.sort_unstable();

        CanonicalPayload {
            anchor_type: self.anchor_type.as_str(),
            source_id: &self.source_id,
            data_hash: self.data_hash.to_hex(),
            participants,
            metadata: &self.metadata,
            timestamp: time::format_timestamp(&self.timestamp),
            previous_anchor_ref: self.previous_anchor_ref.map(|h| h.to_hex()),
        }
    }

    /// All fields plus the computed hash
    pub fn to_record(&self) -> AnchorRecord {
        AnchorRecord {
            anchor_hash: Some(self.anchor_hash().to_hex()),
            anchor_type: self.anchor_type.to_string(),
            source_id: self.source_id.clone(),
            data_hash: self.data_hash.to_hex(),
            participants: self.participants.clone(),
            metadata: self.metadata.clone(),
            timestamp: Some(time::format_timestamp(&self.timestamp)),
            previous_anchor_ref: self.previous_anchor_ref.map(|h| h.to_hex()),
        }
    }

    /// Rebuild an anchor from a record.
    ///
    /// When the record carries an `anchor_hash` it must match the recomputed
    /// digest; a mismatch means the record was altered.
    pub fn from_record(record: &AnchorRecord) -> Result<Self, ValidationError> {
        let mut builder = Self::builder(
            &record.anchor_type,
            record.source_id.clone(),
            &record.data_hash,
        )
        .participants(record.participants.iter().cloned());
        builder.metadata = record.metadata.clone();

        if let Some(ts) = &record.timestamp {
            builder = builder.timestamp(time::parse_timestamp(ts)?);
        }
        if let Some(prev) = &record.previous_anchor_ref {
            builder = builder.previous_anchor_ref(prev);
        }

        let anchor = builder.build()?;
        if let Some(claimed) = &record.anchor_hash {
            let claimed = Hash::parse_field("anchor_hash", claimed)?;
            if &claimed != anchor.anchor_hash() {
                return Err(ValidationError::new(
                    "anchor_hash",
                    format!(
                        "record claims {} but fields hash to {}",
                        claimed,
                        anchor.anchor_hash()
                    ),
                ));
            }
        }
        Ok(anchor)
    }

    /// Parse a record from loosely-typed JSON
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        let record: AnchorRecord = serde_json::from_value(value)
            .map_err(|e| ValidationError::new("record", e.to_string()))?;
        Self::from_record(&record)
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.anchor_hash() == other.anchor_hash()
    }
}

impl Eq for Anchor {}

impl std::hash::Hash for Anchor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self.anchor_hash(), state);
    }
}

impl Serialize for Anchor {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(s)
    }
}

impl<'de> Deserialize<'de> for Anchor {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let record = AnchorRecord::deserialize(d)?;
        Self::from_record(&record).map_err(serde::de::Error::custom)
    }
}

/// Builder that validates every field on [`AnchorBuilder::build`]
#[derive(Debug, Clone)]
pub struct AnchorBuilder {
    anchor_type: String,
    source_id: String,
    data_hash: String,
    participants: Vec<String>,
    metadata: Metadata,
    timestamp: Option<DateTime<Utc>>,
    previous_anchor_ref: Option<String>,
}

impl AnchorBuilder {
    pub fn participant(mut self, participant: impl Into<String>) -> Self {
        self.participants.push(participant.into());
        self
    }

    pub fn participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants.extend(participants.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Defaults to the build time when not set
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(time::normalize(timestamp));
        self
    }

    pub fn previous_anchor_ref(mut self, anchor_hash: impl AsRef<str>) -> Self {
        self.previous_anchor_ref = Some(anchor_hash.as_ref().to_string());
        self
    }

    pub fn build(self) -> Result<Anchor, ValidationError> {
        let anchor_type: AnchorType = self.anchor_type.parse()?;

        let source_id = self.source_id.trim();
        if source_id.is_empty() {
            return Err(ValidationError::new("source_id", "must not be empty"));
        }

        let data_hash = Hash::parse_field("data_hash", &self.data_hash)?;
        let previous_anchor_ref = self
            .previous_anchor_ref
            .as_deref()
            .map(|r| Hash::parse_field("previous_anchor_ref", r))
            .transpose()?;

        Ok(Anchor {
            anchor_type,
            source_id: source_id.to_string(),
            data_hash,
            participants: self.participants,
            metadata: self.metadata,
            timestamp: self.timestamp.unwrap_or_else(time::now),
            previous_anchor_ref,
            anchor_hash: OnceLock::new(),
        })
    }
}

/// Plain, serializable view of an anchor
///
/// `anchor_hash` and `timestamp` are optional on input so that callers can
/// submit records they assembled themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_hash: Option<String>,
    pub anchor_type: String,
    pub source_id: String,
    pub data_hash: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_anchor_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn data_hash() -> String {
        Hash::digest(b"x").to_hex()
    }

    fn fixed_ts() -> DateTime<Utc> {
        time::parse_timestamp("2025-01-15T10:30:00Z").unwrap()
    }

    #[test]
    fn test_anchor_type_vocabulary() {
        for t in AnchorType::BUILTIN.iter() {
            assert_eq!(&t.as_str().parse::<AnchorType>().unwrap(), t);
        }
        assert_eq!(
            "custom.lab_result".parse::<AnchorType>().unwrap(),
            AnchorType::Custom("custom.lab_result".to_string())
        );
        assert!("custom.".parse::<AnchorType>().is_err());
        assert!("invoice".parse::<AnchorType>().is_err());
        assert!("Audit".parse::<AnchorType>().is_err());
    }

    #[test]
    fn test_validation_errors_name_field() {
        let err = Anchor::new("bogus", "s", data_hash()).unwrap_err();
        assert_eq!(err.field, "anchor_type");

        let err = Anchor::new("audit", "   ", data_hash()).unwrap_err();
        assert_eq!(err.field, "source_id");

        let err = Anchor::new("audit", "s", "1234").unwrap_err();
        assert_eq!(err.field, "data_hash");

        let err = Anchor::builder("audit", "s", data_hash())
            .previous_anchor_ref("nope")
            .build()
            .unwrap_err();
        assert_eq!(err.field, "previous_anchor_ref");
    }

    #[test]
    fn test_source_id_is_trimmed() {
        let a = Anchor::new("audit", "  log_1 ", data_hash()).unwrap();
        assert_eq!(a.source_id(), "log_1");
    }

    #[test]
    fn test_prefixed_and_plain_data_hash_are_equal() {
        let a = Anchor::builder("audit", "log_1", data_hash())
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        let b = Anchor::builder("audit", "log_1", format!("0x{}", data_hash()))
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data_hash().to_hex(), data_hash());
    }

    #[test]
    fn test_order_of_participants_and_metadata_is_irrelevant() {
        let a = Anchor::builder("meeting", "m-1", data_hash())
            .participants(["carol", "alice", "bob"])
            .metadata("room", "A")
            .metadata("duration", 30i64)
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        let b = Anchor::builder("meeting", "m-1", data_hash())
            .participants(["bob", "carol", "alice"])
            .metadata("duration", 30i64)
            .metadata("room", "A")
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        assert_eq!(a.anchor_hash(), b.anchor_hash());
        // display order is preserved
        assert_eq!(a.participants()[0], "carol");
    }

    #[test]
    fn test_timestamp_changes_hash() {
        let a = Anchor::builder("audit", "log_1", data_hash())
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        let b = Anchor::builder("audit", "log_1", data_hash())
            .timestamp(fixed_ts() + chrono::Duration::microseconds(1))
            .build()
            .unwrap();
        assert_ne!(a.anchor_hash(), b.anchor_hash());
    }

    #[test]
    fn test_each_hashed_field_changes_hash() {
        let base = || {
            Anchor::builder("meeting", "m-1", data_hash())
                .participants(["alice", "bob"])
                .metadata("room", "A")
                .timestamp(fixed_ts())
        };
        let original = base().build().unwrap();
        let variants = [
            ("anchor_type", Anchor::builder("agreement", "m-1", data_hash())
                .participants(["alice", "bob"])
                .metadata("room", "A")
                .timestamp(fixed_ts())),
            ("data_hash", Anchor::builder("meeting", "m-1", Hash::digest(b"y").to_hex())
                .participants(["alice", "bob"])
                .metadata("room", "A")
                .timestamp(fixed_ts())),
            ("participant added", base().participant("carol")),
            ("participant removed", Anchor::builder("meeting", "m-1", data_hash())
                .participants(["alice"])
                .metadata("room", "A")
                .timestamp(fixed_ts())),
            ("metadata value", base().metadata("room", "B")),
            ("metadata added", base().metadata("floor", 2i64)),
            ("metadata key", Anchor::builder("meeting", "m-1", data_hash())
                .participants(["alice", "bob"])
                .metadata("hall", "A")
                .timestamp(fixed_ts())),
        ];

        for (field, builder) in variants {
            let changed = builder.build().unwrap();
            assert_ne!(original.anchor_hash(), changed.anchor_hash(), "{}", field);
            assert_ne!(
                original.canonical_payload().fallback_bytes(),
                changed.canonical_payload().fallback_bytes(),
                "{}",
                field
            );
        }
    }

    #[test]
    fn test_fallback_encoding_is_order_independent() {
        let a = Anchor::builder("meeting", "m-1", data_hash())
            .participants(["bob", "alice"])
            .metadata("room", "A")
            .metadata("duration", 30i64)
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        let b = Anchor::builder("meeting", "m-1", data_hash())
            .participants(["alice", "bob"])
            .metadata("duration", 30i64)
            .metadata("room", "A")
            .timestamp(fixed_ts())
            .build()
            .unwrap();
        let bytes = a.canonical_payload().fallback_bytes();
        assert!(!bytes.is_empty());
        assert_eq!(bytes, b.canonical_payload().fallback_bytes());
    }

    #[test]
    fn test_previous_ref_changes_hash() {
        let base = Anchor::builder("audit", "log_1", data_hash()).timestamp(fixed_ts());
        let a = base.clone().build().unwrap();
        let b = base
            .previous_anchor_ref(a.anchor_hash().to_hex())
            .build()
            .unwrap();
        assert_ne!(a.anchor_hash(), b.anchor_hash());
        assert_eq!(b.previous_anchor_ref(), Some(a.anchor_hash()));
    }

    #[test]
    fn test_record_omits_absent_previous_ref() {
        let a = Anchor::new("audit", "log_1", data_hash()).unwrap();
        let json = serde_json::to_value(a.to_record()).unwrap();
        assert!(json.get("previous_anchor_ref").is_none());
        assert_eq!(json["anchor_hash"], a.anchor_hash().to_hex());
    }

    #[test]
    fn test_from_record_detects_tampering() {
        let a = Anchor::new("audit", "log_1", data_hash()).unwrap();
        let mut record = a.to_record();
        record.source_id = "log_2".to_string();
        let err = Anchor::from_record(&record).unwrap_err();
        assert_eq!(err.field, "anchor_hash");

        record.anchor_hash = None;
        assert!(Anchor::from_record(&record).is_ok());
    }

    #[test]
    fn test_from_json_without_hash_or_timestamp() {
        let a = Anchor::from_json(serde_json::json!({
            "anchor_type": "release",
            "source_id": "v1.2.0",
            "data_hash": data_hash(),
        }))
        .unwrap();
        assert_eq!(a.anchor_type(), &AnchorType::Release);
        assert!(a.participants().is_empty());
    }

    #[test]
    fn test_serde_uses_record_shape() {
        let a = Anchor::builder("research", "paper-7", data_hash())
            .metadata("doi", "10.1000/182")
            .build()
            .unwrap();
        let json = serde_json::to_string(&a).unwrap();
        let back: Anchor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.metadata(), a.metadata());
    }

    fn arb_anchor_parts() -> impl Strategy<
        Value = (
            usize,
            String,
            [u8; 32],
            Vec<String>,
            Vec<(String, i64)>,
            i64,
        ),
    > {
        (
            0..AnchorType::BUILTIN.len(),
            "[a-z0-9_]{1,12}",
            any::<[u8; 32]>(),
            proptest::collection::vec("[a-z]{1,6}", 0..5),
            proptest::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..5),
            0i64..4_000_000_000,
        )
    }

    fn build(
        type_idx: usize,
        source: &str,
        digest: [u8; 32],
        participants: &[String],
        metadata: &[(String, i64)],
        secs: i64,
    ) -> Anchor {
        let mut builder = Anchor::builder(
            AnchorType::BUILTIN[type_idx].as_str(),
            source,
            Hash::from_bytes(digest).to_hex(),
        )
        .participants(participants.iter().cloned())
        .timestamp(DateTime::from_timestamp(secs, 0).unwrap());
        for (k, v) in metadata {
            builder = builder.metadata(k.clone(), *v);
        }
        builder.build().unwrap()
    }

    proptest! {
        #[test]
        fn prop_hash_ignores_insertion_order(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts()
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let mut p_rev = participants.clone();
            p_rev.reverse();
            // later duplicates win on insert, so dedupe before reversing
            let mut seen = std::collections::BTreeMap::new();
            for (k, v) in &metadata {
                seen.insert(k.clone(), *v);
            }
            let m_dedup: Vec<(String, i64)> = seen.into_iter().rev().collect();
            let b = build(t, &source, digest, &p_rev, &m_dedup, secs);
            prop_assert_eq!(a.anchor_hash(), b.anchor_hash());
        }

        #[test]
        fn prop_record_round_trip(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts()
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let back = Anchor::from_record(&a.to_record()).unwrap();
            prop_assert_eq!(back.anchor_hash(), a.anchor_hash());
        }

        #[test]
        fn prop_data_hash_change_changes_hash(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts(),
            flip in 0usize..32,
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let mut other = digest;
            other[flip] ^= 0x01;
            let b = build(t, &source, other, &participants, &metadata, secs);
            prop_assert_ne!(a.anchor_hash(), b.anchor_hash());
        }

        #[test]
        fn prop_type_change_changes_hash(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts(),
            shift in 1usize..AnchorType::BUILTIN.len(),
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let other = (t + shift) % AnchorType::BUILTIN.len();
            let b = build(other, &source, digest, &participants, &metadata, secs);
            prop_assert_ne!(a.anchor_hash(), b.anchor_hash());
        }

        #[test]
        fn prop_extra_participant_changes_hash(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts()
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let mut more = participants.clone();
            // generated names are lowercase, so this one is always new
            more.push("Z".to_string());
            let b = build(t, &source, digest, &more, &metadata, secs);
            prop_assert_ne!(a.anchor_hash(), b.anchor_hash());
        }

        #[test]
        fn prop_source_change_changes_hash(
            (t, source, digest, participants, metadata, secs) in arb_anchor_parts()
        ) {
            let a = build(t, &source, digest, &participants, &metadata, secs);
            let b = build(t, &format!("{}x", source), digest, &participants, &metadata, secs);
            prop_assert_ne!(a.anchor_hash(), b.anchor_hash());
        }
    }
}
