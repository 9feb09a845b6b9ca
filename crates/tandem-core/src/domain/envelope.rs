//! PayloadEnvelope - 親子間を渡るデータのメタ情報
//!
//! 送出元（producer）の名前とバージョンを、データが境界を越える時点で固定します。
//! 生成後は変更されません。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PayloadId;
use crate::ports::Clock;

/// 送出元の宣言（名前 + 宣言バージョン文字列）
///
/// 宣言バージョンは envelope 生成のたびに解析されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Producer {
    name: String,
    version: String,
}

impl Producer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_version(&self) -> &str {
        &self.version
    }
}

/// Semantic version of a producer as parsed from its declared version string.
///
/// Components the declaration does not carry are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerVersion {
    pub major: Option<i64>,
    pub minor: Option<i64>,
    pub revision: Option<i64>,
    pub snapshot: bool,
}

impl ProducerVersion {
    /// Parse a declared version such as `1.2.3`, `1.0-SNAPSHOT` or `2 7`.
    ///
    /// Tokens are split on `.`, space and `-`. The first three numeric tokens
    /// fill major, minor and revision; `snapshot` (any case) sets the flag.
    /// Unparseable tokens are logged and skipped.
    pub fn parse(declared: &str) -> Self {
        let mut version = Self::default();
        for token in declared.split(['.', ' ', '-']) {
            if token.eq_ignore_ascii_case("snapshot") {
                version.snapshot = true;
                continue;
            }
            match token.parse::<i64>() {
                Ok(num) => {
                    if version.major.is_none() {
                        version.major = Some(num);
                    } else if version.minor.is_none() {
                        version.minor = Some(num);
                    } else if version.revision.is_none() {
                        version.revision = Some(num);
                    }
                }
                Err(err) => {
                    tracing::info!(token, declared, error = %err, "unparseable version token");
                }
            }
        }
        version
    }
}

impl fmt::Display for ProducerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(major) = self.major {
            write!(f, "{major}")?;
        }
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
        }
        if let Some(revision) = self.revision {
            write!(f, ".{revision}")?;
        }
        if self.snapshot {
            f.write_str("-SNAPSHOT")?;
        }
        Ok(())
    }
}

/// Metadata attached to every unit of data crossing the parent/child boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    id: PayloadId,
    producer: String,
    version: ProducerVersion,
    created_at: DateTime<Utc>,
}

impl PayloadEnvelope {
    pub fn new(producer: &Producer) -> Self {
        Self::stamped(producer, Utc::now())
    }

    /// Clock を差し替えて生成（テスト用の FixedClock など）
    pub fn with_clock(producer: &Producer, clock: &dyn Clock) -> Self {
        Self::stamped(producer, clock.now())
    }

    fn stamped(producer: &Producer, created_at: DateTime<Utc>) -> Self {
        Self {
            id: PayloadId::generate(),
            producer: producer.name().to_string(),
            version: ProducerVersion::parse(producer.declared_version()),
            created_at,
        }
    }

    pub fn id(&self) -> PayloadId {
        self.id
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn version(&self) -> ProducerVersion {
        self.version
    }

    pub fn is_snapshot(&self) -> bool {
        self.version.snapshot
    }

    /// 数値版アクセサ: 宣言に無い成分は -1
    pub fn major_version(&self) -> i64 {
        self.version.major.unwrap_or(-1)
    }

    pub fn minor_version(&self) -> i64 {
        self.version.minor.unwrap_or(-1)
    }

    pub fn revision(&self) -> i64 {
        self.version.revision.unwrap_or(-1)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Anything that crosses the pair boundary carries an envelope.
pub trait Payload: Send + 'static {
    fn envelope(&self) -> &PayloadEnvelope;
}

impl Payload for PayloadEnvelope {
    fn envelope(&self) -> &PayloadEnvelope {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::full("1.2.3", Some(1), Some(2), Some(3), false)]
    #[case::snapshot("1.0-SNAPSHOT", Some(1), Some(0), None, true)]
    #[case::lowercase_snapshot("2.4.1-snapshot", Some(2), Some(4), Some(1), true)]
    #[case::space_separated("3 9", Some(3), Some(9), None, false)]
    #[case::extra_components_ignored("1.2.3.4", Some(1), Some(2), Some(3), false)]
    #[case::garbage_skipped("1.beta.2", Some(1), Some(2), None, false)]
    #[case::empty("", None, None, None, false)]
    fn parses_declared_versions(
        #[case] declared: &str,
        #[case] major: Option<i64>,
        #[case] minor: Option<i64>,
        #[case] revision: Option<i64>,
        #[case] snapshot: bool,
    ) {
        let version = ProducerVersion::parse(declared);
        assert_eq!(version.major, major);
        assert_eq!(version.minor, minor);
        assert_eq!(version.revision, revision);
        assert_eq!(version.snapshot, snapshot);
    }

    #[rstest]
    #[case::full("1.2.3", 1, 2, 3)]
    #[case::no_revision("1.0-SNAPSHOT", 1, 0, -1)]
    #[case::major_only("7", 7, -1, -1)]
    #[case::nothing_numeric("dev", -1, -1, -1)]
    fn envelope_reports_missing_components_as_minus_one(
        #[case] declared: &str,
        #[case] major: i64,
        #[case] minor: i64,
        #[case] revision: i64,
    ) {
        let envelope = PayloadEnvelope::new(&Producer::new("tandem", declared));
        assert_eq!(envelope.major_version(), major);
        assert_eq!(envelope.minor_version(), minor);
        assert_eq!(envelope.revision(), revision);
    }

    #[test]
    fn renders_version_string() {
        assert_eq!(ProducerVersion::parse("1.0-SNAPSHOT").to_string(), "1.0-SNAPSHOT");
        assert_eq!(ProducerVersion::parse("5.12.7").to_string(), "5.12.7");
        assert_eq!(ProducerVersion::parse("x").to_string(), "");
    }

    #[test]
    fn envelope_captures_producer_at_creation() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let producer = Producer::new("eco-chat", "1.4-SNAPSHOT");

        let envelope = PayloadEnvelope::with_clock(&producer, &FixedClock::new(fixed));

        assert_eq!(envelope.producer(), "eco-chat");
        assert_eq!(envelope.version().major, Some(1));
        assert_eq!(envelope.version().minor, Some(4));
        assert!(envelope.is_snapshot());
        assert_eq!(envelope.created_at(), fixed);
    }

    #[test]
    fn each_envelope_gets_its_own_id() {
        let producer = Producer::new("eco-chat", "1.0");
        let a = PayloadEnvelope::new(&producer);
        let b = PayloadEnvelope::new(&producer);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn envelope_survives_serialization() {
        let envelope = PayloadEnvelope::new(&Producer::new("eco-store", "0.9.1"));
        let json = serde_json::to_string(&envelope).unwrap();
        let back: PayloadEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }
}
