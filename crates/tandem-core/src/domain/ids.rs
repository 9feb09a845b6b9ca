//! 型付き識別子
//!
//! ULID ベースの `Id<T>` を phantom marker で区別します。
//! `PairId` と `PayloadId` は同じ 128-bit 表現ですが、混同するとコンパイルエラーになります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// 各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"pair-", "payload-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 現在時刻から新しい ID を生成
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

// derive だと `T: Clone` などを要求してしまうため手書きする
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// markers
/// 親子ペアのマーカー型
pub enum Pair {}

impl IdMarker for Pair {
    fn prefix() -> &'static str {
        "pair-"
    }
}

/// ペイロードのマーカー型
pub enum Payload {}

impl IdMarker for Payload {
    fn prefix() -> &'static str {
        "payload-"
    }
}

/// スケジュール（タイマー / 非同期ジョブ）のマーカー型
pub enum Schedule {}

impl IdMarker for Schedule {
    fn prefix() -> &'static str {
        "schedule-"
    }
}

/// 接続セッション（配送先）のマーカー型
pub enum Session {}

impl IdMarker for Session {
    fn prefix() -> &'static str {
        "session-"
    }
}

/// Identifier of a parent/child pair.
pub type PairId = Id<Pair>;

/// Identifier of one payload crossing the pair boundary.
pub type PayloadId = Id<Payload>;

/// Identifier of a timer or async job registered with a host.
pub type ScheduleId = Id<Schedule>;

/// Stable identifier of a live session that messages are delivered to.
pub type SessionId = Id<Session>;
