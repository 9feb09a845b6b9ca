//! ConfigProvider の実装
//!
//! - **StaticConfig**: コード上で組み立てるキー/値（テスト・組み込み用）
//! - **TomlConfig**: TOML テーブル。`a.b.c` 形式のキーはネストしたテーブルを辿る

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TandemError};
use crate::ports::ConfigProvider;

#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    values: HashMap<String, i64>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), value);
    }
}

impl ConfigProvider for StaticConfig {
    fn get_long(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TomlConfig {
    table: toml::Table,
}

impl TomlConfig {
    pub fn parse(source: &str) -> Result<Self> {
        let table = source
            .parse::<toml::Table>()
            .map_err(|e| TandemError::Config(format!("toml parse: {e}")))?;
        Ok(Self { table })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&source)
    }

    fn lookup(&self, key: &str) -> Option<&toml::Value> {
        // フラットなキーを優先（"framework-sending-max" など）
        if let Some(value) = self.table.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let mut current = self.table.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }
}

impl ConfigProvider for TomlConfig {
    fn get_long(&self, key: &str) -> Option<i64> {
        self.lookup(key)?.as_integer()
    }
}
