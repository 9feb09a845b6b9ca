//! パイプラインの設定値（1 tick あたりの処理上限、子側の待機間隔）
//!
//! 生成時に一度だけ読みます。キーが無ければ既定値を使います。

use std::time::Duration;

use crate::ports::ConfigProvider;

pub const DEFAULT_MAX_PER_TICK: i64 = 50;
pub const DEFAULT_POLL_INTERVAL_MS: i64 = 1;

/// The pair of keys a pipeline reads its settings from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKeys {
    pub max_per_tick: &'static str,
    pub poll_interval_ms: &'static str,
}

pub const PROCESSOR_KEYS: SettingKeys = SettingKeys {
    max_per_tick: "framework-sending-max",
    poll_interval_ms: "framework-receive-interval",
};

pub const DISPATCHER_KEYS: SettingKeys = SettingKeys {
    max_per_tick: "framework-message-sending-max",
    poll_interval_ms: "framework-message-receive-interval",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Drain cap: most items the parent consumes in one tick.
    pub max_per_tick: usize,
    /// Longest the child waits for an item before re-checking its stop flag.
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_per_tick: DEFAULT_MAX_PER_TICK as usize,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS as u64),
        }
    }
}

impl PipelineSettings {
    /// 0 の上限や 0ms の待機は busy loop になるので 1 に切り上げる
    pub fn new(max_per_tick: usize, poll_interval: Duration) -> Self {
        Self {
            max_per_tick: max_per_tick.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn resolve<C: ConfigProvider + ?Sized>(config: &C, keys: SettingKeys) -> Self {
        let max_per_tick = read_at_least_one(config, keys.max_per_tick, DEFAULT_MAX_PER_TICK);
        let poll_ms = read_at_least_one(config, keys.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        tracing::info!(key = keys.max_per_tick, value = max_per_tick, "pipeline setting");
        tracing::info!(key = keys.poll_interval_ms, value = poll_ms, "pipeline setting");

        Self {
            max_per_tick: usize::try_from(max_per_tick).unwrap_or(usize::MAX),
            poll_interval: Duration::from_millis(poll_ms.unsigned_abs()),
        }
    }
}

fn read_at_least_one<C: ConfigProvider + ?Sized>(config: &C, key: &str, default: i64) -> i64 {
    match config.get_long(key) {
        None => default,
        Some(value) if value < 1 => {
            tracing::warn!(key, value, "setting below 1, using 1");
            1
        }
        Some(value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::StaticConfig;
    use rstest::rstest;

    #[test]
    fn absent_keys_use_hinted_defaults() {
        let settings = PipelineSettings::resolve(&StaticConfig::new(), PROCESSOR_KEYS);
        assert_eq!(settings, PipelineSettings::default());
        assert_eq!(settings.max_per_tick, 50);
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
    }

    #[rstest]
    #[case::configured(Some(7), 7)]
    #[case::absent(None, 50)]
    #[case::zero_clamped(Some(0), 1)]
    #[case::negative_clamped(Some(-3), 1)]
    fn resolves_drain_cap(#[case] configured: Option<i64>, #[case] expected: usize) {
        let mut config = StaticConfig::new();
        if let Some(value) = configured {
            config.set("framework-message-sending-max", value);
        }

        let settings = PipelineSettings::resolve(&config, DISPATCHER_KEYS);
        assert_eq!(settings.max_per_tick, expected);
    }

    #[test]
    fn processor_and_dispatcher_keys_are_distinct() {
        let config = StaticConfig::new()
            .with("framework-sending-max", 10)
            .with("framework-receive-interval", 20);

        let processor = PipelineSettings::resolve(&config, PROCESSOR_KEYS);
        let dispatcher = PipelineSettings::resolve(&config, DISPATCHER_KEYS);

        assert_eq!(processor.max_per_tick, 10);
        assert_eq!(processor.poll_interval, Duration::from_millis(20));
        assert_eq!(dispatcher, PipelineSettings::default());
    }
}
