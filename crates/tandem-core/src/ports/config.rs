//! ConfigProvider port - 設定値の読み出し
//!
//! 値が無いことはエラーではありません。呼び出し側が既定値を使います。

/// Typed access to integer settings.
pub trait ConfigProvider {
    /// Returns `None` when the key is absent or not an integer.
    fn get_long(&self, key: &str) -> Option<i64>;
}

impl<C: ConfigProvider + ?Sized> ConfigProvider for &C {
    fn get_long(&self, key: &str) -> Option<i64> {
        (**self).get_long(key)
    }
}
