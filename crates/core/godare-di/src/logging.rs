//! 日志初始化
//!
//! 库内部只通过 `log` 门面输出日志，是否安装后端由调用方决定。

/// 安装 `env_logger`，默认级别为 `info`，可通过 `RUST_LOG` 覆盖
///
/// 重复调用是安全的：已经安装过日志后端时返回 `false`。
pub fn init_logging() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init_logging();
        assert!(!init_logging());
    }
}
