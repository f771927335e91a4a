//! ロギング初期化
//!
//! 端末にはクライアントの出力が流れるため、stderr には `warn` 以上だけを出す。
//! 詳細なログはキャッシュディレクトリ配下の日次ローテーションファイルに書く。

use crate::config::get_env;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// ログレベルを指定する環境変数
pub const LOG_LEVEL_ENV: &str = "HERMIT_LOG_LEVEL";

/// stderr のデフォルトレベル
const DEFAULT_STDERR_LEVEL: &str = "warn";

/// ログファイルのデフォルトレベル
const DEFAULT_FILE_LEVEL: &str = "info";

/// ログファイル名のプレフィックス
pub const LOG_FILE_PREFIX: &str = "hermit.log";

/// ファイルログをフラッシュするためのガード
///
/// プロセス終了まで保持すること。
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn filter_for(default_level: &str) -> EnvFilter {
    match get_env(LOG_LEVEL_ENV) {
        Some(level) => EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(default_level)),
        None => EnvFilter::new(default_level),
    }
}

/// ロギングを初期化する
///
/// `log_dir` が作成できない場合は stderr のみに出力する。
pub fn init(log_dir: &Path) -> io::Result<LoggingGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(filter_for(DEFAULT_STDERR_LEVEL));

    let (file_layer, file_guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter_for(DEFAULT_FILE_LEVEL));
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "Warning: cannot create log directory {}: {}",
                log_dir.display(),
                e
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// 最新のログファイルのパス
///
/// ログディレクトリが存在しない、またはファイルがない場合は `None`。
pub fn latest_log_file(log_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(log_dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        // 日付サフィックスは辞書順で並ぶ
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_latest_log_file_picks_newest_date() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hermit.log.2026-01-01"), "").unwrap();
        std::fs::write(dir.path().join("hermit.log.2026-01-03"), "").unwrap();
        std::fs::write(dir.path().join("other.txt"), "").unwrap();

        let latest = latest_log_file(dir.path()).unwrap();
        assert!(latest.ends_with("hermit.log.2026-01-03"));
    }

    #[test]
    fn test_latest_log_file_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_log_file(&dir.path().join("absent")), None);
    }

    #[test]
    #[serial]
    fn test_invalid_level_falls_back_to_default() {
        std::env::set_var(LOG_LEVEL_ENV, "hermit=loud");
        let filter = filter_for("warn");
        assert_eq!(filter.to_string(), "warn");
        std::env::remove_var(LOG_LEVEL_ENV);
    }
}
