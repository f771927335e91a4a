//! アトミックなファイル書き込み
//!
//! 同じディレクトリに一時ファイルを書き、fsync後にrenameで置き換える。
//! 読み手が書きかけの内容を目にすることはない。

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}.tmp", file_name, &suffix[..8]))
}

/// 一時ファイルを作成する。Unixでは作成時点から `mode` を適用する
#[cfg(unix)]
fn create_temp(path: &Path, mode: Option<u32>) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    if let Some(mode) = mode {
        options.mode(mode);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn create_temp(path: &Path, _mode: Option<u32>) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// `contents` を `path` にアトミックに書き込む
///
/// `mode` を指定した場合、Unixでは一時ファイルをそのパーミッションで作成し、
/// umaskの影響を受けないようrename前にもう一度設定する。
/// 失敗時は一時ファイルを削除し、既存のファイルには手を付けない。
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = create_temp(&tmp, mode)?;
        file.write_all(contents)?;
        file.sync_all()?;

        if let Some(mode) = mode {
            set_mode(&tmp, mode)?;
        }

        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// ファイルを削除する（存在しなければ何もしない）
///
/// # Returns
///
/// 実際に削除した場合は `true`
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
