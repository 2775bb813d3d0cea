use std::fs;
use std::io;
use std::path::Path;

use crate::core::error::DownloadError;

/// 把下载完成的临时文件移动到目标位置
///
/// 无论成功与否，返回时临时文件都已不存在。目标所在目录不会被自动创建。
pub fn move_into_place(temp: &Path, destination: &Path) -> Result<(), DownloadError> {
    let result = match fs::rename(temp, destination) {
        Ok(()) => Ok(()),
        // 跨文件系统时 rename 会失败，退回到复制
        Err(rename_err) => match fs::copy(temp, destination) {
            Ok(_) => Ok(()),
            Err(copy_err) => {
                log::debug!("移动失败: rename: {}, copy: {}", rename_err, copy_err);
                // 复制到一半的目标文件不能留下
                if destination.is_file() {
                    remove_if_exists(destination);
                }
                Err(DownloadError::FinalizeFailed {
                    destination: destination.to_path_buf(),
                    reason: rename_err.to_string(),
                })
            }
        },
    };

    remove_if_exists(temp);
    result
}

/// 删除文件，文件不存在不算错误
pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("已删除临时文件: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("无法删除临时文件 {}: {}", path.display(), e),
    }
}
