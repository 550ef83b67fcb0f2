use crate::CoreError;
use flipper_docker_schema::HardwareId;
use std::path::{Path, PathBuf};

/// Host name as reported by the kernel; `localhost` if it cannot be read.
#[allow(unsafe_code)]
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_owned();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Create the per-device directory that is bind-mounted into every runner
/// container. Idempotent.
pub fn ensure_toolchain_dir(root: &Path, flipper_id: &HardwareId) -> Result<PathBuf, CoreError> {
    let dir = root.join(flipper_id.as_str());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
