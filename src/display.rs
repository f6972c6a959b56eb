//! Opens rendered results in the platform image viewer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, VisionError};

/// Name of the preview file in the temp directory, replaced on every show.
pub const PREVIEW_FILE: &str = "yolo-plates-show.png";

/// Whether a graphical session is reachable from this process.
pub fn display_available() -> bool {
    has_display(|var| std::env::var_os(var))
}

fn has_display(var: impl Fn(&str) -> Option<OsString>) -> bool {
    if cfg!(target_os = "linux") {
        ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|name| var(name).is_some_and(|v| !v.is_empty()))
    } else {
        true
    }
}

fn viewer_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]).arg(path);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

/// Replaces `path` with `img` as PNG in one rename, so a viewer still
/// holding the previous preview never reads a partial file.
fn write_preview(img: &RgbImage, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = NamedTempFile::new_in(dir)?;
    img.save_with_format(file.path(), image::ImageFormat::Png)?;
    file.persist(path).map_err(|e| VisionError::Io(e.error))?;
    Ok(())
}

/// Shows `img` when a display is reachable.
pub fn show(img: &RgbImage) -> Result<PathBuf> {
    show_on(img, display_available())
}

/// Writes `img` to the preview file and hands it to the viewer, or fails with
/// [`VisionError::DisplayUnavailable`] when `available` is false.
///
/// The viewer runs detached, so the preview outlives this process until the
/// next run overwrites it.
pub fn show_on(img: &RgbImage, available: bool) -> Result<PathBuf> {
    if !available {
        return Err(VisionError::DisplayUnavailable);
    }

    let path = std::env::temp_dir().join(PREVIEW_FILE);
    write_preview(img, &path)?;

    let mut cmd = viewer_command(&path);
    let viewer = format!("{:?}", cmd.get_program());
    debug!("Opening {} with {viewer}", path.display());
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| VisionError::Viewer { viewer, source })?;

    info!("Showing results from {}", path.display());
    Ok(path)
}
