use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::RgbImage;

use crate::config::CONFIG;

/// 识别出错时追加错误日志，并保存出错的原图，返回保存的图片路径
pub fn write_error_dump(
    dir: &Path,
    hough_threshold: u32,
    error: &anyhow::Error,
    raw: &RgbImage,
) -> anyhow::Result<PathBuf> {
    let now = Local::now();
    let log_path = dir.join(&CONFIG.detector.error_log);
    let mut file = OpenOptions::new().create(true).append(true).open(&log_path)?;
    writeln!(file, "Date: {}", now.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file, "Hough threshold: {hough_threshold}")?;
    writeln!(file, "{error:?}")?;
    writeln!(file, "{}", "-".repeat(40))?;

    let image_name = format!(
        "{}{}.png",
        CONFIG.detector.error_image_prefix,
        now.format("%Y%m%d%H%M%S%.3f")
    );
    let image_path = dir.join(&image_name);
    raw.save(&image_path)?;
    Ok(image_path)
}
