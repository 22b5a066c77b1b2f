//! 二值化和霍夫变换的接口，识别逻辑只依赖这两个trait，测试时可以换成桩实现

use image::GrayImage;
use imageproc::hough::{detect_lines, LineDetectionOptions};

use crate::config::CONFIG;
use crate::models::card::Line;
use crate::my_utils::image::binarize;

pub trait Binarize {
    /// 灰度图转二值图，墨迹为255
    fn binarize(&self, gray: &GrayImage) -> GrayImage;
}

pub trait HoughLines {
    /// 按投票阈值检测直线，theta为弧度
    fn hough_lines(&self, mask: &GrayImage, vote_threshold: u32) -> Vec<Line>;
}

/// 局部均值自适应二值化
#[derive(Debug, Clone)]
pub struct AdaptiveMean {
    pub block_size: u32,
    pub offset: f64,
}

impl Default for AdaptiveMean {
    fn default() -> Self {
        AdaptiveMean {
            block_size: CONFIG.image_process.adaptive_block_size,
            offset: CONFIG.image_process.adaptive_offset,
        }
    }
}

impl Binarize for AdaptiveMean {
    fn binarize(&self, gray: &GrayImage) -> GrayImage {
        binarize(gray, self.block_size, self.offset)
    }
}

/// imageproc的霍夫变换，角度分辨率1度
#[derive(Debug, Clone)]
pub struct ImageprocHough {
    pub suppression_radius: u32,
}

impl Default for ImageprocHough {
    fn default() -> Self {
        ImageprocHough {
            suppression_radius: CONFIG.line_detect.suppression_radius,
        }
    }
}

impl HoughLines for ImageprocHough {
    fn hough_lines(&self, mask: &GrayImage, vote_threshold: u32) -> Vec<Line> {
        let options = LineDetectionOptions {
            vote_threshold,
            suppression_radius: self.suppression_radius,
        };
        detect_lines(mask, options)
            .into_iter()
            .map(|l| Line::new(l.r as f64, (l.angle_in_degrees as f64).to_radians()))
            .collect()
    }
}
