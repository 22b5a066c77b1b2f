//! 帧间状态：霍夫阈值轮换、连续失败计数和画面翻转

use crate::config::CONFIG;
use crate::models::scan_input::{DetectionOptions, ImageTransformer};

const DEFAULT_THRESHOLD: u32 = 200;

/// 由调用方持有，每帧识别时以&mut传入
#[derive(Debug, Clone)]
pub struct DetectorContext {
    thresholds: Vec<u32>,
    index: usize,
    failures: u32,
    locked: bool,
    transformer: ImageTransformer,
}

impl DetectorContext {
    /// 给定固定阈值时只用这一个，否则按配置轮换
    pub fn new(fixed_hough_threshold: Option<u32>) -> Self {
        let thresholds = match fixed_hough_threshold {
            Some(threshold) => vec![threshold],
            None if !CONFIG.line_detect.hough_thresholds.is_empty() => CONFIG.line_detect.hough_thresholds.clone(),
            None => {
                log::warn!("no hough thresholds configured, using {DEFAULT_THRESHOLD}");
                vec![DEFAULT_THRESHOLD]
            }
        };
        DetectorContext {
            thresholds,
            index: 0,
            failures: 0,
            locked: false,
            transformer: ImageTransformer::identity(),
        }
    }

    /// 按识别选项里的固定阈值创建
    pub fn from_options(options: &DetectionOptions) -> Self {
        DetectorContext::new(options.fixed_hough_threshold)
    }

    pub fn hough_threshold(&self) -> u32 {
        self.thresholds.get(self.index).copied().unwrap_or(DEFAULT_THRESHOLD)
    }

    /// 换下一个阈值，锁定时不换
    pub fn next_hough_threshold(&mut self) {
        if !self.locked {
            self.advance();
        }
        self.failures = 0;
    }

    /// 连续失败超过阈值后强制换阈值，锁定时也换
    pub fn notify_failure(&mut self) {
        self.failures += 1;
        if self.failures > CONFIG.detector.failures_threshold {
            self.advance();
            self.failures = 0;
        }
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % self.thresholds.len();
        log::debug!("hough threshold -> {}", self.hough_threshold());
    }

    pub fn notify_success(&mut self) {
        self.failures = 0;
    }

    pub fn lock_threshold(&mut self) {
        self.locked = true;
    }

    pub fn unlock_threshold(&mut self) {
        self.locked = false;
        self.failures = 0;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn image_transformer(&self) -> ImageTransformer {
        self.transformer
    }

    pub fn set_image_transformer(&mut self, transformer: ImageTransformer) {
        self.transformer = transformer;
    }
}

impl Default for DetectorContext {
    fn default() -> Self {
        DetectorContext::new(None)
    }
}
