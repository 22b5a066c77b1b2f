//! 勾叉识别

use std::path::Path;

use anyhow::Context;
use image::GrayImage;

use crate::config::CONFIG;
use crate::error::ExamError;
use crate::models::card::Point;
use crate::models::rec_result::CellGeometry;
use crate::my_utils::image::{count_pixels_in_cell, count_pixels_in_segments, project_to_rectangle};
use crate::my_utils::math::{closer_points_rel, distance};
use crate::recognition::classifier::{CellSample, FeatureExtractor, RecClassifier, SvmClassifier};
use crate::recognition::engine::Engine;

/// 勾叉特征：透视变换到dim x dim，二值化后缩放到[0, 1]
#[derive(Debug, Clone)]
pub struct CrossFeatureExtractor {
    pub dim: u32,
}

impl Default for CrossFeatureExtractor {
    fn default() -> Self {
        CrossFeatureExtractor { dim: 28 }
    }
}

impl FeatureExtractor for CrossFeatureExtractor {
    fn features_len(&self) -> usize {
        (self.dim * self.dim) as usize
    }

    fn extract(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>> {
        let image = project_to_rectangle(sample.image, &sample.corners, self.dim, self.dim)
            .with_context(|| format!("cannot project cross sample {:?}", sample.corners))?;
        Ok(image.pixels().map(|p| p.0[0] as f32 / 255.0).collect())
    }
}

/// 不需要模型的勾叉判断，统计对角线粗叉掩膜内的墨迹比例
///
/// 特征为[掩膜像素数, 掩膜内墨迹数, 格内像素数, 格内墨迹数]
#[derive(Debug, Clone, Default)]
pub struct MaskCrossClassifier;

impl RecClassifier for MaskCrossClassifier {
    fn extract_features(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>> {
        let params = &CONFIG.cross_mask;
        let [plu, pru, pld, prd] = sample.corners;
        let thickness = distance(plu, pru) * params.thickness;
        let cross = |margin: f64, offset: f64, radius: f64| -> [(Point, Point, f64); 2] {
            let (iplu, iprd) = closer_points_rel(plu, prd, margin, offset);
            let (ipru, ipld) = closer_points_rel(pru, pld, margin, offset);
            [(iplu, iprd, radius), (ipru, ipld, radius)]
        };
        let mut segments = Vec::with_capacity(4);
        segments.extend(cross(params.margin, thickness / 2.0, thickness / 2.0));
        segments.extend(cross(params.margin_2, thickness / 4.0, thickness / 4.0));
        let (mask, masked) = count_pixels_in_segments(sample.image, &segments);

        let (iplu, iprd) = closer_points_rel(plu, prd, params.cell_margin, 0.0);
        let (ipru, ipld) = closer_points_rel(pru, pld, params.cell_margin, 0.0);
        let (total, set) = count_pixels_in_cell(sample.image, iplu, ipru, ipld, iprd);
        Ok(vec![mask as f32, masked as f32, total as f32, set as f32])
    }

    fn classify(&self, features: &[f32]) -> anyhow::Result<i32> {
        let &[mask, masked, total, set] = features else {
            anyhow::bail!("mask classifier needs 4 features, got {}", features.len());
        };
        let params = &CONFIG.cross_mask;
        let (mask, masked, total, set) = (mask as f64, masked as f64, total as f64, set as f64);
        let mut marked = masked > params.threshold * mask;
        // 整个格子都涂黑了不算
        if marked {
            marked = masked < params.clear_in_threshold * mask
                || (set - masked) < (total - mask) * params.clear_out_threshold;
        }
        Ok(marked as i32)
    }
}

/// 勾叉分类器，类别1为打了叉
pub struct CrossClassifier {
    inner: Box<dyn RecClassifier>,
    /// 取样时对角线的收缩比例
    sample_ratio: f64,
}

impl CrossClassifier {
    pub fn new(inner: Box<dyn RecClassifier>, sample_ratio: f64) -> Self {
        CrossClassifier { inner, sample_ratio }
    }

    /// 读取训练好的SVM模型
    pub fn load(path: &Path) -> Result<Self, ExamError> {
        let svm = SvmClassifier::load(path, CrossFeatureExtractor::default())?;
        Ok(CrossClassifier::new(Box::new(svm), CONFIG.cross_mask.sample_ratio))
    }

    /// 没有模型文件时用掩膜判断，取样用整个格子
    pub fn mask() -> Self {
        CrossClassifier::new(Box::new(MaskCrossClassifier), 1.0)
    }

    pub fn sample<'a>(&self, cell: &CellGeometry, image: &'a GrayImage) -> CellSample<'a> {
        CellSample::cross_from_cam(cell, image, self.sample_ratio)
    }

    pub fn is_cross(&self, sample: &CellSample) -> anyhow::Result<bool> {
        Ok(self.inner.classify_sample(sample)? == 1)
    }
}

impl std::fmt::Debug for CrossClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossClassifier").field("sample_ratio", &self.sample_ratio).finish()
    }
}

pub trait RecVX {
    /// 判断一个格子里是否打了叉
    fn rec_vx(&self, image: &GrayImage, cell: &CellGeometry) -> anyhow::Result<bool>;
}

impl RecVX for Engine {
    fn rec_vx(&self, image: &GrayImage, cell: &CellGeometry) -> anyhow::Result<bool> {
        let crosses = self.crosses();
        crosses.is_cross(&crosses.sample(cell, image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
    use imageproc::rect::Rect;

    fn cell() -> CellGeometry {
        CellGeometry::new(Point::new(20, 20), Point::new(80, 20), Point::new(20, 60), Point::new(80, 60))
    }

    fn draw_cross(img: &mut GrayImage) {
        for d in -2..=2 {
            let d = d as f32;
            draw_line_segment_mut(img, (26.0, 24.0 + d), (74.0, 56.0 + d), Luma([255u8]));
            draw_line_segment_mut(img, (74.0, 24.0 + d), (26.0, 56.0 + d), Luma([255u8]));
        }
    }

    #[test]
    fn mask_classifier_decisions() -> anyhow::Result<()> {
        let crosses = CrossClassifier::mask();
        let c = cell();

        let blank = GrayImage::new(100, 100);
        assert!(!crosses.is_cross(&crosses.sample(&c, &blank))?);

        let mut crossed = GrayImage::new(100, 100);
        draw_cross(&mut crossed);
        assert!(crosses.is_cross(&crosses.sample(&c, &crossed))?);

        // 整个格子涂黑
        let mut filled = GrayImage::new(100, 100);
        draw_filled_rect_mut(&mut filled, Rect::at(20, 20).of_size(61, 41), Luma([255u8]));
        assert!(!crosses.is_cross(&crosses.sample(&c, &filled))?);
        Ok(())
    }

    #[test]
    fn mask_classifier_rejects_bad_features() {
        assert!(MaskCrossClassifier.classify(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn cross_features_length() -> anyhow::Result<()> {
        let mut img = GrayImage::new(100, 100);
        draw_cross(&mut img);
        let extractor = CrossFeatureExtractor::default();
        let features = extractor.extract(&CellSample::cross_from_cam(&cell(), &img, 0.8))?;
        assert_eq!(features.len(), 784);
        assert!(features.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(features.iter().any(|&v| v == 1.0));
        Ok(())
    }
}
