//! 学号数字识别

use std::path::Path;

use anyhow::{bail, Context};
use image::GrayImage;
use serde::Deserialize;

use crate::error::ExamError;
use crate::models::rec_result::CellGeometry;
use crate::my_utils::image::{clear_boundbox, deskew, project_to_rectangle, resize_square};
use crate::my_utils::math::distance;
use crate::recognition::classifier::{CellSample, FeatureExtractor, RecClassifier, SvmClassifier};
use crate::recognition::engine::Engine;

const NUM_DIGITS: usize = 10;

/// 数字特征：透视变换到平均宽高，二值化，错切校正，去空白边，缩放到dim x dim
#[derive(Debug, Clone)]
pub struct DigitFeatureExtractor {
    pub dim: u32,
}

impl Default for DigitFeatureExtractor {
    fn default() -> Self {
        DigitFeatureExtractor { dim: 28 }
    }
}

impl FeatureExtractor for DigitFeatureExtractor {
    fn features_len(&self) -> usize {
        (self.dim * self.dim) as usize
    }

    fn extract(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>> {
        let [plu, pru, pld, prd] = sample.corners;
        let width = ((distance(plu, pru) + distance(pld, prd)) / 2.0) as u32;
        let height = ((distance(plu, pld) + distance(pru, prd)) / 2.0) as u32;
        let image = project_to_rectangle(sample.image, &sample.corners, width, height)
            .with_context(|| format!("cannot project digit sample {:?}", sample.corners))?;
        let image = deskew(&image, self.dim);
        let image = clear_boundbox(&image);
        if image.width() == 0 || image.height() == 0 {
            bail!("empty digit sample");
        }
        let image = resize_square(&image, self.dim);
        Ok(image.pixels().map(|p| p.0[0] as f32 / 255.0).collect())
    }
}

#[derive(Debug, Deserialize)]
struct ConfusionMatrixFile {
    confusion_matrix: Vec<Vec<f64>>,
}

/// 数字分类器，得分取混淆矩阵中识别结果那一列
pub struct DigitClassifier {
    inner: Box<dyn RecClassifier>,
    confusion_matrix: Vec<Vec<f64>>,
}

impl DigitClassifier {
    /// 没有混淆矩阵时用单位矩阵
    pub fn new(inner: Box<dyn RecClassifier>, confusion_matrix: Option<Vec<Vec<f64>>>) -> Result<Self, ExamError> {
        let confusion_matrix = match confusion_matrix {
            Some(matrix) => {
                if matrix.len() != NUM_DIGITS || matrix.iter().any(|row| row.len() != NUM_DIGITS) {
                    return Err(ExamError::BadModel("confusion matrix must be 10x10".to_string()));
                }
                matrix
            }
            None => (0..NUM_DIGITS)
                .map(|i| (0..NUM_DIGITS).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
                .collect(),
        };
        Ok(DigitClassifier { inner, confusion_matrix })
    }

    /// 读取SVM模型和可选的混淆矩阵文件
    pub fn load(model_path: &Path, confusion_matrix_path: Option<&Path>) -> Result<Self, ExamError> {
        let svm = SvmClassifier::load(model_path, DigitFeatureExtractor::default())?;
        let matrix = match confusion_matrix_path {
            Some(path) => Some(load_confusion_matrix(path)?),
            None => None,
        };
        DigitClassifier::new(Box::new(svm), matrix)
    }

    /// 识别结果和各类别得分，识别结果不是0到9时为None
    pub fn classify_digit(&self, sample: &CellSample) -> anyhow::Result<(Option<u8>, Vec<f64>)> {
        let label = self.inner.classify_sample(sample)?;
        match u8::try_from(label) {
            Ok(digit) if (digit as usize) < NUM_DIGITS => Ok((Some(digit), self.class_scores(digit))),
            _ => {
                log::debug!("digit classifier returned label {label}");
                Ok((None, vec![0.0; NUM_DIGITS]))
            }
        }
    }

    /// 混淆矩阵第label列
    pub fn class_scores(&self, label: u8) -> Vec<f64> {
        self.confusion_matrix
            .iter()
            .map(|row| row.get(label as usize).copied().unwrap_or(0.0))
            .collect()
    }
}

impl std::fmt::Debug for DigitClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitClassifier").field("confusion_matrix", &self.confusion_matrix).finish()
    }
}

/// 读取{"confusion_matrix": [[...]]}
pub fn load_confusion_matrix(path: &Path) -> Result<Vec<Vec<f64>>, ExamError> {
    let err = |reason: String| ExamError::ModelLoad {
        path: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let file: ConfusionMatrixFile = serde_json::from_str(&text).map_err(|e| err(e.to_string()))?;
    Ok(file.confusion_matrix)
}

pub trait RecNumber {
    /// 识别学号，识别不出的位记为'0'，返回学号和每位的得分
    fn detect_id(&self, image: &GrayImage, id_cells: &[CellGeometry]) -> anyhow::Result<(String, Vec<Vec<f64>>)>;
}

impl RecNumber for Engine {
    fn detect_id(&self, image: &GrayImage, id_cells: &[CellGeometry]) -> anyhow::Result<(String, Vec<Vec<f64>>)> {
        let digits = self
            .digits()
            .ok_or(ExamError::MissingClassifier("digits"))?;
        let mut id = String::with_capacity(id_cells.len());
        let mut scores = Vec::with_capacity(id_cells.len());
        for cell in id_cells {
            let (digit, digit_scores) = digits.classify_digit(&CellSample::digit_from_cam(cell, image))?;
            id.push(digit.map_or('0', |d| (b'0' + d) as char));
            scores.push(digit_scores);
        }
        Ok((id, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::card::Point;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    struct Fixed(i32);

    impl RecClassifier for Fixed {
        fn extract_features(&self, _sample: &CellSample) -> anyhow::Result<Vec<f32>> {
            Ok(Vec::new())
        }

        fn classify(&self, _features: &[f32]) -> anyhow::Result<i32> {
            Ok(self.0)
        }
    }

    fn sample_cell() -> CellGeometry {
        CellGeometry::new(Point::new(10, 10), Point::new(40, 10), Point::new(10, 50), Point::new(40, 50))
    }

    #[test]
    fn identity_scores() -> anyhow::Result<()> {
        let img = GrayImage::new(60, 60);
        let classifier = DigitClassifier::new(Box::new(Fixed(3)), None)?;
        let (digit, scores) = classifier.classify_digit(&CellSample::digit_from_cam(&sample_cell(), &img))?;
        assert_eq!(digit, Some(3));
        assert_eq!(scores.len(), 10);
        assert_eq!(scores[3], 1.0);
        assert_eq!(scores.iter().sum::<f64>(), 1.0);

        let classifier = DigitClassifier::new(Box::new(Fixed(12)), None)?;
        let (digit, _) = classifier.classify_digit(&CellSample::digit_from_cam(&sample_cell(), &img))?;
        assert_eq!(digit, None);
        Ok(())
    }

    #[test]
    fn confusion_matrix_column() -> anyhow::Result<()> {
        let matrix: Vec<Vec<f64>> = (0..10).map(|i| (0..10).map(|j| (i * 10 + j) as f64).collect()).collect();
        let classifier = DigitClassifier::new(Box::new(Fixed(0)), Some(matrix))?;
        let scores = classifier.class_scores(2);
        assert_eq!(scores[0], 2.0);
        assert_eq!(scores[9], 92.0);
        let err = DigitClassifier::new(Box::new(Fixed(0)), Some(vec![vec![1.0]])).unwrap_err();
        assert_eq!(err.key(), "bad_model");
        Ok(())
    }

    #[test]
    fn confusion_matrix_file() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("exam_recognize_cm_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("digits.json");
        let matrix = vec![vec![0.5; 10]; 10];
        std::fs::write(&path, serde_json::json!({ "confusion_matrix": matrix }).to_string())?;
        assert_eq!(load_confusion_matrix(&path)?, matrix);
        assert_eq!(load_confusion_matrix(&dir.join("none.json")).unwrap_err().key(), "model_load");
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn digit_features() -> anyhow::Result<()> {
        // 格子里画一个竖条当作数字1
        let mut img = GrayImage::new(60, 60);
        draw_filled_rect_mut(&mut img, Rect::at(23, 18).of_size(4, 24), Luma([255u8]));
        let cell = sample_cell();
        let features = DigitFeatureExtractor::default().extract(&CellSample::new(cell.corners(), &img))?;
        assert_eq!(features.len(), 784);
        assert!(features.iter().any(|&v| v > 0.5));
        Ok(())
    }
}
