//! 格子分类的公共接口和SVM推理
//!
//! 模型文件是训练工具导出的一对一SVM，json或yaml格式：
//! 类别标签、核函数、支持向量，以及每对类别一个决策函数。

use std::path::Path;

use anyhow::{bail, Context};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::ExamError;
use crate::models::card::Point;
use crate::models::rec_result::CellGeometry;
use crate::my_utils::image::pixel_active;
use crate::my_utils::math::{closer_points_rel, walk_line_ordered};

/// 待分类的格子，角点顺序为左上、右上、左下、右下
#[derive(Debug, Clone, Copy)]
pub struct CellSample<'a> {
    pub corners: [Point; 4],
    pub image: &'a GrayImage,
}

impl<'a> CellSample<'a> {
    pub fn new(corners: [Point; 4], image: &'a GrayImage) -> Self {
        CellSample { corners, image }
    }

    /// 勾叉样本，两条对角线各收缩到原长的一部分，避开格子边框
    pub fn cross_from_cam(cell: &CellGeometry, image: &'a GrayImage, ratio: f64) -> Self {
        let (plu, prd) = closer_points_rel(cell.plu, cell.prd, ratio, 0.0);
        let (pru, pld) = closer_points_rel(cell.pru, cell.pld, ratio, 0.0);
        CellSample::new([plu, pru, pld, prd], image)
    }

    /// 数字样本，每个角点沿对角线向内走出边框
    pub fn digit_from_cam(cell: &CellGeometry, image: &'a GrayImage) -> Self {
        let corners = [
            adjust_cell_corner(image, cell.plu, cell.prd),
            adjust_cell_corner(image, cell.pru, cell.pld),
            adjust_cell_corner(image, cell.pld, cell.pru),
            adjust_cell_corner(image, cell.prd, cell.plu),
        ];
        CellSample::new(corners, image)
    }
}

/// 从corner向towards走，遇到第一个空白像素后再走2步，走不出来就用原来的点
fn adjust_cell_corner(image: &GrayImage, corner: Point, towards: Point) -> Point {
    let mut margin: Option<u32> = None;
    for p in walk_line_ordered(corner, towards) {
        match margin {
            None => {
                if !pixel_active(image, p) {
                    margin = Some(2);
                }
            }
            Some(m) => {
                if m == 1 {
                    return p;
                }
                margin = Some(m - 1);
            }
        }
    }
    corner
}

/// 格子分类能力：提取特征，再给出类别
pub trait RecClassifier {
    fn extract_features(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>>;
    fn classify(&self, features: &[f32]) -> anyhow::Result<i32>;

    fn classify_sample(&self, sample: &CellSample) -> anyhow::Result<i32> {
        let features = self.extract_features(sample)?;
        self.classify(&features)
    }
}

/// 特征提取，和分类模型分开，同一个模型格式可以配不同的特征
pub trait FeatureExtractor {
    fn features_len(&self) -> usize;
    fn extract(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>>;
}

/// 核函数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SvmKernel {
    Linear,
    Rbf { gamma: f64 },
    Poly { gamma: f64, coef0: f64, degree: i32 },
}

impl SvmKernel {
    fn eval(&self, sv: &[f32], x: &[f32]) -> f64 {
        match self {
            SvmKernel::Linear => dot(sv, x),
            SvmKernel::Rbf { gamma } => {
                let d2: f64 = sv
                    .iter()
                    .zip(x)
                    .map(|(a, b)| {
                        let d = *a as f64 - *b as f64;
                        d * d
                    })
                    .sum();
                (-gamma * d2).exp()
            }
            SvmKernel::Poly { gamma, coef0, degree } => (gamma * dot(sv, x) + coef0).powi(*degree),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum()
}

/// 一对类别(i, j)的决策函数，值大于0投给i，否则投给j
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionFunction {
    pub rho: f64,
    pub alpha: Vec<f64>,
    pub sv_index: Vec<usize>,
}

/// 一对一多类SVM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SvmModel {
    pub class_labels: Vec<i32>,
    pub kernel: SvmKernel,
    pub support_vectors: Vec<Vec<f32>>,
    /// 按(0,1), (0,2), ..., (1,2), ...的顺序
    pub decision_functions: Vec<DecisionFunction>,
}

impl SvmModel {
    /// 读取json或yaml格式的模型
    pub fn load(path: &Path) -> Result<SvmModel, ExamError> {
        let err = |reason: String| ExamError::ModelLoad {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let model: SvmModel = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text).map_err(|e| err(e.to_string()))?,
            _ => serde_json::from_str(&text).map_err(|e| err(e.to_string()))?,
        };
        model.validate().map_err(|e| err(e.to_string()))?;
        log::debug!(
            "loaded svm model {}: {} classes, {} support vectors",
            path.display(),
            model.class_labels.len(),
            model.support_vectors.len()
        );
        Ok(model)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let n = self.class_labels.len();
        if n < 2 {
            bail!("at least two classes are needed, got {n}");
        }
        if self.decision_functions.len() != n * (n - 1) / 2 {
            bail!(
                "{} decision functions for {n} classes, expected {}",
                self.decision_functions.len(),
                n * (n - 1) / 2
            );
        }
        let dim = self.var_count();
        if self.support_vectors.iter().any(|sv| sv.len() != dim) {
            bail!("support vectors of different lengths");
        }
        for (k, df) in self.decision_functions.iter().enumerate() {
            if df.alpha.len() != df.sv_index.len() {
                bail!("decision function {k}: {} alphas for {} vectors", df.alpha.len(), df.sv_index.len());
            }
            if let Some(&i) = df.sv_index.iter().find(|&&i| i >= self.support_vectors.len()) {
                bail!("decision function {k}: support vector {i} out of range");
            }
        }
        Ok(())
    }

    /// 特征长度
    pub fn var_count(&self) -> usize {
        self.support_vectors.first().map_or(0, |sv| sv.len())
    }

    /// 投票，票数相同时取序号小的类别
    pub fn predict(&self, features: &[f32]) -> anyhow::Result<i32> {
        if features.len() != self.var_count() {
            bail!("{} features, model expects {}", features.len(), self.var_count());
        }
        let n = self.class_labels.len();
        let mut votes = vec![0u32; n];
        let mut functions = self.decision_functions.iter();
        for i in 0..n {
            for j in i + 1..n {
                let df = functions.next().context("missing decision function")?;
                let mut sum = -df.rho;
                for (&alpha, &index) in df.alpha.iter().zip(&df.sv_index) {
                    sum += alpha * self.kernel.eval(&self.support_vectors[index], features);
                }
                votes[if sum > 0.0 { i } else { j }] += 1;
            }
        }
        let mut best = 0;
        for (k, &v) in votes.iter().enumerate() {
            if v > votes[best] {
                best = k;
            }
        }
        Ok(self.class_labels[best])
    }
}

/// SVM模型加上对应的特征提取
#[derive(Debug, Clone)]
pub struct SvmClassifier<E: FeatureExtractor> {
    pub model: SvmModel,
    pub extractor: E,
}

impl<E: FeatureExtractor> SvmClassifier<E> {
    pub fn new(model: SvmModel, extractor: E) -> Result<Self, ExamError> {
        if model.var_count() != extractor.features_len() {
            return Err(ExamError::BadModel(format!(
                "model has {} features, extractor gives {}",
                model.var_count(),
                extractor.features_len()
            )));
        }
        Ok(SvmClassifier { model, extractor })
    }

    pub fn load(path: &Path, extractor: E) -> Result<Self, ExamError> {
        SvmClassifier::new(SvmModel::load(path)?, extractor)
    }
}

impl<E: FeatureExtractor> RecClassifier for SvmClassifier<E> {
    fn extract_features(&self, sample: &CellSample) -> anyhow::Result<Vec<f32>> {
        self.extractor.extract(sample)
    }

    fn classify(&self, features: &[f32]) -> anyhow::Result<i32> {
        self.model.predict(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_line_segment_mut;

    /// 两个支持向量的线性二分类：x0 > x1 时为类别1
    fn linear_model() -> SvmModel {
        SvmModel {
            class_labels: vec![1, 0],
            kernel: SvmKernel::Linear,
            support_vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            decision_functions: vec![DecisionFunction { rho: 0.0, alpha: vec![1.0, -1.0], sv_index: vec![0, 1] }],
        }
    }

    #[test]
    fn linear_prediction() -> anyhow::Result<()> {
        let model = linear_model();
        model.validate()?;
        assert_eq!(model.predict(&[0.9, 0.1])?, 1);
        assert_eq!(model.predict(&[0.1, 0.9])?, 0);
        assert!(model.predict(&[0.1]).is_err());
        Ok(())
    }

    #[test]
    fn rbf_three_classes() -> anyhow::Result<()> {
        // 每类一个支持向量，离哪个近投给哪个
        let centers = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let df = |a: usize, b: usize| DecisionFunction { rho: 0.0, alpha: vec![1.0, -1.0], sv_index: vec![a, b] };
        let model = SvmModel {
            class_labels: vec![3, 5, 7],
            kernel: SvmKernel::Rbf { gamma: 1.0 },
            support_vectors: centers,
            decision_functions: vec![df(0, 1), df(0, 2), df(1, 2)],
        };
        model.validate()?;
        assert_eq!(model.predict(&[0.1, 0.0])?, 3);
        assert_eq!(model.predict(&[0.9, 0.1])?, 5);
        assert_eq!(model.predict(&[0.1, 0.9])?, 7);
        Ok(())
    }

    #[test]
    fn invalid_models() {
        let mut model = linear_model();
        model.decision_functions.push(model.decision_functions[0].clone());
        assert!(model.validate().is_err());
        let mut model = linear_model();
        model.decision_functions[0].sv_index = vec![0, 2];
        assert!(model.validate().is_err());
        let mut model = linear_model();
        model.class_labels = vec![1];
        assert!(model.validate().is_err());
    }

    #[test]
    fn model_from_json_and_missing_file() -> anyhow::Result<()> {
        let json = serde_json::to_string(&linear_model())?;
        assert!(json.contains(r#""type":"linear""#));
        let dir = std::env::temp_dir().join(format!("exam_recognize_svm_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("model.json");
        std::fs::write(&path, json)?;
        assert_eq!(SvmModel::load(&path)?, linear_model());
        let err = SvmModel::load(&dir.join("missing.json")).unwrap_err();
        assert_eq!(err.key(), "model_load");
        std::fs::write(&path, "{}")?;
        assert_eq!(SvmModel::load(&path).unwrap_err().key(), "model_load");
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn kernel_yaml_tag() -> anyhow::Result<()> {
        let kernel: SvmKernel = serde_yaml::from_str("type: poly\ngamma: 0.5\ncoef0: 1.0\ndegree: 2")?;
        assert_eq!(kernel, SvmKernel::Poly { gamma: 0.5, coef0: 1.0, degree: 2 });
        assert!((kernel.eval(&[1.0, 1.0], &[1.0, 1.0]) - 4.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn cross_sample_shrinks_diagonals() {
        let img = GrayImage::new(100, 100);
        let cell = CellGeometry::new(Point::new(0, 0), Point::new(50, 0), Point::new(0, 50), Point::new(50, 50));
        let sample = CellSample::cross_from_cam(&cell, &img, 0.8);
        assert_eq!(sample.corners, [Point::new(5, 5), Point::new(45, 5), Point::new(5, 45), Point::new(45, 45)]);
    }

    #[test]
    fn digit_sample_leaves_border() {
        // 2像素宽的边框
        let mut img = GrayImage::new(60, 60);
        for offset in 0..2 {
            let o = offset as f32;
            draw_line_segment_mut(&mut img, (10.0, 10.0 + o), (50.0, 10.0 + o), Luma([255u8]));
            draw_line_segment_mut(&mut img, (10.0 + o, 10.0), (10.0 + o, 50.0), Luma([255u8]));
        }
        let cell = CellGeometry::new(Point::new(10, 10), Point::new(50, 10), Point::new(10, 50), Point::new(50, 50));
        let sample = CellSample::digit_from_cam(&cell, &img);
        // 左上角从(10,10)走到(12,12)遇到空白，再走两步
        assert_eq!(sample.corners[0], Point::new(14, 14));
        // 右下角没有边框，第一个像素就是空白
        assert_eq!(sample.corners[3], Point::new(48, 48));
    }
}
