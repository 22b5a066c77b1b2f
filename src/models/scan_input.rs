/*
    识别输入：答题表尺寸、识别选项、待识别的帧
*/

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::ExamError;

/// 一张答题表的尺寸
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub struct TableDimensions {
    pub num_choices: usize,
    pub num_questions: usize,
}

/// 所有答题表尺寸，从左到右
/// 答案按u8保存，0表示未作答
pub const MAX_CHOICES: usize = u8::MAX as usize;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExamDimensions {
    tables: Vec<TableDimensions>,
}

impl ExamDimensions {
    pub fn new(tables: Vec<(usize, usize)>) -> Result<Self, ExamError> {
        if tables.is_empty() {
            return Err(ExamError::BadDimensions("dimensions are empty".to_string()));
        }
        let mut dims = Vec::with_capacity(tables.len());
        for (num_choices, num_questions) in tables {
            if num_choices == 0 || num_questions == 0 || num_choices > MAX_CHOICES {
                return Err(ExamError::BadDimensions(format!("{num_choices},{num_questions}")));
            }
            dims.push(TableDimensions { num_choices, num_questions });
        }
        Ok(ExamDimensions { tables: dims })
    }

    /// 解析"3,5;3,4"这种写法，分号分隔答题表，逗号分隔选项数和题数
    pub fn parse(text: &str, check_equal_num_choices: bool) -> Result<Self, ExamError> {
        let mut tables = Vec::new();
        for table in text.split(';') {
            let parts: Vec<&str> = table.split(',').map(|s| s.trim()).collect();
            if parts.len() != 2 {
                return Err(ExamError::BadDimensions(table.to_string()));
            }
            let num_choices = parse_positive(parts[0])?;
            let num_questions = parse_positive(parts[1])?;
            tables.push((num_choices, num_questions));
        }
        let dimensions = ExamDimensions::new(tables)?;
        if check_equal_num_choices {
            let first = dimensions.tables[0].num_choices;
            if dimensions.tables.iter().any(|t| t.num_choices != first) {
                return Err(ExamError::SameNumChoices);
            }
        }
        Ok(dimensions)
    }

    pub fn tables(&self) -> &[TableDimensions] {
        &self.tables
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn max_questions(&self) -> usize {
        self.tables.iter().map(|t| t.num_questions).max().unwrap_or(0)
    }

    pub fn total_questions(&self) -> usize {
        self.tables.iter().map(|t| t.num_questions).sum()
    }

    /// 每道题的选项数，按题号顺序
    pub fn num_options(&self) -> Vec<usize> {
        self.tables
            .iter()
            .flat_map(|t| std::iter::repeat(t.num_choices).take(t.num_questions))
            .collect()
    }

    /// 期望的竖线数量，每张表选项数+1
    pub fn expected_vlines(&self) -> usize {
        self.tables.len() + self.tables.iter().map(|t| t.num_choices).sum::<usize>()
    }

    /// 期望的横线数量，最多题数+1
    pub fn expected_hlines(&self) -> usize {
        1 + self.max_questions()
    }
}

fn parse_positive(text: &str) -> Result<usize, ExamError> {
    match text.parse::<i64>() {
        Ok(value) if value > 0 => Ok(value as usize),
        _ => Err(ExamError::BadDimensions(format!("incorrect number '{text}'"))),
    }
}

/// 识别选项
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionOptions {
    /// 读取试卷模型点阵
    pub decode_model_bits: bool,
    pub read_student_id: bool,
    pub id_digit_count: usize,
    /// 多张表时按行从左到右编号
    pub left_to_right_numbering: bool,
    /// 问卷模式接受保留的全零模型
    pub survey_mode: bool,
    pub fixed_hough_threshold: Option<u32>,
    pub source_is_file: bool,
    pub error_logging: bool,
    pub logging_dir: PathBuf,
    pub show_lines: bool,
    pub show_status: bool,
    pub show_image_proc: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        DetectionOptions {
            decode_model_bits: true,
            read_student_id: false,
            id_digit_count: 0,
            left_to_right_numbering: false,
            survey_mode: false,
            fixed_hough_threshold: None,
            source_is_file: false,
            error_logging: false,
            logging_dir: PathBuf::from("."),
            show_lines: false,
            show_status: false,
            show_image_proc: false,
        }
    }
}

impl DetectionOptions {
    /// 从json或yaml文件读取
    pub fn from_file(path: &Path) -> Result<Self, ExamError> {
        let err = |reason: String| ExamError::BadOptions(format!("{}: {reason}", path.display()));
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let options: DetectionOptions = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text).map_err(|e| err(e.to_string()))?,
            _ => serde_json::from_str(&text).map_err(|e| err(e.to_string()))?,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ExamError> {
        if self.read_student_id && self.id_digit_count == 0 {
            return Err(ExamError::BadOptions(
                "student id reading needs a positive digit count".to_string(),
            ));
        }
        if self.fixed_hough_threshold == Some(0) {
            return Err(ExamError::BadOptions("hough threshold must be positive".to_string()));
        }
        Ok(())
    }
}

/// 待识别的帧
#[derive(Debug, Clone)]
pub enum Frame {
    /// 摄像头原图，灰度或彩色
    Raw(DynamicImage),
    /// 已经二值化过的图，墨迹为非零
    Processed(GrayImage),
}

impl Frame {
    pub fn load(path: &Path, processed: bool) -> Result<Frame, ExamError> {
        let img = image::open(path).map_err(|e| ExamError::LoadImage {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if processed {
            Ok(Frame::Processed(img.to_luma8()))
        } else {
            Ok(Frame::Raw(img))
        }
    }
}

/// 摄像头画面翻转，编码沿用cv::flip的约定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransformer {
    transformation: i32,
}

impl ImageTransformer {
    pub const IDENTITY: i32 = 2;
    pub const FLIP_V: i32 = 0;
    pub const FLIP_H: i32 = 1;
    pub const FLIP_BOTH: i32 = -1;

    pub fn new(transformation: i32) -> Result<Self, ExamError> {
        if !(-1..=2).contains(&transformation) {
            return Err(ExamError::InvalidTransformation(transformation));
        }
        Ok(ImageTransformer { transformation })
    }

    pub fn identity() -> Self {
        ImageTransformer { transformation: Self::IDENTITY }
    }

    pub fn transformation(&self) -> i32 {
        self.transformation
    }

    pub fn transform(&self, image: DynamicImage) -> DynamicImage {
        match self.transformation {
            Self::FLIP_V => image.flipv(),
            Self::FLIP_H => image.fliph(),
            Self::FLIP_BOTH => image.rotate180(),
            _ => image,
        }
    }
}

impl Default for ImageTransformer {
    fn default() -> Self {
        ImageTransformer::identity()
    }
}
