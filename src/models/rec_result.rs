/*
    输出结构
*/

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::ExamError;
use crate::models::card::Point;
use crate::models::scan_input::DetectionOptions;
use crate::my_utils::math::{distance, rect_center};
use crate::recognition::infobits::decode_model;

/// 一个答题格或学号格的四个角点
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct CellGeometry {
    pub plu: Point,
    pub pru: Point,
    pub pld: Point,
    pub prd: Point,
    pub center: Point,
    pub diagonal: f64,
}

impl CellGeometry {
    pub fn new(plu: Point, pru: Point, pld: Point, prd: Point) -> Self {
        CellGeometry {
            plu,
            pru,
            pld,
            prd,
            center: rect_center(plu, prd),
            diagonal: distance(plu, prd),
        }
    }

    /// 从存储中恢复，保存过的中心和对角线原样保留
    pub fn from_stored(
        plu: Point,
        pru: Point,
        pld: Point,
        prd: Point,
        center: Option<Point>,
        diagonal: Option<f64>,
    ) -> Self {
        let mut cell = CellGeometry::new(plu, pru, pld, prd);
        if let Some(center) = center {
            cell.center = center;
        }
        if let Some(diagonal) = diagonal {
            cell.diagonal = diagonal;
        }
        cell
    }

    /// 左上、右上、左下、右下
    pub fn corners(&self) -> [Point; 4] {
        [self.plu, self.pru, self.pld, self.prd]
    }
}

/// 各识别阶段是否成功，每次识别开始时全部清零
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default, PartialEq, Eq)]
pub struct DetectionStatus {
    pub lines: bool,
    pub boxes: bool,
    pub cells: bool,
    pub infobits: bool,
    pub id_box_hlines: bool,
    pub id_box: bool,
}

impl DetectionStatus {
    pub fn flags(&self) -> [bool; 6] {
        [self.lines, self.boxes, self.cells, self.infobits, self.id_box_hlines, self.id_box]
    }

    /// 已完成阶段的比例，不读学号或不读模型时对应阶段不计
    pub fn progress(&self, options: &DetectionOptions) -> f64 {
        let mut max = 6;
        if !options.read_student_id {
            max -= 2;
        }
        if !options.decode_model_bits {
            max -= 1;
        }
        let done = self.flags().iter().filter(|&&flag| flag).count();
        (done as f64 / max as f64).min(1.0)
    }
}

/// 识别结论
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExamDecisions {
    pub success: bool,
    /// 0为未作答或多选，否则为选项序号(从1开始)
    pub answers: Vec<u8>,
    pub detected_id: Option<String>,
    /// 每位学号的各类别得分
    pub id_scores: Option<Vec<Vec<f64>>>,
    pub model: Option<char>,
    pub infobits: Option<Vec<bool>>,
}

impl ExamDecisions {
    pub fn new(
        success: bool,
        answers: Vec<u8>,
        detected_id: Option<String>,
        id_scores: Option<Vec<Vec<f64>>>,
        infobits: Option<Vec<bool>>,
        accept_model_0: bool,
    ) -> Self {
        let model = infobits
            .as_ref()
            .and_then(|bits| decode_model(bits, accept_model_0));
        ExamDecisions {
            success,
            answers,
            detected_id,
            id_scores,
            model,
            infobits,
        }
    }

    /// 人工复核后修改答案，question从0开始
    pub fn change_answer(&mut self, question: usize, answer: u8) -> Result<(), ExamError> {
        let num_questions = self.answers.len();
        match self.answers.get_mut(question) {
            Some(slot) => {
                *slot = answer;
                Ok(())
            }
            None => Err(ExamError::BadAnswer { question, num_questions }),
        }
    }
}

/// 供界面绘制和存储的几何信息
#[derive(Debug, Clone, Default)]
pub struct ExamCapture {
    /// 调试绘制图，只在打开显示选项时生成
    pub image: Option<RgbImage>,
    /// 按题号分组的答题格
    pub answer_cells: Vec<Vec<CellGeometry>>,
    /// 每位学号一个格
    pub id_cells: Vec<CellGeometry>,
    pub progress: f64,
}

impl ExamCapture {
    /// 点击位置对应的(题号, 选项)，题号从0开始，选项从1开始
    pub fn get_cell_clicked(&self, point: Point) -> Option<(usize, u8)> {
        let mut best: Option<(f64, usize, usize, f64)> = None;
        for (question, cells) in self.answer_cells.iter().enumerate() {
            for (choice, cell) in cells.iter().enumerate() {
                let dist = distance(point, cell.center);
                if best.map_or(true, |(min, ..)| dist < min) {
                    best = Some((dist, question, choice, cell.diagonal));
                }
            }
        }
        match best {
            Some((dist, question, choice, diagonal)) if dist <= diagonal / 2.0 => {
                Some((question, choice as u8 + 1))
            }
            _ => None,
        }
    }
}

/// 一次识别的全部输出
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub decisions: ExamDecisions,
    pub status: DetectionStatus,
    pub capture: ExamCapture,
}
