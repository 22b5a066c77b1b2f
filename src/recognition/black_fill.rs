use image::GrayImage;

use crate::models::card::CornerMatrix;
use crate::models::rec_result::CellGeometry;
use crate::models::scan_input::ExamDimensions;
use crate::recognition::engine::Engine;
use crate::recognition::vx::RecVX;

pub trait RecBlackFill {
    /// 每道题的答案，0为未作答或多选
    fn decide_cells(&self, image: &GrayImage, answer_cells: &[Vec<CellGeometry>]) -> anyhow::Result<Vec<u8>>;
}

impl RecBlackFill for Engine {
    fn decide_cells(&self, image: &GrayImage, answer_cells: &[Vec<CellGeometry>]) -> anyhow::Result<Vec<u8>> {
        let mut answers = Vec::with_capacity(answer_cells.len());
        for row in answer_cells {
            let mut decisions = Vec::with_capacity(row.len());
            for cell in row {
                decisions.push(self.rec_vx(image, cell)?);
            }
            answers.push(decide_answer(&decisions));
        }
        Ok(answers)
    }
}

/// 恰好一个格子打了叉时返回它的序号(从1开始)，否则返回0
pub fn decide_answer(cell_decisions: &[bool]) -> u8 {
    let mut marked = cell_decisions.iter().enumerate().filter(|(_, &d)| d).map(|(i, _)| i);
    match (marked.next(), marked.next()) {
        (Some(i), None) => u8::try_from(i + 1).unwrap_or(0),
        _ => 0,
    }
}

/// 角点矩阵转成按题号分组的格子，题号先按表再按行
pub fn answer_cells_geometry(
    corner_matrixes: &[CornerMatrix],
    dimensions: &ExamDimensions,
    left_to_right: bool,
) -> Vec<Vec<CellGeometry>> {
    let mut cells = Vec::new();
    for corners in corner_matrixes {
        for i in 0..corners.len().saturating_sub(1) {
            let row = (0..corners[i].len().saturating_sub(1))
                .map(|j| CellGeometry::new(corners[i][j], corners[i][j + 1], corners[i + 1][j], corners[i + 1][j + 1]))
                .collect();
            cells.push(row);
        }
    }
    if left_to_right {
        set_left_to_right(cells, dimensions)
    } else {
        cells
    }
}

/// 多张表时题号改为按行从左到右
pub fn set_left_to_right<T>(cells: Vec<T>, dimensions: &ExamDimensions) -> Vec<T> {
    let num_rows = dimensions.max_questions();
    // 每张表第一题的位置
    let mut heads = vec![0];
    for table in dimensions.tables() {
        heads.push(heads[heads.len() - 1] + table.num_questions);
    }
    heads.push(cells.len());
    let mut slots: Vec<Option<T>> = cells.into_iter().map(Some).collect();
    let mut transposed = Vec::with_capacity(slots.len());
    for row in 0..num_rows {
        for column in 0..dimensions.num_tables() {
            let pos = heads[column] + row;
            if pos < heads[column + 1] {
                if let Some(cell) = slots.get_mut(pos).and_then(Option::take) {
                    transposed.push(cell);
                }
            }
        }
    }
    transposed
}
