//! 由两组直线重建每张答题表的角点矩阵

use std::f64::consts::FRAC_PI_2;

use crate::config::CONFIG;
use crate::models::card::{Axis, CornerMatrix, Line};
use crate::models::scan_input::ExamDimensions;
use crate::my_utils::math::{angles_perpendicular, discard_spurious_lines, intersection};

/// 去掉贴近图片边缘的直线，再合并挨得太近的直线
///
/// 合并失败时返回只过滤过边缘的直线
pub fn filter_axes(axes: &[Axis], width: u32, height: u32) -> Vec<Axis> {
    let margin = CONFIG.box_reconstruct.border_margin;
    let keep = |line: &Line, size: f64, border_normal: f64| {
        let rho = line.rho.abs();
        (rho < (1.0 - margin) * size && rho > margin * size)
            || !angles_perpendicular(border_normal, line.theta)
    };
    let vaxis = Axis {
        theta: axes[0].theta,
        lines: axes[0].lines.iter().filter(|l| keep(l, width as f64, FRAC_PI_2)).copied().collect(),
    };
    let haxis = Axis {
        theta: axes[1].theta,
        lines: axes[1].lines.iter().filter(|l| keep(l, height as f64, 0.0)).copied().collect(),
    };
    let Some(hlines) = collapse_lines_angles(&haxis.lines, true) else {
        return vec![vaxis, haxis];
    };
    let Some(vlines) = collapse_lines_angles(&vaxis.lines, false) else {
        return vec![vaxis, haxis];
    };
    vec![
        Axis { theta: vaxis.theta, lines: vlines },
        Axis { theta: haxis.theta, lines: hlines },
    ]
}

/// 合并相邻的重复直线，取平均
///
/// 间距小于最大间隔时合并；间距更大但角度逆着该方向应有的顺序变化时视为噪声，同样合并
pub fn collapse_lines_angles(lines: &[Line], horizontal: bool) -> Option<Vec<Line>> {
    if lines.len() < 2 {
        return None;
    }
    let max_gap = CONFIG.box_reconstruct.collapse_max_gap;
    let mut main_lines = Vec::new();
    let mut sum_rho = lines[0].rho;
    let mut sum_theta = lines[0].theta;
    let mut num_lines = 1.0;
    let mut last = lines[0];
    for line in &lines[1..] {
        let gap = (line.rho - last.rho).abs();
        let angle_reversed = (horizontal && line.theta < last.theta) || (!horizontal && line.theta > last.theta);
        if gap >= max_gap && !angle_reversed {
            main_lines.push(Line::new(sum_rho / num_lines, sum_theta / num_lines));
            sum_rho = line.rho;
            sum_theta = line.theta;
            num_lines = 1.0;
        } else {
            sum_rho += line.rho;
            sum_theta += line.theta;
            num_lines += 1.0;
        }
        last = *line;
    }
    main_lines.push(Line::new(sum_rho / num_lines, sum_theta / num_lines));
    Some(main_lines)
}

/// 计算所有答题表的角点矩阵，直线数量不对或几何检查不通过时返回空
pub fn cell_corners(
    hlines: &[Line],
    vlines: &[Line],
    width: u32,
    height: u32,
    dimensions: &ExamDimensions,
) -> Vec<CornerMatrix> {
    let h_expected = dimensions.expected_hlines();
    let v_expected = dimensions.expected_vlines();
    let vlines: Vec<Line> = if vlines.len() == v_expected {
        vlines.to_vec()
    } else if vlines.len() > v_expected && vlines.len() <= v_expected + 2 {
        discard_spurious_lines(vlines, v_expected)
    } else {
        log::debug!("cell_corners: {} vertical lines, expected {v_expected}", vlines.len());
        return Vec::new();
    };
    if hlines.len() < h_expected {
        log::debug!("cell_corners: {} horizontal lines, expected {h_expected}", hlines.len());
        return Vec::new();
    }
    // 多出来的横线在上方（学号框）
    let hlines = &hlines[hlines.len() - h_expected..];

    let mut corner_matrixes = Vec::with_capacity(dimensions.num_tables());
    let mut vini = 0;
    for table in dimensions.tables() {
        let mut corners = Vec::with_capacity(table.num_questions + 1);
        for hline in hlines.iter().take(table.num_questions + 1) {
            let mut row = Vec::with_capacity(table.num_choices + 1);
            for vline in &vlines[vini..vini + table.num_choices + 1] {
                match intersection(*hline, *vline) {
                    Some(point) => row.push(point),
                    None => return Vec::new(),
                }
            }
            corners.push(row);
        }
        corner_matrixes.push(corners);
        vini += 1 + table.num_choices;
    }
    if check_corners(&corner_matrixes, width, height) {
        corner_matrixes
    } else {
        Vec::new()
    }
}

/// 角点矩阵的几何检查
///
/// 中间那张表最右一列的行距要平滑，最小行距不小于最大行距的一半，
/// 所有点都在图内，每个格子的角点严格按左右上下排列
pub fn check_corners(corner_matrixes: &[CornerMatrix], width: u32, height: u32) -> bool {
    if corner_matrixes.is_empty() {
        return false;
    }
    let corners = &corner_matrixes[(corner_matrixes.len() - 1) / 2];
    let ypoints: Vec<i32> = corners.iter().filter_map(|row| row.last().map(|p| p.y)).collect();
    let difs: Vec<i32> = ypoints.windows(2).map(|w| w[1] - w[0]).collect();
    let (Some(&max_dif), Some(&min_dif)) = (difs.iter().max(), difs.iter().min()) else {
        return false;
    };
    let difs2: Vec<i32> = difs.windows(2).map(|w| w[1] - w[0]).collect();
    if let Some(&max_difs2) = difs2.iter().max() {
        let tolerance = 1.0
            + (max_dif - min_dif) as f64 / difs.len() as f64 * CONFIG.box_reconstruct.corners_tolerance_mul;
        if max_difs2 as f64 > tolerance {
            log::debug!("check_corners: uneven rows ({max_difs2} > {tolerance:.2})");
            return false;
        }
    }
    if 0.5 * max_dif as f64 > min_dif as f64 {
        log::debug!("check_corners: row gaps {min_dif}..{max_dif}");
        return false;
    }
    let (w, h) = (width as i32, height as i32);
    for corners in corner_matrixes {
        for point in corners.iter().flatten() {
            if point.x < 0 || point.x >= w || point.y < 0 || point.y >= h {
                log::debug!("check_corners: point out of image ({}, {})", point.x, point.y);
                return false;
            }
        }
    }
    for corners in corner_matrixes {
        for i in 0..corners.len().saturating_sub(1) {
            for j in 0..corners[i].len().saturating_sub(1) {
                let (lu, ru) = (corners[i][j], corners[i][j + 1]);
                let (ld, rd) = (corners[i + 1][j], corners[i + 1][j + 1]);
                if lu.y >= ld.y || ru.y >= rd.y || lu.x >= ru.x || ld.x >= rd.x {
                    return false;
                }
            }
        }
    }
    true
}
