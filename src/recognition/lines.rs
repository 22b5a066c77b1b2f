//! 直线检测，按角度聚成互相垂直的两组

use std::f64::consts::{FRAC_PI_2, PI};

use image::GrayImage;

use crate::config::CONFIG;
use crate::models::card::{Axis, Line};
use crate::models::scan_input::ExamDimensions;
use crate::my_utils::math::{angles_perpendicular, distance_closest_axis};
use crate::recognition::backend::HoughLines;

/// 霍夫检测，直线太多说明阈值太低，按噪声处理返回空
pub fn detect_lines(hough: &dyn HoughLines, mask: &GrayImage, threshold: u32) -> Vec<Line> {
    let mut lines = hough.hough_lines(mask, threshold);
    if lines.len() > CONFIG.line_detect.max_raw_lines {
        log::debug!("hough threshold {threshold} too low: {} lines", lines.len());
        return Vec::new();
    }
    lines.sort_by(|a, b| a.theta.total_cmp(&b.theta));
    lines
}

/// 按角度把直线分组，接近竖直的组排在前面
///
/// lines需要按theta排好序，组内直线按|rho|排序
pub fn detect_directions(lines: &[Line]) -> Vec<Axis> {
    let threshold = CONFIG.line_detect.directions_threshold;
    let Some((first, rest)) = lines.split_first() else {
        return Vec::new();
    };
    // 每组记录第一条线的角度
    let mut groups: Vec<(f64, Vec<Line>)> = vec![(first.theta, vec![*first])];
    for line in rest {
        match groups.last_mut() {
            Some((seed, members)) if (line.theta - *seed).abs() < threshold => members.push(*line),
            _ => groups.push((line.theta, vec![*line])),
        }
    }
    // 角度接近pi的直线和接近0的是同一方向
    if groups.len() > 1 && (groups[0].0 - groups[groups.len() - 1].0 + PI).abs() < threshold {
        if let Some((_, wrapped)) = groups.pop() {
            groups[0]
                .1
                .extend(wrapped.into_iter().map(|l| Line::new(-l.rho, l.theta - PI)));
        }
    }
    let mut axes: Vec<Axis> = groups
        .into_iter()
        .map(|(_, mut members)| {
            let theta = members.iter().map(|l| l.theta).sum::<f64>() / members.len() as f64;
            members.sort_by(|a, b| a.rho.abs().total_cmp(&b.rho.abs()));
            Axis { theta, lines: members }
        })
        .collect();
    if let (Some(first), Some(last)) = (axes.first(), axes.last()) {
        if (last.theta - PI).abs() < first.theta.abs() {
            axes.rotate_right(1);
        }
    }
    axes
}

/// 找到竖线和横线两组，返回[竖线组, 横线组]
pub fn detect_boxes(lines: &[Line], dimensions: &ExamDimensions) -> Option<Vec<Axis>> {
    if lines.len() < 2 {
        return None;
    }
    let min_lines = dimensions.expected_vlines().min(dimensions.expected_hlines());
    let mut axes: Vec<Axis> = detect_directions(lines)
        .into_iter()
        .filter(|axis| axis.lines.len() >= min_lines)
        .collect();
    // 多出来的方向是噪声
    if axes.len() == 3 {
        if angles_perpendicular(axes[0].theta, axes[1].theta) {
            axes.remove(2);
        } else if angles_perpendicular(axes[0].theta, axes[2].theta) {
            axes.remove(1);
        } else {
            axes.remove(0);
        }
    } else if axes.len() == 4 {
        axes.sort_by(|a, b| {
            distance_closest_axis(a.theta, &[0.0, FRAC_PI_2])
                .total_cmp(&distance_closest_axis(b.theta, &[0.0, FRAC_PI_2]))
        });
        axes.truncate(2);
    }
    if axes.len() == 2 && angles_perpendicular(axes[0].theta, axes[1].theta) {
        log::debug!(
            "boxes: {} lines at {:.3}, {} lines at {:.3}",
            axes[0].lines.len(),
            axes[0].theta,
            axes[1].lines.len(),
            axes[1].theta
        );
        Some(axes)
    } else {
        None
    }
}
