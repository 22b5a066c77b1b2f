//! 学号框定位
//!
//! 学号框在答题表上方，由两条横线夹着一排数字格。先找到上下两条边线，
//! 在边线两端找左右边界，再插值出每个格子的竖线，按竖线上墨迹比例（能量）逐个微调。

use image::GrayImage;

use crate::config::CONFIG;
use crate::models::card::{Line, Point};
use crate::models::rec_result::CellGeometry;
use crate::models::scan_input::ExamDimensions;
use crate::my_utils::image::pixel_active;
use crate::my_utils::math::{distance_f, interpolate_line, line_point_at_x, line_point_at_y, point_is_valid, project_point, to_vector, walk_line};

/// 找学号框，返回上下边线和每位数字的格子
///
/// lines是按rho排好序的横线，最后1+最多题数条属于答题表
pub fn id_boxes_geometry(
    image: &GrayImage,
    num_cells: usize,
    lines: &[Line],
    dimensions: &ExamDimensions,
) -> (Option<[Line; 2]>, Option<Vec<CellGeometry>>) {
    let discard = dimensions.expected_hlines();
    if num_cells == 0 || lines.len() < discard || discard < 2 {
        return (None, None);
    }
    let first = lines[lines.len() - discard];
    let second = lines[lines.len() - discard + 1];
    // 答题表第一行上方三行半以内的横线不算
    let lim = 4.5 * first.rho - 3.5 * second.rho;
    let candidates: Vec<Line> = lines[..lines.len() - discard].iter().filter(|l| l.rho > lim).copied().collect();
    let (Some(&line_up), Some(&line_down)) = (candidates.first(), candidates.last()) else {
        return (None, None);
    };
    if candidates.len() < 2 {
        return (None, None);
    }
    let min_height = 0.5 * (second.rho - first.rho);
    if line_down.rho - line_up.rho < min_height {
        log::debug!("id box: lines {:.1} and {:.1} too close", line_up.rho, line_down.rho);
        return (None, None);
    }
    let hlines = [line_up, line_down];

    let width = image.width();
    let (pairs_left, pairs_right) = line_bounds_adaptive(image, line_up, line_down, width, CONFIG.id_box.bounds_rho_var);
    let all_bounds = pairs_left
        .iter()
        .flat_map(|l| pairs_right.iter().map(move |r| [l.0, r.0, l.1, r.1]));
    for bounds in all_bounds.take(CONFIG.id_box.max_bounds_tried) {
        if let Some((corners_up, corners_down)) = id_boxes_check_points(image, bounds, &hlines, width, num_cells) {
            let cells = (0..num_cells)
                .map(|i| CellGeometry::new(corners_up[i], corners_up[i + 1], corners_down[i], corners_down[i + 1]))
                .collect();
            return (Some(hlines), Some(cells));
        }
    }
    log::debug!("id box: no valid bounds among {} x {}", pairs_left.len(), pairs_right.len());
    (Some(hlines), None)
}

/// 先调整外侧两个角点，再插值出所有竖线的端点并逐个调整
fn id_boxes_check_points(
    image: &GrayImage,
    bounds: [Point; 4],
    hlines: &[Line; 2],
    width: u32,
    num_cells: usize,
) -> Option<(Vec<Point>, Vec<Point>)> {
    let [plu, pru, pld, prd] = bounds;
    let x_var = CONFIG.id_box.x_var;
    let rho_var = CONFIG.id_box.rho_var;
    let mut outer_up = [plu, pru];
    let mut outer_down = [pld, prd];
    if !id_boxes_adjust(image, &mut outer_up, &mut outer_down, hlines[0], hlines[1], x_var, rho_var, width) {
        return None;
    }
    let mut corners_up = interpolate_line(outer_up[0], outer_up[1], num_cells + 1);
    let mut corners_down = interpolate_line(outer_down[0], outer_down[1], num_cells + 1);
    if !id_boxes_adjust(image, &mut corners_up, &mut corners_down, hlines[0], hlines[1], x_var, rho_var, width) {
        return None;
    }
    Some((corners_up, corners_down))
}

/// 逐个调整竖线两端，任何一个能量太低或平均能量不够都算失败
#[allow(clippy::too_many_arguments)]
fn id_boxes_adjust(
    image: &GrayImage,
    corners_up: &mut [Point],
    corners_down: &mut [Point],
    line_up: Line,
    line_down: Line,
    x_var: i32,
    rho_var: i32,
    width: u32,
) -> bool {
    let num_corners = corners_up.len();
    let mut mean_energy = 0.0;
    for i in 0..num_corners {
        let (selected, energy) =
            id_boxes_adjust_points(image, corners_up[i], corners_down[i], line_up, line_down, x_var, width);
        mean_energy += energy / num_corners as f64;
        if energy < CONFIG.id_box.min_energy {
            return false;
        }
        let Some((up, down)) = selected else {
            return false;
        };
        if rho_var > 0 {
            // 两端的竖线只往框内调
            let interval = if i == 0 {
                (0, 2 * rho_var)
            } else if i == num_corners - 1 {
                (-2 * rho_var, 0)
            } else {
                (-rho_var, rho_var)
            };
            corners_up[i] = adjust_point_vertically(image, up, line_up, interval, width);
            corners_down[i] = adjust_point_vertically(image, down, line_down, interval, width);
        } else {
            corners_up[i] = up;
            corners_down[i] = down;
        }
    }
    mean_energy > CONFIG.id_box.mean_energy
}

/// 在上下两条边线上各左右偏移x_var，找墨迹最多的连线
///
/// 返回选中的两个端点和最高能量
fn id_boxes_adjust_points(
    image: &GrayImage,
    p_up: Point,
    p_down: Point,
    line_up: Line,
    line_down: Line,
    x_var: i32,
    width: u32,
) -> (Option<(Point, Point)>, f64) {
    let candidates = |p: Point, line: Line| -> Vec<Point> {
        ((p.x - x_var)..=(p.x + x_var))
            .filter_map(|x| line_point_at_x(line, x))
            .filter(|q| q.x >= 0 && (q.x as i64) < width as i64 && q.y >= 0)
            .collect()
    };
    let points_up = candidates(p_up, line_up);
    let points_down = candidates(p_down, line_down);
    let mut energies: Vec<(f64, Point, Point)> = Vec::with_capacity(points_up.len() * points_down.len());
    for &u in &points_up {
        for &v in &points_down {
            let energy = match_level(image, u, v);
            if energy > CONFIG.id_box.energy_break {
                return (Some((u, v)), energy);
            }
            energies.push((energy, u, v));
        }
    }
    if energies.is_empty() {
        return (None, 0.0);
    }
    energies.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)).then(b.2.cmp(&a.2)));
    let top = energies[0].0;
    let best: Vec<&(f64, Point, Point)> = energies.iter().take_while(|e| e.0 >= top).collect();
    let n = best.len() as f64;
    let avgx_up = best.iter().map(|e| e.1.x as f64).sum::<f64>() / n;
    let avgx_down = best.iter().map(|e| e.2.x as f64).sum::<f64>() / n;
    let selected = best
        .iter()
        .map(|&&(_, u, v)| ((avgx_up - u.x as f64).abs() + (avgx_down - v.x as f64).abs(), u, v))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)))
        .map(|(_, u, v)| (u, v));
    (selected, top)
}

/// 把点沿法线方向上下移动，选与边线墨迹吻合最多的位置，并列时取中间那个
fn adjust_point_vertically(image: &GrayImage, point: Point, line: Line, interval: (i32, i32), width: u32) -> Point {
    let mut lines = vec![line];
    for i in interval.0..=interval.1 {
        lines.push(Line::new(line.rho + i as f64, line.theta));
        lines.push(Line::new(line.rho - i as f64, line.theta));
    }
    let mut values: Vec<(usize, i32, Point)> = Vec::with_capacity(lines.len());
    for l in &lines {
        let Some(p) = line_point_at_x(*l, point.x) else {
            continue;
        };
        let matches = ((point.x - 2)..=(point.x + 2))
            .filter_map(|xx| line_point_at_x(*l, xx))
            .filter(|q| (q.x as i64) < width as i64 && pixel_active(image, *q))
            .count();
        values.push((matches, p.y, p));
    }
    values.sort_by(|a, b| b.cmp(a));
    let Some(&(max_match, ..)) = values.first() else {
        return point;
    };
    let best: Vec<Point> = values.iter().filter(|v| v.0 == max_match).map(|v| v.2).collect();
    best[best.len() / 2]
}

/// 两点连线上墨迹像素的比例
fn match_level(image: &GrayImage, p0: Point, p1: Point) -> f64 {
    let points = walk_line(p0, p1);
    let active = points.iter().filter(|p| pixel_active(image, **p)).count();
    active as f64 / points.len() as f64
}

/// 上下两条边线附近分别找左右端点，按平行线投影的偏差配对排序
fn line_bounds_adaptive(
    image: &GrayImage,
    line_up: Line,
    line_down: Line,
    width: u32,
    rho_var: i32,
) -> (Vec<(Point, Point)>, Vec<(Point, Point)>) {
    let (left_up, right_up) = line_bounds_one_line(image, line_up, width, rho_var);
    let (left_down, right_down) = line_bounds_one_line(image, line_down, width, rho_var);
    let rank_pairs = |ups: &[Point], downs: &[Point]| -> Vec<(Point, Point)> {
        let mut pairs: Vec<(f64, Point, Point)> = ups
            .iter()
            .flat_map(|&u| downs.iter().map(move |&d| (line_bounds_rank(u, d, line_up, line_down), u, d)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        pairs
            .into_iter()
            .filter(|p| p.0 <= CONFIG.id_box.discard_distance)
            .map(|(_, u, d)| (u, d))
            .collect()
    };
    (rank_pairs(&left_up, &left_down), rank_pairs(&right_up, &right_down))
}

/// 下方端点离上方端点投影位置的距离
fn line_bounds_rank(p_up: Point, p_down: Point, line_up: Line, line_down: Line) -> f64 {
    distance_f(to_vector(p_down), project_point(p_up, line_up, line_down))
}

fn line_bounds_one_line(image: &GrayImage, line: Line, width: u32, rho_var: i32) -> (Vec<Point>, Vec<Point>) {
    let mut lines = vec![line];
    for i in 1..=rho_var {
        lines.push(Line::new(line.rho + i as f64, line.theta));
        lines.push(Line::new(line.rho - i as f64, line.theta));
    }
    let mut points_left = Vec::new();
    let mut points_right = Vec::new();
    for l in lines {
        if let Some((left, right)) = line_bounds(image, l, width) {
            points_left.push(left);
            points_right.push(right);
        }
    }
    (points_left, points_right)
}

/// 沿直线从左到右扫描，第一段连续3个以上墨迹像素的起点为左端，最后一段的末尾为右端
fn line_bounds(image: &GrayImage, line: Line, width: u32) -> Option<(Point, Point)> {
    let edge_point = |x: i32| -> Option<Point> {
        let p = line_point_at_x(line, x)?;
        if p.y < 0 {
            line_point_at_y(line, 0)
        } else {
            Some(p)
        }
    };
    let p0 = edge_point(0)?;
    let p1 = edge_point(width as i32 - 1)?;
    if !point_is_valid(p0, image.width(), image.height()) || !point_is_valid(p1, image.width(), image.height()) {
        return None;
    }
    let mut ini_found = false;
    let mut ini = None;
    let mut end = None;
    let mut last = false;
    let mut count = 0;
    for p in walk_line(p0, p1) {
        let value = pixel_active(image, p);
        if value == last {
            count += 1;
        } else {
            last = value;
            count = 1;
        }
        if !ini_found {
            if last {
                if count == 1 {
                    ini = Some(p);
                } else if count == 3 {
                    ini_found = true;
                }
            }
        } else if last && count > 2 {
            end = Some(p);
        }
    }
    ini.zip(end)
}
