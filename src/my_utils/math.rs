//! 几何计算：点、向量、霍夫直线和插值

use std::f64::consts::{FRAC_PI_2, PI};

use crate::models::card::{Line, Point};

/// 两条直线角度差在这个范围内视为垂直
const PERPENDICULAR_TOLERANCE: f64 = 0.1;

/// 二维向量，允许小数
pub type Vector = (f64, f64);

/// 欧氏距离
pub fn distance(p1: Point, p2: Point) -> f64 {
    distance_f((p1.x as f64, p1.y as f64), (p2.x as f64, p2.y as f64))
}

pub fn distance_f(p1: Vector, p2: Vector) -> f64 {
    let dx = p1.0 - p2.0;
    let dy = p1.1 - p2.1;
    (dx * dx + dy * dy).sqrt()
}

/// p1 - p2
pub fn diff_points(p1: Point, p2: Point) -> Vector {
    ((p1.x - p2.x) as f64, (p1.y - p2.y) as f64)
}

pub fn add_vectors(v1: Vector, v2: Vector) -> Vector {
    (v1.0 + v2.0, v1.1 + v2.1)
}

pub fn multiply_vector(v: Vector, factor: f64) -> Vector {
    (v.0 * factor, v.1 * factor)
}

pub fn to_vector(p: Point) -> Vector {
    (p.x as f64, p.y as f64)
}

/// 四舍五入到整数像素，.5时取偶数
pub fn round_point(v: Vector) -> Point {
    Point::new(v.0.round_ties_even() as i32, v.1.round_ties_even() as i32)
}

pub fn angles_perpendicular(angle1: f64, angle2: f64) -> bool {
    (angle2 - angle1 - FRAC_PI_2).abs() < PERPENDICULAR_TOLERANCE
        || (angle2 - angle1 + FRAC_PI_2).abs() < PERPENDICULAR_TOLERANCE
}

/// 两点连线更接近水平还是竖直
pub fn points_closer_to_horizontal(p1: Point, p2: Point) -> bool {
    let d = diff_points(p1, p2);
    d.0.abs() > d.1.abs()
}

pub fn scalar_product(v1: Vector, v2: Vector) -> f64 {
    v1.0 * v2.0 + v1.1 * v2.1
}

pub fn module(v: Vector) -> f64 {
    (v.0 * v.0 + v.1 * v.1).sqrt()
}

/// 两个向量夹角的余弦
pub fn angle_cosine(v1: Vector, v2: Vector) -> f64 {
    scalar_product(v1, v2) / module(v1) / module(v2)
}

/// p1和p2连线上的两个点，间距缩为原来的offset_ratio，两端再各向内收abs_offset
pub fn closer_points_rel(p1: Point, p2: Point, offset_ratio: f64, abs_offset: f64) -> (Point, Point) {
    let dx = (p2.x - p1.x) as f64;
    let dy = (p2.y - p1.y) as f64;
    let manhattan = dx.abs() + dy.abs();
    let (xoff, yoff) = if manhattan > 0.0 {
        (abs_offset * dx / manhattan, abs_offset * dy / manhattan)
    } else {
        (0.0, 0.0)
    };
    let k = (1.0 - offset_ratio) / 2.0;
    (
        Point::new((p1.x as f64 + dx * k + xoff) as i32, (p1.y as f64 + dy * k + yoff) as i32),
        Point::new((p2.x as f64 - dx * k - xoff) as i32, (p2.y as f64 - dy * k - yoff) as i32),
    )
}

/// Bresenham画线经过的像素，方向不保证从p0到p1
pub fn walk_line(p0: Point, p1: Point) -> Vec<Point> {
    let (mut x0, mut y0, mut x1, mut y1) = (p0.x, p0.y, p1.x, p1.y);
    let steep = (y1 - y0).abs() > (x1 - x0).abs();
    if steep {
        std::mem::swap(&mut x0, &mut y0);
        std::mem::swap(&mut x1, &mut y1);
    }
    if x0 > x1 {
        std::mem::swap(&mut x0, &mut x1);
        std::mem::swap(&mut y0, &mut y1);
    }
    let deltax = (x1 - x0) as f64;
    let deltay = (y1 - y0).abs() as f64;
    let mut error = deltax / 2.0;
    let mut y = y0;
    let ystep = if y0 < y1 { 1 } else { -1 };
    let mut points = Vec::with_capacity((x1 - x0 + 1) as usize);
    for x in x0..=x1 {
        if steep {
            points.push(Point::new(y, x));
        } else {
            points.push(Point::new(x, y));
        }
        error -= deltay;
        if error < 0.0 {
            y += ystep;
            error += deltax;
        }
    }
    points
}

/// 保证从p0走到p1的walk_line
pub fn walk_line_ordered(p0: Point, p1: Point) -> Vec<Point> {
    let reverse = if (p1.y - p0.y).abs() > (p1.x - p0.x).abs() {
        p0.y > p1.y
    } else {
        p0.x > p1.x
    };
    let mut points = walk_line(p0, p1);
    if reverse {
        points.reverse();
    }
    points
}

/// p0到p1之间等间距取num_points个点，包含两端
pub fn interpolate_line(p0: Point, p1: Point, num_points: usize) -> Vec<Point> {
    if num_points < 2 {
        return vec![p0];
    }
    let divisions = (num_points - 1) as f64;
    let dx = (p1.x - p0.x) as f64 / divisions;
    let dy = (p1.y - p0.y) as f64 / divisions;
    let mut points = Vec::with_capacity(num_points);
    points.push(p0);
    for i in 1..num_points - 1 {
        points.push(round_point((p0.x as f64 + dx * i as f64, p0.y as f64 + dy * i as f64)));
    }
    points.push(p1);
    points
}

/// 非等间距插值，间距线性变化，最后一段与第一段之比为factor
/// 用于透视下远近两条边长度不同的情况，factor为1时退化为等间距
pub fn interpolate_line_progressive(p0: Point, p1: Point, num_points: usize, factor: f64) -> Vec<Point> {
    if num_points <= 2 {
        return interpolate_line(p0, p1, num_points);
    }
    let diff = diff_points(p1, p0);
    let n = (num_points - 1) as f64;
    let h1 = 2.0 / n / (factor + 1.0);
    let delta = h1 * (factor - 1.0) / (n - 1.0);
    let mut points: Vec<Point> = (1..=num_points)
        .map(|i| {
            let i = i as f64;
            let pos = h1 * (i - 1.0) + 0.5 * delta * (i * i - 3.0 * i + 2.0);
            round_point(add_vectors(to_vector(p0), multiply_vector(diff, pos)))
        })
        .collect();
    if let Some(last) = points.last_mut() {
        *last = p1;
    }
    points
}

/// 近似水平线和近似竖直线的交点
pub fn intersection(hline: Line, vline: Line) -> Option<Point> {
    let (rho1, theta1) = (hline.rho, hline.theta);
    let (rho2, theta2) = (vline.rho, vline.theta);
    let sin = (theta1 - theta2).sin();
    let cos2 = theta2.cos();
    if sin.abs() < f64::EPSILON || cos2.abs() < f64::EPSILON {
        return None;
    }
    let y = (rho1 * theta2.cos() - rho2 * theta1.cos()) / sin;
    let x = (rho2 - y * theta2.sin()) / cos2;
    finite_point(x, y)
}

/// 直线上横坐标为x的点，直线接近竖直时返回None
pub fn line_point_at_x(line: Line, x: i32) -> Option<Point> {
    let sin = line.theta.sin();
    if sin.abs() < f64::EPSILON {
        return None;
    }
    let y = (line.rho - x as f64 * line.theta.cos()) / sin;
    finite_point(x as f64, truncate(y))
}

/// 直线上纵坐标为y的点，直线接近水平时返回None
pub fn line_point_at_y(line: Line, y: i32) -> Option<Point> {
    let cos = line.theta.cos();
    if cos.abs() < f64::EPSILON {
        return None;
    }
    let x = (line.rho - y as f64 * line.theta.sin()) / cos;
    finite_point(truncate(x), y as f64)
}

/// 向零截断，离整数只差浮点误差时取该整数
fn truncate(v: f64) -> f64 {
    let nearest = v.round();
    if (v - nearest).abs() < 1e-9 {
        nearest
    } else {
        v.trunc()
    }
}

fn finite_point(x: f64, y: f64) -> Option<Point> {
    if !x.is_finite() || !y.is_finite() || x.abs() > i32::MAX as f64 || y.abs() > i32::MAX as f64 {
        return None;
    }
    Some(round_point((x, y)))
}

/// 点是否在图片范围内
pub fn point_is_valid(point: Point, width: u32, height: u32) -> bool {
    point.x >= 0 && point.y >= 0 && (point.x as i64) < width as i64 && (point.y as i64) < height as i64
}

/// 假设两条线平行，把from_line上的点沿法线方向投到to_line上
pub fn project_point(point: Point, from_line: Line, to_line: Line) -> Vector {
    let d = to_line.rho - from_line.rho;
    (point.x as f64 + d * from_line.theta.cos(), point.y as f64 + d * from_line.theta.sin())
}

/// 平均值
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// 样本方差，分母n-1
pub fn sample_variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data)?;
    Some(data.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (data.len() - 1) as f64)
}

/// 多检测出一两条线时，选出相邻rho间距方差最小的expected条线
pub fn discard_spurious_lines(lines: &[Line], expected: usize) -> Vec<Line> {
    if expected >= lines.len() {
        return lines.to_vec();
    }
    let mut best: Option<(f64, Vec<usize>)> = None;
    for combination in combinations(lines.len(), expected) {
        let diffs: Vec<f64> = combination
            .windows(2)
            .map(|w| lines[w[1]].rho - lines[w[0]].rho)
            .collect();
        let variance = sample_variance(&diffs).unwrap_or(0.0);
        if best.as_ref().map_or(true, |(v, _)| variance < *v) {
            best = Some((variance, combination));
        }
    }
    match best {
        Some((_, combination)) => combination.iter().map(|&i| lines[i]).collect(),
        None => lines.to_vec(),
    }
}

/// 0..n中选k个下标的所有组合，按字典序
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut result = Vec::new();
    if k > n {
        return result;
    }
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        result.push(indices.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return result;
            }
            i -= 1;
            if indices[i] != i + n - k {
                break;
            }
            if i == 0 {
                return result;
            }
        }
        indices[i] += 1;
        for j in i + 1..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

/// 点到线段的距离
pub fn distance_to_segment(p: Vector, a: Vector, b: Vector) -> f64 {
    let ab = (b.0 - a.0, b.1 - a.1);
    let len2 = scalar_product(ab, ab);
    if len2 == 0.0 {
        return distance_f(p, a);
    }
    let t = (scalar_product((p.0 - a.0, p.1 - a.1), ab) / len2).clamp(0.0, 1.0);
    distance_f(p, (a.0 + ab.0 * t, a.1 + ab.1 * t))
}

/// 四边形左上和右下两点的中点
pub fn rect_center(plu: Point, prd: Point) -> Point {
    round_point(((plu.x + prd.x) as f64 / 2.0, (plu.y + prd.y) as f64 / 2.0))
}

/// angle到axes_angles中最近角度的距离，按pi取模
pub fn distance_closest_axis(angle: f64, axes_angles: &[f64]) -> f64 {
    let mut expanded = Vec::with_capacity(axes_angles.len() * 2);
    for a in axes_angles {
        let a = a.rem_euclid(PI);
        expanded.push(a);
        if a > FRAC_PI_2 {
            expanded.push(a - PI);
        } else {
            expanded.push(a + PI);
        }
    }
    let normalized = angle.rem_euclid(PI);
    expanded
        .iter()
        .map(|aa| (normalized - aa).abs())
        .fold(f64::INFINITY, f64::min)
}
