use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contrast::threshold;
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use imageproc::rect::Rect;

use crate::models::card::{Line, Point};
use super::math::*;

/// 灰度化
pub fn to_gray(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(gray.clone()).to_rgb8()
}

/// 局部均值自适应二值化，墨迹（比邻域均值暗offset以上）为255
pub fn binarize(gray: &GrayImage, block_size: u32, offset: f64) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut out = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return out;
    }
    let integral: ImageBuffer<Luma<i64>, Vec<i64>> = integral_image(gray);
    let half = block_size / 2;
    for y in 0..height {
        let top = y.saturating_sub(half);
        let bottom = (y + half).min(height - 1);
        for x in 0..width {
            let left = x.saturating_sub(half);
            let right = (x + half).min(width - 1);
            let sum = sum_image_pixels(&integral, left, top, right, bottom)[0];
            let count = ((right - left + 1) * (bottom - top + 1)) as f64;
            let local_threshold = sum as f64 / count - offset;
            if gray.get_pixel(x, y).0[0] as f64 <= local_threshold {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

/// 像素是否为墨迹，越界视为空白
pub fn pixel_active(image: &GrayImage, p: Point) -> bool {
    point_is_valid(p, image.width(), image.height()) && image.get_pixel(p.x as u32, p.y as u32).0[0] > 0
}

/// 圆形区域内的像素总数和墨迹数，只统计图片范围内的像素
pub fn count_pixels_in_circle(image: &GrayImage, center: Point, radius: i32) -> (u32, u32) {
    let mut total = 0;
    let mut active = 0;
    let (cx, cy, r) = (center.x as i64, center.y as i64, radius.max(0) as i64);
    let r2 = r * r;
    // 只扫圆和图片相交的部分
    let (x0, x1) = ((cx - r).max(0), (cx + r).min(image.width() as i64 - 1));
    let (y0, y1) = ((cy - r).max(0), (cy + r).min(image.height() as i64 - 1));
    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy > r2 {
                continue;
            }
            total += 1;
            if image.get_pixel(x as u32, y as u32).0[0] > 0 {
                active += 1;
            }
        }
    }
    (total, active)
}

/// 粗线段组成的掩膜内的像素总数和墨迹数，线段为(起点, 终点, 半宽)
pub fn count_pixels_in_segments(image: &GrayImage, segments: &[(Point, Point, f64)]) -> (u32, u32) {
    if segments.is_empty() {
        return (0, 0);
    }
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for (a, b, r) in segments {
        min_x = min_x.min(a.x.min(b.x) as f64 - r);
        min_y = min_y.min(a.y.min(b.y) as f64 - r);
        max_x = max_x.max(a.x.max(b.x) as f64 + r);
        max_y = max_y.max(a.y.max(b.y) as f64 + r);
    }
    let x0 = min_x.floor().max(0.0) as i32;
    let y0 = min_y.floor().max(0.0) as i32;
    let x1 = max_x.ceil().min(image.width() as f64 - 1.0) as i32;
    let y1 = max_y.ceil().min(image.height() as f64 - 1.0) as i32;
    let mut total = 0;
    let mut active = 0;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = (x as f64, y as f64);
            let inside = segments
                .iter()
                .any(|(a, b, r)| distance_to_segment(p, to_vector(*a), to_vector(*b)) <= *r);
            if inside {
                total += 1;
                if pixel_active(image, Point::new(x, y)) {
                    active += 1;
                }
            }
        }
    }
    (total, active)
}

/// 四边形内的像素总数和墨迹数，角点顺序为左上、右上、左下、右下
pub fn count_pixels_in_cell(image: &GrayImage, plu: Point, pru: Point, pld: Point, prd: Point) -> (u32, u32) {
    let polygon = [plu, pru, prd, pld];
    let min_x = polygon.iter().map(|p| p.x).min().unwrap_or(0).max(0);
    let max_x = polygon.iter().map(|p| p.x).max().unwrap_or(-1).min(image.width() as i32 - 1);
    let min_y = polygon.iter().map(|p| p.y).min().unwrap_or(0).max(0);
    let max_y = polygon.iter().map(|p| p.y).max().unwrap_or(-1).min(image.height() as i32 - 1);
    let mut total = 0;
    let mut active = 0;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = Point::new(x, y);
            if point_in_convex_polygon(p, &polygon) {
                total += 1;
                if pixel_active(image, p) {
                    active += 1;
                }
            }
        }
    }
    (total, active)
}

fn point_in_convex_polygon(p: Point, polygon: &[Point; 4]) -> bool {
    let mut positive = false;
    let mut negative = false;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = (b.x - a.x) as i64 * (p.y - a.y) as i64 - (b.y - a.y) as i64 * (p.x - a.x) as i64;
        if cross > 0 {
            positive = true;
        } else if cross < 0 {
            negative = true;
        }
    }
    !(positive && negative)
}

/// 把四边形区域透视变换到width x height的矩形，角点顺序为左上、右上、左下、右下
pub fn warp_quad_to_rect(image: &GrayImage, corners: &[Point; 4], width: u32, height: u32) -> Option<GrayImage> {
    if width == 0 || height == 0 {
        return None;
    }
    let from = corners.map(|p| (p.x as f32, p.y as f32));
    let (w, h) = ((width - 1) as f32, (height - 1) as f32);
    let to = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)];
    let projection = Projection::from_control_points(from, to)?;
    let mut out = GrayImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
    Some(out)
}

/// 透视变换后按64二值化
pub fn project_to_rectangle(image: &GrayImage, corners: &[Point; 4], width: u32, height: u32) -> Option<GrayImage> {
    let warped = warp_quad_to_rect(image, corners, width, height)?;
    Some(threshold(&warped, 64))
}

/// 用二阶矩做错切校正，输出dim x dim
pub fn deskew(image: &GrayImage, dim: u32) -> GrayImage {
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = pixel.0[0] as f64;
        m00 += v;
        m10 += x as f64 * v;
        m01 += y as f64 * v;
    }
    if m00 == 0.0 {
        return image.clone();
    }
    let (cx, cy) = (m10 / m00, m01 / m00);
    let mut mu11 = 0.0;
    let mut mu02 = 0.0;
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = pixel.0[0] as f64;
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        mu11 += dx * dy * v;
        mu02 += dy * dy * v;
    }
    if mu02.abs() < 1e-2 {
        return image.clone();
    }
    let skew = mu11 / mu02;
    let shift = 0.5 * dim as f64 * skew;
    let matrix = [1.0, -skew as f32, shift as f32, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let mut out = GrayImage::new(dim, dim);
    match Projection::from_matrix(matrix) {
        Some(projection) => {
            warp_into(image, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
            out
        }
        None => image.clone(),
    }
}

/// 去掉四周的空白，只保留墨迹所在的行列
pub fn clear_boundbox(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let row_empty = |y: u32| (0..width).all(|x| image.get_pixel(x, y).0[0] == 0);
    let col_empty = |x: u32| (0..height).all(|y| image.get_pixel(x, y).0[0] == 0);

    let mut top = 0;
    let mut bottom = height;
    let mut found = false;
    for y in 0..height {
        if !found && !row_empty(y) {
            // 单独一行的噪声不算
            if y + 1 >= height || !row_empty(y + 1) {
                top = y;
                found = true;
            }
        } else if found && row_empty(y) {
            bottom = y;
            break;
        }
    }
    let mut left = 0;
    let mut right = width;
    found = false;
    for x in 0..width {
        if !found && !col_empty(x) {
            if x + 2 >= width || !col_empty(x + 2) {
                left = x;
                found = true;
            }
        } else if found && col_empty(x) {
            right = x;
            break;
        }
    }
    if right <= left || bottom <= top {
        return image.clone();
    }
    imageops::crop_imm(image, left, top, right - left, bottom - top).to_image()
}

/// 缩放到dim x dim，双线性
pub fn resize_square(image: &GrayImage, dim: u32) -> GrayImage {
    imageops::resize(image, dim, dim, FilterType::Triangle)
}

/// 在图上画一条霍夫直线，和图片边界有两个交点时才画
pub fn draw_line(img: &mut RgbImage, line: Line, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let candidates = [
        line_point_at_x(line, 0),
        line_point_at_x(line, width as i32 - 1),
        line_point_at_y(line, 0),
        line_point_at_y(line, height as i32 - 1),
    ];
    let mut points: Vec<Point> = Vec::new();
    for p in candidates.into_iter().flatten() {
        if point_is_valid(p, width, height) && !points.contains(&p) {
            points.push(p);
        }
    }
    if points.len() == 2 {
        draw_line_segment_mut(
            img,
            (points[0].x as f32, points[0].y as f32),
            (points[1].x as f32, points[1].y as f32),
            color,
        );
    }
}

pub fn draw_point(img: &mut RgbImage, point: Point, color: Rgb<u8>) {
    if point_is_valid(point, img.width(), img.height()) {
        draw_filled_circle_mut(img, (point.x, point.y), 2, color);
    } else {
        log::debug!("draw_point: bad point ({}, {})", point.x, point.y);
    }
}

/// 右上角画状态标志，成功为蓝色，失败为红色
pub fn draw_status_flags(img: &mut RgbImage, flags: &[bool]) {
    let size = 16u32;
    let step = 24i32;
    let mut x = img.width() as i32 - 5 - flags.len() as i32 * step;
    for &flag in flags {
        let color = if flag { Rgb([0u8, 0u8, 255u8]) } else { Rgb([255u8, 0u8, 0u8]) };
        draw_filled_rect_mut(img, Rect::at(x, 60).of_size(size, size), color);
        x += step;
    }
}
