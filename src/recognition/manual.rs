//! 手动标注四角时的网格重建

use crate::models::card::{CornerMatrix, Point};
use crate::models::scan_input::ExamDimensions;
use crate::my_utils::math::{angle_cosine, diff_points, distance, interpolate_line_progressive, points_closer_to_horizontal};

/// 由每张表的四个外角点重建角点矩阵，点的顺序任意
///
/// 分组失败时返回空
pub fn process_box_corners(points: &[Point], dimensions: &ExamDimensions) -> Vec<CornerMatrix> {
    let num_boxes = dimensions.num_tables();
    if points.len() != 4 * num_boxes {
        log::debug!("manual detection: {} points for {num_boxes} tables", points.len());
        return Vec::new();
    }
    let mut points = points.to_vec();
    points.sort();

    // 先找最左边那个点的上下对应点
    let mut group1 = vec![points[0]];
    let mut group2 = Vec::new();
    for &p in &points[1..] {
        if points_closer_to_horizontal(points[0], p) {
            group1.push(p);
        } else {
            group2.push(p);
            break;
        }
    }
    if group2.is_empty() {
        return Vec::new();
    }
    let vertical = diff_points(group2[0], group1[0]);
    for &p in &points[group1.len() + group2.len()..] {
        let (Some(&last1), Some(&last2)) = (group1.last(), group2.last()) else {
            return Vec::new();
        };
        let cos1 = angle_cosine(vertical, diff_points(p, last1)).abs();
        let cos2 = angle_cosine(vertical, diff_points(p, last2)).abs();
        if cos1 < cos2 {
            group1.push(p);
        } else {
            group2.push(p);
        }
    }
    if group1[0].y > group2[0].y {
        std::mem::swap(&mut group1, &mut group2);
    }
    if group1.len() != 2 * num_boxes || group2.len() != 2 * num_boxes {
        log::debug!("manual detection: bad groups {} / {}", group1.len(), group2.len());
        return Vec::new();
    }
    let mut corners = Vec::with_capacity(num_boxes);
    for (i, table) in dimensions.tables().iter().enumerate() {
        let outer = fix_box_if_needed([group1[2 * i], group1[2 * i + 1], group2[2 * i], group2[2 * i + 1]]);
        match construct_box(outer, table.num_choices, table.num_questions) {
            Some(matrix) => corners.push(matrix),
            None => return Vec::new(),
        }
    }
    corners
}

/// 外角点(左上, 右上, 左下, 右下)插值出所有格子角点，透视变形时间距按对边长度比例渐变
pub fn construct_box(outer: [Point; 4], num_columns: usize, num_rows: usize) -> Option<CornerMatrix> {
    let [plu, pru, pld, prd] = outer;
    let up = distance(plu, pru);
    let down = distance(pld, prd);
    let left = distance(plu, pld);
    let right = distance(pru, prd);
    if up == 0.0 || left == 0.0 {
        return None;
    }
    let factor_h = down / up;
    let factor_v = right / left;
    let vert_left = interpolate_line_progressive(plu, pld, num_rows + 1, factor_h);
    let vert_right = interpolate_line_progressive(pru, prd, num_rows + 1, factor_h);
    Some(
        vert_left
            .into_iter()
            .zip(vert_right)
            .map(|(pl, pr)| interpolate_line_progressive(pl, pr, num_columns + 1, factor_v))
            .collect(),
    )
}

/// 上下颠倒的角点换回来
pub fn fix_box_if_needed(corners: [Point; 4]) -> [Point; 4] {
    let [mut plu, mut pru, mut pld, mut prd] = corners;
    if plu.y > pld.y {
        std::mem::swap(&mut plu, &mut pld);
        log::warn!("box {corners:?}: left corners swapped");
    }
    if pru.y > prd.y {
        std::mem::swap(&mut pru, &mut prd);
        log::warn!("box {corners:?}: right corners swapped");
    }
    [plu, pru, pld, prd]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<Point> {
        [
            (100, 100),
            (220, 98),
            (102, 300),
            (222, 302),
            (300, 101),
            (420, 99),
            (301, 301),
            (421, 303),
        ]
        .map(Point::from)
        .to_vec()
    }

    #[test]
    fn order_invariant() -> anyhow::Result<()> {
        let dims = ExamDimensions::parse("3,5;3,5", false)?;
        let points = sample_points();
        let expected = process_box_corners(&points, &dims);
        assert_eq!(expected.len(), 2);
        assert_eq!(expected[0][0][0], Point::new(100, 100));
        assert_eq!(expected[0][5][3], Point::new(222, 302));
        assert_eq!(expected[1][0][0], Point::new(300, 101));
        assert_eq!(expected[1][5][3], Point::new(421, 303));

        let mut shuffled = points.clone();
        shuffled.reverse();
        assert_eq!(process_box_corners(&shuffled, &dims), expected);
        shuffled.rotate_left(3);
        assert_eq!(process_box_corners(&shuffled, &dims), expected);
        shuffled.swap(0, 5);
        assert_eq!(process_box_corners(&shuffled, &dims), expected);
        Ok(())
    }

    #[test]
    fn wrong_point_count() -> anyhow::Result<()> {
        let dims = ExamDimensions::parse("3,5;3,5", false)?;
        let points = sample_points();
        assert!(process_box_corners(&points[..7], &dims).is_empty());
        // 所有点在一条水平线上分不出两组
        let flat: Vec<Point> = (0..8).map(|i| Point::new(50 * i, 100)).collect();
        assert!(process_box_corners(&flat, &dims).is_empty());
        Ok(())
    }

    #[test]
    fn construct_rectangle() {
        let outer = [Point::new(0, 0), Point::new(90, 0), Point::new(0, 100), Point::new(90, 100)];
        let corners = construct_box(outer, 3, 5).unwrap();
        assert_eq!(corners.len(), 6);
        assert_eq!(corners[0], vec![Point::new(0, 0), Point::new(30, 0), Point::new(60, 0), Point::new(90, 0)]);
        assert_eq!(corners[2][1], Point::new(30, 40));
        assert!(construct_box([Point::new(0, 0); 4], 3, 5).is_none());
    }

    #[test]
    fn fix_swapped_corners() {
        let fixed = fix_box_if_needed([Point::new(0, 100), Point::new(90, 0), Point::new(0, 0), Point::new(90, 100)]);
        assert_eq!(fixed, [Point::new(0, 0), Point::new(90, 0), Point::new(0, 100), Point::new(90, 100)]);
    }
}
