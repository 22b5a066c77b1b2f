//! 试卷模型点阵的编码、解码和读取
//!
//! 每个选项列下方有上下两个点，只涂其中一个，涂上面的表示1。
//! 模型字母A..H编成3位，加1位校验，重复铺满所有列。

use image::GrayImage;

use crate::config::CONFIG;
use crate::error::ExamError;
use crate::models::card::{CornerMatrix, Point};
use crate::my_utils::image::count_pixels_in_circle;
use crate::my_utils::math::{diff_points, module, round_point, Vector};

/// 模型字母编码成num_tables * num_choices位
pub fn encode_model(model: char, num_tables: usize, num_choices: usize) -> Result<Vec<bool>, ExamError> {
    let num_bits = num_tables * num_choices;
    if !('A'..='H').contains(&model) {
        return Err(ExamError::BadModel(format!("model '{model}' is not in A..H")));
    }
    let model_num = model as u32 - 'A' as u32;
    if num_bits == 0 || (num_bits < 32 && model_num >= 1 << (num_bits - 1)) {
        return Err(ExamError::BadModel(format!("model '{model}' does not fit in {num_bits} bits")));
    }
    let b0 = model_num & 1 == 1;
    let b1 = model_num & 2 == 2;
    let b2 = model_num & 4 == 4;
    let group = [b0, b1, b2, b0 ^ b1 ^ !b2];
    Ok(group.iter().copied().cycle().take(num_bits).collect())
}

/// 解码，2到3位时无法校验直接接受；全零在问卷模式下表示不打乱的模型'0'
pub fn decode_model(bits: &[bool], accept_model_0: bool) -> Option<char> {
    let valid = match bits.len() {
        0 | 1 => false,
        2 | 3 => true,
        _ => bits[3] == (bits[0] ^ bits[1] ^ !bits[2]) && (4..bits.len()).all(|i| bits[i] == bits[i - 4]),
    };
    if valid {
        let mut value = 0u8;
        for (i, &bit) in bits.iter().take(3).enumerate() {
            if bit {
                value |= 1 << i;
            }
        }
        Some((b'A' + value) as char)
    } else if accept_model_0 && !bits.is_empty() && bits.iter().all(|&b| !b) {
        Some('0')
    } else {
        None
    }
}

/// 读取每张表最后一行下方的点阵，有任何一对点不是恰好涂一个就返回None
pub fn read_infobits(image: &GrayImage, corner_matrixes: &[CornerMatrix]) -> Option<Vec<bool>> {
    let mut pairs = Vec::new();
    for corners in corner_matrixes {
        if corners.len() < 2 {
            return None;
        }
        let last = &corners[corners.len() - 1];
        let prev = &corners[corners.len() - 2];
        for i in 1..last.len() {
            let dx = diff_points(last[i - 1], last[i]);
            let dy = diff_points(last[i], prev[i]);
            let center = round_point((
                last[i].x as f64 + dx.0 / 2.0 + dy.0 / CONFIG.infobits.dot_offset_divisor,
                last[i].y as f64 + dx.1 / 2.0 + dy.1 / CONFIG.infobits.dot_offset_divisor,
            ));
            pairs.push(decide_infobit(image, center, dy));
        }
    }
    if !pairs.is_empty() && pairs.iter().all(|(up, down)| up ^ down) {
        Some(pairs.into_iter().map(|(up, _)| up).collect())
    } else {
        log::debug!("infobits: invalid pattern {pairs:?}");
        None
    }
}

/// 判断上下两个点是否涂了，down点在up点下方一行
pub fn decide_infobit(image: &GrayImage, center_up: Point, dy: Vector) -> (bool, bool) {
    let center_down = round_point((center_up.x as f64 + dy.0, center_up.y as f64 + dy.1));
    let radius = ((module(dy) * CONFIG.infobits.mask_radius_multiplier).round() as i32).max(1);
    let (mask_pixels, up_pixels) = count_pixels_in_circle(image, center_up, radius);
    let (_, down_pixels) = count_pixels_in_circle(image, center_down, radius);
    if mask_pixels < 1 {
        return (false, false);
    }
    let threshold = CONFIG.infobits.mask_threshold;
    (
        up_pixels as f64 / mask_pixels as f64 >= threshold,
        down_pixels as f64 / mask_pixels as f64 >= threshold,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    #[test]
    fn encode_known_models() {
        assert_eq!(encode_model('A', 1, 3).unwrap(), vec![false, false, false]);
        assert_eq!(encode_model('B', 1, 3).unwrap(), vec![true, false, false]);
        assert_eq!(
            encode_model('D', 2, 5).unwrap(),
            vec![true, true, false, true, true, true, false, true, true, true]
        );
    }

    #[test]
    fn encode_errors() {
        assert_eq!(encode_model('I', 2, 4).unwrap_err().key(), "bad_model");
        assert_eq!(encode_model('a', 2, 4).unwrap_err().key(), "bad_model");
        // 2位只能放A和B
        assert!(encode_model('B', 1, 2).is_ok());
        assert_eq!(encode_model('C', 1, 2).unwrap_err().key(), "bad_model");
        assert!(encode_model('D', 1, 3).is_ok());
        assert_eq!(encode_model('E', 1, 3).unwrap_err().key(), "bad_model");
        assert_eq!(decode_model(&encode_model('D', 1, 3).unwrap(), false), Some('D'));
    }

    #[test]
    fn round_trip() {
        for model in 'A'..='H' {
            for num_tables in 1..=4 {
                for num_choices in 3..=6 {
                    if num_tables * num_choices < 4 {
                        continue;
                    }
                    let bits = encode_model(model, num_tables, num_choices).unwrap();
                    assert_eq!(decode_model(&bits, false), Some(model), "{model} {num_tables}x{num_choices}");
                }
            }
        }
    }

    #[test]
    fn decode_rejects_broken_pattern() {
        let mut bits = encode_model('F', 2, 4).unwrap();
        bits[6] = !bits[6];
        assert_eq!(decode_model(&bits, false), None);
        // 校验位错
        assert_eq!(decode_model(&[true, false, false, true], false), None);
        assert_eq!(decode_model(&[false; 8], false), None);
        assert_eq!(decode_model(&[false; 8], true), Some('0'));
        assert_eq!(decode_model(&[], true), None);
    }

    fn corners() -> Vec<CornerMatrix> {
        vec![vec![
            vec![Point::new(120, 270), Point::new(180, 270), Point::new(240, 270), Point::new(300, 270)],
            vec![Point::new(120, 310), Point::new(180, 310), Point::new(240, 310), Point::new(300, 310)],
        ]]
    }

    #[test]
    fn read_dots() {
        // 中心在(150|210|270, 325)，下方的点在365
        let mut img = GrayImage::new(480, 480);
        draw_filled_circle_mut(&mut img, (150, 325), 12, Luma([255u8]));
        draw_filled_circle_mut(&mut img, (210, 365), 12, Luma([255u8]));
        draw_filled_circle_mut(&mut img, (270, 365), 12, Luma([255u8]));
        assert_eq!(read_infobits(&img, &corners()), Some(vec![true, false, false]));

        // 同一列上下都涂了
        draw_filled_circle_mut(&mut img, (270, 325), 12, Luma([255u8]));
        assert_eq!(read_infobits(&img, &corners()), None);
    }

    #[test]
    fn dot_outside_image() {
        let img = GrayImage::new(100, 100);
        assert_eq!(decide_infobit(&img, Point::new(500, 500), (0.0, 40.0)), (false, false));
    }
}
