pub mod config;
pub mod error;
pub mod models;
pub mod my_utils;
pub mod recognition;

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::f64::consts::FRAC_PI_2;
    use std::rc::Rc;

    use anyhow::Result;
    use image::{GrayImage, Luma};
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
    use imageproc::rect::Rect;

    use super::*;
    use config::CONFIG;
    use models::card::{Line, Point};
    use models::scan_input::{DetectionOptions, ExamDimensions, Frame};
    use recognition::backend::HoughLines;
    use recognition::classifier::{CellSample, RecClassifier};
    use recognition::context::DetectorContext;
    use recognition::engine::Engine;
    use recognition::numbers::DigitClassifier;
    use recognition::vx::CrossClassifier;

    /// 直接返回给定直线的霍夫变换
    struct FixedLines(Vec<Line>);

    impl HoughLines for FixedLines {
        fn hough_lines(&self, _mask: &GrayImage, _vote_threshold: u32) -> Vec<Line> {
            self.0.clone()
        }
    }

    /// 记下每次调用的投票阈值
    struct RecordingHough(Rc<RefCell<Vec<u32>>>);

    impl HoughLines for RecordingHough {
        fn hough_lines(&self, _mask: &GrayImage, vote_threshold: u32) -> Vec<Line> {
            self.0.borrow_mut().push(vote_threshold);
            Vec::new()
        }
    }

    /// 不看图片，总是返回同一个类别
    struct FixedLabel(i32);

    impl RecClassifier for FixedLabel {
        fn extract_features(&self, _sample: &CellSample) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }

        fn classify(&self, _features: &[f32]) -> Result<i32> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl RecClassifier for Broken {
        fn extract_features(&self, _sample: &CellSample) -> Result<Vec<f32>> {
            anyhow::bail!("feature extraction failed")
        }

        fn classify(&self, _features: &[f32]) -> Result<i32> {
            Ok(0)
        }
    }

    const VLINES: [f64; 4] = [120.0, 180.0, 240.0, 300.0];
    const HLINES: [f64; 6] = [110.0, 150.0, 190.0, 230.0, 270.0, 310.0];
    const ANSWERS: [u8; 5] = [2, 1, 0, 0, 3];

    fn grid_lines() -> Vec<Line> {
        let mut lines: Vec<Line> = VLINES.iter().map(|&rho| Line::new(rho, 0.0)).collect();
        lines.extend(HLINES.iter().map(|&rho| Line::new(rho, FRAC_PI_2)));
        lines
    }

    fn id_box_lines() -> Vec<Line> {
        let mut lines = grid_lines();
        lines.push(Line::new(30.0, FRAC_PI_2));
        lines.push(Line::new(70.0, FRAC_PI_2));
        lines
    }

    fn draw_cross(img: &mut GrayImage, plu: Point, prd: Point) {
        let (x0, y0) = (plu.x as f32 + 6.0, plu.y as f32 + 4.0);
        let (x1, y1) = (prd.x as f32 - 6.0, prd.y as f32 - 4.0);
        for d in -2..=2 {
            let d = d as f32;
            draw_line_segment_mut(img, (x0, y0 + d), (x1, y1 + d), Luma([255u8]));
            draw_line_segment_mut(img, (x1, y0 + d), (x0, y1 + d), Luma([255u8]));
        }
    }

    /// 3选项5题的答题表，答案[2, 1, 0, 0, 3]，模型点阵为B
    fn exam_image() -> GrayImage {
        let mut img = GrayImage::new(480, 480);
        for (question, &answer) in ANSWERS.iter().enumerate() {
            if answer == 0 {
                continue;
            }
            let choice = answer as usize - 1;
            let plu = Point::new(VLINES[choice] as i32, HLINES[question] as i32);
            let prd = Point::new(VLINES[choice + 1] as i32, HLINES[question + 1] as i32);
            draw_cross(&mut img, plu, prd);
        }
        // B = [1, 0, 0]
        draw_filled_circle_mut(&mut img, (150, 325), 12, Luma([255u8]));
        draw_filled_circle_mut(&mut img, (210, 365), 12, Luma([255u8]));
        draw_filled_circle_mut(&mut img, (270, 365), 12, Luma([255u8]));
        img
    }

    /// 答题表上方的学号框，9位，竖线间距40
    fn draw_id_box(img: &mut GrayImage) {
        draw_filled_rect_mut(img, Rect::at(60, 30).of_size(362, 2), Luma([255u8]));
        draw_filled_rect_mut(img, Rect::at(60, 70).of_size(362, 2), Luma([255u8]));
        for i in 0..10 {
            draw_filled_rect_mut(img, Rect::at(60 + 40 * i, 30).of_size(2, 42), Luma([255u8]));
        }
    }

    fn engine(options: DetectionOptions, lines: Vec<Line>) -> Result<Engine> {
        let dims = ExamDimensions::parse("3,5", false)?;
        let digits = if options.read_student_id {
            Some(DigitClassifier::new(Box::new(FixedLabel(7)), None)?)
        } else {
            None
        };
        Ok(Engine::new(dims, options, CrossClassifier::mask(), digits)?.with_hough(Box::new(FixedLines(lines))))
    }

    #[test]
    fn detect_answers_and_model() -> Result<()> {
        let engine = engine(DetectionOptions::default(), grid_lines())?;
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(exam_image()));

        assert!(output.decisions.success);
        assert_eq!(output.decisions.answers, ANSWERS.to_vec());
        assert_eq!(output.decisions.model, Some('B'));
        assert_eq!(output.decisions.infobits, Some(vec![true, false, false]));
        assert_eq!(output.decisions.detected_id, None);
        assert_eq!(output.status.flags(), [true, true, true, true, false, false]);
        assert_eq!(output.capture.progress, 1.0);
        assert_eq!(output.capture.answer_cells.len(), 5);
        assert_eq!(output.capture.answer_cells[4][2].prd, Point::new(300, 310));
        assert!(output.capture.image.is_none());
        assert_eq!(ctx.failures(), 0);

        // 点中第2题第1个选项
        assert_eq!(output.capture.get_cell_clicked(Point::new(150, 170)), Some((1, 1)));
        Ok(())
    }

    #[test]
    fn detect_student_id() -> Result<()> {
        let options = DetectionOptions {
            read_student_id: true,
            id_digit_count: 9,
            ..Default::default()
        };
        let engine = engine(options, id_box_lines())?;
        let mut img = exam_image();
        draw_id_box(&mut img);
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(img));

        assert!(output.decisions.success);
        assert_eq!(output.decisions.answers, ANSWERS.to_vec());
        assert_eq!(output.decisions.detected_id.as_deref(), Some("777777777"));
        let scores = output.decisions.id_scores.expect("id scores");
        assert_eq!(scores.len(), 9);
        assert_eq!(scores[0][7], 1.0);
        assert!(output.status.id_box_hlines && output.status.id_box);
        assert_eq!(output.capture.id_cells.len(), 9);
        assert_eq!(output.capture.id_cells[0].plu, Point::new(60, 30));
        assert_eq!(output.capture.id_cells[8].prd, Point::new(420, 70));
        assert_eq!(output.capture.progress, 1.0);
        Ok(())
    }

    #[test]
    fn missing_id_box_fails() -> Result<()> {
        let options = DetectionOptions {
            read_student_id: true,
            id_digit_count: 9,
            ..Default::default()
        };
        // 有学号框的边线但图上没有框
        let engine = engine(options, id_box_lines())?;
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(exam_image()));
        assert!(!output.decisions.success);
        assert!(output.status.id_box_hlines);
        assert!(!output.status.id_box);
        assert_eq!(output.decisions.answers, ANSWERS.to_vec());
        assert_eq!(ctx.failures(), 1);
        Ok(())
    }

    #[test]
    fn manual_points_any_order() -> Result<()> {
        let engine = engine(DetectionOptions::default(), Vec::new())?;
        let ctx = DetectorContext::default();
        let points = [Point::new(300, 310), Point::new(120, 110), Point::new(120, 310), Point::new(300, 110)];
        let output = engine.detect_manual(&ctx, &Frame::Processed(exam_image()), &points)?;
        assert!(output.decisions.success);
        assert_eq!(output.decisions.answers, ANSWERS.to_vec());
        assert_eq!(output.decisions.model, Some('B'));
        assert!(output.capture.id_cells.is_empty());
        assert_eq!(output.capture.progress, 1.0);

        let output = engine.detect_manual(&ctx, &Frame::Processed(exam_image()), &points[..3])?;
        assert!(!output.decisions.success);
        assert!(!output.status.cells);
        Ok(())
    }

    #[test]
    fn broken_model_pattern() -> Result<()> {
        let engine = engine(DetectionOptions::default(), grid_lines())?;
        let mut img = exam_image();
        // 第3列上下都涂
        draw_filled_circle_mut(&mut img, (270, 325), 12, Luma([255u8]));
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(img.clone()));
        assert!(!output.decisions.success);
        assert!(output.status.cells);
        assert!(!output.status.infobits);
        assert_eq!(output.decisions.model, None);
        assert_eq!(output.decisions.answers, ANSWERS.to_vec());
        assert_eq!(ctx.failures(), 1);

        // 不读点阵时照常成功
        let options = DetectionOptions {
            decode_model_bits: false,
            ..Default::default()
        };
        let engine = self::engine(options, grid_lines())?;
        let output = engine.detect(&mut ctx, &Frame::Processed(img));
        assert!(output.decisions.success);
        assert_eq!(output.capture.progress, 1.0);
        assert_eq!(ctx.failures(), 0);
        Ok(())
    }

    #[test]
    fn fixed_threshold_reaches_line_detection() -> Result<()> {
        let options = DetectionOptions {
            fixed_hough_threshold: Some(150),
            ..Default::default()
        };
        let calls = Rc::new(RefCell::new(Vec::new()));
        let engine = Engine::new(ExamDimensions::parse("3,5", false)?, options, CrossClassifier::mask(), None)?
            .with_hough(Box::new(RecordingHough(calls.clone())));
        let mut ctx = engine.new_context();
        let frame = Frame::Processed(exam_image());
        for _ in 0..3 {
            engine.detect(&mut ctx, &frame);
        }
        assert_eq!(*calls.borrow(), vec![150, 150, 150]);
        Ok(())
    }

    #[test]
    fn no_lines_moves_threshold() -> Result<()> {
        let engine = engine(DetectionOptions::default(), Vec::new())?;
        let mut ctx = DetectorContext::default();
        let first = ctx.hough_threshold();
        let frame = Frame::Processed(exam_image());
        assert!(!engine.exam_detected(&ctx, &frame));
        let output = engine.detect(&mut ctx, &frame);
        assert!(!output.decisions.success);
        assert_eq!(output.status.flags(), [false; 6]);
        assert_eq!(output.capture.progress, 0.0);
        assert_eq!(ctx.hough_threshold(), CONFIG.line_detect.hough_thresholds[1]);
        assert_ne!(ctx.hough_threshold(), first);

        // 锁定后不再换阈值
        ctx.lock_threshold();
        engine.detect(&mut ctx, &frame);
        assert_eq!(ctx.hough_threshold(), CONFIG.line_detect.hough_thresholds[1]);

        let engine = self::engine(DetectionOptions::default(), grid_lines())?;
        assert!(engine.exam_detected(&ctx, &frame));
        Ok(())
    }

    #[test]
    fn faults_are_contained() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("exam_recognize_faults_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let options = DetectionOptions {
            error_logging: true,
            logging_dir: dir.clone(),
            ..Default::default()
        };
        let dims = ExamDimensions::parse("3,5", false)?;
        let engine = Engine::new(dims, options, CrossClassifier::new(Box::new(Broken), 1.0), None)?
            .with_hough(Box::new(FixedLines(grid_lines())));
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(exam_image()));

        assert!(!output.decisions.success);
        assert!(output.status.lines && output.status.boxes);
        assert!(!output.status.cells && !output.status.infobits);
        assert!(output.decisions.answers.is_empty());
        assert_eq!(ctx.failures(), 1);
        let log = std::fs::read_to_string(dir.join(&CONFIG.detector.error_log))?;
        assert!(log.contains("feature extraction failed"));
        let dumped = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".png"))
            .count();
        assert_eq!(dumped, 1);
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn debug_image_drawn() -> Result<()> {
        let options = DetectionOptions {
            show_lines: true,
            show_status: true,
            ..Default::default()
        };
        let engine = engine(options, grid_lines())?;
        let mut ctx = DetectorContext::default();
        let output = engine.detect(&mut ctx, &Frame::Processed(exam_image()));
        let img = output.capture.image.expect("debug image");
        assert_eq!(img.dimensions(), (480, 480));
        // 竖线画成蓝色
        assert_eq!(img.get_pixel(120, 50).0, [0, 0, 255]);
        Ok(())
    }
}
