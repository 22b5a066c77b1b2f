use image::{Rgb, RgbImage};

use crate::error::ExamError;
use crate::models::card::{Axis, CornerMatrix, Line, Point};
use crate::models::engine_rec::ProcessedImages;
use crate::models::rec_result::{CellGeometry, DetectionOutput, DetectionStatus, ExamCapture, ExamDecisions};
use crate::models::scan_input::{DetectionOptions, ExamDimensions, Frame, ImageTransformer};
use crate::my_utils::image::{draw_line, draw_point, draw_status_flags, gray_to_rgb, to_gray};
use crate::my_utils::io::write_error_dump;
use crate::recognition::backend::{AdaptiveMean, Binarize, HoughLines, ImageprocHough};
use crate::recognition::black_fill::{answer_cells_geometry, RecBlackFill};
use crate::recognition::boxes::{cell_corners, filter_axes};
use crate::recognition::context::DetectorContext;
use crate::recognition::id_box::id_boxes_geometry;
use crate::recognition::infobits::read_infobits;
use crate::recognition::lines::{detect_boxes, detect_lines};
use crate::recognition::manual::process_box_corners;
use crate::recognition::numbers::{DigitClassifier, RecNumber};
use crate::recognition::vx::CrossClassifier;

const COLOR_VLINES: Rgb<u8> = Rgb([0, 0, 255]);
const COLOR_HLINES: Rgb<u8> = Rgb([255, 0, 255]);
const COLOR_ID_HLINES: Rgb<u8> = Rgb([0, 255, 255]);
const COLOR_CORNERS: Rgb<u8> = Rgb([0, 0, 255]);

/// 识别引擎，保存试卷格式、选项和分类器，帧间状态由调用方的DetectorContext保存
pub struct Engine {
    dimensions: ExamDimensions,
    options: DetectionOptions,
    crosses: CrossClassifier,
    digits: Option<DigitClassifier>,
    binarizer: Box<dyn Binarize>,
    hough: Box<dyn HoughLines>,
}

/// 一次识别中途得到的几何信息，用于调试绘制
#[derive(Default)]
struct DebugGeometry {
    lines: Vec<Line>,
    axes: Vec<Axis>,
    corner_matrixes: Vec<CornerMatrix>,
    id_hlines: Option<[Line; 2]>,
    id_cells: Vec<CellGeometry>,
}

impl Engine {
    /// 读学号时必须提供数字分类器
    pub fn new(
        dimensions: ExamDimensions,
        options: DetectionOptions,
        crosses: CrossClassifier,
        digits: Option<DigitClassifier>,
    ) -> Result<Self, ExamError> {
        options.validate()?;
        if options.read_student_id && digits.is_none() {
            return Err(ExamError::MissingClassifier("digits"));
        }
        Ok(Engine {
            dimensions,
            options,
            crosses,
            digits,
            binarizer: Box::new(AdaptiveMean::default()),
            hough: Box::new(ImageprocHough::default()),
        })
    }

    pub fn with_hough(mut self, hough: Box<dyn HoughLines>) -> Self {
        self.hough = hough;
        self
    }

    pub fn with_binarizer(mut self, binarizer: Box<dyn Binarize>) -> Self {
        self.binarizer = binarizer;
        self
    }

    /// 按识别选项创建帧间状态，设置了固定霍夫阈值时只用它
    pub fn new_context(&self) -> DetectorContext {
        DetectorContext::from_options(&self.options)
    }

    /// 跨模块实现方法的时候访问不到成员变量，需要调用这些函数
    pub fn crosses(&self) -> &CrossClassifier {
        &self.crosses
    }

    pub fn digits(&self) -> Option<&DigitClassifier> {
        self.digits.as_ref()
    }

    pub fn dimensions(&self) -> &ExamDimensions {
        &self.dimensions
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    /// 原图先翻转再二值化，已处理过的图直接使用
    pub fn process_frame(&self, transformer: ImageTransformer, frame: &Frame) -> ProcessedImages {
        match frame {
            Frame::Raw(img) => {
                let img = transformer.transform(img.clone());
                let gray = to_gray(&img);
                ProcessedImages {
                    raw: img.to_rgb8(),
                    proc: self.binarizer.binarize(&gray),
                }
            }
            Frame::Processed(gray) => ProcessedImages {
                raw: gray_to_rgb(gray),
                proc: gray.clone(),
            },
        }
    }

    /// 识别一帧，中途出错时记为失败，不会向上传递
    pub fn detect(&self, ctx: &mut DetectorContext, frame: &Frame) -> DetectionOutput {
        let images = self.process_frame(ctx.image_transformer(), frame);
        let mut status = DetectionStatus::default();
        match self.try_detect(ctx, &images, &mut status) {
            Ok(output) => output,
            Err(e) => {
                status.cells = false;
                status.infobits = false;
                ctx.notify_failure();
                self.report_fault(ctx.hough_threshold(), &e, &images);
                DetectionOutput {
                    decisions: ExamDecisions::new(false, Vec::new(), None, None, None, self.options.survey_mode),
                    status,
                    capture: ExamCapture {
                        image: self.image_to_show(&images),
                        progress: status.progress(&self.options),
                        ..Default::default()
                    },
                }
            }
        }
    }

    fn try_detect(
        &self,
        ctx: &mut DetectorContext,
        images: &ProcessedImages,
        status: &mut DetectionStatus,
    ) -> anyhow::Result<DetectionOutput> {
        let (width, height) = (images.width(), images.height());
        let mut geometry = DebugGeometry::default();
        let mut answers = Vec::new();
        let mut answer_cells = Vec::new();
        let mut bits = None;
        let mut detected_id = None;
        let mut id_scores = None;
        let mut success = false;

        geometry.lines = detect_lines(self.hough.as_ref(), &images.proc, ctx.hough_threshold());
        let axes = if geometry.lines.len() >= 2 {
            status.lines = true;
            detect_boxes(&geometry.lines, &self.dimensions)
        } else {
            None
        };
        match axes {
            None => ctx.next_hough_threshold(),
            Some(axes) => {
                status.boxes = true;
                geometry.axes = filter_axes(&axes, width, height);
                geometry.corner_matrixes =
                    cell_corners(&geometry.axes[1].lines, &geometry.axes[0].lines, width, height, &self.dimensions);
                if !geometry.corner_matrixes.is_empty() {
                    status.cells = true;
                    answer_cells = answer_cells_geometry(
                        &geometry.corner_matrixes,
                        &self.dimensions,
                        self.options.left_to_right_numbering,
                    );
                    answers = self.decide_cells(&images.proc, &answer_cells)?;
                    if self.options.decode_model_bits {
                        bits = read_infobits(&images.proc, &geometry.corner_matrixes);
                        status.infobits = bits.is_some();
                        success = bits.is_some();
                    } else {
                        success = true;
                    }
                    if success && self.options.read_student_id {
                        let (id_hlines, id_cells) = id_boxes_geometry(
                            &images.proc,
                            self.options.id_digit_count,
                            &geometry.axes[1].lines,
                            &self.dimensions,
                        );
                        status.id_box_hlines = id_hlines.is_some();
                        geometry.id_hlines = id_hlines;
                        match id_cells {
                            Some(id_cells) => {
                                status.id_box = true;
                                let (id, scores) = self.detect_id(&images.proc, &id_cells)?;
                                detected_id = Some(id);
                                id_scores = Some(scores);
                                geometry.id_cells = id_cells;
                            }
                            None => success = false,
                        }
                    }
                }
            }
        }
        if success {
            ctx.notify_success();
        } else {
            ctx.notify_failure();
        }
        log::debug!("detect: threshold {} status {:?}", ctx.hough_threshold(), status.flags());

        let image = self.render(images, status, &geometry);
        Ok(DetectionOutput {
            decisions: ExamDecisions::new(success, answers, detected_id, id_scores, bits, self.options.survey_mode),
            status: *status,
            capture: ExamCapture {
                image,
                answer_cells,
                id_cells: geometry.id_cells,
                progress: status.progress(&self.options),
            },
        })
    }

    /// 用手动标注的每张表四个角点识别，不读学号
    pub fn detect_manual(&self, ctx: &DetectorContext, frame: &Frame, points: &[Point]) -> anyhow::Result<DetectionOutput> {
        let images = self.process_frame(ctx.image_transformer(), frame);
        let mut status = DetectionStatus::default();
        let mut answers = Vec::new();
        let mut answer_cells = Vec::new();
        let mut bits = None;
        let mut success = false;
        let corner_matrixes = process_box_corners(points, &self.dimensions);
        if !corner_matrixes.is_empty() {
            status.cells = true;
            answer_cells =
                answer_cells_geometry(&corner_matrixes, &self.dimensions, self.options.left_to_right_numbering);
            answers = self.decide_cells(&images.proc, &answer_cells)?;
            if self.options.decode_model_bits {
                bits = read_infobits(&images.proc, &corner_matrixes);
                status.infobits = bits.is_some();
                success = bits.is_some();
            } else {
                success = true;
            }
        }
        Ok(DetectionOutput {
            decisions: ExamDecisions::new(success, answers, None, None, bits, self.options.survey_mode),
            status,
            capture: ExamCapture {
                image: self.image_to_show(&images),
                answer_cells,
                id_cells: Vec::new(),
                progress: 1.0,
            },
        })
    }

    /// 只看当前阈值下能否找到两组直线，用来判断画面里有没有答题卡
    pub fn exam_detected(&self, ctx: &DetectorContext, frame: &Frame) -> bool {
        let images = self.process_frame(ctx.image_transformer(), frame);
        let lines = detect_lines(self.hough.as_ref(), &images.proc, ctx.hough_threshold());
        lines.len() >= 2 && detect_boxes(&lines, &self.dimensions).is_some()
    }

    fn report_fault(&self, hough_threshold: u32, error: &anyhow::Error, images: &ProcessedImages) {
        if !self.options.error_logging {
            log::debug!("detection fault: {error:#}");
            return;
        }
        if self.options.source_is_file {
            log::error!("detection fault: {error:?}");
            return;
        }
        match write_error_dump(&self.options.logging_dir, hough_threshold, error, &images.raw) {
            Ok(path) => log::error!("detection fault: {error:#}, frame saved to {}", path.display()),
            Err(dump_err) => log::error!("detection fault: {error:#}, cannot write dump: {dump_err:#}"),
        }
    }

    /// 打开任何显示选项时才生成调试图
    fn image_to_show(&self, images: &ProcessedImages) -> Option<RgbImage> {
        let options = &self.options;
        if options.show_image_proc {
            Some(gray_to_rgb(&images.proc))
        } else if options.show_lines || options.show_status {
            Some(images.raw.clone())
        } else {
            None
        }
    }

    fn render(&self, images: &ProcessedImages, status: &DetectionStatus, geometry: &DebugGeometry) -> Option<RgbImage> {
        let mut img = self.image_to_show(images)?;
        if self.options.show_lines {
            if status.cells {
                for &line in &geometry.axes[0].lines {
                    draw_line(&mut img, line, COLOR_VLINES);
                }
                for &line in &geometry.axes[1].lines {
                    draw_line(&mut img, line, COLOR_HLINES);
                }
                for point in geometry.corner_matrixes.iter().flatten().flatten() {
                    draw_point(&mut img, *point, COLOR_CORNERS);
                }
            } else if status.lines {
                for &line in &geometry.lines {
                    draw_line(&mut img, line, COLOR_VLINES);
                }
            }
            for &line in geometry.id_hlines.iter().flatten() {
                draw_line(&mut img, line, COLOR_ID_HLINES);
            }
            for cell in &geometry.id_cells {
                for corner in cell.corners() {
                    draw_point(&mut img, corner, COLOR_CORNERS);
                }
            }
        }
        if self.options.show_status {
            draw_status_flags(&mut img, &status.flags());
        }
        Some(img)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dimensions", &self.dimensions)
            .field("options", &self.options)
            .field("crosses", &self.crosses)
            .field("digits", &self.digits)
            .finish()
    }
}
