//! 从文件识别一张答题卡

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use exam_recognize::models::scan_input::{DetectionOptions, ExamDimensions, Frame};
use exam_recognize::recognition::engine::Engine;
use exam_recognize::recognition::numbers::DigitClassifier;
use exam_recognize::recognition::vx::CrossClassifier;

#[derive(Parser, Debug)]
#[command(version, about = "Process a single answer sheet image from file")]
struct Args {
    /// 答题表格式，例如"3,5;3,5"
    dimensions: String,

    image: PathBuf,

    #[arg(short = 't', long, default_value_t = 200)]
    hough_threshold: u32,

    /// 画出检测到的直线并保存到这个文件
    #[arg(short = 'l', long)]
    draw_lines_to: Option<PathBuf>,

    /// 保存二值化后的图
    #[arg(short = 'p', long)]
    save_image_proc_to: Option<PathBuf>,

    /// 学号位数，0为不读学号
    #[arg(short = 'i', long, default_value_t = 0)]
    id_num_digits: usize,

    /// 勾叉SVM模型，不给时用掩膜判断
    #[arg(long)]
    cross_model: Option<PathBuf>,

    #[arg(long)]
    digit_model: Option<PathBuf>,

    #[arg(long, requires = "digit_model")]
    confusion_matrix: Option<PathBuf>,

    /// 从json或yaml文件读取识别选项，命令行参数覆盖其中的对应项
    #[arg(long)]
    options: Option<PathBuf>,

    #[arg(long)]
    no_infobits: bool,

    /// 问卷模式，接受全零的模型点阵
    #[arg(long)]
    survey: bool,

    /// 识别结果以json写到这个文件
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    simple_log::quick!();
    let args = Args::parse();

    let mut options = match &args.options {
        Some(path) => DetectionOptions::from_file(path)?,
        None => DetectionOptions::default(),
    };
    options.source_is_file = true;
    options.fixed_hough_threshold = Some(args.hough_threshold);
    options.show_lines |= args.draw_lines_to.is_some();
    options.show_status |= args.draw_lines_to.is_some();
    if args.id_num_digits > 0 {
        options.read_student_id = true;
        options.id_digit_count = args.id_num_digits;
    }
    if args.no_infobits {
        options.decode_model_bits = false;
    }
    options.survey_mode |= args.survey;

    let dimensions = ExamDimensions::parse(&args.dimensions, false)?;
    let crosses = match &args.cross_model {
        Some(path) => CrossClassifier::load(path)?,
        None => {
            log::warn!("no cross model given, using the mask classifier");
            CrossClassifier::mask()
        }
    };
    let digits = match &args.digit_model {
        Some(path) => Some(DigitClassifier::load(path, args.confusion_matrix.as_deref())?),
        None => None,
    };
    let engine = Engine::new(dimensions, options, crosses, digits)?;
    let mut ctx = engine.new_context();

    let frame = Frame::load(&args.image, false)?;
    let output = engine.detect(&mut ctx, &frame);
    if output.decisions.success {
        println!("Detection succeeded :)");
    } else {
        println!("Detection failed :(");
    }
    println!("status: {:?}", output.status);
    println!("answers: {:?}", output.decisions.answers);
    if let Some(model) = output.decisions.model {
        println!("model: {model}");
    }
    if let Some(id) = &output.decisions.detected_id {
        println!("student id: {id}");
    }

    if let (Some(path), Some(img)) = (&args.draw_lines_to, &output.capture.image) {
        img.save(path).with_context(|| format!("cannot save {}", path.display()))?;
    }
    if let Some(path) = &args.save_image_proc_to {
        let images = engine.process_frame(ctx.image_transformer(), &frame);
        images.proc.save(path).with_context(|| format!("cannot save {}", path.display()))?;
    }
    if let Some(path) = &args.output {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &output.decisions)?;
    }
    Ok(())
}
