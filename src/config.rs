use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// 图片预处理参数，局部均值自适应二值化
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageProcess {
    pub adaptive_block_size: u32,
    pub adaptive_offset: f64,
}

/// 直线检测参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LineDetect {
    /// 霍夫投票阈值，检测失败时依次轮换
    pub hough_thresholds: Vec<u32>,
    pub suppression_radius: u32,
    /// 超过这个数量说明阈值太低，全是噪声
    pub max_raw_lines: usize,
    pub directions_threshold: f64,
}

/// 网格重建参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoxReconstruct {
    /// 贴近图片边缘的直线比例
    pub border_margin: f64,
    /// 小于该间距的相邻直线合并
    pub collapse_max_gap: f64,
    pub corners_tolerance_mul: f64,
}

/// 试卷模型点阵参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfoBits {
    pub mask_threshold: f64,
    pub mask_radius_multiplier: f64,
    pub dot_offset_divisor: f64,
}

/// 勾叉识别参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrossMask {
    /// 样本对角线收缩比例
    pub sample_ratio: f64,
    pub thickness: f64,
    pub margin: f64,
    pub margin_2: f64,
    pub cell_margin: f64,
    pub threshold: f64,
    pub clear_out_threshold: f64,
    pub clear_in_threshold: f64,
}

/// 学号框定位参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdBox {
    pub min_energy: f64,
    pub mean_energy: f64,
    pub energy_break: f64,
    pub discard_distance: f64,
    pub x_var: i32,
    pub rho_var: i32,
    pub bounds_rho_var: i32,
    pub max_bounds_tried: usize,
}

/// 帧间状态和错误记录参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Detector {
    pub failures_threshold: u32,
    pub error_log: String,
    pub error_image_prefix: String,
}

/// 配置参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub image_process: ImageProcess,
    pub line_detect: LineDetect,
    pub box_reconstruct: BoxReconstruct,
    pub infobits: InfoBits,
    pub cross_mask: CrossMask,
    pub id_box: IdBox,
    pub detector: Detector,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            image_process: ImageProcess {
                adaptive_block_size: 45,
                adaptive_offset: 4.0,
            },
            line_detect: LineDetect {
                hough_thresholds: vec![280, 260, 240, 225, 210, 195, 180, 160, 140, 120],
                suppression_radius: 2,
                max_raw_lines: 500,
                directions_threshold: 0.4,
            },
            box_reconstruct: BoxReconstruct {
                border_margin: 0.03,
                collapse_max_gap: 7.0,
                corners_tolerance_mul: 6.0,
            },
            infobits: InfoBits {
                mask_threshold: 0.25,
                mask_radius_multiplier: 0.333,
                dot_offset_divisor: 2.6,
            },
            cross_mask: CrossMask {
                sample_ratio: 0.8,
                thickness: 0.2,
                margin: 0.6,
                margin_2: 0.75,
                cell_margin: 0.9,
                threshold: 0.08,
                clear_out_threshold: 0.35,
                clear_in_threshold: 0.2,
            },
            id_box: IdBox {
                min_energy: 0.5,
                mean_energy: 0.75,
                energy_break: 0.99,
                discard_distance: 20.0,
                x_var: 10,
                rho_var: 5,
                bounds_rho_var: 5,
                max_bounds_tried: 5,
            },
            detector: Detector {
                failures_threshold: 10,
                error_log: "exam-errors.log".to_string(),
                error_image_prefix: "error-".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Config> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }
}

// 全局配置单例，调试模式读取config.yaml方便调参
#[cfg(debug_assertions)]
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    match Config::from_yaml_file("config.yaml") {
        Ok(config) => config,
        Err(e) => {
            log::warn!("config.yaml not loaded ({e}), using built-in parameters");
            Config::default()
        }
    }
});

#[cfg(not(debug_assertions))]
pub static CONFIG: Lazy<Config> = Lazy::new(Config::default);
