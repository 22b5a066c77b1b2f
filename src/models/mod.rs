//! 定义输入输出和公用结构体

pub mod scan_input;
pub mod rec_result;

/// 定义常用结构体
pub mod card{
    use serde::{Deserialize, Serialize};

    /// 像素坐标，按(x, y)排序
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct Point{
        pub x: i32, // 引擎所有坐标点均使用i32
        pub y: i32,
    }

    impl Point {
        pub fn new(x: i32, y: i32) -> Self {
            Point { x, y }
        }
    }

    impl From<(i32, i32)> for Point {
        fn from(p: (i32, i32)) -> Self {
            Point { x: p.0, y: p.1 }
        }
    }

    /// 霍夫直线，x*cos(theta) + y*sin(theta) = rho，theta为弧度
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
    pub struct Line{
        pub rho: f64,
        pub theta: f64,
    }

    impl Line {
        pub fn new(rho: f64, theta: f64) -> Self {
            Line { rho, theta }
        }
    }

    /// 同一方向的一组直线，theta为平均角度，lines按|rho|排序
    #[derive(Debug, Clone, PartialEq)]
    pub struct Axis{
        pub theta: f64,
        pub lines: Vec<Line>,
    }

    /// 一张答题表的角点矩阵，(题数+1) x (选项数+1)
    pub type CornerMatrix = Vec<Vec<Point>>;
}

/// 定义引擎各种识别方法所需的结构体
pub mod engine_rec{
    use image::{GrayImage, RgbImage};

    /// 识别需要用到的各种图片
    #[derive(Clone)]
    pub struct ProcessedImages{
        /// 原始rgb图，出错时保存、调试时绘制
        pub raw: RgbImage,
        /// 二值图，墨迹为255
        pub proc: GrayImage,
    }

    impl ProcessedImages {
        pub fn width(&self) -> u32 {
            self.raw.width()
        }

        pub fn height(&self) -> u32 {
            self.raw.height()
        }
    }
}
