//! 识别流程：直线检测、网格重建、格子判断、学号框定位和整帧调度

pub mod backend;
pub mod lines;
pub mod boxes;
pub mod manual;
pub mod infobits;
pub mod classifier;
pub mod vx;
pub mod numbers;
pub mod black_fill;
pub mod id_box;
pub mod context;
pub mod engine;
