//! 几何计算、图片处理和文件读写工具

pub mod image;
pub mod io;
pub mod math;
