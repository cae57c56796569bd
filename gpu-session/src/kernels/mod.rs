//! 基准程序使用的设备源码。

/// `vec_calc(a, b, c)`：`c = exp(t + sgn(t)·cos(a)·sin(b))`，其中 `t = sin(a)·cos(b)`。
pub const VEC_CALC: &str = include_str!("vec_calc.cl");

/// `gaussian_blur(in, out, width, height)`：8 位灰度图的 9×9 二项式高斯模糊，边缘钳位。
pub const GAUSSIAN_BLUR: &str = include_str!("gaussian_blur.cl");
