//! [`crate::kernels`] 中设备源码的主机实现。

use super::{HostKernel, Launch};
use crate::Status;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;

const PARAMS: [i32; 9] = [1, 8, 28, 56, 70, 56, 28, 8, 1];
const DENOM: f32 = 65536.;

/// `vec_calc` 的逐元素公式。
pub fn vec_calc_element(a: f32, b: f32) -> f32 {
    let term = a.sin() * b.cos();
    let sgn = ((0. < term) as i32 - (term < 0.) as i32) as f32;
    (term + sgn * a.cos() * b.sin()).exp()
}

pub fn vec_calc() -> HostKernel {
    HostKernel::new(3, |launch: &Launch| {
        let &[n] = launch.global() else {
            return Err(Status::INVALID_WORK_DIMENSION);
        };
        let a = launch.read::<f32>(0)?;
        let b = launch.read::<f32>(1)?;
        if a.len() < n || b.len() < n {
            return Err(Status::OUT_OF_RESOURCES);
        }
        let c = (0..n)
            .into_par_iter()
            .map(|i| vec_calc_element(a[i], b[i]))
            .collect::<Vec<_>>();
        launch.write(2, &c)
    })
}

/// `gaussian_blur` 在 `(x, y)` 处的卷积结果。
pub fn blur_pixel(img: &[u8], width: usize, height: usize, x: usize, y: usize) -> u8 {
    let mut acc = 0f32;
    for (dy, wy) in PARAMS.iter().enumerate() {
        let sy = (y + dy).saturating_sub(4).min(height - 1);
        for (dx, wx) in PARAMS.iter().enumerate() {
            let sx = (x + dx).saturating_sub(4).min(width - 1);
            acc += (wx * wy) as f32 / DENOM * img[sy * width + sx] as f32;
        }
    }
    acc as u8
}

pub fn gaussian_blur() -> HostKernel {
    HostKernel::new(4, |launch: &Launch| {
        let &[gx, gy] = launch.global() else {
            return Err(Status::INVALID_WORK_DIMENSION);
        };
        let width = launch.scalar::<i32>(2)?;
        let height = launch.scalar::<i32>(3)?;
        if width <= 0 || height <= 0 {
            return Err(Status::INVALID_ARG_VALUE);
        }
        let (width, height) = (width as usize, height as usize);

        let img = launch.read::<u8>(0)?;
        if img.len() < width * height {
            return Err(Status::OUT_OF_RESOURCES);
        }
        // 超出图像的工作项直接返回，与设备源码一致
        let (cols, rows) = (gx.min(width), gy.min(height));
        launch.modify(1, |out| {
            if out.len() < width * height {
                return Err(Status::OUT_OF_RESOURCES);
            }
            out[..width * height]
                .par_chunks_mut(width)
                .enumerate()
                .take(rows)
                .for_each(|(y, row)| {
                    for (x, px) in row.iter_mut().enumerate().take(cols) {
                        *px = blur_pixel(&img, width, height, x, y)
                    }
                });
            Ok(())
        })?
    })
}

#[cfg(test)]
mod test {
    use super::{blur_pixel, vec_calc_element};

    #[test]
    fn test_vec_calc_element() {
        // t = 0 时 sgn 为 0
        assert_eq!(vec_calc_element(0., 0.), 1.);
        let (a, b) = (1.0f32, 0.5f32);
        let t = a.sin() * b.cos();
        let expected = (t + a.cos() * b.sin()).exp();
        assert!((vec_calc_element(a, b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_blur_uniform() {
        let img = vec![200u8; 16 * 9];
        for y in 0..9 {
            for x in 0..16 {
                assert_eq!(blur_pixel(&img, 16, 9, x, y), 200)
            }
        }
    }

    #[test]
    fn test_blur_impulse() {
        let (w, h) = (21, 21);
        let mut img = vec![0u8; w * h];
        img[10 * w + 10] = 255;
        // 中心权重 70·70/65536
        assert_eq!(blur_pixel(&img, w, h, 10, 10), (255. * 4900. / 65536.) as u8);
        assert_eq!(blur_pixel(&img, w, h, 0, 0), 0);
    }
}
