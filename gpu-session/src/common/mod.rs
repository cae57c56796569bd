mod error;
mod status;
mod table;

pub use error::{functions::*, SessionError, SessionErrorKind, SetupError, SetupErrorKind};
pub use status::Status;
pub use table::{BufferKey, KernelId};

pub(crate) use table::SlotTable;

pub mod utils {
    /// 一维发射使用的工作组大小。
    ///
    /// 从 `preferred` 向下搜索第一个整除 `total` 的值，1 总能整除。
    /// `preferred` 为 0 时按 1 处理。
    pub const fn local_size(total: usize, preferred: usize) -> usize {
        let mut local = if preferred == 0 { 1 } else { preferred };
        while local != 1 {
            if total % local == 0 {
                break;
            }
            local -= 1;
        }
        local
    }

    #[test]
    fn test_local_size() {
        assert_eq!(local_size(64_000_000, 100), 100);
        assert_eq!(local_size(97, 10), 1);
        assert_eq!(local_size(100, 64), 50);
        assert_eq!(local_size(10, 100), 10);
        assert_eq!(local_size(12, 0), 1);
        assert_eq!(local_size(1, 1), 1);

        for total in 1..200 {
            for preferred in 1..40 {
                let local = local_size(total, preferred);
                assert!(local <= preferred);
                assert_eq!(total % local, 0);
                if total % preferred == 0 {
                    assert_eq!(local, preferred)
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod test_utils {
    use std::fmt;

    pub struct Diff {
        pub abs: f64,
        pub rel: f64,
    }

    impl Diff {
        pub fn new(a: f64, b: f64) -> Self {
            let abs = (a - b).abs();
            let rel = abs / (a.abs() + b.abs() + f64::EPSILON);
            Self { abs, rel }
        }
    }

    pub struct ErrorCollector {
        threshold: Diff,
        max_diff: Diff,
        outliers: Vec<usize>,
        count: usize,
    }

    impl ErrorCollector {
        pub fn new(abs: f64, rel: f64) -> Self {
            Self {
                threshold: Diff { abs, rel },
                max_diff: Diff { abs: 0., rel: 0. },
                outliers: vec![],
                count: 0,
            }
        }

        pub fn push(&mut self, diff: Diff) {
            self.max_diff.abs = f64::max(self.max_diff.abs, diff.abs);
            self.max_diff.rel = f64::max(self.max_diff.rel, diff.rel);

            if diff.abs > self.threshold.abs && diff.rel > self.threshold.rel {
                self.outliers.push(self.count);
            }

            self.count += 1;
        }

        pub fn summary(self) -> (usize, usize) {
            (self.outliers.len(), self.count)
        }

        pub fn outliers(&self) -> &[usize] {
            &self.outliers
        }
    }

    impl fmt::Display for ErrorCollector {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(
                f,
                "abs: {:.3e}, rel: {:.3e}, outliers: {}/{}",
                self.max_diff.abs,
                self.max_diff.rel,
                self.outliers.len(),
                self.count,
            )
        }
    }

    /// 写到临时目录的设备源码文件，析构时删除。
    pub struct SourceFile(pub std::path::PathBuf);

    impl SourceFile {
        pub fn new(tag: &str, src: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "gpu-session-{}-{tag}.cl",
                std::process::id()
            ));
            std::fs::write(&path, src).unwrap();
            Self(path)
        }
    }

    impl Drop for SourceFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}
