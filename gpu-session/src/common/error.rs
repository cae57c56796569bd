use std::{error::Error, fmt};

/// 会话无法建立的原因。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SetupErrorKind {
    NoPlatform,
    NoGpuDevice,
    ContextCreation,
    QueueCreation,
    SourceUnreadable,
}

#[derive(Clone, Debug)]
pub struct SetupError {
    pub kind: SetupErrorKind,
    pub info: String,
}

/// 会话操作失败的原因。
///
/// 操作失败不会破坏会话，后续调用不受影响。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionErrorKind {
    NoProgram,
    SourceUnreadable,
    BuildFailed,
    KernelNotFound,
    BufferNotFound,
    DeviceOperationFailed,
}

#[derive(Clone, Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub info: String,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl Error for SetupError {}
impl Error for SessionError {}

pub(super) mod functions {
    use super::{SessionError, SessionErrorKind as Session, SetupError, SetupErrorKind as Setup};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(SetupError: no_platform       Setup::NoPlatform      );
    builder!(SetupError: no_gpu_device     Setup::NoGpuDevice     );
    builder!(SetupError: context_failed    Setup::ContextCreation );
    builder!(SetupError: queue_failed      Setup::QueueCreation   );
    builder!(SetupError: source_missing    Setup::SourceUnreadable);

    builder!(SessionError: no_program        Session::NoProgram            );
    builder!(SessionError: source_unreadable Session::SourceUnreadable     );
    builder!(SessionError: build_failed      Session::BuildFailed          );
    builder!(SessionError: kernel_not_found  Session::KernelNotFound       );
    builder!(SessionError: buffer_not_found  Session::BufferNotFound       );
    builder!(SessionError: device_failed     Session::DeviceOperationFailed);
}

#[test]
fn test_display() {
    use functions::*;

    let e = buffer_not_found("buffer #3 is empty");
    assert_eq!(e.kind, SessionErrorKind::BufferNotFound);
    assert_eq!(e.to_string(), "BufferNotFound: buffer #3 is empty");

    let e = no_gpu_device("2 platform(s) searched");
    assert_eq!(e.kind, SetupErrorKind::NoGpuDevice);
    println!("{e}");

    // 两种错误都有源码不可读的情形，各自落在自己的类型里
    let e = source_missing("a.cl");
    assert_eq!(e.kind, SetupErrorKind::SourceUnreadable);
    assert_eq!(e.to_string(), "SourceUnreadable: a.cl");
    let e = source_unreadable("b.cl");
    assert_eq!(e.kind, SessionErrorKind::SourceUnreadable);
}
