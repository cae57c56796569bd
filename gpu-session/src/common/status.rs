use std::fmt;

/// 驱动返回的原始错误码。
///
/// 数值与 OpenCL 的 `cl_int` 错误码一致，主机模拟后端也使用同一套编码。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

macro_rules! codes {
    ($($name:ident = $val:literal;)*) => {
        impl Status {
            $(pub const $name: Self = Self($val);)*

            /// 错误码对应的 OpenCL 名字，未知错误码返回 [None]。
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($val => Some(concat!("CL_", stringify!($name))),)*
                    _ => None,
                }
            }
        }
    };
}

codes! {
    SUCCESS                      =    0;
    DEVICE_NOT_FOUND             =   -1;
    MEM_OBJECT_ALLOCATION_FAILURE =  -4;
    OUT_OF_RESOURCES             =   -5;
    OUT_OF_HOST_MEMORY           =   -6;
    BUILD_PROGRAM_FAILURE        =  -11;
    INVALID_VALUE                =  -30;
    INVALID_PLATFORM             =  -32;
    INVALID_DEVICE               =  -33;
    INVALID_CONTEXT              =  -34;
    INVALID_COMMAND_QUEUE        =  -36;
    INVALID_MEM_OBJECT           =  -38;
    INVALID_BUILD_OPTIONS        =  -43;
    INVALID_PROGRAM              =  -44;
    INVALID_PROGRAM_EXECUTABLE   =  -45;
    INVALID_KERNEL_NAME          =  -46;
    INVALID_KERNEL               =  -48;
    INVALID_ARG_INDEX            =  -49;
    INVALID_ARG_VALUE            =  -50;
    INVALID_ARG_SIZE             =  -51;
    INVALID_KERNEL_ARGS          =  -52;
    INVALID_WORK_DIMENSION       =  -53;
    INVALID_WORK_GROUP_SIZE      =  -54;
    INVALID_OPERATION            =  -59;
    INVALID_BUFFER_SIZE          =  -61;
    INVALID_GLOBAL_WORK_SIZE     =  -63;
    PLATFORM_NOT_FOUND_KHR       = -1001;
}

impl Status {
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "cl_int({})", self.0),
        }
    }
}

#[test]
fn test_name() {
    assert_eq!(Status::INVALID_KERNEL_NAME.name(), Some("CL_INVALID_KERNEL_NAME"));
    assert_eq!(Status(-46), Status::INVALID_KERNEL_NAME);
    assert_eq!(Status(-9999).name(), None);
    assert_eq!(Status::INVALID_WORK_GROUP_SIZE.to_string(), "CL_INVALID_WORK_GROUP_SIZE(-54)");
    assert!(Status::SUCCESS.is_success());
}
