// #![deny(warnings)]

mod common;
mod handle;
mod info;
pub mod kernels;
mod select;
mod session;

pub use common::*;
pub use info::{platform_summaries, PlatformSummary};
pub use select::{pick_most_compute_units, select_device, Selected};
pub use session::{Session, SessionConfig};

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

#[cfg(use_cl)]
pub use handle::opencl;
#[cfg(use_cl)]
pub extern crate clrt;

pub extern crate bytemuck;

/// 缓冲区的访问方式，以内核视角描述。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// 可查询的平台信息字段。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PlatformParam {
    Profile,
    Version,
    Vendor,
    Extensions,
}

impl PlatformParam {
    pub const ALL: [Self; 4] = [Self::Profile, Self::Version, Self::Vendor, Self::Extensions];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Profile => "CL_PLATFORM_PROFILE",
            Self::Version => "CL_PLATFORM_VERSION",
            Self::Vendor => "CL_PLATFORM_VENDOR",
            Self::Extensions => "CL_PLATFORM_EXTENSIONS",
        }
    }
}

/// 设备选择关心的设备属性。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor_id: u32,
    pub max_compute_units: u32,
}

/// 程序构建失败。
#[derive(Clone, Debug)]
pub enum BuildError {
    /// 编译器拒绝了源码，附带构建日志。
    BuildFailed(String),
    /// 其他驱动错误。
    Others(Status),
}

/// 计算设备驱动抽象。
///
/// 约定如何枚举设备、管理资源和提交任务。
/// 所有句柄类型独占其背后的驱动资源，在析构时释放。
pub trait Driver {
    type Platform;
    type Device;
    type Context;
    /// 顺序执行的命令队列。
    type Queue;
    type Program;
    type Kernel;
    type Mem;

    fn platforms(&self) -> Result<Vec<Self::Platform>, Status>;
    fn platform_info(&self, platform: &Self::Platform, param: PlatformParam)
        -> Result<String, Status>;

    /// 平台上的 GPU 类设备。没有设备时驱动可以返回空表或 `DEVICE_NOT_FOUND`。
    fn gpu_devices(&self, platform: &Self::Platform) -> Result<Vec<Self::Device>, Status>;
    fn device_info(&self, device: &Self::Device) -> Result<DeviceInfo, Status>;

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, Status>;
    fn create_queue(&self, ctx: &Self::Context, device: &Self::Device)
        -> Result<Self::Queue, Status>;

    fn build_program(
        &self,
        ctx: &Self::Context,
        device: &Self::Device,
        src: &str,
        options: &str,
    ) -> Result<Self::Program, BuildError>;
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, Status>;

    fn create_buffer(
        &self,
        ctx: &Self::Context,
        mode: AccessMode,
        size: usize,
    ) -> Result<Self::Mem, Status>;

    /// 阻塞式写入，从缓冲区起点开始写 `src.len()` 字节。
    fn write_buffer(&self, queue: &Self::Queue, mem: &mut Self::Mem, src: &[u8])
        -> Result<(), Status>;
    /// 阻塞式读出，从缓冲区起点开始读 `dst.len()` 字节。
    fn read_buffer(&self, queue: &Self::Queue, mem: &mut Self::Mem, dst: &mut [u8])
        -> Result<(), Status>;

    fn set_arg_mem(&self, kernel: &mut Self::Kernel, index: u32, mem: &Self::Mem)
        -> Result<(), Status>;
    fn set_arg_bytes(&self, kernel: &mut Self::Kernel, index: u32, value: &[u8])
        -> Result<(), Status>;

    /// 发射内核，`global` 的长度即工作维度，`local` 为 [None] 时由驱动决定分组。
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &mut Self::Kernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<(), Status>;

    fn finish(&self, queue: &Self::Queue) -> Result<(), Status>;
}
