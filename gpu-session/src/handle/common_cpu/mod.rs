//! 在主机内存中模拟的设备驱动。
//!
//! 作为参考后端和测试环境：拓扑、平台信息和故障都可以配置，
//! 驱动规则按 OpenCL 的错误码检查，并对存活的资源计数。

mod compile;
mod kernels;
mod launch;

use crate::{AccessMode, BuildError, DeviceInfo, Driver, PlatformParam, Status};
use launch::Bound;
use log::debug;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, RwLock, Weak,
    },
};

pub use kernels::{blur_pixel, gaussian_blur, vec_calc, vec_calc_element};
pub use launch::{HostKernel, Launch};

/// 主机模拟驱动。克隆得到的驱动共享同一套配置和资源计数。
#[derive(Clone)]
pub struct Cpu(Arc<Inner>);

struct Inner {
    platforms: Vec<CpuPlatform>,
    kernels: HashMap<String, HostKernel>,
    counters: Arc<Counters>,
}

#[derive(Clone, Debug)]
pub struct CpuPlatform {
    profile: Option<String>,
    version: Option<String>,
    vendor: Option<String>,
    extensions: Option<String>,
    devices: Vec<CpuDevice>,
}

#[derive(Clone, Debug)]
pub struct CpuDevice {
    name: String,
    vendor_id: u32,
    compute_units: u32,
    max_group_size: usize,
    faults: Vec<Fault>,
}

/// 注入到设备上的故障。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    DeviceInfo,
    Context,
    Queue,
}

/// 存活的驱动资源数量。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Live {
    pub contexts: usize,
    pub queues: usize,
    pub programs: usize,
    pub kernels: usize,
    pub buffers: usize,
}

impl Live {
    #[inline]
    pub fn total(&self) -> usize {
        self.contexts + self.queues + self.programs + self.kernels + self.buffers
    }
}

#[derive(Default)]
struct Counters([AtomicUsize; 5]);

#[derive(Clone, Copy)]
enum Resource {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

/// 计数守卫，析构时归还计数。
struct Tracked(Arc<Counters>, Resource);

impl Tracked {
    fn new(counters: &Arc<Counters>, res: Resource) -> Self {
        counters.0[res as usize].fetch_add(1, Relaxed);
        Self(counters.clone(), res)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0 .0[self.1 as usize].fetch_sub(1, Relaxed);
    }
}

pub struct CpuContext {
    _tracked: Tracked,
}

pub struct CpuQueue {
    max_group_size: usize,
    _tracked: Tracked,
}

pub struct CpuProgram(Arc<ProgramInner>);

struct ProgramInner {
    entries: HashMap<String, HostKernel>,
    _tracked: Tracked,
}

pub struct CpuKernel {
    name: String,
    host: HostKernel,
    args: Vec<Option<Arg>>,
    _program: Arc<ProgramInner>,
    _tracked: Tracked,
}

enum Arg {
    Mem(Weak<MemInner>),
    Bytes(Vec<u8>),
}

pub struct CpuMem(Arc<MemInner>);

pub(crate) struct MemInner {
    mode: AccessMode,
    data: RwLock<Vec<u8>>,
    _tracked: Tracked,
}

impl CpuMem {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.data.read().map_or(0, |data| data.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CpuPlatform {
    pub fn new(vendor: &str) -> Self {
        Self {
            profile: Some("FULL_PROFILE".into()),
            version: Some("OpenCL 1.2 common-cpu".into()),
            vendor: Some(vendor.into()),
            extensions: Some("cl_khr_fp64 cl_khr_byte_addressable_store".into()),
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, device: CpuDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn profile(mut self, value: Option<&str>) -> Self {
        self.profile = value.map(Into::into);
        self
    }

    pub fn version(mut self, value: Option<&str>) -> Self {
        self.version = value.map(Into::into);
        self
    }

    pub fn vendor(mut self, value: Option<&str>) -> Self {
        self.vendor = value.map(Into::into);
        self
    }

    pub fn extensions(mut self, value: Option<&str>) -> Self {
        self.extensions = value.map(Into::into);
        self
    }
}

impl CpuDevice {
    pub fn new(name: &str, compute_units: u32) -> Self {
        Self {
            name: name.into(),
            vendor_id: 0,
            compute_units,
            max_group_size: 1024,
            faults: Vec::new(),
        }
    }

    pub fn vendor_id(mut self, id: u32) -> Self {
        self.vendor_id = id;
        self
    }

    pub fn max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = size;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    #[inline]
    fn faulty(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }
}

#[derive(Default)]
pub struct CpuBuilder {
    platforms: Vec<CpuPlatform>,
    kernels: HashMap<String, HostKernel>,
}

impl CpuBuilder {
    pub fn platform(mut self, platform: CpuPlatform) -> Self {
        self.platforms.push(platform);
        self
    }

    /// 注册内核的主机实现，源码中同名的入口函数将绑定到它。
    pub fn kernel(mut self, name: &str, kernel: HostKernel) -> Self {
        self.kernels.insert(name.into(), kernel);
        self
    }

    /// 注册 [`crate::kernels`] 中所有源码的主机实现。
    pub fn reference_kernels(self) -> Self {
        self.kernel("vec_calc", vec_calc())
            .kernel("gaussian_blur", gaussian_blur())
    }

    pub fn build(self) -> Cpu {
        Cpu(Arc::new(Inner {
            platforms: self.platforms,
            kernels: self.kernels,
            counters: Default::default(),
        }))
    }
}

impl Cpu {
    #[inline]
    pub fn builder() -> CpuBuilder {
        CpuBuilder::default()
    }

    /// 一个平台、一个设备、注册了参考内核的驱动。
    pub fn reference() -> Self {
        Self::builder()
            .platform(CpuPlatform::new("common-cpu").device(CpuDevice::new("host", 1)))
            .reference_kernels()
            .build()
    }

    pub fn live(&self) -> Live {
        let [contexts, queues, programs, kernels, buffers] =
            self.0.counters.0.each_ref().map(|c| c.load(Relaxed));
        Live {
            contexts,
            queues,
            programs,
            kernels,
            buffers,
        }
    }

    #[inline]
    fn track(&self, res: Resource) -> Tracked {
        Tracked::new(&self.0.counters, res)
    }
}

impl Driver for Cpu {
    type Platform = CpuPlatform;
    type Device = CpuDevice;
    type Context = CpuContext;
    type Queue = CpuQueue;
    type Program = CpuProgram;
    type Kernel = CpuKernel;
    type Mem = CpuMem;

    fn platforms(&self) -> Result<Vec<CpuPlatform>, Status> {
        // 与 ICD 加载器一致，没有平台时报告错误而不是返回空表
        if self.0.platforms.is_empty() {
            Err(Status::PLATFORM_NOT_FOUND_KHR)
        } else {
            Ok(self.0.platforms.clone())
        }
    }

    fn platform_info(&self, platform: &CpuPlatform, param: PlatformParam) -> Result<String, Status> {
        match param {
            PlatformParam::Profile => &platform.profile,
            PlatformParam::Version => &platform.version,
            PlatformParam::Vendor => &platform.vendor,
            PlatformParam::Extensions => &platform.extensions,
        }
        .clone()
        .ok_or(Status::INVALID_VALUE)
    }

    fn gpu_devices(&self, platform: &CpuPlatform) -> Result<Vec<CpuDevice>, Status> {
        if platform.devices.is_empty() {
            Err(Status::DEVICE_NOT_FOUND)
        } else {
            Ok(platform.devices.clone())
        }
    }

    fn device_info(&self, device: &CpuDevice) -> Result<DeviceInfo, Status> {
        if device.faulty(Fault::DeviceInfo) {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(DeviceInfo {
            name: device.name.clone(),
            vendor_id: device.vendor_id,
            max_compute_units: device.compute_units,
        })
    }

    fn create_context(&self, device: &CpuDevice) -> Result<CpuContext, Status> {
        if device.faulty(Fault::Context) {
            return Err(Status::OUT_OF_HOST_MEMORY);
        }
        Ok(CpuContext {
            _tracked: self.track(Resource::Context),
        })
    }

    fn create_queue(&self, _ctx: &CpuContext, device: &CpuDevice) -> Result<CpuQueue, Status> {
        if device.faulty(Fault::Queue) {
            return Err(Status::OUT_OF_RESOURCES);
        }
        Ok(CpuQueue {
            max_group_size: device.max_group_size,
            _tracked: self.track(Resource::Queue),
        })
    }

    fn build_program(
        &self,
        _ctx: &CpuContext,
        _device: &CpuDevice,
        src: &str,
        options: &str,
    ) -> Result<CpuProgram, BuildError> {
        const KNOWN: [&str; 5] = ["-D", "-I", "-cl-", "-w", "-Werror"];
        if options
            .split_whitespace()
            .any(|opt| !KNOWN.iter().any(|k| opt.starts_with(k)))
        {
            return Err(BuildError::Others(Status::INVALID_BUILD_OPTIONS));
        }

        let names = compile::entry_points(src).map_err(BuildError::BuildFailed)?;
        let mut entries = HashMap::new();
        let mut missing = Vec::new();
        for name in names {
            match self.0.kernels.get(&name) {
                Some(kernel) => {
                    entries.insert(name, kernel.clone());
                }
                None => missing.push(format!(
                    "<source>: error: no host implementation for kernel '{name}'"
                )),
            }
        }
        if !missing.is_empty() {
            return Err(BuildError::BuildFailed(missing.join("\n")));
        }

        debug!("common-cpu program built with {} kernel(s)", entries.len());
        Ok(CpuProgram(Arc::new(ProgramInner {
            entries,
            _tracked: self.track(Resource::Program),
        })))
    }

    fn create_kernel(&self, program: &CpuProgram, name: &str) -> Result<CpuKernel, Status> {
        let host = program
            .0
            .entries
            .get(name)
            .ok_or(Status::INVALID_KERNEL_NAME)?
            .clone();
        Ok(CpuKernel {
            name: name.into(),
            args: (0..host.arity).map(|_| None).collect(),
            host,
            _program: program.0.clone(),
            _tracked: self.track(Resource::Kernel),
        })
    }

    fn create_buffer(
        &self,
        _ctx: &CpuContext,
        mode: AccessMode,
        size: usize,
    ) -> Result<CpuMem, Status> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        Ok(CpuMem(Arc::new(MemInner {
            mode,
            data: RwLock::new(vec![0; size]),
            _tracked: self.track(Resource::Buffer),
        })))
    }

    fn write_buffer(&self, _queue: &CpuQueue, mem: &mut CpuMem, src: &[u8]) -> Result<(), Status> {
        let mut data = mem.0.data.write().map_err(|_| Status::OUT_OF_RESOURCES)?;
        if src.len() > data.len() {
            return Err(Status::INVALID_VALUE);
        }
        data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn read_buffer(&self, _queue: &CpuQueue, mem: &mut CpuMem, dst: &mut [u8]) -> Result<(), Status> {
        let data = mem.0.data.read().map_err(|_| Status::OUT_OF_RESOURCES)?;
        if dst.len() > data.len() {
            return Err(Status::INVALID_VALUE);
        }
        dst.copy_from_slice(&data[..dst.len()]);
        Ok(())
    }

    fn set_arg_mem(&self, kernel: &mut CpuKernel, index: u32, mem: &CpuMem) -> Result<(), Status> {
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        *slot = Some(Arg::Mem(Arc::downgrade(&mem.0)));
        Ok(())
    }

    fn set_arg_bytes(
        &self,
        kernel: &mut CpuKernel,
        index: u32,
        value: &[u8],
    ) -> Result<(), Status> {
        if value.is_empty() {
            return Err(Status::INVALID_ARG_SIZE);
        }
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        *slot = Some(Arg::Bytes(value.to_vec()));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &CpuQueue,
        kernel: &mut CpuKernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<(), Status> {
        if !(1..=3).contains(&global.len()) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        if global.contains(&0) {
            return Err(Status::INVALID_GLOBAL_WORK_SIZE);
        }
        let ones = [1; 3];
        let local = match local {
            Some(local) => {
                if local.len() != global.len()
                    || local.iter().zip(global).any(|(&l, &g)| l == 0 || g % l != 0)
                    || local.iter().product::<usize>() > queue.max_group_size
                {
                    return Err(Status::INVALID_WORK_GROUP_SIZE);
                }
                local
            }
            None => &ones[..global.len()],
        };

        let args = kernel
            .args
            .iter()
            .map(|arg| match arg {
                Some(Arg::Mem(mem)) => mem.upgrade().map(Bound::Mem).ok_or(Status::INVALID_MEM_OBJECT),
                Some(Arg::Bytes(bytes)) => Ok(Bound::Bytes(bytes)),
                None => Err(Status::INVALID_KERNEL_ARGS),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "common-cpu launch {}: global {global:?}, local {local:?}",
            kernel.name
        );
        (kernel.host.func)(&Launch {
            global,
            local,
            args,
        })
    }

    fn finish(&self, _queue: &CpuQueue) -> Result<(), Status> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Cpu, CpuDevice, CpuPlatform, Live};
    use crate::{AccessMode, BuildError, Driver, Status};

    fn setup() -> (Cpu, CpuDevice) {
        let cpu = Cpu::builder()
            .platform(CpuPlatform::new("test").device(CpuDevice::new("dev", 4).max_group_size(64)))
            .reference_kernels()
            .build();
        let device = cpu.gpu_devices(&cpu.platforms().unwrap()[0]).unwrap().remove(0);
        (cpu, device)
    }

    #[test]
    fn test_accounting() {
        let (cpu, device) = setup();
        {
            let ctx = cpu.create_context(&device).unwrap();
            let _queue = cpu.create_queue(&ctx, &device).unwrap();
            let program = cpu
                .build_program(&ctx, &device, crate::kernels::VEC_CALC, "")
                .unwrap();
            let kernel = cpu.create_kernel(&program, "vec_calc").unwrap();
            let _mem = cpu.create_buffer(&ctx, AccessMode::ReadWrite, 16).unwrap();
            assert_eq!(
                cpu.live(),
                Live {
                    contexts: 1,
                    queues: 1,
                    programs: 1,
                    kernels: 1,
                    buffers: 1,
                }
            );
            // 内核持有程序
            drop(program);
            assert_eq!(cpu.live().programs, 1);
            drop(kernel);
            assert_eq!(cpu.live().programs, 0);
        }
        assert_eq!(cpu.live().total(), 0);
    }

    #[test]
    fn test_build_rules() {
        let (cpu, device) = setup();
        let ctx = cpu.create_context(&device).unwrap();

        let Err(BuildError::BuildFailed(log)) =
            cpu.build_program(&ctx, &device, "__kernel void unknown(int x) {}", "")
        else {
            panic!()
        };
        assert!(log.contains("'unknown'"));

        let Err(BuildError::Others(status)) =
            cpu.build_program(&ctx, &device, crate::kernels::VEC_CALC, "--fast")
        else {
            panic!()
        };
        assert_eq!(status, Status::INVALID_BUILD_OPTIONS);

        let program = cpu
            .build_program(&ctx, &device, crate::kernels::VEC_CALC, "-cl-fast-relaxed-math -DN=4")
            .unwrap();
        // 已注册但不在源码中的入口不可用
        assert_eq!(
            cpu.create_kernel(&program, "gaussian_blur").err(),
            Some(Status::INVALID_KERNEL_NAME)
        );
    }

    #[test]
    fn test_launch_rules() {
        let (cpu, device) = setup();
        let ctx = cpu.create_context(&device).unwrap();
        let queue = cpu.create_queue(&ctx, &device).unwrap();
        let program = cpu
            .build_program(&ctx, &device, crate::kernels::VEC_CALC, "")
            .unwrap();
        let mut kernel = cpu.create_kernel(&program, "vec_calc").unwrap();

        let a = cpu.create_buffer(&ctx, AccessMode::ReadOnly, 32).unwrap();
        let b = cpu.create_buffer(&ctx, AccessMode::ReadOnly, 32).unwrap();
        let c = cpu.create_buffer(&ctx, AccessMode::WriteOnly, 32).unwrap();
        assert_eq!(c.len(), 32);

        assert_eq!(
            cpu.set_arg_mem(&mut kernel, 3, &a),
            Err(Status::INVALID_ARG_INDEX)
        );
        cpu.set_arg_mem(&mut kernel, 0, &a).unwrap();
        cpu.set_arg_mem(&mut kernel, 1, &b).unwrap();
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[8], None),
            Err(Status::INVALID_KERNEL_ARGS)
        );

        cpu.set_arg_mem(&mut kernel, 2, &c).unwrap();
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[8], Some(&[3])),
            Err(Status::INVALID_WORK_GROUP_SIZE)
        );
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[8], Some(&[128])),
            Err(Status::INVALID_WORK_GROUP_SIZE)
        );
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[0], None),
            Err(Status::INVALID_GLOBAL_WORK_SIZE)
        );
        cpu.enqueue_kernel(&queue, &mut kernel, &[8], Some(&[4])).unwrap();

        // 只读缓冲区不能作为输出
        cpu.set_arg_mem(&mut kernel, 2, &a).unwrap();
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[8], None),
            Err(Status::INVALID_OPERATION)
        );

        // 释放后的缓冲区不能再被内核使用
        drop(c);
        let c = cpu.create_buffer(&ctx, AccessMode::ReadWrite, 32).unwrap();
        cpu.set_arg_mem(&mut kernel, 2, &c).unwrap();
        drop(b);
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[8], None),
            Err(Status::INVALID_MEM_OBJECT)
        );
    }

    #[test]
    fn test_no_platform() {
        assert_eq!(
            Cpu::builder().build().platforms().err(),
            Some(Status::PLATFORM_NOT_FOUND_KHR)
        );
    }

    #[test]
    fn test_transfer_bounds() {
        let (cpu, device) = setup();
        let ctx = cpu.create_context(&device).unwrap();
        let queue = cpu.create_queue(&ctx, &device).unwrap();
        assert_eq!(
            cpu.create_buffer(&ctx, AccessMode::ReadWrite, 0).err(),
            Some(Status::INVALID_BUFFER_SIZE)
        );
        let mut mem = cpu.create_buffer(&ctx, AccessMode::ReadWrite, 4).unwrap();
        assert_eq!(
            cpu.write_buffer(&queue, &mut mem, &[0; 5]),
            Err(Status::INVALID_VALUE)
        );
        cpu.write_buffer(&queue, &mut mem, &[1, 2]).unwrap();
        let mut out = [9; 4];
        cpu.read_buffer(&queue, &mut mem, &mut out).unwrap();
        assert_eq!(out, [1, 2, 0, 0]);
    }

    #[test]
    fn test_launch_view() {
        use super::{HostKernel, Launch};
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let cpu = Cpu::builder()
            .platform(CpuPlatform::new("test").device(CpuDevice::new("dev", 1)))
            .kernel(
                "shape",
                HostKernel::new(1, move |launch: &Launch| {
                    let tag = launch.scalar::<u32>(0)?;
                    let entry = (tag, launch.local().to_vec(), launch.work_items());
                    record.lock().unwrap().push(entry);
                    Ok(())
                }),
            )
            .build();
        let device = cpu.gpu_devices(&cpu.platforms().unwrap()[0]).unwrap().remove(0);
        let ctx = cpu.create_context(&device).unwrap();
        let queue = cpu.create_queue(&ctx, &device).unwrap();
        let program = cpu
            .build_program(&ctx, &device, "__kernel void shape(uint tag) {}", "")
            .unwrap();
        let mut kernel = cpu.create_kernel(&program, "shape").unwrap();

        cpu.set_arg_bytes(&mut kernel, 0, &7u32.to_ne_bytes()).unwrap();
        cpu.enqueue_kernel(&queue, &mut kernel, &[6, 4], Some(&[3, 2]))
            .unwrap();
        // 不指定分组时每个工作组只有一个工作项
        cpu.enqueue_kernel(&queue, &mut kernel, &[6, 4], None).unwrap();

        cpu.set_arg_bytes(&mut kernel, 0, &[1]).unwrap();
        assert_eq!(
            cpu.enqueue_kernel(&queue, &mut kernel, &[6, 4], None),
            Err(Status::INVALID_ARG_SIZE)
        );

        assert_eq!(
            *seen.lock().unwrap(),
            [(7, vec![3, 2], 24), (7, vec![1, 1], 24)]
        );
    }
}
