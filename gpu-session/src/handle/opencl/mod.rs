//! 基于 [clrt] 的 OpenCL 驱动。
//!
//! 上下文、队列、程序和内核使用 clrt 的封装，缓冲区是共享虚拟内存。
//! clrt 没有提供的平台信息和设备属性直接向 C API 查询。

use crate::{AccessMode, BuildError, DeviceInfo, Driver, PlatformParam, Status};
use bytemuck::{bytes_of_mut, pod_read_unaligned, Pod};
use clrt::{
    bindings::{
        clGetDeviceIDs, clGetDeviceInfo, clGetPlatformIDs, clGetPlatformInfo, cl_device_id,
        cl_int, cl_platform_id, cl_uint, cl_ulong, CL_DEVICE_MAX_COMPUTE_UNITS, CL_DEVICE_TYPE,
        CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU, CL_DEVICE_VENDOR_ID, CL_PLATFORM_EXTENSIONS,
        CL_PLATFORM_PROFILE, CL_PLATFORM_VENDOR, CL_PLATFORM_VERSION,
    },
    CommandQueue, Context, Device, Kernel, Platform, Program, SvmBlob,
};
use log::{debug, warn};
use std::{
    ffi::{c_void, CString},
    iter::zip,
    mem::size_of,
    ptr::null_mut,
};

/// OpenCL 驱动，本身无状态。
#[derive(Clone, Copy, Default, Debug)]
pub struct Cl;

pub struct ClPlatform {
    platform: Platform,
    id: cl_platform_id,
}

pub struct ClDevice {
    device: Device,
    id: cl_device_id,
}

/// 共享虚拟内存缓冲区。
///
/// 设备上总是可读写，访问方式只作记录。
pub struct ClMem {
    blob: SvmBlob,
    mode: AccessMode,
    size: usize,
}

impl ClMem {
    #[inline]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl From<clrt::BuildError> for BuildError {
    fn from(e: clrt::BuildError) -> Self {
        match e {
            clrt::BuildError::BuildFailed(log) => Self::BuildFailed(log.to_string()),
            clrt::BuildError::Others(err) => {
                warn!("clrt failed to build a program: {err}");
                Self::Others(Status::BUILD_PROGRAM_FAILURE)
            }
        }
    }
}

#[inline]
fn check(status: cl_int) -> Result<(), Status> {
    match Status(status as _) {
        Status::SUCCESS => Ok(()),
        e => Err(e),
    }
}

/// 先查询长度再取内容的字符串属性。
fn query_string(
    query: impl Fn(usize, *mut c_void, *mut usize) -> cl_int,
) -> Result<String, Status> {
    let mut size = 0;
    check(query(0, null_mut(), &mut size))?;
    let mut buf = vec![0u8; size];
    check(query(size, buf.as_mut_ptr().cast(), null_mut()))?;
    if let Some(end) = buf.iter().position(|&b| b == 0) {
        buf.truncate(end)
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn query_value<T: Pod>(
    query: impl Fn(usize, *mut c_void, *mut usize) -> cl_int,
) -> Result<T, Status> {
    let mut value = T::zeroed();
    check(query(
        size_of::<T>(),
        bytes_of_mut(&mut value).as_mut_ptr().cast(),
        null_mut(),
    ))?;
    Ok(value)
}

fn platform_ids() -> Result<Vec<cl_platform_id>, Status> {
    let mut num: cl_uint = 0;
    check(unsafe { clGetPlatformIDs(0, null_mut(), &mut num) })?;
    let mut ids = vec![null_mut(); num as usize];
    check(unsafe { clGetPlatformIDs(num, ids.as_mut_ptr(), null_mut()) })?;
    Ok(ids)
}

fn device_ids(platform: cl_platform_id, ty: cl_ulong) -> Result<Vec<cl_device_id>, Status> {
    let mut num: cl_uint = 0;
    match check(unsafe { clGetDeviceIDs(platform, ty as _, 0, null_mut(), &mut num) }) {
        Ok(()) => {}
        Err(Status::DEVICE_NOT_FOUND) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    }
    let mut ids = vec![null_mut(); num as usize];
    check(unsafe { clGetDeviceIDs(platform, ty as _, num, ids.as_mut_ptr(), null_mut()) })?;
    Ok(ids)
}

fn device_query(
    id: cl_device_id,
    param: cl_uint,
) -> impl Fn(usize, *mut c_void, *mut usize) -> cl_int {
    move |size, value, ret| unsafe { clGetDeviceInfo(id, param as _, size as _, value, ret.cast()) }
}

const fn param_code(param: PlatformParam) -> cl_uint {
    (match param {
        PlatformParam::Profile => CL_PLATFORM_PROFILE,
        PlatformParam::Version => CL_PLATFORM_VERSION,
        PlatformParam::Vendor => CL_PLATFORM_VENDOR,
        PlatformParam::Extensions => CL_PLATFORM_EXTENSIONS,
    }) as _
}

impl Driver for Cl {
    type Platform = ClPlatform;
    type Device = ClDevice;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Mem = ClMem;

    fn platforms(&self) -> Result<Vec<ClPlatform>, Status> {
        let ids = platform_ids()?;
        let platforms = Platform::all().into_iter().collect::<Vec<_>>();
        if platforms.len() != ids.len() {
            return Err(Status::INVALID_PLATFORM);
        }
        Ok(zip(platforms, ids)
            .map(|(platform, id)| ClPlatform { platform, id })
            .collect())
    }

    fn platform_info(&self, platform: &ClPlatform, param: PlatformParam) -> Result<String, Status> {
        query_string(|size, value, ret| unsafe {
            clGetPlatformInfo(platform.id, param_code(param) as _, size as _, value, ret.cast())
        })
    }

    fn gpu_devices(&self, platform: &ClPlatform) -> Result<Vec<ClDevice>, Status> {
        let devices = platform.platform.devices().into_iter().collect::<Vec<_>>();
        // clrt 的设备表与某一种类型的枚举结果按顺序对应
        let mut ids = device_ids(platform.id, CL_DEVICE_TYPE_ALL as _)?;
        if ids.len() != devices.len() {
            ids = device_ids(platform.id, CL_DEVICE_TYPE_GPU as _)?;
        }
        if ids.len() != devices.len() {
            return Err(Status::INVALID_DEVICE);
        }

        let mut gpus = Vec::new();
        for (device, id) in zip(devices, ids) {
            let ty = query_value::<cl_ulong>(device_query(id, CL_DEVICE_TYPE as _))?;
            if ty & CL_DEVICE_TYPE_GPU as cl_ulong != 0 {
                gpus.push(ClDevice { device, id })
            }
        }
        Ok(gpus)
    }

    fn device_info(&self, device: &ClDevice) -> Result<DeviceInfo, Status> {
        Ok(DeviceInfo {
            name: device.device.name().to_string(),
            vendor_id: query_value::<cl_uint>(device_query(device.id, CL_DEVICE_VENDOR_ID as _))?,
            max_compute_units: query_value::<cl_uint>(device_query(
                device.id,
                CL_DEVICE_MAX_COMPUTE_UNITS as _,
            ))?,
        })
    }

    fn create_context(&self, device: &ClDevice) -> Result<Context, Status> {
        Ok(device.device.context())
    }

    fn create_queue(&self, ctx: &Context, _device: &ClDevice) -> Result<CommandQueue, Status> {
        Ok(ctx.queue())
    }

    fn build_program(
        &self,
        ctx: &Context,
        _device: &ClDevice,
        src: &str,
        options: &str,
    ) -> Result<Program, BuildError> {
        let options = CString::new(options)
            .map_err(|_| BuildError::Others(Status::INVALID_BUILD_OPTIONS))?;
        Ok(ctx.build_from_source(src, &options)?)
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel, Status> {
        let name = CString::new(name).map_err(|_| Status::INVALID_KERNEL_NAME)?;
        program.get_kernel(name).ok_or(Status::INVALID_KERNEL_NAME)
    }

    fn create_buffer(&self, ctx: &Context, mode: AccessMode, size: usize) -> Result<ClMem, Status> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        Ok(ClMem {
            blob: ctx.malloc::<u8>(size),
            mode,
            size,
        })
    }

    fn write_buffer(&self, queue: &CommandQueue, mem: &mut ClMem, src: &[u8]) -> Result<(), Status> {
        if src.len() > mem.size {
            return Err(Status::INVALID_VALUE);
        }
        let mut map = queue.map_mut(&mut mem.blob, false);
        let (_, bytes, _) = unsafe { map.align_to_mut::<u8>() };
        bytes[..src.len()].copy_from_slice(src);
        queue.unmap(map);
        Ok(())
    }

    fn read_buffer(&self, queue: &CommandQueue, mem: &mut ClMem, dst: &mut [u8]) -> Result<(), Status> {
        if dst.len() > mem.size {
            return Err(Status::INVALID_VALUE);
        }
        let map = queue.map(&mut mem.blob);
        let (_, bytes, _) = unsafe { map.align_to::<u8>() };
        dst.copy_from_slice(&bytes[..dst.len()]);
        queue.unmap(map);
        Ok(())
    }

    fn set_arg_mem(&self, kernel: &mut Kernel, index: u32, mem: &ClMem) -> Result<(), Status> {
        kernel.set_arg(index as _, mem.blob.as_ptr());
        Ok(())
    }

    fn set_arg_bytes(&self, kernel: &mut Kernel, index: u32, value: &[u8]) -> Result<(), Status> {
        match value.len() {
            4 => kernel.set_arg(index as _, pod_read_unaligned::<cl_uint>(value)),
            8 => kernel.set_arg(index as _, pod_read_unaligned::<cl_ulong>(value)),
            _ => return Err(Status::INVALID_ARG_SIZE),
        };
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &mut Kernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<(), Status> {
        if !(1..=3).contains(&global.len()) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        let offset = [0; 3];
        let ones = [1; 3];
        let dims = global.len();
        let local = local.unwrap_or(&ones[..dims]);
        debug!("clrt launch: global {global:?}, local {local:?}");
        kernel.launch(&offset[..dims], global, local, queue, None);
        Ok(())
    }

    fn finish(&self, queue: &CommandQueue) -> Result<(), Status> {
        queue.finish();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Cl;
    use crate::{
        common_cpu::vec_calc_element,
        kernels::VEC_CALC,
        test_utils::{Diff, ErrorCollector},
        AccessMode, Driver, Session, SessionConfig,
    };
    use rand::Rng;
    use std::mem::size_of;

    #[test]
    fn test_platforms() {
        let Ok(platforms) = Cl.platforms() else {
            return;
        };
        for platform in &platforms {
            for device in Cl.gpu_devices(platform).unwrap() {
                let info = Cl.device_info(&device).unwrap();
                println!("device: {} ({} compute units)", info.name, info.max_compute_units);
            }
        }
    }

    #[test]
    fn test_compute() {
        let Ok(mut pc) = Session::new(Cl, SessionConfig::new()) else {
            println!("no OpenCL GPU available");
            return;
        };
        for summary in pc.display_platform_info() {
            println!("{summary:?}")
        }
        println!("device: {}", pc.device_info().name);
        pc.build_program_from_source(VEC_CALC).unwrap();
        let kernel = pc.create_kernel("vec_calc").unwrap();

        let n = 1 << 16;
        let mut a = vec![0f32; n];
        let mut b = vec![0f32; n];
        rand::thread_rng().fill(&mut a[..]);
        rand::thread_rng().fill(&mut b[..]);

        let size = n * size_of::<f32>();
        let keys = [AccessMode::ReadOnly, AccessMode::ReadOnly, AccessMode::WriteOnly]
            .map(|mode| pc.create_buffer(mode, size).unwrap());
        pc.write_slice(keys[0], &a).unwrap();
        pc.write_slice(keys[1], &b).unwrap();
        for (i, key) in keys.into_iter().enumerate() {
            pc.set_arg_buffer(kernel, i, key).unwrap()
        }
        let local = pc.enqueue_data_parallel_kernel(kernel, n, 100).unwrap();
        assert_eq!(n % local, 0);

        let mut c = vec![0f32; n];
        pc.read_slice(keys[2], &mut c).unwrap();

        let mut ec = ErrorCollector::new(f32::EPSILON as f64, 1e-3);
        for ((&a, &b), &c) in a.iter().zip(&b).zip(&c) {
            ec.push(Diff::new(vec_calc_element(a, b) as _, c as _))
        }
        println!("{ec}");
        let (out, count) = ec.summary();
        assert!(out * 1000 <= count);
    }
}
