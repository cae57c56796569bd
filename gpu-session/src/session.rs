use crate::{
    buffer_not_found, build_failed, common::SlotTable, context_failed, device_failed,
    info::platform_summaries, kernel_not_found, no_program, queue_failed, select::select_device,
    source_missing, source_unreadable, utils::local_size, AccessMode, BufferKey, BuildError,
    DeviceInfo, Driver, KernelId, PlatformSummary, SessionError, SetupError, Status,
};
use bytemuck::{bytes_of, cast_slice, cast_slice_mut, Pod};
use log::{debug, error, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// 建立会话所需的配置。
///
/// 设备资源无法复制，复制会话就是用同一份配置重新建立一个会话。
#[derive(Clone, Default, Debug)]
pub struct SessionConfig {
    /// 设备源码文件，设置后建立会话时立即构建。
    pub source: Option<PathBuf>,
    /// 传递给设备编译器的选项。
    pub build_options: String,
}

impl SessionConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }
}

struct Buffer<M> {
    mem: M,
    mode: AccessMode,
    size: usize,
}

/// 设备会话。
///
/// 独占设备、上下文、命令队列和当前程序，以序号管理内核，以键管理缓冲区。
/// 所有提交到设备的操作都在返回前完成。
pub struct Session<D: Driver> {
    // 字段按释放顺序排列
    kernels: SlotTable<D::Kernel>,
    program: Option<D::Program>,
    buffers: SlotTable<Buffer<D::Mem>>,
    queue: D::Queue,
    context: D::Context,
    device: D::Device,
    device_info: DeviceInfo,
    build_log: Option<String>,
    config: SessionConfig,
    driver: D,
}

impl<D: Driver> Session<D> {
    /// 选择设备并建立上下文和命令队列，配置了源码时立即构建程序。
    ///
    /// 设备、上下文、队列或源码文件任一不可用都无法建立会话。
    /// 构建失败不影响会话建立，只是会话中没有程序。
    pub fn new(driver: D, config: SessionConfig) -> Result<Self, SetupError> {
        let src = match &config.source {
            Some(path) => Some(read_source(path).map_err(|e| {
                error!("{}", e.info);
                source_missing(e.info)
            })?),
            None => None,
        };

        let selected = select_device(&driver)?;
        let context = driver.create_context(&selected.device).map_err(|status| {
            error!("Error in creating a context: {status}");
            context_failed(format!("{status}"))
        })?;
        let queue = driver
            .create_queue(&context, &selected.device)
            .map_err(|status| {
                error!("Error in creating a command queue: {status}");
                queue_failed(format!("{status}"))
            })?;

        let mut session = Self {
            kernels: Default::default(),
            program: None,
            buffers: Default::default(),
            queue,
            context,
            device: selected.device,
            device_info: selected.info,
            build_log: None,
            config,
            driver,
        };
        if let Some(src) = src {
            // 失败已记录在日志中
            let _ = session.build(&src);
        }
        Ok(session)
    }

    /// 用相同的配置重新建立会话。
    ///
    /// 新会话重新选择设备，配置了源码文件时重新构建；内核和缓冲区不会复制，键从 0 开始。
    /// 从内存源码构建的程序没有对应的文件，新会话中没有程序。
    pub fn reinitialize(&self) -> Result<Self, SetupError>
    where
        D: Clone,
    {
        Self::new(self.driver.clone(), self.config.clone())
    }

    /// 读取源码文件并构建，成功后记录为会话的源码。
    ///
    /// 文件不可读时会话不变；构建失败时解除原有程序的绑定。
    pub fn build_program(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let src = read_source(path).inspect_err(|e| warn!("{}", e.info))?;
        self.build(&src)?;
        self.config.source = Some(path.to_path_buf());
        Ok(())
    }

    /// 从内存中的源码构建程序，成功后会话不再关联源码文件。
    pub fn build_program_from_source(&mut self, src: &str) -> Result<(), SessionError> {
        self.build(src)?;
        self.config.source = None;
        Ok(())
    }

    fn build(&mut self, src: &str) -> Result<(), SessionError> {
        // 新的构建总是替换旧程序
        self.program = None;
        match self.driver.build_program(
            &self.context,
            &self.device,
            src,
            &self.config.build_options,
        ) {
            Ok(program) => {
                info!("Program built for {:?}", self.device_info.name);
                self.program = Some(program);
                self.build_log = None;
                Ok(())
            }
            Err(BuildError::BuildFailed(log)) => {
                error!("Error in building a program.");
                error!("BUILD LOG: {log}");
                self.build_log = Some(log.clone());
                Err(build_failed(log))
            }
            Err(BuildError::Others(status)) => {
                error!("Error in building a program: {status}");
                self.build_log = None;
                Err(build_failed(format!("{status}")))
            }
        }
    }

    /// 从当前程序创建内核。
    ///
    /// 每次调用都消耗一个序号；失败时序号对应的槽位为空。
    pub fn create_kernel(&mut self, name: &str) -> Result<KernelId, SessionError> {
        let result = match &self.program {
            Some(program) => self
                .driver
                .create_kernel(program, name)
                .map_err(|status| device_failed(format!("create kernel {name:?}: {status}"))),
            None => Err(no_program(format!("create kernel {name:?} without a program"))),
        };
        match result {
            Ok(kernel) => Ok(KernelId(self.kernels.push(Some(kernel)))),
            Err(e) => {
                let idx = self.kernels.push(None);
                warn!("kernel #{idx} unusable: {e}");
                Err(e)
            }
        }
    }

    /// 分配设备存储。
    ///
    /// 每次调用都消耗一个键；失败时键对应的槽位为空。
    pub fn create_buffer(&mut self, mode: AccessMode, size: usize) -> Result<BufferKey, SessionError> {
        match self.driver.create_buffer(&self.context, mode, size) {
            Ok(mem) => {
                let key = self.buffers.push(Some(Buffer { mem, mode, size }));
                debug!("buffer #{key}: {mode:?} {size} bytes");
                Ok(BufferKey(key))
            }
            Err(status) => {
                let key = self.buffers.push(None);
                warn!("Error in creating buffer #{key}: {status}");
                Err(device_failed(format!(
                    "create {mode:?} buffer of {size} bytes: {status}"
                )))
            }
        }
    }

    /// 释放缓冲区，返回是否确实释放了存储。
    ///
    /// 已释放或从未分配的键不做任何事。
    pub fn release_buffer(&mut self, key: BufferKey) -> bool {
        self.buffers.take(key.0).is_some()
    }

    /// 阻塞式写入 `src.len()` 字节到缓冲区起点。
    pub fn write_buffer(&mut self, key: BufferKey, src: &[u8]) -> Result<(), SessionError> {
        let Some(buffer) = self.buffers.get_mut(key.0) else {
            return Err(missing_buffer(key));
        };
        self.driver
            .write_buffer(&self.queue, &mut buffer.mem, src)
            .map_err(|status| failed(format!("write {} bytes to {key}: {status}", src.len())))
    }

    /// 阻塞式从缓冲区起点读出 `dst.len()` 字节。
    pub fn read_buffer(&mut self, key: BufferKey, dst: &mut [u8]) -> Result<(), SessionError> {
        let Some(buffer) = self.buffers.get_mut(key.0) else {
            return Err(missing_buffer(key));
        };
        self.driver
            .read_buffer(&self.queue, &mut buffer.mem, dst)
            .map_err(|status| failed(format!("read {} bytes from {key}: {status}", dst.len())))
    }

    pub fn write_slice<T: Pod>(&mut self, key: BufferKey, src: &[T]) -> Result<(), SessionError> {
        self.write_buffer(key, cast_slice(src))
    }

    pub fn read_slice<T: Pod>(&mut self, key: BufferKey, dst: &mut [T]) -> Result<(), SessionError> {
        self.read_buffer(key, cast_slice_mut(dst))
    }

    /// 把缓冲区绑定为内核的第 `order` 个实参。
    pub fn set_arg_buffer(
        &mut self,
        id: KernelId,
        order: usize,
        key: BufferKey,
    ) -> Result<(), SessionError> {
        let Some(kernel) = self.kernels.get_mut(id.0) else {
            return Err(missing_kernel(id));
        };
        let Some(buffer) = self.buffers.get(key.0) else {
            return Err(missing_buffer(key));
        };
        let index = arg_index(id, order)?;
        self.driver
            .set_arg_mem(kernel, index, &buffer.mem)
            .map_err(|status| failed(format!("set argument {order} of {id} to {key}: {status}")))
    }

    /// 按值设置内核的第 `order` 个实参。
    pub fn set_arg_bytes(
        &mut self,
        id: KernelId,
        order: usize,
        value: &[u8],
    ) -> Result<(), SessionError> {
        let Some(kernel) = self.kernels.get_mut(id.0) else {
            return Err(missing_kernel(id));
        };
        let index = arg_index(id, order)?;
        self.driver
            .set_arg_bytes(kernel, index, value)
            .map_err(|status| failed(format!("set argument {order} of {id}: {status}")))
    }

    #[inline]
    pub fn set_arg<T: Pod>(&mut self, id: KernelId, order: usize, value: T) -> Result<(), SessionError> {
        self.set_arg_bytes(id, order, bytes_of(&value))
    }

    /// 一维发射 `total` 个工作项并等待完成，返回实际使用的工作组大小。
    ///
    /// 工作组大小取不超过 `preferred` 且整除 `total` 的最大值。
    pub fn enqueue_data_parallel_kernel(
        &mut self,
        id: KernelId,
        total: usize,
        preferred: usize,
    ) -> Result<usize, SessionError> {
        let local = local_size(total, preferred);
        debug!("Local item size = {local}");
        self.launch(id, &[total], Some(&[local]))?;
        Ok(local)
    }

    /// 二维发射并等待完成。
    ///
    /// 与一维发射不同，工作组大小原样交给驱动，不检查整除性。
    pub fn enqueue_data_parallel_kernel_2d(
        &mut self,
        id: KernelId,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> Result<(), SessionError> {
        self.launch(id, &global, local.as_ref().map(|l| &l[..]))
    }

    fn launch(
        &mut self,
        id: KernelId,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<(), SessionError> {
        let Some(kernel) = self.kernels.get_mut(id.0) else {
            return Err(missing_kernel(id));
        };
        self.driver
            .enqueue_kernel(&self.queue, kernel, global, local)
            .map_err(|status| {
                failed(format!(
                    "enqueue {id} over {global:?} by {local:?}: {status}"
                ))
            })?;
        self.driver
            .finish(&self.queue)
            .map_err(|status| failed(format!("finish after {id}: {status}")))
    }

    /// 打印所有平台的信息。
    pub fn display_platform_info(&self) -> Vec<PlatformSummary> {
        platform_summaries(&self.driver).unwrap_or_default()
    }

    #[inline]
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    #[inline]
    pub fn is_program_bound(&self) -> bool {
        self.program.is_some()
    }

    /// 最近一次失败构建的日志。
    #[inline]
    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    /// 已分配的内核序号数量，包括创建失败的序号。
    #[inline]
    pub fn kernel_count(&self) -> usize {
        self.kernels.next_index()
    }

    /// 存活的缓冲区数量。
    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.buffers.occupied()
    }

    #[inline]
    pub fn buffer_size(&self, key: BufferKey) -> Option<usize> {
        self.buffers.get(key.0).map(|b| b.size)
    }

    #[inline]
    pub fn buffer_mode(&self, key: BufferKey) -> Option<AccessMode> {
        self.buffers.get(key.0).map(|b| b.mode)
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(status) = self.driver.finish(&self.queue) {
            error!("Failed to finish the command queue: {status}")
        }
        self.kernels.clear();
        self.program = None;
        self.buffers.clear();
    }
}

fn read_source(path: &Path) -> Result<String, SessionError> {
    fs::read_to_string(path).map_err(|e| {
        source_unreadable(format!(
            "OpenCL program source not found: {}: {e}",
            path.display()
        ))
    })
}

fn missing_kernel(id: KernelId) -> SessionError {
    let e = kernel_not_found(format!("{id} is empty or was never created"));
    warn!("{}", e.info);
    e
}

fn missing_buffer(key: BufferKey) -> SessionError {
    let e = buffer_not_found(format!("{key} is released or was never created"));
    warn!("{}", e.info);
    e
}

/// 驱动以 32 位整数表示实参序号，超出范围的序号不能截断。
fn arg_index(id: KernelId, order: usize) -> Result<u32, SessionError> {
    u32::try_from(order).map_err(|_| {
        failed(format!(
            "set argument {order} of {id}: {}",
            Status::INVALID_ARG_INDEX
        ))
    })
}

fn failed(info: String) -> SessionError {
    warn!("{info}");
    device_failed(info)
}
