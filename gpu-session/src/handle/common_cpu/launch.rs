use super::MemInner;
use crate::{AccessMode, Status};
use bytemuck::{cast_slice, pod_read_unaligned, Pod};
use std::{mem::size_of, sync::Arc};

/// 以主机函数实现的内核。
#[derive(Clone)]
pub struct HostKernel {
    pub(super) arity: usize,
    pub(super) func: Arc<dyn Fn(&Launch) -> Result<(), Status> + Send + Sync>,
}

impl HostKernel {
    /// `arity` 是内核形参的数量，发射前每个形参都必须设置过。
    pub fn new(
        arity: usize,
        func: impl Fn(&Launch) -> Result<(), Status> + Send + Sync + 'static,
    ) -> Self {
        Self {
            arity,
            func: Arc::new(func),
        }
    }
}

pub(super) enum Bound<'a> {
    Mem(Arc<MemInner>),
    Bytes(&'a [u8]),
}

/// 一次内核发射看到的执行范围和实参。
pub struct Launch<'a> {
    pub(super) global: &'a [usize],
    pub(super) local: &'a [usize],
    pub(super) args: Vec<Bound<'a>>,
}

impl Launch<'_> {
    #[inline]
    pub fn global(&self) -> &[usize] {
        self.global
    }

    #[inline]
    pub fn local(&self) -> &[usize] {
        self.local
    }

    /// 工作项总数。
    #[inline]
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }

    fn mem(&self, index: usize) -> Result<&MemInner, Status> {
        match self.args.get(index) {
            Some(Bound::Mem(mem)) => Ok(mem),
            Some(Bound::Bytes(_)) => Err(Status::INVALID_ARG_VALUE),
            None => Err(Status::INVALID_ARG_INDEX),
        }
    }

    /// 读出缓冲区实参的全部元素。
    ///
    /// 不足一个元素的尾部字节被忽略。
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>, Status> {
        let mem = self.mem(index)?;
        if mem.mode == AccessMode::WriteOnly {
            return Err(Status::INVALID_OPERATION);
        }
        let data = mem.data.read().map_err(|_| Status::OUT_OF_RESOURCES)?;
        Ok(data
            .chunks_exact(size_of::<T>())
            .map(pod_read_unaligned)
            .collect())
    }

    /// 从缓冲区实参起点写入元素。
    pub fn write<T: Pod>(&self, index: usize, values: &[T]) -> Result<(), Status> {
        let mem = self.mem(index)?;
        if mem.mode == AccessMode::ReadOnly {
            return Err(Status::INVALID_OPERATION);
        }
        let mut data = mem.data.write().map_err(|_| Status::OUT_OF_RESOURCES)?;
        let bytes = cast_slice::<T, u8>(values);
        if bytes.len() > data.len() {
            return Err(Status::OUT_OF_RESOURCES);
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// 原地修改缓冲区实参的字节。
    pub fn modify<R>(&self, index: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, Status> {
        let mem = self.mem(index)?;
        if mem.mode == AccessMode::ReadOnly {
            return Err(Status::INVALID_OPERATION);
        }
        let mut data = mem.data.write().map_err(|_| Status::OUT_OF_RESOURCES)?;
        Ok(f(&mut data))
    }

    /// 读取按值传递的标量实参。
    pub fn scalar<T: Pod>(&self, index: usize) -> Result<T, Status> {
        match self.args.get(index) {
            Some(Bound::Bytes(bytes)) if bytes.len() == size_of::<T>() => {
                Ok(pod_read_unaligned(bytes))
            }
            Some(Bound::Bytes(_)) => Err(Status::INVALID_ARG_SIZE),
            Some(Bound::Mem(_)) => Err(Status::INVALID_ARG_VALUE),
            None => Err(Status::INVALID_ARG_INDEX),
        }
    }
}
