use crate::{no_gpu_device, no_platform, DeviceInfo, Driver, SetupError, Status};
use log::{error, info, warn};

/// 选中的设备。
pub struct Selected<D: Driver> {
    pub device: D::Device,
    pub info: DeviceInfo,
}

/// 选出计算单元最多的候选项。
///
/// 数量相同时保留先出现的候选项。
pub fn pick_most_compute_units<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<T> {
    let mut best = None::<(T, u32)>;
    for (item, units) in candidates {
        let better = match &best {
            Some((_, max)) => units > *max,
            None => true,
        };
        if better {
            best = Some((item, units))
        }
    }
    best.map(|(item, _)| item)
}

/// 在所有平台的所有 GPU 中选出计算单元最多的一个。
pub fn select_device<D: Driver>(driver: &D) -> Result<Selected<D>, SetupError> {
    let platforms = match driver.platforms() {
        Ok(platforms) if !platforms.is_empty() => platforms,
        Ok(_) | Err(Status::PLATFORM_NOT_FOUND_KHR) => {
            error!("Failed to find any OpenCL platforms.");
            return Err(no_platform("0 platforms found"));
        }
        Err(status) => {
            error!("Failed to find any OpenCL platforms: {status}");
            return Err(no_platform(format!("platform enumeration failed with {status}")));
        }
    };
    info!("{} OpenCL platform(s) found.", platforms.len());

    let mut candidates = Vec::new();
    for (i, platform) in platforms.iter().enumerate() {
        let devices = match driver.gpu_devices(platform) {
            Ok(devices) => devices,
            Err(Status::DEVICE_NOT_FOUND) => Vec::new(),
            Err(status) => {
                warn!("Failed to enumerate GPU devices of platform #{i}: {status}");
                Vec::new()
            }
        };
        if devices.is_empty() {
            warn!("No GPU devices found for platform #{i}");
            continue;
        }
        info!("{} GPU device(s) found for platform #{i}", devices.len());

        for device in devices {
            match driver.device_info(&device) {
                Ok(info) => {
                    info!(
                        "Device {:?} (vendor id {:#x}) has {} compute units.",
                        info.name, info.vendor_id, info.max_compute_units,
                    );
                    let units = info.max_compute_units;
                    candidates.push(((device, info), units))
                }
                Err(status) => warn!("Skipped a device of platform #{i}: {status}"),
            }
        }
    }

    match pick_most_compute_units(candidates) {
        Some((device, info)) => {
            info!("Selected device {:?}", info.name);
            Ok(Selected { device, info })
        }
        None => {
            error!("No OpenCL GPU devices found through all the platforms.");
            Err(no_gpu_device(format!(
                "{} platform(s) searched",
                platforms.len()
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::{pick_most_compute_units, select_device};
    use crate::{
        common_cpu::{Cpu, CpuDevice, CpuPlatform},
        SetupErrorKind,
    };

    #[test]
    fn test_first_seen_wins() {
        let candidates = [("a", 4), ("b", 8), ("c", 8), ("d", 2)];
        assert_eq!(pick_most_compute_units(candidates), Some("b"));
        assert_eq!(pick_most_compute_units([("z", 0)]), Some("z"));
        assert_eq!(pick_most_compute_units(Vec::<((), u32)>::new()), None);
    }

    #[test]
    fn test_across_platforms() {
        let cpu = Cpu::builder()
            .platform(
                CpuPlatform::new("vendor-a")
                    .device(CpuDevice::new("a0", 16))
                    .device(CpuDevice::new("a1", 32).vendor_id(0x10de)),
            )
            .platform(CpuPlatform::new("vendor-b"))
            .platform(
                CpuPlatform::new("vendor-c")
                    .device(CpuDevice::new("c0", 32))
                    .device(CpuDevice::new("c1", 8)),
            )
            .build();
        let selected = select_device(&cpu).unwrap();
        assert_eq!(selected.info.name, "a1");
        assert_eq!(selected.info.max_compute_units, 32);
        assert_eq!(selected.info.vendor_id, 0x10de);
    }

    #[test]
    fn test_nothing_to_select() {
        let cpu = Cpu::builder().build();
        let Err(e) = select_device(&cpu) else {
            panic!()
        };
        assert_eq!(e.kind, SetupErrorKind::NoPlatform);
        assert_eq!(e.info, "0 platforms found");

        let cpu = Cpu::builder()
            .platform(CpuPlatform::new("empty"))
            .platform(CpuPlatform::new("also empty"))
            .build();
        let Err(e) = select_device(&cpu) else {
            panic!()
        };
        assert_eq!(e.kind, SetupErrorKind::NoGpuDevice);
    }
}
