use crate::{Driver, PlatformParam, Status};
use log::{info, warn};

/// 平台的描述信息，查询失败的字段为 [None]。
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct PlatformSummary {
    pub profile: Option<String>,
    pub version: Option<String>,
    pub vendor: Option<String>,
    pub extensions: Option<String>,
}

impl PlatformSummary {
    fn field_mut(&mut self, param: PlatformParam) -> &mut Option<String> {
        match param {
            PlatformParam::Profile => &mut self.profile,
            PlatformParam::Version => &mut self.version,
            PlatformParam::Vendor => &mut self.vendor,
            PlatformParam::Extensions => &mut self.extensions,
        }
    }
}

/// 查询并打印所有平台的信息。
///
/// 单个字段查询失败只记录警告并继续查询下一个字段。
pub fn platform_summaries<D: Driver>(driver: &D) -> Result<Vec<PlatformSummary>, Status> {
    let platforms = driver.platforms().inspect_err(|status| {
        warn!("Failed to find any OpenCL platforms: {status}");
    })?;
    info!("Number of platforms: \t{}", platforms.len());

    Ok(platforms
        .iter()
        .enumerate()
        .map(|(i, platform)| {
            let mut summary = PlatformSummary::default();
            for param in PlatformParam::ALL {
                match driver.platform_info(platform, param) {
                    Ok(value) => {
                        info!("\t{:<22}:\t{value}", param.name());
                        *summary.field_mut(param) = Some(value)
                    }
                    Err(status) => {
                        warn!("Failed to find OpenCL platform #{i} {}: {status}", param.name())
                    }
                }
            }
            summary
        })
        .collect())
}

#[test]
fn test_degraded() {
    use crate::common_cpu::{Cpu, CpuPlatform};

    let cpu = Cpu::builder()
        .platform(CpuPlatform::new("vendor-a").extensions(None))
        .platform(CpuPlatform::new("vendor-b").profile(None).version(None))
        .platform(CpuPlatform::new("vendor-c").vendor(None))
        .build();
    let summaries = platform_summaries(&cpu).unwrap();
    assert_eq!(summaries.len(), 3);

    let [a, b, c] = &*summaries else { panic!() };
    assert_eq!(a.vendor.as_deref(), Some("vendor-a"));
    assert_eq!(a.profile.as_deref(), Some("FULL_PROFILE"));
    assert!(a.extensions.is_none());

    assert!(b.profile.is_none());
    assert!(b.version.is_none());
    assert_eq!(b.vendor.as_deref(), Some("vendor-b"));
    assert!(b.extensions.is_some());

    assert!(c.vendor.is_none());
    assert!(c.version.is_some());
}
