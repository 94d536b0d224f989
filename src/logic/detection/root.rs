//! Root Detection

use super::indicators::{PROTECTED_MOUNTS, ROOT_PACKAGES, ROOT_PROPERTIES, SU_PATHS};
use super::{Detector, Findings};
use crate::logic::platform::PlatformIntrospectionProvider;
use crate::logic::threat::{ThreatSignal, ThreatType};

#[derive(Debug, Default)]
pub struct RootDetector;

impl RootDetector {
    pub fn new() -> Self {
        Self
    }
}

/// Mount point of a mount table line whose options include `rw`
fn writable_protected_mount(line: &str) -> Option<&str> {
    let mut fields = line.split_whitespace();
    let _device = fields.next()?;
    let mount_point = fields.next()?;
    let _fs_type = fields.next()?;
    let options = fields.next()?;

    let protected = PROTECTED_MOUNTS.iter().any(|m| *m == mount_point);
    let writable = options.split(',').any(|opt| opt == "rw");
    (protected && writable).then_some(mount_point)
}

impl Detector for RootDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::Root
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());

        for &path in SU_PATHS {
            if let Some(true) = findings.check("file_exists", provider.file_exists(path)) {
                findings.hit(format!("root binary at {}", path));
            }
        }

        if let Some(packages) =
            findings.check("list_installed_packages", provider.list_installed_packages())
        {
            for package in packages.iter().filter(|p| ROOT_PACKAGES.iter().any(|r| *r == p.as_str())) {
                findings.hit(format!("root manager {} installed", package));
            }
        }

        if let Some(mounts) = findings.check("read_mount_table", provider.read_mount_table()) {
            for mount_point in mounts.iter().filter_map(|line| writable_protected_mount(line)) {
                findings.hit(format!("{} mounted read-write", mount_point));
            }
        }

        for (key, pattern) in ROOT_PROPERTIES {
            if let Some(Some(value)) =
                findings.check("get_system_property", provider.get_system_property(key))
            {
                if pattern.matches(&value) {
                    findings.hit(format!("{}={}", key, value));
                }
            }
        }

        findings.into_signal()
    }
}
