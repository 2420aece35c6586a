//! System resource detection for page cache sizing.
//!
//! Detects available RAM and CPU cores, then derives how many decoded pages
//! each reader may keep. Stateless: every call re-probes the system.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

/// Decoded bytes of one default int page (1M x 4 bytes).
const DECODED_PAGE_BYTES: u64 = 4 * MB;

/// Readers a typical open dump keeps concurrently (catalog roles).
const READERS_PER_DUMP: u64 = 9;

/// Fraction of available memory granted to all page caches together.
const CACHE_FRACTION: f64 = 0.25;

const PAGES_MIN: usize = 4;
const PAGES_MAX: usize = 256;

// ── SystemResources ─────────────────────────────────────────────────

/// Snapshot of detected hardware resources.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
}

impl SystemResources {
    /// Probe the current system for RAM and CPU information.
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }

    /// Memory pressure indicator (0.0 = no pressure, 1.0 = critical).
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

// ── CacheBudget ─────────────────────────────────────────────────────

/// Page cache sizing computed from system resources.
#[derive(Debug, Clone)]
pub struct CacheBudget {
    /// Decoded pages each reader may hold.
    pub pages_per_reader: usize,
    /// Memory pressure at detection time.
    pub memory_pressure: f64,
}

impl CacheBudget {
    /// `clamp(available * 0.25 / (9 readers * 4 MB), 4, 256)`, halved under
    /// heavy memory pressure.
    pub fn from_resources(res: &SystemResources) -> Self {
        let budget = (res.available_memory_bytes as f64 * CACHE_FRACTION) as u64;
        let mut pages = (budget / (READERS_PER_DUMP * DECODED_PAGE_BYTES)) as usize;

        let pressure = res.memory_pressure();
        if pressure > 0.9 {
            pages /= 2;
        }

        Self {
            pages_per_reader: pages.clamp(PAGES_MIN, PAGES_MAX),
            memory_pressure: pressure,
        }
    }
}

impl Default for CacheBudget {
    /// Conservative defaults suitable for tests and unknown environments.
    fn default() -> Self {
        Self {
            pages_per_reader: 16,
            memory_pressure: 0.0,
        }
    }
}

/// One-line summary of detected resources for log lines.
pub fn describe(res: &SystemResources) -> String {
    format!(
        "{} GB total, {} GB available, {} cpus",
        res.total_memory_bytes / GB,
        res.available_memory_bytes / GB,
        res.cpu_count
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_resources(total_gb: f64, available_gb: f64, cpus: usize) -> SystemResources {
        SystemResources {
            total_memory_bytes: (total_gb * GB as f64) as u64,
            available_memory_bytes: (available_gb * GB as f64) as u64,
            cpu_count: cpus,
        }
    }

    #[test]
    fn test_system_resources_detection() {
        let res = SystemResources::detect();
        assert!(res.total_memory_bytes > 0, "total memory must be positive");
        assert!(res.cpu_count >= 1, "cpu count must be at least 1");
    }

    #[test]
    fn test_budget_low_memory_floor() {
        // 1 GB available -> 256 MB / 36 MB = 7 pages
        let budget = CacheBudget::from_resources(&make_resources(2.0, 1.0, 2));
        assert_eq!(budget.pages_per_reader, 7);

        let budget = CacheBudget::from_resources(&make_resources(1.0, 0.05, 2));
        assert_eq!(budget.pages_per_reader, PAGES_MIN);
    }

    #[test]
    fn test_budget_high_memory_capped() {
        let budget = CacheBudget::from_resources(&make_resources(512.0, 256.0, 32));
        assert_eq!(budget.pages_per_reader, PAGES_MAX);
    }

    #[test]
    fn test_budget_halved_under_pressure() {
        // 64 GB total, 4 GB available -> pressure 0.9375, 28 pages halved
        let budget = CacheBudget::from_resources(&make_resources(64.0, 4.0, 8));
        assert_eq!(budget.pages_per_reader, 14);
        assert!(budget.memory_pressure > 0.9);
    }

    #[test]
    fn test_memory_pressure() {
        let res = make_resources(1.0, 0.25, 2);
        assert!((res.memory_pressure() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_describe() {
        let res = make_resources(16.0, 8.0, 4);
        assert_eq!(describe(&res), "16 GB total, 8 GB available, 4 cpus");
    }
}
