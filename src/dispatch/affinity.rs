//! CPU pinning for worker processes.

use super::{DispatchError, Result};

/// CPU index for a core slot, wrapping when there are more slots than CPUs.
pub fn cpu_for_core(core_id: usize, available: usize) -> usize {
    core_id % available.max(1)
}

/// Restrict process `pid` to the CPU matching `core_id`. Returns the CPU.
#[cfg(target_os = "linux")]
pub fn pin_to_core(pid: u32, core_id: usize) -> Result<usize> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cpu = cpu_for_core(core_id, available);

    let mut set = CpuSet::new();
    set.set(cpu)
        .map_err(|e| DispatchError::Affinity(format!("cpu {}: {}", cpu, e)))?;
    sched_setaffinity(Pid::from_raw(pid as i32), &set)
        .map_err(|e| DispatchError::Affinity(format!("pid {}: {}", pid, e)))?;
    Ok(cpu)
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_pid: u32, _core_id: usize) -> Result<usize> {
    Err(DispatchError::Affinity(
        "CPU pinning is not supported on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_for_core_wraps() {
        assert_eq!(cpu_for_core(0, 4), 0);
        assert_eq!(cpu_for_core(3, 4), 3);
        assert_eq!(cpu_for_core(5, 4), 1);
        assert_eq!(cpu_for_core(7, 0), 0);
    }
}
