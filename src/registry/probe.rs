//! Process liveness probing.
//!
//! The registry decides singleton ownership and host death from pid liveness
//! alone, so the OS calls sit behind a small trait that tests can fake.

/// Capability to ask the operating system about process liveness.
pub trait ProcessProbe: Send + Sync {
    /// Whether a process with `pid` currently exists.
    ///
    /// A pid of zero is never alive: zero is the tombstone value written
    /// into released worker records, not a real process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Pid of the calling process.
    fn current_pid(&self) -> u32;

    /// Pid of the calling process's parent.
    fn parent_pid(&self) -> u32;
}

/// Probe backed by the real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

#[cfg(unix)]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        // Signal 0 performs permission and existence checks without
        // delivering anything. EPERM still means the process exists.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn parent_pid(&self) -> u32 {
        unsafe { libc::getppid() as u32 }
    }
}

#[cfg(windows)]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        if pid == 0 {
            return false;
        }
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            CloseHandle(handle);
            true
        }
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn parent_pid(&self) -> u32 {
        use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
        use windows_sys::Win32::System::Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, Process32First, Process32Next, PROCESSENTRY32,
            TH32CS_SNAPPROCESS,
        };

        let own_pid = std::process::id();
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return 0;
            }
            let mut entry: PROCESSENTRY32 = std::mem::zeroed();
            entry.dwSize = std::mem::size_of::<PROCESSENTRY32>() as u32;
            let mut parent = 0;
            if Process32First(snapshot, &mut entry) != 0 {
                loop {
                    if entry.th32ProcessID == own_pid {
                        parent = entry.th32ParentProcessID;
                        break;
                    }
                    if Process32Next(snapshot, &mut entry) == 0 {
                        break;
                    }
                }
            }
            CloseHandle(snapshot);
            parent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        let probe = OsProcessProbe;
        assert!(probe.is_alive(probe.current_pid()));
    }

    #[test]
    fn test_pid_zero_is_never_alive() {
        assert!(!OsProcessProbe.is_alive(0));
    }

    #[test]
    fn test_parent_pid_is_live_and_distinct() {
        let probe = OsProcessProbe;
        let parent = probe.parent_pid();
        assert_ne!(parent, probe.current_pid());
        assert!(probe.is_alive(parent));
    }
}
