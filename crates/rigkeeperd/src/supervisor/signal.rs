//! Stop signalling for the worker process
//!
//! Stopping escalates through the methods a platform offers: close the
//! worker's main window, send a console interrupt, then kill.

use std::fmt;
use std::io;
use std::sync::Arc;

/// One escalation step of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMethod {
    /// Ask the worker's main window to close
    GracefulWindowClose,
    /// Console interrupt (Ctrl-C / SIGINT)
    CooperativeInterrupt,
    ForceKill,
}

impl fmt::Display for StopMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GracefulWindowClose => "window close",
            Self::CooperativeInterrupt => "interrupt",
            Self::ForceKill => "force kill",
        })
    }
}

/// Platform capability for signalling a worker and its process group
pub trait ProcessSignaller: Send + Sync + fmt::Debug {
    /// The graceful step this platform can take for `pid`, if any
    fn graceful_method(&self, pid: u32) -> Option<StopMethod>;

    /// Deliver `method` to the worker's process group
    fn signal(&self, pid: u32, method: StopMethod) -> io::Result<()>;

    /// Undo whatever `signal` set up for a graceful step once the wait is over
    fn release(&self, _pid: u32, _method: StopMethod) {}

    /// Kill processes left in the group of a reaped worker; `true` if any were
    fn sweep(&self, _pid: u32) -> io::Result<bool> {
        Ok(false)
    }
}

/// Process-group signals on Unix; workers have no window surface
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSignaller;

#[cfg(unix)]
impl ProcessSignaller for UnixSignaller {
    fn graceful_method(&self, _pid: u32) -> Option<StopMethod> {
        Some(StopMethod::CooperativeInterrupt)
    }

    fn signal(&self, pid: u32, method: StopMethod) -> io::Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let signal = match method {
            StopMethod::GracefulWindowClose => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "workers have no window to close",
                ))
            }
            StopMethod::CooperativeInterrupt => Signal::SIGINT,
            StopMethod::ForceKill => Signal::SIGKILL,
        };

        killpg(Pid::from_raw(pid as i32), signal).map_err(io::Error::from)
    }

    fn sweep(&self, pid: u32) -> io::Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::{getpgid, Pid};

        let group = Pid::from_raw(pid as i32);
        // The leader is reaped; a live process with its pid means the id was reused
        if getpgid(Some(group)).is_ok() {
            return Ok(false);
        }
        match killpg(group, None) {
            Ok(()) => {
                killpg(group, Signal::SIGKILL)?;
                Ok(true)
            }
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Window close or console interrupt on Windows
///
/// The interrupt attaches to the worker's console and raises Ctrl-C there
/// with our own handling masked; `release` detaches again and restores it.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSignaller;

#[cfg(windows)]
mod console {
    use std::io;
    use windows_sys::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows_sys::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
        ATTACH_PARENT_PROCESS, CTRL_C_EVENT,
    };
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, WM_CLOSE,
    };

    struct WindowSearch {
        pid: u32,
        found: Vec<HWND>,
    }

    // SAFETY: lparam is the WindowSearch passed to EnumWindows below
    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut WindowSearch);
        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, &mut owner);
        if owner == search.pid && IsWindowVisible(hwnd) != 0 {
            search.found.push(hwnd);
        }
        1
    }

    /// Visible top-level windows owned by `pid`
    pub(super) fn windows_of(pid: u32) -> Vec<HWND> {
        let mut search = WindowSearch {
            pid,
            found: Vec::new(),
        };
        // SAFETY: the callback only touches `search`, which outlives the call
        unsafe { EnumWindows(Some(collect_window), &mut search as *mut WindowSearch as LPARAM) };
        search.found
    }

    pub(super) fn close_windows(pid: u32) -> io::Result<()> {
        let windows = windows_of(pid);
        if windows.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "worker has no window"));
        }
        for hwnd in windows {
            // SAFETY: posting to a window handle that may have closed meanwhile only fails
            if unsafe { PostMessageW(hwnd, WM_CLOSE, 0, 0) } == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub(super) fn interrupt(pid: u32) -> io::Result<()> {
        // SAFETY: console attachment calls have no memory preconditions
        unsafe {
            FreeConsole();
            if AttachConsole(pid) == 0 {
                let err = io::Error::last_os_error();
                AttachConsole(ATTACH_PARENT_PROCESS);
                return Err(err);
            }
            SetConsoleCtrlHandler(None, 1);
            if GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0) == 0 {
                let err = io::Error::last_os_error();
                detach();
                return Err(err);
            }
        }
        Ok(())
    }

    pub(super) fn detach() {
        // SAFETY: as above
        unsafe {
            FreeConsole();
            SetConsoleCtrlHandler(None, 0);
            AttachConsole(ATTACH_PARENT_PROCESS);
        }
    }
}

#[cfg(windows)]
impl ProcessSignaller for WindowsSignaller {
    fn graceful_method(&self, pid: u32) -> Option<StopMethod> {
        if console::windows_of(pid).is_empty() {
            Some(StopMethod::CooperativeInterrupt)
        } else {
            Some(StopMethod::GracefulWindowClose)
        }
    }

    fn signal(&self, pid: u32, method: StopMethod) -> io::Result<()> {
        match method {
            StopMethod::GracefulWindowClose => console::close_windows(pid),
            StopMethod::CooperativeInterrupt => console::interrupt(pid),
            // The child handle kills on this platform
            StopMethod::ForceKill => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "group kill is not available on Windows",
            )),
        }
    }

    fn release(&self, _pid: u32, method: StopMethod) {
        if method == StopMethod::CooperativeInterrupt {
            console::detach();
        }
    }
}

/// Fallback for other platforms: no graceful step, kills go through the child handle
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableSignaller;

impl ProcessSignaller for PortableSignaller {
    fn graceful_method(&self, _pid: u32) -> Option<StopMethod> {
        None
    }

    fn signal(&self, _pid: u32, method: StopMethod) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not available on this platform", method),
        ))
    }
}

/// The signaller for the current platform
pub fn platform_signaller() -> Arc<dyn ProcessSignaller> {
    #[cfg(unix)]
    {
        Arc::new(UnixSignaller)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsSignaller)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(PortableSignaller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_has_no_graceful_step() {
        let signaller = PortableSignaller;
        assert_eq!(signaller.graceful_method(1), None);
        let err = signaller.signal(1, StopMethod::ForceKill).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_interrupts_first() {
        let signaller = UnixSignaller;
        assert_eq!(signaller.graceful_method(1), Some(StopMethod::CooperativeInterrupt));
        assert!(signaller.signal(1, StopMethod::GracefulWindowClose).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_leaves_live_pid_alone() {
        // Our own pid is alive, so its group must not be treated as leftovers
        let me = std::process::id();
        assert!(!UnixSignaller.sweep(me).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_of_empty_group_is_noop() {
        // Above the kernel's pid limit, so no process or group can have it
        assert!(!UnixSignaller.sweep(4_194_305).unwrap());
    }

    #[cfg(windows)]
    #[test]
    fn test_windowless_worker_gets_interrupt() {
        let signaller = WindowsSignaller;
        let me = std::process::id();
        assert_eq!(signaller.graceful_method(me), Some(StopMethod::CooperativeInterrupt));
        let err = signaller.signal(me, StopMethod::GracefulWindowClose).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_platform_signaller_has_graceful_step() {
        let signaller = platform_signaller();
        let me = std::process::id();
        if cfg!(any(unix, windows)) {
            assert!(signaller.graceful_method(me).is_some());
        }
    }
}
