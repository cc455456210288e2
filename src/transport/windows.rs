//! Native Windows transport.
//!
//! Thin RAII wrappers over the Win32 named-object calls. Every handle
//! supports an explicit, idempotent `close()` so teardown can report a
//! failed release and still free the remaining handles; `Drop` is only a
//! backstop for handles that were never explicitly released.

use std::{ffi::OsStr, os::windows::prelude::OsStrExt, ptr, time::Duration};

use windows_sys::Win32::{
    Foundation::{
        CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
        WAIT_OBJECT_0, WAIT_TIMEOUT,
    },
    System::{
        Memory::{
            CreateFileMappingW, FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
            PAGE_READWRITE, UnmapViewOfFile,
        },
        Threading::{CreateEventW, CreateMutexW, INFINITE, SetEvent, WaitForSingleObject},
    },
};

use super::{NamedEvent, NamedMutex, SectionView, Transport, TransportError, WaitOutcome};

/// Build a null-terminated UTF-16 string for the Win32 API.
fn wide(name: &str) -> Vec<u16> {
    OsStr::new(name).encode_wide().chain(Some(0)).collect()
}

/// Capture the calling thread's last OS error for `op` on `name`.
fn os_error(op: &'static str, name: &str) -> TransportError {
    TransportError::Os {
        op,
        name: name.to_owned(),
        code: unsafe { GetLastError() },
    }
}

pub struct WindowsTransport;

impl WindowsTransport {
    pub fn new() -> Self {
        WindowsTransport
    }
}

impl Default for WindowsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WindowsTransport {
    fn ensure_supported(&self) -> Result<(), TransportError> {
        // This module only compiles on Windows; the gate is the build.
        Ok(())
    }

    fn create_named_mutex(&self, name: &str) -> Result<Box<dyn NamedMutex>, TransportError> {
        let wide_name = wide(name);
        let handle = unsafe { CreateMutexW(ptr::null(), 0, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(os_error("CreateMutexW", name));
        }
        // Must be read before any other call clobbers the thread error slot.
        let already_existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
        Ok(Box::new(WindowsMutex {
            handle,
            name: name.to_owned(),
            already_existed,
            closed: false,
        }))
    }

    fn create_named_event(&self, name: &str) -> Result<Box<dyn NamedEvent>, TransportError> {
        let wide_name = wide(name);
        // Auto-reset (bManualReset = 0), initially unsignaled.
        let handle = unsafe { CreateEventW(ptr::null(), 0, 0, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(os_error("CreateEventW", name));
        }
        Ok(Box::new(WindowsEvent {
            handle,
            name: name.to_owned(),
            closed: false,
        }))
    }

    fn map_named_section(
        &self,
        name: &str,
        backing: usize,
        view: usize,
    ) -> Result<Box<dyn SectionView>, TransportError> {
        let wide_name = wide(name);
        // Pagefile-backed section. PAGE_READWRITE so external producers can
        // open it for writing; our own view stays read-only.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                0,
                backing as u32,
                wide_name.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(os_error("CreateFileMappingW", name));
        }
        let mapped = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, view) };
        if mapped.Value.is_null() {
            let err = os_error("MapViewOfFile", name);
            unsafe { CloseHandle(handle) };
            return Err(err);
        }
        Ok(Box::new(WindowsSection {
            handle,
            view: mapped,
            len: view,
            name: name.to_owned(),
            closed: false,
        }))
    }
}

struct WindowsMutex {
    handle: HANDLE,
    name: String,
    already_existed: bool,
    closed: bool,
}

// The raw handle is a process-global token; nothing here aliases memory
// across threads.
unsafe impl Send for WindowsMutex {}
unsafe impl Sync for WindowsMutex {}

impl NamedMutex for WindowsMutex {
    fn already_existed(&self) -> bool {
        self.already_existed
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if unsafe { CloseHandle(self.handle) } == 0 {
            return Err(os_error("CloseHandle", &self.name));
        }
        Ok(())
    }
}

impl Drop for WindowsMutex {
    fn drop(&mut self) {
        if !self.closed {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

struct WindowsEvent {
    handle: HANDLE,
    name: String,
    closed: bool,
}

unsafe impl Send for WindowsEvent {}
unsafe impl Sync for WindowsEvent {}

impl NamedEvent for WindowsEvent {
    fn signal(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                op: "SetEvent",
                name: self.name.clone(),
            });
        }
        if unsafe { SetEvent(self.handle) } == 0 {
            return Err(os_error("SetEvent", &self.name));
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<WaitOutcome, TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                op: "WaitForSingleObject",
                name: self.name.clone(),
            });
        }
        let millis = match timeout {
            // INFINITE is a reserved value, clamp real timeouts below it.
            Some(t) => t.as_millis().min(u128::from(INFINITE - 1)) as u32,
            None => INFINITE,
        };
        match unsafe { WaitForSingleObject(self.handle, millis) } {
            WAIT_OBJECT_0 => Ok(WaitOutcome::Signaled),
            WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
            _ => Err(os_error("WaitForSingleObject", &self.name)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if unsafe { CloseHandle(self.handle) } == 0 {
            return Err(os_error("CloseHandle", &self.name));
        }
        Ok(())
    }
}

impl Drop for WindowsEvent {
    fn drop(&mut self) {
        if !self.closed {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

struct WindowsSection {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
    name: String,
    closed: bool,
}

// The view is mapped read-only and only ever copied out of.
unsafe impl Send for WindowsSection {}
unsafe impl Sync for WindowsSection {}

impl SectionView for WindowsSection {
    fn len(&self) -> usize {
        self.len
    }

    fn read_into(&self, dst: &mut [u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                op: "read view",
                name: self.name.clone(),
            });
        }
        let n = dst.len().min(self.len);
        unsafe {
            ptr::copy_nonoverlapping(self.view.Value as *const u8, dst.as_mut_ptr(), n);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Unmap first, then close the backing object; report the first
        // failure but still attempt the second release.
        let mut first_err = None;
        if unsafe { UnmapViewOfFile(self.view) } == 0 {
            first_err = Some(os_error("UnmapViewOfFile", &self.name));
        }
        if unsafe { CloseHandle(self.handle) } == 0 && first_err.is_none() {
            first_err = Some(os_error("CloseHandle", &self.name));
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for WindowsSection {
    fn drop(&mut self) {
        if !self.closed {
            unsafe {
                UnmapViewOfFile(self.view);
                CloseHandle(self.handle);
            }
        }
    }
}
