//! Real-time ETW sessions
//!
//! A [`RealtimeSession`] is a named controller session in real-time mode. It
//! enables providers with `EnableTraceEx2` and consumes its own stream with
//! `OpenTraceW`/`ProcessTrace`, resolving event names through TDH metadata.

use std::any::Any;
use std::ffi::c_void;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};
use windows::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_CANCELLED, ERROR_INSUFFICIENT_BUFFER,
    ERROR_MORE_DATA, ERROR_SUCCESS, ERROR_WMI_INSTANCE_NOT_FOUND, WIN32_ERROR,
};
use windows::Win32::System::Diagnostics::Etw::{
    CONTROLTRACE_HANDLE, CloseTrace, ControlTraceW, EVENT_CONTROL_CODE_ENABLE_PROVIDER,
    EVENT_RECORD, EVENT_TRACE_CONTROL_STOP, EVENT_TRACE_LOGFILEW, EVENT_TRACE_PROPERTIES,
    EVENT_TRACE_REAL_TIME_MODE, EnableTraceEx2, OpenTraceW, PROCESS_TRACE_MODE_EVENT_RECORD,
    PROCESS_TRACE_MODE_REAL_TIME, ProcessTrace, StartTraceW, TRACE_EVENT_INFO,
    TRACE_LEVEL_VERBOSE, TdhGetEventInformation, WNODE_FLAG_TRACED_GUID,
};
use windows::core::{PCWSTR, PWSTR};

use crate::types::{EventName, ProviderId, TraceRecord};
use crate::{CaptureError, Result};

/// `OpenTraceW` failure value on 64-bit hosts
const INVALID_PROCESSTRACE_HANDLE: u64 = u64::MAX;
/// Query performance counter timestamps
const CLOCK_QPC: u32 = 1;
/// Initial TDH metadata buffer, in 8-byte words
const EVENT_INFO_WORDS: usize = 512;

/// Convert a Rust string to a NUL-terminated wide string
fn wide_string(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Map a Win32 status from a session call to a capture error
fn check(status: WIN32_ERROR, operation: &str, session: &str) -> Result<()> {
    match status {
        ERROR_SUCCESS => Ok(()),
        ERROR_ALREADY_EXISTS => Err(CaptureError::name_in_use(session)),
        ERROR_ACCESS_DENIED => Err(CaptureError::permission_denied(session)),
        other => Err(CaptureError::windows_api_error(
            operation,
            windows_core::Error::from(other.to_hresult()),
        )),
    }
}

/// `EVENT_TRACE_PROPERTIES` followed by space for the logger name.
///
/// Backed by `u64` words so the header is suitably aligned.
struct PropertiesBuffer {
    words: Vec<u64>,
}

impl PropertiesBuffer {
    fn new(name_units: usize) -> Self {
        let bytes = size_of::<EVENT_TRACE_PROPERTIES>() + name_units * size_of::<u16>();
        let mut buffer = Self { words: vec![0u64; bytes.div_ceil(8)] };
        let total = (buffer.words.len() * 8) as u32;
        let properties = buffer.properties();
        properties.Wnode.BufferSize = total;
        properties.LoggerNameOffset = size_of::<EVENT_TRACE_PROPERTIES>() as u32;
        buffer
    }

    fn properties(&mut self) -> &mut EVENT_TRACE_PROPERTIES {
        // SAFETY: the buffer is zero-initialized, 8-byte aligned and at least
        // as large as the header.
        unsafe { &mut *(self.words.as_mut_ptr() as *mut EVENT_TRACE_PROPERTIES) }
    }
}

/// Stops a real-time session from any thread.
pub struct SessionControl {
    name: String,
    handle: CONTROLTRACE_HANDLE,
    stopped: AtomicBool,
}

impl SessionControl {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the session. Repeated calls are no-ops.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut buffer = PropertiesBuffer::new(self.name.encode_utf16().count() + 1);
        let status = unsafe {
            ControlTraceW(
                self.handle,
                PCWSTR::null(),
                buffer.properties(),
                EVENT_TRACE_CONTROL_STOP,
            )
        };

        match status {
            // More data only means the name did not fit; the session is stopped.
            ERROR_SUCCESS | ERROR_MORE_DATA => {
                debug!(session = %self.name, "ETW session stopped");
                Ok(())
            }
            ERROR_WMI_INSTANCE_NOT_FOUND => {
                debug!(session = %self.name, "ETW session was already gone");
                Ok(())
            }
            other => check(other, "ControlTraceW", &self.name),
        }
    }
}

/// A running real-time ETW session.
pub struct RealtimeSession {
    wide_name: Vec<u16>,
    control: Arc<SessionControl>,
}

impl RealtimeSession {
    /// Create the named session with no providers enabled.
    ///
    /// Fails with `NameInUse` if the name is taken and `PermissionDenied`
    /// without administrative rights.
    pub fn start(name: &str) -> Result<Self> {
        let wide_name = wide_string(name);
        let mut buffer = PropertiesBuffer::new(wide_name.len());
        {
            let properties = buffer.properties();
            properties.Wnode.Flags = WNODE_FLAG_TRACED_GUID;
            properties.Wnode.ClientContext = CLOCK_QPC;
            properties.LogFileMode = EVENT_TRACE_REAL_TIME_MODE;
        }

        let mut handle = CONTROLTRACE_HANDLE::default();
        let status =
            unsafe { StartTraceW(&mut handle, PCWSTR(wide_name.as_ptr()), buffer.properties()) };
        check(status, "StartTraceW", name)?;
        debug!(session = name, handle = handle.Value, "ETW session created");

        Ok(Self {
            wide_name,
            control: Arc::new(SessionControl {
                name: name.to_string(),
                handle,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    /// Enable `provider` at verbose level with every keyword.
    pub fn enable_provider(&self, provider: ProviderId) -> Result<()> {
        let guid = provider.to_guid();
        let status = unsafe {
            EnableTraceEx2(
                self.control.handle,
                &guid,
                EVENT_CONTROL_CODE_ENABLE_PROVIDER,
                TRACE_LEVEL_VERBOSE as u8,
                u64::MAX,
                0,
                0,
                None,
            )
        };
        check(status, "EnableTraceEx2", &self.control.name)
    }

    /// Consume the session's events until it is stopped.
    ///
    /// A panic in `on_event` stops the session and is resumed on this thread
    /// once `ProcessTrace` has returned.
    pub fn process(&self, on_event: &mut dyn FnMut(TraceRecord<'_>)) -> Result<()> {
        let mut context = CallbackContext {
            on_event,
            info: vec![0u64; EVENT_INFO_WORDS],
            panic: None,
            control: &self.control,
        };

        // OpenTraceW takes a mutable name pointer but does not write through it.
        let mut logger_name = self.wide_name.clone();
        let mut logfile = EVENT_TRACE_LOGFILEW::default();
        logfile.LoggerName = PWSTR(logger_name.as_mut_ptr());
        logfile.Anonymous1.ProcessTraceMode =
            PROCESS_TRACE_MODE_REAL_TIME | PROCESS_TRACE_MODE_EVENT_RECORD;
        logfile.Anonymous2.EventRecordCallback = Some(on_event_record);
        logfile.Context = &mut context as *mut CallbackContext<'_> as *mut c_void;

        let trace = unsafe { OpenTraceW(&mut logfile) };
        if trace.Value == INVALID_PROCESSTRACE_HANDLE {
            let error = std::io::Error::last_os_error();
            if self.control.is_stopped() {
                return Ok(());
            }
            let name = &self.control.name;
            return Err(CaptureError::session_failed_with_source(name, "OpenTraceW", error));
        }

        debug!(session = %self.control.name, "Processing ETW events");
        let status = unsafe { ProcessTrace(&[trace], None, None) };
        unsafe {
            let _ = CloseTrace(trace);
        }

        if let Some(payload) = context.panic.take() {
            panic::resume_unwind(payload);
        }

        match status {
            ERROR_SUCCESS | ERROR_CANCELLED => Ok(()),
            other => check(other, "ProcessTrace", &self.control.name),
        }
    }
}

/// State reachable from the ETW callback through `EVENT_RECORD::UserContext`.
struct CallbackContext<'a> {
    on_event: &'a mut dyn FnMut(TraceRecord<'_>),
    info: Vec<u64>,
    panic: Option<Box<dyn Any + Send>>,
    control: &'a SessionControl,
}

impl CallbackContext<'_> {
    fn deliver(&mut self, record: &EVENT_RECORD) {
        let data = if record.UserData.is_null() || record.UserDataLength == 0 {
            &[][..]
        } else {
            // SAFETY: ETW guarantees UserDataLength readable bytes at UserData
            // for the duration of the callback.
            unsafe {
                let len = record.UserDataLength as usize;
                std::slice::from_raw_parts(record.UserData as *const u8, len)
            }
        };

        let name = event_name(record, &mut self.info).unwrap_or(&[]);
        (self.on_event)(TraceRecord::new(EventName::Utf16(name), data));
    }
}

unsafe extern "system" fn on_event_record(record: *mut EVENT_RECORD) {
    // SAFETY: ProcessTrace passes a valid record whose UserContext is the
    // CallbackContext installed by `RealtimeSession::process`, which outlives
    // the ProcessTrace call.
    let Some(record) = (unsafe { record.as_ref() }) else {
        return;
    };
    let context = record.UserContext as *mut CallbackContext<'_>;
    let Some(context) = (unsafe { context.as_mut() }) else {
        return;
    };
    if context.panic.is_some() {
        return;
    }

    // Unwinding out of an extern "system" callback aborts the process.
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| context.deliver(record))) {
        context.panic = Some(payload);
        if let Err(e) = context.control.stop() {
            warn!(session = %context.control.name, "Failed to stop session after panic: {}", e);
        }
    }
}

/// Event name (or task name for manifest events) from TDH metadata, as
/// UTF-16 without the terminator.
fn event_name<'b>(record: &EVENT_RECORD, buffer: &'b mut Vec<u64>) -> Option<&'b [u16]> {
    let mut size = (buffer.len() * 8) as u32;
    let mut status = unsafe {
        let info = buffer.as_mut_ptr() as *mut TRACE_EVENT_INFO;
        TdhGetEventInformation(record, None, Some(info), &mut size)
    };
    if status == ERROR_INSUFFICIENT_BUFFER.0 {
        buffer.resize((size as usize).div_ceil(8), 0);
        size = (buffer.len() * 8) as u32;
        status = unsafe {
            let info = buffer.as_mut_ptr() as *mut TRACE_EVENT_INFO;
            TdhGetEventInformation(record, None, Some(info), &mut size)
        };
    }
    if status != ERROR_SUCCESS.0 {
        trace!(status, "No metadata for event");
        return None;
    }

    // SAFETY: TDH filled `size` bytes starting with a TRACE_EVENT_INFO header.
    let info = unsafe { &*(buffer.as_ptr() as *const TRACE_EVENT_INFO) };
    let event_offset = unsafe { info.Anonymous1.EventNameOffset } as usize;
    let offset = if event_offset != 0 { event_offset } else { info.TaskNameOffset as usize };
    if offset == 0 {
        return None;
    }

    let len = (size as usize).min(buffer.len() * 8) / 2;
    let units = unsafe { std::slice::from_raw_parts(buffer.as_ptr() as *const u16, len) };
    let tail = units.get(offset / 2..)?;
    let len = tail.iter().position(|&unit| unit == 0).unwrap_or(tail.len());
    Some(&tail[..len])
}
