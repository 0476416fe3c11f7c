//! Process token elevation check

use std::ffi::c_void;
use tracing::trace;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use crate::{CaptureError, Result};

/// Whether the current process runs with an elevated token.
pub fn is_elevated() -> Result<bool> {
    let mut token = HANDLE::default();
    unsafe {
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)
            .map_err(|e| CaptureError::windows_api_error("OpenProcessToken", e))?;
    }

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned = 0u32;
    let queried = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    unsafe {
        let _ = CloseHandle(token);
    }
    queried.map_err(|e| CaptureError::windows_api_error("GetTokenInformation", e))?;

    trace!(elevated = elevation.TokenIsElevated != 0, "Queried token elevation");
    Ok(elevation.TokenIsElevated != 0)
}
