//! [`WindowSystem`] implementation over Win32.
//!
//! Geometry is read and written through `GetWindowPlacement`/`SetWindowPlacement`
//! so that position, size and show state travel in a single call. Placement
//! rectangles are in workspace coordinates, which equal screen coordinates unless
//! the taskbar is docked at the top or left edge.

use crate::{is_shell_window, Win32Error};
use deskpin_core_engine::{
    MonitorInfo, Rect, ShowState, VisibleWindow, WindowGeometry, WindowHandle, WindowInfo,
    WindowSystem, WindowSystemError,
};
use std::ffi::c_void;
use std::mem;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
};
use windows::Win32::System::Threading::GetCurrentProcessId;
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetWindow, GetWindowLongW, GetWindowPlacement, GetWindowRect,
    GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, IsZoomed,
    SetWindowPlacement, ShowWindow, GWL_EXSTYLE, GW_OWNER, SW_HIDE, SW_SHOWMAXIMIZED,
    SW_SHOWMINNOACTIVE, SW_SHOWNOACTIVATE, WINDOWPLACEMENT, WPF_ASYNCWINDOWPLACEMENT,
    WS_EX_TOOLWINDOW,
};

/// Monitor flag marking the primary display.
const MONITORINFOF_PRIMARY: u32 = 1;

/// Set per-monitor DPI awareness so coordinates are physical pixels.
///
/// Must run before any window or GDI call. Returns false if the awareness was
/// already set by a manifest or an earlier call.
pub fn set_dpi_awareness() -> bool {
    unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) }.is_ok()
}

/// Win32-backed window system.
#[derive(Debug, Clone)]
pub struct Win32WindowSystem {
    own_process_id: u32,
}

impl Win32WindowSystem {
    pub fn new() -> Self {
        Self {
            own_process_id: unsafe { GetCurrentProcessId() },
        }
    }

    /// Top-level windows that belong to user applications.
    ///
    /// Windows on other virtual desktops are cloaked; `include_cloaked` keeps them.
    fn app_windows(&self, include_cloaked: bool) -> Result<Vec<HWND>, Win32Error> {
        Ok(top_level_windows()?
            .into_iter()
            .filter(|&hwnd| unsafe { IsWindowVisible(hwnd) }.as_bool())
            .filter(|&hwnd| !is_tool_window(hwnd) && !has_owner(hwnd))
            .filter(|&hwnd| include_cloaked || !is_cloaked(hwnd))
            .filter(|&hwnd| process_id(hwnd) != self.own_process_id)
            .filter(|&hwnd| {
                let title = window_text(hwnd);
                !title.is_empty() && !is_shell_window(&class_name(hwnd), &title)
            })
            .collect())
    }
}

impl Default for Win32WindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSystem for Win32WindowSystem {
    fn enumerate_visible_windows(&self) -> Result<Vec<VisibleWindow>, WindowSystemError> {
        let windows = self
            .app_windows(false)
            .map_err(|e| WindowSystemError::Unavailable(e.to_string()))?;
        Ok(windows
            .into_iter()
            .filter(|&hwnd| !unsafe { IsIconic(hwnd) }.as_bool())
            .filter_map(|hwnd| {
                let mut rect = RECT::default();
                unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
                Some(VisibleWindow {
                    handle: to_handle(hwnd),
                    rect: to_rect(&rect),
                })
            })
            .collect())
    }

    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, WindowSystemError> {
        let windows = self
            .app_windows(true)
            .map_err(|e| WindowSystemError::Unavailable(e.to_string()))?;
        let mut infos: Vec<WindowInfo> = windows
            .into_iter()
            .filter_map(|hwnd| self.window_info(to_handle(hwnd)).ok())
            .collect();
        infos.sort_by_key(|w| w.title.to_lowercase());
        Ok(infos)
    }

    fn window_geometry(&self, handle: WindowHandle) -> Result<WindowGeometry, WindowSystemError> {
        let hwnd = live_hwnd(handle)?;
        let placement = read_placement(hwnd, handle)?;
        let show_state = if unsafe { IsIconic(hwnd) }.as_bool() {
            ShowState::Minimized
        } else if unsafe { IsZoomed(hwnd) }.as_bool() {
            ShowState::Maximized
        } else {
            ShowState::Normal
        };
        Ok(WindowGeometry {
            rect: to_rect(&placement.rcNormalPosition),
            show_state,
            visible: unsafe { IsWindowVisible(hwnd) }.as_bool() && !is_cloaked(hwnd),
        })
    }

    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo, WindowSystemError> {
        let geometry = self.window_geometry(handle)?;
        let hwnd = to_hwnd(handle);
        Ok(WindowInfo {
            handle,
            title: window_text(hwnd),
            class_name: class_name(hwnd),
            process_id: process_id(hwnd),
            rect: geometry.rect,
            show_state: geometry.show_state,
        })
    }

    fn apply_geometry(
        &self,
        handle: WindowHandle,
        geometry: &WindowGeometry,
    ) -> Result<(), WindowSystemError> {
        let hwnd = live_hwnd(handle)?;

        if !geometry.visible {
            unsafe {
                let _ = ShowWindow(hwnd, SW_HIDE);
            }
            return Ok(());
        }

        // A window left behind on another desktop is cloaked. Hiding it first makes
        // the following show land on the current desktop; the window is not on
        // screen at this point, so the user sees a single change.
        if is_cloaked(hwnd) || !unsafe { IsWindowVisible(hwnd) }.as_bool() {
            unsafe {
                let _ = ShowWindow(hwnd, SW_HIDE);
            }
        }

        let show_cmd = match geometry.show_state {
            ShowState::Normal => SW_SHOWNOACTIVATE,
            ShowState::Minimized => SW_SHOWMINNOACTIVE,
            ShowState::Maximized => SW_SHOWMAXIMIZED,
        };
        let placement = WINDOWPLACEMENT {
            length: mem::size_of::<WINDOWPLACEMENT>() as u32,
            flags: WPF_ASYNCWINDOWPLACEMENT,
            showCmd: show_cmd.0 as u32,
            rcNormalPosition: to_win32_rect(&geometry.rect),
            ..Default::default()
        };

        unsafe { SetWindowPlacement(hwnd, &placement) }.map_err(|e| {
            if unsafe { IsWindow(Some(hwnd)) }.as_bool() {
                WindowSystemError::from(Win32Error::SetPlacementFailed(format!("{handle:#x}: {e}")))
            } else {
                WindowSystemError::NotFound(handle)
            }
        })
    }

    fn enumerate_monitors(&self) -> Result<Vec<MonitorInfo>, WindowSystemError> {
        let mut monitors: Vec<MonitorInfo> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(collect_monitor),
                LPARAM(&mut monitors as *mut Vec<MonitorInfo> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(Win32Error::EnumerationFailed("EnumDisplayMonitors failed".to_string()).into());
        }
        Ok(monitors)
    }
}

unsafe extern "system" fn collect_hwnd(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam.0 as *mut Vec<HWND>);
    handles.push(hwnd);
    TRUE
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let monitors = &mut *(lparam.0 as *mut Vec<MonitorInfo>);

    let mut info: MONITORINFOEXW = mem::zeroed();
    info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut _).as_bool() {
        let device_len = info
            .szDevice
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(info.szDevice.len());
        monitors.push(MonitorInfo::new(
            to_rect(&info.monitorInfo.rcMonitor),
            to_rect(&info.monitorInfo.rcWork),
            info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
            String::from_utf16_lossy(&info.szDevice[..device_len]),
        ));
    }

    TRUE
}

fn top_level_windows() -> Result<Vec<HWND>, Win32Error> {
    let mut handles: Vec<HWND> = Vec::new();
    unsafe {
        EnumWindows(
            Some(collect_hwnd),
            LPARAM(&mut handles as *mut Vec<HWND> as isize),
        )
    }
    .map_err(|e| Win32Error::EnumerationFailed(e.to_string()))?;
    Ok(handles)
}

fn to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle as usize as *mut c_void)
}

fn to_handle(hwnd: HWND) -> WindowHandle {
    hwnd.0 as usize as WindowHandle
}

fn live_hwnd(handle: WindowHandle) -> Result<HWND, Win32Error> {
    let hwnd = to_hwnd(handle);
    if handle == 0 || !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
        return Err(Win32Error::WindowNotFound(handle));
    }
    Ok(hwnd)
}

fn read_placement(hwnd: HWND, handle: WindowHandle) -> Result<WINDOWPLACEMENT, Win32Error> {
    let mut placement = WINDOWPLACEMENT {
        length: mem::size_of::<WINDOWPLACEMENT>() as u32,
        ..Default::default()
    };
    unsafe { GetWindowPlacement(hwnd, &mut placement) }.map_err(|e| {
        if unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            Win32Error::EnumerationFailed(format!("GetWindowPlacement({handle:#x}): {e}"))
        } else {
            Win32Error::WindowNotFound(handle)
        }
    })?;
    Ok(placement)
}

fn to_rect(rect: &RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right - rect.left, rect.bottom - rect.top)
}

fn to_win32_rect(rect: &Rect) -> RECT {
    RECT {
        left: rect.x,
        top: rect.y,
        right: rect.right(),
        bottom: rect.bottom(),
    }
}

fn window_text(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn class_name(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn process_id(hwnd: HWND) -> u32 {
    let mut pid = 0u32;
    unsafe {
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
    }
    pid
}

fn is_tool_window(hwnd: HWND) -> bool {
    let ex_style = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) } as u32;
    ex_style & WS_EX_TOOLWINDOW.0 != 0
}

fn has_owner(hwnd: HWND) -> bool {
    matches!(unsafe { GetWindow(hwnd, GW_OWNER) }, Ok(owner) if !owner.is_invalid())
}

/// DWM cloaks windows that live on another virtual desktop.
fn is_cloaked(hwnd: HWND) -> bool {
    let mut cloaked: u32 = 0;
    let result = unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_CLOAKED,
            &mut cloaked as *mut u32 as *mut c_void,
            mem::size_of::<u32>() as u32,
        )
    };
    result.is_ok() && cloaked != 0
}
