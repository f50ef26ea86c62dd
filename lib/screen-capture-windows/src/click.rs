//! Mouse-down detection feeding the click indicators.

use screen_capture::{ClickDetectionMode, ClickDetector, ClickState, MouseButton};
use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use windows::Win32::{
    Foundation::{LPARAM, LRESULT, WPARAM},
    System::Threading::{GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_LOWEST},
    UI::{
        Input::KeyboardAndMouse::{GetAsyncKeyState, VK_LBUTTON, VK_RBUTTON},
        WindowsAndMessaging::{
            CallNextHookEx, DispatchMessageW, HC_ACTION, MSG, PM_REMOVE, PeekMessageW,
            SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, WH_MOUSE_LL,
            WM_LBUTTONDOWN, WM_RBUTTONDOWN,
        },
    },
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

thread_local! {
    static HOOK_TARGET: RefCell<Option<Arc<ClickState>>> = const { RefCell::new(None) };
}

fn key_down(key: u16) -> bool {
    (unsafe { GetAsyncKeyState(key as i32) } as u16 & 0x8000) != 0
}

pub fn spawn_click_detector(
    mode: ClickDetectionMode,
    state: Arc<ClickState>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_LOWEST) } {
            log::debug!("lower click detection thread priority failed: {e}");
        }

        match mode {
            ClickDetectionMode::Polling => poll_buttons(&state, &stop),
            ClickDetectionMode::Hook => {
                if let Err(e) = run_mouse_hook(state.clone(), &stop) {
                    log::warn!("mouse hook unavailable, polling instead: {e}");
                    poll_buttons(&state, &stop);
                }
            }
        }

        log::info!("click detection thread exit");
    })
}

fn poll_buttons(state: &ClickState, stop: &AtomicBool) {
    let mut detector = ClickDetector::default();
    while !stop.load(Ordering::Relaxed) {
        if let Some(button) = detector.sample(key_down(VK_LBUTTON.0), key_down(VK_RBUTTON.0)) {
            state.record_click(button);
        }
        spin_sleep::sleep(POLL_INTERVAL);
    }
}

unsafe extern "system" fn mouse_hook(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let button = match wparam.0 as u32 {
            WM_LBUTTONDOWN => Some(MouseButton::Left),
            WM_RBUTTONDOWN => Some(MouseButton::Right),
            _ => None,
        };

        if let Some(button) = button {
            HOOK_TARGET.with_borrow(|target| {
                if let Some(state) = target {
                    state.record_click(button);
                }
            });
        }
    }

    unsafe { CallNextHookEx(None, code, wparam, lparam) }
}

fn run_mouse_hook(state: Arc<ClickState>, stop: &AtomicBool) -> windows::core::Result<()> {
    HOOK_TARGET.set(Some(state));
    let hook = unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook), None, 0) }?;

    let mut msg = MSG::default();
    while !stop.load(Ordering::Relaxed) {
        while unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.as_bool() {
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        spin_sleep::sleep(POLL_INTERVAL);
    }

    if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
        log::warn!("UnhookWindowsHookEx failed: {e}");
    }
    HOOK_TARGET.set(None);
    Ok(())
}
