use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tauri::{
    menu::{Menu, MenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    webview::NewWindowResponse,
    AppHandle, Manager, RunEvent, Runtime, WebviewUrl, WebviewWindow, WebviewWindowBuilder,
};
use tauri_plugin_global_shortcut::ShortcutState;

mod host;

use crate::channel::{SurfaceRequest, SurfaceResponse};
use crate::config::KioskConfig;
use crate::lockdown::controller::{self, Controller, ControllerHandle, Hosts};
use crate::lockdown::enforcement::{Disposition, WindowEvent};
use crate::lockdown::session::SessionState;
use crate::navigation::{NavigationFilter, NavigationOrigin, NavigationRequest, ResourceKind};
use crate::platform::{self, DisplaySleepInhibitor};
use host::{ShortcutIds, TauriShortcuts, TauriSurface, TauriWindow};

const WINDOW_LABEL: &str = "main";

/// The only command the webview can invoke; `channel` must be one of the
/// surface request names.
#[tauri::command]
async fn surface_request(
    channel: String,
    payload: Option<serde_json::Value>,
    controller: tauri::State<'_, ControllerHandle>,
) -> Result<SurfaceResponse, String> {
    let request = SurfaceRequest::from_parts(&channel, payload).map_err(|e| format!("{:#}", e))?;
    controller.invoke(request).await.map_err(|e| format!("{:#}", e))
}

fn request_exit<R: Runtime>(app: &AppHandle<R>, handle: ControllerHandle) {
    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        match handle.window_event(WindowEvent::ExitRequested).await {
            Ok(Disposition::Allow) => app.exit(0),
            Ok(Disposition::Veto) => tracing::info!("Exit vetoed while the session is active"),
            Err(e) => {
                tracing::warn!("Controller unavailable, exiting: {:#}", e);
                app.exit(0);
            }
        }
    });
}

fn setup_tray<R: Runtime>(app: &AppHandle<R>, handle: ControllerHandle) -> tauri::Result<()> {
    let show_item = MenuItem::with_id(app, "show", "Show Lockdown Browser", true, None::<&str>)?;
    let exit_item = MenuItem::with_id(app, "exit", "Force Exit (Admin Only)", true, None::<&str>)?;

    let menu = Menu::with_items(app, &[&show_item, &exit_item])?;

    let menu_handle = handle.clone();
    let watcher = handle.clone();
    let mut builder = TrayIconBuilder::new()
        .tooltip("Lockdown Browser - Session Active")
        .menu(&menu)
        .on_menu_event(move |app, event| match event.id().as_ref() {
            "show" => {
                let _ = menu_handle.notify_window(WindowEvent::ShowRequested);
            }
            "exit" => request_exit(app, menu_handle.clone()),
            _ => {}
        })
        .on_tray_icon_event(move |_tray, event| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                let _ = handle.notify_window(WindowEvent::ShowRequested);
            }
        });

    if let Some(icon) = app.default_window_icon() {
        builder = builder.icon(icon.clone());
    }
    let tray = builder.build(app)?;

    tauri::async_runtime::spawn(async move {
        if watcher.wait_for(SessionState::Expired).await.is_ok() {
            let _ = tray.set_tooltip(Some("Lockdown Browser - Session Complete"));
        }
    });

    Ok(())
}

/// Translate window-manager events into controller messages
fn wire_window_events<R: Runtime>(
    window: &WebviewWindow<R>,
    handle: ControllerHandle,
    destroyed: Arc<AtomicBool>,
) {
    let observed = window.clone();
    window.on_window_event(move |event| {
        let reported = match event {
            tauri::WindowEvent::CloseRequested { api, .. } => {
                if handle.is_enforcing() {
                    api.prevent_close();
                }
                Some(WindowEvent::CloseAttempted)
            }
            tauri::WindowEvent::Focused(false) => Some(WindowEvent::FocusLost),
            tauri::WindowEvent::Focused(true) => Some(WindowEvent::FocusGained),
            tauri::WindowEvent::Resized(_) if handle.is_enforcing() => {
                if observed.is_minimized().unwrap_or(false) {
                    Some(WindowEvent::MinimizeAttempted)
                } else if !observed.is_fullscreen().unwrap_or(true) {
                    Some(WindowEvent::FullscreenExitAttempted)
                } else {
                    None
                }
            }
            tauri::WindowEvent::Destroyed => {
                destroyed.store(true, Ordering::SeqCst);
                None
            }
            _ => None,
        };

        if let Some(event) = reported {
            let _ = handle.notify_window(event);
        }
    });
}

fn spawn_controller(controller: Controller) -> Result<()> {
    std::thread::Builder::new()
        .name("lockdown-controller".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to start controller runtime: {}", e);
                    return;
                }
            };
            if let Err(e) = runtime.block_on(controller.run()) {
                tracing::error!("Lockdown controller failed: {:#}", e);
            }
        })?;
    Ok(())
}

/// Run a lockdown session in a native fullscreen webview window
///
/// A second launch while a window is up brings that window forward and exits.
pub fn run(
    config: KioskConfig,
    sleep: Box<dyn DisplaySleepInhibitor>,
    lock_path: PathBuf,
) -> Result<()> {
    let (handle, inbox) = controller::channel();
    let filter = NavigationFilter::new(Arc::new(config.whitelist()?));
    let shortcut_ids: ShortcutIds = Arc::new(Mutex::new(HashMap::new()));

    let pressed_handle = handle.clone();
    let pressed_ids = Arc::clone(&shortcut_ids);
    let relaunch_handle = handle.clone();
    let setup_handle = handle.clone();

    let app = tauri::Builder::default()
        // Must be registered first so a second launch exits before doing anything
        .plugin(tauri_plugin_single_instance::init(move |_app, _argv, _cwd| {
            tracing::info!("Second launch, bringing the display surface forward");
            let _ = relaunch_handle.notify_window(WindowEvent::ShowRequested);
        }))
        .plugin(
            tauri_plugin_global_shortcut::Builder::new()
                .with_handler(move |_app, shortcut, event| {
                    if !matches!(event.state(), ShortcutState::Pressed) {
                        return;
                    }
                    let combo = pressed_ids
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&shortcut.id())
                        .cloned();
                    if let Some(combo) = combo {
                        let _ = pressed_handle.shortcut_pressed(&combo);
                    }
                })
                .build(),
        )
        .manage(handle.clone())
        .invoke_handler(tauri::generate_handler![surface_request])
        .setup(move |app| {
            let lock = platform::acquire_instance_lock(&lock_path)?;
            tracing::info!("Holding instance lock at {}", lock.path().display());
            app.manage(lock);

            let nav_handle = setup_handle.clone();
            let popup_handle = setup_handle.clone();
            let popup_filter = filter.clone();
            let window = WebviewWindowBuilder::new(app, WINDOW_LABEL, WebviewUrl::App("index.html".into()))
                .title("Lockdown Browser")
                .fullscreen(true)
                .always_on_top(true)
                .decorations(false)
                .resizable(false)
                .minimizable(false)
                .maximizable(false)
                .closable(false)
                .visible(false)
                .on_navigation(move |url| {
                    filter.intercept(url.as_str(), ResourceKind::MainFrame, &nav_handle)
                })
                .on_new_window(move |url, _features| {
                    let request =
                        NavigationRequest::new(url.as_str(), NavigationOrigin::NewSurfaceRequest);
                    popup_filter.review(&request, &popup_handle);
                    NewWindowResponse::Deny
                })
                .build()?;

            let destroyed = Arc::new(AtomicBool::new(false));
            wire_window_events(&window, setup_handle.clone(), Arc::clone(&destroyed));
            setup_tray(app.handle(), setup_handle.clone())?;

            let hosts = Hosts {
                window: Box::new(TauriWindow::new(window, destroyed)),
                shortcuts: Box::new(TauriShortcuts::new(app.handle().clone(), shortcut_ids)),
                sleep,
                surface: Box::new(TauriSurface::new(app.handle().clone())),
            };
            let controller = Controller::new(&config, hosts, inbox)?;
            spawn_controller(controller)?;
            setup_handle.surface_ready()?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .map_err(|e| anyhow::anyhow!("Failed to create display surface: {}", e))?;

    app.run(move |_app, event| match event {
        RunEvent::Exit => handle.shutdown(),
        #[cfg(target_os = "macos")]
        RunEvent::Reopen { .. } => {
            let _ = handle.notify_window(WindowEvent::ShowRequested);
        }
        _ => {}
    });

    Ok(())
}
