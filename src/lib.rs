pub mod error;
pub mod extractor;
pub mod logging;
pub mod model;
pub mod prediction;
pub mod resources;
pub mod session;
pub mod video;

// 学習と推論のコア
#[cfg(feature = "ml")]
pub mod events;
#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod workbench;

#[cfg(feature = "desktop")]
mod session_commands;

pub use error::{Result, SessionError};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use model::AppConfig;
    use session_commands::AppState;
    use tauri::Manager;

    let config_path = AppConfig::default_path();
    let config = AppConfig::load_or_default(&config_path);
    if let Err(e) = logging::init(&config.log_filter) {
        eprintln!("{:#}", e);
    }
    tracing::info!(device = %config.device_type, "アプリケーションを起動します");

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(move |app| {
            let state = AppState::new(app.handle().clone(), config, config_path);
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            session_commands::session_status,
            session_commands::add_class,
            session_commands::attach_camera,
            session_commands::start_collecting,
            session_commands::stop_collecting,
            session_commands::train_model,
            session_commands::toggle_prediction,
            session_commands::export_bundle,
            session_commands::reset_session,
            session_commands::preview_frame,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
