use std::sync::Arc;

use radio_grade::db::local;
use radio_grade::db::supabase::SupabaseSource;
use radio_grade::grade::file::LocalFileSurface;
use radio_grade::library::local::FolderLibrary;
use radio_grade::library::resolver::LibraryAdapter;
use radio_grade::scheduler::orchestrator::Orchestrator;
use radio_grade::state::EngineState;

#[tokio::main]
async fn main() {
    env_logger::init();

    let data_dir =
        std::env::var("RADIO_GRADE_DATA").unwrap_or_else(|_| "./radio-grade-data".to_string());
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        log::error!("cannot create data dir {data_dir}: {e}");
        std::process::exit(1);
    }
    let db_path = format!("{data_dir}/radio-grade.db");

    let db = match local::init_db(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("cannot open local database {db_path}: {e}");
            std::process::exit(1);
        }
    };

    let settings = match local::load_settings(&db).await {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("settings unavailable, using defaults: {e}");
            Default::default()
        }
    };

    let source = SupabaseSource::new(&settings.supabase_url, &settings.supabase_anon_key);
    if !source.is_configured() {
        // The build still runs; every slot falls through to the wildcard.
        log::warn!("no song-pool source configured, pools will be empty");
    }

    let files = Arc::new(LocalFileSurface);
    let library = LibraryAdapter::new(Arc::new(FolderLibrary::new(
        files.clone(),
        settings.music_folders.clone(),
    )));

    let state = Arc::new(EngineState::new(settings.repetition_window_minutes));
    let orchestrator = Arc::new(Orchestrator::new(
        state,
        db,
        Arc::new(source),
        library,
        None,
        files,
    ));

    log::info!("radio-grade started, auto-build loop running");
    tokio::spawn(orchestrator.clone().run_auto_build());

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("signal handler failed: {e}");
    }
    log::info!("radio-grade stopping");
}
