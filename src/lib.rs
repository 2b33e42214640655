pub mod commands;
pub mod db;
pub mod detection;
pub mod error;
pub mod matching;
pub mod notify;
pub mod pipeline;
pub mod plate;
pub mod session;
pub mod settings;
pub mod stream;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use db::Database;
use detection::DetectionModels;
use log::{info, warn};
use matching::MatchEngine;
use notify::NotificationDispatcher;
use pipeline::FramePipeline;
use session::{MonitorContext, SessionSupervisor};
use settings::Settings;
use stream::{DefaultStreamOpener, StreamOpener};

/// Everything a control-surface call needs, wired once at startup.
pub struct AppState {
    pub settings: Settings,
    pub db: Database,
    pub matcher: MatchEngine,
    pub notifier: Arc<NotificationDispatcher>,
    pub pipeline: Arc<FramePipeline>,
    pub supervisor: SessionSupervisor,
}

impl AppState {
    /// Opens the database and loads the models named by `settings`. Missing
    /// models degrade detection instead of failing startup.
    pub fn initialize(settings: Settings) -> anyhow::Result<Self> {
        let database = Database::new(settings.database_path.clone()).with_context(|| {
            format!(
                "Failed to open database at {}",
                settings.database_path.display()
            )
        })?;

        let models = DetectionModels::load(&settings);
        let readiness = models.readiness();
        if !readiness.detector || !readiness.recognizer {
            warn!(
                "Detection is degraded (detector ready: {}, recognizer ready: {})",
                readiness.detector, readiness.recognizer
            );
        }

        let opener = Arc::new(DefaultStreamOpener::from_settings(&settings));
        Ok(Self::with_parts(settings, database, models, opener))
    }

    pub fn with_parts(
        settings: Settings,
        db: Database,
        models: DetectionModels,
        opener: Arc<dyn StreamOpener>,
    ) -> Self {
        let pipeline = Arc::new(FramePipeline::from_settings(models, &settings));
        let notifier = Arc::new(NotificationDispatcher::new());
        let context = Arc::new(MonitorContext::new(
            pipeline.clone(),
            db.clone(),
            notifier.clone(),
            &settings,
        ));

        info!("Using database {}", db.path().display());

        Self {
            matcher: MatchEngine::new(db.clone()),
            supervisor: SessionSupervisor::new(opener, context),
            settings,
            db,
            notifier,
            pipeline,
        }
    }
}

/// Reads `RUST_LOG`; defaults to `info`.
pub fn init_logging() {
    utils::logging::init();
}
