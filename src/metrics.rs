use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::error;
use serde::Serialize;

use crate::models::project::Tool;
use crate::models::site_config::CustomStat;
use crate::store::Store;

/// Public dashboard counters. Only published, non-deleted projects count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_projects: usize,
    #[serde(rename = "powerBI")]
    pub power_bi: usize,
    pub tableau: usize,
    pub excel: usize,
    pub total_images: usize,
    pub total_videos: usize,
    pub total_pdfs: usize,
    pub total_documents: usize,
    pub total_media: usize,
    pub experience_years: u32,
    pub custom_stats: Vec<CustomStat>,
}

impl Metrics {
    pub fn calculate(store: &dyn Store) -> Result<Metrics, String> {
        store.projects_readable()?;
        let config = store.config_get();

        let mut m = Metrics {
            experience_years: config.experience,
            custom_stats: config.custom_stats,
            ..Metrics::default()
        };
        for p in store.project_list(false).iter().filter(|p| p.is_published()) {
            m.total_projects += 1;
            match p.tool {
                Tool::PowerBi => m.power_bi += 1,
                Tool::Tableau => m.tableau += 1,
                Tool::Excel => m.excel += 1,
            }
            m.total_images += p.images.len();
            m.total_videos += usize::from(p.video.is_some());
            m.total_pdfs += usize::from(p.pdf.is_some());
            m.total_documents += p.documents.len();
        }
        m.total_media = m.total_images + m.total_videos + m.total_pdfs + m.total_documents;
        Ok(m)
    }
}

/// Memoised metrics. Mutating routes call `invalidate`.
pub struct MetricsCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, Metrics)>>,
}

impl MetricsCache {
    pub fn new(ttl: Duration) -> Self {
        MetricsCache {
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self, store: &dyn Store) -> Metrics {
        self.get_with(store, false)
    }

    pub fn get_with(&self, store: &dyn Store, force_refresh: bool) -> Metrics {
        let mut cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        if !force_refresh {
            if let Some((at, metrics)) = cached.as_ref() {
                if at.elapsed() < self.ttl {
                    return metrics.clone();
                }
            }
        }
        match Metrics::calculate(store) {
            Ok(metrics) => {
                *cached = Some((Instant::now(), metrics.clone()));
                metrics
            }
            Err(e) => {
                error!("Failed to calculate metrics: {}", e);
                Metrics::default()
            }
        }
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}
