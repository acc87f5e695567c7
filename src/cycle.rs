//! Poll cycle orchestration.
//!
//! One cycle reads the host state, derives every active stream fact and
//! hands each fact to the change-gated publisher, then makes sure discovery
//! has been announced. The publish cache and discovery latch live here and
//! persist across cycles for the lifetime of the [`Orchestrator`].
//!
//! Cycles never overlap: [`Orchestrator::tick`] returns
//! [`TickOutcome::Skipped`] while another cycle is still running.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::BridgeConfig;
use crate::discovery::{CameraRef, DiscoveryAnnouncer, DiscoveryLatch};
use crate::host::{DeviceRegistry, EntityProvider, SettingsProvider};
use crate::matcher::{
    active_clients, all_streams, camera_entries, match_entity_streams, StreamDetail, StreamInfo,
};
use crate::publisher::{Broker, ChangeGatedPublisher, PublishCache, PublishOutcome};
use crate::topics::TopicNamer;

/// State carried from one cycle to the next.
#[derive(Debug, Default)]
pub struct CycleState {
    pub cache: PublishCache,
    pub latch: DiscoveryLatch,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cameras: usize,
    pub whitelisted: usize,
    pub total_active: u64,
    pub published: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub discovery_published: usize,
}

impl CycleReport {
    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.published += 1,
            PublishOutcome::Unchanged => self.unchanged += 1,
            PublishOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(CycleReport),
    /// A previous cycle was still running.
    Skipped,
    Failed,
}

/// External collaborators a cycle reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub settings: Arc<dyn SettingsProvider>,
    pub entities: Arc<dyn EntityProvider>,
    pub broker: Arc<dyn Broker>,
}

pub struct Orchestrator {
    collaborators: Collaborators,
    namer: TopicNamer,
    announcer: Option<DiscoveryAnnouncer>,
    whitelist: Vec<String>,
    running: AtomicBool,
    state: Mutex<CycleState>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, cfg: &BridgeConfig) -> Self {
        let namer = TopicNamer::new(cfg.state_prefix.clone(), cfg.discovery_prefix.clone());
        let announcer = cfg
            .discovery
            .then(|| DiscoveryAnnouncer::new(namer.clone()));
        Self {
            collaborators,
            namer,
            announcer,
            whitelist: cfg.cameras.clone(),
            running: AtomicBool::new(false),
            state: Mutex::new(CycleState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one cycle unless one is already in flight. Errors are logged.
    pub fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("previous cycle still running; skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match self.run_cycle() {
            Ok(report) => {
                if report.published > 0 || report.failed > 0 || report.discovery_published > 0 {
                    log::info!(
                        "cycle: {} cameras ({} whitelisted), {} active, {} published, {} failed",
                        report.cameras,
                        report.whitelisted,
                        report.total_active,
                        report.published,
                        report.failed
                    );
                } else {
                    log::debug!("cycle: no changes ({} facts)", report.unchanged);
                }
                TickOutcome::Completed(report)
            }
            Err(e) => {
                log::error!("active streams cycle failed: {:#}", e);
                TickOutcome::Failed
            }
        }
    }

    fn run_cycle(&self) -> Result<CycleReport> {
        let c = &self.collaborators;
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("cycle state lock poisoned"))?;
        let state = &mut *state;

        let cameras: Vec<_> = c
            .registry
            .list_devices()
            .context("failed to list devices")?
            .into_iter()
            .filter(|device| device.is_camera())
            .collect();
        let entities = c
            .entities
            .tracked_entities()
            .context("failed to read tracked entities")?;
        let settings = c
            .settings
            .get_settings()
            .context("failed to read adaptive streaming settings")?;

        let mut report = CycleReport {
            cameras: cameras.len(),
            ..CycleReport::default()
        };
        let mut publisher = ChangeGatedPublisher::new(c.broker.as_ref(), &mut state.cache);
        let mut entity_streams: Vec<Vec<StreamInfo>> = vec![Vec::new(); entities.len()];
        let mut camera_refs = Vec::with_capacity(cameras.len());

        for camera in &cameras {
            let name = match c.registry.get_device(&camera.id) {
                Ok(details) => details.name,
                Err(e) => {
                    log::warn!(
                        "failed to read camera {}: {:#}; using listed name '{}'",
                        camera.id,
                        e,
                        camera.name
                    );
                    camera.name.clone()
                }
            };
            let whitelisted = self.whitelist.contains(&camera.id);
            let entries = camera_entries(&settings, &name);
            let active = active_clients(entries.iter().copied());
            let mut camera_streams = Vec::new();

            for (idx, entity) in entities.iter().enumerate() {
                let streams = match_entity_streams(entries.iter().copied(), &entity.ips);
                if whitelisted {
                    let topics = self.namer.topics(Some(camera.id.as_str()), Some(entity.name.as_str()));
                    let outcome = publisher.publish(
                        &topics,
                        !streams.is_empty(),
                        &StreamDetail::new(streams.clone()),
                    );
                    report.count(outcome);
                }
                camera_streams.extend(streams.iter().cloned());
                entity_streams[idx].extend(streams);
            }

            if whitelisted {
                report.whitelisted += 1;
                let topics = self.namer.topics(Some(camera.id.as_str()), None);
                let outcome = publisher.publish(&topics, active, &StreamDetail::new(camera_streams));
                report.count(outcome);
            }

            report.total_active += active;
            camera_refs.push(CameraRef {
                id: camera.id.clone(),
                name,
            });
        }

        for (entity, streams) in entities.iter().zip(entity_streams) {
            let topics = self.namer.topics(None, Some(entity.name.as_str()));
            let count = streams.len() as u64;
            let outcome = publisher.publish(&topics, count, &StreamDetail::new(streams));
            report.count(outcome);
        }

        // The global figure counts every camera, whitelisted or not.
        let topics = self.namer.topics(None, None);
        let outcome = publisher.publish(
            &topics,
            report.total_active,
            &StreamDetail::new(all_streams(&settings)),
        );
        report.count(outcome);

        if let Some(announcer) = &self.announcer {
            let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
            report.discovery_published = announcer
                .announce(
                    &mut state.latch,
                    c.broker.as_ref(),
                    &camera_refs,
                    &self.whitelist,
                    &names,
                )
                .context("discovery announcement failed")?;
        }

        Ok(report)
    }
}
