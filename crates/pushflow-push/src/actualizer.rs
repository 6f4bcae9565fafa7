//! Plan actualization
//!
//! The [`Actualizer`] runs one [`PushPlan`] on its own task:
//!
//! ```text
//! Validating -> Applying -> Uploading -> Staging -> Polling
//!            -> RouteBinding -> RouteUnbinding -> ServiceBinding
//!            -> Deploying -> Complete
//! ```
//!
//! A prebuilt droplet skips `Staging`: it is uploaded, waited on, and
//! handed to the deployment as is.
//!
//! Any state can end in `Error`. Exactly one terminal event is sent, then
//! the event stream closes. Cancellation and the overall command deadline
//! race every step.

use crate::cancel::CancelSignal;
use crate::change::Change;
use crate::error::{PushError, ResolutionError, Result, StagingError, TimeoutError};
use crate::event::{EventStream, PushEvent};
use crate::plan::{PushPlan, RouteBinding};
use crate::sink::{ProgressSink, WarningsCollector};
use crate::strategy::{DeploymentContext, create_executor};
use pushflow_cloud::{
    CloudError, ControlPlane, JobRef, JobStatus, PackageKind, ProgressCallback, Reply, Route,
};
use pushflow_config::PushConfig;
use pushflow_core::{ValidationError, Warnings};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;

/// Upload attempts before giving up on retryable failures
pub const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Timeouts and limits of one actualization
#[derive(Debug, Clone)]
pub struct ActualizeConfig {
    pub staging_timeout: Duration,
    /// Bounds both instance startup and deployments
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Overall command deadline
    pub deadline: Option<Instant>,
    pub upload_attempts: u32,
    pub event_capacity: usize,
    pub docker_password: Option<String>,
}

impl Default for ActualizeConfig {
    fn default() -> Self {
        Self::from(&PushConfig::default())
    }
}

impl From<&PushConfig> for ActualizeConfig {
    fn from(config: &PushConfig) -> Self {
        Self {
            staging_timeout: config.staging_timeout,
            startup_timeout: config.startup_timeout,
            poll_interval: config.poll_interval,
            deadline: None,
            upload_attempts: DEFAULT_UPLOAD_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            docker_password: config.docker_password.clone(),
        }
    }
}

impl ActualizeConfig {
    /// Give up on everything once `timeout` has elapsed from now.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validating,
    Applying,
    Uploading,
    Staging,
    RouteBinding,
    RouteUnbinding,
    ServiceBinding,
    Deploying,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validating => "validating",
            Phase::Applying => "applying",
            Phase::Uploading => "uploading",
            Phase::Staging => "staging",
            Phase::RouteBinding => "route-binding",
            Phase::RouteUnbinding => "route-unbinding",
            Phase::ServiceBinding => "service-binding",
            Phase::Deploying => "deploying",
        };
        f.write_str(name)
    }
}

/// Sends events to both the sink and the plan's stream
pub(crate) struct Emitter {
    tx: mpsc::Sender<PushEvent>,
    sink: Arc<dyn ProgressSink>,
}

impl Emitter {
    pub(crate) async fn emit(&self, event: PushEvent) {
        tracing::debug!("Event: {}", event);
        // a dropped stream must not stop the push
        let _ = self.tx.send(event.clone()).await;
        self.sink.on_event(&event);
    }

    fn progress(&self) -> ProgressCallback {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |sent, total| sink.on_bytes_transferred(sent, total))
    }
}

/// Executes push plans against a control plane
#[derive(Clone)]
pub struct Actualizer {
    control_plane: Arc<dyn ControlPlane>,
    config: ActualizeConfig,
}

impl Actualizer {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: ActualizeConfig) -> Self {
        Self {
            control_plane,
            config,
        }
    }

    pub fn config(&self) -> &ActualizeConfig {
        &self.config
    }

    /// Start actualizing `plan` on a new task.
    ///
    /// Events go to `sink` as they happen and to the returned stream, which
    /// ends after exactly one `Complete` or `Error`. The stream is bounded:
    /// drain it or drop it.
    pub fn actualize(
        &self,
        plan: PushPlan,
        sink: Arc<dyn ProgressSink>,
        warnings: WarningsCollector,
        cancel: CancelSignal,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.event_capacity.max(1));
        let run = Run {
            control_plane: Arc::clone(&self.control_plane),
            config: self.config.clone(),
            emitter: Emitter { tx, sink },
            warnings,
        };
        let span = tracing::info_span!("actualize", app = %plan.app_name());
        tokio::spawn(run.drive(plan, cancel).instrument(span));
        EventStream::new(rx)
    }
}

struct Run {
    control_plane: Arc<dyn ControlPlane>,
    config: ActualizeConfig,
    emitter: Emitter,
    warnings: WarningsCollector,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Run {
    async fn drive(self, plan: PushPlan, mut cancel: CancelSignal) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PushError::Cancelled),
            _ = until(self.config.deadline) => Err(TimeoutError::CommandDeadline.into()),
            result = self.execute(&plan) => result,
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Push of {} complete", plan.app_name());
                self.emitter.emit(PushEvent::Complete).await;
            }
            Err(cause) => {
                tracing::warn!("Push of {} failed ({}): {}", plan.app_name(), cause.kind(), cause);
                self.emitter.emit(PushEvent::Error { cause }).await;
            }
        }
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!("Entering {}", phase);
    }

    fn record(&self, warnings: Warnings) {
        self.warnings.extend(warnings);
    }

    async fn execute(&self, plan: &PushPlan) -> Result<()> {
        self.enter(Phase::Validating);
        self.validate(plan)?;

        self.enter(Phase::Applying);
        let app_guid = self.apply(plan).await?;

        let package = if plan.needs_package_upload() {
            self.enter(Phase::Uploading);
            Some(self.upload(plan, &app_guid).await?)
        } else {
            None
        };

        let droplet = if plan.needs_droplet_upload() {
            self.enter(Phase::Uploading);
            Some(self.upload_droplet(plan, &app_guid).await?)
        } else {
            match package {
                Some(package) if plan.needs_restage() && !plan.no_start() => {
                    self.enter(Phase::Staging);
                    Some(self.stage(plan, &package).await?)
                }
                _ => None,
            }
        };

        if plan.needs_route_changes() {
            self.enter(Phase::RouteBinding);
            self.bind_routes(plan, &app_guid).await?;
        }

        if plan.needs_route_unmapping() {
            self.enter(Phase::RouteUnbinding);
            self.unmap_routes(plan, &app_guid).await?;
        }

        if plan.needs_service_bindings() {
            self.enter(Phase::ServiceBinding);
            self.bind_services(plan, &app_guid).await?;
        }

        if !plan.no_start() && plan.needs_restart() {
            self.enter(Phase::Deploying);
            self.deploy(plan, &app_guid, droplet.as_deref()).await?;
        }
        Ok(())
    }

    fn validate(&self, plan: &PushPlan) -> Result<()> {
        let app = plan.app();
        match &app.docker {
            Some(docker) => {
                if docker.image.trim().is_empty() {
                    return Err(ValidationError::RequiredFlag {
                        flag: "--docker-image".to_string(),
                        required_by: "docker".to_string(),
                    }
                    .into());
                }
                let has_password =
                    docker.password.is_some() || self.config.docker_password.is_some();
                if docker.username.is_some() && !has_password {
                    return Err(ValidationError::DockerPasswordNotSet {
                        app: app.name.clone(),
                    }
                    .into());
                }
            }
            None => {
                if plan.needs_package_upload() && plan.bits().is_none() {
                    return Err(PushError::Bits(format!(
                        "no archive was prepared for '{}'",
                        app.name
                    )));
                }
                if plan.needs_droplet_upload() && plan.droplet().is_none() {
                    return Err(PushError::Bits(format!(
                        "no droplet was read for '{}'",
                        app.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create or confirm the app, then push its settings.
    async fn apply(&self, plan: &PushPlan) -> Result<String> {
        self.emitter.emit(PushEvent::ApplyingManifest).await;

        let app_guid = match plan.app_guid() {
            Some(guid) => {
                self.emitter
                    .emit(PushEvent::ResourceUpdated {
                        guid: guid.to_string(),
                    })
                    .await;
                guid.to_string()
            }
            None => self.create(plan).await?,
        };

        let ((), w) = self
            .control_plane
            .apply_manifest(&app_guid, plan.app())
            .await?;
        self.record(w);

        if let Some(scale) = plan.changes().scale() {
            let ((), w) = self
                .control_plane
                .scale_process(&app_guid, "web", scale)
                .await?;
            self.record(w);
        }
        Ok(app_guid)
    }

    async fn create(&self, plan: &PushPlan) -> Result<String> {
        let space_guid = &plan.target().space_guid;
        match self.control_plane.create_app(space_guid, plan.app()).await {
            Ok((remote, w)) => {
                self.record(w);
                tracing::info!("Created app {} ({})", remote.name, remote.guid);
                self.emitter
                    .emit(PushEvent::ResourceCreated {
                        guid: remote.guid.clone(),
                    })
                    .await;
                Ok(remote.guid)
            }
            Err(err) if err.is_already_exists() => {
                tracing::debug!("{} already exists, updating it", plan.app_name());
                let (existing, w) = self
                    .control_plane
                    .lookup_app(space_guid, plan.app_name())
                    .await?;
                self.record(w);
                let remote = existing.ok_or(PushError::Api(err))?;
                self.emitter
                    .emit(PushEvent::ResourceUpdated {
                        guid: remote.guid.clone(),
                    })
                    .await;
                Ok(remote.guid)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create the package; returns its guid.
    async fn upload(&self, plan: &PushPlan, app_guid: &str) -> Result<String> {
        if let Some(docker) = &plan.app().docker {
            let kind = PackageKind::Docker {
                image: docker.image.clone(),
                username: docker.username.clone(),
                password: docker
                    .password
                    .clone()
                    .or_else(|| self.config.docker_password.clone()),
            };
            let (package, w) = self.control_plane.create_package(app_guid, &kind).await?;
            self.record(w);
            return Ok(package.guid);
        }

        let bits = plan.bits().ok_or_else(|| {
            PushError::Bits(format!("no archive was prepared for '{}'", plan.app_name()))
        })?;
        let (package, w) = self
            .control_plane
            .create_package(app_guid, &PackageKind::Bits)
            .await?;
        self.record(w);

        let total = bits.size();
        self.emitter
            .emit(PushEvent::Uploading {
                bytes_sent: 0,
                total,
            })
            .await;

        let control_plane = self.control_plane.as_ref();
        let package_guid = package.guid.as_str();
        let progress = self.emitter.progress();
        self.retry_upload(move || {
            control_plane.upload_bits(package_guid, bits.bytes.clone(), Arc::clone(&progress))
        })
        .await?;

        self.emitter.emit(PushEvent::UploadComplete).await;
        Ok(package.guid)
    }

    /// Upload the prebuilt droplet; returns its guid once it is processed.
    async fn upload_droplet(&self, plan: &PushPlan, app_guid: &str) -> Result<String> {
        let droplet = plan.droplet().ok_or_else(|| {
            PushError::Bits(format!("no droplet was read for '{}'", plan.app_name()))
        })?;
        let (created, w) = self.control_plane.create_droplet(app_guid).await?;
        self.record(w);

        self.emitter
            .emit(PushEvent::UploadingDroplet {
                bytes_sent: 0,
                total: droplet.size(),
            })
            .await;

        let control_plane = self.control_plane.as_ref();
        let droplet_guid = created.guid.as_str();
        let progress = self.emitter.progress();
        let job = self
            .retry_upload(move || {
                control_plane.upload_droplet(
                    droplet_guid,
                    droplet.bytes.clone(),
                    Arc::clone(&progress),
                )
            })
            .await?;
        self.emitter.emit(PushEvent::UploadDropletComplete).await;

        let app = plan.app_name();
        let timeout = self.config.staging_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let (status, w) = self.control_plane.poll_job(&job).await?;
            self.record(w);
            match status {
                JobStatus::Succeeded { droplet } => {
                    let guid = droplet.unwrap_or(created.guid);
                    tracing::info!("Uploaded droplet {} for {}", guid, app);
                    return Ok(guid);
                }
                JobStatus::Failed { reason } => {
                    return Err(StagingError::DropletFailed {
                        app: app.to_string(),
                        reason,
                    }
                    .into());
                }
                JobStatus::Processing if Instant::now() >= deadline => {
                    return Err(TimeoutError::Staging {
                        app: app.to_string(),
                        timeout,
                    }
                    .into());
                }
                JobStatus::Processing => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Run `upload` until it succeeds. Interrupted streams are retried up
    /// to the configured number of attempts.
    async fn retry_upload<T, F, Fut>(&self, mut upload: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Reply<T>>,
    {
        let attempts = self.config.upload_attempts.max(1);
        let mut attempt = 1;
        loop {
            match upload().await {
                Ok((value, w)) => {
                    self.record(w);
                    return Ok(value);
                }
                Err(err) if err.is_retryable_upload() && attempt < attempts => {
                    tracing::warn!("Upload attempt {} of {} failed: {}", attempt, attempts, err);
                    self.emitter.emit(PushEvent::RetryUpload { attempt }).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable_upload() => {
                    return Err(PushError::UploadFailed {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Stage the package; returns the droplet guid.
    async fn stage(&self, plan: &PushPlan, package_guid: &str) -> Result<String> {
        let app = plan.app_name();
        let timeout = self.config.staging_timeout;
        let deadline = Instant::now() + timeout;
        let timed_out = || -> PushError {
            TimeoutError::Staging {
                app: app.to_string(),
                timeout,
            }
            .into()
        };

        let package_job = JobRef::package(package_guid);
        loop {
            let (status, w) = self.control_plane.poll_job(&package_job).await?;
            self.record(w);
            match status {
                JobStatus::Succeeded { .. } => break,
                JobStatus::Failed { reason } => {
                    return Err(StagingError::PackageFailed {
                        app: app.to_string(),
                        reason,
                    }
                    .into());
                }
                JobStatus::Processing if Instant::now() >= deadline => return Err(timed_out()),
                JobStatus::Processing => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        self.emitter.emit(PushEvent::Staging).await;
        let (build, w) = self.control_plane.create_build(package_guid).await?;
        self.record(w);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.emitter.emit(PushEvent::PollingJob { attempt }).await;
            let (status, w) = self.control_plane.poll_job(&build).await?;
            self.record(w);

            match status {
                JobStatus::Succeeded {
                    droplet: Some(droplet),
                } => {
                    tracing::info!("Staged {} into droplet {}", app, droplet);
                    return Ok(droplet);
                }
                JobStatus::Succeeded { droplet: None } => {
                    return Err(StagingError::BuildFailed {
                        app: app.to_string(),
                        reason: "build finished without a droplet".to_string(),
                    }
                    .into());
                }
                JobStatus::Failed { reason } => {
                    return Err(StagingError::BuildFailed {
                        app: app.to_string(),
                        reason,
                    }
                    .into());
                }
                JobStatus::Processing => {}
            }

            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn bind_routes(&self, plan: &PushPlan, app_guid: &str) -> Result<()> {
        for binding in plan.routes().iter().filter(|b| !b.mapped) {
            let route_guid = match &binding.route_guid {
                Some(guid) => guid.clone(),
                None => self.create_route(plan, binding).await?.guid,
            };
            let ((), w) = self.control_plane.map_route(app_guid, &route_guid).await?;
            self.record(w);
            self.emitter
                .emit(PushEvent::RouteMapped {
                    route: binding.url(),
                })
                .await;
        }
        Ok(())
    }

    async fn unmap_routes(&self, plan: &PushPlan, app_guid: &str) -> Result<()> {
        self.emitter.emit(PushEvent::UnmappingRoutes).await;
        for route in plan.unmap_routes() {
            let ((), w) = self
                .control_plane
                .unmap_route(app_guid, &route.guid)
                .await?;
            self.record(w);
            self.emitter
                .emit(PushEvent::RouteUnmapped { route: route.url() })
                .await;
        }
        Ok(())
    }

    async fn bind_services(&self, plan: &PushPlan, app_guid: &str) -> Result<()> {
        self.emitter.emit(PushEvent::ConfiguringServices).await;
        for instance in plan.services() {
            match self
                .control_plane
                .bind_service(app_guid, &instance.guid)
                .await
            {
                Ok(((), w)) => self.record(w),
                Err(err) if err.is_already_exists() => {
                    tracing::debug!("{} is already bound to {}", instance.name, plan.app_name());
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.emitter.emit(PushEvent::BoundServices).await;
        Ok(())
    }

    async fn create_route(&self, plan: &PushPlan, binding: &RouteBinding) -> Result<Route> {
        let space_guid = &plan.target().space_guid;
        match self
            .control_plane
            .create_route(space_guid, &binding.query)
            .await
        {
            Ok((route, w)) => {
                self.record(w);
                Ok(route)
            }
            Err(err) if err.is_already_exists() => {
                let (existing, w) = self.control_plane.find_route(&binding.query).await?;
                self.record(w);
                match existing {
                    Some(route) if route.space_guid != *space_guid => {
                        Err(ResolutionError::RouteInOtherSpace {
                            route: binding.url(),
                        }
                        .into())
                    }
                    Some(route) => Ok(route),
                    None => Err(PushError::Api(err)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn deploy(&self, plan: &PushPlan, app_guid: &str, droplet: Option<&str>) -> Result<()> {
        let executor = create_executor(plan.effective_strategy());
        tracing::info!(
            "Deploying {} with strategy {}",
            plan.app_name(),
            executor.strategy()
        );
        let ctx = DeploymentContext {
            control_plane: self.control_plane.as_ref(),
            app_name: plan.app_name(),
            app_guid,
            droplet,
            start: plan.changes().any(|c| matches!(c, Change::Start)),
            config: &self.config,
            emitter: &self.emitter,
            warnings: &self.warnings,
        };
        executor.execute(&ctx).await
    }
}

/// Best-effort cleanup call whose failure is only logged
pub(crate) fn log_cleanup_failure(what: &str, err: &CloudError) {
    tracing::warn!("Could not {}: {}", what, err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_push_config() {
        let push = PushConfig {
            staging_timeout: Duration::from_secs(60),
            docker_password: Some("secret".into()),
            ..PushConfig::default()
        };
        let config = ActualizeConfig::from(&push);
        assert_eq!(config.staging_timeout, Duration::from_secs(60));
        assert_eq!(config.upload_attempts, DEFAULT_UPLOAD_ATTEMPTS);
        assert_eq!(config.docker_password.as_deref(), Some("secret"));
        assert!(config.deadline.is_none());
    }

    /// Checks, as each event reaches the sink, that the stream already has it
    struct StreamFirst {
        rx: std::sync::Mutex<mpsc::Receiver<PushEvent>>,
        in_order: std::sync::Mutex<Vec<bool>>,
    }

    impl ProgressSink for StreamFirst {
        fn on_event(&self, event: &PushEvent) {
            let queued = self.rx.lock().unwrap().try_recv().ok();
            self.in_order.lock().unwrap().push(queued.as_ref() == Some(event));
        }
    }

    #[tokio::test]
    async fn test_stream_receives_event_before_sink() {
        let (tx, rx) = mpsc::channel(4);
        let sink = Arc::new(StreamFirst {
            rx: std::sync::Mutex::new(rx),
            in_order: std::sync::Mutex::new(Vec::new()),
        });
        let emitter = Emitter {
            tx,
            sink: Arc::clone(&sink) as Arc<dyn ProgressSink>,
        };

        emitter.emit(PushEvent::ApplyingManifest).await;
        emitter.emit(PushEvent::Complete).await;
        assert_eq!(*sink.in_order.lock().unwrap(), vec![true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline() {
        let config = ActualizeConfig::default().with_deadline(Duration::from_secs(10));
        let deadline = config.deadline.unwrap();
        assert_eq!(deadline - Instant::now(), Duration::from_secs(10));
    }
}
