//! Push events and the per-plan event stream

use crate::error::PushError;
use futures_util::Stream;
use pushflow_core::DeploymentStrategy;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Progress of a single plan, in causal order
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    ApplyingManifest,
    ResourceCreated { guid: String },
    ResourceUpdated { guid: String },
    Uploading { bytes_sent: u64, total: u64 },
    /// 1-based number of the retry about to be made
    RetryUpload { attempt: u32 },
    UploadComplete,
    UploadingDroplet { bytes_sent: u64, total: u64 },
    UploadDropletComplete,
    Staging,
    /// 1-based poll of the staging job
    PollingJob { attempt: u32 },
    RouteMapped { route: String },
    UnmappingRoutes,
    RouteUnmapped { route: String },
    ConfiguringServices,
    /// Every requested service instance is bound
    BoundServices,
    Deploying { strategy: DeploymentStrategy },
    InstancesStarting,
    InstancesReplaced { updated: u32, total: u32 },
    /// Canary is up; the deployment waits to be continued
    AwaitingPromotion { deployment: String },
    Complete,
    Error { cause: PushError },
}

impl PushEvent {
    /// `Complete` and `Error` end a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, PushEvent::Complete | PushEvent::Error { .. })
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushEvent::ApplyingManifest => write!(f, "Applying manifest"),
            PushEvent::ResourceCreated { guid } => write!(f, "Created app {}", guid),
            PushEvent::ResourceUpdated { guid } => write!(f, "Updating app {}", guid),
            PushEvent::Uploading { total, .. } => write!(f, "Uploading {} bytes", total),
            PushEvent::RetryUpload { attempt } => write!(f, "Retrying upload (attempt {})", attempt),
            PushEvent::UploadComplete => write!(f, "Upload complete"),
            PushEvent::UploadingDroplet { total, .. } => {
                write!(f, "Uploading droplet ({} bytes)", total)
            }
            PushEvent::UploadDropletComplete => write!(f, "Droplet upload complete"),
            PushEvent::Staging => write!(f, "Staging"),
            PushEvent::PollingJob { attempt } => write!(f, "Waiting for staging (poll {})", attempt),
            PushEvent::RouteMapped { route } => write!(f, "Mapped route {}", route),
            PushEvent::UnmappingRoutes => write!(f, "Unmapping routes"),
            PushEvent::RouteUnmapped { route } => write!(f, "Unmapped route {}", route),
            PushEvent::ConfiguringServices => write!(f, "Binding services"),
            PushEvent::BoundServices => write!(f, "Services bound"),
            PushEvent::Deploying { strategy } => write!(f, "Starting {} deployment", strategy),
            PushEvent::InstancesStarting => write!(f, "Waiting for instances to start"),
            PushEvent::InstancesReplaced { updated, total } => {
                write!(f, "{} of {} instances replaced", updated, total)
            }
            PushEvent::AwaitingPromotion { deployment } => {
                write!(f, "Canary deployment {} is paused, awaiting promotion", deployment)
            }
            PushEvent::Complete => write!(f, "Complete"),
            PushEvent::Error { cause } => write!(f, "Error: {}", cause),
        }
    }
}

/// Receiving end of one plan's events.
///
/// Closes right after the terminal event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<PushEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<PushEvent>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to the end.
    pub async fn collect(mut self) -> Vec<PushEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
