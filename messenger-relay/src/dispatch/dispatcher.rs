//! Turns worker results into deliveries.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::hosted::HostedMedia;
use super::notices;
use super::pending::{OperationKind, PendingFlags};
use crate::domain::{Artifact, OutputTarget};
use crate::media::MediaKind;
use crate::queue::Job;
use crate::relay::{MediaHost, MessagingRelay};

/// Everything the dispatcher needs to know about the request behind a job.
#[derive(Debug)]
pub struct DeliveryContext {
    pub operation: OperationKind,
    pub media: MediaKind,
    /// Shown to the user ahead of the media.
    pub title: String,
    /// Original location of the content, offered when delivery fails.
    pub source_url: Option<String>,
    /// Stable name used when re-hosting.
    pub identifier: String,
    /// Scratch directory owned by the job, removed after delivery.
    pub scratch: Option<TempDir>,
}

impl DeliveryContext {
    pub fn new(operation: OperationKind, media: MediaKind, identifier: impl Into<String>) -> Self {
        Self {
            operation,
            media,
            title: String::new(),
            source_url: None,
            identifier: identifier.into(),
            scratch: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_scratch(mut self, scratch: TempDir) -> Self {
        self.scratch = Some(scratch);
        self
    }

    /// Output target for the job: the scratch directory when there is one,
    /// otherwise a job-unique path under the system temp directory.
    pub fn output_target(&self) -> OutputTarget {
        match &self.scratch {
            Some(dir) => OutputTarget::Directory(dir.path().to_path_buf()),
            None => {
                let unique = format!("relay-job-{}", uuid::Uuid::new_v4().simple());
                OutputTarget::Directory(std::env::temp_dir().join(unique))
            }
        }
    }

    /// Give the context a scratch directory of its own if it has none, so
    /// concurrent jobs never share output paths.
    fn ensure_scratch(&mut self) {
        if self.scratch.is_some() {
            return;
        }
        match tempfile::Builder::new().prefix("relay-job-").tempdir() {
            Ok(dir) => self.scratch = Some(dir),
            Err(e) => warn!(
                identifier = %self.identifier,
                error = %e,
                "Cannot create job scratch directory"
            ),
        }
    }
}

/// How a result reached the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Local file uploaded as an attachment.
    Attached,
    /// Local file re-hosted and sent by URL.
    Hosted(String),
    /// Remote artifact sent as rich media.
    RemoteDelivered,
    /// Only the source link could be offered.
    PassThrough,
    /// Nothing was delivered; a failure notice was sent.
    Failed,
}

/// Removes the local artifact and scratch directory when dropped.
struct Cleanup {
    file: Option<PathBuf>,
    scratch: Option<TempDir>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Some(file) = self.file.take()
            && let Err(e) = std::fs::remove_file(&file)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %file.display(), error = %e, "Failed to remove artifact");
        }
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

pub struct CallbackDispatcher {
    relay: Arc<dyn MessagingRelay>,
    host: Option<Arc<dyn MediaHost>>,
    pending: Arc<PendingFlags>,
    hosted: HostedMedia,
}

impl CallbackDispatcher {
    pub fn new(
        relay: Arc<dyn MessagingRelay>,
        host: Option<Arc<dyn MediaHost>>,
        pending: Arc<PendingFlags>,
    ) -> Self {
        Self {
            relay,
            host,
            pending,
            hosted: HostedMedia::default(),
        }
    }

    pub fn pending(&self) -> &Arc<PendingFlags> {
        &self.pending
    }

    /// URLs of media this dispatcher re-hosted, by identifier.
    #[cfg(test)]
    pub(crate) fn hosted(&self) -> &HostedMedia {
        &self.hosted
    }

    /// Send the already hosted copy of `identifier`, if one is known.
    ///
    /// Returns `false` when there is no hosted copy or it could not be
    /// delivered; in the latter case the stale entry is dropped and the caller
    /// should fetch the media again.
    pub async fn deliver_hosted(
        &self,
        user_id: &str,
        identifier: &str,
        title: &str,
        media: MediaKind,
    ) -> bool {
        let Some(url) = self.hosted.get(identifier) else {
            return false;
        };

        if !title.is_empty() {
            self.notify(user_id, &notices::delivery_caption(title)).await;
        }
        match self.relay.deliver_remote_media(user_id, &url, media).await {
            Ok(()) => {
                info!(user = %user_id, %identifier, "Delivered previously hosted media");
                true
            }
            Err(e) => {
                warn!(
                    user = %user_id,
                    %identifier,
                    error = %e,
                    "Hosted copy could not be delivered"
                );
                self.hosted.forget(identifier);
                false
            }
        }
    }

    /// Build a job whose completion is delivered to `user_id`.
    pub fn job(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        subject_id: impl Into<String>,
        context: DeliveryContext,
    ) -> Job {
        let dispatcher = Arc::clone(self);
        let user_id = user_id.into();
        let mut context = context;
        context.ensure_scratch();
        let target = context.output_target();
        Job::new(subject_id, target, move |artifact| async move {
            dispatcher.on_result(&user_id, context, artifact).await;
        })
    }

    /// Deliver a job result and release everything the job held.
    pub async fn on_result(
        &self,
        user_id: &str,
        mut context: DeliveryContext,
        artifact: Option<Artifact>,
    ) -> DeliveryOutcome {
        self.pending.release(user_id, context.operation);

        let _cleanup = Cleanup {
            file: artifact
                .as_ref()
                .and_then(Artifact::local_path)
                .map(|p| p.to_path_buf()),
            scratch: context.scratch.take(),
        };

        let outcome = self.deliver(user_id, &context, artifact).await;
        if let DeliveryOutcome::Hosted(url) = &outcome {
            self.hosted.record(&context.identifier, url);
        }
        info!(
            user = %user_id,
            operation = %context.operation,
            outcome = ?outcome,
            "Delivery finished"
        );
        outcome
    }

    async fn deliver(
        &self,
        user_id: &str,
        context: &DeliveryContext,
        artifact: Option<Artifact>,
    ) -> DeliveryOutcome {
        let source = context.source_url.as_deref();
        match artifact {
            None => {
                self.notify(user_id, &notices::failure_with_link(source)).await;
                DeliveryOutcome::Failed
            }
            Some(Artifact::Remote(url)) if Some(url.as_str()) == source => {
                self.notify(user_id, &notices::pass_through(&url)).await;
                DeliveryOutcome::PassThrough
            }
            Some(Artifact::Remote(url)) => {
                self.caption(user_id, context).await;
                match self
                    .relay
                    .deliver_remote_media(user_id, &url, context.media)
                    .await
                {
                    Ok(()) => DeliveryOutcome::RemoteDelivered,
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "Remote media delivery failed");
                        self.notify(user_id, &notices::failure_with_link(source)).await;
                        DeliveryOutcome::Failed
                    }
                }
            }
            Some(Artifact::Local(path)) => {
                self.caption(user_id, context).await;
                match self
                    .relay
                    .deliver_attachment(user_id, &path, context.media)
                    .await
                {
                    Ok(()) => return DeliveryOutcome::Attached,
                    Err(e) => {
                        debug!(user = %user_id, error = %e, "Attachment upload failed, re-hosting");
                    }
                }

                let hosted = match &self.host {
                    Some(host) => host.host(&path, &context.identifier, context.media).await,
                    None => Err(crate::Error::config("no media host configured")),
                };
                let url = match hosted {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "Re-hosting failed");
                        self.notify(user_id, &notices::failure_with_link(source)).await;
                        return DeliveryOutcome::Failed;
                    }
                };

                match self
                    .relay
                    .deliver_remote_media(user_id, &url, context.media)
                    .await
                {
                    Ok(()) => DeliveryOutcome::Hosted(url),
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "Hosted media delivery failed");
                        self.notify(user_id, &notices::failure_with_link(source)).await;
                        DeliveryOutcome::Failed
                    }
                }
            }
        }
    }

    async fn caption(&self, user_id: &str, context: &DeliveryContext) {
        if !context.title.is_empty() {
            self.notify(user_id, &notices::delivery_caption(&context.title))
                .await;
        }
    }

    async fn notify(&self, user_id: &str, text: &str) {
        if let Err(e) = self.relay.deliver_text(user_id, text).await {
            warn!(user = %user_id, error = %e, "Failed to send notice");
        }
    }
}
