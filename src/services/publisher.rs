//! Publish orchestrator.
//!
//! One run: locate assets, resolve metadata, cut a thumbnail, then drive the
//! video host, the object store and the social platform strictly in that
//! order. Leg failures are accumulated into the [`PublishResult`]; only
//! pre-flight problems come back as `Err`.

use crate::{
    errors::PipelineError,
    models::{
        asset::AssetBundle,
        metadata::ResolvedMetadata,
        request::{PublishRequest, date_segments},
        result::{LegErrorKind, PublishResult, Stage},
    },
    platforms::{ObjectStore, ReelMedia, ReelRequest, SocialPublisher, VideoHost},
    services::{
        locator::AssetLocator,
        resolver::MetadataResolver,
        thumbnail::{FrameExtractor, THUMBNAIL_FILE_NAME},
    },
};
use bytes::Bytes;
use chrono::NaiveDate;
use std::{ops::ControlFlow, path::PathBuf, sync::Arc};
use tokio::fs;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Prefix of every object written to the store.
pub const OBJECT_PREFIX: &str = "video_assets";

/// `video_assets/<YYYY>/<MM>/<DD>/<file_name>`
pub fn object_path(date: NaiveDate, file_name: &str) -> String {
    format!("{}/{}/{}", OBJECT_PREFIX, date_segments(date), file_name)
}

/// The three platform adapters a run publishes to.
#[derive(Clone)]
pub struct PublishTargets {
    pub video_host: Arc<dyn VideoHost>,
    pub object_store: Arc<dyn ObjectStore>,
    pub social: Arc<dyn SocialPublisher>,
}

pub struct Publisher {
    locator: AssetLocator,
    resolver: MetadataResolver,
    extractor: Arc<dyn FrameExtractor>,
    targets: PublishTargets,
    /// Used when the metadata names no bucket.
    default_bucket: Option<String>,
}

impl Publisher {
    pub fn new(
        locator: AssetLocator,
        resolver: MetadataResolver,
        extractor: Arc<dyn FrameExtractor>,
        targets: PublishTargets,
        default_bucket: Option<String>,
    ) -> Self {
        Self {
            locator,
            resolver,
            extractor,
            targets,
            default_bucket: default_bucket.filter(|b| !b.trim().is_empty()),
        }
    }

    pub fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    pub async fn run(&self, request: &PublishRequest) -> Result<PublishResult, PipelineError> {
        let span = info_span!("publish", run_id = %Uuid::new_v4(), date = %request.date);
        self.execute(request).instrument(span).await
    }

    async fn execute(&self, request: &PublishRequest) -> Result<PublishResult, PipelineError> {
        let bundle = self.locator.locate(request)?;
        let metadata = self.resolver.resolve_files(
            bundle.metadata_path.as_deref(),
            request.metadata_override.as_deref(),
        )?;

        let mut result = PublishResult::new(request.date, bundle.file_name());
        let thumbnail = self.thumbnail(&bundle, &metadata, &mut result).await;

        if self
            .video_host_leg(&bundle, &metadata, thumbnail, &mut result)
            .await
            .is_break()
        {
            return Ok(result);
        }
        self.object_store_leg(request.date, &bundle, &metadata, &mut result)
            .await;
        self.social_leg(&bundle, &metadata, &mut result).await;

        info!(errors = result.errors.len(), ignored = result.ignored.len(), "publish run finished");
        Ok(result)
    }

    async fn thumbnail(
        &self,
        bundle: &AssetBundle,
        metadata: &ResolvedMetadata,
        result: &mut PublishResult,
    ) -> Option<PathBuf> {
        let output = bundle.folder.join(THUMBNAIL_FILE_NAME);
        match self
            .extractor
            .extract(
                &bundle.video_path,
                metadata.social.thumb_offset_seconds,
                &output,
            )
            .await
        {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("continuing without thumbnail: {}", err);
                result.record_ignored(None, format!("thumbnail: {err}"));
                None
            }
        }
    }

    /// `Break` when the failure must stop the whole run.
    async fn video_host_leg(
        &self,
        bundle: &AssetBundle,
        metadata: &ResolvedMetadata,
        thumbnail: Option<PathBuf>,
        result: &mut PublishResult,
    ) -> ControlFlow<()> {
        match self
            .targets
            .video_host
            .upload(
                &bundle.video_path,
                &metadata.video_host,
                thumbnail.as_deref(),
            )
            .await
        {
            Ok(upload) => {
                if let Err(ignored) = upload.thumbnail {
                    result.record_ignored(Some(Stage::VideoHost), ignored.reason);
                }
                result.video_host_id = Some(upload.id);
                result.watch_url = Some(upload.watch_url);
                ControlFlow::Continue(())
            }
            Err(err) if err.is_auth_failure() => {
                error!("video host authentication failed, aborting run: {}", err);
                result.record_error(Stage::VideoHost, err.kind(), err.to_string());
                ControlFlow::Break(())
            }
            Err(err) => {
                error!("video host upload failed: {}", err);
                result.record_error(Stage::VideoHost, err.kind(), err.to_string());
                ControlFlow::Continue(())
            }
        }
    }

    async fn object_store_leg(
        &self,
        date: NaiveDate,
        bundle: &AssetBundle,
        metadata: &ResolvedMetadata,
        result: &mut PublishResult,
    ) {
        let bucket = metadata
            .object_store
            .bucket_preference
            .as_deref()
            .or(self.default_bucket.as_deref());
        let Some(bucket) = bucket else {
            result.record_error(
                Stage::ObjectStore,
                LegErrorKind::Configuration,
                "no bucket configured (set gcs.bucket or GCP_PUBLIC_BUCKET_NAME)",
            );
            return;
        };

        let object_path = object_path(date, &bundle.file_name());
        let bytes = match fs::read(&bundle.video_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                result.record_error(
                    Stage::ObjectStore,
                    LegErrorKind::Io,
                    format!("reading {}: {}", bundle.video_path.display(), err),
                );
                return;
            }
        };

        let store = &self.targets.object_store;
        let url = match store
            .put(bucket, &object_path, bytes, bundle.content_type())
            .await
        {
            Ok(url) => url,
            Err(err) => {
                error!("object store upload failed: {}", err);
                result.record_error(Stage::ObjectStore, err.kind(), err.to_string());
                return;
            }
        };
        info!(url = %url, "stored in object store");

        match store.try_make_public(bucket, &object_path).await {
            Ok(exposure) => info!(entity = %exposure.entity, "object made public"),
            Err(ignored) => {
                warn!("public exposure skipped: {}", ignored);
                result.record_ignored(Some(Stage::ObjectStore), format!("make public: {ignored}"));
            }
        }
        if let Err(ignored) = store.verify_public(&url).await {
            warn!("{}", ignored);
            result.record_ignored(Some(Stage::ObjectStore), format!("reachability: {ignored}"));
        }
        result.object_store_url = Some(url);
    }

    async fn social_leg(
        &self,
        bundle: &AssetBundle,
        metadata: &ResolvedMetadata,
        result: &mut PublishResult,
    ) {
        let social = &metadata.social;
        if !social.is_enabled() {
            info!("social reel and post both disabled, skipping");
            return;
        }

        let link = result
            .object_store_url
            .as_deref()
            .or(result.watch_url.as_deref());
        let caption = social.compose_caption(link);

        let media = match result.object_store_url.clone() {
            Some(url) => ReelMedia::Url(url),
            None => match fs::read(&bundle.video_path).await {
                Ok(data) => ReelMedia::Bytes {
                    data: Bytes::from(data),
                    file_name: bundle.file_name(),
                },
                Err(err) => {
                    result.record_error(
                        Stage::Social,
                        LegErrorKind::Io,
                        format!("reading {}: {}", bundle.video_path.display(), err),
                    );
                    return;
                }
            },
        };

        let reel = ReelRequest {
            media,
            caption,
            share_to_feed: social.effective_share_to_feed(),
            thumb_offset_seconds: social.thumb_offset_seconds,
        };
        match self.targets.social.publish_reel(reel).await {
            Ok(id) => result.social_post_ids.push(id),
            Err(err) => {
                error!("social publish failed: {}", err);
                result.record_error(Stage::Social, err.kind(), err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::metadata::VideoHostSettings,
        platforms::{
            AdapterError, AdapterResult, Exposure, Ignored, VideoUpload, classify_status,
            youtube::watch_url,
        },
        services::{resolver::DEFAULT_TITLE, thumbnail::ThumbnailError},
    };
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::{
        path::Path,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };
    use tempfile::TempDir;

    type Failure = fn() -> AdapterError;

    #[derive(Default)]
    struct MockVideoHost {
        fail: Option<Failure>,
        titles: Mutex<Vec<String>>,
        thumbnails: Mutex<Vec<Option<PathBuf>>>,
    }

    #[async_trait]
    impl VideoHost for MockVideoHost {
        async fn upload(
            &self,
            _video: &Path,
            settings: &VideoHostSettings,
            thumbnail: Option<&Path>,
        ) -> AdapterResult<VideoUpload> {
            self.titles.lock().unwrap().push(settings.snippet.title.clone());
            self.thumbnails
                .lock()
                .unwrap()
                .push(thumbnail.map(Path::to_path_buf));
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            Ok(VideoUpload {
                id: "vid123".into(),
                watch_url: watch_url("vid123"),
                thumbnail: Ok(()),
            })
        }
    }

    #[derive(Default)]
    struct MockObjectStore {
        fail_put: Option<Failure>,
        private_bucket: bool,
        puts: Mutex<Vec<(String, String, usize, String)>>,
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        async fn put(
            &self,
            bucket: &str,
            object_path: &str,
            bytes: Bytes,
            content_type: &str,
        ) -> AdapterResult<String> {
            self.puts.lock().unwrap().push((
                bucket.into(),
                object_path.into(),
                bytes.len(),
                content_type.into(),
            ));
            if let Some(fail) = self.fail_put {
                return Err(fail());
            }
            Ok(format!("https://storage.example/{bucket}/{object_path}"))
        }

        async fn try_make_public(
            &self,
            _bucket: &str,
            _object_path: &str,
        ) -> Result<Exposure, Ignored> {
            if self.private_bucket {
                return Err(Ignored::new("uniform bucket-level access"));
            }
            Ok(Exposure {
                entity: "allUsers".into(),
            })
        }

        async fn verify_public(&self, url: &str) -> Result<(), Ignored> {
            if self.private_bucket {
                return Err(Ignored::new(format!("HTTP 403 for {url}")));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSocial {
        fail: Option<Failure>,
        reels: Mutex<Vec<ReelRequest>>,
    }

    #[async_trait]
    impl SocialPublisher for MockSocial {
        async fn publish_reel(&self, reel: ReelRequest) -> AdapterResult<String> {
            self.reels.lock().unwrap().push(reel);
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            Ok("ig-1".into())
        }
    }

    #[derive(Default)]
    struct MockExtractor {
        fail: bool,
        calls: AtomicU32,
        offsets: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl FrameExtractor for MockExtractor {
        async fn extract(
            &self,
            _video: &Path,
            offset_seconds: f64,
            output: &Path,
        ) -> Result<PathBuf, ThumbnailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.offsets.lock().unwrap().push(offset_seconds);
            if self.fail {
                return Err(ThumbnailError::Extraction("no decoder".into()));
            }
            Ok(output.to_path_buf())
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        host: Arc<MockVideoHost>,
        store: Arc<MockObjectStore>,
        social: Arc<MockSocial>,
        extractor: Arc<MockExtractor>,
        default_bucket: Option<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("uploads");
            let folder = root.join("2025/07/26");
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join("clip.mp4"), b"fake video").unwrap();
            Self {
                _dir: dir,
                root,
                host: Arc::default(),
                store: Arc::default(),
                social: Arc::default(),
                extractor: Arc::default(),
                default_bucket: Some("public-bucket".into()),
            }
        }

        fn folder(&self) -> PathBuf {
            self.root.join("2025/07/26")
        }

        fn publisher(&self) -> Publisher {
            Publisher::new(
                AssetLocator::new(&self.root),
                MetadataResolver::default(),
                self.extractor.clone(),
                PublishTargets {
                    video_host: self.host.clone(),
                    object_store: self.store.clone(),
                    social: self.social.clone(),
                },
                self.default_bucket.clone(),
            )
        }

        async fn run(&self) -> Result<PublishResult, PipelineError> {
            self.publisher().run(&request()).await
        }
    }

    fn request() -> PublishRequest {
        PublishRequest::new(NaiveDate::from_ymd_opt(2025, 7, 26).unwrap())
    }

    #[test]
    fn object_path_is_date_partitioned() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 26).unwrap();
        assert_eq!(
            object_path(date, "clip.mp4"),
            "video_assets/2025/07/26/clip.mp4"
        );
        let other = NaiveDate::from_ymd_opt(2025, 7, 27).unwrap();
        assert_ne!(object_path(date, "clip.mp4"), object_path(other, "clip.mp4"));
    }

    #[tokio::test]
    async fn all_legs_succeed_with_defaults() {
        let fx = Fixture::new();
        let result = fx.run().await.unwrap();

        assert!(!result.has_errors(), "{:?}", result.errors);
        assert_eq!(result.video_host_id.as_deref(), Some("vid123"));
        assert_eq!(result.watch_url.as_deref(), Some("https://www.youtube.com/watch?v=vid123"));
        assert_eq!(
            result.object_store_url.as_deref(),
            Some("https://storage.example/public-bucket/video_assets/2025/07/26/clip.mp4")
        );
        assert_eq!(result.social_post_ids, vec!["ig-1".to_string()]);

        assert_eq!(*fx.host.titles.lock().unwrap(), vec![DEFAULT_TITLE.to_string()]);
        assert_eq!(
            *fx.host.thumbnails.lock().unwrap(),
            vec![Some(fx.folder().join(THUMBNAIL_FILE_NAME))]
        );

        let puts = fx.store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "public-bucket");
        assert_eq!(puts[0].1, "video_assets/2025/07/26/clip.mp4");
        assert_eq!(puts[0].2, b"fake video".len());
        assert_eq!(puts[0].3, "video/mp4");

        let reels = fx.social.reels.lock().unwrap();
        assert_eq!(reels.len(), 1);
        assert_eq!(
            reels[0].media,
            ReelMedia::Url(
                "https://storage.example/public-bucket/video_assets/2025/07/26/clip.mp4".into()
            )
        );
        assert!(reels[0].share_to_feed);
        assert!(reels[0].caption.ends_with("video_assets/2025/07/26/clip.mp4"));
    }

    #[tokio::test]
    async fn video_host_auth_failure_aborts_run() {
        let mut fx = Fixture::new();
        fx.host = Arc::new(MockVideoHost {
            fail: Some(|| AdapterError::AuthFailure("refresh token revoked".into())),
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, Stage::VideoHost);
        assert_eq!(result.errors[0].kind, LegErrorKind::AuthFailure);
        assert!(fx.store.puts.lock().unwrap().is_empty());
        assert!(fx.social.reels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn video_host_rejection_does_not_stop_other_legs() {
        let mut fx = Fixture::new();
        fx.host = Arc::new(MockVideoHost {
            fail: Some(|| AdapterError::PlatformRejected {
                status: 400,
                message: "invalid title".into(),
            }),
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert!(result.stage_failed(Stage::VideoHost));
        assert!(result.watch_url.is_none());
        assert!(result.object_store_url.is_some());
        assert_eq!(result.social_post_ids.len(), 1);
    }

    #[tokio::test]
    async fn video_host_quota_exhaustion_does_not_stop_other_legs() {
        let mut fx = Fixture::new();
        fx.host = Arc::new(MockVideoHost {
            fail: Some(|| {
                classify_status(
                    StatusCode::FORBIDDEN,
                    r#"{"error": {"code": 403, "errors": [{"reason": "quotaExceeded"}]}}"#,
                )
            }),
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, Stage::VideoHost);
        assert_eq!(result.errors[0].kind, LegErrorKind::PlatformRejected);
        assert_eq!(fx.store.puts.lock().unwrap().len(), 1);
        assert_eq!(result.social_post_ids, vec!["ig-1".to_string()]);
        let reels = fx.social.reels.lock().unwrap();
        assert!(reels[0].caption.ends_with("video_assets/2025/07/26/clip.mp4"));
    }

    #[tokio::test]
    async fn object_store_outage_falls_back_to_watch_url_and_bytes() {
        let mut fx = Fixture::new();
        fx.store = Arc::new(MockObjectStore {
            fail_put: Some(|| AdapterError::TransientNetwork("HTTP 503".into())),
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, Stage::ObjectStore);
        assert_eq!(result.errors[0].kind, LegErrorKind::TransientNetwork);
        assert_eq!(result.social_post_ids, vec!["ig-1".to_string()]);

        let reels = fx.social.reels.lock().unwrap();
        assert!(reels[0].caption.ends_with("https://www.youtube.com/watch?v=vid123"));
        assert_eq!(
            reels[0].media,
            ReelMedia::Bytes {
                data: Bytes::from_static(b"fake video"),
                file_name: "clip.mp4".into(),
            }
        );
    }

    #[tokio::test]
    async fn private_bucket_is_ignored_not_failed() {
        let mut fx = Fixture::new();
        fx.store = Arc::new(MockObjectStore {
            private_bucket: true,
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert!(!result.has_errors());
        assert!(result.object_store_url.is_some());
        let ignored: Vec<_> = result
            .ignored
            .iter()
            .filter(|i| i.stage == Some(Stage::ObjectStore))
            .collect();
        assert_eq!(ignored.len(), 2);
    }

    #[tokio::test]
    async fn missing_bucket_is_configuration_error() {
        let mut fx = Fixture::new();
        fx.default_bucket = None;
        let result = fx.run().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, LegErrorKind::Configuration);
        assert!(fx.store.puts.lock().unwrap().is_empty());
        // Social still runs, linking the video host.
        assert_eq!(result.social_post_ids.len(), 1);
    }

    #[tokio::test]
    async fn document_bucket_and_offset_win() {
        let fx = Fixture::new();
        std::fs::write(
            fx.folder().join("metadata.json"),
            r#"{"gcs": {"bucket": "doc-bucket"}, "instagram": {"thumb_offset_seconds": 5.0}}"#,
        )
        .unwrap();
        let result = fx.run().await.unwrap();

        assert!(!result.has_errors());
        assert_eq!(fx.store.puts.lock().unwrap()[0].0, "doc-bucket");
        assert_eq!(*fx.extractor.offsets.lock().unwrap(), vec![5.0]);
        assert_eq!(fx.social.reels.lock().unwrap()[0].thumb_offset_seconds, 5.0);
    }

    #[tokio::test]
    async fn disabled_social_is_a_silent_success() {
        let fx = Fixture::new();
        std::fs::write(
            fx.folder().join("metadata.json"),
            r#"{"instagram": {"enable_reel": false, "enable_post": false}}"#,
        )
        .unwrap();
        let result = fx.run().await.unwrap();

        assert!(!result.has_errors());
        assert!(result.social_post_ids.is_empty());
        assert!(fx.social.reels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn social_failure_is_recorded() {
        let mut fx = Fixture::new();
        fx.social = Arc::new(MockSocial {
            fail: Some(|| AdapterError::PlatformRejected {
                status: 400,
                message: "container ERROR".into(),
            }),
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, Stage::Social);
        assert!(result.video_host_id.is_some());
        assert!(result.object_store_url.is_some());
    }

    #[tokio::test]
    async fn thumbnail_failure_continues_without_one() {
        let mut fx = Fixture::new();
        fx.extractor = Arc::new(MockExtractor {
            fail: true,
            ..Default::default()
        });
        let result = fx.run().await.unwrap();

        assert!(!result.has_errors());
        assert_eq!(result.ignored.len(), 1);
        assert_eq!(result.ignored[0].stage, None);
        assert_eq!(*fx.host.thumbnails.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn unparseable_metadata_fails_before_any_call() {
        let fx = Fixture::new();
        std::fs::write(fx.folder().join("metadata.json"), "{ not json").unwrap();
        let err = fx.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::MetadataParseError { .. }));
        assert_eq!(fx.extractor.calls.load(Ordering::SeqCst), 0);
        assert!(fx.host.titles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ambiguous_folder_fails_before_any_call() {
        let fx = Fixture::new();
        std::fs::write(fx.folder().join("second.mov"), b"x").unwrap();
        let err = fx.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::AmbiguousAsset { .. }));
        assert!(fx.host.titles.lock().unwrap().is_empty());
    }
}
