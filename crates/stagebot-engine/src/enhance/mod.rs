mod magnific;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use stagebot_contracts::jobs::{DegradeReason, StageOutcome};
use tracing::{debug, info, warn};

use crate::clock::Sleeper;
use crate::config::{EnhancementConfig, EnhancementParams};
use crate::http::{error_chain_text, http_status_of};
use crate::normalize::{encode_jpeg, JPEG_QUALITY};

pub use magnific::MagnificClient;

/// What the upscaler said to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReply {
    /// Finished synchronously; result URLs.
    Generated(Vec<String>),
    /// Accepted as an asynchronous task.
    Queued { task_id: String },
    /// Success status but neither of the above; carries a payload excerpt.
    Unrecognized(String),
}

/// Remote task status as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed { generated: Vec<String> },
    Failed { message: Option<String> },
}

/// An image enhancement service with asynchronous completion.
pub trait EnhancementApi: Send + Sync {
    fn submit(&self, image_base64: &str, params: &EnhancementParams) -> Result<SubmitReply>;
    fn poll(&self, task_id: &str) -> Result<TaskStatus>;
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Terminal state of the polling state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Completed(String),
    CompletedEmpty,
    Failed(Option<String>),
    TimedOut { polls: u32 },
}

/// Polls `task_id` until it reaches a terminal status, sleeping `interval`
/// before each poll and giving up after `max_polls`. A poll that errors is
/// treated like a pending one.
pub fn poll_until_terminal(
    api: &dyn EnhancementApi,
    sleeper: &dyn Sleeper,
    task_id: &str,
    interval: Duration,
    max_polls: u32,
) -> PollResult {
    for attempt in 1..=max_polls {
        sleeper.sleep(interval);
        match api.poll(task_id) {
            Ok(TaskStatus::Pending) => {}
            Ok(TaskStatus::Completed { generated }) => {
                return match generated.into_iter().find(|url| !url.trim().is_empty()) {
                    Some(url) => PollResult::Completed(url),
                    None => PollResult::CompletedEmpty,
                };
            }
            Ok(TaskStatus::Failed { message }) => return PollResult::Failed(message),
            Err(err) => {
                debug!(task_id, attempt, error = %error_chain_text(&err, 200), "poll failed");
            }
        }
    }
    PollResult::TimedOut { polls: max_polls }
}

/// The upscaling stage. Never fails: every unsuccessful path hands back the
/// input path as `Degraded`.
pub struct Enhancer {
    api: Option<Box<dyn EnhancementApi>>,
    params: EnhancementParams,
    poll_interval: Duration,
    max_polls: u32,
    sleeper: Arc<dyn Sleeper>,
}

impl Enhancer {
    /// Uses the Magnific client when a key is configured.
    pub fn from_config(config: &EnhancementConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let api = config
            .api_key
            .clone()
            .map(|key| Box::new(MagnificClient::new(config, key)) as Box<dyn EnhancementApi>);
        Self::with_api(api, config, sleeper)
    }

    pub fn with_api(
        api: Option<Box<dyn EnhancementApi>>,
        config: &EnhancementConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            api,
            params: config.params.clone(),
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
            sleeper,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api.is_some()
    }

    pub fn enhance(&self, input: &Path) -> StageOutcome<PathBuf> {
        match self.try_enhance(input) {
            Ok(path) => StageOutcome::Ok(path),
            Err(reason) => {
                warn!(input = %input.display(), %reason, "keeping original resolution");
                StageOutcome::Degraded {
                    value: input.to_path_buf(),
                    reason,
                }
            }
        }
    }

    fn try_enhance(&self, input: &Path) -> Result<PathBuf, DegradeReason> {
        let Some(api) = self.api.as_deref() else {
            return Err(DegradeReason::MissingCredential);
        };
        let bytes =
            fs::read(input).map_err(|err| DegradeReason::InputUnreadable(err.to_string()))?;
        let encoded = BASE64.encode(bytes);

        let reply = api
            .submit(&encoded, &self.params)
            .map_err(|err| classify_submit_error(&err))?;
        let url = match reply {
            SubmitReply::Generated(urls) => {
                let url = urls
                    .into_iter()
                    .find(|url| !url.trim().is_empty())
                    .ok_or_else(|| DegradeReason::MalformedResponse("empty result list".to_string()))?;
                info!("upscale finished immediately");
                url
            }
            SubmitReply::Queued { task_id } => {
                info!(%task_id, "upscale queued; polling");
                match poll_until_terminal(
                    api,
                    self.sleeper.as_ref(),
                    &task_id,
                    self.poll_interval,
                    self.max_polls,
                ) {
                    PollResult::Completed(url) => url,
                    PollResult::CompletedEmpty => return Err(DegradeReason::CompletedWithoutImage),
                    PollResult::Failed(message) => return Err(DegradeReason::TaskFailed(message)),
                    PollResult::TimedOut { polls } => return Err(DegradeReason::TimedOut(polls)),
                }
            }
            SubmitReply::Unrecognized(excerpt) => {
                return Err(DegradeReason::MalformedResponse(excerpt));
            }
        };

        let fetched = api
            .fetch(&url)
            .map_err(|err| DegradeReason::DownloadFailed(error_chain_text(&err, 300)))?;
        if fetched.is_empty() {
            return Err(DegradeReason::DownloadFailed("empty body".to_string()));
        }
        let jpeg = as_jpeg(fetched)?;
        let output = enhanced_path(input);
        fs::write(&output, jpeg)
            .map_err(|err| DegradeReason::DownloadFailed(err.to_string()))?;
        Ok(output)
    }
}

fn classify_submit_error(err: &anyhow::Error) -> DegradeReason {
    match http_status_of(err) {
        Some(401) => DegradeReason::Unauthorized,
        Some(402) => DegradeReason::PaymentRequired,
        Some(code) => DegradeReason::HttpStatus(code),
        None => DegradeReason::Transport(error_chain_text(err, 300)),
    }
}

fn enhanced_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("render");
    input.with_file_name(format!("{stem}_enhanced.jpg"))
}

/// Renders are delivered as JPEG; other formats are re-encoded at full size.
/// A body that does not decode as an image is rejected.
fn as_jpeg(bytes: Vec<u8>) -> Result<Vec<u8>, DegradeReason> {
    let image = image::load_from_memory(&bytes)
        .map_err(|_| DegradeReason::DownloadFailed("result is not an image".to_string()))?;
    if matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg)) {
        return Ok(bytes);
    }
    encode_jpeg(&image.to_rgb8(), JPEG_QUALITY)
        .map_err(|err| DegradeReason::DownloadFailed(error_chain_text(&err, 300)))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use stagebot_contracts::jobs::DegradeReason;

    use super::{
        poll_until_terminal, EnhancementApi, Enhancer, PollResult, SubmitReply, TaskStatus,
    };
    use crate::clock::RecordingSleeper;
    use crate::config::{EnhancementConfig, EnhancementParams};
    use crate::http::HttpStatusError;
    use crate::normalize::{encode_jpeg, JPEG_QUALITY};
    use image::{ImageFormat, Rgb, RgbImage};

    #[derive(Clone, Default)]
    struct ScriptedApi {
        submit: Arc<Mutex<Option<anyhow::Result<SubmitReply>>>>,
        polls: Arc<Mutex<VecDeque<anyhow::Result<TaskStatus>>>>,
        poll_count: Arc<Mutex<u32>>,
        fetched: Arc<Mutex<Vec<String>>>,
        fetch_fails: bool,
        body: Option<Vec<u8>>,
    }

    impl ScriptedApi {
        fn submitting(reply: anyhow::Result<SubmitReply>) -> Self {
            let api = Self::default();
            if let Ok(mut slot) = api.submit.lock() {
                *slot = Some(reply);
            }
            api
        }

        fn then_polls(self, statuses: Vec<anyhow::Result<TaskStatus>>) -> Self {
            if let Ok(mut polls) = self.polls.lock() {
                polls.extend(statuses);
            }
            self
        }

        fn poll_count(&self) -> u32 {
            self.poll_count.lock().map(|count| *count).unwrap_or(0)
        }
    }

    impl EnhancementApi for ScriptedApi {
        fn submit(&self, image_base64: &str, _params: &EnhancementParams) -> anyhow::Result<SubmitReply> {
            assert!(!image_base64.is_empty());
            match self.submit.lock().ok().and_then(|mut slot| slot.take()) {
                Some(reply) => reply,
                None => bail!("submitted twice"),
            }
        }

        fn poll(&self, _task_id: &str) -> anyhow::Result<TaskStatus> {
            if let Ok(mut count) = self.poll_count.lock() {
                *count += 1;
            }
            self.polls
                .lock()
                .ok()
                .and_then(|mut polls| polls.pop_front())
                .unwrap_or(Ok(TaskStatus::Pending))
        }

        fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if let Ok(mut fetched) = self.fetched.lock() {
                fetched.push(url.to_string());
            }
            if self.fetch_fails {
                bail!("404 on result url");
            }
            match &self.body {
                Some(body) => Ok(body.clone()),
                None => upscaled_jpeg(),
            }
        }
    }

    fn upscaled_jpeg() -> anyhow::Result<Vec<u8>> {
        encode_jpeg(&RgbImage::from_pixel(32, 24, Rgb([180, 160, 140])), JPEG_QUALITY)
    }

    fn enhancer(api: Option<ScriptedApi>, sleeper: &RecordingSleeper) -> Enhancer {
        Enhancer::with_api(
            api.map(|api| Box::new(api) as Box<dyn EnhancementApi>),
            &EnhancementConfig::default(),
            Arc::new(sleeper.clone()),
        )
    }

    fn furnished(dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.join("furnished_ab12cd.jpg");
        fs::write(&path, b"furnished")?;
        Ok(path)
    }

    fn status_error(status: u16) -> anyhow::Error {
        HttpStatusError {
            service: "Magnific".to_string(),
            status,
            body: String::new(),
        }
        .into()
    }

    #[test]
    fn missing_credential_returns_input_as_degraded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let sleeper = RecordingSleeper::new();

        let outcome = enhancer(None, &sleeper).enhance(&input);
        assert_eq!(outcome.reason(), Some(&DegradeReason::MissingCredential));
        assert_eq!(outcome.value(), &input);
        assert!(sleeper.recorded().is_empty());
        Ok(())
    }

    #[test]
    fn immediate_result_is_downloaded_next_to_input() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let api = ScriptedApi::submitting(Ok(SubmitReply::Generated(vec![
            "https://cdn.test/a.jpg".to_string(),
        ])));
        let sleeper = RecordingSleeper::new();

        let outcome = enhancer(Some(api.clone()), &sleeper).enhance(&input);
        assert!(!outcome.is_degraded());
        let output = outcome.into_value();
        assert_eq!(output, temp.path().join("furnished_ab12cd_enhanced.jpg"));
        assert_eq!(fs::read(&output)?, upscaled_jpeg()?);
        assert_eq!(api.poll_count(), 0);
        Ok(())
    }

    #[test]
    fn queued_task_completes_after_pending_polls() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let api = ScriptedApi::submitting(Ok(SubmitReply::Queued {
            task_id: "t-1".to_string(),
        }))
        .then_polls(vec![
            Ok(TaskStatus::Pending),
            Err(anyhow::anyhow!("502 from gateway")),
            Ok(TaskStatus::Completed {
                generated: vec!["https://cdn.test/b.jpg".to_string()],
            }),
        ]);
        let sleeper = RecordingSleeper::new();

        let outcome = enhancer(Some(api.clone()), &sleeper).enhance(&input);
        assert!(!outcome.is_degraded());
        assert_eq!(api.poll_count(), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(2); 3]);
        let fetched = api.fetched.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(fetched, vec!["https://cdn.test/b.jpg".to_string()]);
        Ok(())
    }

    #[test]
    fn never_terminal_task_times_out_after_sixty_polls() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let api = ScriptedApi::submitting(Ok(SubmitReply::Queued {
            task_id: "t-2".to_string(),
        }));
        let sleeper = RecordingSleeper::new();

        let outcome = enhancer(Some(api.clone()), &sleeper).enhance(&input);
        assert_eq!(outcome.reason(), Some(&DegradeReason::TimedOut(60)));
        assert_eq!(outcome.value(), &input);
        assert_eq!(api.poll_count(), 60);
        assert_eq!(sleeper.total(), Duration::from_secs(120));
        assert_eq!(fs::read(&input)?, b"furnished");
        Ok(())
    }

    #[test]
    fn terminal_failures_stop_polling() {
        let sleeper = RecordingSleeper::new();
        let api = ScriptedApi::default().then_polls(vec![
            Ok(TaskStatus::Pending),
            Ok(TaskStatus::Failed {
                message: Some("nsfw".to_string()),
            }),
        ]);
        let result = poll_until_terminal(&api, &sleeper, "t", Duration::from_secs(2), 60);
        assert_eq!(result, PollResult::Failed(Some("nsfw".to_string())));
        assert_eq!(api.poll_count(), 2);

        let api = ScriptedApi::default().then_polls(vec![Ok(TaskStatus::Completed {
            generated: Vec::new(),
        })]);
        let result = poll_until_terminal(&api, &sleeper, "t", Duration::from_secs(2), 60);
        assert_eq!(result, PollResult::CompletedEmpty);
    }

    #[test]
    fn http_statuses_map_to_reasons() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let sleeper = RecordingSleeper::new();
        for (status, expected) in [
            (401, DegradeReason::Unauthorized),
            (402, DegradeReason::PaymentRequired),
            (500, DegradeReason::HttpStatus(500)),
        ] {
            let api = ScriptedApi::submitting(Err(status_error(status)));
            let outcome = enhancer(Some(api), &sleeper).enhance(&input);
            assert_eq!(outcome.reason(), Some(&expected));
            assert_eq!(outcome.value(), &input);
        }

        let api = ScriptedApi::submitting(Err(anyhow::anyhow!("dns failure")));
        let outcome = enhancer(Some(api), &sleeper).enhance(&input);
        assert!(matches!(outcome.reason(), Some(DegradeReason::Transport(detail)) if detail.contains("dns")));
        Ok(())
    }

    #[test]
    fn unrecognized_reply_and_failed_download_fall_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let sleeper = RecordingSleeper::new();

        let api = ScriptedApi::submitting(Ok(SubmitReply::Unrecognized("{}".to_string())));
        let outcome = enhancer(Some(api), &sleeper).enhance(&input);
        assert_eq!(
            outcome.reason(),
            Some(&DegradeReason::MalformedResponse("{}".to_string()))
        );

        let mut api = ScriptedApi::submitting(Ok(SubmitReply::Generated(vec![
            "https://cdn.test/gone.jpg".to_string(),
        ])));
        api.fetch_fails = true;
        let outcome = enhancer(Some(api), &sleeper).enhance(&input);
        assert!(matches!(outcome.reason(), Some(DegradeReason::DownloadFailed(_))));
        assert_eq!(outcome.value(), &input);
        assert!(!temp.path().join("furnished_ab12cd_enhanced.jpg").exists());
        Ok(())
    }

    #[test]
    fn non_image_result_body_falls_back_to_input() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let sleeper = RecordingSleeper::new();

        let mut api = ScriptedApi::submitting(Ok(SubmitReply::Generated(vec![
            "https://cdn.test/denied.jpg".to_string(),
        ])));
        api.body = Some(b"<html>Access Denied</html>".to_vec());
        let outcome = enhancer(Some(api), &sleeper).enhance(&input);
        assert_eq!(
            outcome.reason(),
            Some(&DegradeReason::DownloadFailed("result is not an image".to_string()))
        );
        assert_eq!(outcome.value(), &input);
        assert!(!temp.path().join("furnished_ab12cd_enhanced.jpg").exists());
        Ok(())
    }

    #[test]
    fn png_result_is_reencoded_as_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = furnished(temp.path())?;
        let sleeper = RecordingSleeper::new();

        let mut png = Vec::new();
        RgbImage::from_pixel(30, 20, Rgb([10, 20, 30]))
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)?;
        let mut api = ScriptedApi::submitting(Ok(SubmitReply::Generated(vec![
            "https://cdn.test/c.png".to_string(),
        ])));
        api.body = Some(png);
        let outcome = enhancer(Some(api), &sleeper).enhance(&input);
        assert!(!outcome.is_degraded());
        let bytes = fs::read(outcome.value())?;
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Jpeg);
        assert_eq!(image::image_dimensions(outcome.value())?, (30, 20));
        Ok(())
    }
}
