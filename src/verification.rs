//! Age gate and the two-step verification flow.
//!
//! The flow asks for an image first and falls back to typed entry when the
//! image attempt does not end in a granted verdict. It is transport-agnostic:
//! the caller supplies a `SubmissionChannel` that delivers submissions and
//! renders `FlowEvent`s however its front end needs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::pipeline::extraction::{
    local_today, Age, BirthDateReading, DateExtractor, ExtractionFailure, NormalizedBirthDate,
};

pub const DEFAULT_MINIMUM_AGE: u32 = 18;
pub const DEFAULT_MAXIMUM_AGE: u32 = 120;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_MANUAL_TIMEOUT: Duration = Duration::from_secs(300);

// ═══════════════════════════════════════════════════════════
// Age gate
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Granted,
    Underage,
    /// Older than any living person plausibly is; almost always a misread year.
    Implausible,
}

impl Verdict {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeGate {
    pub minimum_age: u32,
    pub maximum_age: u32,
}

impl Default for AgeGate {
    fn default() -> Self {
        Self {
            minimum_age: DEFAULT_MINIMUM_AGE,
            maximum_age: DEFAULT_MAXIMUM_AGE,
        }
    }
}

impl AgeGate {
    pub fn new(minimum_age: u32, maximum_age: u32) -> Self {
        Self {
            minimum_age,
            maximum_age,
        }
    }

    pub fn decide(&self, reading: &BirthDateReading) -> Verdict {
        self.decide_age(reading.age)
    }

    pub fn decide_age(&self, age: Age) -> Verdict {
        if age.years() > self.maximum_age {
            Verdict::Implausible
        } else if age.years() < self.minimum_age {
            Verdict::Underage
        } else {
            Verdict::Granted
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Flow events and reports
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Image,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptResult {
    Read {
        birth_date: NormalizedBirthDate,
        age: Age,
        verdict: Verdict,
    },
    Failed {
        failure: ExtractionFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    pub stage: FlowStage,
    pub result: AttemptResult,
}

impl AttemptReport {
    pub fn is_granted(&self) -> bool {
        matches!(
            self.result,
            AttemptResult::Read {
                verdict: Verdict::Granted,
                ..
            }
        )
    }
}

/// What the flow tells its front end, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    AwaitingImage { timeout_secs: u64 },
    /// Image received; recognition is running.
    Processing,
    Attempt(AttemptReport),
    AwaitingManualEntry { timeout_secs: u64 },
    TimedOut { stage: FlowStage },
    /// The channel closed before a submission arrived.
    Abandoned { stage: FlowStage },
    Finished { granted: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub session_id: Uuid,
    pub attempts: Vec<AttemptReport>,
    pub granted: bool,
}

impl VerificationOutcome {
    /// Birth date from the granting attempt, if any.
    pub fn birth_date(&self) -> Option<NormalizedBirthDate> {
        self.attempts.iter().find_map(|a| match a.result {
            AttemptResult::Read {
                birth_date,
                verdict: Verdict::Granted,
                ..
            } => Some(birth_date),
            _ => None,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Submission channel
// ═══════════════════════════════════════════════════════════

/// Front-end seam: a chat DM, a terminal, an HTTP session.
///
/// `None` from either `next_*` means the user is gone and no submission will come.
pub trait SubmissionChannel: Send {
    fn next_image(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;

    fn next_text(&mut self) -> impl Future<Output = Option<String>> + Send;

    fn notify(&mut self, event: FlowEvent) -> impl Future<Output = ()> + Send;
}

// ═══════════════════════════════════════════════════════════
// VerificationFlow
// ═══════════════════════════════════════════════════════════

pub struct VerificationFlow {
    extractor: Arc<DateExtractor>,
    gate: AgeGate,
    upload_timeout: Duration,
    manual_timeout: Duration,
    today: Option<NaiveDate>,
}

impl VerificationFlow {
    pub fn new(extractor: Arc<DateExtractor>) -> Self {
        Self {
            extractor,
            gate: AgeGate::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            manual_timeout: DEFAULT_MANUAL_TIMEOUT,
            today: None,
        }
    }

    pub fn with_gate(mut self, gate: AgeGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_timeouts(mut self, upload: Duration, manual: Duration) -> Self {
        self.upload_timeout = upload;
        self.manual_timeout = manual;
        self
    }

    /// Pin the reference date instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn gate(&self) -> &AgeGate {
        &self.gate
    }

    /// Run one verification session to completion.
    pub async fn run<C: SubmissionChannel>(&self, channel: &mut C) -> VerificationOutcome {
        let session_id = Uuid::new_v4();
        let today = self.today.unwrap_or_else(local_today);
        let span = tracing::info_span!("verification", session = %session_id);

        let attempts = self.drive(channel, today).instrument(span.clone()).await;
        let granted = attempts.iter().any(AttemptReport::is_granted);

        channel.notify(FlowEvent::Finished { granted }).await;
        span.in_scope(|| {
            tracing::info!(granted, attempts = attempts.len(), "Verification finished");
        });

        VerificationOutcome {
            session_id,
            attempts,
            granted,
        }
    }

    async fn drive<C: SubmissionChannel>(&self, channel: &mut C, today: NaiveDate) -> Vec<AttemptReport> {
        let mut attempts = Vec::new();

        // Step 1: image upload
        channel
            .notify(FlowEvent::AwaitingImage {
                timeout_secs: self.upload_timeout.as_secs(),
            })
            .await;

        match tokio::time::timeout(self.upload_timeout, channel.next_image()).await {
            Ok(Some(bytes)) => {
                channel.notify(FlowEvent::Processing).await;
                let result = self.read_image(bytes, today).await;
                let report = self.judge(FlowStage::Image, result);
                channel.notify(FlowEvent::Attempt(report.clone())).await;

                let granted = report.is_granted();
                attempts.push(report);
                if granted {
                    return attempts;
                }
            }
            Ok(None) => {
                channel
                    .notify(FlowEvent::Abandoned {
                        stage: FlowStage::Image,
                    })
                    .await;
                return attempts;
            }
            Err(_) => {
                tracing::info!("Image upload timed out");
                channel
                    .notify(FlowEvent::TimedOut {
                        stage: FlowStage::Image,
                    })
                    .await;
            }
        }

        // Step 2: manual fallback, one attempt
        channel
            .notify(FlowEvent::AwaitingManualEntry {
                timeout_secs: self.manual_timeout.as_secs(),
            })
            .await;

        match tokio::time::timeout(self.manual_timeout, channel.next_text()).await {
            Ok(Some(text)) => {
                let result = self.extractor.extract_from_text_on(&text, today);
                let report = self.judge(FlowStage::Manual, result);
                channel.notify(FlowEvent::Attempt(report.clone())).await;
                attempts.push(report);
            }
            Ok(None) => {
                channel
                    .notify(FlowEvent::Abandoned {
                        stage: FlowStage::Manual,
                    })
                    .await;
            }
            Err(_) => {
                tracing::info!("Manual entry timed out");
                channel
                    .notify(FlowEvent::TimedOut {
                        stage: FlowStage::Manual,
                    })
                    .await;
            }
        }

        attempts
    }

    /// OCR is CPU-bound; keep it off the async workers.
    async fn read_image(
        &self,
        bytes: Vec<u8>,
        today: NaiveDate,
    ) -> Result<BirthDateReading, ExtractionFailure> {
        let extractor = Arc::clone(&self.extractor);
        let span = tracing::Span::current();

        let joined = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            extractor.extract_from_image_on(&bytes, today)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Image extraction task failed");
                Err(ExtractionFailure::recognition(format!(
                    "extraction task aborted: {e}"
                )))
            }
        }
    }

    fn judge(
        &self,
        stage: FlowStage,
        result: Result<BirthDateReading, ExtractionFailure>,
    ) -> AttemptReport {
        assess(&self.gate, stage, result)
    }
}

/// Turn one extraction result into a report, applying the gate to readings.
pub fn assess(
    gate: &AgeGate,
    stage: FlowStage,
    result: Result<BirthDateReading, ExtractionFailure>,
) -> AttemptReport {
    let result = match result {
        Ok(reading) => {
            let verdict = gate.decide(&reading);
            tracing::info!(stage = ?stage, age = reading.age.years(), verdict = ?verdict, "Age decided");
            AttemptResult::Read {
                birth_date: reading.birth_date,
                age: reading.age,
                verdict,
            }
        }
        Err(failure) => AttemptResult::Failed { failure },
    };
    AttemptReport { stage, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::{
        MockImagePreprocessor, MockRecognizer, PatternConfig,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn flow_reading(ocr_text: &str) -> VerificationFlow {
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::new()),
            Box::new(MockRecognizer::new(ocr_text)),
            PatternConfig::default(),
        );
        VerificationFlow::new(Arc::new(extractor))
            .with_today(today())
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
    }

    enum Script<T> {
        Send(T),
        Close,
        Stall,
    }

    impl<T> Script<T> {
        async fn play(self) -> Option<T> {
            match self {
                Self::Send(v) => Some(v),
                Self::Close => None,
                Self::Stall => std::future::pending().await,
            }
        }
    }

    struct ScriptedChannel {
        image: Option<Script<Vec<u8>>>,
        text: Option<Script<String>>,
        events: Vec<FlowEvent>,
    }

    impl ScriptedChannel {
        fn new(image: Script<Vec<u8>>, text: Script<String>) -> Self {
            Self {
                image: Some(image),
                text: Some(text),
                events: Vec::new(),
            }
        }

        fn saw(&self, wanted: impl Fn(&FlowEvent) -> bool) -> bool {
            self.events.iter().any(wanted)
        }
    }

    impl SubmissionChannel for ScriptedChannel {
        async fn next_image(&mut self) -> Option<Vec<u8>> {
            match self.image.take() {
                Some(script) => script.play().await,
                None => None,
            }
        }

        async fn next_text(&mut self) -> Option<String> {
            match self.text.take() {
                Some(script) => script.play().await,
                None => None,
            }
        }

        async fn notify(&mut self, event: FlowEvent) {
            self.events.push(event);
        }
    }

    // ── gate ──

    #[test]
    fn gate_boundaries() {
        let gate = AgeGate::default();
        assert_eq!(gate.decide_age(Age(17)), Verdict::Underage);
        assert_eq!(gate.decide_age(Age(18)), Verdict::Granted);
        assert_eq!(gate.decide_age(Age(120)), Verdict::Granted);
        assert_eq!(gate.decide_age(Age(121)), Verdict::Implausible);
    }

    #[test]
    fn gate_custom_minimum() {
        let gate = AgeGate::new(21, 100);
        assert_eq!(gate.decide_age(Age(20)), Verdict::Underage);
        assert!(gate.decide_age(Age(21)).is_granted());
    }

    #[test]
    fn gate_decides_from_reading() {
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::new()),
            Box::new(MockRecognizer::empty()),
            PatternConfig::default(),
        );
        let reading = extractor.extract_from_text_on("2006-06-02", today()).unwrap();
        assert_eq!(reading.age, Age(17));
        assert_eq!(AgeGate::default().decide(&reading), Verdict::Underage);
    }

    // ── flow ──

    #[tokio::test]
    async fn image_success_skips_manual_entry() {
        let flow = flow_reading("2001/07/15");
        let mut channel = ScriptedChannel::new(Script::Send(b"img".to_vec()), Script::Stall);

        let outcome = flow.run(&mut channel).await;

        assert!(outcome.granted);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].stage, FlowStage::Image);
        assert_eq!(outcome.birth_date().unwrap().to_string(), "2001-07-15");
        assert!(!channel.saw(|e| matches!(e, FlowEvent::AwaitingManualEntry { .. })));
        assert_eq!(channel.events.last(), Some(&FlowEvent::Finished { granted: true }));
    }

    #[tokio::test]
    async fn unreadable_image_falls_back_to_manual() {
        let flow = flow_reading("no digits here");
        let mut channel = ScriptedChannel::new(
            Script::Send(b"img".to_vec()),
            Script::Send("1990/01/01".into()),
        );

        let outcome = flow.run(&mut channel).await;

        assert!(outcome.granted);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(
            outcome.attempts[0].result,
            AttemptResult::Failed {
                failure: ExtractionFailure::NoDateFound
            }
        );
        assert_eq!(outcome.attempts[1].stage, FlowStage::Manual);
        assert!(channel.saw(|e| matches!(e, FlowEvent::Processing)));
    }

    #[tokio::test]
    async fn underage_image_still_offers_manual_entry() {
        let flow = flow_reading("2010-01-01");
        let mut channel = ScriptedChannel::new(
            Script::Send(b"img".to_vec()),
            Script::Send("2012-01-01".into()),
        );

        let outcome = flow.run(&mut channel).await;

        assert!(!outcome.granted);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(matches!(
            outcome.attempts[0].result,
            AttemptResult::Read {
                verdict: Verdict::Underage,
                ..
            }
        ));
        assert!(outcome.birth_date().is_none());
    }

    #[tokio::test]
    async fn implausible_year_is_not_granted() {
        let flow = flow_reading("1800-01-01");
        let mut channel = ScriptedChannel::new(Script::Send(b"img".to_vec()), Script::Close);

        let outcome = flow.run(&mut channel).await;

        assert!(!outcome.granted);
        assert!(matches!(
            outcome.attempts[0].result,
            AttemptResult::Read {
                verdict: Verdict::Implausible,
                ..
            }
        ));
        assert!(channel.saw(|e| *e == FlowEvent::Abandoned { stage: FlowStage::Manual }));
    }

    #[tokio::test]
    async fn upload_timeout_goes_to_manual_entry() {
        let flow = flow_reading("2001/07/15");
        let mut channel = ScriptedChannel::new(Script::Stall, Script::Send("2000-02-29".into()));

        let outcome = flow.run(&mut channel).await;

        assert!(outcome.granted);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].stage, FlowStage::Manual);
        assert!(channel.saw(|e| *e == FlowEvent::TimedOut { stage: FlowStage::Image }));
    }

    #[tokio::test]
    async fn both_timeouts_deny() {
        let flow = flow_reading("2001/07/15");
        let mut channel = ScriptedChannel::new(Script::Stall, Script::Stall);

        let outcome = flow.run(&mut channel).await;

        assert!(!outcome.granted);
        assert!(outcome.attempts.is_empty());
        assert!(channel.saw(|e| *e == FlowEvent::TimedOut { stage: FlowStage::Manual }));
        assert_eq!(channel.events.last(), Some(&FlowEvent::Finished { granted: false }));
    }

    #[tokio::test]
    async fn closed_channel_ends_without_manual_prompt() {
        let flow = flow_reading("2001/07/15");
        let mut channel = ScriptedChannel::new(Script::Close, Script::Send("2000-01-01".into()));

        let outcome = flow.run(&mut channel).await;

        assert!(!outcome.granted);
        assert!(outcome.attempts.is_empty());
        assert!(!channel.saw(|e| matches!(e, FlowEvent::AwaitingManualEntry { .. })));
    }

    #[tokio::test]
    async fn invalid_manual_date_is_reported() {
        let flow = flow_reading("");
        let mut channel = ScriptedChannel::new(
            Script::Send(b"img".to_vec()),
            Script::Send("2001/02/30".into()),
        );

        let outcome = flow.run(&mut channel).await;

        assert!(!outcome.granted);
        match &outcome.attempts[1].result {
            AttemptResult::Failed { failure } => assert_eq!(failure.code(), "invalid_date"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids() {
        let flow = flow_reading("2001/07/15");
        let mut a = ScriptedChannel::new(Script::Send(b"img".to_vec()), Script::Close);
        let mut b = ScriptedChannel::new(Script::Send(b"img".to_vec()), Script::Close);
        let first = flow.run(&mut a).await;
        let second = flow.run(&mut b).await;
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(FlowEvent::TimedOut {
            stage: FlowStage::Image,
        })
        .unwrap();
        assert_eq!(json["event"], "timed_out");
        assert_eq!(json["stage"], "image");
    }
}
